//! Glue between prepared API requests and the crux_http capability.

use crux_http::Http;

use crate::api::{ApiOutcome, HttpMethod, PreparedRequest, RequestId};
use crate::event::Event;

pub const MAX_RESPONSE_BODY_SIZE: usize = 20 * 1024 * 1024;

impl ApiOutcome {
    /// Flattens a crux_http result. Non-2xx responses surfaced as errors by
    /// crux_http keep their status and server body so they classify like any
    /// other response.
    #[must_use]
    pub fn from_http(result: crux_http::Result<crux_http::Response<Vec<u8>>>) -> Self {
        match result {
            Ok(mut response) => {
                let status = u16::from(response.status());
                let body = response.take_body().unwrap_or_default();
                if body.len() > MAX_RESPONSE_BODY_SIZE {
                    return Self::Transport {
                        message: format!("response body too large ({} bytes)", body.len()),
                    };
                }
                Self::Response { status, body }
            }
            Err(crux_http::Error::Http(e)) => Self::Response {
                status: u16::from(e.code),
                body: e.body.unwrap_or_else(|| e.message.into_bytes()),
            },
            Err(crux_http::Error::Timeout) => Self::TimedOut,
            Err(e) => Self::Transport {
                message: e.to_string(),
            },
        }
    }
}

/// Sends one attempt. The response comes back as [`Event::ApiCompleted`]
/// tagged with the request id and attempt number.
pub fn dispatch(http: &Http<Event>, request: PreparedRequest, request_id: RequestId, attempt: u32) {
    let url = request.url.as_str();
    let mut builder = match request.method {
        HttpMethod::Get => http.get(url),
        HttpMethod::Post => http.post(url),
    };
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
        builder = builder.body_bytes(body.bytes);
    }
    builder.send(move |result| Event::ApiCompleted {
        request_id,
        attempt,
        outcome: ApiOutcome::from_http(result),
    });
}
