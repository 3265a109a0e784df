//! Backend endpoint catalogue, request construction, response decoding and
//! the per-request retry ledger.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::model::{BidId, BidRequest, OrderDraft, OrderId, PhotoStage, RegistrationForm, Role, TelegramId};
use crate::reputation::ReviewPayload;
use crate::schedule::TimerId;

pub const TELEGRAM_ID_HEADER: &str = "Telegram-Id";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Correlates every attempt of one logical call. Sent as `X-Request-Id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Could not encode request body: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Could not decode {call} response: {source}")]
    Decode {
        call: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        let kind = match e {
            ApiError::InvalidUrl(_) => ErrorKind::InvalidState,
            ApiError::Encode(_) | ApiError::Decode { .. } => ErrorKind::Deserialization,
        };
        AppError::new(kind, kind_message(kind)).with_internal(e.to_string())
    }
}

fn kind_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Deserialization => "Unexpected data from the server",
        _ => "The request could not be prepared",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Every backend call the core makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    LoadProfile,
    Register(RegistrationForm),
    LoadTruckTypes,
    /// `generation` is the listing cache generation the fetch was issued for.
    LoadOrders { role: Role, generation: u64 },
    CreateOrder(OrderDraft),
    PlaceBid(BidRequest),
    LoadBids { order_id: OrderId },
    SelectWinner { order_id: OrderId, bid_id: BidId },
    ConfirmCompletion { order_id: OrderId },
    CancelOrder { order_id: OrderId, reason: String },
    UploadPhotos {
        order_id: OrderId,
        stage: PhotoStage,
        content_type: String,
        body: Vec<u8>,
    },
    LoadPhotos { order_id: OrderId },
    LoadMessages { order_id: OrderId },
    SendMessage { order_id: OrderId, text: String },
    MarkMessagesRead { order_id: OrderId },
    LoadUnreadCounts,
    LoadRating { telegram_id: TelegramId },
    LoadStats { telegram_id: TelegramId },
    LoadReviews { telegram_id: TelegramId },
    CreateReview(ReviewPayload),
    LoadBadges,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A fully built HTTP request, ready for the Http capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl ApiCall {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::LoadProfile => "load_profile",
            Self::Register(_) => "register",
            Self::LoadTruckTypes => "load_truck_types",
            Self::LoadOrders { .. } => "load_orders",
            Self::CreateOrder(_) => "create_order",
            Self::PlaceBid(_) => "place_bid",
            Self::LoadBids { .. } => "load_bids",
            Self::SelectWinner { .. } => "select_winner",
            Self::ConfirmCompletion { .. } => "confirm_completion",
            Self::CancelOrder { .. } => "cancel_order",
            Self::UploadPhotos { .. } => "upload_photos",
            Self::LoadPhotos { .. } => "load_photos",
            Self::LoadMessages { .. } => "load_messages",
            Self::SendMessage { .. } => "send_message",
            Self::MarkMessagesRead { .. } => "mark_messages_read",
            Self::LoadUnreadCounts => "load_unread_counts",
            Self::LoadRating { .. } => "load_rating",
            Self::LoadStats { .. } => "load_stats",
            Self::LoadReviews { .. } => "load_reviews",
            Self::CreateReview(_) => "create_review",
            Self::LoadBadges => "load_badges",
        }
    }

    #[must_use]
    pub const fn method(&self) -> HttpMethod {
        match self {
            Self::Register(_)
            | Self::CreateOrder(_)
            | Self::PlaceBid(_)
            | Self::SelectWinner { .. }
            | Self::ConfirmCompletion { .. }
            | Self::CancelOrder { .. }
            | Self::UploadPhotos { .. }
            | Self::SendMessage { .. }
            | Self::MarkMessagesRead { .. }
            | Self::CreateReview(_) => HttpMethod::Post,
            _ => HttpMethod::Get,
        }
    }

    /// Path relative to the API base URL.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::LoadProfile => "api/user".into(),
            Self::Register(_) => "api/register".into(),
            Self::LoadTruckTypes => "api/truck-types".into(),
            Self::LoadOrders { role, .. } => format!("api/{role}/orders"),
            Self::CreateOrder(_) => "api/orders".into(),
            Self::PlaceBid(_) => "api/bids".into(),
            Self::LoadBids { order_id } => format!("api/orders/{order_id}/bids"),
            Self::SelectWinner { order_id, .. } => format!("api/orders/{order_id}/select-winner"),
            Self::ConfirmCompletion { order_id } => format!("api/orders/{order_id}/confirm-completion"),
            Self::CancelOrder { order_id, .. } => format!("api/orders/{order_id}/cancel"),
            Self::UploadPhotos { order_id, stage, .. } => {
                format!("api/orders/{order_id}/photos/{}", stage.as_str())
            }
            Self::LoadPhotos { order_id } => format!("api/orders/{order_id}/photos"),
            Self::LoadMessages { order_id } | Self::SendMessage { order_id, .. } => {
                format!("api/orders/{order_id}/messages")
            }
            Self::MarkMessagesRead { order_id } => format!("api/orders/{order_id}/messages/read"),
            Self::LoadUnreadCounts => "api/orders/unread-messages-count".into(),
            Self::LoadRating { telegram_id } => format!("api/user/{telegram_id}/rating"),
            Self::LoadStats { telegram_id } => format!("api/user/{telegram_id}/stats"),
            Self::LoadReviews { telegram_id } => format!("api/user/{telegram_id}/reviews"),
            Self::CreateReview(_) => "api/reviews/create".into(),
            Self::LoadBadges => "api/reviews/badges".into(),
        }
    }

    /// Mutations whose 400/409 means the order moved on.
    #[must_use]
    pub const fn is_lifecycle_mutation(&self) -> bool {
        matches!(
            self,
            Self::PlaceBid(_)
                | Self::SelectWinner { .. }
                | Self::ConfirmCompletion { .. }
                | Self::CancelOrder { .. }
                | Self::CreateReview(_)
        )
    }

    /// Calls after which the cached listing can no longer be trusted.
    #[must_use]
    pub const fn invalidates_listing(&self) -> bool {
        matches!(
            self,
            Self::CreateOrder(_)
                | Self::PlaceBid(_)
                | Self::SelectWinner { .. }
                | Self::ConfirmCompletion { .. }
                | Self::CancelOrder { .. }
                | Self::UploadPhotos { .. }
                | Self::SendMessage { .. }
                | Self::CreateReview(_)
        )
    }

    #[must_use]
    pub const fn timeout_ms(&self, config: &AppConfig) -> u64 {
        match self {
            Self::LoadOrders { .. } => config.listing_timeout_ms,
            _ => config.request_timeout_ms,
        }
    }

    #[must_use]
    pub const fn fallback_message(&self) -> &'static str {
        match self {
            Self::LoadProfile => "Could not load your profile",
            Self::Register(_) => "Registration failed",
            Self::LoadTruckTypes => "Could not load truck types",
            Self::LoadOrders { .. } => "Could not load orders",
            Self::CreateOrder(_) => "Could not create the order",
            Self::PlaceBid(_) => "Could not place the bid",
            Self::LoadBids { .. } => "Could not load bids",
            Self::SelectWinner { .. } => "Could not select the driver",
            Self::ConfirmCompletion { .. } => "Could not confirm completion",
            Self::CancelOrder { .. } => "Could not cancel the order",
            Self::UploadPhotos { .. } => "Could not upload photos",
            Self::LoadPhotos { .. } => "Could not load photos",
            Self::LoadMessages { .. } => "Could not load messages",
            Self::SendMessage { .. } => "Could not send the message",
            Self::MarkMessagesRead { .. } => "Could not update read status",
            Self::LoadUnreadCounts => "Could not load unread counts",
            Self::LoadRating { .. } => "Could not load rating",
            Self::LoadStats { .. } => "Could not load statistics",
            Self::LoadReviews { .. } => "Could not load reviews",
            Self::CreateReview(_) => "Could not submit the review",
            Self::LoadBadges => "Could not load badges",
        }
    }

    fn body(&self, telegram_id: TelegramId) -> Result<Option<RequestBody>, ApiError> {
        let value = match self {
            Self::Register(form) => to_json(form)?,
            Self::CreateOrder(draft) => to_json(draft)?,
            Self::PlaceBid(bid) => to_json(bid)?,
            Self::CreateReview(payload) => to_json(payload)?,
            Self::SelectWinner { bid_id, .. } => json!({ "telegram_id": telegram_id, "bid_id": bid_id }),
            Self::ConfirmCompletion { .. } | Self::MarkMessagesRead { .. } => {
                json!({ "telegram_id": telegram_id })
            }
            Self::CancelOrder { reason, .. } => {
                json!({ "telegram_id": telegram_id, "cancellation_reason": reason })
            }
            Self::SendMessage { text, .. } => {
                json!({ "telegram_id": telegram_id, "message_text": text })
            }
            Self::UploadPhotos {
                content_type, body, ..
            } => {
                return Ok(Some(RequestBody {
                    content_type: content_type.clone(),
                    bytes: body.clone(),
                }))
            }
            _ => return Ok(None),
        };
        let bytes = serde_json::to_vec(&value).map_err(ApiError::Encode)?;
        Ok(Some(RequestBody {
            content_type: JSON_CONTENT_TYPE.into(),
            bytes,
        }))
    }

    /// Builds the HTTP request for one attempt. The request id stays the same
    /// across attempts.
    pub fn prepare(&self, base: &Url, telegram_id: TelegramId, request_id: RequestId) -> Result<PreparedRequest, ApiError> {
        let mut url = base.join(&self.path())?;
        url.query_pairs_mut()
            .append_pair("telegram_id", &telegram_id.to_string());

        let body = self.body(telegram_id)?;
        let mut headers = vec![
            (TELEGRAM_ID_HEADER.to_string(), telegram_id.to_string()),
            (REQUEST_ID_HEADER.to_string(), request_id.to_string()),
        ];
        if let Some(body) = &body {
            headers.push((CONTENT_TYPE_HEADER.to_string(), body.content_type.clone()));
        }

        Ok(PreparedRequest {
            method: self.method(),
            url,
            headers,
            body,
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(value).map_err(ApiError::Encode)
}

/// What came back from the shell for one attempt, in a serializable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiOutcome {
    Response { status: u16, body: Vec<u8> },
    Transport { message: String },
    /// The shell gave up waiting. Handled like a core-side timeout.
    TimedOut,
}

impl ApiOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Response { status, .. } if *status >= 200 && *status < 300)
    }

    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            Self::Transport { .. } | Self::TimedOut => None,
        }
    }

    /// Success body, or the error the call maps to.
    pub fn into_body(self, call: &ApiCall) -> AppResult<Vec<u8>> {
        match self {
            Self::Response { status, body } if (200..300).contains(&status) => Ok(body),
            Self::Response { status, body } => Err(AppError::from_http_status(
                status,
                Some(&body),
                call.fallback_message(),
                call.is_lifecycle_mutation(),
            )
            .with_context("call", call.name())),
            Self::Transport { message } => Err(AppError::new(ErrorKind::Network, call.fallback_message())
                .with_internal(message)
                .with_context("call", call.name())),
            Self::TimedOut => Err(AppError::timeout().with_context("call", call.name())),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, call: &ApiCall) -> AppResult<T> {
        let body = self.into_body(call)?;
        serde_json::from_slice(&body).map_err(|source| {
            ApiError::Decode {
                call: call.name(),
                source,
            }
            .into()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Waiting,
    BackingOff,
}

#[derive(Debug, Clone)]
pub struct InFlight {
    pub call: ApiCall,
    pub attempt: u32,
    pub state: AttemptState,
    pub timer: Option<TimerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutStep {
    /// The attempt already settled or was superseded.
    Stale,
    /// Wait `delay_ms`, then send attempt `next_attempt`.
    Retry { next_attempt: u32, delay_ms: u64 },
    /// Every attempt timed out.
    Exhausted,
}

/// Tracks in-flight calls. Only the current attempt of a call may settle it.
#[derive(Debug, Default)]
pub struct RequestLedger {
    inflight: HashMap<RequestId, InFlight>,
}

impl RequestLedger {
    pub fn start(&mut self, call: ApiCall) -> RequestId {
        let id = RequestId::new();
        self.inflight.insert(
            id,
            InFlight {
                call,
                attempt: 1,
                state: AttemptState::Waiting,
                timer: None,
            },
        );
        id
    }

    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<&InFlight> {
        self.inflight.get(&id)
    }

    pub fn set_timer(&mut self, id: RequestId, timer: TimerId) -> Option<TimerId> {
        self.inflight
            .get_mut(&id)
            .and_then(|entry| entry.timer.replace(timer))
    }

    #[must_use]
    pub fn is_current(&self, id: RequestId, attempt: u32) -> bool {
        self.inflight
            .get(&id)
            .is_some_and(|e| e.attempt == attempt && e.state == AttemptState::Waiting)
    }

    /// Removes and returns the call if `attempt` is the one being awaited.
    pub fn settle(&mut self, id: RequestId, attempt: u32) -> Option<InFlight> {
        if self.is_current(id, attempt) {
            self.inflight.remove(&id)
        } else {
            None
        }
    }

    pub fn on_timeout(&mut self, id: RequestId, attempt: u32, config: &AppConfig) -> TimeoutStep {
        if !self.is_current(id, attempt) {
            return TimeoutStep::Stale;
        }
        if attempt > config.max_retries {
            return TimeoutStep::Exhausted;
        }
        if let Some(entry) = self.inflight.get_mut(&id) {
            entry.state = AttemptState::BackingOff;
            entry.timer = None;
        }
        TimeoutStep::Retry {
            next_attempt: attempt + 1,
            delay_ms: config.backoff_ms(attempt),
        }
    }

    /// Moves a backing-off call to its next attempt.
    pub fn next_attempt(&mut self, id: RequestId) -> Option<(ApiCall, u32)> {
        let entry = self.inflight.get_mut(&id)?;
        if entry.state != AttemptState::BackingOff {
            return None;
        }
        entry.attempt += 1;
        entry.state = AttemptState::Waiting;
        entry.timer = None;
        Some((entry.call.clone(), entry.attempt))
    }

    pub fn remove(&mut self, id: RequestId) -> Option<InFlight> {
        self.inflight.remove(&id)
    }

    /// Drops every call matching `pred`; their late responses become stale.
    pub fn abandon_where(&mut self, pred: impl Fn(&ApiCall) -> bool) -> Vec<InFlight> {
        let ids: Vec<RequestId> = self
            .inflight
            .iter()
            .filter(|(_, e)| pred(&e.call))
            .map(|(id, _)| *id)
            .collect();
        ids.iter().filter_map(|id| self.inflight.remove(id)).collect()
    }

    #[must_use]
    pub fn has_pending(&self, pred: impl Fn(&ApiCall) -> bool) -> bool {
        self.inflight.values().any(|e| pred(&e.call))
    }

    /// The id and current attempt of the first call matching `pred`.
    #[must_use]
    pub fn find(&self, pred: impl Fn(&ApiCall) -> bool) -> Option<(RequestId, u32)> {
        self.inflight
            .iter()
            .find(|(_, e)| pred(&e.call))
            .map(|(id, e)| (*id, e.attempt))
    }

    pub fn clear(&mut self) -> Vec<InFlight> {
        self.inflight.drain().map(|(_, e)| e).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}
