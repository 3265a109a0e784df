use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

/// Failure classes surfaced by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// All retries timed out.
    Timeout,
    /// Transport failure other than a timeout. Never retried.
    Network,
    /// Rejected locally before any request was made.
    Validation,
    /// 4xx/5xx with or without a structured message.
    ServerRejection,
    /// The order moved on underneath the caller. Re-sync, never retry blindly.
    Conflict,
    NotFound,
    Deserialization,
    InvalidState,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::Network => "NETWORK_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::ServerRejection => "SERVER_REJECTION",
            Self::Conflict => "STATE_CONFLICT",
            Self::NotFound => "NOT_FOUND",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::InvalidState => "INVALID_STATE",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Timeout | Self::Network | Self::Conflict => ErrorSeverity::Transient,
            Self::Deserialization | Self::InvalidState => ErrorSeverity::Fatal,
            Self::Validation | Self::ServerRejection | Self::NotFound => ErrorSeverity::Permanent,
        }
    }

    /// Whether the request layer may send the same call again.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Whether the listing must be re-fetched after this error.
    #[must_use]
    pub const fn requires_resync(self) -> bool {
        matches!(self, Self::Conflict | Self::ServerRejection)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: BTreeMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn timeout() -> Self {
        Self::new(
            ErrorKind::Timeout,
            "Connection timed out. Check your internet connection.",
        )
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    /// Text shown through the alert surface.
    ///
    /// Validation, rejection and conflict messages come from the caller or the
    /// backend and are shown verbatim.
    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Timeout => {
                "Connection timed out. Check your internet connection and try again.".into()
            }
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Validation | ErrorKind::ServerRejection | ErrorKind::Conflict => {
                self.message.clone()
            }
            ErrorKind::NotFound => "The requested item could not be found.".into(),
            ErrorKind::Deserialization => {
                "The server sent data the app could not read. Please try again later.".into()
            }
            ErrorKind::InvalidState => "This action is not available right now.".into(),
        }
    }

    /// Builds an error from a non-success HTTP response.
    ///
    /// The backend reports failures as `{"error": ...}` and sometimes adds a
    /// human readable `message`; the most specific one wins. `fallback` is used
    /// when the body carries neither.
    #[must_use]
    pub fn from_http_status(
        status: u16,
        body: Option<&[u8]>,
        fallback: &str,
        lifecycle_mutation: bool,
    ) -> Self {
        let kind = match status {
            404 => ErrorKind::NotFound,
            400 | 409 if lifecycle_mutation => ErrorKind::Conflict,
            409 => ErrorKind::Conflict,
            408 | 504 => ErrorKind::Timeout,
            _ => ErrorKind::ServerRejection,
        };

        let message = body
            .and_then(|b| serde_json::from_slice::<ApiErrorResponse>(b).ok())
            .and_then(ApiErrorResponse::into_message)
            .unwrap_or_else(|| fallback.to_string());

        Self::new(kind, message).with_context("http_status", status.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

impl ApiErrorResponse {
    fn into_message(self) -> Option<String> {
        [self.message, self.error, self.detail]
            .into_iter()
            .flatten()
            .find(|m| !m.trim().is_empty())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Input rejected before it reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Price must be a whole number greater than zero")]
    InvalidPrice,
    #[error("{field} is required")]
    Required { field: &'static str },
    #[error("{field} is too long ({len} > {max})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("Rating must be between 1 and 5")]
    InvalidRating,
    #[error("Unknown badge: {0}")]
    UnknownBadge(String),
    #[error("Select between 1 and {max} photos")]
    PhotoCount { max: usize },
    #[error("Unsupported photo type: {0}")]
    PhotoType(String),
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}
