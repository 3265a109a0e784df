#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod api;
pub mod app;
pub mod auction;
pub mod cache;
pub mod capabilities;
pub mod chat;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod model;
pub mod reputation;
pub mod schedule;
pub mod view;

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

pub use app::{App, Model};
pub use capabilities::{Capabilities, Effect};
pub use crux_core::{render::Render, App as CruxApp};
pub use error::{AppError, AppResult, ErrorKind, ErrorSeverity, ValidationError};
pub use event::Event;
pub use view::ViewModel;

pub const CACHE_TTL_MS: u64 = 30_000;
pub const REFRESH_INTERVAL_MS: u64 = 30_000;
pub const REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const LISTING_TIMEOUT_MS: u64 = 30_000;
pub const MAX_RETRIES: u32 = 2;
pub const RETRY_STEP_MS: u64 = 1_000;
pub const CHAT_POLL_MS: u64 = 5_000;
pub const MAX_PHOTOS_PER_UPLOAD: usize = 5;
pub const MAX_MESSAGE_CHARS: usize = 2_000;

#[must_use]
pub fn get_current_time_ms() -> u64 {
    #[cfg(not(target_arch = "wasm32"))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
    #[cfg(target_arch = "wasm32")]
    {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn system() -> Self {
        Self(get_current_time_ms())
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn elapsed_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    #[must_use]
    pub const fn add_millis(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    /// Second-precision UTC timestamp, the format the backend stores.
    #[must_use]
    pub fn to_rfc3339(self) -> String {
        i64::try_from(self.0)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default()
    }
}

/// Time source for the core. The shell pushes its clock with every timer
/// firing; before the first sync the system clock is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Clock {
    host: Option<UnixTimeMs>,
}

impl Clock {
    #[must_use]
    pub fn now(&self) -> UnixTimeMs {
        self.host.unwrap_or_else(UnixTimeMs::system)
    }

    /// Never moves backwards.
    pub fn sync(&mut self, now: UnixTimeMs) {
        self.host = Some(self.host.map_or(now, |h| h.max(now)));
    }

    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.host.is_some()
    }
}
