use serde::{Deserialize, Serialize};

use crate::api::{ApiOutcome, RequestId};
use crate::config::AppConfig;
use crate::lifecycle::Tab;
use crate::model::{BidId, OrderDraft, OrderId, PhotoFile, PhotoStage, RegistrationForm, TelegramId};
use crate::reputation::ReviewDraft;
use crate::schedule::TimerId;

// --- Photo upload payload ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PhotoUpload {
    pub order_id: OrderId,
    pub stage: PhotoStage,
    pub files: Vec<PhotoFile>,
}

// --- Event enum: large variants boxed ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    // App & session
    Started(Box<AppConfig>),
    ClockSynced {
        now_ms: u64,
    },
    VisibilityChanged {
        visible: bool,
    },
    SessionStarted {
        telegram_id: TelegramId,
    },
    Register(Box<RegistrationForm>),
    Logout,
    DismissError,

    // Listing
    SwitchTab {
        tab: Tab,
    },
    Refresh,

    // Orders & bids
    CreateOrder(Box<OrderDraft>),
    PlaceBid {
        order_id: OrderId,
        price: String,
    },
    ViewBids {
        order_id: OrderId,
    },
    CloseBids,
    SelectWinner {
        order_id: OrderId,
        bid_id: BidId,
    },
    CancelOrder {
        order_id: OrderId,
        reason: String,
    },

    // Completion
    SlideStarted {
        order_id: OrderId,
        track: f64,
    },
    SlideMoved {
        order_id: OrderId,
        distance: f64,
    },
    SlideReleased {
        order_id: OrderId,
    },
    UploadPhotos(Box<PhotoUpload>),
    ViewPhotos {
        order_id: OrderId,
    },
    ClosePhotos,

    // Chat
    OpenChat {
        order_id: OrderId,
    },
    CloseChat,
    SendMessage {
        text: String,
    },

    // Reputation
    OpenProfile {
        telegram_id: TelegramId,
    },
    CloseProfile,
    SubmitReview(Box<ReviewDraft>),

    // Capability responses
    ApiCompleted {
        request_id: RequestId,
        attempt: u32,
        outcome: ApiOutcome,
    },
    TimerFired {
        id: TimerId,
        now_ms: u64,
    },
    TimerCancelled {
        id: TimerId,
    },
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::ClockSynced { .. } => "clock_synced",
            Self::VisibilityChanged { .. } => "visibility_changed",
            Self::SessionStarted { .. } => "session_started",
            Self::Register(_) => "register",
            Self::Logout => "logout",
            Self::DismissError => "dismiss_error",
            Self::SwitchTab { .. } => "switch_tab",
            Self::Refresh => "refresh",
            Self::CreateOrder(_) => "create_order",
            Self::PlaceBid { .. } => "place_bid",
            Self::ViewBids { .. } => "view_bids",
            Self::CloseBids => "close_bids",
            Self::SelectWinner { .. } => "select_winner",
            Self::CancelOrder { .. } => "cancel_order",
            Self::SlideStarted { .. } => "slide_started",
            Self::SlideMoved { .. } => "slide_moved",
            Self::SlideReleased { .. } => "slide_released",
            Self::UploadPhotos(_) => "upload_photos",
            Self::ViewPhotos { .. } => "view_photos",
            Self::ClosePhotos => "close_photos",
            Self::OpenChat { .. } => "open_chat",
            Self::CloseChat => "close_chat",
            Self::SendMessage { .. } => "send_message",
            Self::OpenProfile { .. } => "open_profile",
            Self::CloseProfile => "close_profile",
            Self::SubmitReview(_) => "submit_review",
            Self::ApiCompleted { .. } => "api_completed",
            Self::TimerFired { .. } => "timer_fired",
            Self::TimerCancelled { .. } => "timer_cancelled",
        }
    }

    /// Events that originate from a user gesture rather than the shell.
    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        !matches!(
            self,
            Self::Started(_)
                | Self::ClockSynced { .. }
                | Self::VisibilityChanged { .. }
                | Self::SessionStarted { .. }
                | Self::SlideMoved { .. }
                | Self::ApiCompleted { .. }
                | Self::TimerFired { .. }
                | Self::TimerCancelled { .. }
        )
    }
}
