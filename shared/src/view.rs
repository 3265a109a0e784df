use serde::{Deserialize, Serialize};

use crate::app::{ListingState, Model, Screen};
use crate::auction::AwardState;
use crate::confirmation::{can_slide, EvidenceStep, SlideConfirm, SlideState};
use crate::error::{AppError, ErrorSeverity};
use crate::lifecycle::{available_actions, tabs_for, Action, DetailedStatus, Tab};
use crate::model::{ChatMessage, Order, OrderId, PhotoRef, Role, TelegramId, TruckCatalog, UnreadSummary};

pub const NOT_SPECIFIED: &str = "Not specified";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TabView {
    pub tab: Tab,
    pub title: String,
    pub count: usize,
    pub active: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SlideView {
    pub progress: f64,
    pub locked: bool,
    pub confirmed: bool,
    pub syncing: bool,
}

impl From<&SlideConfirm> for SlideView {
    fn from(slide: &SlideConfirm) -> Self {
        let (confirmed, syncing) = match slide.state() {
            SlideState::Confirmed { acknowledged } => (true, !acknowledged),
            SlideState::Pending | SlideState::Dragging { .. } => (false, false),
        };
        Self {
            progress: slide.progress(),
            locked: slide.is_locked(),
            confirmed,
            syncing,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OrderCard {
    pub id: OrderId,
    pub route: String,
    pub cargo: String,
    pub truck: String,
    pub max_price: String,
    pub delivery_date: String,
    pub status: String,
    pub bids_count: u32,
    pub min_bid: Option<String>,
    pub my_bid: Option<String>,
    pub winning_price: Option<String>,
    pub actions: Vec<Action>,
    pub slide: Option<SlideView>,
    pub evidence_step: Option<EvidenceStep>,
    pub unread: u32,
    pub counterpart_name: Option<String>,
    pub counterpart_telegram_id: Option<TelegramId>,
    pub cancellation_reason: Option<String>,
    pub awarding: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListingStatus {
    Idle,
    Loading,
    Fresh,
    /// Shown from a snapshot that no longer satisfies the cache.
    Stale,
    Failed { message: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BidRow {
    pub id: crate::model::BidId,
    pub rank: usize,
    pub driver: String,
    pub phone_number: Option<String>,
    pub price: String,
    pub is_min: bool,
    pub placed_at: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BidsView {
    pub order_id: OrderId,
    pub loading: bool,
    pub failed: bool,
    pub rows: Vec<BidRow>,
    pub can_select: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PhotosView {
    pub order_id: OrderId,
    pub loading: bool,
    pub loading_photos: Vec<PhotoRef>,
    pub unloading_photos: Vec<PhotoRef>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatView {
    pub order_id: OrderId,
    pub writable: bool,
    pub loading: bool,
    pub sending: bool,
    pub messages: Vec<ChatMessage>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReviewView {
    pub rating: u8,
    pub comment: Option<String>,
    pub author: String,
    pub created_at: Option<String>,
    pub badges: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProfileView {
    pub telegram_id: Option<TelegramId>,
    pub loading: bool,
    pub rating: String,
    pub rating_count: u32,
    pub total_orders: u32,
    pub completed_orders: u32,
    pub reviews: Vec<ReviewView>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserFacingError {
    pub message: String,
    pub is_transient: bool,
    pub is_retryable: bool,
    pub error_code: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            is_transient: e.severity == ErrorSeverity::Transient,
            is_retryable: e.is_retryable(),
            error_code: e.code().to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewState {
    Loading {
        message: Option<String>,
    },
    Registration,
    SignedOut,
    Ready {
        role: Role,
        user_name: String,
        tabs: Vec<TabView>,
        active_tab: Option<Tab>,
        orders: Vec<OrderCard>,
        empty_message: Option<String>,
        listing: ListingStatus,
        total_unread: u32,
    },
    Error {
        title: String,
        message: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub state: ViewState,
    pub bids: Option<BidsView>,
    pub photos: Option<PhotosView>,
    pub chat: Option<ChatView>,
    pub profile: Option<ProfileView>,
    pub error: Option<UserFacingError>,
}

/// Formats a ruble amount in groups of three: `150000` -> `150 000 ₽`.
#[must_use]
pub fn format_price(amount: Option<u64>) -> String {
    let Some(amount) = amount else {
        return NOT_SPECIFIED.to_string();
    };
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 4);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }
    grouped.push_str(" ₽");
    grouped
}

fn or_not_specified(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        NOT_SPECIFIED.to_string()
    } else {
        value.to_string()
    }
}

fn order_card(model: &Model, order: &Order, role: Role, trucks: &TruckCatalog, unread: &UnreadSummary) -> OrderCard {
    let slide = if can_slide(order, role) || model.slides.contains_key(&order.id) {
        let slide = model
            .slides
            .get(&order.id)
            .copied()
            .unwrap_or_else(|| {
                if order.confirmed_by(role) {
                    SlideConfirm::confirmed()
                } else {
                    SlideConfirm::default()
                }
            });
        Some(SlideView::from(&slide))
    } else {
        None
    };

    let status = DetailedStatus::of(order);
    OrderCard {
        id: order.id,
        route: format!(
            "{} → {}",
            or_not_specified(&order.pickup_address),
            or_not_specified(&order.delivery_address)
        ),
        cargo: or_not_specified(&order.cargo_description),
        truck: trucks.name_of(order.truck_type.as_deref()).to_string(),
        max_price: format_price(order.max_price),
        delivery_date: order
            .delivery_date
            .as_deref()
            .map_or_else(|| NOT_SPECIFIED.to_string(), or_not_specified),
        status: status.label().to_string(),
        bids_count: order.bids_count,
        min_bid: order.min_bid_price.map(|p| format_price(Some(p))),
        my_bid: order.my_bid_price.map(|p| format_price(Some(p))),
        winning_price: order.winning_price.map(|p| format_price(Some(p))),
        actions: available_actions(order, role),
        slide,
        evidence_step: match role {
            Role::Driver => EvidenceStep::of(order),
            Role::Customer => None,
        },
        unread: unread.for_order(order.id),
        counterpart_name: order.counterpart_name(role).map(str::to_string),
        counterpart_telegram_id: order.counterpart_telegram_id(role),
        cancellation_reason: order.cancellation_reason.clone(),
        awarding: matches!(model.awards.state(order.id), Some(AwardState::InFlight { .. })),
    }
}

fn build_ready(model: &Model, role: Role) -> ViewState {
    let listing = model.listing();
    let active_tab = model.active_tab;
    let tabs = tabs_for(role)
        .iter()
        .map(|&tab| TabView {
            tab,
            title: tab.title().to_string(),
            count: listing.map_or(0, |l| l.count(tab)),
            active: active_tab == Some(tab),
        })
        .collect();

    let orders: Vec<OrderCard> = match (listing, active_tab) {
        (Some(listing), Some(tab)) => listing
            .orders(tab)
            .iter()
            .map(|o| order_card(model, o, role, &model.trucks, &model.unread))
            .collect(),
        _ => Vec::new(),
    };

    let listing_status = match (&model.listing_state, model.session()) {
        (ListingState::Loading, _) => ListingStatus::Loading,
        (ListingState::Failed { message }, _) => ListingStatus::Failed {
            message: message.clone(),
        },
        (_, Some(session)) if model.cache.lookup(&session, model.now()).is_ok() => ListingStatus::Fresh,
        (_, Some(session)) if model.cache.displayable(&session).is_some() => ListingStatus::Stale,
        _ => ListingStatus::Idle,
    };

    let empty_message = match (orders.is_empty(), active_tab) {
        (true, Some(tab)) if listing.is_some() => Some(tab.empty_message().to_string()),
        _ => None,
    };

    ViewState::Ready {
        role,
        user_name: model
            .user
            .as_ref()
            .map_or_else(String::new, |u| u.display_name().to_string()),
        tabs,
        active_tab,
        orders,
        empty_message,
        listing: listing_status,
        total_unread: model.unread.total_unread,
    }
}

fn build_bids(model: &Model) -> Option<BidsView> {
    let panel = model.bids_panel.as_ref()?;
    let selectable = model.find_order(panel.order_id).is_some_and(|o| {
        available_actions(o, Role::Customer).contains(&Action::SelectWinner)
    }) && model.awards.state(panel.order_id).is_none();

    let rows = panel.book.as_ref().map_or_else(Vec::new, |book| {
        let min = book.min_price();
        book.bids()
            .iter()
            .enumerate()
            .map(|(i, bid)| BidRow {
                id: bid.id,
                rank: i + 1,
                driver: bid.name.clone().unwrap_or_else(|| "Driver".to_string()),
                phone_number: bid.phone_number.clone(),
                price: format_price(bid.price),
                is_min: bid.price.is_some() && bid.price == min,
                placed_at: bid.created_at.clone(),
            })
            .collect()
    });

    Some(BidsView {
        order_id: panel.order_id,
        loading: panel.book.is_none(),
        failed: panel.failed,
        rows,
        can_select: selectable,
    })
}

/// Builds the shell-facing projection of the model.
#[must_use]
pub fn build(model: &Model) -> ViewModel {
    let state = match &model.screen {
        Screen::Starting => ViewState::Loading { message: None },
        Screen::Loading => ViewState::Loading {
            message: Some("Loading profile".into()),
        },
        Screen::Registration => ViewState::Registration,
        Screen::SignedOut => ViewState::SignedOut,
        Screen::Failed { message } => ViewState::Error {
            title: "Error".into(),
            message: message.clone(),
        },
        Screen::Main => match model.role() {
            Some(role) => build_ready(model, role),
            None => ViewState::Loading { message: None },
        },
    };

    ViewModel {
        state,
        bids: build_bids(model),
        photos: model.photos_panel.as_ref().map(|p| {
            let photos = p.photos.clone().unwrap_or_default();
            PhotosView {
                order_id: p.order_id,
                loading: p.photos.is_none(),
                loading_photos: photos.loading,
                unloading_photos: photos.unloading,
            }
        }),
        chat: model.chat.as_ref().map(|c| ChatView {
            order_id: c.order_id,
            writable: c.writable,
            loading: !c.loaded,
            sending: c.sending,
            messages: c.messages.clone(),
        }),
        profile: model.profile.as_ref().map(|p| ProfileView {
            telegram_id: p.telegram_id,
            loading: p.is_loading(),
            rating: format!("{:.1}", p.rating.average),
            rating_count: p.rating.count,
            total_orders: p.stats.total_orders,
            completed_orders: p.stats.completed_orders,
            reviews: p
                .reviews
                .iter()
                .map(|r| ReviewView {
                    rating: r.rating,
                    comment: r.comment.clone(),
                    author: r.reviewer_name.clone().unwrap_or_else(|| "User".into()),
                    created_at: r.created_at.clone(),
                    badges: r.badges.clone(),
                })
                .collect(),
        }),
        error: model.last_error.as_ref().map(UserFacingError::from),
    }
}
