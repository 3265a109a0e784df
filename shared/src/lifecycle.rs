//! Order lifecycle: raw backend status plus flags mapped to phases, stages,
//! labels, tab membership and per-role actions.
//!
//! Everything here is pure. The app feeds it orders from the listing and
//! uses [`apply`] to validate a mutation locally before sending it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::error::{AppError, ErrorKind};
use crate::model::{Bid, Order, Role, UserId};
use crate::UnixTimeMs;

/// Raw status strings as stored by the backend, including legacy values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Searching,
    Open,
    Active,
    AuctionCompleted,
    NoOffers,
    InProgress,
    Completed,
    Cancelled,
    Closed,
    #[default]
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Searching => "searching",
            Self::Open => "open",
            Self::Active => "active",
            Self::AuctionCompleted => "auction_completed",
            Self::NoOffers => "no_offers",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Closed => "closed",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub const fn phase(self) -> Phase {
        match self {
            Self::Created | Self::Searching | Self::Open | Self::Active => Phase::Bidding,
            Self::AuctionCompleted => Phase::AuctionCompleted,
            Self::NoOffers => Phase::NoOffers,
            Self::InProgress => Phase::InProgress,
            Self::Completed | Self::Cancelled | Self::Closed => Phase::Closed,
            Self::Unknown => Phase::Unknown,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Bidding,
    AuctionCompleted,
    NoOffers,
    InProgress,
    Closed,
    Unknown,
}

impl Phase {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::NoOffers)
    }

    #[must_use]
    pub const fn accepts_award(self) -> bool {
        matches!(self, Self::Bidding | Self::AuctionCompleted)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where an in-progress order stands. Derived from server timestamps and
/// flags only, never from local UI state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InProgressStage {
    AwaitingLoading,
    AwaitingUnloading,
    AwaitingDriverCompletion,
    /// Driver finished; the customer has not confirmed yet.
    AwaitingCustomer,
    /// Customer confirmed early; the driver has not slid yet.
    AwaitingDriver,
    BothConfirmed,
}

impl InProgressStage {
    #[must_use]
    pub fn of(order: &Order) -> Self {
        if order.both_confirmed() {
            return Self::BothConfirmed;
        }
        if order.loading_confirmed_at.is_none() {
            return Self::AwaitingLoading;
        }
        if order.unloading_confirmed_at.is_none() {
            return Self::AwaitingUnloading;
        }
        let driver_done = order.driver_confirmed || order.driver_completed_at.is_some();
        match (driver_done, order.customer_confirmed) {
            (false, false) => Self::AwaitingDriverCompletion,
            (false, true) => Self::AwaitingDriver,
            (true, _) => Self::AwaitingCustomer,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AwaitingLoading => "Awaiting loading",
            Self::AwaitingUnloading => "In transit",
            Self::AwaitingDriverCompletion => "Unloaded",
            Self::AwaitingCustomer => "Awaiting customer confirmation",
            Self::AwaitingDriver => "Awaiting driver confirmation",
            Self::BothConfirmed => "Confirmed by both parties",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetailedStatus {
    Searching,
    AuctionCompleted,
    InProgress(InProgressStage),
    Completed,
    CancelledByCustomer,
    CancelledByDriver,
    Cancelled,
    NoOffers,
    Closed,
    Unknown,
}

impl DetailedStatus {
    /// Priority for finished records: dual confirmation, then cancellation,
    /// then no offers, then the generic label.
    #[must_use]
    pub fn of(order: &Order) -> Self {
        match order.status.phase() {
            Phase::Bidding => Self::Searching,
            Phase::AuctionCompleted => Self::AuctionCompleted,
            Phase::InProgress => Self::InProgress(InProgressStage::of(order)),
            Phase::Closed | Phase::NoOffers => Self::of_finished(order),
            Phase::Unknown => Self::Unknown,
        }
    }

    fn of_finished(order: &Order) -> Self {
        if order.both_confirmed() {
            return Self::Completed;
        }
        if let Some(by) = order.cancelled_by {
            return if Some(by) == order.customer_id {
                Self::CancelledByCustomer
            } else if Some(by) == order.winner_driver_id {
                Self::CancelledByDriver
            } else {
                Self::Cancelled
            };
        }
        if order.status == OrderStatus::Cancelled {
            return Self::Cancelled;
        }
        if !order.has_winner() && order.bids_count == 0 {
            return Self::NoOffers;
        }
        if order.status == OrderStatus::Completed {
            return Self::Completed;
        }
        Self::Closed
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Searching => "Searching",
            Self::AuctionCompleted => "Bidding closed",
            Self::InProgress(stage) => stage.label(),
            Self::Completed => "Completed",
            Self::CancelledByCustomer => "Cancelled (by customer)",
            Self::CancelledByDriver => "Cancelled (by driver)",
            Self::Cancelled => "Cancelled",
            Self::NoOffers => "Closed (no offers)",
            Self::Closed => "Closed",
            Self::Unknown => "Status unavailable",
        }
    }

    #[must_use]
    pub const fn is_completed(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for DetailedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    Searching,
    Open,
    MyBids,
    InProgress,
    Closed,
}

impl Tab {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Searching => "searching",
            Self::Open => "open",
            Self::MyBids => "my_bids",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "searching" => Some(Self::Searching),
            "open" => Some(Self::Open),
            "my_bids" => Some(Self::MyBids),
            "in_progress" => Some(Self::InProgress),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Searching => "Searching",
            Self::Open => "Open",
            Self::MyBids => "My bids",
            Self::InProgress => "In progress",
            Self::Closed => "Closed",
        }
    }

    #[must_use]
    pub const fn empty_message(self) -> &'static str {
        match self {
            Self::Searching => "You have no orders looking for a driver",
            Self::Open => "New orders will appear here",
            Self::MyBids => "You have not placed any bids yet",
            Self::InProgress => "Nothing in progress",
            Self::Closed => "No closed orders",
        }
    }
}

const CUSTOMER_TABS: &[Tab] = &[Tab::Searching, Tab::InProgress, Tab::Closed];
const DRIVER_TABS: &[Tab] = &[Tab::Open, Tab::MyBids, Tab::InProgress, Tab::Closed];

#[must_use]
pub const fn tabs_for(role: Role) -> &'static [Tab] {
    match role {
        Role::Customer => CUSTOMER_TABS,
        Role::Driver => DRIVER_TABS,
    }
}

/// The tab an order belongs to for the given viewer.
#[must_use]
pub fn tab_for(order: &Order, role: Role) -> Tab {
    match (role, order.status.phase()) {
        (Role::Customer, Phase::Bidding) => Tab::Searching,
        (Role::Customer, Phase::AuctionCompleted | Phase::InProgress) => Tab::InProgress,
        (Role::Driver, Phase::Bidding) if order.my_bid_price.is_some() => Tab::MyBids,
        (Role::Driver, Phase::Bidding) => Tab::Open,
        (Role::Driver, Phase::AuctionCompleted) => Tab::MyBids,
        (Role::Driver, Phase::InProgress) => Tab::InProgress,
        (_, Phase::NoOffers | Phase::Closed | Phase::Unknown) => Tab::Closed,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    ViewBids,
    SelectWinner,
    PlaceBid,
    Cancel,
    ConfirmCompletion,
    UploadLoadingPhotos,
    UploadUnloadingPhotos,
    ViewPhotos,
    OpenChat,
    Review,
}

#[must_use]
pub fn available_actions(order: &Order, role: Role) -> Vec<Action> {
    let phase = order.status.phase();
    let mut actions = Vec::new();

    match (role, phase) {
        (Role::Customer, Phase::Bidding | Phase::AuctionCompleted) => {
            actions.push(Action::ViewBids);
            if order.bids_count > 0 && !order.has_winner() {
                actions.push(Action::SelectWinner);
            }
            actions.push(Action::Cancel);
        }
        (Role::Driver, Phase::Bidding) => {
            if order.my_bid_price.is_none() {
                actions.push(Action::PlaceBid);
            }
        }
        (Role::Customer, Phase::InProgress) => {
            if !order.customer_confirmed {
                actions.push(Action::ConfirmCompletion);
            }
            actions.extend([Action::ViewPhotos, Action::OpenChat, Action::Cancel]);
        }
        (Role::Driver, Phase::InProgress) => {
            match InProgressStage::of(order) {
                InProgressStage::AwaitingLoading => actions.push(Action::UploadLoadingPhotos),
                InProgressStage::AwaitingUnloading => actions.push(Action::UploadUnloadingPhotos),
                InProgressStage::AwaitingDriverCompletion | InProgressStage::AwaitingDriver => {
                    actions.push(Action::ConfirmCompletion)
                }
                InProgressStage::AwaitingCustomer | InProgressStage::BothConfirmed => {}
            }
            actions.extend([Action::ViewPhotos, Action::OpenChat, Action::Cancel]);
        }
        (_, Phase::Closed) => {
            if order.has_winner() {
                actions.extend([Action::ViewPhotos, Action::OpenChat]);
            }
            if DetailedStatus::of(order).is_completed() && !order.reviewed_by(role) {
                actions.push(Action::Review);
            }
        }
        (Role::Driver, Phase::AuctionCompleted) | (_, Phase::NoOffers | Phase::Unknown) => {}
    }

    actions
}

/// Chat is writable while the order is being executed and readable afterwards.
#[must_use]
pub fn chat_access(order: &Order) -> Option<bool> {
    match order.status.phase() {
        Phase::InProgress => Some(true),
        Phase::Closed if order.has_winner() => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub enum Transition<'a> {
    CloseBidding,
    SelectWinner { bid: &'a Bid },
    Confirm { role: Role },
    Cancel { by: UserId, reason: &'a str },
    RecordLoading,
    RecordUnloading,
    RecordDriverCompletion,
}

impl Transition<'_> {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CloseBidding => "close_bidding",
            Self::SelectWinner { .. } => "select_winner",
            Self::Confirm { .. } => "confirm",
            Self::Cancel { .. } => "cancel",
            Self::RecordLoading => "record_loading",
            Self::RecordUnloading => "record_unloading",
            Self::RecordDriverCompletion => "record_driver_completion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("A driver has already been selected for this order")]
    AlreadyAwarded { winner: Option<UserId> },
    #[error("Cannot {action} while the order is {phase}")]
    WrongPhase { action: &'static str, phase: Phase },
    #[error("The {role} has already confirmed completion")]
    AlreadyConfirmed { role: Role },
    #[error("A cancellation reason is required")]
    ReasonRequired,
    #[error("{stage} must be recorded first")]
    OutOfOrder { stage: &'static str },
    #[error("The bid does not belong to this order")]
    BidMismatch,
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        let kind = match e {
            TransitionError::ReasonRequired | TransitionError::BidMismatch => ErrorKind::Validation,
            TransitionError::AlreadyAwarded { .. }
            | TransitionError::WrongPhase { .. }
            | TransitionError::AlreadyConfirmed { .. }
            | TransitionError::OutOfOrder { .. } => ErrorKind::Conflict,
        };
        AppError::new(kind, e.to_string())
    }
}

/// Whether a winner may still be selected for `order`.
pub fn award_open(order: &Order) -> Result<(), TransitionError> {
    if order.has_winner() {
        return Err(TransitionError::AlreadyAwarded {
            winner: order.winner_driver_id,
        });
    }
    let phase = order.status.phase();
    if !phase.accepts_award() {
        return Err(TransitionError::WrongPhase {
            action: "select a driver",
            phase,
        });
    }
    Ok(())
}

/// Applies a transition to a copy of `order`.
///
/// On error the input is untouched; in particular a rejected second award
/// leaves the original winner in place.
pub fn apply(order: &Order, transition: Transition<'_>, now: UnixTimeMs) -> Result<Order, TransitionError> {
    let phase = order.status.phase();
    let mut next = order.clone();
    let stamp = || Some(now.to_rfc3339());

    match transition {
        Transition::CloseBidding => {
            if phase != Phase::Bidding {
                return Err(TransitionError::WrongPhase {
                    action: "close bidding",
                    phase,
                });
            }
            next.status = if order.bids_count > 0 {
                OrderStatus::AuctionCompleted
            } else {
                OrderStatus::NoOffers
            };
        }
        Transition::SelectWinner { bid } => {
            award_open(order)?;
            if bid.order_id.is_some_and(|id| id != order.id) {
                return Err(TransitionError::BidMismatch);
            }
            next.winner_driver_id = bid.driver_id;
            next.winning_price = bid.price;
            next.status = OrderStatus::InProgress;
        }
        Transition::Confirm { role } => {
            if phase != Phase::InProgress {
                return Err(TransitionError::WrongPhase {
                    action: "confirm completion",
                    phase,
                });
            }
            if order.confirmed_by(role) {
                return Err(TransitionError::AlreadyConfirmed { role });
            }
            match role {
                Role::Customer => next.customer_confirmed = true,
                Role::Driver => {
                    if order.unloading_confirmed_at.is_none() {
                        return Err(TransitionError::OutOfOrder {
                            stage: "Unloading",
                        });
                    }
                    next.driver_confirmed = true;
                    if next.driver_completed_at.is_none() {
                        next.driver_completed_at = stamp();
                    }
                }
            }
            if next.both_confirmed() {
                next.status = OrderStatus::Closed;
            }
        }
        Transition::Cancel { by, reason } => {
            if phase.is_terminal() {
                return Err(TransitionError::WrongPhase {
                    action: "cancel",
                    phase,
                });
            }
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(TransitionError::ReasonRequired);
            }
            next.status = OrderStatus::Closed;
            next.cancelled_by = Some(by);
            next.cancellation_reason = Some(reason.to_string());
            next.customer_confirmed = false;
            next.driver_confirmed = false;
        }
        Transition::RecordLoading => {
            require_in_progress(phase, "record loading")?;
            if next.loading_confirmed_at.is_none() {
                next.loading_confirmed_at = stamp();
            }
        }
        Transition::RecordUnloading => {
            require_in_progress(phase, "record unloading")?;
            if order.loading_confirmed_at.is_none() {
                return Err(TransitionError::OutOfOrder { stage: "Loading" });
            }
            if next.unloading_confirmed_at.is_none() {
                next.unloading_confirmed_at = stamp();
            }
        }
        Transition::RecordDriverCompletion => {
            require_in_progress(phase, "record completion")?;
            if order.unloading_confirmed_at.is_none() {
                return Err(TransitionError::OutOfOrder {
                    stage: "Unloading",
                });
            }
            if next.driver_completed_at.is_none() {
                next.driver_completed_at = stamp();
            }
        }
    }

    Ok(next)
}

fn require_in_progress(phase: Phase, action: &'static str) -> Result<(), TransitionError> {
    if phase == Phase::InProgress {
        Ok(())
    } else {
        Err(TransitionError::WrongPhase { action, phase })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BidId, OrderId};
    use proptest::prelude::*;

    const CUSTOMER: UserId = UserId(1);
    const DRIVER: UserId = UserId(2);

    fn now() -> UnixTimeMs {
        UnixTimeMs(1_700_000_000_000)
    }

    fn order(status: OrderStatus) -> Order {
        Order {
            id: OrderId(10),
            customer_id: Some(CUSTOMER),
            status,
            ..Order::default()
        }
    }

    fn bid(driver: i64, price: u64) -> Bid {
        Bid {
            id: BidId(driver * 100),
            order_id: Some(OrderId(10)),
            driver_id: Some(UserId(driver)),
            price: Some(price),
            created_at: None,
            name: None,
            phone_number: None,
        }
    }

    fn in_progress() -> Order {
        Order {
            winner_driver_id: Some(DRIVER),
            ..order(OrderStatus::InProgress)
        }
    }

    mod status_tests {
        use super::*;

        #[test]
        fn test_legacy_statuses_map_to_phases() {
            assert_eq!(OrderStatus::Active.phase(), Phase::Bidding);
            assert_eq!(OrderStatus::Completed.phase(), Phase::Closed);
            assert_eq!(OrderStatus::Cancelled.phase(), Phase::Closed);
            assert_eq!(OrderStatus::NoOffers.phase(), Phase::NoOffers);
        }

        #[test]
        fn test_completed_beats_cancellation() {
            let o = Order {
                customer_confirmed: true,
                driver_confirmed: true,
                cancelled_by: Some(CUSTOMER),
                ..order(OrderStatus::Closed)
            };
            assert_eq!(DetailedStatus::of(&o), DetailedStatus::Completed);
        }

        #[test]
        fn test_cancellation_attribution() {
            let by_customer = Order {
                cancelled_by: Some(CUSTOMER),
                ..order(OrderStatus::Closed)
            };
            assert_eq!(DetailedStatus::of(&by_customer), DetailedStatus::CancelledByCustomer);

            let by_driver = Order {
                winner_driver_id: Some(DRIVER),
                cancelled_by: Some(DRIVER),
                ..order(OrderStatus::Closed)
            };
            assert_eq!(DetailedStatus::of(&by_driver), DetailedStatus::CancelledByDriver);

            let unknown = Order {
                customer_id: None,
                cancelled_by: Some(UserId(99)),
                ..order(OrderStatus::Closed)
            };
            assert_eq!(DetailedStatus::of(&unknown), DetailedStatus::Cancelled);
        }

        #[test]
        fn test_no_offers_requires_zero_bids_and_no_winner() {
            assert_eq!(DetailedStatus::of(&order(OrderStatus::NoOffers)), DetailedStatus::NoOffers);
            assert_eq!(DetailedStatus::of(&order(OrderStatus::Closed)), DetailedStatus::NoOffers);

            let with_bids = Order {
                bids_count: 2,
                ..order(OrderStatus::Closed)
            };
            assert_eq!(DetailedStatus::of(&with_bids), DetailedStatus::Closed);
        }

        #[test]
        fn test_contradictory_record_gets_generic_label() {
            let o = Order {
                winner_driver_id: Some(DRIVER),
                customer_confirmed: true,
                ..order(OrderStatus::Closed)
            };
            assert_eq!(DetailedStatus::of(&o).label(), "Closed");
        }

        #[test]
        fn test_unknown_status_label() {
            assert_eq!(DetailedStatus::of(&order(OrderStatus::Unknown)).label(), "Status unavailable");
        }

        #[test]
        fn test_stage_progression() {
            let mut o = in_progress();
            assert_eq!(InProgressStage::of(&o), InProgressStage::AwaitingLoading);
            o.loading_confirmed_at = Some("t1".into());
            assert_eq!(InProgressStage::of(&o), InProgressStage::AwaitingUnloading);
            o.unloading_confirmed_at = Some("t2".into());
            assert_eq!(InProgressStage::of(&o), InProgressStage::AwaitingDriverCompletion);
            o.driver_confirmed = true;
            assert_eq!(InProgressStage::of(&o), InProgressStage::AwaitingCustomer);
            o.customer_confirmed = true;
            assert_eq!(InProgressStage::of(&o), InProgressStage::BothConfirmed);
        }
    }

    mod tab_tests {
        use super::*;

        #[test]
        fn test_role_tabs() {
            assert_eq!(tabs_for(Role::Customer), &[Tab::Searching, Tab::InProgress, Tab::Closed]);
            assert_eq!(
                tabs_for(Role::Driver),
                &[Tab::Open, Tab::MyBids, Tab::InProgress, Tab::Closed]
            );
        }

        #[test]
        fn test_customer_tab_placement() {
            assert_eq!(tab_for(&order(OrderStatus::Active), Role::Customer), Tab::Searching);
            assert_eq!(tab_for(&order(OrderStatus::AuctionCompleted), Role::Customer), Tab::InProgress);
            assert_eq!(tab_for(&in_progress(), Role::Customer), Tab::InProgress);
            assert_eq!(tab_for(&order(OrderStatus::NoOffers), Role::Customer), Tab::Closed);
        }

        #[test]
        fn test_driver_tab_placement() {
            let open = order(OrderStatus::Searching);
            assert_eq!(tab_for(&open, Role::Driver), Tab::Open);
            let mine = Order {
                my_bid_price: Some(4500),
                ..open
            };
            assert_eq!(tab_for(&mine, Role::Driver), Tab::MyBids);
        }
    }

    mod action_tests {
        use super::*;

        #[test]
        fn test_customer_can_select_only_with_bids() {
            let o = order(OrderStatus::Searching);
            assert!(!available_actions(&o, Role::Customer).contains(&Action::SelectWinner));
            let o = Order { bids_count: 1, ..o };
            assert!(available_actions(&o, Role::Customer).contains(&Action::SelectWinner));
        }

        #[test]
        fn test_driver_bids_once() {
            let o = order(OrderStatus::Searching);
            assert_eq!(available_actions(&o, Role::Driver), vec![Action::PlaceBid]);
            let o = Order {
                my_bid_price: Some(100),
                ..o
            };
            assert!(available_actions(&o, Role::Driver).is_empty());
        }

        #[test]
        fn test_driver_evidence_actions_follow_stage() {
            let mut o = in_progress();
            assert!(available_actions(&o, Role::Driver).contains(&Action::UploadLoadingPhotos));
            o.loading_confirmed_at = Some("t".into());
            assert!(available_actions(&o, Role::Driver).contains(&Action::UploadUnloadingPhotos));
            o.unloading_confirmed_at = Some("t".into());
            assert!(available_actions(&o, Role::Driver).contains(&Action::ConfirmCompletion));
        }

        #[test]
        fn test_review_once_per_party() {
            let mut o = Order {
                winner_driver_id: Some(DRIVER),
                customer_confirmed: true,
                driver_confirmed: true,
                ..order(OrderStatus::Closed)
            };
            assert!(available_actions(&o, Role::Customer).contains(&Action::Review));
            assert!(available_actions(&o, Role::Driver).contains(&Action::Review));
            o.customer_reviewed = true;
            assert!(!available_actions(&o, Role::Customer).contains(&Action::Review));
            assert!(available_actions(&o, Role::Driver).contains(&Action::Review));
        }

        #[test]
        fn test_chat_access() {
            assert_eq!(chat_access(&in_progress()), Some(true));
            let closed = Order {
                status: OrderStatus::Closed,
                ..in_progress()
            };
            assert_eq!(chat_access(&closed), Some(false));
            assert_eq!(chat_access(&order(OrderStatus::Searching)), None);
        }
    }

    mod transition_tests {
        use super::*;

        #[test]
        fn test_close_bidding() {
            let o = apply(&order(OrderStatus::Searching), Transition::CloseBidding, now()).unwrap();
            assert_eq!(o.status, OrderStatus::NoOffers);

            let with_bids = Order {
                bids_count: 3,
                ..order(OrderStatus::Searching)
            };
            let o = apply(&with_bids, Transition::CloseBidding, now()).unwrap();
            assert_eq!(o.status, OrderStatus::AuctionCompleted);
        }

        #[test]
        fn test_select_winner_at_most_once() {
            let first = bid(2, 4500);
            let second = bid(3, 4000);
            let o = Order {
                bids_count: 2,
                ..order(OrderStatus::Searching)
            };

            let awarded = apply(&o, Transition::SelectWinner { bid: &first }, now()).unwrap();
            assert_eq!(awarded.status, OrderStatus::InProgress);
            assert_eq!(awarded.winner_driver_id, Some(DRIVER));
            assert_eq!(awarded.winning_price, Some(4500));

            let err = apply(&awarded, Transition::SelectWinner { bid: &second }, now()).unwrap_err();
            assert_eq!(err, TransitionError::AlreadyAwarded { winner: Some(DRIVER) });
            assert_eq!(AppError::from(err).kind, ErrorKind::Conflict);
        }

        #[test]
        fn test_select_winner_rejects_foreign_bid() {
            let mut foreign = bid(2, 100);
            foreign.order_id = Some(OrderId(99));
            let err = apply(&order(OrderStatus::Searching), Transition::SelectWinner { bid: &foreign }, now())
                .unwrap_err();
            assert_eq!(err, TransitionError::BidMismatch);
        }

        #[test]
        fn test_confirm_closes_only_when_both() {
            let mut o = in_progress();
            o.loading_confirmed_at = Some("a".into());
            o.unloading_confirmed_at = Some("b".into());

            let o = apply(&o, Transition::Confirm { role: Role::Customer }, now()).unwrap();
            assert_eq!(o.status, OrderStatus::InProgress);
            let err = apply(&o, Transition::Confirm { role: Role::Customer }, now()).unwrap_err();
            assert_eq!(err, TransitionError::AlreadyConfirmed { role: Role::Customer });

            let o = apply(&o, Transition::Confirm { role: Role::Driver }, now()).unwrap();
            assert_eq!(o.status, OrderStatus::Closed);
            assert!(o.driver_completed_at.is_some());
            assert_eq!(DetailedStatus::of(&o), DetailedStatus::Completed);
        }

        #[test]
        fn test_driver_confirm_needs_unloading() {
            let err = apply(&in_progress(), Transition::Confirm { role: Role::Driver }, now()).unwrap_err();
            assert!(matches!(err, TransitionError::OutOfOrder { .. }));
        }

        #[test]
        fn test_cancel_requires_reason_and_defeats_confirmations() {
            let o = Order {
                customer_confirmed: true,
                ..in_progress()
            };
            assert_eq!(
                apply(&o, Transition::Cancel { by: CUSTOMER, reason: "   " }, now()).unwrap_err(),
                TransitionError::ReasonRequired
            );

            let cancelled = apply(&o, Transition::Cancel { by: CUSTOMER, reason: " changed plans " }, now()).unwrap();
            assert_eq!(cancelled.status, OrderStatus::Closed);
            assert_eq!(cancelled.cancellation_reason.as_deref(), Some("changed plans"));
            assert!(!cancelled.customer_confirmed);
            assert_eq!(DetailedStatus::of(&cancelled), DetailedStatus::CancelledByCustomer);

            let err = apply(&cancelled, Transition::Cancel { by: CUSTOMER, reason: "again" }, now()).unwrap_err();
            assert!(matches!(err, TransitionError::WrongPhase { .. }));
        }

        #[test]
        fn test_stage_records_in_order() {
            let o = in_progress();
            assert!(apply(&o, Transition::RecordUnloading, now()).is_err());
            let o = apply(&o, Transition::RecordLoading, now()).unwrap();
            assert!(o.loading_confirmed_at.is_some());
            assert!(apply(&o, Transition::RecordDriverCompletion, now()).is_err());
            let o = apply(&o, Transition::RecordUnloading, now()).unwrap();
            let o = apply(&o, Transition::RecordDriverCompletion, now()).unwrap();
            assert_eq!(InProgressStage::of(&o), InProgressStage::AwaitingCustomer);
        }

        #[test]
        fn test_stage_records_outside_in_progress() {
            let err = apply(&order(OrderStatus::Searching), Transition::RecordLoading, now()).unwrap_err();
            assert!(matches!(err, TransitionError::WrongPhase { phase: Phase::Bidding, .. }));
        }
    }

    fn any_status() -> impl Strategy<Value = OrderStatus> {
        prop_oneof![
            Just(OrderStatus::Searching),
            Just(OrderStatus::Active),
            Just(OrderStatus::AuctionCompleted),
            Just(OrderStatus::NoOffers),
            Just(OrderStatus::InProgress),
            Just(OrderStatus::Completed),
            Just(OrderStatus::Cancelled),
            Just(OrderStatus::Closed),
            Just(OrderStatus::Unknown),
        ]
    }

    proptest! {
        #[test]
        fn prop_closed_with_both_flags_is_completed(
            cancelled_by in proptest::option::of(0i64..5),
            winner in proptest::option::of(0i64..5),
            bids in 0u32..10,
        ) {
            let o = Order {
                customer_id: Some(UserId(1)),
                winner_driver_id: winner.map(UserId),
                cancelled_by: cancelled_by.map(UserId),
                bids_count: bids,
                customer_confirmed: true,
                driver_confirmed: true,
                ..order(OrderStatus::Closed)
            };
            prop_assert_eq!(DetailedStatus::of(&o), DetailedStatus::Completed);
        }

        #[test]
        fn prop_labels_never_panic(
            status in any_status(),
            customer_confirmed in any::<bool>(),
            driver_confirmed in any::<bool>(),
            cancelled_by in proptest::option::of(0i64..5),
            winner in proptest::option::of(0i64..5),
        ) {
            let o = Order {
                status,
                customer_confirmed,
                driver_confirmed,
                cancelled_by: cancelled_by.map(UserId),
                winner_driver_id: winner.map(UserId),
                ..order(status)
            };
            let label = DetailedStatus::of(&o).label();
            prop_assert!(!label.is_empty());
            let tab = tab_for(&o, Role::Customer);
            prop_assert!(tabs_for(Role::Customer).contains(&tab));
            let tab = tab_for(&o, Role::Driver);
            prop_assert!(tabs_for(Role::Driver).contains(&tab));
        }

        #[test]
        fn prop_second_award_never_moves_winner(first in 1i64..50, second in 1i64..50) {
            let o = Order { bids_count: 2, ..order(OrderStatus::Searching) };
            let awarded = apply(&o, Transition::SelectWinner { bid: &bid(first, 10) }, now()).unwrap();
            let again = apply(&awarded, Transition::SelectWinner { bid: &bid(second, 5) }, now());
            prop_assert!(again.is_err());
            prop_assert_eq!(awarded.winner_driver_id, Some(UserId(first)));
        }
    }
}
