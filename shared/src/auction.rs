//! Bid validation, submission-order ranking and the client-side award ledger.

use chrono::{DateTime, NaiveDateTime};
use std::collections::HashMap;

use crate::error::{AppError, AppResult, ValidationError};
use crate::model::{Bid, BidId, OrderId};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses the price typed into the bid form. Only a plain positive whole
/// number is accepted.
pub fn parse_bid_price(input: &str) -> Result<u64, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::InvalidPrice);
    }
    match trimmed.parse::<u64>() {
        Ok(price) if price > 0 => Ok(price),
        _ => Err(ValidationError::InvalidPrice),
    }
}

/// Backend timestamps come as RFC 3339 or SQLite's `YYYY-MM-DD HH:MM:SS`.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Bids for one order in submission order: oldest first, ties broken by id.
/// Bids without a readable timestamp sort last.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BidBook {
    bids: Vec<Bid>,
}

impl BidBook {
    #[must_use]
    pub fn new(mut bids: Vec<Bid>) -> Self {
        bids.sort_by_cached_key(|bid| {
            let at = bid.created_at.as_deref().and_then(parse_timestamp);
            (at.is_none(), at, bid.id)
        });
        Self { bids }
    }

    #[must_use]
    pub fn bids(&self) -> &[Bid] {
        &self.bids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }

    /// 1-based submission position.
    #[must_use]
    pub fn rank_of(&self, id: BidId) -> Option<usize> {
        self.bids.iter().position(|b| b.id == id).map(|i| i + 1)
    }

    #[must_use]
    pub fn min_price(&self) -> Option<u64> {
        self.bids.iter().filter_map(|b| b.price).min()
    }

    #[must_use]
    pub fn find(&self, id: BidId) -> Option<&Bid> {
        self.bids.iter().find(|b| b.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardState {
    InFlight { bid: BidId },
    Awarded { bid: BidId },
}

/// Remembers winner selections made from this session so a second
/// selection on the same order is refused before reaching the network.
#[derive(Debug, Clone, Default)]
pub struct AwardLedger {
    awards: HashMap<OrderId, AwardState>,
}

impl AwardLedger {
    /// Fails with a conflict if this session already selected a winner for
    /// `order`, whether or not the backend has answered yet.
    pub fn ensure_open(&self, order: OrderId) -> AppResult<()> {
        match self.awards.get(&order) {
            Some(existing) => Err(AppError::conflict("A driver has already been selected for this order")
                .with_context("order_id", order.to_string())
                .with_internal(format!("{existing:?}"))),
            None => Ok(()),
        }
    }

    pub fn begin(&mut self, order: OrderId, bid: BidId) -> AppResult<()> {
        self.ensure_open(order)?;
        self.awards.insert(order, AwardState::InFlight { bid });
        Ok(())
    }

    pub fn confirm(&mut self, order: OrderId) {
        if let Some(AwardState::InFlight { bid }) = self.awards.get(&order).copied() {
            self.awards.insert(order, AwardState::Awarded { bid });
        }
    }

    /// Clears an in-flight award after a failed request. Settled awards stay.
    pub fn abandon(&mut self, order: OrderId) {
        if matches!(self.awards.get(&order), Some(AwardState::InFlight { .. })) {
            self.awards.remove(&order);
        }
    }

    #[must_use]
    pub fn state(&self, order: OrderId) -> Option<AwardState> {
        self.awards.get(&order).copied()
    }

    pub fn clear(&mut self) {
        self.awards.clear();
    }
}
