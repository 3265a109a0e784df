//! Reviews, ratings and the profile panel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{AppError, AppResult, ValidationError};
use crate::lifecycle::DetailedStatus;
use crate::model::{BadgeCatalog, Order, OrderId, Rating, ReviewEntry, Role, TelegramId, UserStats};

pub const MAX_REVIEW_COMMENT_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDraft {
    pub order_id: OrderId,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub badges: Vec<String>,
}

/// Body of `POST /api/reviews/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPayload {
    pub order_id: OrderId,
    pub reviewer_telegram_id: TelegramId,
    pub reviewee_telegram_id: TelegramId,
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub badges: Vec<String>,
}

impl ReviewDraft {
    /// Checks the draft against the order and the badge catalog.
    ///
    /// An empty catalog (not loaded yet) accepts no badges at all.
    pub fn validate(
        self,
        order: &Order,
        reviewer: TelegramId,
        role: Role,
        catalog: &BadgeCatalog,
    ) -> AppResult<ReviewPayload> {
        if !(1..=5).contains(&self.rating) {
            return Err(ValidationError::InvalidRating.into());
        }
        if let Some(unknown) = self.badges.iter().find(|b| !catalog.contains(b)) {
            return Err(ValidationError::UnknownBadge(unknown.clone()).into());
        }
        let comment = self
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if let Some(len) = comment.as_ref().map(|c| c.chars().count()) {
            if len > MAX_REVIEW_COMMENT_CHARS {
                return Err(ValidationError::TooLong {
                    field: "Comment",
                    len,
                    max: MAX_REVIEW_COMMENT_CHARS,
                }
                .into());
            }
        }

        if !DetailedStatus::of(order).is_completed() {
            return Err(AppError::conflict("Only completed orders can be reviewed")
                .with_context("order_id", order.id.to_string()));
        }
        if order.reviewed_by(role) {
            return Err(AppError::conflict("You have already reviewed this order")
                .with_context("order_id", order.id.to_string()));
        }
        let reviewee = order
            .counterpart_telegram_id(role)
            .ok_or(ValidationError::Required { field: "Reviewee" })?;

        let mut seen = BTreeSet::new();
        let mut badges = self.badges;
        badges.retain(|b| seen.insert(b.clone()));

        Ok(ReviewPayload {
            order_id: self.order_id,
            reviewer_telegram_id: reviewer,
            reviewee_telegram_id: reviewee,
            rating: self.rating,
            comment,
            badges,
        })
    }
}

/// Each part loads independently; a failed part stays at its zero value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub telegram_id: Option<TelegramId>,
    pub rating: Rating,
    pub stats: UserStats,
    pub reviews: Vec<ReviewEntry>,
    pub pending: u8,
}

impl Profile {
    pub const PARTS: u8 = 3;

    #[must_use]
    pub fn loading(telegram_id: TelegramId) -> Self {
        Self {
            telegram_id: Some(telegram_id),
            pending: Self::PARTS,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_for(&self, telegram_id: TelegramId) -> bool {
        self.telegram_id == Some(telegram_id)
    }

    pub fn part_done(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.pending > 0
    }
}
