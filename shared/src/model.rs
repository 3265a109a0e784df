use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::lifecycle::OrderStatus;

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub const fn new(id: i64) -> Self {
                Self(id)
            }
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

typed_id!(OrderId);
typed_id!(BidId);
typed_id!(UserId);
typed_id!(TelegramId);
typed_id!(MessageId);
typed_id!(PhotoId);

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Driver,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Driver => "driver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Tolerant decoding ---
//
// The backend is a SQLite-backed service: booleans may arrive as 0/1, ids as
// strings, and truck types as either numeric ids or slugs.

pub(crate) mod wire {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolLike {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    pub fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<BoolLike>::deserialize(deserializer)?;
        Ok(match value {
            None => false,
            Some(BoolLike::Bool(b)) => b,
            Some(BoolLike::Int(i)) => i != 0,
            Some(BoolLike::Text(s)) => matches!(s.as_str(), "1" | "true" | "True"),
        })
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum KeyLike {
        Int(i64),
        Text(String),
    }

    pub fn flexible_key<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<KeyLike>::deserialize(deserializer)?;
        Ok(value.map(|v| match v {
            KeyLike::Int(i) => i.to_string(),
            KeyLike::Text(s) => s,
        }))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AmountLike {
        Int(i64),
        Float(f64),
        Text(String),
    }

    /// Prices are whole roubles; anything non-positive or unparsable is absent.
    pub fn flexible_amount<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<AmountLike>::deserialize(deserializer)?;
        Ok(match value {
            Some(AmountLike::Int(i)) if i > 0 => Some(i as u64),
            Some(AmountLike::Float(f)) if f.is_finite() && f >= 1.0 => Some(f.round() as u64),
            Some(AmountLike::Text(s)) => s.trim().parse::<u64>().ok().filter(|p| *p > 0),
            _ => None,
        })
    }

    pub fn flexible_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(flexible_amount(deserializer)?
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0))
    }
}

// --- Orders ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Order {
    pub id: OrderId,
    #[serde(default)]
    pub customer_id: Option<UserId>,
    #[serde(default)]
    pub winner_driver_id: Option<UserId>,
    #[serde(default, alias = "pickup_location")]
    pub pickup_address: String,
    #[serde(default, alias = "delivery_location")]
    pub delivery_address: String,
    #[serde(default, alias = "description")]
    pub cargo_description: String,
    #[serde(default, alias = "truck_type_id", deserialize_with = "wire::flexible_key")]
    pub truck_type: Option<String>,
    #[serde(default, alias = "price", deserialize_with = "wire::flexible_amount")]
    pub max_price: Option<u64>,
    #[serde(default)]
    pub delivery_date: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub status: OrderStatus,

    #[serde(default, alias = "total_bids", deserialize_with = "wire::flexible_count")]
    pub bids_count: u32,
    #[serde(default, deserialize_with = "wire::flexible_amount")]
    pub min_bid_price: Option<u64>,
    #[serde(default, deserialize_with = "wire::flexible_amount")]
    pub winning_price: Option<u64>,
    #[serde(default, deserialize_with = "wire::flexible_amount")]
    pub my_bid_price: Option<u64>,

    #[serde(default)]
    pub loading_confirmed_at: Option<String>,
    #[serde(default)]
    pub unloading_confirmed_at: Option<String>,
    #[serde(default)]
    pub driver_completed_at: Option<String>,

    #[serde(default, deserialize_with = "wire::flexible_bool")]
    pub customer_confirmed: bool,
    #[serde(default, deserialize_with = "wire::flexible_bool")]
    pub driver_confirmed: bool,

    #[serde(default)]
    pub cancelled_by: Option<UserId>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,

    #[serde(default, deserialize_with = "wire::flexible_bool")]
    pub customer_reviewed: bool,
    #[serde(default, deserialize_with = "wire::flexible_bool")]
    pub driver_reviewed: bool,

    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub driver_name: Option<String>,
    #[serde(default)]
    pub customer_telegram_id: Option<TelegramId>,
    #[serde(default)]
    pub driver_telegram_id: Option<TelegramId>,
}

impl Order {
    #[must_use]
    pub fn has_winner(&self) -> bool {
        self.winner_driver_id.is_some()
    }

    #[must_use]
    pub fn both_confirmed(&self) -> bool {
        self.customer_confirmed && self.driver_confirmed
    }

    #[must_use]
    pub fn confirmed_by(&self, role: Role) -> bool {
        match role {
            Role::Customer => self.customer_confirmed,
            Role::Driver => self.driver_confirmed,
        }
    }

    #[must_use]
    pub fn reviewed_by(&self, role: Role) -> bool {
        match role {
            Role::Customer => self.customer_reviewed,
            Role::Driver => self.driver_reviewed,
        }
    }

    /// The Telegram id of the other party, used as the review target.
    #[must_use]
    pub fn counterpart_telegram_id(&self, role: Role) -> Option<TelegramId> {
        match role {
            Role::Customer => self.driver_telegram_id,
            Role::Driver => self.customer_telegram_id,
        }
    }

    #[must_use]
    pub fn counterpart_name(&self, role: Role) -> Option<&str> {
        match role {
            Role::Customer => self.driver_name.as_deref(),
            Role::Driver => self.customer_name.as_deref(),
        }
    }
}

/// Form data for `POST /api/orders`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct OrderDraft {
    pub truck_type_id: String,
    pub pickup_location: String,
    pub delivery_location: String,
    pub description: String,
    #[serde(default)]
    pub cargo_weight: Option<String>,
    #[serde(default)]
    pub cargo_volume: Option<String>,
    #[serde(default)]
    pub price: Option<u64>,
    #[serde(default)]
    pub delivery_date: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CreatedResponse {
    pub id: i64,
    #[serde(default)]
    pub message: Option<String>,
}

// --- Bids ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Bid {
    pub id: BidId,
    #[serde(default)]
    pub order_id: Option<OrderId>,
    #[serde(default)]
    pub driver_id: Option<UserId>,
    #[serde(default, alias = "bid_amount", deserialize_with = "wire::flexible_amount")]
    pub price: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, alias = "driver_name")]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BidRequest {
    pub order_id: OrderId,
    pub price: u64,
}

// --- Users ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct User {
    #[serde(default)]
    pub id: Option<UserId>,
    pub telegram_id: TelegramId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub role: Role,
    #[serde(default, deserialize_with = "wire::flexible_key")]
    pub truck_type: Option<String>,
}

impl User {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or("User")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RegistrationForm {
    pub telegram_id: TelegramId,
    pub name: String,
    pub phone_number: String,
    pub role: Role,
    #[serde(default)]
    pub truck_type: Option<String>,
}

// --- Truck catalog ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TruckType {
    #[serde(deserialize_with = "truck_type_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

fn truck_type_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    wire::flexible_key(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing truck type id"))
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TruckCategory {
    #[serde(default, deserialize_with = "wire::flexible_key")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub types: Vec<TruckType>,
}

pub const UNKNOWN_TRUCK_TYPE: &str = "Not specified";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct TruckCatalog {
    pub categories: Vec<TruckCategory>,
}

impl TruckCatalog {
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        !self.categories.is_empty()
    }

    /// Full display name for a truck type id, falling back to the short name.
    #[must_use]
    pub fn name_of(&self, id: Option<&str>) -> &str {
        let Some(id) = id else {
            return UNKNOWN_TRUCK_TYPE;
        };
        self.categories
            .iter()
            .flat_map(|c| c.types.iter())
            .find(|t| t.id == id)
            .map(|t| t.full_name.as_deref().unwrap_or(&t.name))
            .unwrap_or(UNKNOWN_TRUCK_TYPE)
    }
}

// --- Photos ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhotoStage {
    Loading,
    Unloading,
}

impl PhotoStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PhotoStage::Loading => "loading",
            PhotoStage::Unloading => "unloading",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PhotoRef {
    pub id: PhotoId,
    pub url: String,
    #[serde(default)]
    pub uploaded_at: Option<String>,
    #[serde(default)]
    pub uploaded_by: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct PhotoRefs {
    #[serde(default)]
    pub loading: Vec<PhotoRef>,
    #[serde(default)]
    pub unloading: Vec<PhotoRef>,
}

/// A file picked in the shell, ready for upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PhotoFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

// --- Chat ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_role: Option<Role>,
    pub message_text: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "wire::flexible_bool")]
    pub is_mine: bool,
    #[serde(default, deserialize_with = "wire::flexible_bool")]
    pub read_by_customer: bool,
    #[serde(default, deserialize_with = "wire::flexible_bool")]
    pub read_by_driver: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct MessageHistory {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, deserialize_with = "wire::flexible_count")]
    pub unread_count: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    pub message: ChatMessage,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct UnreadSummary {
    #[serde(default, deserialize_with = "wire::flexible_count")]
    pub total_unread: u32,
    /// JSON object keys are strings; non-numeric keys are dropped on read.
    #[serde(default)]
    pub unread_by_order: BTreeMap<String, u32>,
}

impl UnreadSummary {
    #[must_use]
    pub fn for_order(&self, id: OrderId) -> u32 {
        self.unread_by_order
            .get(&id.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub fn mark_read(&mut self, id: OrderId) {
        if let Some(count) = self.unread_by_order.remove(&id.to_string()) {
            self.total_unread = self.total_unread.saturating_sub(count);
        }
    }
}

// --- Reputation ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Rating {
    #[serde(default)]
    pub average: f64,
    #[serde(default, deserialize_with = "wire::flexible_count")]
    pub count: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct UserStats {
    #[serde(default, deserialize_with = "wire::flexible_count")]
    pub total_orders: u32,
    #[serde(default, deserialize_with = "wire::flexible_count")]
    pub completed_orders: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ReviewEntry {
    #[serde(default)]
    pub id: Option<i64>,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub reviewer_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub badges: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Badge {
    pub id: String,
    pub label: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct BadgeCatalog {
    #[serde(default)]
    pub badges: Vec<Badge>,
}

impl BadgeCatalog {
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.badges.iter().any(|b| b.id == id)
    }
}
