//! Time-boxed listing snapshot plus a bounded cache of per-order bid lists.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroUsize;

use crate::lifecycle::Tab;
use crate::model::{Bid, Order, OrderId, Role, TelegramId};
use crate::UnixTimeMs;

pub const DEFAULT_BID_CACHE_CAPACITY: usize = 32;

/// Identifies whose listing a snapshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub telegram_id: TelegramId,
    pub role: Role,
}

/// Orders partitioned by tab, as returned by the role listing endpoints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Vec<Order>>")]
pub struct OrderListing {
    tabs: BTreeMap<Tab, Vec<Order>>,
}

impl From<BTreeMap<String, Vec<Order>>> for OrderListing {
    fn from(raw: BTreeMap<String, Vec<Order>>) -> Self {
        let tabs = raw
            .into_iter()
            .filter_map(|(key, orders)| {
                let tab = Tab::from_key(&key);
                if tab.is_none() {
                    tracing::debug!(key = %key, "ignoring unknown listing partition");
                }
                tab.map(|t| (t, orders))
            })
            .collect();
        Self { tabs }
    }
}

impl OrderListing {
    #[must_use]
    pub fn new(tabs: BTreeMap<Tab, Vec<Order>>) -> Self {
        Self { tabs }
    }

    #[must_use]
    pub fn orders(&self, tab: Tab) -> &[Order] {
        self.tabs.get(&tab).map(Vec::as_slice).unwrap_or(&[])
    }

    #[must_use]
    pub fn count(&self, tab: Tab) -> usize {
        self.tabs.get(&tab).map_or(0, Vec::len)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.tabs.values().flatten()
    }

    #[must_use]
    pub fn find(&self, id: OrderId) -> Option<&Order> {
        self.iter().find(|o| o.id == id)
    }

    pub fn find_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        self.tabs.values_mut().flatten().find(|o| o.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tabs.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMiss {
    Empty,
    OtherSession,
    Invalidated,
    Expired { age_ms: u64 },
}

impl fmt::Display for CacheMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty"),
            Self::OtherSession => f.write_str("other_session"),
            Self::Invalidated => f.write_str("invalidated"),
            Self::Expired { age_ms } => write!(f, "expired ({age_ms} ms)"),
        }
    }
}

#[derive(Debug)]
struct Snapshot {
    session: SessionKey,
    listing: OrderListing,
    captured_at: UnixTimeMs,
    valid: bool,
}

#[derive(Debug)]
pub struct OrderCache {
    ttl_ms: u64,
    generation: u64,
    snapshot: Option<Snapshot>,
    bids: LruCache<OrderId, Vec<Bid>>,
}

impl Default for OrderCache {
    fn default() -> Self {
        Self::new(crate::CACHE_TTL_MS, DEFAULT_BID_CACHE_CAPACITY)
    }
}

impl OrderCache {
    #[must_use]
    pub fn new(ttl_ms: u64, bid_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(bid_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl_ms,
            generation: 0,
            snapshot: None,
            bids: LruCache::new(capacity),
        }
    }

    #[must_use]
    pub const fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Bumped by every [`invalidate`](Self::invalidate). A fetch issued for
    /// an older generation may predate a mutation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the snapshot only if it belongs to `session`, has not been
    /// invalidated and is younger than the TTL.
    pub fn lookup(&self, session: &SessionKey, now: UnixTimeMs) -> Result<&OrderListing, CacheMiss> {
        let snapshot = self.snapshot.as_ref().ok_or(CacheMiss::Empty)?;
        if snapshot.session != *session {
            return Err(CacheMiss::OtherSession);
        }
        if !snapshot.valid {
            return Err(CacheMiss::Invalidated);
        }
        let age_ms = now.elapsed_since(snapshot.captured_at);
        if age_ms >= self.ttl_ms {
            return Err(CacheMiss::Expired { age_ms });
        }
        Ok(&snapshot.listing)
    }

    /// Last listing for `session`, stale or not. For display only.
    #[must_use]
    pub fn displayable(&self, session: &SessionKey) -> Option<&OrderListing> {
        self.snapshot
            .as_ref()
            .filter(|s| s.session == *session)
            .map(|s| &s.listing)
    }

    pub fn displayable_mut(&mut self, session: &SessionKey) -> Option<&mut OrderListing> {
        self.snapshot
            .as_mut()
            .filter(|s| s.session == *session)
            .map(|s| &mut s.listing)
    }

    #[must_use]
    pub fn captured_at(&self) -> Option<UnixTimeMs> {
        self.snapshot.as_ref().map(|s| s.captured_at)
    }

    /// Stores a fetched listing. A listing fetched for an older generation
    /// is kept for display but never satisfies a lookup.
    pub fn store(&mut self, session: SessionKey, listing: OrderListing, now: UnixTimeMs, generation: u64) {
        if self.snapshot.as_ref().is_some_and(|s| s.session != session) {
            self.bids.clear();
        }
        let valid = generation == self.generation;
        tracing::debug!(orders = listing.len(), at = now.as_millis(), valid, "listing cached");
        self.snapshot = Some(Snapshot {
            session,
            listing,
            captured_at: now,
            valid,
        });
    }

    /// Marks the listing stale and drops every cached bid list.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.valid = false;
        }
        self.bids.clear();
    }

    pub fn discard(&mut self) {
        self.snapshot = None;
        self.bids.clear();
    }

    #[must_use]
    pub fn should_background_refresh(&self, session: &SessionKey, now: UnixTimeMs, visible: bool) -> bool {
        visible && self.lookup(session, now).is_err()
    }

    pub fn store_bids(&mut self, order_id: OrderId, bids: Vec<Bid>) {
        self.bids.put(order_id, bids);
    }

    pub fn bids(&mut self, order_id: OrderId) -> Option<&[Bid]> {
        self.bids.get(&order_id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn peek_bids(&self, order_id: OrderId) -> Option<&[Bid]> {
        self.bids.peek(&order_id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn cached_bid_lists(&self) -> usize {
        self.bids.len()
    }
}
