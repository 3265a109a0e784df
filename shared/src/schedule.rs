//! Timer bookkeeping. Every armed timer has exactly one owner and is torn
//! down through [`TimerRegistry::dispose`] or by firing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::api::RequestId;
use crate::model::OrderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerOwner {
    ListingRefresh,
    ChatPoll(OrderId),
    RequestTimeout { request: RequestId, attempt: u32 },
    RetryBackoff { request: RequestId },
}

impl TimerOwner {
    /// Owners that may hold at most one live timer at a time.
    const fn is_exclusive(&self) -> bool {
        matches!(self, Self::ListingRefresh | Self::ChatPoll(_))
    }
}

#[derive(Debug, Default)]
pub struct TimerRegistry {
    next_id: u64,
    live: HashMap<TimerId, TimerOwner>,
}

impl TimerRegistry {
    /// Records a new timer for `owner`. For exclusive owners the previous
    /// timer, if any, is dropped and returned so the caller can cancel it.
    pub fn arm(&mut self, owner: TimerOwner) -> (TimerId, Option<TimerId>) {
        let replaced = if owner.is_exclusive() {
            let previous = self.find(&owner);
            if let Some(id) = previous {
                self.live.remove(&id);
            }
            previous
        } else {
            None
        };

        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.live.insert(id, owner);
        (id, replaced)
    }

    /// Consumes a firing. Late firings of disposed timers yield `None`.
    pub fn fire(&mut self, id: TimerId) -> Option<TimerOwner> {
        self.live.remove(&id)
    }

    pub fn dispose(&mut self, id: TimerId) -> Option<TimerOwner> {
        self.live.remove(&id)
    }

    /// Drops every timer matching `pred` and returns their ids.
    pub fn dispose_where(&mut self, pred: impl Fn(&TimerOwner) -> bool) -> Vec<TimerId> {
        let ids: Vec<TimerId> = self
            .live
            .iter()
            .filter(|(_, owner)| pred(owner))
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.live.remove(id);
        }
        ids
    }

    pub fn clear(&mut self) -> Vec<TimerId> {
        self.live.drain().map(|(id, _)| id).collect()
    }

    #[must_use]
    pub fn find(&self, owner: &TimerOwner) -> Option<TimerId> {
        self.live
            .iter()
            .find(|(_, o)| *o == owner)
            .map(|(id, _)| *id)
    }

    #[must_use]
    pub fn owner(&self, id: TimerId) -> Option<&TimerOwner> {
        self.live.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
