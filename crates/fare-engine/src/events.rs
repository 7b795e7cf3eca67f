//! Publish/subscribe surface for fare observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{CanonicalId, FareDetails, TripMode, TripType};

/// Handler invoked synchronously for every published event.
pub type FareEventHandler = Arc<dyn Fn(&FareEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FareEventKind {
    #[serde(rename = "fare-calculated")]
    FareCalculated,
    #[serde(rename = "fare-update")]
    FareUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FareEvent {
    pub kind: FareEventKind,
    pub canonical_id: CanonicalId,
    pub trip_type: TripType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip_mode: Option<TripMode>,
    pub fare: FareDetails,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct FareEventBus {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, FareEventHandler)>>,
}

impl std::fmt::Debug for FareEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FareEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl FareEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_fare_updated(&self, handler: FareEventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match self.handlers.write() {
            Ok(mut handlers) => handlers.push((id, handler)),
            Err(poisoned) => poisoned.into_inner().push((id, handler)),
        }
        id
    }

    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = match self.handlers.write() {
            Ok(handlers) => handlers,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        before != handlers.len()
    }

    pub fn publish(&self, event: &FareEvent) {
        // Snapshot so handlers may subscribe or unsubscribe re-entrantly.
        let handlers = match self.handlers.read() {
            Ok(handlers) => handlers.iter().map(|(_, handler)| handler.clone()).collect::<Vec<_>>(),
            Err(_) => {
                warn!("fare event handlers lock poisoned, dropping event");
                return;
            }
        };
        debug!(
            kind = ?event.kind,
            vehicle = %event.canonical_id,
            subscribers = handlers.len(),
            "publishing fare event"
        );
        for handler in handlers {
            handler(event);
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().map_or(0, |handlers| handlers.len())
    }
}
