//! Fare resolution and caching engine.
//!
//! A [`FareEngine`] resolves raw vehicle identifiers, fetches raw pricing
//! through an ordered chain of [`PricingProvider`]s, computes trip-type
//! fares, and keeps the results in a checksum-verified cache mirrored
//! across a short-lived and a durable [`KeyValueStore`].

pub mod cache;
pub mod compute;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod events;
pub mod provider;
pub mod store;
pub mod tiers;
pub mod types;
pub mod validator;
pub mod vehicle;

pub use cache::{ClearOutcome, FareCache, FareCacheSettings};
pub use compute::FareComputationEngine;
pub use config::{ConfigError, FareEngineConfig};
pub use coordinator::{CoordinatorSettings, FareResolution, FareSource, RequestCoordinator};
pub use engine::FareEngine;
pub use error::{FareError, Result};
pub use events::{FareEvent, FareEventBus, FareEventHandler, FareEventKind, SubscriptionId};
pub use provider::{HttpPricingProvider, PricingProvider, ProviderChain};
pub use store::{FileStore, KeyValueStore, MemoryStore, TieredStore};
pub use tiers::{PricingTier, PricingTierCatalog, VehicleCategory};
pub use types::{
    BreakdownValue, CacheEntry, CanonicalId, FareDetails, FareParams, FareRequest, TripMode,
    TripType,
};
pub use validator::{Reconciliation, ReconciliationValidator};
pub use vehicle::VehicleIdentityResolver;
