//! Session-scoped facade wiring every fare component together.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cache::{ClearOutcome, FareCache};
use crate::compute::FareComputationEngine;
use crate::config::FareEngineConfig;
use crate::coordinator::{FareResolution, FareSource, RequestCoordinator};
use crate::error::{FareError, Result};
use crate::events::{FareEvent, FareEventBus, FareEventHandler, FareEventKind, SubscriptionId};
use crate::provider::{HttpPricingProvider, PricingProvider, ProviderChain};
use crate::store::{FileStore, KeyValueStore, MemoryStore, TieredStore};
use crate::tiers::PricingTierCatalog;
use crate::types::{FareParams, FareRequest, TripType};
use crate::validator::{Reconciliation, ReconciliationValidator};
use crate::vehicle::VehicleIdentityResolver;

/// One instance per application session. Holds all fare state.
#[derive(Debug)]
pub struct FareEngine {
    resolver: VehicleIdentityResolver,
    catalog: Arc<PricingTierCatalog>,
    validator: Arc<ReconciliationValidator>,
    cache: Arc<FareCache>,
    events: Arc<FareEventBus>,
    coordinator: RequestCoordinator,
}

impl FareEngine {
    #[must_use]
    pub fn new(
        config: &FareEngineConfig,
        providers: Vec<Arc<dyn PricingProvider>>,
        short: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
    ) -> Self {
        let catalog = Arc::new(PricingTierCatalog::new());
        let validator = Arc::new(ReconciliationValidator::new(
            durable.clone(),
            catalog.clone(),
            config.drift_tolerance,
            config.cache_ttl,
        ));
        let cache = Arc::new(FareCache::new(
            TieredStore::new(short, durable),
            config.cache_settings(),
        ));
        let events = Arc::new(FareEventBus::new());
        let coordinator = RequestCoordinator::new(
            Arc::new(ProviderChain::new(providers)),
            FareComputationEngine::new(catalog.clone()),
            validator.clone(),
            cache.clone(),
            events.clone(),
            config.coordinator_settings(),
        );
        Self {
            resolver: VehicleIdentityResolver::default(),
            catalog,
            validator,
            cache,
            events,
            coordinator,
        }
    }

    /// HTTP providers in configured order over a memory/file tier pair.
    pub fn from_config(config: &FareEngineConfig) -> Result<Self> {
        let providers = config
            .pricing_clients()
            .into_iter()
            .map(|client| {
                HttpPricingProvider::new(client)
                    .map(|provider| Arc::new(provider) as Arc<dyn PricingProvider>)
            })
            .collect::<Result<Vec<_>>>()?;
        if providers.is_empty() {
            warn!("no pricing providers configured; fare fetches will fall back");
        }
        info!(
            providers = providers.len(),
            cache_path = %config.cache_path.display(),
            "fare engine initialised"
        );
        Ok(Self::new(
            config,
            providers,
            Arc::new(MemoryStore::new()),
            Arc::new(FileStore::load(config.cache_path.clone())),
        ))
    }

    #[must_use]
    pub fn resolver(&self) -> &VehicleIdentityResolver {
        &self.resolver
    }

    #[must_use]
    pub fn catalog(&self) -> &PricingTierCatalog {
        self.catalog.as_ref()
    }

    #[must_use]
    pub fn validator(&self) -> &ReconciliationValidator {
        self.validator.as_ref()
    }

    #[must_use]
    pub fn cache(&self) -> &FareCache {
        self.cache.as_ref()
    }

    #[must_use]
    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    /// Resolve the raw vehicle id. Fails before any network call.
    pub fn params(&self, request: &FareRequest) -> Result<FareParams> {
        let vehicle_id = self.resolver.resolve(request.vehicle_id.as_str())?;
        Ok(FareParams::new(
            vehicle_id,
            request.trip_type,
            request.distance_km,
            request.trip_mode,
            request.package_id.clone(),
        ))
    }

    pub async fn quote(
        &self,
        request: &FareRequest,
        force_refresh: bool,
    ) -> Result<FareResolution> {
        let params = self.params(request)?;
        Ok(self.coordinator.fetch(&params, force_refresh).await)
    }

    /// Quote every request in order with the bulk delay between fetches.
    pub async fn quote_all(
        &self,
        requests: &[FareRequest],
        force_refresh: bool,
    ) -> Result<Vec<FareResolution>> {
        let params = requests
            .iter()
            .map(|request| self.params(request))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.coordinator.fetch_all(&params, force_refresh).await)
    }

    /// Quote for a later booking step, pinned to the confirmed fare when the
    /// fresh one has drifted.
    ///
    /// Only authoritative fares can become the confirmed fare. Fallback and
    /// out-of-bounds fares defer to an existing confirmed fare and are
    /// otherwise returned unrecorded.
    pub async fn booking_quote(&self, request: &FareRequest) -> Result<FareResolution> {
        let params = self.params(request)?;
        let mut resolution = self.coordinator.fetch(&params, false).await;
        let id = &params.vehicle_id;

        let outcome = if is_authoritative(&resolution) {
            self.validator
                .reconcile(resolution.fare.clone(), id, params.trip_type)
                .map(Some)
        } else {
            self.validator.validated(id, params.trip_type).map(|confirmed| {
                confirmed.map(|entry| Reconciliation::Reconciled {
                    drift: (resolution.fare.total_price - entry.fare.total_price).abs(),
                    fare: entry.fare,
                })
            })
        };
        let reconciliation = match outcome {
            Ok(Some(reconciliation)) => reconciliation,
            Ok(None) => {
                debug!(vehicle = %id, "non-authoritative fare left unconfirmed");
                return Ok(resolution);
            }
            Err(error) => {
                warn!(vehicle = %id, "fare reconciliation failed: {error}");
                return Ok(resolution);
            }
        };
        let source = reconciliation.source();
        resolution.fare = reconciliation.into_fare();
        if resolution.fare.is_priced() {
            self.events.publish(&FareEvent {
                kind: FareEventKind::FareCalculated,
                canonical_id: id.clone(),
                trip_type: params.trip_type,
                trip_mode: Some(params.trip_mode),
                fare: resolution.fare.clone(),
                timestamp: Utc::now(),
                source: Some(source.to_string()),
            });
        }
        Ok(resolution)
    }

    pub fn on_fare_updated(&self, handler: FareEventHandler) -> SubscriptionId {
        self.events.on_fare_updated(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn clear_cache(&self) -> Result<ClearOutcome> {
        self.cache.clear()
    }

    pub fn clear_cache_for(&self, trip_type: TripType) -> Result<usize> {
        self.cache.clear_for(trip_type)
    }

    pub fn force_refresh_pending(&self) -> Result<bool> {
        self.cache.force_refresh_pending()
    }

    pub fn cancel(&self, request: &FareRequest) -> Result<bool> {
        let params = self.params(request)?;
        Ok(self.coordinator.cancel(&params))
    }

    pub fn cancel_all(&self) -> usize {
        self.coordinator.cancel_all()
    }
}

/// Fares that passed every check on their way in: fresh from the network,
/// a valid cache entry, or the throttled copy of either.
fn is_authoritative(resolution: &FareResolution) -> bool {
    matches!(
        resolution.source,
        FareSource::Network | FareSource::Cache | FareSource::Throttled
    ) && !matches!(resolution.error, Some(FareError::OutOfBounds { .. }))
}
