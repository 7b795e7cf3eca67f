//! Per-key request coordination: throttling, cancel-on-supersede, and
//! stale-response rejection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use fare_pricing_client::RawFareResponse;
use serde::Serialize;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::FareCache;
use crate::compute::FareComputationEngine;
use crate::error::{FareError, Result};
use crate::events::{FareEvent, FareEventBus, FareEventKind};
use crate::provider::ProviderChain;
use crate::types::{FareDetails, FareParams};
use crate::validator::ReconciliationValidator;

pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(3_000);
pub const DEFAULT_EVENT_THROTTLE: Duration = Duration::from_millis(3_000);
pub const DEFAULT_BULK_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_STATE_RETENTION: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub throttle: Duration,
    pub event_throttle: Duration,
    pub bulk_delay: Duration,
    /// Idle per-key state older than this is dropped.
    pub state_retention: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            throttle: DEFAULT_THROTTLE,
            event_throttle: DEFAULT_EVENT_THROTTLE,
            bulk_delay: DEFAULT_BULK_DELAY,
            state_retention: DEFAULT_STATE_RETENTION,
        }
    }
}

/// Where a resolved fare came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FareSource {
    Throttled,
    Cache,
    Network,
    LastKnown,
    Placeholder,
}

/// Best-effort fare plus the failure, if any, encountered producing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FareResolution {
    pub fare: FareDetails,
    pub source: FareSource,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<FareError>,
}

impl FareResolution {
    fn new(fare: FareDetails, source: FareSource) -> Self {
        Self {
            fare,
            source,
            error: None,
        }
    }

    fn with_error(mut self, error: Option<FareError>) -> Self {
        self.error = error;
        self
    }

    /// Surface caller-facing failures as `Err`; everything else yields the fare.
    pub fn into_result(self) -> Result<FareDetails> {
        match self.error {
            Some(error) if error.is_caller_facing() => Err(error),
            _ => Ok(self.fare),
        }
    }
}

fn serialize_error<S>(
    error: &Option<FareError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    token: CancellationToken,
    abort: AbortHandle,
}

impl InFlight {
    fn cancel(&self) {
        self.token.cancel();
        self.abort.abort();
    }
}

#[derive(Debug, Default)]
struct KeyState {
    generation: u64,
    in_flight: Option<InFlight>,
    last_success_at: Option<Instant>,
    last_event_at: Option<Instant>,
    last_known: Option<FareDetails>,
    last_seen: Option<Instant>,
}

impl KeyState {
    fn touch(&mut self) -> &mut Self {
        self.last_seen = Some(Instant::now());
        self
    }

    fn is_idle(&self, retention: Duration) -> bool {
        self.in_flight.is_none()
            && self
                .last_seen
                .is_none_or(|seen| seen.elapsed() >= retention)
    }
}

pub struct RequestCoordinator {
    providers: Arc<ProviderChain>,
    engine: FareComputationEngine,
    validator: Arc<ReconciliationValidator>,
    cache: Arc<FareCache>,
    events: Arc<FareEventBus>,
    settings: CoordinatorSettings,
    state: Mutex<HashMap<String, KeyState>>,
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("providers", &self.providers)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RequestCoordinator {
    #[must_use]
    pub fn new(
        providers: Arc<ProviderChain>,
        engine: FareComputationEngine,
        validator: Arc<ReconciliationValidator>,
        cache: Arc<FareCache>,
        events: Arc<FareEventBus>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            providers,
            engine,
            validator,
            cache,
            events,
            settings,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, HashMap<String, KeyState>> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Resolve a fare for `params`.
    ///
    /// Always produces a usable value; failures are reported alongside it.
    pub async fn fetch(&self, params: &FareParams, force_refresh: bool) -> FareResolution {
        let key = params.request_key();
        let force_refresh = force_refresh || self.clear_pending(key.as_str());

        if !force_refresh {
            if let Some(fare) = self.throttled(key.as_str()) {
                debug!(key = %key, "fare request throttled");
                return FareResolution::new(fare, FareSource::Throttled);
            }
            match self.cache.get(params) {
                Ok(Some(fare)) => {
                    self.remember(key.as_str(), &fare);
                    return FareResolution::new(fare, FareSource::Cache);
                }
                Ok(None) => {}
                Err(error) => warn!(key = %key, "fare cache read failed: {error}"),
            }
        }

        let (generation, handle) = self.begin(key.as_str(), params, force_refresh);
        info!(key = %key, generation, force_refresh, "fetching fare from pricing providers");

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(error) if error.is_cancelled() => Err(FareError::Cancelled),
            Err(error) => Err(FareError::Provider(format!("fare task failed: {error}"))),
        };

        if !self.finish(key.as_str(), generation) {
            debug!(key = %key, generation, "discarding stale fare response");
            return self.last_known(key.as_str()).with_error(Some(
                FareError::StaleGenerationDiscarded { generation },
            ));
        }

        let raw = match outcome {
            Ok(raw) => raw,
            Err(FareError::Cancelled) => {
                debug!(key = %key, generation, "fare request cancelled");
                return self
                    .last_known(key.as_str())
                    .with_error(Some(FareError::Cancelled));
            }
            Err(error) => return self.fallback(params, key.as_str(), Some(error)),
        };

        let fare = match self.engine.compute(params, &raw) {
            Ok(fare) => fare,
            Err(error) => return self.fallback(params, key.as_str(), Some(error)),
        };
        if !fare.is_priced() {
            debug!(key = %key, "pricing providers returned an unpriced fare");
            return self.fallback(params, key.as_str(), None);
        }

        if let Err(error) = self
            .validator
            .check_bounds(&fare, &params.vehicle_id, params.trip_type)
        {
            warn!(key = %key, "{error}; returning fare without caching");
            return FareResolution::new(fare, FareSource::Network).with_error(Some(error));
        }

        if let Err(error) = self.cache.put(params, &fare) {
            warn!(key = %key, "fare cache write failed: {error}");
        }
        if self.record_success(key.as_str(), &fare) {
            self.events.publish(&FareEvent {
                kind: FareEventKind::FareUpdate,
                canonical_id: params.vehicle_id.clone(),
                trip_type: params.trip_type,
                trip_mode: Some(params.trip_mode),
                fare: fare.clone(),
                timestamp: Utc::now(),
                source: Some("network".to_string()),
            });
        }
        FareResolution::new(fare, FareSource::Network)
    }

    /// Fetch sequentially with the configured delay between requests.
    pub async fn fetch_all(
        &self,
        params: &[FareParams],
        force_refresh: bool,
    ) -> Vec<FareResolution> {
        let mut resolutions = Vec::with_capacity(params.len());
        for (index, item) in params.iter().enumerate() {
            if index > 0 && !self.settings.bulk_delay.is_zero() {
                tokio::time::sleep(self.settings.bulk_delay).await;
            }
            resolutions.push(self.fetch(item, force_refresh).await);
        }
        resolutions
    }

    /// Cancel the in-flight request for `params`. Returns `true` if one existed.
    pub fn cancel(&self, params: &FareParams) -> bool {
        let key = params.request_key();
        let in_flight = self
            .state()
            .get_mut(key.as_str())
            .and_then(|state| state.in_flight.take());
        match in_flight {
            Some(in_flight) => {
                debug!(key = %key, generation = in_flight.generation, "cancelling fare request");
                in_flight.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight request. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.state();
        let mut cancelled = 0;
        for key_state in state.values_mut() {
            if let Some(in_flight) = key_state.in_flight.take() {
                in_flight.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(cancelled, "cancelled in-flight fare requests");
        }
        cancelled
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state()
            .values()
            .filter(|state| state.in_flight.is_some())
            .count()
    }

    fn throttled(&self, key: &str) -> Option<FareDetails> {
        let state = self.state();
        let key_state = state.get(key)?;
        let last_success = key_state.last_success_at?;
        if last_success.elapsed() < self.settings.throttle {
            key_state.last_known.clone()
        } else {
            None
        }
    }

    /// A recent cache clear forces readers past the throttle and cache.
    fn clear_pending(&self, key: &str) -> bool {
        match self.cache.force_refresh_pending() {
            Ok(pending) => {
                if pending {
                    debug!(key, "cache recently cleared, forcing refresh");
                }
                pending
            }
            Err(error) => {
                warn!(key, "force refresh flag read failed: {error}");
                false
            }
        }
    }

    fn remember(&self, key: &str, fare: &FareDetails) {
        self.state().entry(key.to_string()).or_default().touch().last_known = Some(fare.clone());
    }

    /// Bump the generation, cancel the superseded request, and spawn a new one.
    fn begin(
        &self,
        key: &str,
        params: &FareParams,
        force_refresh: bool,
    ) -> (u64, JoinHandle<Result<RawFareResponse>>) {
        let mut state = self.state();
        let key_state = state.entry(key.to_string()).or_default().touch();
        key_state.generation += 1;
        let generation = key_state.generation;

        if let Some(previous) = key_state.in_flight.take() {
            debug!(key, superseded = previous.generation, generation, "superseding fare request");
            previous.cancel();
        }

        let token = CancellationToken::new();
        let task_token = token.clone();
        let providers = self.providers.clone();
        let query = params.to_query(force_refresh);
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = task_token.cancelled() => Err(FareError::Cancelled),
                result = providers.fetch(&query) => result,
            }
        });
        key_state.in_flight = Some(InFlight {
            generation,
            token,
            abort: handle.abort_handle(),
        });
        (generation, handle)
    }

    /// Clear the in-flight slot; `false` when a newer generation exists.
    ///
    /// Also drops idle state for other keys.
    fn finish(&self, key: &str, generation: u64) -> bool {
        let mut state = self.state();
        let current = match state.get_mut(key) {
            Some(key_state) => {
                if key_state
                    .in_flight
                    .as_ref()
                    .is_some_and(|in_flight| in_flight.generation == generation)
                {
                    key_state.in_flight = None;
                }
                key_state.generation == generation
            }
            None => false,
        };
        let retention = self.settings.state_retention;
        let before = state.len();
        state.retain(|other, key_state| {
            other.as_str() == key || !key_state.is_idle(retention)
        });
        let pruned = before - state.len();
        if pruned > 0 {
            debug!(pruned, "dropped idle fare request state");
        }
        current
    }

    /// Store the fare as last known. Returns whether an update event is due.
    fn record_success(&self, key: &str, fare: &FareDetails) -> bool {
        let now = Instant::now();
        let mut state = self.state();
        let key_state = state.entry(key.to_string()).or_default().touch();
        key_state.last_success_at = Some(now);
        key_state.last_known = Some(fare.clone());
        let due = key_state
            .last_event_at
            .is_none_or(|last| now.duration_since(last) >= self.settings.event_throttle);
        if due {
            key_state.last_event_at = Some(now);
        } else {
            debug!(key, "fare update event throttled");
        }
        due
    }

    fn last_known(&self, key: &str) -> FareResolution {
        match self.state().get(key).and_then(|state| state.last_known.clone()) {
            Some(fare) => FareResolution::new(fare, FareSource::LastKnown),
            None => FareResolution::new(FareDetails::zero(), FareSource::Placeholder),
        }
    }

    fn fallback(
        &self,
        params: &FareParams,
        key: &str,
        error: Option<FareError>,
    ) -> FareResolution {
        match self.cache.get(params) {
            Ok(Some(fare)) => {
                self.remember(key, &fare);
                return FareResolution::new(fare, FareSource::Cache).with_error(error);
            }
            Ok(None) => {}
            Err(cache_error) => warn!(key, "fare cache read failed: {cache_error}"),
        }
        self.last_known(key).with_error(error)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use fare_pricing_client::{
        FareQuery, OutstationFare, OutstationFareResponse, RawFareResponse,
    };

    use super::{CoordinatorSettings, FareSource, RequestCoordinator};
    use crate::cache::{FareCache, FareCacheSettings};
    use crate::compute::FareComputationEngine;
    use crate::error::{FareError, Result};
    use crate::events::{FareEvent, FareEventBus};
    use crate::provider::{PricingProvider, ProviderChain};
    use crate::store::{MemoryStore, TieredStore};
    use crate::tiers::PricingTierCatalog;
    use crate::types::{CanonicalId, FareParams, TripMode, TripType};
    use crate::validator::ReconciliationValidator;

    struct Step {
        delay: Duration,
        outcome: std::result::Result<f64, FareError>,
    }

    fn ok(base_price: f64) -> Step {
        Step {
            delay: Duration::ZERO,
            outcome: Ok(base_price),
        }
    }

    fn slow(base_price: f64, millis: u64) -> Step {
        Step {
            delay: Duration::from_millis(millis),
            outcome: Ok(base_price),
        }
    }

    fn fail(error: FareError) -> Step {
        Step {
            delay: Duration::ZERO,
            outcome: Err(error),
        }
    }

    /// Replays scripted steps; once exhausted, answers with base price 3900.
    #[derive(Default)]
    struct ScriptedProvider {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PricingProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self, _query: &FareQuery) -> Result<RawFareResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .steps
                .lock()
                .expect("steps")
                .pop_front()
                .unwrap_or_else(|| ok(3_900.0));
            if !step.delay.is_zero() {
                tokio::time::sleep(step.delay).await;
            }
            let base_price = step.outcome?;
            Ok(RawFareResponse::Outstation(OutstationFareResponse {
                status: "success".to_string(),
                fare: OutstationFare {
                    base_price,
                    price_per_km: 13.0,
                    driver_allowance: 250.0,
                    night_halt_charge: None,
                },
            }))
        }
    }

    struct Harness {
        provider: Arc<ScriptedProvider>,
        cache: Arc<FareCache>,
        events: Arc<FareEventBus>,
        coordinator: RequestCoordinator,
    }

    fn harness(steps: Vec<Step>, settings: CoordinatorSettings) -> Harness {
        let provider = ScriptedProvider::new(steps);
        let short = Arc::new(MemoryStore::new());
        let durable = Arc::new(MemoryStore::new());
        let catalog = Arc::new(PricingTierCatalog::new());
        let cache = Arc::new(FareCache::new(
            TieredStore::new(short, durable.clone()),
            FareCacheSettings::default(),
        ));
        let validator = Arc::new(ReconciliationValidator::new(
            durable,
            catalog.clone(),
            50.0,
            Duration::from_secs(15 * 60),
        ));
        let events = Arc::new(FareEventBus::new());
        let coordinator = RequestCoordinator::new(
            Arc::new(ProviderChain::new(vec![provider.clone() as Arc<dyn PricingProvider>])),
            FareComputationEngine::new(catalog),
            validator,
            cache.clone(),
            events.clone(),
            settings,
        );
        Harness {
            provider,
            cache,
            events,
            coordinator,
        }
    }

    fn params(vehicle: &str) -> FareParams {
        FareParams::new(
            CanonicalId::new(vehicle).expect("canonical id"),
            TripType::Outstation,
            120.0,
            TripMode::OneWay,
            None,
        )
    }

    #[tokio::test]
    async fn identical_requests_within_throttle_window_hit_network_once() {
        let h = harness(vec![], CoordinatorSettings::default());
        let p = params("sedan");

        let first = h.coordinator.fetch(&p, false).await;
        let second = h.coordinator.fetch(&p, false).await;

        assert_eq!(first.source, FareSource::Network);
        assert_eq!(first.fare.total_price, 8_050.0);
        assert_eq!(second.source, FareSource::Throttled);
        assert_eq!(second.fare, first.fare);
        assert_eq!(h.provider.calls(), 1);
    }

    #[tokio::test]
    async fn cache_hit_skips_network_and_force_refresh_bypasses_it() {
        let settings = CoordinatorSettings {
            throttle: Duration::ZERO,
            ..CoordinatorSettings::default()
        };
        let h = harness(vec![ok(3_900.0), ok(4_000.0)], settings);
        let p = params("sedan");

        assert_eq!(h.coordinator.fetch(&p, false).await.source, FareSource::Network);
        let cached = h.coordinator.fetch(&p, false).await;
        assert_eq!(cached.source, FareSource::Cache);
        assert_eq!(h.provider.calls(), 1);

        let forced = h.coordinator.fetch(&p, true).await;
        assert_eq!(forced.source, FareSource::Network);
        assert_eq!(forced.fare.total_price, 8_150.0);
        assert_eq!(h.provider.calls(), 2);
    }

    #[tokio::test]
    async fn superseded_response_never_overwrites_newer_result() {
        let h = harness(
            vec![slow(1_000.0, 300), ok(3_900.0)],
            CoordinatorSettings::default(),
        );
        let p = params("sedan");

        let older = h.coordinator.fetch(&p, true);
        let newer = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.coordinator.fetch(&p, true).await
        };
        let (older, newer) = tokio::join!(older, newer);

        assert!(matches!(
            older.error,
            Some(FareError::StaleGenerationDiscarded { generation: 1 })
        ));
        assert_ne!(older.fare.total_price, 5_150.0);
        assert_eq!(newer.source, FareSource::Network);
        assert_eq!(newer.fare.total_price, 8_050.0);
        assert_eq!(
            h.cache.get(&p).expect("cache read").map(|fare| fare.total_price),
            Some(8_050.0)
        );
        assert_eq!(h.coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn late_result_from_older_generation_is_discarded() {
        let h = harness(vec![ok(1_000.0), ok(3_900.0)], CoordinatorSettings::default());
        let p = params("sedan");
        let key = p.request_key();

        let (older, older_task) = h.coordinator.begin(key.as_str(), &p, true);
        older_task.await.expect("older task").expect("older fare");
        let (newer, newer_task) = h.coordinator.begin(key.as_str(), &p, true);
        assert_eq!((older, newer), (1, 2));

        // The older task already completed, so superseding it aborted nothing.
        assert!(!h.coordinator.finish(key.as_str(), older));
        assert_eq!(h.coordinator.in_flight(), 1);
        assert_eq!(h.coordinator.last_known(key.as_str()).source, FareSource::Placeholder);

        newer_task.await.expect("newer task").expect("newer fare");
        assert!(h.coordinator.finish(key.as_str(), newer));
        assert_eq!(h.coordinator.in_flight(), 0);
        assert!(!h.coordinator.finish(key.as_str(), older));
        assert_eq!(h.provider.calls(), 2);
    }

    #[tokio::test]
    async fn cache_clear_forces_next_fetch_past_throttle() {
        let h = harness(vec![ok(3_900.0), ok(4_000.0)], CoordinatorSettings::default());
        let p = params("sedan");

        assert_eq!(h.coordinator.fetch(&p, false).await.source, FareSource::Network);
        assert_eq!(h.coordinator.fetch(&p, false).await.source, FareSource::Throttled);
        assert_eq!(h.provider.calls(), 1);

        h.cache.clear().expect("clear");
        let refreshed = h.coordinator.fetch(&p, false).await;
        assert_eq!(refreshed.source, FareSource::Network);
        assert_eq!(refreshed.fare.total_price, 8_150.0);
        assert_eq!(h.provider.calls(), 2);
    }

    #[tokio::test]
    async fn idle_key_state_is_pruned_after_retention() {
        let settings = CoordinatorSettings {
            state_retention: Duration::from_millis(50),
            ..CoordinatorSettings::default()
        };
        let h = harness(vec![], settings);

        h.coordinator.fetch(&params("sedan"), true).await;
        h.coordinator.fetch(&params("ertiga"), true).await;
        assert_eq!(h.coordinator.state().len(), 2);

        tokio::time::sleep(Duration::from_millis(80)).await;
        h.coordinator.fetch(&params("luxury"), true).await;
        let state = h.coordinator.state();
        assert_eq!(state.len(), 1);
        assert!(state.contains_key(params("luxury").request_key().as_str()));
    }

    #[tokio::test]
    async fn explicit_cancel_resolves_to_last_known_value() {
        let settings = CoordinatorSettings {
            throttle: Duration::ZERO,
            ..CoordinatorSettings::default()
        };
        let h = harness(vec![ok(3_900.0), slow(1_000.0, 500)], settings);
        let p = params("sedan");
        h.coordinator.fetch(&p, false).await;

        let pending = h.coordinator.fetch(&p, true);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            h.coordinator.cancel(&p)
        };
        let (resolution, cancelled) = tokio::join!(pending, cancel);

        assert!(cancelled);
        assert_eq!(resolution.source, FareSource::LastKnown);
        assert_eq!(resolution.fare.total_price, 8_050.0);
        assert_eq!(resolution.error, Some(FareError::Cancelled));
        assert!(resolution.into_result().is_ok());
        assert!(!h.coordinator.cancel(&p));
    }

    #[tokio::test]
    async fn cancel_all_reports_each_in_flight_request() {
        let h = harness(
            vec![slow(1_000.0, 500), slow(1_000.0, 500)],
            CoordinatorSettings::default(),
        );
        let sedan = params("sedan");
        let ertiga = params("ertiga");

        let first = h.coordinator.fetch(&sedan, true);
        let second = h.coordinator.fetch(&ertiga, true);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            h.coordinator.cancel_all()
        };
        let (first, second, cancelled) = tokio::join!(first, second, cancel);

        assert_eq!(cancelled, 2);
        assert_eq!(first.source, FareSource::Placeholder);
        assert_eq!(second.error, Some(FareError::Cancelled));
    }

    #[tokio::test]
    async fn failures_fall_back_to_cache_then_placeholder() {
        let h = harness(
            vec![
                fail(FareError::Provider("timeout".to_string())),
                ok(3_900.0),
                fail(FareError::MalformedResponse("<br />".to_string())),
            ],
            CoordinatorSettings::default(),
        );
        let p = params("sedan");

        let placeholder = h.coordinator.fetch(&p, true).await;
        assert_eq!(placeholder.source, FareSource::Placeholder);
        assert!(!placeholder.fare.is_priced());
        assert!(placeholder.clone().into_result().is_ok());

        h.coordinator.fetch(&p, true).await;
        let malformed = h.coordinator.fetch(&p, true).await;
        assert_eq!(malformed.source, FareSource::Cache);
        assert_eq!(malformed.fare.total_price, 8_050.0);
        assert!(matches!(
            malformed.into_result(),
            Err(FareError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn out_of_bounds_fare_is_returned_but_not_cached() {
        let h = harness(vec![ok(90_000.0)], CoordinatorSettings::default());
        let p = params("sedan");

        let resolution = h.coordinator.fetch(&p, false).await;
        assert_eq!(resolution.source, FareSource::Network);
        assert_eq!(resolution.fare.total_price, 94_150.0);
        assert!(matches!(resolution.error, Some(FareError::OutOfBounds { .. })));
        assert_eq!(h.cache.get(&p).expect("cache read"), None);
    }

    #[tokio::test]
    async fn update_events_are_rate_limited_per_key() {
        let settings = CoordinatorSettings {
            throttle: Duration::ZERO,
            ..CoordinatorSettings::default()
        };
        let h = harness(vec![], settings);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        h.events.on_fare_updated(Arc::new(move |_event: &FareEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        h.coordinator.fetch(&params("sedan"), true).await;
        h.coordinator.fetch(&params("sedan"), true).await;
        h.coordinator.fetch(&params("ertiga"), true).await;

        assert_eq!(h.provider.calls(), 3);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_all_is_sequential_and_ordered() {
        let settings = CoordinatorSettings {
            bulk_delay: Duration::from_millis(20),
            ..CoordinatorSettings::default()
        };
        let h = harness(vec![ok(3_900.0), ok(4_000.0), ok(4_100.0)], settings);
        let batch = vec![params("sedan"), params("ertiga"), params("luxury")];

        let started = tokio::time::Instant::now();
        let resolutions = h.coordinator.fetch_all(&batch, false).await;

        assert!(started.elapsed() >= Duration::from_millis(40));
        let totals = resolutions
            .iter()
            .map(|resolution| resolution.fare.total_price)
            .collect::<Vec<_>>();
        assert_eq!(totals, vec![8_050.0, 8_150.0, 8_250.0]);
        assert_eq!(h.provider.calls(), 3);
    }
}
