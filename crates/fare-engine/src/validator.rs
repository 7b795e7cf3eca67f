//! Checksums, sanity bounds, and cross-step fare reconciliation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::duration_ms;
use crate::error::{FareError, Result};
use crate::store::KeyValueStore;
use crate::tiers::PricingTierCatalog;
use crate::types::{CacheEntry, CanonicalId, FareDetails, TripType};

const CHECKSUM_PREFIX: &str = "fc1:";
pub const VALIDATED_KEY_PREFIX: &str = "valid_fare_";
pub const DEFAULT_DRIFT_TOLERANCE: f64 = 50.0;

/// Result of reconciling a fresh fare against the confirmed one.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// The candidate was accepted and recorded as the confirmed fare.
    Validated(FareDetails),
    /// The previously confirmed fare was kept.
    Reconciled { fare: FareDetails, drift: f64 },
}

impl Reconciliation {
    #[must_use]
    pub fn fare(&self) -> &FareDetails {
        match self {
            Self::Validated(fare) | Self::Reconciled { fare, .. } => fare,
        }
    }

    #[must_use]
    pub fn into_fare(self) -> FareDetails {
        match self {
            Self::Validated(fare) | Self::Reconciled { fare, .. } => fare,
        }
    }

    #[must_use]
    pub fn source(&self) -> &'static str {
        match self {
            Self::Validated(_) => "validated",
            Self::Reconciled { .. } => "reconciled",
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationValidator {
    durable: Arc<dyn KeyValueStore>,
    catalog: Arc<PricingTierCatalog>,
    tolerance: f64,
    ttl: Duration,
}

impl std::fmt::Debug for ReconciliationValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationValidator")
            .field("tolerance", &self.tolerance)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ReconciliationValidator {
    #[must_use]
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        catalog: Arc<PricingTierCatalog>,
        tolerance: f64,
        ttl: Duration,
    ) -> Self {
        Self {
            durable,
            catalog,
            tolerance: tolerance.abs(),
            ttl,
        }
    }

    /// Deterministic, order-sensitive integrity tag. Not a security control.
    #[must_use]
    pub fn checksum(fare: &FareDetails, id: &CanonicalId, trip_type: TripType) -> String {
        let material = format!("{:.2}|{}|{}", fare.total_price, id, trip_type);
        let digest = Sha256::digest(material.as_bytes());
        format!("{CHECKSUM_PREFIX}{}", hex::encode(&digest[..8]))
    }

    #[must_use]
    pub fn verify(entry: &CacheEntry, id: &CanonicalId, trip_type: TripType) -> bool {
        entry.checksum == Self::checksum(&entry.fare, id, trip_type)
    }

    #[must_use]
    pub fn seal(
        fare: FareDetails,
        id: &CanonicalId,
        trip_type: TripType,
        now: DateTime<Utc>,
    ) -> CacheEntry {
        let checksum = Self::checksum(&fare, id, trip_type);
        CacheEntry {
            timestamp: now.timestamp_millis(),
            fare,
            checksum,
        }
    }

    #[must_use]
    pub fn validated_key(id: &CanonicalId, trip_type: TripType) -> String {
        format!("{VALIDATED_KEY_PREFIX}{id}_{trip_type}")
    }

    pub fn validated(&self, id: &CanonicalId, trip_type: TripType) -> Result<Option<CacheEntry>> {
        self.validated_at(id, trip_type, Utc::now())
    }

    /// The confirmed fare for this vehicle and trip type, if its checksum
    /// holds and it is younger than the TTL.
    ///
    /// Records that fail either check are removed.
    pub fn validated_at(
        &self,
        id: &CanonicalId,
        trip_type: TripType,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        let key = Self::validated_key(id, trip_type);
        let Some(raw) = self.durable.get(key.as_str())? else {
            return Ok(None);
        };
        let entry = match CacheEntry::decode(raw.as_str()) {
            Some(entry) if Self::verify(&entry, id, trip_type) => entry,
            _ => {
                warn!(key = %key, "validated fare failed checksum, discarding");
                self.durable.remove(key.as_str())?;
                return Ok(None);
            }
        };
        if now.timestamp_millis() - entry.timestamp >= duration_ms(self.ttl) {
            debug!(key = %key, "validated fare expired, discarding");
            self.durable.remove(key.as_str())?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub fn record_validated(
        &self,
        fare: &FareDetails,
        id: &CanonicalId,
        trip_type: TripType,
    ) -> Result<()> {
        self.record_validated_at(fare, id, trip_type, Utc::now())
    }

    pub fn record_validated_at(
        &self,
        fare: &FareDetails,
        id: &CanonicalId,
        trip_type: TripType,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !fare.is_priced() {
            return Ok(());
        }
        let entry = Self::seal(fare.clone(), id, trip_type, now);
        self.durable
            .set(Self::validated_key(id, trip_type).as_str(), entry.encode()?.as_str())
    }

    pub fn reconcile(
        &self,
        candidate: FareDetails,
        id: &CanonicalId,
        trip_type: TripType,
    ) -> Result<Reconciliation> {
        self.reconcile_at(candidate, id, trip_type, Utc::now())
    }

    /// Compare `candidate` against the confirmed fare.
    ///
    /// Drift beyond the tolerance keeps the confirmed fare; otherwise the
    /// candidate becomes the confirmed fare. Unpriced candidates never
    /// replace a confirmed fare.
    pub fn reconcile_at(
        &self,
        candidate: FareDetails,
        id: &CanonicalId,
        trip_type: TripType,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation> {
        let Some(prior) = self.validated_at(id, trip_type, now)? else {
            self.record_validated_at(&candidate, id, trip_type, now)?;
            return Ok(Reconciliation::Validated(candidate));
        };

        let drift = (candidate.total_price - prior.fare.total_price).abs();
        if !candidate.is_priced() {
            debug!(vehicle = %id, trip = %trip_type, "unpriced candidate, keeping confirmed fare");
            return Ok(Reconciliation::Reconciled {
                fare: prior.fare,
                drift,
            });
        }
        if drift > self.tolerance {
            warn!(
                vehicle = %id,
                trip = %trip_type,
                confirmed = prior.fare.total_price,
                candidate = candidate.total_price,
                drift,
                "fare drift exceeds tolerance, keeping confirmed fare"
            );
            return Ok(Reconciliation::Reconciled {
                fare: prior.fare,
                drift,
            });
        }

        self.record_validated_at(&candidate, id, trip_type, now)?;
        Ok(Reconciliation::Validated(candidate))
    }

    /// Sanity-check a priced fare against its category range.
    pub fn check_bounds(
        &self,
        fare: &FareDetails,
        id: &CanonicalId,
        trip_type: TripType,
    ) -> Result<()> {
        let (min, max) = self.catalog.valid_range(id, trip_type);
        let total = fare.total_price;
        if total < min || total > max {
            return Err(FareError::OutOfBounds { total, min, max });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::{Reconciliation, ReconciliationValidator};
    use crate::error::FareError;
    use crate::store::{KeyValueStore, MemoryStore};
    use crate::tiers::PricingTierCatalog;
    use crate::types::{CanonicalId, FareDetails, TripType};

    fn fare(total: f64) -> FareDetails {
        FareDetails {
            base_price: total,
            total_price: total,
            ..FareDetails::default()
        }
    }

    fn sedan() -> CanonicalId {
        CanonicalId::new("sedan").expect("canonical id")
    }

    fn validator(store: Arc<MemoryStore>) -> ReconciliationValidator {
        ReconciliationValidator::new(
            store,
            Arc::new(PricingTierCatalog::new()),
            50.0,
            Duration::from_secs(15 * 60),
        )
    }

    #[test]
    fn checksum_is_deterministic_and_input_sensitive() {
        let id = sedan();
        let a = ReconciliationValidator::checksum(&fare(8_050.0), &id, TripType::Outstation);
        let b = ReconciliationValidator::checksum(&fare(8_050.0), &id, TripType::Outstation);
        assert_eq!(a, b);
        assert!(a.starts_with("fc1:"));
        assert_eq!(a.len(), 4 + 16);
        assert_ne!(
            a,
            ReconciliationValidator::checksum(&fare(8_051.0), &id, TripType::Outstation)
        );
        assert_ne!(
            a,
            ReconciliationValidator::checksum(&fare(8_050.0), &id, TripType::Airport)
        );
    }

    #[test]
    fn reconcile_keeps_confirmed_fare_when_drift_exceeds_tolerance() {
        let store = Arc::new(MemoryStore::new());
        let validator = validator(store);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("time");
        let id = sedan();

        let first = validator
            .reconcile_at(fare(8_050.0), &id, TripType::Outstation, now)
            .expect("reconcile");
        assert_eq!(first, Reconciliation::Validated(fare(8_050.0)));

        let small = validator
            .reconcile_at(fare(8_090.0), &id, TripType::Outstation, now)
            .expect("reconcile");
        assert_eq!(small.source(), "validated");

        let large = validator
            .reconcile_at(fare(9_000.0), &id, TripType::Outstation, now)
            .expect("reconcile");
        assert_eq!(large.source(), "reconciled");
        assert_eq!(large.fare().total_price, 8_090.0);

        let unpriced = validator
            .reconcile_at(FareDetails::zero(), &id, TripType::Outstation, now)
            .expect("reconcile");
        assert_eq!(unpriced.into_fare().total_price, 8_090.0);
    }

    #[test]
    fn tampered_validated_record_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        let validator = validator(store.clone());
        let id = sedan();
        validator
            .record_validated(&fare(2_400.0), &id, TripType::Local)
            .expect("record");

        let key = ReconciliationValidator::validated_key(&id, TripType::Local);
        assert_eq!(key, "valid_fare_sedan_local");
        let raw = store.get(key.as_str()).expect("get").expect("record present");
        store
            .set(key.as_str(), raw.replace("2400", "240").as_str())
            .expect("tamper");

        assert!(validator.validated(&id, TripType::Local).expect("validated").is_none());
        assert!(store.get(key.as_str()).expect("get").is_none());
    }

    #[test]
    fn expired_confirmed_fare_no_longer_pins_fresh_quotes() {
        let store = Arc::new(MemoryStore::new());
        let validator = validator(store.clone());
        let id = sedan();
        let confirmed_at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("time");
        validator
            .record_validated_at(&fare(8_050.0), &id, TripType::Outstation, confirmed_at)
            .expect("record");

        let within_ttl = confirmed_at + chrono::Duration::minutes(10);
        let pinned = validator
            .reconcile_at(fare(17_150.0), &id, TripType::Outstation, within_ttl)
            .expect("reconcile");
        assert_eq!(pinned.source(), "reconciled");
        assert_eq!(pinned.fare().total_price, 8_050.0);

        let days_later = confirmed_at + chrono::Duration::days(3);
        assert!(
            validator
                .validated_at(&id, TripType::Outstation, days_later)
                .expect("validated")
                .is_none()
        );
        let key = ReconciliationValidator::validated_key(&id, TripType::Outstation);
        assert!(store.get(key.as_str()).expect("get").is_none());

        let fresh = validator
            .reconcile_at(fare(17_150.0), &id, TripType::Outstation, days_later)
            .expect("reconcile");
        assert_eq!(fresh, Reconciliation::Validated(fare(17_150.0)));
        assert_eq!(
            validator
                .validated_at(&id, TripType::Outstation, days_later)
                .expect("validated")
                .map(|entry| entry.fare.total_price),
            Some(17_150.0)
        );
    }

    #[test]
    fn bounds_flag_implausible_totals() {
        let validator = validator(Arc::new(MemoryStore::new()));
        let id = sedan();
        assert!(validator.check_bounds(&fare(8_050.0), &id, TripType::Outstation).is_ok());
        assert!(matches!(
            validator.check_bounds(&fare(90_000.0), &id, TripType::Outstation),
            Err(FareError::OutOfBounds { max, .. }) if max == 20_000.0
        ));
    }
}
