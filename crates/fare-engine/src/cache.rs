//! TTL fare cache mirrored across the short-lived and durable tiers.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FareError, Result};
use crate::store::{KeyValueStore, TieredStore};
use crate::types::{CacheEntry, CanonicalId, FareDetails, FareParams, TripType};
use crate::validator::{ReconciliationValidator, VALIDATED_KEY_PREFIX};

pub const FARE_KEY_PREFIX: &str = "fare_";
pub const FORCE_REFRESH_KEY: &str = "force_fare_refresh";
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_CLEAR_COOLDOWN: Duration = Duration::from_secs(30);
pub const DEFAULT_FORCE_REFRESH_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FareCacheSettings {
    pub ttl: Duration,
    pub clear_cooldown: Duration,
    pub force_refresh_window: Duration,
}

impl Default for FareCacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            clear_cooldown: DEFAULT_CLEAR_COOLDOWN,
            force_refresh_window: DEFAULT_FORCE_REFRESH_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClearOutcome {
    Cleared { removed: usize },
    Throttled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ForceRefreshFlag {
    timestamp: i64,
    until: i64,
}

#[derive(Debug)]
pub struct FareCache {
    tiers: TieredStore,
    settings: FareCacheSettings,
    last_clear: Mutex<Option<DateTime<Utc>>>,
}

impl FareCache {
    #[must_use]
    pub fn new(tiers: TieredStore, settings: FareCacheSettings) -> Self {
        Self {
            tiers,
            settings,
            last_clear: Mutex::new(None),
        }
    }

    /// `fare_<trip>_<vehicle>_<distance>_<mode>_<package>_<YYYYMMDD>`.
    #[must_use]
    pub fn cache_key(params: &FareParams, now: DateTime<Utc>) -> String {
        format!(
            "{FARE_KEY_PREFIX}{}_{}",
            params.request_key(),
            now.format("%Y%m%d")
        )
    }

    pub fn get(&self, params: &FareParams) -> Result<Option<FareDetails>> {
        self.get_at(params, Utc::now())
    }

    pub fn get_at(&self, params: &FareParams, now: DateTime<Utc>) -> Result<Option<FareDetails>> {
        let key = Self::cache_key(params, now);
        let entry = self.reconcile_at(key.as_str(), &params.vehicle_id, params.trip_type, now)?;
        match entry {
            Some(entry) => {
                debug!(key = %key, "fare cache hit");
                Ok(Some(entry.fare))
            }
            None => {
                debug!(key = %key, "fare cache miss");
                Ok(None)
            }
        }
    }

    pub fn put(&self, params: &FareParams, fare: &FareDetails) -> Result<bool> {
        self.put_at(params, fare, Utc::now())
    }

    /// Store a priced fare in both tiers. Returns `false` when nothing was
    /// written: the fare is unpriced or a newer valid entry already exists.
    pub fn put_at(
        &self,
        params: &FareParams,
        fare: &FareDetails,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !fare.is_priced() {
            debug!(vehicle = %params.vehicle_id, "refusing to cache unpriced fare");
            return Ok(false);
        }
        let key = Self::cache_key(params, now);
        let existing = self.reconcile_at(key.as_str(), &params.vehicle_id, params.trip_type, now)?;
        if let Some(existing) = existing
            && existing.timestamp > now.timestamp_millis()
        {
            debug!(key = %key, "newer fare already cached, keeping it");
            return Ok(false);
        }
        let entry =
            ReconciliationValidator::seal(fare.clone(), &params.vehicle_id, params.trip_type, now);
        self.tiers.set_both(key.as_str(), entry.encode()?.as_str())?;
        Ok(true)
    }

    /// Resolve `key` across both tiers.
    ///
    /// Entries failing checksum or TTL are removed from their tier. The
    /// newest surviving entry wins and is mirrored into the other tier.
    pub fn reconcile_at(
        &self,
        key: &str,
        id: &CanonicalId,
        trip_type: TripType,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        let short = self.valid_entry(self.tiers.short.as_ref(), "short", key, id, trip_type, now)?;
        let durable =
            self.valid_entry(self.tiers.durable.as_ref(), "durable", key, id, trip_type, now)?;

        let winner = match (short, durable) {
            (None, None) => return Ok(None),
            (Some(short), None) => {
                self.tiers.durable.set(key, short.encode()?.as_str())?;
                short
            }
            (None, Some(durable)) => {
                self.tiers.short.set(key, durable.encode()?.as_str())?;
                durable
            }
            (Some(short), Some(durable)) => {
                if short.timestamp > durable.timestamp {
                    self.tiers.durable.set(key, short.encode()?.as_str())?;
                    short
                } else {
                    if short.timestamp < durable.timestamp || short != durable {
                        self.tiers.short.set(key, durable.encode()?.as_str())?;
                    }
                    durable
                }
            }
        };
        Ok(Some(winner))
    }

    fn valid_entry(
        &self,
        store: &dyn KeyValueStore,
        tier: &'static str,
        key: &str,
        id: &CanonicalId,
        trip_type: TripType,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        let Some(raw) = store.get(key)? else {
            return Ok(None);
        };
        let Some(entry) = CacheEntry::decode(raw.as_str()) else {
            warn!(key = %key, tier, "undecodable fare cache entry, evicting");
            store.remove(key)?;
            return Ok(None);
        };
        if !ReconciliationValidator::verify(&entry, id, trip_type) {
            let mismatch = FareError::ChecksumMismatch {
                key: key.to_string(),
            };
            warn!(tier, "{mismatch}, evicting");
            store.remove(key)?;
            return Ok(None);
        }
        if now.timestamp_millis() - entry.timestamp >= duration_ms(self.settings.ttl) {
            debug!(key = %key, tier, "fare cache entry expired, evicting");
            store.remove(key)?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub fn clear(&self) -> Result<ClearOutcome> {
        self.clear_at(Utc::now())
    }

    /// Remove every fare and validated-fare key. Throttled globally.
    pub fn clear_at(&self, now: DateTime<Utc>) -> Result<ClearOutcome> {
        let mut last_clear = self
            .last_clear
            .lock()
            .map_err(|_| FareError::Storage("cache clear lock poisoned".to_string()))?;
        if let Some(previous) = *last_clear {
            let elapsed = now.timestamp_millis() - previous.timestamp_millis();
            if elapsed < duration_ms(self.settings.clear_cooldown) {
                debug!(elapsed_ms = elapsed, "fare cache clear throttled");
                return Ok(ClearOutcome::Throttled);
            }
        }

        let removed = self.remove_matching(|key| {
            key.starts_with(FARE_KEY_PREFIX) || key.starts_with(VALIDATED_KEY_PREFIX)
        })?;
        *last_clear = Some(now);
        self.set_force_refresh(now)?;
        info!(removed, "fare cache cleared");
        Ok(ClearOutcome::Cleared { removed })
    }

    pub fn clear_for(&self, trip_type: TripType) -> Result<usize> {
        self.clear_for_at(trip_type, Utc::now())
    }

    /// Remove one trip type's keys. Not subject to the clear cooldown.
    pub fn clear_for_at(&self, trip_type: TripType, now: DateTime<Utc>) -> Result<usize> {
        let fare_prefix = format!("{FARE_KEY_PREFIX}{trip_type}_");
        let validated_suffix = format!("_{trip_type}");
        let removed = self.remove_matching(|key| {
            key.starts_with(fare_prefix.as_str())
                || (key.starts_with(VALIDATED_KEY_PREFIX) && key.ends_with(validated_suffix.as_str()))
        })?;
        self.set_force_refresh(now)?;
        info!(trip = %trip_type, removed, "fare cache cleared for trip type");
        Ok(removed)
    }

    pub fn force_refresh_pending(&self) -> Result<bool> {
        self.force_refresh_pending_at(Utc::now())
    }

    /// Whether a clear happened within the force-refresh window.
    pub fn force_refresh_pending_at(&self, now: DateTime<Utc>) -> Result<bool> {
        let raw = match self.tiers.short.get(FORCE_REFRESH_KEY)? {
            Some(raw) => Some(raw),
            None => self.tiers.durable.get(FORCE_REFRESH_KEY)?,
        };
        let Some(flag) = raw.and_then(|raw| serde_json::from_str::<ForceRefreshFlag>(&raw).ok())
        else {
            return Ok(false);
        };
        if now.timestamp_millis() < flag.until {
            return Ok(true);
        }
        self.tiers.remove_both(FORCE_REFRESH_KEY)?;
        Ok(false)
    }

    fn set_force_refresh(&self, now: DateTime<Utc>) -> Result<()> {
        let timestamp = now.timestamp_millis();
        let flag = ForceRefreshFlag {
            timestamp,
            until: timestamp + duration_ms(self.settings.force_refresh_window),
        };
        self.tiers
            .set_both(FORCE_REFRESH_KEY, serde_json::to_string(&flag)?.as_str())
    }

    fn remove_matching(&self, matches: impl Fn(&str) -> bool) -> Result<usize> {
        let mut removed = 0;
        for key in self.tiers.keys()? {
            if matches(key.as_str()) {
                self.tiers.remove_both(key.as_str())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

pub(crate) fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
