use std::collections::BTreeMap;
use std::fmt;

use fare_pricing_client::{DEFAULT_LOCAL_PACKAGE_ID, FareQuery, format_distance};
use serde::{Deserialize, Serialize};

pub use fare_pricing_client::{TripMode, TripType};

use crate::error::{FareError, Result};

/// A resolved, never purely numeric vehicle identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Wrap an already-normalised id. Empty and all-digit values are rejected.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(FareError::InvalidVehicleId("empty vehicle id".to_string()));
        }
        if is_numeric_id(value.as_str()) {
            return Err(FareError::InvalidVehicleId(value));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl TryFrom<String> for CanonicalId {
    type Error = FareError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CanonicalId> for String {
    fn from(value: CanonicalId) -> Self {
        value.0
    }
}

pub(crate) fn is_numeric_id(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|byte| byte.is_ascii_digit())
}

/// UI-facing fare request carrying a raw, unresolved vehicle id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareRequest {
    pub vehicle_id: String,
    pub trip_type: TripType,
    pub distance_km: f64,
    pub trip_mode: TripMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
}

/// Immutable pricing query with a canonical vehicle id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareParams {
    pub vehicle_id: CanonicalId,
    pub trip_type: TripType,
    pub distance_km: f64,
    pub trip_mode: TripMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
}

impl FareParams {
    #[must_use]
    pub fn new(
        vehicle_id: CanonicalId,
        trip_type: TripType,
        distance_km: f64,
        trip_mode: TripMode,
        package_id: Option<String>,
    ) -> Self {
        Self {
            vehicle_id,
            trip_type,
            distance_km,
            trip_mode,
            package_id,
        }
    }

    /// Distance rounded to 0.1 km; negative and non-finite values become 0.
    #[must_use]
    pub fn normalized_distance(&self) -> f64 {
        if !self.distance_km.is_finite() || self.distance_km <= 0.0 {
            return 0.0;
        }
        (self.distance_km * 10.0).round() / 10.0
    }

    /// Package id used for pricing. Only local trips carry one.
    #[must_use]
    pub fn effective_package(&self) -> Option<String> {
        if self.trip_type != TripType::Local {
            return None;
        }
        let package = self
            .package_id
            .as_deref()
            .map(|value| value.trim().to_ascii_lowercase().replace('_', "-"))
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_LOCAL_PACKAGE_ID.to_string());
        Some(package)
    }

    /// Key identifying this query across coordinator and cache.
    #[must_use]
    pub fn request_key(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.trip_type,
            self.vehicle_id,
            format_distance(self.normalized_distance()),
            self.trip_mode,
            self.effective_package().as_deref().unwrap_or("none"),
        )
    }

    #[must_use]
    pub fn to_query(&self, force_refresh: bool) -> FareQuery {
        FareQuery {
            vehicle_id: self.vehicle_id.to_string(),
            trip_type: self.trip_type,
            distance_km: self.normalized_distance(),
            trip_mode: self.trip_mode,
            package_id: self.effective_package(),
            force_refresh,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BreakdownValue {
    Number(f64),
    Text(String),
}

impl From<f64> for BreakdownValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for BreakdownValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Computed fare. A `total_price` of zero means unpriced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FareDetails {
    pub base_price: f64,
    pub total_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_km_charge: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_allowance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub night_halt_charge: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_price: Option<f64>,
    #[serde(default)]
    pub breakdown: BTreeMap<String, BreakdownValue>,
}

impl FareDetails {
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_priced(&self) -> bool {
        self.total_price.is_finite() && self.total_price > 0.0
    }
}

/// Persisted `{ timestamp, fare, checksum }` record.
///
/// `timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub timestamp: i64,
    pub fare: FareDetails,
    pub checksum: String,
}

impl CacheEntry {
    /// Decode a stored value. Undecodable values yield `None`.
    #[must_use]
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
