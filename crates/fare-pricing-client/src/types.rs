use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const STATUS_SUCCESS: &str = "success";
pub const DEFAULT_LOCAL_PACKAGE_ID: &str = "8hrs-80km";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TripType {
    Local,
    Outstation,
    Airport,
    Tour,
}

impl TripType {
    pub const ALL: [Self; 4] = [Self::Local, Self::Outstation, Self::Airport, Self::Tour];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Outstation => "outstation",
            Self::Airport => "airport",
            Self::Tour => "tour",
        }
    }
}

impl fmt::Display for TripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "outstation" => Ok(Self::Outstation),
            "airport" => Ok(Self::Airport),
            "tour" => Ok(Self::Tour),
            other => Err(format!("unknown trip type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripMode {
    #[serde(rename = "one-way", alias = "one_way", alias = "oneway")]
    OneWay,
    #[serde(rename = "round-trip", alias = "round_trip", alias = "roundtrip")]
    RoundTrip,
}

impl TripMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneWay => "one-way",
            Self::RoundTrip => "round-trip",
        }
    }
}

impl fmt::Display for TripMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "one-way" | "oneway" => Ok(Self::OneWay),
            "round-trip" | "roundtrip" => Ok(Self::RoundTrip),
            other => Err(format!("unknown trip mode: {other}")),
        }
    }
}

/// One pricing lookup as sent to the Pricing Service.
#[derive(Debug, Clone, PartialEq)]
pub struct FareQuery {
    pub vehicle_id: String,
    pub trip_type: TripType,
    pub distance_km: f64,
    pub trip_mode: TripMode,
    pub package_id: Option<String>,
    pub force_refresh: bool,
}

impl FareQuery {
    /// Query-string pairs for this lookup. `cache_buster_ms` lands in `_t`.
    #[must_use]
    pub fn query_pairs(&self, cache_buster_ms: i64) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("vehicle_id", self.vehicle_id.trim().to_string()),
            ("distance", format_distance(self.distance_km)),
            ("trip_mode", self.trip_mode.as_str().to_string()),
        ];
        if self.trip_type == TripType::Local {
            let package_id = self
                .package_id
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_LOCAL_PACKAGE_ID);
            pairs.push(("package_id", package_id.to_string()));
        }
        pairs.push(("forceRefresh", self.force_refresh.to_string()));
        pairs.push(("_t", cache_buster_ms.to_string()));
        pairs
    }
}

#[must_use]
pub fn format_distance(distance_km: f64) -> String {
    if distance_km.fract() == 0.0 {
        format!("{}", distance_km as i64)
    } else {
        format!("{distance_km:.1}")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFareRecord {
    #[serde(alias = "vehicle_id", alias = "id")]
    pub vehicle_id: String,
    #[serde(default, alias = "price_4hrs_40km", deserialize_with = "lenient_f64")]
    pub price4hrs40km: f64,
    #[serde(default, alias = "price_8hrs_80km", deserialize_with = "lenient_f64")]
    pub price8hrs80km: f64,
    #[serde(default, alias = "price_10hrs_100km", deserialize_with = "lenient_f64")]
    pub price10hrs100km: f64,
    #[serde(default, alias = "price_extra_km", deserialize_with = "lenient_f64")]
    pub price_extra_km: f64,
    #[serde(default, alias = "price_extra_hour", deserialize_with = "lenient_f64")]
    pub price_extra_hour: f64,
}

impl LocalFareRecord {
    /// Package price for ids like `8hrs-80km`; `None` for unknown packages.
    #[must_use]
    pub fn package_price(&self, package_id: &str) -> Option<f64> {
        match package_id.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "4hrs-40km" => Some(self.price4hrs40km),
            "8hrs-80km" => Some(self.price8hrs80km),
            "10hrs-100km" => Some(self.price10hrs100km),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocalFaresResponse {
    pub status: String,
    #[serde(default)]
    pub fares: Vec<LocalFareRecord>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstationFare {
    #[serde(alias = "base_price", deserialize_with = "lenient_f64")]
    pub base_price: f64,
    #[serde(alias = "price_per_km", deserialize_with = "lenient_f64")]
    pub price_per_km: f64,
    #[serde(default, alias = "driver_allowance", deserialize_with = "lenient_f64")]
    pub driver_allowance: f64,
    #[serde(
        default,
        alias = "night_halt_charge",
        deserialize_with = "lenient_opt_f64"
    )]
    pub night_halt_charge: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutstationFareResponse {
    pub status: String,
    pub fare: OutstationFare,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirportFare {
    #[serde(default, alias = "tier1_price", deserialize_with = "lenient_f64")]
    pub tier1_price: f64,
    #[serde(default, alias = "tier2_price", deserialize_with = "lenient_f64")]
    pub tier2_price: f64,
    #[serde(default, alias = "tier3_price", deserialize_with = "lenient_f64")]
    pub tier3_price: f64,
    #[serde(default, alias = "tier4_price", deserialize_with = "lenient_f64")]
    pub tier4_price: f64,
    #[serde(default, alias = "extra_km_charge", deserialize_with = "lenient_f64")]
    pub extra_km_charge: f64,
    #[serde(default, alias = "airport_fee", deserialize_with = "lenient_f64")]
    pub airport_fee: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AirportFareResponse {
    pub status: String,
    pub fare: AirportFare,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourFare {
    #[serde(deserialize_with = "lenient_f64")]
    pub price: f64,
    #[serde(default, alias = "tour_id")]
    pub tour_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TourFareResponse {
    pub status: String,
    #[serde(rename = "tourFare", alias = "tour_fare")]
    pub tour_fare: TourFare,
}

/// Raw Pricing Service payload, one shape per trip type.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFareResponse {
    Local(LocalFaresResponse),
    Outstation(OutstationFareResponse),
    Airport(AirportFareResponse),
    Tour(TourFareResponse),
}

impl RawFareResponse {
    #[must_use]
    pub fn trip_type(&self) -> TripType {
        match self {
            Self::Local(_) => TripType::Local,
            Self::Outstation(_) => TripType::Outstation,
            Self::Airport(_) => TripType::Airport,
            Self::Tour(_) => TripType::Tour,
        }
    }

    #[must_use]
    pub fn status(&self) -> &str {
        match self {
            Self::Local(response) => response.status.as_str(),
            Self::Outstation(response) => response.status.as_str(),
            Self::Airport(response) => response.status.as_str(),
            Self::Tour(response) => response.status.as_str(),
        }
    }
}

// PHP backends frequently send numbers as strings.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_opt_f64(deserializer).map(|value| value.unwrap_or(0.0))
}

fn lenient_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(number) => Ok(number.as_f64()),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid number: {trimmed}")))
        }
        other => Err(serde::de::Error::custom(format!(
            "expected number, got {other}"
        ))),
    }
}
