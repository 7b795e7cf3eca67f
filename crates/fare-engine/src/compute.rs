//! Trip-type pricing formulas over raw Pricing Service payloads.

use std::collections::BTreeMap;
use std::sync::Arc;

use fare_pricing_client::{
    AirportFare, LocalFaresResponse, OutstationFare, RawFareResponse, TourFare,
};

use crate::error::{FareError, Result};
use crate::tiers::PricingTierCatalog;
use crate::types::{BreakdownValue, FareDetails, FareParams};

pub const OUTSTATION_MIN_DISTANCE_KM: f64 = 300.0;
const AIRPORT_TIER1_MAX_KM: f64 = 10.0;
const AIRPORT_TIER2_MAX_KM: f64 = 20.0;
const AIRPORT_TIER3_MAX_KM: f64 = 30.0;

/// Pure fare computation. No I/O and no caching.
#[derive(Debug, Clone, Default)]
pub struct FareComputationEngine {
    catalog: Arc<PricingTierCatalog>,
}

impl FareComputationEngine {
    #[must_use]
    pub fn new(catalog: Arc<PricingTierCatalog>) -> Self {
        Self { catalog }
    }

    /// Turn a raw payload into [`FareDetails`].
    ///
    /// A payload for a different trip type than `params` is a
    /// `MalformedResponse`. An unpriced result has `total_price == 0`.
    pub fn compute(&self, params: &FareParams, raw: &RawFareResponse) -> Result<FareDetails> {
        if raw.trip_type() != params.trip_type {
            return Err(FareError::MalformedResponse(format!(
                "expected {} payload, got {}",
                params.trip_type,
                raw.trip_type()
            )));
        }

        let mut fare = match raw {
            RawFareResponse::Local(response) => local_fare(params, response),
            RawFareResponse::Outstation(response) => outstation_fare(params, &response.fare),
            RawFareResponse::Airport(response) => airport_fare(params, &response.fare),
            RawFareResponse::Tour(response) => tour_fare(&response.tour_fare),
        };

        fare.total_price = round_rupees(fare.total_price);
        fare.base_price = round_rupees(fare.base_price);
        fare.breakdown.insert(
            "category".to_string(),
            self.catalog.category_for(&params.vehicle_id).as_str().into(),
        );
        fare.breakdown
            .insert("tripMode".to_string(), params.trip_mode.as_str().into());
        Ok(fare)
    }
}

fn local_fare(params: &FareParams, response: &LocalFaresResponse) -> FareDetails {
    let package = params.effective_package().unwrap_or_default();
    let record = response
        .fares
        .iter()
        .find(|record| same_vehicle(record.vehicle_id.as_str(), params.vehicle_id.as_str()));

    let Some(record) = record else {
        return FareDetails::zero();
    };
    let Some(package_price) = record.package_price(package.as_str()) else {
        return FareDetails::zero();
    };

    let mut breakdown = BTreeMap::new();
    breakdown.insert("package".to_string(), BreakdownValue::from(package.as_str()));
    breakdown.insert("packagePrice".to_string(), package_price.into());
    breakdown.insert("extraHourCharge".to_string(), record.price_extra_hour.into());

    FareDetails {
        base_price: package_price,
        total_price: package_price.max(0.0),
        extra_km_charge: Some(record.price_extra_km),
        driver_allowance: None,
        night_halt_charge: None,
        package_price: Some(package_price),
        breakdown,
    }
}

// Distance is doubled for one-way and round-trip alike; see DESIGN.md.
fn outstation_fare(params: &FareParams, fare: &OutstationFare) -> FareDetails {
    let effective_distance = (params.normalized_distance() * 2.0).max(OUTSTATION_MIN_DISTANCE_KM);
    let distance_fare = effective_distance * fare.price_per_km;
    let total = fare.base_price + distance_fare + fare.driver_allowance;

    let mut breakdown = BTreeMap::new();
    breakdown.insert(
        "effectiveDistanceKm".to_string(),
        BreakdownValue::from(effective_distance),
    );
    breakdown.insert("pricePerKm".to_string(), fare.price_per_km.into());
    breakdown.insert("distanceFare".to_string(), distance_fare.into());

    FareDetails {
        base_price: fare.base_price,
        total_price: total.max(0.0),
        extra_km_charge: Some(fare.price_per_km),
        driver_allowance: Some(fare.driver_allowance),
        night_halt_charge: fare.night_halt_charge,
        package_price: None,
        breakdown,
    }
}

fn airport_fare(params: &FareParams, fare: &AirportFare) -> FareDetails {
    let distance = params.normalized_distance();
    let (tier, tier_price) = if distance <= AIRPORT_TIER1_MAX_KM {
        ("tier1", fare.tier1_price)
    } else if distance <= AIRPORT_TIER2_MAX_KM {
        ("tier2", fare.tier2_price)
    } else if distance <= AIRPORT_TIER3_MAX_KM {
        ("tier3", fare.tier3_price)
    } else {
        ("tier4", fare.tier4_price)
    };
    let overage = if distance > AIRPORT_TIER3_MAX_KM {
        (distance - AIRPORT_TIER3_MAX_KM) * fare.extra_km_charge
    } else {
        0.0
    };
    let base_fare = tier_price + overage;

    let mut breakdown = BTreeMap::new();
    breakdown.insert("tier".to_string(), BreakdownValue::from(tier));
    breakdown.insert("tierPrice".to_string(), tier_price.into());
    breakdown.insert("overageFare".to_string(), overage.into());
    breakdown.insert("airportFee".to_string(), fare.airport_fee.into());

    FareDetails {
        base_price: base_fare,
        total_price: (base_fare + fare.airport_fee).max(0.0),
        extra_km_charge: Some(fare.extra_km_charge),
        driver_allowance: None,
        night_halt_charge: None,
        package_price: None,
        breakdown,
    }
}

fn tour_fare(fare: &TourFare) -> FareDetails {
    let mut breakdown = BTreeMap::new();
    if let Some(tour_id) = fare.tour_id.as_deref() {
        breakdown.insert("tourId".to_string(), BreakdownValue::from(tour_id));
    }
    FareDetails {
        base_price: fare.price,
        total_price: fare.price.max(0.0),
        breakdown,
        ..FareDetails::default()
    }
}

fn same_vehicle(record_id: &str, canonical: &str) -> bool {
    let normalized = record_id
        .trim()
        .to_ascii_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    normalized == canonical
}

fn round_rupees(value: f64) -> f64 {
    if value.is_finite() { value.round() } else { 0.0 }
}
