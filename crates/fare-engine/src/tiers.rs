//! Static per-category pricing tiers used as fare sanity bounds.

use std::fmt;

use serde::Serialize;

use crate::types::{CanonicalId, TripType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleCategory {
    Sedan,
    Suv,
    Mpv,
    PremiumMpv,
    Luxury,
    Tempo,
}

impl VehicleCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sedan => "sedan",
            Self::Suv => "suv",
            Self::Mpv => "mpv",
            Self::PremiumMpv => "premium_mpv",
            Self::Luxury => "luxury",
            Self::Tempo => "tempo",
        }
    }
}

impl fmt::Display for VehicleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingTier {
    pub category: VehicleCategory,
    pub base_price: f64,
    pub price_per_km: f64,
    pub driver_allowance: f64,
    pub min_fare: f64,
    pub max_fare: f64,
}

impl PricingTier {
    const fn new(
        category: VehicleCategory,
        base_price: f64,
        price_per_km: f64,
        driver_allowance: f64,
        min_fare: f64,
        max_fare: f64,
    ) -> Self {
        Self {
            category,
            base_price,
            price_per_km,
            driver_allowance,
            min_fare,
            max_fare,
        }
    }
}

const DEFAULT_TIERS: [PricingTier; 6] = [
    PricingTier::new(VehicleCategory::Sedan, 3_900.0, 13.0, 250.0, 1_500.0, 20_000.0),
    PricingTier::new(VehicleCategory::Suv, 4_500.0, 16.0, 250.0, 2_000.0, 25_000.0),
    PricingTier::new(VehicleCategory::Mpv, 4_200.0, 15.0, 250.0, 1_800.0, 22_000.0),
    PricingTier::new(VehicleCategory::PremiumMpv, 5_400.0, 20.0, 300.0, 2_500.0, 30_000.0),
    PricingTier::new(VehicleCategory::Luxury, 8_000.0, 28.0, 400.0, 4_000.0, 50_000.0),
    PricingTier::new(VehicleCategory::Tempo, 9_000.0, 30.0, 500.0, 5_000.0, 60_000.0),
];

// Ordered: earlier keywords win, so `innova` lands in premium_mpv before `mpv`.
const CATEGORY_KEYWORDS: [(VehicleCategory, &[&str]); 6] = [
    (VehicleCategory::Tempo, &["tempo", "traveller", "urbania"]),
    (VehicleCategory::Luxury, &["luxury", "benz", "bmw", "audi"]),
    (VehicleCategory::PremiumMpv, &["innova", "hycross", "carnival"]),
    (VehicleCategory::Mpv, &["ertiga", "mpv", "marazzo", "carens"]),
    (VehicleCategory::Suv, &["suv", "xuv", "scorpio", "creta"]),
    (VehicleCategory::Sedan, &["sedan", "dzire", "etios", "amaze"]),
];

/// Lookup of [`PricingTier`] by canonical vehicle id.
///
/// This is a bounds checker only; live prices always come from the
/// Pricing Service.
#[derive(Debug, Clone)]
pub struct PricingTierCatalog {
    tiers: Vec<PricingTier>,
}

impl Default for PricingTierCatalog {
    fn default() -> Self {
        Self {
            tiers: DEFAULT_TIERS.to_vec(),
        }
    }
}

impl PricingTierCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn category_for(&self, id: &CanonicalId) -> VehicleCategory {
        let id = id.as_str();
        if let Some(tier) = self.tiers.iter().find(|tier| tier.category.as_str() == id) {
            return tier.category;
        }
        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|keyword| id.contains(keyword)))
            .map_or(VehicleCategory::Sedan, |(category, _)| *category)
    }

    #[must_use]
    pub fn tier_for(&self, id: &CanonicalId) -> PricingTier {
        let category = self.category_for(id);
        self.tiers
            .iter()
            .find(|tier| tier.category == category)
            .copied()
            .unwrap_or(DEFAULT_TIERS[0])
    }

    /// Acceptable `(min, max)` total for this vehicle and trip type.
    #[must_use]
    pub fn valid_range(&self, id: &CanonicalId, trip_type: TripType) -> (f64, f64) {
        let tier = self.tier_for(id);
        match trip_type {
            TripType::Local => (tier.min_fare * 0.2, tier.max_fare * 0.5),
            TripType::Airport => (tier.min_fare * 0.3, tier.max_fare * 0.5),
            TripType::Outstation | TripType::Tour => (tier.min_fare, tier.max_fare),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PricingTierCatalog, VehicleCategory};
    use crate::types::{CanonicalId, TripType};

    fn id(raw: &str) -> CanonicalId {
        CanonicalId::new(raw).expect("canonical id")
    }

    #[test]
    fn exact_match_precedes_keyword_match() {
        let catalog = PricingTierCatalog::new();
        assert_eq!(catalog.category_for(&id("mpv")), VehicleCategory::Mpv);
        assert_eq!(catalog.category_for(&id("luxury")), VehicleCategory::Luxury);
        assert_eq!(
            catalog.category_for(&id("innova_crysta")),
            VehicleCategory::PremiumMpv
        );
        assert_eq!(
            catalog.category_for(&id("tempo_traveller")),
            VehicleCategory::Tempo
        );
    }

    #[test]
    fn unknown_vehicles_default_to_sedan() {
        let catalog = PricingTierCatalog::new();
        let tier = catalog.tier_for(&id("rickshaw"));
        assert_eq!(tier.category, VehicleCategory::Sedan);
        assert_eq!(tier.base_price, 3_900.0);
    }

    #[test]
    fn local_range_is_lower_than_outstation() {
        let catalog = PricingTierCatalog::new();
        let sedan = id("sedan");
        let (local_min, local_max) = catalog.valid_range(&sedan, TripType::Local);
        let (out_min, out_max) = catalog.valid_range(&sedan, TripType::Outstation);
        assert!(local_min < out_min);
        assert!(local_max < out_max);
        assert_eq!((out_min, out_max), (1_500.0, 20_000.0));
        let (airport_min, airport_max) = catalog.valid_range(&sedan, TripType::Airport);
        assert!((airport_min - 450.0).abs() < 1e-6);
        assert!((airport_max - 10_000.0).abs() < 1e-6);
    }
}
