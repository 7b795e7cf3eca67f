//! HTTP client and wire types for the Pricing Service fare endpoints.

mod client;
mod types;

pub use client::{
    DEFAULT_REQUEST_ATTEMPTS, DEFAULT_TIMEOUT_MS, PricingClient, PricingClientConfig,
    PricingClientError, decode_fare_body, format_http_error,
};
pub use types::{
    AirportFare, AirportFareResponse, DEFAULT_LOCAL_PACKAGE_ID, FareQuery, LocalFareRecord,
    LocalFaresResponse, OutstationFare, OutstationFareResponse, RawFareResponse, STATUS_SUCCESS,
    TourFare, TourFareResponse, TripMode, TripType, format_distance,
};
