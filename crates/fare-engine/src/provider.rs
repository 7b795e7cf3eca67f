//! Pricing providers and the ordered fallback chain.

use std::sync::Arc;

use async_trait::async_trait;
use fare_pricing_client::{
    FareQuery, PricingClient, PricingClientConfig, PricingClientError, RawFareResponse,
};
use tracing::{debug, warn};

use crate::error::{FareError, Result};

/// A source of raw fare payloads.
#[async_trait]
pub trait PricingProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, query: &FareQuery) -> Result<RawFareResponse>;
}

/// [`PricingProvider`] backed by the Pricing Service HTTP API.
#[derive(Debug, Clone)]
pub struct HttpPricingProvider {
    name: String,
    client: PricingClient,
}

impl HttpPricingProvider {
    pub fn new(config: PricingClientConfig) -> Result<Self> {
        let client = PricingClient::new(config).map_err(map_client_error)?;
        Ok(Self {
            name: client.base_url().to_string(),
            client,
        })
    }
}

#[async_trait]
impl PricingProvider for HttpPricingProvider {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    async fn fetch(&self, query: &FareQuery) -> Result<RawFareResponse> {
        self.client
            .fetch_fare(query)
            .await
            .map_err(map_client_error)
    }
}

fn map_client_error(error: PricingClientError) -> FareError {
    match error {
        PricingClientError::MalformedResponse { preview } => FareError::MalformedResponse(preview),
        PricingClientError::BaseUrlMissing => {
            FareError::Config("pricing base url missing".to_string())
        }
        other => FareError::Provider(other.to_string()),
    }
}

/// Providers tried in order; the first success wins.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn PricingProvider>>,
}

impl std::fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|provider| provider.name().to_string()))
            .finish()
    }
}

impl ProviderChain {
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn PricingProvider>>) -> Self {
        Self { providers }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Returns the last provider's error when every provider fails.
    pub async fn fetch(&self, query: &FareQuery) -> Result<RawFareResponse> {
        let mut last_error = FareError::NoProviders;
        for provider in &self.providers {
            match provider.fetch(query).await {
                Ok(raw) => {
                    debug!(provider = %provider.name(), "pricing provider succeeded");
                    return Ok(raw);
                }
                Err(error) => {
                    warn!(
                        provider = %provider.name(),
                        vehicle = %query.vehicle_id,
                        trip = %query.trip_type,
                        "pricing provider failed: {error}"
                    );
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }
}
