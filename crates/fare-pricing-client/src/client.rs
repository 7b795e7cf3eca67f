use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::types::{
    AirportFareResponse, FareQuery, LocalFaresResponse, OutstationFareResponse, RawFareResponse,
    STATUS_SUCCESS, TourFareResponse, TripType,
};

pub const DEFAULT_TIMEOUT_MS: u64 = 1_500;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;
const MIN_TIMEOUT_MS: u64 = 250;
const BODY_PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone)]
pub struct PricingClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub request_attempts: usize,
}

impl PricingClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }
}

#[derive(Debug, Error)]
pub enum PricingClientError {
    #[error("pricing_client_base_url_missing")]
    BaseUrlMissing,
    #[error("pricing_client_invalid_path")]
    InvalidPath,
    #[error("pricing_request_failed:{message}")]
    Request { message: String },
    #[error("pricing_read_failed:{message}")]
    Read { message: String },
    #[error("pricing_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("pricing_malformed_response:{preview}")]
    MalformedResponse { preview: String },
    #[error("pricing_json_decode_failed:{message}")]
    Decode { message: String },
    #[error("pricing_rejected:{status}")]
    Rejected { status: String },
}

#[derive(Debug, Clone)]
pub struct PricingClient {
    base_url: String,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

impl PricingClient {
    pub fn new(config: PricingClientConfig) -> Result<Self, PricingClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(MIN_TIMEOUT_MS)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn fare_path(trip_type: TripType) -> String {
        format!("/api/fares/{}", trip_type.as_str())
    }

    /// Fetch the raw payload for `query`, decoded by its trip type.
    pub async fn fetch_fare(
        &self,
        query: &FareQuery,
    ) -> Result<RawFareResponse, PricingClientError> {
        let path = Self::fare_path(query.trip_type);
        let pairs = query.query_pairs(Utc::now().timestamp_millis());
        let raw = match query.trip_type {
            TripType::Local => {
                RawFareResponse::Local(self.get_json::<LocalFaresResponse>(&path, &pairs).await?)
            }
            TripType::Outstation => RawFareResponse::Outstation(
                self.get_json::<OutstationFareResponse>(&path, &pairs)
                    .await?,
            ),
            TripType::Airport => RawFareResponse::Airport(
                self.get_json::<AirportFareResponse>(&path, &pairs).await?,
            ),
            TripType::Tour => {
                RawFareResponse::Tour(self.get_json::<TourFareResponse>(&path, &pairs).await?)
            }
        };
        Ok(raw)
    }

    pub async fn get_json<T>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<T, PricingClientError>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(path).ok_or(PricingClientError::InvalidPath)?;
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let request = self
                .http
                .get(url.as_str())
                .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
                .header("cache-control", "no-cache")
                .query(query)
                .timeout(self.timeout);

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let bytes =
                        response
                            .bytes()
                            .await
                            .map_err(|error| PricingClientError::Read {
                                message: error.to_string(),
                            })?;
                    return decode_fare_body(status, &bytes);
                }
                Err(error) => {
                    debug!(url = %url, attempt, "pricing request failed: {error}");
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(PricingClientError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

/// Decode a Pricing Service body.
///
/// HTML/PHP error pages and non-JSON bodies map to `MalformedResponse`,
/// a non-success `status` maps to `Rejected`, and JSON with the wrong
/// shape maps to `Decode`.
pub fn decode_fare_body<T>(status: StatusCode, bytes: &[u8]) -> Result<T, PricingClientError>
where
    T: DeserializeOwned,
{
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_start();
    if trimmed.starts_with('<') {
        return Err(PricingClientError::MalformedResponse {
            preview: body_preview(trimmed),
        });
    }

    if !status.is_success() {
        return Err(format_http_error(status, bytes));
    }

    let value = serde_json::from_str::<serde_json::Value>(trimmed).map_err(|_| {
        PricingClientError::MalformedResponse {
            preview: body_preview(trimmed),
        }
    })?;
    if let Some(status) = value.get("status").and_then(serde_json::Value::as_str)
        && !status.eq_ignore_ascii_case(STATUS_SUCCESS)
    {
        return Err(PricingClientError::Rejected {
            status: status.to_string(),
        });
    }
    serde_json::from_value::<T>(value).map_err(|error| PricingClientError::Decode {
        message: error.to_string(),
    })
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> PricingClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    PricingClientError::Http { status, body }
}

fn normalize_base_url(base_url: &str) -> Result<String, PricingClientError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(PricingClientError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn body_preview(body: &str) -> String {
    let preview = body.chars().take(BODY_PREVIEW_CHARS).collect::<String>();
    non_empty_string(preview).unwrap_or_else(|| "<empty>".to_string())
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use anyhow::Result;
    use axum::{
        Router,
        extract::{Path, Query, State},
        http::{StatusCode, header},
        response::IntoResponse,
        routing::get,
    };
    use tokio::net::TcpListener;
    use tokio::sync::{Mutex, oneshot};

    use super::{
        PricingClient, PricingClientConfig, PricingClientError, decode_fare_body,
        format_http_error,
    };
    use crate::types::{
        FareQuery, OutstationFareResponse, RawFareResponse, TripMode, TripType,
    };

    #[test]
    fn endpoint_builder_normalizes_paths() {
        let client = PricingClient::new(PricingClientConfig::new("https://fares.example.com/"))
            .expect("pricing client");

        assert_eq!(
            client.endpoint("/api/fares/local"),
            Some("https://fares.example.com/api/fares/local".to_string())
        );
        assert_eq!(
            client.endpoint("api/fares/local"),
            Some("https://fares.example.com/api/fares/local".to_string())
        );
        assert_eq!(client.endpoint(" "), None);
        assert_eq!(
            PricingClient::fare_path(TripType::Airport),
            "/api/fares/airport"
        );
    }

    #[test]
    fn base_url_missing_is_rejected() {
        let result = PricingClient::new(PricingClientConfig::new("   "));
        assert!(matches!(result, Err(PricingClientError::BaseUrlMissing)));
    }

    #[test]
    fn html_bodies_are_malformed_not_decode_errors() {
        let result = decode_fare_body::<OutstationFareResponse>(
            StatusCode::OK,
            b"  <br /><b>Fatal error</b>: Uncaught PDOException",
        );
        match result {
            Err(PricingClientError::MalformedResponse { preview }) => {
                assert!(preview.starts_with("<br />"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let html_error_page =
            decode_fare_body::<OutstationFareResponse>(StatusCode::BAD_GATEWAY, b"<html></html>");
        assert!(matches!(
            html_error_page,
            Err(PricingClientError::MalformedResponse { .. })
        ));

        let not_json = decode_fare_body::<OutstationFareResponse>(StatusCode::OK, b"fare=12");
        assert!(matches!(
            not_json,
            Err(PricingClientError::MalformedResponse { .. })
        ));

        let wrong_shape =
            decode_fare_body::<OutstationFareResponse>(StatusCode::OK, br#"{"status":"success"}"#);
        assert!(matches!(wrong_shape, Err(PricingClientError::Decode { .. })));
    }

    #[test]
    fn http_error_mapping_preserves_shape() {
        let error = format_http_error(StatusCode::BAD_GATEWAY, b" upstream failed ");
        assert_eq!(error.to_string(), "pricing_http_502 Bad Gateway:upstream failed");

        let empty_body = format_http_error(StatusCode::SERVICE_UNAVAILABLE, b" ");
        assert_eq!(
            empty_body.to_string(),
            "pricing_http_503 Service Unavailable:<empty>"
        );
    }

    #[derive(Clone)]
    struct StubState {
        queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    }

    struct PricingStub {
        base_url: String,
        queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
        shutdown: Option<oneshot::Sender<()>>,
    }

    impl PricingStub {
        async fn stop(mut self) {
            if let Some(shutdown) = self.shutdown.take() {
                let _ = shutdown.send(());
            }
        }
    }

    async fn fares(
        State(state): State<StubState>,
        Path(trip_type): Path<String>,
        Query(query): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        state.queries.lock().await.push(query);
        let body = match trip_type.as_str() {
            "outstation" => {
                r#"{"status":"success","fare":{"basePrice":3900,"pricePerKm":13,"driverAllowance":250}}"#
            }
            "airport" => r#"<br /><b>Warning</b>: mysqli_connect(): (HY000/2002)"#,
            "tour" => r#"{"status":"error","message":"tour not found"}"#,
            _ => r#"{"status":"success","fares":[]}"#,
        };
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
    }

    async fn spawn_pricing_stub() -> Result<PricingStub> {
        let queries = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            queries: queries.clone(),
        };
        let app = Router::new()
            .route("/api/fares/:trip_type", get(fares))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });

        Ok(PricingStub {
            base_url: format!("http://{addr}"),
            queries,
            shutdown: Some(shutdown_tx),
        })
    }

    fn query(trip_type: TripType) -> FareQuery {
        FareQuery {
            vehicle_id: "sedan".to_string(),
            trip_type,
            distance_km: 120.0,
            trip_mode: TripMode::OneWay,
            package_id: None,
            force_refresh: false,
        }
    }

    #[tokio::test]
    async fn fetch_fare_decodes_by_trip_type_and_sends_query() -> Result<()> {
        let stub = spawn_pricing_stub().await?;
        let client = PricingClient::new(PricingClientConfig::new(stub.base_url.clone()))?;

        let raw = client.fetch_fare(&query(TripType::Outstation)).await?;
        match raw {
            RawFareResponse::Outstation(response) => {
                assert_eq!(response.fare.base_price, 3900.0);
                assert_eq!(response.fare.driver_allowance, 250.0);
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        let queries = stub.queries.lock().await.clone();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].get("vehicle_id").map(String::as_str), Some("sedan"));
        assert_eq!(queries[0].get("distance").map(String::as_str), Some("120"));
        assert_eq!(queries[0].get("trip_mode").map(String::as_str), Some("one-way"));
        assert!(queries[0].contains_key("_t"));

        stub.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn fetch_fare_surfaces_malformed_and_rejected_payloads() -> Result<()> {
        let stub = spawn_pricing_stub().await?;
        let client = PricingClient::new(PricingClientConfig::new(stub.base_url.clone()))?;

        let malformed = client.fetch_fare(&query(TripType::Airport)).await;
        assert!(matches!(
            malformed,
            Err(PricingClientError::MalformedResponse { .. })
        ));

        let rejected = client.fetch_fare(&query(TripType::Tour)).await;
        match rejected {
            Err(PricingClientError::Rejected { status }) => assert_eq!(status, "error"),
            other => panic!("unexpected result: {other:?}"),
        }

        stub.stop().await;
        Ok(())
    }
}
