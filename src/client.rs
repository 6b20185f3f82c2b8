//! Client for the TTN Gateway Server connection statistics resource.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{RequestBuilder, StatusCode, Url};
use thiserror::Error;
use tracing::warn;

use crate::metrics::{Collector, Desc, MetricPoint, MetricType};
use crate::stats::GatewayConnectionStats;

/// Timeout applied to every upstream request. A single attempt is made per
/// scrape; the deadline is the sole cancellation mechanism.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Attaches credentials to an outgoing request.
///
/// Only bearer-token authentication exists today; the seam is kept so other
/// schemes can be added without touching the client.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder;
}

/// Bearer-token authentication with a TTN API key.
pub struct ApiKeyAuthenticator {
    pub api_key: String,
}

impl Authenticator for ApiKeyAuthenticator {
    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.api_key)
    }
}

/// Diagnostic body attached to a non-2xx upstream response.
#[derive(Debug)]
pub enum ErrorBody {
    /// Body parsed as a JSON object.
    Json(serde_json::Value),
    /// Raw body text, kept when the body is not valid JSON.
    Text(String),
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorBody::Json(value) => write!(f, "{value}"),
            ErrorBody::Text(text) => f.write_str(text),
        }
    }
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base url {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("TTN API responded with non-2xx status code {status}: {body}")]
    Status { status: StatusCode, body: ErrorBody },
    #[error("failed to decode connection stats: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Histogram buckets for the request duration, in seconds.
const DURATION_BUCKETS: [f64; 9] = [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Debug, Clone, Default)]
struct DurationHistogram {
    /// Per-bucket counts, not cumulative.
    bucket_counts: [u64; 9],
    sum: f64,
    count: u64,
}

impl DurationHistogram {
    fn observe(&mut self, seconds: f64) {
        if let Some(i) = DURATION_BUCKETS.iter().position(|upper| seconds <= *upper) {
            self.bucket_counts[i] += 1;
        }
        self.sum += seconds;
        self.count += 1;
    }
}

fn client_metric_name(name: &str) -> String {
    format!("ttnapi_client_{name}")
}

struct ClientDescs {
    request_duration: Arc<Desc>,
    request_inflight: Arc<Desc>,
    ratelimit_allowed: Arc<Desc>,
    ratelimit_current: Arc<Desc>,
}

impl ClientDescs {
    fn new() -> Self {
        Self {
            request_duration: Arc::new(Desc::new(
                client_metric_name("request_duration_seconds"),
                "Histogram of the request duration towards the TTN API",
                MetricType::Histogram,
                &["code", "method"],
                &[],
            )),
            request_inflight: Arc::new(Desc::new(
                client_metric_name("request_inflight"),
                "Number of requests towards the TTN API that are currently ongoing",
                MetricType::Gauge,
                &[],
                &[],
            )),
            ratelimit_allowed: Arc::new(Desc::new(
                client_metric_name("ratelimit_allowed"),
                "The maximum number of requests allowed by the TTN rate limiting",
                MetricType::Gauge,
                &[],
                &[],
            )),
            ratelimit_current: Arc::new(Desc::new(
                client_metric_name("ratelimit_current"),
                "The number of requests still available under the TTN rate limiting",
                MetricType::Gauge,
                &[],
                &[],
            )),
        }
    }
}

/// Auxiliary instrumentation shared by every TTN client in the process.
///
/// All operations tolerate concurrent updates from parallel in-flight
/// scrapes. Registered with the metrics registry like any other collector.
pub struct ClientMetrics {
    request_duration: RwLock<HashMap<(String, String), DurationHistogram>>,
    requests_in_flight: AtomicI64,
    rate_limit_allowed: RwLock<f64>,
    rate_limit_current: RwLock<f64>,
    descs: ClientDescs,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self {
            request_duration: RwLock::new(HashMap::new()),
            requests_in_flight: AtomicI64::new(0),
            rate_limit_allowed: RwLock::new(0.0),
            rate_limit_current: RwLock::new(0.0),
            descs: ClientDescs::new(),
        }
    }

    fn observe_request(&self, code: &str, method: &str, elapsed: Duration) {
        let mut durations = self.request_duration.write();
        durations
            .entry((code.to_string(), method.to_string()))
            .or_default()
            .observe(elapsed.as_secs_f64());
    }

    fn inc_in_flight(&self) {
        self.requests_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn dec_in_flight(&self) {
        self.requests_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    fn set_rate_limit_allowed(&self, value: f64) {
        *self.rate_limit_allowed.write() = value;
    }

    fn set_rate_limit_current(&self, value: f64) {
        *self.rate_limit_current.write() = value;
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for ClientMetrics {
    fn describe(&self) -> Vec<Arc<Desc>> {
        vec![
            self.descs.request_duration.clone(),
            self.descs.request_inflight.clone(),
            self.descs.ratelimit_allowed.clone(),
            self.descs.ratelimit_current.clone(),
        ]
    }

    async fn collect(&self) -> Vec<MetricPoint> {
        let mut points = Vec::new();

        let durations = self.request_duration.read();
        let mut keys: Vec<_> = durations.keys().collect();
        keys.sort();
        for key in keys {
            let histogram = &durations[key];
            points.push(MetricPoint::histogram(
                &self.descs.request_duration,
                vec![key.0.clone(), key.1.clone()],
                DURATION_BUCKETS
                    .iter()
                    .copied()
                    .zip(histogram.bucket_counts.iter().copied())
                    .collect(),
                histogram.sum,
                histogram.count,
            ));
        }

        points.push(MetricPoint::new(
            &self.descs.request_inflight,
            vec![],
            self.requests_in_flight.load(Ordering::Relaxed) as f64,
        ));
        points.push(MetricPoint::new(
            &self.descs.ratelimit_allowed,
            vec![],
            *self.rate_limit_allowed.read(),
        ));
        points.push(MetricPoint::new(
            &self.descs.ratelimit_current,
            vec![],
            *self.rate_limit_current.read(),
        ));

        points
    }
}

/// Client bound to one base URL and credential.
pub struct TtnClient {
    base_url: Url,
    authenticator: Box<dyn Authenticator>,
    http: reqwest::Client,
    metrics: Arc<ClientMetrics>,
}

impl TtnClient {
    pub fn new(
        base_url: &str,
        authenticator: Box<dyn Authenticator>,
        metrics: Arc<ClientMetrics>,
    ) -> Result<Self, ClientError> {
        let parsed = Url::parse(base_url).map_err(|e| ClientError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: parsed,
            authenticator,
            http,
            metrics,
        })
    }

    fn stats_url(&self, gateway_id: &str) -> Url {
        let mut url = self.base_url.clone();
        let path = format!(
            "{}/api/v3/gs/gateways/{}/connection/stats",
            self.base_url.path().trim_end_matches('/'),
            gateway_id
        );
        url.set_path(&path);
        url
    }

    /// Fetch the connection statistics for one gateway.
    ///
    /// Exactly one attempt is made; the caller decides what to do with a
    /// failure.
    pub async fn connection_stats(
        &self,
        gateway_id: &str,
    ) -> Result<GatewayConnectionStats, ClientError> {
        let request = self
            .authenticator
            .authenticate(self.http.get(self.stats_url(gateway_id)));

        self.metrics.inc_in_flight();
        let started = Instant::now();
        let response = request.send().await;
        self.metrics.dec_in_flight();

        let response = match response {
            Ok(response) => response,
            Err(err) => return Err(ClientError::Request(err)),
        };
        self.metrics
            .observe_request(response.status().as_str(), "get", started.elapsed());

        if let Some(warning) = header_str(&response, "x-warning") {
            if !warning.is_empty() {
                warn!(content = %warning, "ttn api warning");
            }
        }
        // Rate limit headers are advisory; unparseable values are skipped.
        if let Some(available) = header_i64(&response, "x-rate-limit-available") {
            self.metrics.set_rate_limit_current(available as f64);
        }
        if let Some(allowed) = header_i64(&response, "x-rate-limit-limit") {
            self.metrics.set_rate_limit_allowed(allowed as f64);
        }

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await?;
            let body = match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(value) if value.is_object() => ErrorBody::Json(value),
                _ => ErrorBody::Text(text),
            };
            return Err(ClientError::Status { status, body });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn header_str<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn header_i64(response: &reqwest::Response, name: &str) -> Option<i64> {
    header_str(response, name).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client(base_url: &str) -> Result<TtnClient, ClientError> {
        TtnClient::new(
            base_url,
            Box::new(ApiKeyAuthenticator {
                api_key: "NNSXS.TESTKEY".to_string(),
            }),
            Arc::new(ClientMetrics::new()),
        )
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = make_client("not a url");
        assert!(matches!(result, Err(ClientError::InvalidBaseUrl { .. })));
    }

    #[test]
    fn test_stats_url_join() {
        let client = make_client("https://eu1.cloud.thethings.network").unwrap();
        assert_eq!(
            client.stats_url("my-gw").as_str(),
            "https://eu1.cloud.thethings.network/api/v3/gs/gateways/my-gw/connection/stats"
        );
    }

    #[test]
    fn test_stats_url_preserves_base_path() {
        let client = make_client("https://proxy.example.com/ttn/").unwrap();
        assert_eq!(
            client.stats_url("gw").as_str(),
            "https://proxy.example.com/ttn/api/v3/gs/gateways/gw/connection/stats"
        );
    }

    #[test]
    fn test_api_key_authenticator_sets_bearer_header() {
        let authenticator = ApiKeyAuthenticator {
            api_key: "NNSXS.SECRET".to_string(),
        };
        let request = authenticator
            .authenticate(reqwest::Client::new().get("https://example.com"))
            .build()
            .unwrap();

        assert_eq!(
            request
                .headers()
                .get("authorization")
                .unwrap()
                .to_str()
                .unwrap(),
            "Bearer NNSXS.SECRET"
        );
    }

    #[test]
    fn test_duration_histogram_observe() {
        let mut histogram = DurationHistogram::default();
        histogram.observe(0.03);
        histogram.observe(0.2);
        histogram.observe(30.0);

        // 0.03 lands in the 0.05 bucket, 0.2 in the 0.25 bucket, 30 beyond
        // the last bound.
        assert_eq!(histogram.bucket_counts[1], 1);
        assert_eq!(histogram.bucket_counts[3], 1);
        assert_eq!(histogram.count, 3);
        assert!((histogram.sum - 30.23).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_client_metrics_collect_shape() {
        let metrics = ClientMetrics::new();
        metrics.observe_request("200", "get", Duration::from_millis(120));
        metrics.set_rate_limit_allowed(996.0);
        metrics.set_rate_limit_current(995.0);

        let points = metrics.collect().await;
        // One histogram series plus the three gauges.
        assert_eq!(points.len(), 4);
    }

    #[test]
    fn test_error_body_display() {
        let json = ErrorBody::Json(serde_json::json!({"message": "rate limited"}));
        assert_eq!(json.to_string(), r#"{"message":"rate limited"}"#);

        let text = ErrorBody::Text("bad gateway".to_string());
        assert_eq!(text.to_string(), "bad gateway");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_a_request_error() {
        // Port 1 on localhost refuses connections immediately.
        let client = make_client("http://127.0.0.1:1").unwrap();
        let result = client.connection_stats("gw").await;
        assert!(matches!(result, Err(ClientError::Request(_))));
    }
}
