//! ---
//! gw_section: "03-historian"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Historian webservice client."
//! gw_version: "v0.1.0"
//! gw_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use gridwatch_common::config::AcquisitionConfig;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::sample::{RawSample, SampleSource, TimeSeriesResponse};
use crate::window::TimeWindow;

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_INGESTION_LAG: Duration = Duration::from_secs(5);
const DEFAULT_WINDOW_WIDTH: Duration = Duration::from_millis(500);

/// Errors raised by a single historian request. `fetch_values` absorbs
/// these into per-batch warnings; only `fetch_batch` surfaces them.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid historian address '{0}'")]
    InvalidAddress(String),
    #[error("historian request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("historian returned status {0}")]
    Status(StatusCode),
    #[error("historian batch timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed historian response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Client for the historian's
/// `/historian/timeseriesdata/read/historic/{ids}/{start}/{end}/json`
/// endpoint.
///
/// Requests exceeding the batch size are split into concurrent
/// sub-requests, each under its own deadline. A failed batch is logged and
/// skipped without retry so one bad batch cannot blank out a whole cycle.
#[derive(Debug, Clone)]
pub struct HistorianClient {
    http: reqwest::Client,
    base: String,
    basic_auth: Option<(String, String)>,
    batch_size: usize,
    batch_timeout: Duration,
    ingestion_lag: Duration,
    window_width: Duration,
}

impl HistorianClient {
    /// Construct a client for the given webservice base address.
    pub fn new(base_address: &str) -> Result<Self, FetchError> {
        let parsed = Url::parse(base_address)
            .map_err(|_| FetchError::InvalidAddress(base_address.to_owned()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidAddress(base_address.to_owned()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base: base_address.trim_end_matches('/').to_owned(),
            basic_auth: None,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            ingestion_lag: DEFAULT_INGESTION_LAG,
            window_width: DEFAULT_WINDOW_WIDTH,
        })
    }

    /// Apply batching and window tunables from the acquisition config.
    pub fn with_tuning(mut self, config: &AcquisitionConfig) -> Self {
        self.batch_size = config.batch_size.max(1);
        self.batch_timeout = config.batch_timeout;
        self.ingestion_lag = config.ingestion_lag;
        self.window_width = config.window_width;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }

    /// The query window for a cycle starting now.
    pub fn current_window(&self) -> TimeWindow {
        TimeWindow::anchored(Utc::now(), self.ingestion_lag, self.window_width)
    }

    /// Fetch the values of the given point ids inside `window`.
    ///
    /// The caller is expected to pass a deduplicated id list; the client
    /// does not deduplicate. A zero-length input short-circuits to an empty
    /// result without touching the network. The output is an unordered flat
    /// list across all batches.
    pub async fn fetch_values(&self, point_ids: &[u32], window: &TimeWindow) -> Vec<RawSample> {
        if point_ids.is_empty() {
            return Vec::new();
        }

        let batches = point_ids.chunks(self.batch_size).map(|batch| async move {
            match self.fetch_batch(batch, window).await {
                Ok(samples) => samples,
                Err(err) => {
                    warn!(batch = ?batch, error = %err, "historian batch failed, skipping");
                    Vec::new()
                }
            }
        });

        join_all(batches).await.into_iter().flatten().collect()
    }

    /// Issue one batch request. The whole call, body read included, runs
    /// under the per-batch deadline.
    async fn fetch_batch(
        &self,
        point_ids: &[u32],
        window: &TimeWindow,
    ) -> Result<Vec<RawSample>, FetchError> {
        let url = self.read_url(point_ids, window);
        let request = self.http.get(&url);
        let request = match &self.basic_auth {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        };

        let response = tokio::time::timeout(self.batch_timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout(self.batch_timeout))??;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let body = tokio::time::timeout(self.batch_timeout, response.text())
            .await
            .map_err(|_| FetchError::Timeout(self.batch_timeout))??;

        let decoded: TimeSeriesResponse = serde_json::from_str(&body)?;
        debug!(
            requested = point_ids.len(),
            returned = decoded.points.len(),
            "historian batch complete"
        );
        Ok(decoded.points.into_iter().map(RawSample::from).collect())
    }

    fn read_url(&self, point_ids: &[u32], window: &TimeWindow) -> String {
        let ids = point_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let (start, end) = window.path_segments();
        format!(
            "{}/historian/timeseriesdata/read/historic/{}/{}/{}/json",
            self.base, ids, start, end
        )
    }
}

#[async_trait]
impl SampleSource for HistorianClient {
    async fn fetch_current(&self, point_ids: &[u32]) -> Vec<RawSample> {
        let window = self.current_window();
        self.fetch_values(point_ids, &window).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    const READ_ROUTE: &str = "/historian/timeseriesdata/read/historic/:ids/:start/:end/json";

    #[derive(Clone, Default)]
    struct HistorianState {
        batches: Arc<Mutex<Vec<Vec<u32>>>>,
        fail_ids: Arc<Vec<u32>>,
        hang: Option<Duration>,
        malformed: bool,
        auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    }

    fn parse_ids(ids: &str) -> Vec<u32> {
        ids.split(',').filter_map(|id| id.parse().ok()).collect()
    }

    async fn read_handler(
        State(state): State<HistorianState>,
        headers: HeaderMap,
        Path((ids, _start, _end)): Path<(String, String, String)>,
    ) -> axum::response::Response {
        let ids = parse_ids(&ids);
        state.batches.lock().unwrap().push(ids.clone());
        state.auth_headers.lock().unwrap().push(
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
        );

        if let Some(delay) = state.hang {
            tokio::time::sleep(delay).await;
        }
        if state.malformed {
            return (StatusCode::OK, "this is not json").into_response();
        }
        if ids.iter().any(|id| state.fail_ids.contains(id)) {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }

        let points: Vec<_> = ids
            .iter()
            .map(|id| {
                json!({
                    "HistorianID": id,
                    "Time": "08-29-26 12:00:00.000",
                    "Value": *id as f64 + 0.5,
                    "Quality": 0
                })
            })
            .collect();
        Json(json!({ "TimeSeriesDataPoints": points })).into_response()
    }

    async fn spawn_historian(state: HistorianState) -> String {
        let router = Router::new()
            .route(READ_ROUTE, get(read_handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock historian");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{}", addr)
    }

    fn test_window() -> TimeWindow {
        TimeWindow::anchored(
            Utc::now(),
            Duration::from_secs(5),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn empty_input_short_circuits_without_network() {
        // Closed port: any network call would error loudly, an empty input
        // must not even try.
        let client = HistorianClient::new("http://127.0.0.1:9").unwrap();
        let samples = client.fetch_values(&[], &test_window()).await;
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn splits_oversized_requests_into_batches() {
        let state = HistorianState::default();
        let batches = state.batches.clone();
        let base = spawn_historian(state).await;
        let client = HistorianClient::new(&base).unwrap();

        let ids: Vec<u32> = (1..=25).collect();
        let samples = client.fetch_values(&ids, &test_window()).await;

        assert_eq!(samples.len(), 25);
        let mut sizes: Vec<usize> = batches.lock().unwrap().iter().map(Vec::len).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![5, 10, 10]);

        let mut returned: Vec<u32> = samples.iter().map(|s| s.point_id).collect();
        returned.sort_unstable();
        assert_eq!(returned, ids);
        assert_eq!(
            samples.iter().find(|s| s.point_id == 7).unwrap().value,
            7.5
        );
    }

    #[tokio::test]
    async fn failed_batch_does_not_abort_siblings() {
        let state = HistorianState {
            fail_ids: Arc::new(vec![15]),
            ..HistorianState::default()
        };
        let base = spawn_historian(state).await;
        let client = HistorianClient::new(&base).unwrap();

        // Three batches of ten; the middle one carries id 15 and fails.
        let ids: Vec<u32> = (1..=30).collect();
        let samples = client.fetch_values(&ids, &test_window()).await;

        let returned: Vec<u32> = samples.iter().map(|s| s.point_id).collect();
        assert_eq!(samples.len(), 20);
        assert!(!returned.contains(&15));
        assert!(returned.contains(&1));
        assert!(returned.contains(&30));
    }

    #[tokio::test]
    async fn timed_out_batch_is_recoverable() {
        let state = HistorianState {
            hang: Some(Duration::from_secs(5)),
            ..HistorianState::default()
        };
        let base = spawn_historian(state).await;
        let client = HistorianClient::new(&base)
            .unwrap()
            .with_batch_timeout(Duration::from_millis(100));

        let started = std::time::Instant::now();
        let samples = client.fetch_values(&[1, 2, 3], &test_window()).await;
        assert!(samples.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn malformed_body_yields_empty_batch() {
        let state = HistorianState {
            malformed: true,
            ..HistorianState::default()
        };
        let base = spawn_historian(state).await;
        let client = HistorianClient::new(&base).unwrap();

        let samples = client.fetch_values(&[1, 2], &test_window()).await;
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn basic_auth_is_applied_when_configured() {
        let state = HistorianState::default();
        let seen = state.auth_headers.clone();
        let base = spawn_historian(state).await;
        let client = HistorianClient::new(&base)
            .unwrap()
            .with_basic_auth("operator", "secret");

        let _ = client.fetch_values(&[1], &test_window()).await;
        let headers = seen.lock().unwrap();
        assert_eq!(headers.len(), 1);
        assert!(headers[0]
            .as_deref()
            .is_some_and(|value| value.starts_with("Basic ")));
    }

    #[test]
    fn rejects_non_http_addresses() {
        assert!(matches!(
            HistorianClient::new("ftp://historian"),
            Err(FetchError::InvalidAddress(_))
        ));
        assert!(matches!(
            HistorianClient::new("not a url"),
            Err(FetchError::InvalidAddress(_))
        ));
    }
}
