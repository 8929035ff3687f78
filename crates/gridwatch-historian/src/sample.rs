//! ---
//! gw_section: "03-historian"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Historian webservice client."
//! gw_version: "v0.1.0"
//! gw_owner: "tbd"
//! ---
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One point value returned by the historian for a single channel.
/// Ephemeral: produced per polling cycle and discarded after
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub point_id: u32,
    pub value: f64,
    pub quality: u32,
    /// Historian-side timestamp, passed through verbatim.
    pub timestamp: String,
}

/// Wire shape of the historian's read endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct TimeSeriesResponse {
    #[serde(rename = "TimeSeriesDataPoints", default)]
    pub points: Vec<TimeSeriesDataPoint>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TimeSeriesDataPoint {
    #[serde(rename = "HistorianID")]
    pub historian_id: u32,
    #[serde(rename = "Time", default)]
    pub time: String,
    #[serde(rename = "Value", default)]
    pub value: f64,
    #[serde(rename = "Quality", default)]
    pub quality: u32,
}

impl From<TimeSeriesDataPoint> for RawSample {
    fn from(point: TimeSeriesDataPoint) -> Self {
        Self {
            point_id: point.historian_id,
            value: point.value,
            quality: point.quality,
            timestamp: point.time,
        }
    }
}

/// Source of current point values, the seam between the polling scheduler
/// and the network. Production uses [`crate::HistorianClient`]; tests
/// substitute canned sources.
#[async_trait]
pub trait SampleSource: Send + Sync + 'static {
    /// Fetch the current value of every listed point id. Failures are
    /// absorbed into a smaller (possibly empty) result, never an error.
    async fn fetch_current(&self, point_ids: &[u32]) -> Vec<RawSample>;
}
