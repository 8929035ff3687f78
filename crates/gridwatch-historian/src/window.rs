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

use chrono::{DateTime, Utc};

/// A historian query window. Windows are anchored behind wall-clock "now"
/// to absorb the historian's ingestion latency and are deliberately narrow:
/// the service asks for point-in-time snapshots, not ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window ending `lag` behind `now`, `width` wide.
    pub fn anchored(now: DateTime<Utc>, lag: Duration, width: Duration) -> Self {
        let end = now - to_chrono(lag);
        let start = end - to_chrono(width);
        Self { start, end }
    }

    /// The window bounds as historian URL path segments:
    /// `MM-DD-YY HH:mm:ss.sss` UTC with the space encoded as `%20`.
    pub fn path_segments(&self) -> (String, String) {
        (format_segment(self.start), format_segment(self.end))
    }
}

fn format_segment(instant: DateTime<Utc>) -> String {
    instant
        .format("%m-%d-%y %H:%M:%S%.3f")
        .to_string()
        .replace(' ', "%20")
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
