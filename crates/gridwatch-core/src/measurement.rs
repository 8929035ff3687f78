//! ---
//! gw_section: "04-acquisition-core"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Measurement reconciliation and snapshot publishing."
//! gw_version: "v0.1.0"
//! gw_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One voltage phasor reading, in engineering units plus the derived
/// per-unit magnitude (phase-to-neutral base).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhasorReading {
    pub magnitude_kv: f64,
    pub angle_deg: f64,
    pub magnitude_pu: f64,
}

/// Acceptance status of a reconciled measurement.
///
/// Readings that fail the validity filter are dropped before snapshot
/// assembly, so every measurement that reaches subscribers is `Active`;
/// there is no partial/placeholder variant in the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementStatus {
    Active,
    Rejected,
}

/// One PMU's fused reading for one polling cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// References [`gridwatch_topology::MeasurementPoint::id`].
    pub pmu_id: String,
    pub display_name: String,
    pub frequency_hz: f64,
    pub rocof_hz_per_sec: f64,
    /// Historian-side timestamp of the frequency sample, not wall-clock of
    /// receipt.
    pub timestamp: String,
    pub quality: u32,
    pub voltage_phase_a: Option<PhasorReading>,
    pub voltage_phase_b: Option<PhasorReading>,
    pub voltage_phase_c: Option<PhasorReading>,
    pub status: MeasurementStatus,
}

/// The complete set of reconciled measurements from one successful cycle.
/// Immutable once published; exactly one snapshot is current at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Cycle sequence number; snapshots are totally ordered by it.
    pub sequence: u64,
    pub taken_at: DateTime<Utc>,
    pub measurements: Vec<Measurement>,
}

impl Snapshot {
    pub fn measurement(&self, pmu_id: &str) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.pmu_id == pmu_id)
    }
}
