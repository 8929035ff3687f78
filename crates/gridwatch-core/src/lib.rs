//! ---
//! gw_section: "04-acquisition-core"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Measurement reconciliation and snapshot publishing."
//! gw_version: "v0.1.0"
//! gw_owner: "tbd"
//! ---
//! Acquisition core: joins raw historian samples back to the PMU topology,
//! applies the validity filter, and drives the polling cycle that publishes
//! one consistent snapshot per cycle to in-process subscribers.

pub mod measurement;
pub mod reconcile;
pub mod service;

pub use measurement::{Measurement, MeasurementStatus, PhasorReading, Snapshot};
pub use reconcile::{per_unit, reconcile};
pub use service::{PmuDataService, ServiceState, Subscription};
