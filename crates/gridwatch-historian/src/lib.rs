//! ---
//! gw_section: "03-historian"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Historian webservice client."
//! gw_version: "v0.1.0"
//! gw_owner: "tbd"
//! ---
//! Client for the historian's point-value webservice. Requests are
//! time-windowed, id-batched, and individually failure-tolerant: a batch
//! that times out or returns garbage is logged and skipped, never retried,
//! and never aborts its siblings.

pub mod client;
pub mod sample;
pub mod window;

pub use client::{FetchError, HistorianClient};
pub use sample::{RawSample, SampleSource};
pub use window::TimeWindow;
