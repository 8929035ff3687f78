//! ---
//! gw_section: "01-core-functionality"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Shared primitives for the acquisition service."
//! gw_version: "v0.1.0"
//! gw_owner: "tbd"
//! ---
//! Shared primitives for the GridWatch workspace: application configuration
//! loading and tracing initialisation consumed by the daemon and the
//! acquisition crates.

pub mod config;
pub mod logging;

pub use config::{AcquisitionConfig, AppConfig, LoadedAppConfig, LoggingConfig};
pub use logging::{init_tracing, LogFormat};
