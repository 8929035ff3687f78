//! ---
//! gw_section: "02-topology"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Static PMU topology model and loader."
//! gw_version: "v0.1.0"
//! gw_owner: "tbd"
//! ---
//! Static PMU topology: which measurement points exist, where they sit on
//! the map, and which historian channel ids carry their readings. The
//! topology is loaded once at startup, is immutable for the process
//! lifetime, and is shared read-only with every other component.
//!
//! A load failure degrades to an empty topology ("nothing to poll") rather
//! than aborting the host process; retry policy belongs to the caller.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while reading or validating a topology document.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("unable to read topology document {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed topology document {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid topology: {0}")]
    Invalid(String),
}

/// Connection settings for the historian webservice.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistorianSettings {
    /// Base address of the historian webservice, e.g. `http://pdc:6152`.
    #[serde(default)]
    pub webservice_address: String,
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

/// Optional basic-auth credentials for the historian.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Geographic placement of a measurement point.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GeoLocation {
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub station: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub area: String,
}

/// Historian point ids for one phasor (magnitude/angle pair).
/// `0` means "channel not configured".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PhasorChannels {
    #[serde(default)]
    pub magnitude: u32,
    #[serde(default)]
    pub angle: u32,
}

impl PhasorChannels {
    pub fn is_configured(&self) -> bool {
        self.magnitude != 0 && self.angle != 0
    }
}

/// Voltage phasor channels per phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct VoltageChannels {
    #[serde(default)]
    pub phase_a: PhasorChannels,
    #[serde(default)]
    pub phase_b: PhasorChannels,
    #[serde(default)]
    pub phase_c: PhasorChannels,
}

/// Historian channel ids for one PMU, grouped by measurement type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ChannelIds {
    #[serde(default)]
    pub frequency: u32,
    #[serde(default)]
    pub rocof: u32,
    #[serde(default)]
    pub voltage: VoltageChannels,
}

impl ChannelIds {
    /// All configured (non-zero) channel ids for this PMU.
    pub fn configured(&self) -> impl Iterator<Item = u32> {
        [
            self.frequency,
            self.rocof,
            self.voltage.phase_a.magnitude,
            self.voltage.phase_a.angle,
            self.voltage.phase_b.magnitude,
            self.voltage.phase_b.angle,
            self.voltage.phase_c.magnitude,
            self.voltage.phase_c.angle,
        ]
        .into_iter()
        .filter(|id| *id != 0)
    }
}

/// One physical PMU as described by the topology document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementPoint {
    /// Stable business key, unique across the topology.
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub location: GeoLocation,
    /// Nominal line voltage in kV, used for per-unit conversion.
    #[serde(default)]
    pub voltage_base_kv: f64,
    #[serde(default)]
    pub channels: ChannelIds,
}

/// The full static topology: historian settings plus measurement points.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Topology {
    #[serde(default)]
    pub historian: HistorianSettings,
    #[serde(default)]
    pub points: Vec<MeasurementPoint>,
}

impl Topology {
    /// Parse and validate a topology document from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| TopologyError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        let topology: Topology =
            toml::from_str(&contents).map_err(|source| TopologyError::Malformed {
                path: path.display().to_string(),
                source,
            })?;
        topology.validate()?;
        info!(
            path = %path.display(),
            points = topology.points.len(),
            historian = %topology.historian.webservice_address,
            "topology loaded"
        );
        Ok(topology)
    }

    /// Load a topology, degrading to an empty one on any failure.
    ///
    /// The acquisition service treats an empty topology as "nothing to
    /// poll"; it never brings the process down.
    pub fn load_or_empty<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(topology) => topology,
            Err(err) => {
                warn!(path = %path.as_ref().display(), error = %err, "topology unavailable, continuing with empty point list");
                Topology::default()
            }
        }
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let mut seen = std::collections::HashSet::new();
        for point in &self.points {
            if point.id.trim().is_empty() {
                return Err(TopologyError::Invalid(
                    "measurement point with empty id".to_owned(),
                ));
            }
            if !seen.insert(point.id.as_str()) {
                return Err(TopologyError::Invalid(format!(
                    "duplicate measurement point id '{}'",
                    point.id
                )));
            }
            let loc = &point.location;
            if !(-90.0..=90.0).contains(&loc.lat) || !(-180.0..=180.0).contains(&loc.lon) {
                return Err(TopologyError::Invalid(format!(
                    "measurement point '{}' has out-of-range coordinates ({}, {})",
                    point.id, loc.lat, loc.lon
                )));
            }
        }
        Ok(())
    }

    /// The deduplicated, sorted poll list: every configured channel id
    /// across all measurement points.
    pub fn configured_point_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .points
            .iter()
            .flat_map(|point| point.channels.configured())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
