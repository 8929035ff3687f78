//! ---
//! gw_section: "04-acquisition-core"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Measurement reconciliation and snapshot publishing."
//! gw_version: "v0.1.0"
//! gw_owner: "tbd"
//! ---
//! Joins one cycle's raw samples against the static topology and applies
//! the strict validity filter. A PMU without a valid positive frequency
//! and a valid phase-A voltage phasor produces no measurement at all this
//! cycle: under-reporting is preferred over fabricated data.
//!
//! Rocof and phases B/C are augmentation only and never gate acceptance.
//! The rocof asymmetry mirrors the upstream system deliberately.

use std::collections::HashMap;

use gridwatch_historian::RawSample;
use gridwatch_topology::{MeasurementPoint, PhasorChannels};
use tracing::trace;

use crate::measurement::{Measurement, MeasurementStatus, PhasorReading};

/// Reconcile one cycle's samples against the topology.
pub fn reconcile(points: &[MeasurementPoint], samples: &[RawSample]) -> Vec<Measurement> {
    let index = index_samples(samples);
    points
        .iter()
        .filter_map(|point| reconcile_point(point, &index))
        .collect()
}

/// Per-unit voltage magnitude against a phase-to-neutral base:
/// `kV / (base_kV / sqrt(3))`. A non-positive base yields `0.0`.
pub fn per_unit(magnitude_kv: f64, voltage_base_kv: f64) -> f64 {
    if voltage_base_kv > 0.0 {
        magnitude_kv / (voltage_base_kv / 3f64.sqrt())
    } else {
        0.0
    }
}

/// Index samples by point id. Duplicate ids within one cycle resolve
/// last-write-wins by array order.
fn index_samples(samples: &[RawSample]) -> HashMap<u32, &RawSample> {
    let mut index = HashMap::with_capacity(samples.len());
    for sample in samples {
        if sample.point_id != 0 {
            index.insert(sample.point_id, sample);
        }
    }
    index
}

fn lookup<'a>(index: &HashMap<u32, &'a RawSample>, channel_id: u32) -> Option<&'a RawSample> {
    if channel_id == 0 {
        return None;
    }
    index.get(&channel_id).copied()
}

fn valid_frequency(sample: Option<&RawSample>) -> bool {
    sample.is_some_and(|s| s.value > 0.0 && !s.value.is_nan())
}

fn valid_voltage(magnitude: Option<&RawSample>, angle: Option<&RawSample>) -> bool {
    match (magnitude, angle) {
        (Some(mag), Some(ang)) => {
            mag.value > 0.0 && !mag.value.is_nan() && !ang.value.is_nan()
        }
        _ => false,
    }
}

fn phasor(
    index: &HashMap<u32, &RawSample>,
    channels: &PhasorChannels,
    voltage_base_kv: f64,
) -> Option<PhasorReading> {
    let magnitude = lookup(index, channels.magnitude);
    let angle = lookup(index, channels.angle);
    if !valid_voltage(magnitude, angle) {
        return None;
    }
    let magnitude = magnitude?;
    let angle = angle?;
    Some(PhasorReading {
        magnitude_kv: magnitude.value,
        angle_deg: angle.value,
        magnitude_pu: per_unit(magnitude.value, voltage_base_kv),
    })
}

fn reconcile_point(
    point: &MeasurementPoint,
    index: &HashMap<u32, &RawSample>,
) -> Option<Measurement> {
    let frequency = lookup(index, point.channels.frequency);
    let phase_a = phasor(index, &point.channels.voltage.phase_a, point.voltage_base_kv);

    if !valid_frequency(frequency) || phase_a.is_none() {
        trace!(pmu = %point.id, "rejected: no valid frequency + phase-A voltage pair");
        return None;
    }
    let frequency = frequency?;

    let rocof = lookup(index, point.channels.rocof)
        .filter(|s| !s.value.is_nan())
        .map(|s| s.value)
        .unwrap_or(0.0);

    Some(Measurement {
        pmu_id: point.id.clone(),
        display_name: point.display_name.clone(),
        frequency_hz: frequency.value,
        rocof_hz_per_sec: rocof,
        timestamp: frequency.timestamp.clone(),
        quality: frequency.quality,
        voltage_phase_a: phase_a,
        voltage_phase_b: phasor(index, &point.channels.voltage.phase_b, point.voltage_base_kv),
        voltage_phase_c: phasor(index, &point.channels.voltage.phase_c, point.voltage_base_kv),
        status: MeasurementStatus::Active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwatch_topology::{ChannelIds, GeoLocation, VoltageChannels};

    fn sample(point_id: u32, value: f64) -> RawSample {
        RawSample {
            point_id,
            value,
            quality: 0,
            timestamp: "08-29-26 12:00:00.000".to_owned(),
        }
    }

    fn pmu(id: &str, freq: u32, mag: u32, ang: u32) -> MeasurementPoint {
        MeasurementPoint {
            id: id.to_owned(),
            display_name: format!("{id} station"),
            location: GeoLocation::default(),
            voltage_base_kv: 220.0,
            channels: ChannelIds {
                frequency: freq,
                rocof: 0,
                voltage: VoltageChannels {
                    phase_a: PhasorChannels {
                        magnitude: mag,
                        angle: ang,
                    },
                    ..VoltageChannels::default()
                },
            },
        }
    }

    #[test]
    fn accepts_only_complete_valid_readings() {
        let points = vec![pmu("PMU-A", 10, 11, 12)];
        let complete = vec![sample(10, 50.01), sample(11, 130.0), sample(12, 5.0)];
        assert_eq!(reconcile(&points, &complete).len(), 1);

        // Each missing or invalid gate drops the PMU entirely.
        let cases: Vec<Vec<RawSample>> = vec![
            vec![sample(11, 130.0), sample(12, 5.0)],
            vec![sample(10, 0.0), sample(11, 130.0), sample(12, 5.0)],
            vec![sample(10, -50.0), sample(11, 130.0), sample(12, 5.0)],
            vec![sample(10, f64::NAN), sample(11, 130.0), sample(12, 5.0)],
            vec![sample(10, 50.01), sample(12, 5.0)],
            vec![sample(10, 50.01), sample(11, 0.0), sample(12, 5.0)],
            vec![sample(10, 50.01), sample(11, f64::NAN), sample(12, 5.0)],
            vec![sample(10, 50.01), sample(11, 130.0)],
            vec![sample(10, 50.01), sample(11, 130.0), sample(12, f64::NAN)],
        ];
        for samples in cases {
            assert!(
                reconcile(&points, &samples).is_empty(),
                "expected rejection for {samples:?}"
            );
        }
    }

    #[test]
    fn accepted_measurements_are_active() {
        let points = vec![pmu("PMU-A", 10, 11, 12)];
        let samples = vec![sample(10, 50.01), sample(11, 130.0), sample(12, 5.0)];
        let measurements = reconcile(&points, &samples);
        assert_eq!(measurements[0].status, MeasurementStatus::Active);
    }

    #[test]
    fn negative_angle_is_valid() {
        let points = vec![pmu("PMU-A", 10, 11, 12)];
        let samples = vec![sample(10, 50.01), sample(11, 130.0), sample(12, -170.0)];
        let measurements = reconcile(&points, &samples);
        assert_eq!(measurements.len(), 1);
        assert_eq!(
            measurements[0].voltage_phase_a.unwrap().angle_deg,
            -170.0
        );
    }

    #[test]
    fn per_unit_uses_phase_to_neutral_base() {
        // 132 kV measured on a 220 kV base.
        let pu = per_unit(132.0, 220.0);
        assert!((pu - 1.039).abs() < 1e-3, "got {pu}");
        assert_eq!(per_unit(132.0, 0.0), 0.0);
        assert_eq!(per_unit(132.0, -10.0), 0.0);
    }

    #[test]
    fn rocof_defaults_and_never_gates() {
        let mut point = pmu("PMU-A", 10, 11, 12);
        point.channels.rocof = 13;
        let points = vec![point];

        // Missing rocof sample: accepted with 0.0.
        let samples = vec![sample(10, 50.01), sample(11, 130.0), sample(12, 5.0)];
        let measurements = reconcile(&points, &samples);
        assert_eq!(measurements[0].rocof_hz_per_sec, 0.0);

        // NaN rocof: accepted with 0.0.
        let samples = vec![
            sample(10, 50.01),
            sample(11, 130.0),
            sample(12, 5.0),
            sample(13, f64::NAN),
        ];
        assert_eq!(reconcile(&points, &samples)[0].rocof_hz_per_sec, 0.0);

        // Negative rocof is a legitimate reading.
        let samples = vec![
            sample(10, 50.01),
            sample(11, 130.0),
            sample(12, 5.0),
            sample(13, -0.02),
        ];
        assert_eq!(reconcile(&points, &samples)[0].rocof_hz_per_sec, -0.02);
    }

    #[test]
    fn timestamp_and_quality_come_from_frequency_sample() {
        let points = vec![pmu("PMU-A", 10, 11, 12)];
        let mut freq = sample(10, 50.01);
        freq.timestamp = "08-29-26 12:00:01.500".to_owned();
        freq.quality = 29;
        let samples = vec![freq, sample(11, 130.0), sample(12, 5.0)];
        let measurements = reconcile(&points, &samples);
        assert_eq!(measurements[0].timestamp, "08-29-26 12:00:01.500");
        assert_eq!(measurements[0].quality, 29);
    }

    #[test]
    fn duplicate_point_ids_resolve_last_write_wins() {
        let points = vec![pmu("PMU-A", 10, 11, 12)];
        let samples = vec![
            sample(10, 49.90),
            sample(11, 130.0),
            sample(12, 5.0),
            sample(10, 50.05),
        ];
        let measurements = reconcile(&points, &samples);
        assert_eq!(measurements[0].frequency_hz, 50.05);
    }

    #[test]
    fn secondary_phases_populate_without_gating() {
        let mut point = pmu("PMU-A", 10, 11, 12);
        point.channels.voltage.phase_b = PhasorChannels {
            magnitude: 21,
            angle: 22,
        };
        point.channels.voltage.phase_c = PhasorChannels {
            magnitude: 31,
            angle: 32,
        };
        let points = vec![point];

        // Phase B valid, phase C missing: still accepted, C absent.
        let samples = vec![
            sample(10, 50.01),
            sample(11, 130.0),
            sample(12, 5.0),
            sample(21, 131.0),
            sample(22, -115.0),
        ];
        let measurements = reconcile(&points, &samples);
        assert_eq!(measurements.len(), 1);
        let phase_b = measurements[0].voltage_phase_b.expect("phase B present");
        assert_eq!(phase_b.magnitude_kv, 131.0);
        assert!(measurements[0].voltage_phase_c.is_none());
    }

    #[test]
    fn two_pmus_only_reporting_one_appears() {
        let points = vec![pmu("A", 10, 11, 12), pmu("B", 20, 21, 22)];
        let samples = vec![sample(10, 60.01), sample(11, 130.0), sample(12, 5.0)];

        let measurements = reconcile(&points, &samples);
        assert_eq!(measurements.len(), 1);
        let a = &measurements[0];
        assert_eq!(a.pmu_id, "A");
        assert_eq!(a.frequency_hz, 60.01);
        let phase_a = a.voltage_phase_a.expect("phase A present");
        assert_eq!(phase_a.magnitude_kv, 130.0);
        assert_eq!(phase_a.angle_deg, 5.0);
    }

    #[test]
    fn channel_id_zero_never_matches_a_sample() {
        // A malicious/odd sample with point_id 0 must not satisfy an
        // unconfigured channel.
        let mut point = pmu("PMU-A", 10, 11, 12);
        point.channels.rocof = 0;
        let points = vec![point];
        let samples = vec![
            sample(10, 50.01),
            sample(11, 130.0),
            sample(12, 5.0),
            sample(0, 99.0),
        ];
        let measurements = reconcile(&points, &samples);
        assert_eq!(measurements[0].rocof_hz_per_sec, 0.0);
    }
}
