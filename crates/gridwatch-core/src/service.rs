//! ---
//! gw_section: "04-acquisition-core"
//! gw_subsection: "module"
//! gw_type: "source"
//! gw_scope: "code"
//! gw_description: "Measurement reconciliation and snapshot publishing."
//! gw_version: "v0.1.0"
//! gw_owner: "tbd"
//! ---
//! The polling scheduler and snapshot publisher. One explicitly owned
//! service instance drives the fetch-reconcile-publish cycle on a fixed
//! cadence and fans each snapshot out to in-process subscribers at most
//! once per cycle. The "last known good" snapshot and the subscriber list
//! are the only shared mutable state.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use gridwatch_common::config::AcquisitionConfig;
use gridwatch_historian::SampleSource;
use gridwatch_topology::{MeasurementPoint, Topology};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::measurement::Snapshot;
use crate::reconcile::reconcile;

type SnapshotCallback = Box<dyn Fn(Arc<Snapshot>) + Send + Sync + 'static>;

/// One registered callback plus the sequence number it last saw. Every
/// delivery path goes through [`deliver`], which holds `last_delivered`
/// across the callback: a subscriber can never observe snapshot N after
/// N+1, even when the replay in [`PmuDataService::subscribe`] races a
/// publishing cycle.
struct Subscriber {
    callback: SnapshotCallback,
    last_delivered: Mutex<u64>,
}

/// Lifecycle state of the acquisition service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Polling,
    /// Terminal: topology yielded no points, there is nothing to poll.
    Failed,
}

/// PMU data acquisition service.
///
/// Owns the topology, the sample source and the polling task. There is no
/// hidden process-wide instance: the application root constructs exactly
/// one and hands it to consumers; [`PmuDataService::dispose`] (or drop)
/// stops polling before releasing subscribers.
pub struct PmuDataService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    topology: Arc<Topology>,
    source: Arc<dyn SampleSource>,
    poll_interval: Duration,
    point_ids: Vec<u32>,
    state: Mutex<SharedState>,
    /// One cycle in flight at a time; timer ticks and `force_update` both
    /// serialize here, which also gives subscribers total snapshot order.
    cycle_gate: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct SharedState {
    snapshot: Option<Arc<Snapshot>>,
    sequence: u64,
    subscribers: HashMap<u64, Arc<Subscriber>>,
    next_subscriber_id: u64,
    poller: Option<PollerHandle>,
}

struct PollerHandle {
    shutdown: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

/// Registration handle returned by [`PmuDataService::subscribe`]. Dropping
/// it deregisters the callback.
pub struct Subscription {
    service: Weak<ServiceInner>,
    id: u64,
}

impl Subscription {
    /// Explicitly deregister. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.service.upgrade() {
            inner.state.lock().subscribers.remove(&self.id);
        }
    }
}

impl PmuDataService {
    pub fn new(
        topology: Arc<Topology>,
        source: Arc<dyn SampleSource>,
        config: &AcquisitionConfig,
    ) -> Self {
        let point_ids = topology.configured_point_ids();
        if point_ids.is_empty() {
            warn!("topology has no configured channels; service will not produce data");
        }
        Self {
            inner: Arc::new(ServiceInner {
                topology,
                source,
                poll_interval: config.poll_interval,
                point_ids,
                state: Mutex::new(SharedState::default()),
                cycle_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> ServiceState {
        if self.inner.point_ids.is_empty() {
            return ServiceState::Failed;
        }
        if self.inner.state.lock().poller.is_some() {
            ServiceState::Polling
        } else {
            ServiceState::Idle
        }
    }

    /// Begin polling: one immediate cycle, then one per interval tick.
    /// Idempotent; a second call never arms a second timer.
    pub fn start(&self) {
        if self.inner.point_ids.is_empty() {
            warn!("refusing to start polling with an empty topology");
            return;
        }
        let mut state = self.inner.state.lock();
        if state.poller.is_some() {
            debug!("polling already active, start ignored");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // Biased: a pending stop always wins over a due tick.
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        debug!("polling loop stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        run_cycle(&inner).await;
                    }
                }
            }
        });
        state.poller = Some(PollerHandle {
            shutdown: shutdown_tx,
            _task: task,
        });
        info!(interval = ?self.inner.poll_interval, points = self.inner.point_ids.len(), "polling started");
    }

    /// Cancel the timer. An in-flight cycle may complete and publish once;
    /// no further cycles occur. Idempotent.
    pub fn stop(&self) {
        let poller = self.inner.state.lock().poller.take();
        if let Some(poller) = poller {
            let _ = poller.shutdown.send(true);
            info!("polling stopped");
        }
    }

    /// Stop polling and drop all subscribers and the retained snapshot.
    pub fn dispose(&self) {
        self.stop();
        let mut state = self.inner.state.lock();
        state.subscribers.clear();
        state.snapshot = None;
    }

    /// Register a snapshot callback.
    ///
    /// If a snapshot already exists the callback receives it synchronously
    /// before this returns, so late observers never start from "no data".
    /// The first subscriber on an idle service lazily starts polling.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<Snapshot>) + Send + Sync + 'static,
    {
        let subscriber = Arc::new(Subscriber {
            callback: Box::new(callback),
            last_delivered: Mutex::new(0),
        });
        let (id, replay, lazy_start) = {
            let mut state = self.inner.state.lock();
            let id = state.next_subscriber_id;
            state.next_subscriber_id += 1;
            state.subscribers.insert(id, subscriber.clone());
            let lazy_start = state.poller.is_none() && !self.inner.point_ids.is_empty();
            (id, state.snapshot.clone(), lazy_start)
        };

        // A cycle completing between the unlock above and this replay may
        // already have delivered a newer snapshot; `deliver` drops the
        // stale one instead of handing it out after the fact.
        if let Some(snapshot) = replay {
            deliver(&subscriber, &snapshot);
        }
        if lazy_start {
            self.start();
        }

        Subscription {
            service: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Run one out-of-band cycle, bypassing the timer but publishing
    /// normally. Returns the snapshot it published, if any.
    pub async fn force_update(&self) -> Option<Arc<Snapshot>> {
        run_cycle(&self.inner).await
    }

    /// The most recently published snapshot, if any cycle has succeeded.
    pub fn last_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.state.lock().snapshot.clone()
    }

    /// The static measurement point table, read-only.
    pub fn points(&self) -> &[MeasurementPoint] {
        &self.inner.topology.points
    }
}

impl Drop for PmuDataService {
    fn drop(&mut self) {
        // The polling task holds its own Arc to the inner state; signal it
        // so the task exits and the state can actually be released.
        self.stop();
    }
}

/// One fetch-reconcile-publish cycle. Returns the published snapshot, or
/// `None` when the cycle produced nothing (the last known good snapshot
/// stands and subscribers see no update).
async fn run_cycle(inner: &Arc<ServiceInner>) -> Option<Arc<Snapshot>> {
    let _flight = inner.cycle_gate.lock().await;
    if inner.point_ids.is_empty() {
        return None;
    }

    let samples = inner.source.fetch_current(&inner.point_ids).await;
    let measurements = reconcile(&inner.topology.points, &samples);
    if measurements.is_empty() {
        warn!(
            requested = inner.point_ids.len(),
            returned = samples.len(),
            "cycle produced no accepted measurements, keeping last snapshot"
        );
        return None;
    }

    let (snapshot, subscribers) = {
        let mut state = inner.state.lock();
        state.sequence += 1;
        let snapshot = Arc::new(Snapshot {
            sequence: state.sequence,
            taken_at: Utc::now(),
            measurements,
        });
        state.snapshot = Some(snapshot.clone());
        let subscribers: Vec<Arc<Subscriber>> = state.subscribers.values().cloned().collect();
        (snapshot, subscribers)
    };

    // Delivery happens inside the cycle gate: snapshots reach every
    // subscriber in sequence order, at most once per cycle.
    for subscriber in &subscribers {
        deliver(subscriber, &snapshot);
    }

    info!(
        sequence = snapshot.sequence,
        measurements = snapshot.measurements.len(),
        subscribers = subscribers.len(),
        "snapshot published"
    );
    Some(snapshot)
}

/// Invoke one subscriber, isolating its failures from the others.
///
/// Skips any snapshot at or below the sequence this subscriber already
/// saw, and keeps `last_delivered` locked across the callback so two
/// deliverers cannot invoke it out of order.
fn deliver(subscriber: &Subscriber, snapshot: &Arc<Snapshot>) {
    let mut last = subscriber.last_delivered.lock();
    if snapshot.sequence <= *last {
        debug!(
            sequence = snapshot.sequence,
            delivered = *last,
            "skipping stale snapshot delivery"
        );
        return;
    }
    *last = snapshot.sequence;
    let snapshot = snapshot.clone();
    if catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(snapshot))).is_err() {
        warn!("subscriber callback panicked, continuing delivery");
    }
}
