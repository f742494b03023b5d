//! Per-job progress logs with replay and fan-out delivery.

use super::backpressure::DeliveryMetrics;
use super::observer::Observer;
use super::sink::{EventSink, LoggingEventSink};
use crate::core::{EventKind, JobId, ProgressEvent};
use crate::errors::{IncidentflowError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Configuration for the progress bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum undelivered events per observer before it is disconnected.
    pub backlog: usize,
    /// How long observer channels are kept after `done` if observers stay attached.
    pub close_grace: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backlog: 256,
            close_grace: Duration::from_secs(30),
        }
    }
}

impl BusConfig {
    /// Creates a new bus config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-observer backlog. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    /// Sets the close grace period.
    #[must_use]
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }
}

#[derive(Debug)]
struct ObserverSlot {
    id: u64,
    tx: mpsc::Sender<ProgressEvent>,
    overrun: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct ChannelState {
    log: Vec<ProgressEvent>,
    observers: Vec<ObserverSlot>,
    closed: bool,
}

/// Ordered progress log plus fan-out for every job.
///
/// Each job gets an append-only log. `attach` snapshots the log and
/// registers a bounded channel under the same lock `publish` takes, so a
/// new observer sees every event exactly once and in order. `publish` never
/// waits on an observer: a full backlog disconnects that observer instead.
pub struct ProgressBus {
    channels: DashMap<JobId, Arc<Mutex<ChannelState>>>,
    config: BusConfig,
    metrics: Arc<DeliveryMetrics>,
    sink: Arc<dyn EventSink>,
    next_observer_id: AtomicU64,
    lingering: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ProgressBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBus")
            .field("jobs", &self.channels.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl ProgressBus {
    /// Creates a bus that mirrors events to the tracing log.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self::with_sink(config, Arc::new(LoggingEventSink::debug()))
    }

    /// Creates a bus with a custom mirror sink.
    #[must_use]
    pub fn with_sink(config: BusConfig, sink: Arc<dyn EventSink>) -> Self {
        let config = BusConfig {
            backlog: config.backlog.max(1),
            ..config
        };
        Self {
            channels: DashMap::new(),
            config,
            metrics: Arc::new(DeliveryMetrics::default()),
            sink,
            next_observer_id: AtomicU64::new(1),
            lingering: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the bus configuration.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Returns the delivery metrics.
    #[must_use]
    pub fn metrics(&self) -> &DeliveryMetrics {
        &self.metrics
    }

    /// Opens the job's log and appends its `connected` event.
    ///
    /// Opening an already-open job is a no-op.
    pub fn open(&self, job_id: JobId) -> Result<()> {
        let mut created = false;
        self.channels.entry(job_id).or_insert_with(|| {
            created = true;
            Arc::new(Mutex::new(ChannelState::default()))
        });
        if created {
            self.publish(
                job_id,
                EventKind::Connected,
                serde_json::json!({ "job_id": job_id }),
            )?;
        }
        Ok(())
    }

    /// Appends an event and delivers it to every attached observer.
    ///
    /// Publishing [`EventKind::Done`] closes the log, same as [`close`](Self::close).
    pub fn publish(
        &self,
        job_id: JobId,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Result<ProgressEvent> {
        let channel = self.channel(job_id)?;
        let mut state = channel.lock();
        if state.closed {
            return Err(IncidentflowError::ChannelClosed(job_id));
        }

        let event = ProgressEvent::new(job_id, state.log.len() as u64, kind, payload);
        state.log.push(event.clone());
        self.metrics.record_publish();
        self.sink.try_emit(&event);

        let backlog = self.config.backlog;
        let metrics = &self.metrics;
        state.observers.retain(|slot| match slot.tx.try_send(event.clone()) {
            Ok(()) => {
                metrics.record_delivery();
                true
            }
            Err(TrySendError::Full(_)) => {
                slot.overrun.store(true, Ordering::Release);
                metrics.record_overrun();
                warn!(
                    job_id = %job_id,
                    observer_id = slot.id,
                    backlog,
                    "Observer fell behind, disconnecting"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                metrics.record_detach();
                debug!(job_id = %job_id, observer_id = slot.id, "Observer detached");
                false
            }
        });

        if event.is_done() {
            state.closed = true;
            let observers = std::mem::take(&mut state.observers);
            drop(state);
            self.release(job_id, observers);
        }

        Ok(event)
    }

    /// Appends the terminal `done` event.
    pub fn close(&self, job_id: JobId) -> Result<ProgressEvent> {
        self.publish(job_id, EventKind::Done, serde_json::json!({}))
    }

    /// Attaches a new observer: full history first, then live events.
    pub fn attach(&self, job_id: JobId) -> Result<Observer> {
        let channel = self.channel(job_id)?;
        let mut state = channel.lock();

        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let replay: VecDeque<ProgressEvent> = state.log.iter().cloned().collect();
        let overrun = Arc::new(AtomicBool::new(false));

        let live = if state.closed {
            None
        } else {
            let (tx, rx) = mpsc::channel(self.config.backlog);
            state.observers.push(ObserverSlot {
                id,
                tx,
                overrun: Arc::clone(&overrun),
            });
            Some(rx)
        };
        drop(state);

        self.metrics.record_attach();
        self.metrics.record_replay(replay.len());
        debug!(job_id = %job_id, observer_id = id, replay = replay.len(), "Observer attached");

        Ok(Observer::new(
            id,
            job_id,
            self.config.backlog,
            replay,
            live,
            overrun,
        ))
    }

    /// Returns a copy of the job's event log.
    pub fn history(&self, job_id: JobId) -> Result<Vec<ProgressEvent>> {
        Ok(self.channel(job_id)?.lock().log.clone())
    }

    /// Number of observers currently registered for live delivery.
    pub fn observer_count(&self, job_id: JobId) -> Result<usize> {
        let channel = self.channel(job_id)?;
        let mut state = channel.lock();
        state.observers.retain(|slot| !slot.tx.is_closed());
        Ok(state.observers.len())
    }

    /// Observer channels of closed logs still waiting to be released.
    #[must_use]
    pub fn lingering_observers(&self) -> usize {
        self.lingering.load(Ordering::Acquire)
    }

    /// Returns true once `done` has been appended.
    pub fn is_closed(&self, job_id: JobId) -> Result<bool> {
        Ok(self.channel(job_id)?.lock().closed)
    }

    fn channel(&self, job_id: JobId) -> Result<Arc<Mutex<ChannelState>>> {
        self.channels
            .get(&job_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(IncidentflowError::NotFound(job_id))
    }

    /// Drops the closed log's observer channels once every observer has
    /// detached or the grace period elapses.
    fn release(&self, job_id: JobId, observers: Vec<ObserverSlot>) {
        if observers.is_empty() {
            return;
        }
        let grace = self.config.close_grace;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let lingering = Arc::clone(&self.lingering);
                let count = observers.len();
                lingering.fetch_add(count, Ordering::AcqRel);
                handle.spawn(async move {
                    let all_detached =
                        futures::future::join_all(observers.iter().map(|slot| slot.tx.closed()));
                    if tokio::time::timeout(grace, all_detached).await.is_err() {
                        debug!(job_id = %job_id, "Close grace elapsed with observers attached");
                    }
                    drop(observers);
                    lingering.fetch_sub(count, Ordering::AcqRel);
                });
            }
            Err(_) => drop(observers),
        }
    }
}
