//! Background worker: probes the server, tracks connectivity and reconciles
//! the queue after reconnects.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, Sleep};

use crate::connectivity::{ConnectivityOracle, ConnectivityState, OfflineMode};
use crate::queue::PendingQueue;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::remote::RemoteApi;

/// Event emitted after a reconciliation pass that did something.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Completed {
        replayed: usize,
        refreshed: bool,
    },
    Failed {
        replayed: usize,
        failed: usize,
        rejected: usize,
        blocked: usize,
        remaining: usize,
        error: Option<String>,
    },
}

impl SyncEvent {
    /// `None` for passes that were skipped or had nothing to do.
    pub fn from_report(report: &ReconcileReport) -> Option<Self> {
        if report.skipped_offline {
            return None;
        }
        if report.is_clean() {
            if report.replayed.is_empty() {
                return None;
            }
            return Some(SyncEvent::Completed {
                replayed: report.replayed.len(),
                refreshed: report.refreshed,
            });
        }
        Some(SyncEvent::Failed {
            replayed: report.replayed.len(),
            failed: report.failed.len(),
            rejected: report.rejected.len(),
            blocked: report.blocked.len(),
            remaining: report.remaining,
            error: report
                .failed
                .first()
                .or(report.rejected.first())
                .map(|f| f.error.clone()),
        })
    }
}

/// Timing knobs for the worker loop.
#[derive(Debug, Clone, Copy)]
pub struct WorkerTiming {
    pub probe_interval: Duration,
    pub reconnect_debounce: Duration,
}

impl Default for WorkerTiming {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            reconnect_debounce: Duration::from_millis(1500),
        }
    }
}

/// Background sync worker.
///
/// Every probe tick checks the server's health and feeds the result into
/// [`OfflineMode`]. An offline -> online transition (from the probe or from
/// anyone else calling [`OfflineMode::set_online`]) schedules a pass after
/// the debounce delay; going offline again before it fires cancels it. While
/// online with changes still queued, each tick retries them.
pub struct SyncWorker {
    remote: Arc<dyn RemoteApi>,
    offline_mode: Arc<OfflineMode>,
    reconciler: Arc<Reconciler>,
    queue: PendingQueue,
    timing: WorkerTiming,
    events: broadcast::Sender<SyncEvent>,
    shutdown: Arc<Notify>,
}

/// Handle to a running worker.
pub struct SyncWorkerHandle {
    join: JoinHandle<()>,
    shutdown: Arc<Notify>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncWorkerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Request a graceful stop and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "sync worker task failed");
        }
    }
}

impl SyncWorker {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        offline_mode: Arc<OfflineMode>,
        reconciler: Arc<Reconciler>,
        queue: PendingQueue,
        timing: WorkerTiming,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            remote,
            offline_mode,
            reconciler,
            queue,
            timing,
            events,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Check the server once and record the result. Returns whether the
    /// state changed.
    pub async fn probe(&self) -> bool {
        match self.remote.health().await {
            Ok(()) => self.offline_mode.set_online(),
            Err(err) => {
                tracing::debug!(error = %err, "health probe failed");
                self.offline_mode.set_offline()
            }
        }
    }

    /// Run one pass now and publish its event.
    pub async fn sync_now(&self) -> ReconcileReport {
        let report = self.reconciler.reconcile().await;
        if let Some(event) = SyncEvent::from_report(&report) {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        report
    }

    /// Spawn the worker loop. The first probe happens one interval after
    /// start; callers wanting an immediate check use [`SyncWorker::probe`]
    /// before starting.
    pub fn start(self) -> SyncWorkerHandle {
        let shutdown = self.shutdown.clone();
        let events = self.events.clone();
        // Subscribe before spawning so transitions made right after `start`
        // returns are not missed.
        let transitions = self.offline_mode.subscribe();
        let join = tokio::spawn(async move { self.run(transitions).await });
        SyncWorkerHandle {
            join,
            shutdown,
            events,
        }
    }

    async fn run(self, mut transitions: watch::Receiver<ConnectivityState>) {
        tracing::info!(
            probe_interval = ?self.timing.probe_interval,
            debounce = ?self.timing.reconnect_debounce,
            "sync worker started"
        );

        let mut probe = tokio::time::interval_at(
            Instant::now() + self.timing.probe_interval,
            self.timing.probe_interval,
        );
        probe.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut reconnect: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    tracing::info!("sync worker received shutdown signal");
                    break;
                }
                changed = transitions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *transitions.borrow_and_update();
                    match state {
                        ConnectivityState::Online => {
                            tracing::debug!("back online, scheduling reconciliation");
                            reconnect = Some(Box::pin(tokio::time::sleep(self.timing.reconnect_debounce)));
                        }
                        ConnectivityState::Offline => {
                            if reconnect.take().is_some() {
                                tracing::debug!("went offline again, reconciliation cancelled");
                            }
                        }
                    }
                }
                _ = wait_for(&mut reconnect) => {
                    reconnect = None;
                    self.sync_now().await;
                }
                _ = probe.tick() => {
                    let transitioned = self.probe().await;
                    if !transitioned
                        && reconnect.is_none()
                        && self.offline_mode.is_reachable()
                        && !self.queue.is_empty().await
                    {
                        tracing::debug!("retrying queued changes");
                        self.sync_now().await;
                    }
                }
            }
        }

        tracing::info!("sync worker stopped");
    }
}

async fn wait_for(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
