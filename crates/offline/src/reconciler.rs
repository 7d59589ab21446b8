//! Queue replay once the server is reachable again.
//!
//! A pass:
//! - takes one snapshot of the queue and replays it in order
//! - acknowledges each confirmed entry on its own, rewriting placeholders
//! - leaves failed entries queued in their original order, and holds back
//!   every later entry on the same product so nothing overtakes them
//! - drops entries the server refused for good, together with changes on a
//!   product whose create was refused
//! - refreshes products, sales and stats from the server afterwards
//!
//! Concurrent triggers join the pass already in flight.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::OnceCell;
use uuid::Uuid;

use stocktrack_core::EntityId;

use crate::connectivity::ConnectivityOracle;
use crate::mirror::MirrorStore;
use crate::queue::{ChangeKind, PendingChange, PendingQueue, ReplayOutcome};
use crate::remote::{delete_already_applied, is_permanent_rejection, RemoteApi, RemoteError};
use crate::store::StoreError;

/// A queued change that did not go through during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedChange {
    pub change_id: Uuid,
    pub kind: &'static str,
    pub error: String,
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Entries confirmed by the server and removed from the queue.
    pub replayed: Vec<Uuid>,
    /// Entries that failed and stay queued.
    pub failed: Vec<FailedChange>,
    /// Entries the server refused for good, removed from the queue.
    pub rejected: Vec<FailedChange>,
    /// Entries held back behind an unconfirmed placeholder or an earlier
    /// failure on the same product.
    pub blocked: Vec<Uuid>,
    /// Whether the mirror was refreshed from the server after the replay.
    pub refreshed: bool,
    /// The pass did not run because the server was unreachable.
    pub skipped_offline: bool,
    /// Queue length once the pass finished.
    pub remaining: usize,
}

impl ReconcileReport {
    /// Nothing failed and nothing was left behind.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
            && self.rejected.is_empty()
            && self.blocked.is_empty()
            && !self.skipped_offline
    }
}

type InFlight = Arc<OnceCell<ReconcileReport>>;

pub struct Reconciler {
    mirror: Arc<MirrorStore>,
    queue: PendingQueue,
    remote: Arc<dyn RemoteApi>,
    connectivity: Arc<dyn ConnectivityOracle>,
    in_flight: Mutex<Option<InFlight>>,
}

impl Reconciler {
    pub fn new(
        mirror: Arc<MirrorStore>,
        remote: Arc<dyn RemoteApi>,
        connectivity: Arc<dyn ConnectivityOracle>,
    ) -> Self {
        Self {
            queue: PendingQueue::new(mirror.clone()),
            mirror,
            remote,
            connectivity,
            in_flight: Mutex::new(None),
        }
    }

    /// Run a reconciliation pass, or join the one already running.
    pub async fn reconcile(&self) -> ReconcileReport {
        let cell = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            slot.get_or_insert_with(|| Arc::new(OnceCell::new())).clone()
        };

        let report = cell.get_or_init(|| self.run_pass()).await.clone();

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            *slot = None;
        }
        report
    }

    async fn run_pass(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let pending = self.queue.list().await;
        if !self.connectivity.is_reachable() {
            tracing::debug!(pending = pending.len(), "server unreachable, skipping reconciliation");
            report.skipped_offline = true;
            report.remaining = pending.len();
            return report;
        }
        if pending.is_empty() {
            tracing::debug!("nothing to reconcile");
            return report;
        }

        tracing::info!(pending = pending.len(), "starting reconciliation pass");

        // Placeholders confirmed during this pass. The queue snapshot was
        // taken up front, so later entries still carry the old references.
        let mut resolved: HashMap<EntityId, EntityId> = HashMap::new();
        // Products with an entry left behind; later entries on them wait.
        let mut held: HashSet<EntityId> = HashSet::new();
        // Entries removed along with a refused create.
        let mut dropped: HashSet<Uuid> = HashSet::new();

        for change in pending {
            if dropped.contains(&change.change_id) {
                continue;
            }

            let mut kind = change.kind.clone();
            kind.resolve_placeholders(&resolved);
            let target = kind.product_target();

            if let Some(placeholder) = kind.unresolved_reference() {
                tracing::warn!(
                    change_id = %change.change_id,
                    kind = kind.type_name(),
                    %placeholder,
                    "change references an unconfirmed placeholder, leaving it queued"
                );
                held.insert(target);
                report.blocked.push(change.change_id);
                continue;
            }
            if held.contains(&target) {
                tracing::debug!(
                    change_id = %change.change_id,
                    kind = kind.type_name(),
                    product = %target,
                    "earlier change on this product is still queued, holding back"
                );
                report.blocked.push(change.change_id);
                continue;
            }

            let outcome = match self.replay(&kind).await {
                Ok(outcome) => outcome,
                Err(err) if is_permanent_rejection(&err) => {
                    let removed = self
                        .record_rejection(&mut report, &mut dropped, &change, err.to_string())
                        .await;
                    if !removed {
                        held.insert(target);
                    }
                    continue;
                }
                Err(err) => {
                    self.record_failure(&mut report, &change, err.to_string());
                    held.insert(target);
                    continue;
                }
            };

            if let Err(err) = self.queue.acknowledge(change.change_id, &outcome).await {
                tracing::error!(
                    change_id = %change.change_id,
                    error = %err,
                    "server accepted change but acknowledging it failed"
                );
                self.record_failure(&mut report, &change, err.to_string());
                held.insert(target);
                continue;
            }

            match &outcome {
                ReplayOutcome::ProductCreated {
                    placeholder,
                    product,
                } => {
                    resolved.insert(*placeholder, product.id);
                }
                ReplayOutcome::SaleCreated { placeholder, sale } => {
                    resolved.insert(*placeholder, sale.id);
                }
                ReplayOutcome::Applied => {}
            }

            tracing::debug!(change_id = %change.change_id, kind = kind.type_name(), "change replayed");
            report.replayed.push(change.change_id);
        }

        match self.refresh().await {
            Ok(()) => report.refreshed = true,
            Err(err) => tracing::warn!(error = %err, "post-reconciliation refresh failed"),
        }

        report.remaining = self.queue.len().await;

        tracing::info!(
            replayed = report.replayed.len(),
            failed = report.failed.len(),
            rejected = report.rejected.len(),
            blocked = report.blocked.len(),
            remaining = report.remaining,
            "reconciliation pass finished"
        );

        report
    }

    fn record_failure(&self, report: &mut ReconcileReport, change: &PendingChange, error: String) {
        let kind = change.kind.type_name();
        tracing::warn!(change_id = %change.change_id, kind, %error, "failed to replay queued change, it stays queued");
        report.failed.push(FailedChange {
            change_id: change.change_id,
            kind,
            error,
        });
    }

    /// Drop a refused change from the queue. The refresh that ends the pass
    /// takes its optimistic effect out of the mirror. Returns `false` if the
    /// change could not be removed and stays queued as a failure.
    async fn record_rejection(
        &self,
        report: &mut ReconcileReport,
        dropped: &mut HashSet<Uuid>,
        change: &PendingChange,
        error: String,
    ) -> bool {
        let removed = match self.queue.discard(change.change_id).await {
            Ok(removed) => removed,
            Err(err) => {
                tracing::error!(
                    change_id = %change.change_id,
                    error = %err,
                    "server refused change but removing it failed"
                );
                self.record_failure(report, change, error);
                return false;
            }
        };

        tracing::warn!(
            change_id = %change.change_id,
            kind = change.kind.type_name(),
            %error,
            "server refused queued change, dropping it"
        );
        report.rejected.push(FailedChange {
            change_id: change.change_id,
            kind: change.kind.type_name(),
            error,
        });

        for dependent in removed.into_iter().filter(|c| c.change_id != change.change_id) {
            tracing::warn!(
                change_id = %dependent.change_id,
                kind = dependent.kind.type_name(),
                refused = %change.change_id,
                "dropping change on a product whose create was refused"
            );
            dropped.insert(dependent.change_id);
            report.rejected.push(FailedChange {
                change_id: dependent.change_id,
                kind: dependent.kind.type_name(),
                error: format!("depends on refused change {}", change.change_id),
            });
        }
        true
    }

    /// Send one change to the server.
    async fn replay(&self, kind: &ChangeKind) -> Result<ReplayOutcome, RemoteError> {
        match kind {
            ChangeKind::CreateProduct { id, data } => {
                let product = self.remote.create_product(data).await?;
                Ok(ReplayOutcome::ProductCreated {
                    placeholder: *id,
                    product,
                })
            }
            ChangeKind::UpdateProduct { id, data } => {
                let remote_id = id.remote().ok_or(RemoteError::Placeholder(*id))?;
                self.remote.update_product(remote_id, data).await?;
                Ok(ReplayOutcome::Applied)
            }
            ChangeKind::DeleteProduct { id } => {
                let remote_id = id.remote().ok_or(RemoteError::Placeholder(*id))?;
                match self.remote.delete_product(remote_id).await {
                    Ok(()) => Ok(ReplayOutcome::Applied),
                    Err(err) if delete_already_applied(&err) => {
                        tracing::debug!(%id, "product already gone on the server");
                        Ok(ReplayOutcome::Applied)
                    }
                    Err(err) => Err(err),
                }
            }
            ChangeKind::CreateSale { id, data } => {
                let sale = self.remote.create_sale(data).await?;
                Ok(ReplayOutcome::SaleCreated {
                    placeholder: *id,
                    sale,
                })
            }
        }
    }

    /// Replace the mirrored collections with the server's, then layer the
    /// still-queued changes back on top.
    async fn refresh(&self) -> Result<(), RefreshError> {
        let (products, sales, stats) = tokio::try_join!(
            self.remote.list_products(),
            self.remote.list_sales(),
            self.remote.stats(),
        )?;

        self.mirror
            .update(|snapshot| {
                snapshot.products = products.clone();
                snapshot.sales = sales.clone();
                snapshot.stats = stats;
                snapshot.reapply_pending();
                Ok::<_, StoreError>(())
            })
            .await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum RefreshError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_report_has_nothing_left_behind() {
        let mut report = ReconcileReport::default();
        assert!(report.is_clean());

        report.blocked.push(Uuid::now_v7());
        assert!(!report.is_clean());

        let offline = ReconcileReport {
            skipped_offline: true,
            ..Default::default()
        };
        assert!(!offline.is_clean());
    }

    #[test]
    fn rejections_make_the_report_unclean() {
        let report = ReconcileReport {
            rejected: vec![FailedChange {
                change_id: Uuid::now_v7(),
                kind: "CREATE_VENTA",
                error: "API error (400): Stock insuficiente".into(),
            }],
            ..Default::default()
        };
        assert!(!report.is_clean());
    }

    #[test]
    fn report_serializes_failures_with_their_kind() {
        let report = ReconcileReport {
            failed: vec![FailedChange {
                change_id: Uuid::nil(),
                kind: "CREATE_VENTA",
                error: "API error (400): Stock insuficiente".into(),
            }],
            remaining: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failed"][0]["kind"], "CREATE_VENTA");
        assert_eq!(json["remaining"], 1);
    }
}
