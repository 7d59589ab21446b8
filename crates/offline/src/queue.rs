//! Pending-change queue persisted inside the mirror record.
//!
//! Entries are mutations that have not reached the server yet. FIFO order is
//! the replay order. Appends happen in the same atomic mirror write as the
//! optimistic local mutation, so every queued entry has a matching mirror
//! state and vice versa.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stocktrack_core::{EntityId, Product, ProductCreate, ProductUpdate, Sale, SaleCreate};

use crate::mirror::{MirrorSnapshot, MirrorStore};
use crate::store::StoreError;

/// The four kinds of queued mutation, each with its own typed payload.
///
/// `id` is the target for updates/deletes, and the placeholder handed out
/// for creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeKind {
    #[serde(rename = "CREATE_PRODUCTO")]
    CreateProduct { id: EntityId, data: ProductCreate },
    #[serde(rename = "UPDATE_PRODUCTO")]
    UpdateProduct { id: EntityId, data: ProductUpdate },
    #[serde(rename = "DELETE_PRODUCTO")]
    DeleteProduct { id: EntityId },
    #[serde(rename = "CREATE_VENTA")]
    CreateSale { id: EntityId, data: SaleCreate },
}

/// A queued mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    #[serde(rename = "changeId")]
    pub change_id: Uuid,
    #[serde(flatten)]
    pub kind: ChangeKind,
    #[serde(rename = "timestamp", with = "stocktrack_core::timestamp")]
    pub enqueued_at: DateTime<Utc>,
}

impl ChangeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ChangeKind::CreateProduct { .. } => "CREATE_PRODUCTO",
            ChangeKind::UpdateProduct { .. } => "UPDATE_PRODUCTO",
            ChangeKind::DeleteProduct { .. } => "DELETE_PRODUCTO",
            ChangeKind::CreateSale { .. } => "CREATE_VENTA",
        }
    }

    /// A placeholder this change *references* (not one it creates).
    ///
    /// Such a change cannot be delivered until the create that owns the
    /// placeholder has been confirmed and the reference rewritten.
    pub fn unresolved_reference(&self) -> Option<EntityId> {
        let referenced = match self {
            ChangeKind::CreateProduct { .. } => return None,
            ChangeKind::UpdateProduct { id, .. } | ChangeKind::DeleteProduct { id } => *id,
            ChangeKind::CreateSale { data, .. } => data.product_id,
        };
        referenced.is_local().then_some(referenced)
    }

    /// The product this change creates or touches.
    pub fn product_target(&self) -> EntityId {
        match self {
            ChangeKind::CreateProduct { id, .. }
            | ChangeKind::UpdateProduct { id, .. }
            | ChangeKind::DeleteProduct { id } => *id,
            ChangeKind::CreateSale { data, .. } => data.product_id,
        }
    }

    /// Rewrite product references from a placeholder to its server id.
    pub fn rewrite_product_ref(&mut self, from: EntityId, to: EntityId) {
        match self {
            ChangeKind::UpdateProduct { id, .. } | ChangeKind::DeleteProduct { id } => {
                if *id == from {
                    *id = to;
                }
            }
            ChangeKind::CreateSale { data, .. } => {
                if data.product_id == from {
                    data.product_id = to;
                }
            }
            ChangeKind::CreateProduct { .. } => {}
        }
    }

    /// Apply every known placeholder -> server id mapping.
    pub fn resolve_placeholders(&mut self, resolved: &HashMap<EntityId, EntityId>) {
        if let Some(local) = self.unresolved_reference() {
            if let Some(remote) = resolved.get(&local) {
                self.rewrite_product_ref(local, *remote);
            }
        }
    }

    /// Re-apply this change's optimistic effect to `snapshot`.
    ///
    /// Idempotent: applying twice leaves the same state as applying once.
    pub(crate) fn apply_locally(&self, snapshot: &mut MirrorSnapshot, at: DateTime<Utc>) {
        match self {
            ChangeKind::CreateProduct { id, data } => {
                if snapshot.product(*id).is_none() {
                    snapshot.products.push(Product::from_create(*id, data, at));
                }
            }
            ChangeKind::UpdateProduct { id, data } => {
                if let Some(product) = snapshot.product_mut(*id) {
                    product.apply_update(data, at);
                }
            }
            ChangeKind::DeleteProduct { id } => {
                snapshot.products.retain(|p| p.id != *id);
            }
            ChangeKind::CreateSale { id, data } => {
                if snapshot.sale(*id).is_none() {
                    snapshot.sales.push(Sale::from_create(*id, data, at));
                }
            }
        }
    }
}

impl PendingChange {
    pub fn new(kind: ChangeKind) -> Self {
        Self {
            change_id: Uuid::now_v7(),
            kind,
            enqueued_at: Utc::now(),
        }
    }
}

/// What the server confirmed for a replayed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// A product create; the placeholder now maps to `product.id`.
    ProductCreated { placeholder: EntityId, product: Product },
    /// A sale create; the placeholder now maps to `sale.id`.
    SaleCreated { placeholder: EntityId, sale: Sale },
    /// An update or delete with nothing to rewrite.
    Applied,
}

impl MirrorSnapshot {
    /// Append a change to the end of the queue.
    pub fn enqueue(&mut self, kind: ChangeKind) -> PendingChange {
        let change = PendingChange::new(kind);
        self.pending_changes.push(change.clone());
        change
    }

    /// Remove a confirmed change and fold its outcome into the mirror.
    ///
    /// Returns `false` if the change was no longer queued.
    pub fn acknowledge(&mut self, change_id: Uuid, outcome: &ReplayOutcome) -> bool {
        let Some(idx) = self
            .pending_changes
            .iter()
            .position(|c| c.change_id == change_id)
        else {
            return false;
        };
        self.pending_changes.remove(idx);

        match outcome {
            ReplayOutcome::ProductCreated {
                placeholder,
                product,
            } => {
                if let Some(local) = self.product_mut(*placeholder) {
                    *local = product.clone();
                }
                for sale in &mut self.sales {
                    if sale.product_id == *placeholder {
                        sale.product_id = product.id;
                    }
                }
                for change in &mut self.pending_changes {
                    change.kind.rewrite_product_ref(*placeholder, product.id);
                }
            }
            ReplayOutcome::SaleCreated { placeholder, sale } => {
                if let Some(local) = self.sale_mut(*placeholder) {
                    *local = sale.clone();
                }
            }
            ReplayOutcome::Applied => {}
        }
        true
    }

    /// Remove a change the server refused for good.
    ///
    /// A refused product create takes every later change on its placeholder
    /// with it, since those can never be delivered. Returns the removed
    /// entries, the refused one first; empty if it was no longer queued.
    pub fn discard(&mut self, change_id: Uuid) -> Vec<PendingChange> {
        let Some(idx) = self
            .pending_changes
            .iter()
            .position(|c| c.change_id == change_id)
        else {
            return Vec::new();
        };
        let refused = self.pending_changes.remove(idx);

        let mut removed = Vec::new();
        if let ChangeKind::CreateProduct { id: placeholder, .. } = refused.kind {
            let (dependent, kept): (Vec<_>, Vec<_>) = self
                .pending_changes
                .drain(..)
                .partition(|c| c.kind.product_target() == placeholder);
            self.pending_changes = kept;
            removed = dependent;
        }
        removed.insert(0, refused);
        removed
    }

    /// Re-apply every queued change on top of the current collections.
    pub fn reapply_pending(&mut self) {
        let pending = self.pending_changes.clone();
        for change in &pending {
            change.kind.apply_locally(self, change.enqueued_at);
        }
    }
}

/// Facade over the mirror's queue field.
#[derive(Debug, Clone)]
pub struct PendingQueue {
    mirror: Arc<MirrorStore>,
}

impl PendingQueue {
    pub fn new(mirror: Arc<MirrorStore>) -> Self {
        Self { mirror }
    }

    /// Append a timestamped change and persist it.
    pub async fn enqueue(&self, kind: ChangeKind) -> Result<PendingChange, StoreError> {
        self.mirror
            .update(|snapshot| Ok::<_, StoreError>(snapshot.enqueue(kind.clone())))
            .await
    }

    /// All queued changes, in enqueue order.
    pub async fn list(&self) -> Vec<PendingChange> {
        self.mirror.read().await.pending_changes
    }

    pub async fn len(&self) -> usize {
        self.list().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every queued change.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.mirror
            .update(|snapshot| {
                snapshot.pending_changes.clear();
                Ok::<_, StoreError>(())
            })
            .await
    }

    /// Remove one confirmed change, rewriting placeholder references in the
    /// same write. Acknowledging twice is a no-op.
    pub async fn acknowledge(
        &self,
        change_id: Uuid,
        outcome: &ReplayOutcome,
    ) -> Result<bool, StoreError> {
        self.mirror
            .update(|snapshot| Ok::<_, StoreError>(snapshot.acknowledge(change_id, outcome)))
            .await
    }

    /// Remove a refused change and anything that depends on it.
    pub async fn discard(&self, change_id: Uuid) -> Result<Vec<PendingChange>, StoreError> {
        self.mirror
            .update(|snapshot| Ok::<_, StoreError>(snapshot.discard(change_id)))
            .await
    }
}
