//! Local mirror of the server's collections.
//!
//! The whole mirror (products, sales, stats, queue, sync metadata) is one
//! serialized record under [`STORAGE_KEY`]. Saves replace the record as a
//! unit; mutations go through [`MirrorStore::update`], which serializes
//! writers in-process and detects foreign writers through the record version.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use stocktrack_core::{EntityId, Product, Sale, Stats};

use crate::queue::PendingChange;
use crate::store::{KeyValueStore, StoreError};

/// Fixed key of the mirror record.
pub const STORAGE_KEY: &str = "stocktrack_offline_data";

/// Attempts before a write gives up on repeated version conflicts.
const MAX_WRITE_ATTEMPTS: usize = 5;

/// Last-known copy of the server state plus sync metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorSnapshot {
    #[serde(rename = "productos", default)]
    pub products: Vec<Product>,
    #[serde(rename = "ventas", default)]
    pub sales: Vec<Sale>,
    #[serde(default)]
    pub stats: Stats,
    #[serde(
        rename = "lastSync",
        with = "stocktrack_core::timestamp",
        default = "Utc::now"
    )]
    pub last_sync: DateTime<Utc>,
    #[serde(rename = "pendingChanges", default)]
    pub pending_changes: Vec<PendingChange>,
    /// Next placeholder number; persisted so placeholders stay unique
    /// across restarts.
    #[serde(rename = "nextLocalId", default = "first_local_id")]
    pub next_local_id: u64,
}

fn first_local_id() -> u64 {
    1
}

impl Default for MirrorSnapshot {
    fn default() -> Self {
        Self {
            products: Vec::new(),
            sales: Vec::new(),
            stats: Stats::default(),
            last_sync: Utc::now(),
            pending_changes: Vec::new(),
            next_local_id: first_local_id(),
        }
    }
}

impl MirrorSnapshot {
    /// Hand out a fresh placeholder id.
    pub fn allocate_local_id(&mut self) -> EntityId {
        let id = EntityId::Local(self.next_local_id);
        self.next_local_id += 1;
        id
    }

    pub fn product(&self, id: EntityId) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    pub fn product_mut(&mut self, id: EntityId) -> Option<&mut Product> {
        self.products.iter_mut().find(|p| p.id == id)
    }

    pub fn sale(&self, id: EntityId) -> Option<&Sale> {
        self.sales.iter().find(|s| s.id == id)
    }

    pub fn sale_mut(&mut self, id: EntityId) -> Option<&mut Sale> {
        self.sales.iter_mut().find(|s| s.id == id)
    }
}

/// Fields to merge into the snapshot; `None` leaves the field as is.
#[derive(Debug, Clone, Default)]
pub struct MirrorPatch {
    pub products: Option<Vec<Product>>,
    pub sales: Option<Vec<Sale>>,
    pub stats: Option<Stats>,
    pub pending_changes: Option<Vec<PendingChange>>,
}

impl MirrorPatch {
    pub fn products(mut self, products: Vec<Product>) -> Self {
        self.products = Some(products);
        self
    }

    pub fn sales(mut self, sales: Vec<Sale>) -> Self {
        self.sales = Some(sales);
        self
    }

    pub fn stats(mut self, stats: Stats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn pending_changes(mut self, pending: Vec<PendingChange>) -> Self {
        self.pending_changes = Some(pending);
        self
    }

    fn apply(&self, snapshot: &mut MirrorSnapshot) {
        if let Some(products) = &self.products {
            snapshot.products = products.clone();
        }
        if let Some(sales) = &self.sales {
            snapshot.sales = sales.clone();
        }
        if let Some(stats) = self.stats {
            snapshot.stats = stats;
        }
        if let Some(pending) = &self.pending_changes {
            snapshot.pending_changes = pending.clone();
        }
    }
}

/// Persistent store for the mirror record.
pub struct MirrorStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    /// Single-writer discipline for this process.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for MirrorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorStore").field("key", &self.key).finish()
    }
}

impl MirrorStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_key(kv, STORAGE_KEY)
    }

    pub fn with_key(kv: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Current snapshot. Never fails: a missing, unreadable or corrupt record
    /// yields the default snapshot.
    pub async fn read(&self) -> MirrorSnapshot {
        match self.load().await {
            Ok((snapshot, _)) => snapshot,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read mirror, using defaults");
                MirrorSnapshot::default()
            }
        }
    }

    /// Merge `patch` into the stored snapshot and persist it.
    pub async fn write(&self, patch: MirrorPatch) -> Result<MirrorSnapshot, StoreError> {
        self.update(|snapshot| {
            patch.apply(snapshot);
            Ok::<_, StoreError>(snapshot.clone())
        })
        .await
    }

    /// Atomic read-modify-write.
    ///
    /// `f` runs against a fresh copy of the stored snapshot; if it returns an
    /// error nothing is written. `f` may run more than once when another
    /// writer bumps the record version in between.
    pub async fn update<T, E, F>(&self, mut f: F) -> Result<T, E>
    where
        F: FnMut(&mut MirrorSnapshot) -> Result<T, E>,
        E: From<StoreError>,
    {
        let _guard = self.write_lock.lock().await;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let (mut snapshot, version) = self.load().await?;
            let value = f(&mut snapshot)?;
            snapshot.last_sync = Utc::now();

            let data = serde_json::to_string(&snapshot)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            match self.kv.compare_and_swap(&self.key, version, data).await {
                Ok(_) => return Ok(value),
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(attempt, "mirror record changed underneath us, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StoreError::Conflict(self.key.clone()).into())
    }

    /// Load the snapshot and the version it was stored at.
    ///
    /// A corrupt blob is replaced by defaults but keeps its version, so the
    /// next write overwrites it.
    async fn load(&self) -> Result<(MirrorSnapshot, Option<u64>), StoreError> {
        let Some(blob) = self.kv.get(&self.key).await? else {
            return Ok((MirrorSnapshot::default(), None));
        };

        match serde_json::from_str(&blob.data) {
            Ok(snapshot) => Ok((snapshot, Some(blob.version))),
            Err(err) => {
                tracing::warn!(error = %err, key = %self.key, "mirror record is corrupt, starting from defaults");
                Ok((MirrorSnapshot::default(), Some(blob.version)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryKeyValueStore;
    use rust_decimal::Decimal;
    use stocktrack_core::ProductCreate;

    fn store() -> (Arc<InMemoryKeyValueStore>, MirrorStore) {
        let kv = Arc::new(InMemoryKeyValueStore::new());
        (kv.clone(), MirrorStore::new(kv))
    }

    fn product(id: u64, name: &str) -> Product {
        Product::from_create(
            EntityId::Remote(id),
            &ProductCreate::new(name, Decimal::new(100, 2), 3),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn read_without_record_returns_defaults() {
        let (_, mirror) = store();
        let snapshot = mirror.read().await;
        assert!(snapshot.products.is_empty());
        assert!(snapshot.sales.is_empty());
        assert!(snapshot.pending_changes.is_empty());
        assert_eq!(snapshot.stats, Stats::default());
        assert_eq!(snapshot.next_local_id, 1);
    }

    #[tokio::test]
    async fn corrupt_record_reads_as_defaults_and_is_overwritten() {
        let (kv, mirror) = store();
        kv.put_raw(STORAGE_KEY, "{not json");

        assert!(mirror.read().await.products.is_empty());

        mirror
            .write(MirrorPatch::default().products(vec![product(1, "A")]))
            .await
            .unwrap();
        assert_eq!(mirror.read().await.products.len(), 1);
    }

    #[tokio::test]
    async fn write_then_read_round_trips_patched_fields() {
        let (_, mirror) = store();
        let stats = Stats {
            total_products: 2,
            total_sales: 1,
            out_of_stock_products: 0,
        };
        mirror
            .write(MirrorPatch::default().stats(stats))
            .await
            .unwrap();

        let products = vec![product(1, "A"), product(2, "B")];
        let before = mirror.read().await;
        mirror
            .write(MirrorPatch::default().products(products.clone()))
            .await
            .unwrap();
        let after = mirror.read().await;

        assert_eq!(after.products, products);
        assert_eq!(after.stats, stats);
        assert_eq!(after.sales, before.sales);
        assert_eq!(after.pending_changes, before.pending_changes);
        assert!(after.last_sync >= before.last_sync);
    }

    #[tokio::test]
    async fn persisted_layout_uses_fixed_key_and_field_names() {
        let (kv, mirror) = store();
        mirror
            .write(MirrorPatch::default().products(vec![product(1, "A")]))
            .await
            .unwrap();

        let blob = kv.get(STORAGE_KEY).await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&blob.data).unwrap();
        for field in ["productos", "ventas", "stats", "lastSync", "pendingChanges"] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
    }

    #[tokio::test]
    async fn failed_update_writes_nothing() {
        let (kv, mirror) = store();
        mirror.write(MirrorPatch::default()).await.unwrap();
        let version_before = kv.get(STORAGE_KEY).await.unwrap().unwrap().version;

        let result: Result<(), StoreError> = mirror
            .update(|snapshot| {
                snapshot.products.push(product(9, "ghost"));
                Err(StoreError::Backend("nope".into()))
            })
            .await;

        assert!(result.is_err());
        assert!(mirror.read().await.products.is_empty());
        assert_eq!(
            kv.get(STORAGE_KEY).await.unwrap().unwrap().version,
            version_before
        );
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let (_, mirror) = store();
        let mirror = Arc::new(mirror);

        let mut handles = Vec::new();
        for i in 0..20u64 {
            let mirror = mirror.clone();
            handles.push(tokio::spawn(async move {
                mirror
                    .update(|snapshot| {
                        snapshot.products.push(product(i, "p"));
                        Ok::<_, StoreError>(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(mirror.read().await.products.len(), 20);
    }

    #[tokio::test]
    async fn placeholders_are_monotonic_across_writes() {
        let (_, mirror) = store();
        let first = mirror
            .update(|s| Ok::<_, StoreError>(s.allocate_local_id()))
            .await
            .unwrap();
        let second = mirror
            .update(|s| Ok::<_, StoreError>(s.allocate_local_id()))
            .await
            .unwrap();
        assert_eq!(first, EntityId::Local(1));
        assert_eq!(second, EntityId::Local(2));
    }
}
