//! Connectivity-aware facade for every product, sale and stats operation.
//!
//! Writes try the server when it is reachable and fall back to an optimistic
//! local mutation plus a queued change when it is not, or when the call fails.
//! Reads serve fresh server data (caching it) and degrade to the mirror.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use stocktrack_core::entity::{position_of, upsert};
use stocktrack_core::{
    EntityId, Product, ProductCreate, ProductUpdate, Sale, SaleCreate, Stats,
};

use crate::connectivity::ConnectivityOracle;
use crate::mirror::{MirrorSnapshot, MirrorStore};
use crate::queue::ChangeKind;
use crate::remote::{delete_already_applied, RemoteApi, RemoteError};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: EntityId },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GatewayError {
    fn product_not_found(id: EntityId) -> Self {
        GatewayError::NotFound {
            entity: "product",
            id,
        }
    }

    fn sale_not_found(id: EntityId) -> Self {
        GatewayError::NotFound { entity: "sale", id }
    }
}

/// Facade the presentation layer calls for every entity operation.
///
/// Holds no state of its own; all effects land in the mirror and its queue.
#[derive(Clone)]
pub struct SyncGateway {
    mirror: Arc<MirrorStore>,
    remote: Arc<dyn RemoteApi>,
    connectivity: Arc<dyn ConnectivityOracle>,
}

impl SyncGateway {
    pub fn new(
        mirror: Arc<MirrorStore>,
        remote: Arc<dyn RemoteApi>,
        connectivity: Arc<dyn ConnectivityOracle>,
    ) -> Self {
        Self {
            mirror,
            remote,
            connectivity,
        }
    }

    /// Whether a call for `id` should go to the server at all.
    ///
    /// Placeholder ids only exist locally, so they always take the offline path.
    fn use_remote(&self, id: Option<EntityId>) -> bool {
        if id.is_some_and(|id| id.is_local()) {
            return false;
        }
        self.connectivity.is_reachable()
    }

    /// Shared read policy: server first, cache the result, mirror on failure.
    async fn read_through<T, Fut>(
        &self,
        op: &'static str,
        use_remote: bool,
        fetch: Fut,
        cache: impl Fn(&mut MirrorSnapshot, &T),
        fallback: impl FnOnce(MirrorSnapshot) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError>
    where
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        if use_remote {
            match fetch.await {
                Ok(fresh) => {
                    let cached = self
                        .mirror
                        .update(|snapshot| {
                            cache(snapshot, &fresh);
                            Ok::<_, StoreError>(())
                        })
                        .await;
                    if let Err(err) = cached {
                        tracing::warn!(op, error = %err, "failed to cache server data in mirror");
                    }
                    return Ok(fresh);
                }
                Err(err) => {
                    tracing::warn!(op, error = %err, "remote read failed, serving mirror");
                }
            }
        } else {
            tracing::debug!(op, "offline, serving mirror");
        }

        fallback(self.mirror.read().await)
    }

    /// Persist a server-confirmed write into the mirror.
    ///
    /// The server already holds the change, so a local persistence failure is
    /// logged rather than reported as a failed operation.
    async fn record_confirmed(&self, op: &'static str, mut f: impl FnMut(&mut MirrorSnapshot)) {
        let result = self
            .mirror
            .update(|snapshot| {
                f(snapshot);
                Ok::<_, StoreError>(())
            })
            .await;
        if let Err(err) = result {
            tracing::warn!(op, error = %err, "server accepted change but mirror update failed");
        }
    }

    // ----- products -----

    pub async fn products(&self) -> Result<Vec<Product>, GatewayError> {
        self.read_through(
            "products.list",
            self.use_remote(None),
            self.remote.list_products(),
            |snapshot, fresh: &Vec<Product>| {
                snapshot.products = fresh.clone();
                snapshot.reapply_pending();
            },
            |snapshot| Ok(snapshot.products),
        )
        .await
    }

    pub async fn product(&self, id: EntityId) -> Result<Product, GatewayError> {
        let remote_id = id.remote().unwrap_or_default();
        self.read_through(
            "products.get",
            self.use_remote(Some(id)),
            self.remote.get_product(remote_id),
            |snapshot, fresh: &Product| upsert(&mut snapshot.products, fresh.clone()),
            |snapshot| {
                snapshot
                    .product(id)
                    .cloned()
                    .ok_or_else(|| GatewayError::product_not_found(id))
            },
        )
        .await
    }

    pub async fn products_by_category(&self, category: &str) -> Result<Vec<Product>, GatewayError> {
        self.read_through(
            "products.by_category",
            self.use_remote(None),
            self.remote.products_by_category(category),
            |snapshot, fresh: &Vec<Product>| {
                for product in fresh {
                    upsert(&mut snapshot.products, product.clone());
                }
            },
            |snapshot| {
                Ok(snapshot
                    .products
                    .into_iter()
                    .filter(|p| p.category.as_deref() == Some(category))
                    .collect())
            },
        )
        .await
    }

    pub async fn create_product(&self, data: ProductCreate) -> Result<Product, GatewayError> {
        if self.use_remote(None) {
            match self.remote.create_product(&data).await {
                Ok(product) => {
                    self.record_confirmed("products.create", |snapshot| {
                        upsert(&mut snapshot.products, product.clone())
                    })
                    .await;
                    return Ok(product);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "remote create failed, creating product locally");
                }
            }
        }

        self.mirror
            .update(|snapshot| {
                let id = snapshot.allocate_local_id();
                let product = Product::from_create(id, &data, Utc::now());
                snapshot.products.push(product.clone());
                snapshot.enqueue(ChangeKind::CreateProduct {
                    id,
                    data: data.clone(),
                });
                Ok(product)
            })
            .await
    }

    pub async fn update_product(
        &self,
        id: EntityId,
        data: ProductUpdate,
    ) -> Result<Product, GatewayError> {
        if let (true, Some(remote_id)) = (self.use_remote(Some(id)), id.remote()) {
            match self.remote.update_product(remote_id, &data).await {
                Ok(product) => {
                    self.record_confirmed("products.update", |snapshot| {
                        upsert(&mut snapshot.products, product.clone())
                    })
                    .await;
                    return Ok(product);
                }
                Err(err) => {
                    tracing::warn!(%id, error = %err, "remote update failed, updating product locally");
                }
            }
        }

        self.mirror
            .update(|snapshot| {
                let product = snapshot
                    .product_mut(id)
                    .ok_or_else(|| GatewayError::product_not_found(id))?;
                product.apply_update(&data, Utc::now());
                let updated = product.clone();
                snapshot.enqueue(ChangeKind::UpdateProduct {
                    id,
                    data: data.clone(),
                });
                Ok(updated)
            })
            .await
    }

    /// Delete a product. Fails with `NotFound` if the mirror does not hold
    /// `id`, whether or not the server is reachable.
    pub async fn delete_product(&self, id: EntityId) -> Result<(), GatewayError> {
        if self.mirror.read().await.product(id).is_none() {
            return Err(GatewayError::product_not_found(id));
        }

        if let (true, Some(remote_id)) = (self.use_remote(Some(id)), id.remote()) {
            match self.remote.delete_product(remote_id).await {
                Ok(()) => {}
                Err(err) if delete_already_applied(&err) => {
                    tracing::debug!(%id, "product already gone on the server");
                }
                Err(err) => {
                    tracing::warn!(%id, error = %err, "remote delete failed, deleting product locally");
                    return self.delete_product_locally(id).await;
                }
            }
            self.record_confirmed("products.delete", |snapshot| {
                snapshot.products.retain(|p| p.id != id)
            })
            .await;
            return Ok(());
        }

        self.delete_product_locally(id).await
    }

    async fn delete_product_locally(&self, id: EntityId) -> Result<(), GatewayError> {
        self.mirror
            .update(|snapshot| {
                let idx = position_of(&snapshot.products, id)
                    .ok_or_else(|| GatewayError::product_not_found(id))?;
                snapshot.products.remove(idx);
                snapshot.enqueue(ChangeKind::DeleteProduct { id });
                Ok(())
            })
            .await
    }

    // ----- sales -----

    pub async fn sales(&self) -> Result<Vec<Sale>, GatewayError> {
        self.read_through(
            "sales.list",
            self.use_remote(None),
            self.remote.list_sales(),
            |snapshot, fresh: &Vec<Sale>| {
                snapshot.sales = fresh.clone();
                snapshot.reapply_pending();
            },
            |snapshot| Ok(snapshot.sales),
        )
        .await
    }

    pub async fn sale(&self, id: EntityId) -> Result<Sale, GatewayError> {
        let remote_id = id.remote().unwrap_or_default();
        self.read_through(
            "sales.get",
            self.use_remote(Some(id)),
            self.remote.get_sale(remote_id),
            |snapshot, fresh: &Sale| upsert(&mut snapshot.sales, fresh.clone()),
            |snapshot| {
                snapshot
                    .sale(id)
                    .cloned()
                    .ok_or_else(|| GatewayError::sale_not_found(id))
            },
        )
        .await
    }

    pub async fn sales_by_product(&self, product_id: EntityId) -> Result<Vec<Sale>, GatewayError> {
        let remote_id = product_id.remote().unwrap_or_default();
        self.read_through(
            "sales.by_product",
            self.use_remote(Some(product_id)),
            self.remote.sales_by_product(remote_id),
            |snapshot, fresh: &Vec<Sale>| {
                for sale in fresh {
                    upsert(&mut snapshot.sales, sale.clone());
                }
            },
            |snapshot| {
                Ok(snapshot
                    .sales
                    .into_iter()
                    .filter(|s| s.product_id == product_id)
                    .collect())
            },
        )
        .await
    }

    /// Record a sale. Stock checks are the caller's job
    /// (see [`SaleCreate::validate_against`]).
    pub async fn create_sale(&self, data: SaleCreate) -> Result<Sale, GatewayError> {
        if self.use_remote(Some(data.product_id)) {
            match self.remote.create_sale(&data).await {
                Ok(sale) => {
                    self.record_confirmed("sales.create", |snapshot| {
                        upsert(&mut snapshot.sales, sale.clone())
                    })
                    .await;
                    return Ok(sale);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "remote sale failed, recording sale locally");
                }
            }
        }

        self.mirror
            .update(|snapshot| {
                let id = snapshot.allocate_local_id();
                let sale = Sale::from_create(id, &data, Utc::now());
                snapshot.sales.push(sale.clone());
                snapshot.enqueue(ChangeKind::CreateSale {
                    id,
                    data: data.clone(),
                });
                Ok::<_, GatewayError>(sale)
            })
            .await
    }

    // ----- stats -----

    pub async fn stats(&self) -> Result<Stats, GatewayError> {
        self.read_through(
            "stats.get",
            self.use_remote(None),
            self.remote.stats(),
            |snapshot, fresh: &Stats| snapshot.stats = *fresh,
            |snapshot| Ok(snapshot.stats),
        )
        .await
    }
}
