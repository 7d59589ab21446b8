#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use stocktrack_core::{EntityId, Product, ProductCreate, ProductUpdate, Sale, SaleCreate, Stats};
use stocktrack_offline::{
    AppState, ConnectivityState, InMemoryKeyValueStore, RemoteApi, RemoteError,
};

#[derive(Default)]
struct ServerState {
    products: Vec<Product>,
    sales: Vec<Sale>,
    next_id: u64,
}

/// In-process stand-in for the inventory API.
///
/// Behaves like the real server (assigns ids, validates creates, checks and
/// decrements stock)
/// and can be told to fail everything or specific operations.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<ServerState>,
    down: AtomicBool,
    failing: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call fails with a network error.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Calls to `op` (e.g. `"create_product"`) fail with a 500.
    pub fn fail_op(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal_op(&self, op: &'static str) {
        self.failing.lock().unwrap().remove(op);
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == op).count()
    }

    pub fn products(&self) -> Vec<Product> {
        self.state.lock().unwrap().products.clone()
    }

    pub fn sales(&self) -> Vec<Sale> {
        self.state.lock().unwrap().sales.clone()
    }

    /// Seed a product directly on the server.
    pub fn seed_product(&self, name: &str, price: Decimal, stock: u32) -> Product {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let product = Product::from_create(
            EntityId::Remote(state.next_id),
            &ProductCreate::new(name, price, stock),
            Utc::now(),
        );
        state.products.push(product.clone());
        product
    }

    async fn enter(&self, op: &'static str) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(op.to_string());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("connection refused".into()));
        }
        if self.failing.lock().unwrap().contains(op) {
            return Err(RemoteError::Api(500, "internal error".into()));
        }
        Ok(())
    }

    fn not_found() -> RemoteError {
        RemoteError::Api(404, r#"{"detail":"Producto no encontrado"}"#.into())
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn health(&self) -> Result<(), RemoteError> {
        self.enter("health").await
    }

    async fn list_products(&self) -> Result<Vec<Product>, RemoteError> {
        self.enter("list_products").await?;
        Ok(self.products())
    }

    async fn get_product(&self, id: u64) -> Result<Product, RemoteError> {
        self.enter("get_product").await?;
        self.products()
            .into_iter()
            .find(|p| p.id == EntityId::Remote(id))
            .ok_or_else(Self::not_found)
    }

    async fn products_by_category(&self, category: &str) -> Result<Vec<Product>, RemoteError> {
        self.enter("products_by_category").await?;
        Ok(self
            .products()
            .into_iter()
            .filter(|p| p.category.as_deref() == Some(category))
            .collect())
    }

    async fn create_product(&self, data: &ProductCreate) -> Result<Product, RemoteError> {
        self.enter("create_product").await?;
        if let Err(err) = data.validate() {
            return Err(RemoteError::Api(422, err.to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let product = Product::from_create(EntityId::Remote(state.next_id), data, Utc::now());
        state.products.push(product.clone());
        Ok(product)
    }

    async fn update_product(&self, id: u64, data: &ProductUpdate) -> Result<Product, RemoteError> {
        self.enter("update_product").await?;
        let mut state = self.state.lock().unwrap();
        let product = state
            .products
            .iter_mut()
            .find(|p| p.id == EntityId::Remote(id))
            .ok_or_else(Self::not_found)?;
        product.apply_update(data, Utc::now());
        Ok(product.clone())
    }

    async fn delete_product(&self, id: u64) -> Result<(), RemoteError> {
        self.enter("delete_product").await?;
        let mut state = self.state.lock().unwrap();
        let before = state.products.len();
        state.products.retain(|p| p.id != EntityId::Remote(id));
        if state.products.len() == before {
            return Err(Self::not_found());
        }
        Ok(())
    }

    async fn list_sales(&self) -> Result<Vec<Sale>, RemoteError> {
        self.enter("list_sales").await?;
        Ok(self.sales())
    }

    async fn get_sale(&self, id: u64) -> Result<Sale, RemoteError> {
        self.enter("get_sale").await?;
        self.sales()
            .into_iter()
            .find(|s| s.id == EntityId::Remote(id))
            .ok_or_else(|| RemoteError::Api(404, "Venta no encontrada".into()))
    }

    async fn sales_by_product(&self, product_id: u64) -> Result<Vec<Sale>, RemoteError> {
        self.enter("sales_by_product").await?;
        Ok(self
            .sales()
            .into_iter()
            .filter(|s| s.product_id == EntityId::Remote(product_id))
            .collect())
    }

    async fn create_sale(&self, data: &SaleCreate) -> Result<Sale, RemoteError> {
        self.enter("create_sale").await?;
        let mut state = self.state.lock().unwrap();
        let product = state
            .products
            .iter_mut()
            .find(|p| p.id == data.product_id)
            .ok_or_else(Self::not_found)?;
        if product.stock < data.quantity {
            return Err(RemoteError::Api(400, "Stock insuficiente".into()));
        }
        product.stock -= data.quantity;
        state.next_id += 1;
        let sale = Sale::from_create(EntityId::Remote(state.next_id), data, Utc::now());
        state.sales.push(sale.clone());
        Ok(sale)
    }

    async fn stats(&self) -> Result<Stats, RemoteError> {
        self.enter("stats").await?;
        let state = self.state.lock().unwrap();
        Ok(Stats {
            total_products: state.products.len() as u64,
            total_sales: state.sales.len() as u64,
            out_of_stock_products: state.products.iter().filter(|p| p.stock == 0).count() as u64,
        })
    }
}

/// App state over an in-memory store and the given fake server.
pub fn app(remote: Arc<FakeRemote>, initial: ConnectivityState) -> AppState {
    AppState::with_backends(Arc::new(InMemoryKeyValueStore::new()), remote, initial)
}

pub fn widget() -> ProductCreate {
    ProductCreate::new("Widget", Decimal::new(999, 2), 5).with_category("tools")
}
