//! `stocktrack-offline`
//!
//! **Responsibility:** offline-first synchronization for the inventory client.
//!
//! This crate provides:
//! - A durable local mirror of products, sales and stats
//! - A queue of mutations made while the server was unreachable
//! - A gateway that routes every operation to the server or the mirror
//! - Reconciliation of the queue once connectivity returns
//!
//! The server stays the authority; the mirror is a last-known copy plus
//! optimistic local changes.

pub mod app;
pub mod config;
pub mod connectivity;
pub mod gateway;
pub mod mirror;
pub mod queue;
pub mod reconciler;
pub mod remote;
pub mod store;
pub mod worker;

pub use app::{AppError, AppState};
pub use config::{ConfigError, SyncConfig};
pub use connectivity::{ConnectivityOracle, ConnectivityState, OfflineMode};
pub use gateway::{GatewayError, SyncGateway};
pub use mirror::{MirrorPatch, MirrorSnapshot, MirrorStore, STORAGE_KEY};
pub use queue::{ChangeKind, PendingChange, PendingQueue, ReplayOutcome};
pub use reconciler::{FailedChange, ReconcileReport, Reconciler};
pub use remote::{HttpRemote, RemoteApi, RemoteError};
pub use store::{InMemoryKeyValueStore, KeyValueStore, SqliteKeyValueStore, StoreError};
pub use worker::{SyncEvent, SyncWorker, SyncWorkerHandle, WorkerTiming};
