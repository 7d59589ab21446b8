//! `stocktrack-core`: domain types shared by the sync subsystem.
//!
//! This crate contains **pure domain** types (no storage, no network). Field
//! names on the wire follow the remote API (`nombre`, `precio`, ...) while the
//! Rust names stay in English.

pub mod entity;
pub mod error;
pub mod id;
pub mod product;
pub mod sale;
pub mod stats;
pub mod timestamp;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::EntityId;
pub use product::{Product, ProductCreate, ProductUpdate};
pub use sale::{Sale, SaleCreate};
pub use stats::Stats;
