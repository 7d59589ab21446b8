use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{DomainError, DomainResult};
use crate::id::EntityId;
use crate::product::Product;

/// A recorded sale. `product_id` references a product; it does not own it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: EntityId,
    #[serde(rename = "producto_id")]
    pub product_id: EntityId,
    #[serde(rename = "cantidad")]
    pub quantity: u32,
    #[serde(rename = "precio_unitario", with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    #[serde(rename = "fecha_venta", with = "crate::timestamp")]
    pub sale_date: DateTime<Utc>,
    #[serde(rename = "cliente_nombre", default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(rename = "cliente_documento", default, skip_serializing_if = "Option::is_none")]
    pub customer_document: Option<String>,
    #[serde(rename = "cliente_email", default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
}

/// Payload of a sale create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleCreate {
    #[serde(rename = "producto_id")]
    pub product_id: EntityId,
    #[serde(rename = "cantidad")]
    pub quantity: u32,
    #[serde(rename = "precio_unitario", with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    #[serde(rename = "cliente_nombre", default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(rename = "cliente_documento", default, skip_serializing_if = "Option::is_none")]
    pub customer_document: Option<String>,
    #[serde(rename = "cliente_email", default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
}

impl Sale {
    pub fn from_create(id: EntityId, create: &SaleCreate, now: DateTime<Utc>) -> Self {
        Self {
            id,
            product_id: create.product_id,
            quantity: create.quantity,
            unit_price: create.unit_price,
            total: create.total,
            sale_date: now,
            customer_name: create.customer_name.clone(),
            customer_document: create.customer_document.clone(),
            customer_email: create.customer_email.clone(),
        }
    }
}

impl Entity for Sale {
    fn id(&self) -> EntityId {
        self.id
    }
}

impl SaleCreate {
    /// A sale of `quantity` units at the product's current price.
    pub fn for_product(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.id,
            quantity,
            unit_price: product.price,
            total: product.price * Decimal::from(quantity),
            customer_name: None,
            customer_document: None,
            customer_email: None,
        }
    }

    pub fn with_customer(mut self, name: impl Into<String>) -> Self {
        self.customer_name = Some(name.into());
        self
    }

    /// Caller-side checks run before a sale is handed to the sync layer.
    ///
    /// `product` is the mirrored copy of the referenced product; the quantity
    /// must not exceed its current stock.
    pub fn validate_against(&self, product: &Product) -> DomainResult<()> {
        if self.product_id != product.id {
            return Err(DomainError::validation(format!(
                "sale references product {}, validated against {}",
                self.product_id, product.id
            )));
        }
        if self.quantity == 0 {
            return Err(DomainError::validation("sale quantity must be positive"));
        }
        if self.quantity > product.stock {
            return Err(DomainError::validation(format!(
                "quantity {} exceeds available stock {}",
                self.quantity, product.stock
            )));
        }
        if self.unit_price.is_sign_negative() && !self.unit_price.is_zero() {
            return Err(DomainError::validation("unit price must be non-negative"));
        }
        let expected = self.unit_price * Decimal::from(self.quantity);
        if self.total != expected {
            return Err(DomainError::validation(format!(
                "total {} does not equal quantity x unit price ({expected})",
                self.total
            )));
        }
        Ok(())
    }
}
