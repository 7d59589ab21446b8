use serde::{Deserialize, Serialize};

/// Aggregate counters served by the remote `/stats/` endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(rename = "total_productos", default)]
    pub total_products: u64,
    #[serde(rename = "total_ventas", default)]
    pub total_sales: u64,
    #[serde(rename = "productos_sin_stock", default)]
    pub out_of_stock_products: u64,
}
