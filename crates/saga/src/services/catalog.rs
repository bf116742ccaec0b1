//! Product catalog lookups used to snapshot order lines.

use async_trait::async_trait;
use common::ProductCode;
use domain::Money;
use serde::{Deserialize, Serialize};

use super::inventory::{InventoryError, InventoryRecord};

/// Name and price of a product at the time it was looked up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_code: ProductCode,
    pub product_name: String,
    pub unit_price: Money,
}

impl From<&InventoryRecord> for ProductSnapshot {
    fn from(record: &InventoryRecord) -> Self {
        Self {
            product_code: record.product_code.clone(),
            product_name: record.product_name.clone(),
            unit_price: record.unit_price,
        }
    }
}

/// Source of product names and prices.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Looks up a product; `None` if it is not sold.
    async fn product(
        &self,
        product_code: &ProductCode,
    ) -> Result<Option<ProductSnapshot>, InventoryError>;
}
