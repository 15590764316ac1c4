//! Catalog entities supplied by the external catalog provider.

use serde::{Deserialize, Serialize};

use depot_core::{ProductId, WarehouseId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    /// Unit of measure (e.g. "pcs", "kg").
    pub unit: String,
}

/// Read-only lookups into the catalog provider.
///
/// This core never writes catalog data; it only checks that referenced
/// warehouses and products exist.
pub trait Catalog: Send + Sync {
    fn warehouse(&self, id: WarehouseId) -> Option<Warehouse>;

    fn product(&self, id: ProductId) -> Option<Product>;
}

impl<C> Catalog for std::sync::Arc<C>
where
    C: Catalog + ?Sized,
{
    fn warehouse(&self, id: WarehouseId) -> Option<Warehouse> {
        (**self).warehouse(id)
    }

    fn product(&self, id: ProductId) -> Option<Product> {
        (**self).product(id)
    }
}
