//! In-memory catalog provider for tests and dev runs.

use std::collections::HashMap;
use std::sync::RwLock;

use depot_core::{ProductId, WarehouseId};
use depot_inventory::{Catalog, Product, Warehouse};

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    warehouses: RwLock<HashMap<WarehouseId, Warehouse>>,
    products: RwLock<HashMap<ProductId, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_warehouse(&self, name: impl Into<String>) -> Warehouse {
        let warehouse = Warehouse {
            id: WarehouseId::new(),
            name: name.into(),
        };
        self.insert_warehouse(warehouse.clone());
        warehouse
    }

    pub fn add_product(&self, name: impl Into<String>, sku: impl Into<String>, unit: impl Into<String>) -> Product {
        let product = Product {
            id: ProductId::new(),
            name: name.into(),
            sku: sku.into(),
            unit: unit.into(),
        };
        self.insert_product(product.clone());
        product
    }

    pub fn insert_warehouse(&self, warehouse: Warehouse) {
        if let Ok(mut map) = self.warehouses.write() {
            map.insert(warehouse.id, warehouse);
        }
    }

    pub fn insert_product(&self, product: Product) {
        if let Ok(mut map) = self.products.write() {
            map.insert(product.id, product);
        }
    }

    pub fn warehouses(&self) -> Vec<Warehouse> {
        let mut all: Vec<Warehouse> = self
            .warehouses
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn products(&self) -> Vec<Product> {
        let mut all: Vec<Product> = self
            .products
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.sku.cmp(&b.sku));
        all
    }
}

impl Catalog for InMemoryCatalog {
    fn warehouse(&self, id: WarehouseId) -> Option<Warehouse> {
        self.warehouses.read().ok()?.get(&id).cloned()
    }

    fn product(&self, id: ProductId) -> Option<Product> {
        self.products.read().ok()?.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_return_inserted_entities() {
        let catalog = InMemoryCatalog::new();
        let w = catalog.add_warehouse("North");
        let p = catalog.add_product("Bolt", "BLT-01", "pcs");

        assert_eq!(catalog.warehouse(w.id), Some(w));
        assert_eq!(catalog.product(p.id), Some(p));
        assert!(catalog.warehouse(WarehouseId::new()).is_none());
    }
}
