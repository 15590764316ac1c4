//! Availability checker: read-only view over ledger balances.
//!
//! Answers here are advisory. The authoritative check runs again inside the
//! store commit that appends the outbound movement.

use std::collections::HashMap;
use std::sync::Arc;

use depot_core::{Quantity, StockShortfall};
use depot_inventory::{Availability, StockKey, StockRequirement, check_requirements};

use crate::error::ServiceError;
use crate::store::DepotStore;

#[derive(Clone)]
pub struct AvailabilityChecker {
    store: Arc<dyn DepotStore>,
}

impl AvailabilityChecker {
    pub fn new(store: Arc<dyn DepotStore>) -> Self {
        Self { store }
    }

    pub async fn check_available(&self, key: StockKey, requested: Quantity) -> Result<Availability, ServiceError> {
        if requested.is_negative() {
            return Err(ServiceError::invalid_input("requested quantity cannot be negative"));
        }
        let available = self.store.balance(&key, None).await?;
        Ok(Availability::evaluate(key, available, requested))
    }

    /// Evaluate a batch; lines sharing a key draw on the same balance.
    pub async fn check_all(&self, requirements: &[StockRequirement]) -> Result<Result<(), Vec<StockShortfall>>, ServiceError> {
        let mut balances: HashMap<StockKey, Quantity> = HashMap::new();
        for req in requirements {
            if !balances.contains_key(&req.key) {
                balances.insert(req.key, self.store.balance(&req.key, None).await?);
            }
        }
        Ok(check_requirements(requirements, |key| {
            balances.get(key).copied().unwrap_or(Quantity::ZERO)
        }))
    }
}
