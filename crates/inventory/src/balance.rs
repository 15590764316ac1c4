//! Balance derivation and availability rules.
//!
//! A balance is never stored authoritatively: it is the signed fold of every
//! movement recorded for a key, optionally cut off at a point in time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use depot_core::{Quantity, StockShortfall};

use crate::movement::{StockKey, StockMovement};

/// Fold the movements recorded for `key` up to and including `as_of`.
///
/// Movements for other keys are ignored, so callers may pass the whole log.
pub fn fold_balance<'a, I>(movements: I, key: &StockKey, as_of: Option<DateTime<Utc>>) -> Quantity
where
    I: IntoIterator<Item = &'a StockMovement>,
{
    movements
        .into_iter()
        .filter(|m| m.key() == *key)
        .filter(|m| as_of.is_none_or(|cutoff| m.recorded_at <= cutoff))
        .map(StockMovement::signed_quantity)
        .sum()
}

/// Answer to "can `requested` units leave `key` right now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub key: StockKey,
    pub requested: Quantity,
    pub available: Quantity,
    pub sufficient: bool,
}

impl Availability {
    pub fn evaluate(key: StockKey, available: Quantity, requested: Quantity) -> Self {
        Self {
            key,
            requested,
            available,
            sufficient: available >= requested,
        }
    }

    pub fn shortfall(&self) -> Option<StockShortfall> {
        if self.sufficient {
            return None;
        }
        Some(StockShortfall {
            product_id: self.key.product_id,
            warehouse_id: self.key.warehouse_id,
            lot_id: self.key.lot_id,
            requested: self.requested,
            available: self.available,
        })
    }
}

/// Stock that must be present at `key` for a commit to go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRequirement {
    pub key: StockKey,
    pub quantity: Quantity,
}

impl StockRequirement {
    pub fn new(key: StockKey, quantity: Quantity) -> Self {
        Self { key, quantity }
    }
}

/// Check a batch of requirements against current balances, all-or-nothing.
///
/// Requirements sharing a key draw on the same balance in order, so two lines
/// for the same product cannot both be satisfied by one unit of stock. On
/// failure every unsatisfied requirement is reported, not just the first.
pub fn check_requirements<F>(requirements: &[StockRequirement], mut balance_of: F) -> Result<(), Vec<StockShortfall>>
where
    F: FnMut(&StockKey) -> Quantity,
{
    let mut remaining: HashMap<StockKey, Quantity> = HashMap::new();
    let mut shortfalls = Vec::new();

    for req in requirements {
        let available = *remaining
            .entry(req.key)
            .or_insert_with(|| balance_of(&req.key));

        let availability = Availability::evaluate(req.key, available, req.quantity);
        match availability.shortfall() {
            Some(shortfall) => shortfalls.push(shortfall),
            None => {
                remaining.insert(req.key, available - req.quantity);
            }
        }
    }

    if shortfalls.is_empty() {
        Ok(())
    } else {
        Err(shortfalls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{DocumentReference, MovementId, MovementKind, NewMovement};
    use chrono::Duration;
    use depot_core::{LotId, ProductId, WarehouseId};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), WarehouseId::new(), None)
    }

    fn movement(key: StockKey, kind: MovementKind, qty: i64, at: DateTime<Utc>) -> StockMovement {
        NewMovement::new(
            key,
            kind,
            Quantity::from(qty),
            DocumentReference::adjustment(Uuid::now_v7()),
            "",
        )
        .record(MovementId::new(), at)
    }

    #[test]
    fn fold_applies_signed_sum_rule() {
        let k = key();
        let now = Utc::now();
        let log = vec![
            movement(k, MovementKind::Inbound, 10, now),
            movement(k, MovementKind::AdjustmentPositive, 5, now),
            movement(k, MovementKind::Outbound, 3, now),
            movement(k, MovementKind::AdjustmentNegative, 2, now),
        ];
        assert_eq!(fold_balance(&log, &k, None), Quantity::from(10));
    }

    #[test]
    fn fold_respects_point_in_time_cutoff() {
        let k = key();
        let t0 = Utc::now();
        let log = vec![
            movement(k, MovementKind::Inbound, 10, t0),
            movement(k, MovementKind::Outbound, 4, t0 + Duration::seconds(10)),
        ];
        assert_eq!(fold_balance(&log, &k, Some(t0)), Quantity::from(10));
        assert_eq!(fold_balance(&log, &k, Some(t0 + Duration::seconds(10))), Quantity::from(6));
    }

    #[test]
    fn lotted_stock_is_not_visible_in_unlotted_pool() {
        let unlotted = key();
        let lotted = StockKey {
            lot_id: Some(LotId::new()),
            ..unlotted
        };
        let log = vec![movement(lotted, MovementKind::Inbound, 8, Utc::now())];
        assert_eq!(fold_balance(&log, &unlotted, None), Quantity::ZERO);
        assert_eq!(fold_balance(&log, &lotted, None), Quantity::from(8));
    }

    #[test]
    fn requirements_on_the_same_key_share_the_balance() {
        let k = key();
        let reqs = [
            StockRequirement::new(k, Quantity::from(6)),
            StockRequirement::new(k, Quantity::from(6)),
        ];
        let shortfalls = check_requirements(&reqs, |_| Quantity::from(10)).unwrap_err();
        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].available, Quantity::from(4));
        assert_eq!(shortfalls[0].missing(), Quantity::from(2));
    }

    #[test]
    fn all_shortfalls_are_reported() {
        let reqs = [
            StockRequirement::new(key(), Quantity::from(1)),
            StockRequirement::new(key(), Quantity::from(2)),
        ];
        let shortfalls = check_requirements(&reqs, |_| Quantity::ZERO).unwrap_err();
        assert_eq!(shortfalls.len(), 2);
    }

    proptest! {
        /// Property: applying only requirement-checked outbound movements never
        /// drives the folded balance below zero.
        #[test]
        fn guarded_outbound_never_goes_negative(
            ops in prop::collection::vec((any::<bool>(), 1i64..50), 1..60)
        ) {
            let k = key();
            let now = Utc::now();
            let mut log: Vec<StockMovement> = Vec::new();

            for (inbound, qty) in ops {
                if inbound {
                    log.push(movement(k, MovementKind::Inbound, qty, now));
                    continue;
                }
                let req = [StockRequirement::new(k, Quantity::from(qty))];
                let snapshot = log.clone();
                if check_requirements(&req, |key| fold_balance(&snapshot, key, None)).is_ok() {
                    log.push(movement(k, MovementKind::Outbound, qty, now));
                }
                prop_assert!(!fold_balance(&log, &k, None).is_negative());
            }
        }
    }
}
