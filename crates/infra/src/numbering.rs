//! Transfer number allocation (`TR-YYYYMM-NNNN`, sequential per UTC month).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{instrument, warn};

use depot_transfers::{PeriodKey, TransferNumber};

use crate::error::ServiceError;
use crate::store::{DepotStore, StoreError};

/// How many times a numbering conflict is retried before it is surfaced.
pub const MAX_NUMBERING_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct NumberingService {
    store: Arc<dyn DepotStore>,
}

impl NumberingService {
    pub fn new(store: Arc<dyn DepotStore>) -> Self {
        Self { store }
    }

    pub fn period_for(at: DateTime<Utc>) -> PeriodKey {
        PeriodKey::for_date(at)
    }

    /// Allocate the next number in `period`. Atomic per period.
    #[instrument(skip(self), fields(period = %period), err)]
    pub async fn next_number(&self, period: &PeriodKey) -> Result<TransferNumber, ServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.next_sequence(period).await {
                Ok(sequence) => return Ok(TransferNumber::new(period.clone(), u64::from(sequence))?),
                Err(StoreError::NumberingConflict(msg)) if attempt < MAX_NUMBERING_ATTEMPTS => {
                    warn!(attempt, %msg, "numbering conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
