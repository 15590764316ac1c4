//! Postgres-backed depot store.
//!
//! Transfers are stored as a JSONB document plus the columns used for
//! filtering; lines are mirrored into `transfer_lines` for reporting. The
//! ledger lives in the append-only `stock_movements` table (a trigger rejects
//! UPDATE and DELETE).
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation on `transfers_number_key`) | `23505` | `NumberingConflict` | Two creates raced for one number |
//! | Database (unique violation, other) | `23505` | `Concurrency` | Concurrent create of the same transfer |
//! | Database (serialization failure, deadlock) | `40001`, `40P01` | `Concurrency` | Transaction aborted by the server |
//! | Database (check constraint violation) | `23514` | `InvalidMovement` | Non-positive quantity, unknown kind |
//! | Other | N/A | `Backend` | Network errors, pool closed, etc. |
//!
//! ## Atomic check-then-move
//!
//! `commit_transfer` and `append_movements` take a transaction-scoped advisory
//! lock per stock key (sorted, to avoid lock-order deadlocks), then read the
//! balances and write inside the same transaction. Two commits touching the
//! same key therefore serialize, and the second sees the first's movements.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use depot_core::{AggregateRoot, ExpectedVersion, LotId, ProductId, Quantity, WarehouseId};
use depot_inventory::{
    DocumentReference, MovementId, NewMovement, StockKey, StockMovement, StockRequirement,
    check_requirements,
};
use depot_transfers::{PeriodKey, Transfer, TransferId};

use super::r#trait::{
    DepotStore, MovementFilter, StoreError, TransferCommit, TransferFilter, validate_movements,
};

const SCHEMA: &str = include_str!("../../migrations/0001_depot_schema.sql");

const MOVEMENT_COLUMNS: &str = "id, product_id, warehouse_id, lot_id, kind, quantity, document_kind, document_id, notes, recorded_at";

/// `recorded_at` is stamped by the database clock and returned as stored.
const INSERT_MOVEMENT: &str = "INSERT INTO stock_movements \
     (id, product_id, warehouse_id, lot_id, kind, quantity, document_kind, document_id, notes, recorded_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, clock_timestamp()) \
     RETURNING recorded_at";

/// Postgres-backed depot store.
///
/// Uses a SQLx connection pool, which is `Send + Sync` and cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresDepotStore {
    pool: Arc<PgPool>,
}

impl PostgresDepotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the bundled schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    /// Read-committed transaction: every statement after an advisory lock
    /// sees the rows committed by whoever held the lock before.
    async fn begin(&self) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait::async_trait]
impl DepotStore for PostgresDepotStore {
    #[instrument(skip(self), fields(period = %period), err)]
    async fn next_sequence(&self, period: &PeriodKey) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO transfer_counters (period, last_value)
            VALUES ($1, 1)
            ON CONFLICT (period)
            DO UPDATE SET last_value = transfer_counters.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(period.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("next_sequence", e))?;

        let value: i32 = row
            .try_get("last_value")
            .map_err(|e| StoreError::Backend(format!("failed to read last_value: {e}")))?;
        u32::try_from(value).map_err(|_| StoreError::NumberingConflict(format!("invalid counter value {value}")))
    }

    #[instrument(skip(self), fields(transfer_id = %id), err)]
    async fn load_transfer(&self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        let row = sqlx::query("SELECT document FROM transfers WHERE id = $1")
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_transfer", e))?;

        row.map(|r| decode_transfer(&r)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_transfers(&self, filter: &TransferFilter) -> Result<Vec<Transfer>, StoreError> {
        let search = filter
            .search_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(s)));

        let rows = sqlx::query(
            r#"
            SELECT t.document
            FROM transfers t
            WHERE ($1::text IS NULL OR t.state = $1)
                AND ($2::uuid IS NULL OR t.origin_warehouse_id = $2)
                AND ($3::uuid IS NULL OR t.destination_warehouse_id = $3)
                AND ($4::timestamptz IS NULL OR t.created_at >= $4)
                AND ($5::timestamptz IS NULL OR t.created_at <= $5)
                AND (
                    $6::text IS NULL
                    OR t.number ILIKE $6
                    OR t.notes ILIKE $6
                    OR EXISTS (
                        SELECT 1 FROM transfer_lines l
                        WHERE l.transfer_id = t.id AND l.notes ILIKE $6
                    )
                )
            ORDER BY t.created_at DESC, t.number DESC
            "#,
        )
        .bind(filter.state.map(|s| s.as_str()))
        .bind(filter.origin_warehouse_id.map(Uuid::from))
        .bind(filter.destination_warehouse_id.map(Uuid::from))
        .bind(filter.created_from)
        .bind(filter.created_to)
        .bind(search)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_transfers", e))?;

        let transfers = rows.iter().map(decode_transfer).collect::<Result<Vec<_>, _>>()?;
        Span::current().record("transfer_count", transfers.len());
        Ok(transfers)
    }

    #[instrument(
        skip(self, commit),
        fields(
            transfer_id = %commit.transfer.id_typed(),
            expected_version = ?commit.expected_version,
            movement_count = commit.movements.len()
        ),
        err
    )]
    async fn commit_transfer(&self, commit: TransferCommit) -> Result<Vec<StockMovement>, StoreError> {
        validate_movements(&commit.movements)?;

        let TransferCommit {
            transfer,
            expected_version,
            movements,
            requirements,
        } = commit;
        let id = transfer.id_typed();

        let mut tx = self.begin().await?;

        lock_stock_keys(&mut tx, movements.iter().map(NewMovement::key)).await?;

        let current: Option<i64> = sqlx::query_scalar("SELECT version FROM transfers WHERE id = $1 FOR UPDATE")
            .bind(Uuid::from(id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_version", e))?;

        let current = current.map(|v| v as u64);
        if let Err(conflict) = expected_version.check(current) {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Concurrency(format!("transfer {id}: {conflict}")));
        }

        ensure_requirements(&mut tx, &requirements).await?;

        write_transfer(&mut tx, &transfer, expected_version).await?;
        let recorded = insert_movements(&mut tx, movements).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(recorded)
    }

    #[instrument(skip(self, movements, requirements), fields(movement_count = movements.len()), err)]
    async fn append_movements(
        &self,
        movements: Vec<NewMovement>,
        requirements: Vec<StockRequirement>,
    ) -> Result<Vec<StockMovement>, StoreError> {
        validate_movements(&movements)?;

        let mut tx = self.begin().await?;
        lock_stock_keys(&mut tx, movements.iter().map(NewMovement::key)).await?;
        ensure_requirements(&mut tx, &requirements).await?;
        let recorded = insert_movements(&mut tx, movements).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(recorded)
    }

    #[instrument(skip(self), fields(key = %key), err)]
    async fn balance(&self, key: &StockKey, as_of: Option<DateTime<Utc>>) -> Result<Quantity, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        read_balance(&mut conn, key, as_of).await
    }

    #[instrument(skip(self), err)]
    async fn movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>, StoreError> {
        let sql = format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements
            WHERE ($1::uuid IS NULL OR product_id = $1)
                AND ($2::uuid IS NULL OR warehouse_id = $2)
                AND ($3::boolean IS FALSE OR lot_id IS NOT DISTINCT FROM $4)
                AND ($5::text IS NULL OR document_kind = $5)
                AND ($6::uuid IS NULL OR document_id = $6)
                AND ($7::timestamptz IS NULL OR recorded_at <= $7)
            ORDER BY recorded_at ASC, seq ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(filter.key.map(|k| Uuid::from(k.product_id)))
            .bind(filter.key.map(|k| Uuid::from(k.warehouse_id)))
            .bind(filter.key.is_some())
            .bind(filter.key.and_then(|k| k.lot_id).map(Uuid::from))
            .bind(filter.document.map(|d| d.kind.as_str()))
            .bind(filter.document.map(|d| d.id))
            .bind(filter.as_of)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("movements", e))?;

        rows.iter().map(decode_movement).collect()
    }
}

/// Serialize concurrent commits per stock key for the rest of the transaction.
async fn lock_stock_keys(
    tx: &mut Transaction<'_, Postgres>,
    keys: impl Iterator<Item = StockKey>,
) -> Result<(), StoreError> {
    let keys: BTreeSet<String> = keys.map(|k| k.to_string()).collect();
    for key in keys {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&key)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("advisory_lock", e))?;
    }
    Ok(())
}

async fn ensure_requirements(
    tx: &mut Transaction<'_, Postgres>,
    requirements: &[StockRequirement],
) -> Result<(), StoreError> {
    let mut balances: HashMap<StockKey, Quantity> = HashMap::new();
    for req in requirements {
        if !balances.contains_key(&req.key) {
            let balance = read_balance(&mut **tx, &req.key, None).await?;
            balances.insert(req.key, balance);
        }
    }

    check_requirements(requirements, |key| balances.get(key).copied().unwrap_or(Quantity::ZERO))
        .map_err(StoreError::InsufficientStock)
}

async fn read_balance(
    conn: &mut sqlx::PgConnection,
    key: &StockKey,
    as_of: Option<DateTime<Utc>>,
) -> Result<Quantity, StoreError> {
    let sum: Option<Decimal> = sqlx::query_scalar(
        r#"
        SELECT SUM(
            CASE WHEN kind IN ('inbound', 'adjustment_positive') THEN quantity ELSE -quantity END
        )
        FROM stock_movements
        WHERE product_id = $1
            AND warehouse_id = $2
            AND lot_id IS NOT DISTINCT FROM $3
            AND ($4::timestamptz IS NULL OR recorded_at <= $4)
        "#,
    )
    .bind(Uuid::from(key.product_id))
    .bind(Uuid::from(key.warehouse_id))
    .bind(key.lot_id.map(Uuid::from))
    .bind(as_of)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("read_balance", e))?;

    Ok(Quantity::new(sum.unwrap_or(Decimal::ZERO)))
}

async fn write_transfer(
    tx: &mut Transaction<'_, Postgres>,
    transfer: &Transfer,
    expected_version: ExpectedVersion,
) -> Result<(), StoreError> {
    let id = Uuid::from(transfer.id_typed());
    let document = serde_json::to_value(transfer)
        .map_err(|e| StoreError::Serialization(format!("transfer document: {e}")))?;
    let number = transfer
        .number()
        .map(ToString::to_string)
        .ok_or_else(|| StoreError::Serialization("transfer has no number".to_string()))?;
    let (origin, destination) = match (transfer.origin_warehouse_id(), transfer.destination_warehouse_id()) {
        (Some(o), Some(d)) => (Uuid::from(o), Uuid::from(d)),
        _ => return Err(StoreError::Serialization("transfer has no warehouses".to_string())),
    };
    let created_at = transfer
        .created_at()
        .ok_or_else(|| StoreError::Serialization("transfer has no created_at".to_string()))?;

    let query = if matches!(expected_version, ExpectedVersion::New) {
        r#"
        INSERT INTO transfers (
            id, number, origin_warehouse_id, destination_warehouse_id, state,
            notes, created_at, received_at, version, document
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#
    } else {
        r#"
        INSERT INTO transfers (
            id, number, origin_warehouse_id, destination_warehouse_id, state,
            notes, created_at, received_at, version, document
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (id) DO UPDATE SET
            state = EXCLUDED.state,
            notes = EXCLUDED.notes,
            received_at = EXCLUDED.received_at,
            version = EXCLUDED.version,
            document = EXCLUDED.document,
            updated_at = NOW()
        "#
    };

    sqlx::query(query)
        .bind(id)
        .bind(&number)
        .bind(origin)
        .bind(destination)
        .bind(transfer.state().as_str())
        .bind(transfer.notes())
        .bind(created_at)
        .bind(transfer.received_at())
        .bind(transfer.version() as i64)
        .bind(&document)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_transfer", e))?;

    sqlx::query("DELETE FROM transfer_lines WHERE transfer_id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("clear_lines", e))?;

    for line in transfer.lines() {
        sqlx::query(
            r#"
            INSERT INTO transfer_lines (
                id, transfer_id, line_no, product_id, lot_id,
                quantity_requested, quantity_shipped, quantity_received, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(*line.id.as_uuid())
        .bind(id)
        .bind(line.line_no as i32)
        .bind(Uuid::from(line.product_id))
        .bind(line.lot_id.map(Uuid::from))
        .bind(line.quantity_requested.value())
        .bind(line.quantity_shipped.map(|q| q.value()))
        .bind(line.quantity_received.map(|q| q.value()))
        .bind(&line.notes)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_line", e))?;
    }

    Ok(())
}

async fn insert_movements(
    tx: &mut Transaction<'_, Postgres>,
    movements: Vec<NewMovement>,
) -> Result<Vec<StockMovement>, StoreError> {
    let mut recorded = Vec::with_capacity(movements.len());
    for m in movements {
        let id = MovementId::new();
        let recorded_at: DateTime<Utc> = sqlx::query_scalar(INSERT_MOVEMENT)
            .bind(*id.as_uuid())
            .bind(Uuid::from(m.product_id))
            .bind(Uuid::from(m.warehouse_id))
            .bind(m.lot_id.map(Uuid::from))
            .bind(m.kind.as_str())
            .bind(m.quantity.value())
            .bind(m.document.kind.as_str())
            .bind(m.document.id)
            .bind(&m.notes)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_movement", e))?;
        recorded.push(m.record(id, recorded_at));
    }
    Ok(recorded)
}

fn decode_transfer(row: &PgRow) -> Result<Transfer, StoreError> {
    let document: serde_json::Value = row
        .try_get("document")
        .map_err(|e| StoreError::Backend(format!("failed to read transfer document: {e}")))?;
    serde_json::from_value(document).map_err(|e| StoreError::Serialization(format!("transfer document: {e}")))
}

fn decode_movement(row: &PgRow) -> Result<StockMovement, StoreError> {
    let read = |e: sqlx::Error| StoreError::Backend(format!("failed to deserialize movement row: {e}"));

    let kind: String = row.try_get("kind").map_err(read)?;
    let document_kind: String = row.try_get("document_kind").map_err(read)?;
    let lot_id: Option<Uuid> = row.try_get("lot_id").map_err(read)?;
    let quantity: Decimal = row.try_get("quantity").map_err(read)?;

    Ok(StockMovement {
        id: MovementId::from_uuid(row.try_get("id").map_err(read)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(read)?),
        warehouse_id: WarehouseId::from_uuid(row.try_get("warehouse_id").map_err(read)?),
        lot_id: lot_id.map(LotId::from_uuid),
        kind: kind
            .parse()
            .map_err(|e| StoreError::Serialization(format!("movement kind: {e}")))?,
        quantity: Quantity::new(quantity),
        document: DocumentReference {
            kind: document_kind
                .parse()
                .map_err(|e| StoreError::Serialization(format!("document kind: {e}")))?,
            id: row.try_get("document_id").map_err(read)?,
        },
        recorded_at: row.try_get("recorded_at").map_err(read)?,
        notes: row.try_get("notes").map_err(read)?,
    })
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                Some("23505") if db_err.constraint() == Some("transfers_number_key") => {
                    StoreError::NumberingConflict(msg)
                }
                // Unique violation or serializable abort: another writer got there first.
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                Some("23514") => StoreError::InvalidMovement(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {}", operation)),
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn schema_declares_append_only_ledger() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS stock_movements"));
        assert!(SCHEMA.contains("BEFORE UPDATE OR DELETE ON stock_movements"));
        assert!(SCHEMA.contains("CONSTRAINT transfers_number_key UNIQUE (number)"));
    }

    #[test]
    fn movement_time_comes_from_the_database_clock() {
        assert!(INSERT_MOVEMENT.contains("clock_timestamp()"));
        assert!(INSERT_MOVEMENT.ends_with("RETURNING recorded_at"));
        assert!(!INSERT_MOVEMENT.contains("$10"));
    }
}
