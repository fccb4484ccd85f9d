//! Postgres-backed inventory store.
//!
//! Per-record locking uses a row lock (`SELECT ... FOR UPDATE`) inside the same
//! transaction that updates the counters and inserts the ledger entry, so both
//! commit together or not at all. Other rows are never locked.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError | Scenario |
//! |------------|----------------------|-------------|----------|
//! | Database (unique violation) | `23505` | `InvalidState` | Record already exists |
//! | Database (unique violation on ledger) | `23505` | `ImmutableRecordViolation` | Entry id or sequence already written |
//! | Database (raise exception) | `P0001` | `ImmutableRecordViolation` | UPDATE/DELETE on `ledger_entries` |
//! | Database (check constraint violation) | `23514` | `InvalidState` | A counter would go negative |
//! | Database (foreign key violation) | `23503` | `NotFound` | Entry for an unknown record |
//! | RowNotFound | N/A | `NotFound` | |
//! | Other | N/A | `Storage` | Network errors, pool closed, etc. |

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use stockledger_core::{
    LedgerEntryId, LedgerError, LedgerResult, UserId, VariantId, WarehouseId,
};
use stockledger_inventory::{
    DocumentRef, EntryContext, LedgerEntry, LedgerEntrySnapshot, LotInfo, Movement, StockCounters,
    StockKey, StockRecord, StockRecordSnapshot, StockStatus, TransactionType,
};

use super::{Committed, InventoryStore, apply_movement, commit_time};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stock_records (
    variant_id     UUID        NOT NULL,
    warehouse_id   UUID        NOT NULL,
    on_hand        BIGINT      NOT NULL CHECK (on_hand >= 0),
    reserved       BIGINT      NOT NULL CHECK (reserved >= 0),
    allocated      BIGINT      NOT NULL CHECK (allocated >= 0),
    incoming       BIGINT      NOT NULL DEFAULT 0 CHECK (incoming >= 0),
    safety_stock   BIGINT      NOT NULL DEFAULT 0 CHECK (safety_stock >= 0),
    status         TEXT        NOT NULL,
    lot            JSONB       NOT NULL DEFAULT '{}'::jsonb,
    uom            TEXT        NOT NULL DEFAULT 'pcs',
    metadata       JSONB       NOT NULL DEFAULT '{}'::jsonb,
    created_at     TIMESTAMPTZ NOT NULL,
    updated_at     TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (variant_id, warehouse_id)
);

CREATE TABLE IF NOT EXISTS ledger_entries (
    entry_id            UUID        PRIMARY KEY,
    variant_id          UUID        NOT NULL,
    warehouse_id        UUID        NOT NULL,
    sequence            BIGINT      NOT NULL CHECK (sequence > 0),
    transaction_type    TEXT        NOT NULL,
    quantity            BIGINT      NOT NULL CHECK (quantity >= 0),
    quantity_delta      BIGINT      NOT NULL,
    resulting_on_hand   BIGINT      NOT NULL CHECK (resulting_on_hand >= 0),
    resulting_reserved  BIGINT      NOT NULL CHECK (resulting_reserved >= 0),
    resulting_allocated BIGINT      NOT NULL CHECK (resulting_allocated >= 0),
    cost_price          BIGINT,
    currency            TEXT,
    document            JSONB,
    reference           TEXT,
    notes               TEXT,
    metadata            JSONB       NOT NULL DEFAULT '{}'::jsonb,
    created_by          UUID,
    created_at          TIMESTAMPTZ NOT NULL,
    UNIQUE (variant_id, warehouse_id, sequence),
    FOREIGN KEY (variant_id, warehouse_id) REFERENCES stock_records (variant_id, warehouse_id)
);

CREATE INDEX IF NOT EXISTS ledger_entries_key_created_at_idx
    ON ledger_entries (variant_id, warehouse_id, created_at);

CREATE OR REPLACE FUNCTION ledger_entries_reject_write() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION 'ledger entry % is immutable', OLD.entry_id USING ERRCODE = 'P0001';
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS ledger_entries_immutable ON ledger_entries;
CREATE TRIGGER ledger_entries_immutable
    BEFORE UPDATE OR DELETE ON ledger_entries
    FOR EACH ROW EXECUTE FUNCTION ledger_entries_reject_write();
"#;

const RECORD_COLUMNS: &str = "variant_id, warehouse_id, on_hand, reserved, allocated, incoming, \
     safety_stock, status, lot, uom, metadata, created_at, updated_at";

const ENTRY_COLUMNS: &str = "entry_id, variant_id, warehouse_id, sequence, transaction_type, \
     quantity, quantity_delta, resulting_on_hand, resulting_reserved, resulting_allocated, \
     cost_price, currency, document, reference, notes, metadata, created_by, created_at";

/// Postgres-backed stock record store.
///
/// `Send + Sync`; all work goes through the SQLx pool. The async methods are
/// the primary API. The synchronous [`InventoryStore`] impl blocks on them and
/// therefore needs a multi-threaded tokio runtime.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// The shared pool, for stores that live in the same database.
    pub fn pool(&self) -> PgPool {
        (*self.pool).clone()
    }

    /// Connect and make sure the schema exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create tables, the ledger index, and the immutability trigger.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> LedgerResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(key = %record.key()), err)]
    pub async fn create_record(&self, record: StockRecord) -> LedgerResult<StockRecord> {
        record.validate_new()?;
        let key = record.key();
        let counters = record.counters();

        sqlx::query(
            r#"
            INSERT INTO stock_records (
                variant_id, warehouse_id, on_hand, reserved, allocated, incoming,
                safety_stock, status, lot, uom, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(key.variant_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(counters.on_hand)
        .bind(counters.reserved)
        .bind(counters.allocated)
        .bind(record.incoming())
        .bind(record.safety_stock())
        .bind(record.status().as_str())
        .bind(to_json("lot", record.lot())?)
        .bind(record.uom())
        .bind(JsonValue::Object(record.metadata().clone()))
        .bind(record.created_at())
        .bind(record.updated_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::invalid_state(format!("stock record {key} already exists"))
            } else {
                map_sqlx_error("create_record", e)
            }
        })?;

        Ok(record)
    }

    #[instrument(skip(self), fields(key = %key), err)]
    pub async fn load_record(&self, key: StockKey) -> LedgerResult<StockRecord> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM stock_records WHERE variant_id = $1 AND warehouse_id = $2"
        ))
        .bind(key.variant_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_record", e))?
        .ok_or_else(|| LedgerError::not_found(format!("stock record {key}")))?;

        record_from_row(&row)
    }

    #[instrument(
        skip(self),
        fields(variant_id = %variant_id, record_count = tracing::field::Empty),
        err
    )]
    pub async fn load_variant(&self, variant_id: VariantId) -> LedgerResult<Vec<StockRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM stock_records WHERE variant_id = $1 ORDER BY warehouse_id ASC"
        ))
        .bind(variant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_variant", e))?;

        let mut records = rows
            .iter()
            .map(record_from_row)
            .collect::<LedgerResult<Vec<_>>>()?;
        records.sort_by_key(|r| r.key());
        Span::current().record("record_count", records.len());
        Ok(records)
    }

    #[instrument(skip(self), fields(key = %key), err)]
    pub async fn load_entries(&self, key: StockKey) -> LedgerResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
             WHERE variant_id = $1 AND warehouse_id = $2 ORDER BY sequence ASC"
        ))
        .bind(key.variant_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_entries", e))?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Lock one row, apply the movement, persist counters and entry, commit.
    ///
    /// Any error (including a movement the record cannot take) rolls the
    /// transaction back, releasing the row lock.
    #[instrument(
        skip(self, movement, ctx),
        fields(
            key = %key,
            transaction_type = %movement.transaction_type(),
            sequence = tracing::field::Empty
        ),
        err
    )]
    pub async fn lock_and_apply(
        &self,
        key: StockKey,
        movement: &Movement,
        ctx: &EntryContext,
    ) -> LedgerResult<Committed> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM stock_records \
             WHERE variant_id = $1 AND warehouse_id = $2 FOR UPDATE"
        ))
        .bind(key.variant_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_record", e))?
        .ok_or_else(|| LedgerError::not_found(format!("stock record {key}")))?;
        let current = record_from_row(&row)?;

        let (last_sequence, last_created_at) = ledger_head(&mut tx, key).await?;
        // TIMESTAMPTZ keeps microseconds; stamp what will be read back.
        let at = commit_time(last_created_at.max(Some(current.updated_at()))).trunc_subsecs(6);

        let mutation = apply_movement(key, &current, movement, ctx, at)?;

        let sequence = last_sequence + 1;
        let entry = LedgerEntry::commit(
            LedgerEntryId::new(),
            mutation.draft,
            &mutation.record,
            sequence,
            at,
        );
        Span::current().record("sequence", sequence);

        let counters = mutation.record.counters();
        sqlx::query(
            r#"
            UPDATE stock_records
            SET on_hand = $3, reserved = $4, allocated = $5, status = $6, updated_at = $7
            WHERE variant_id = $1 AND warehouse_id = $2
            "#,
        )
        .bind(key.variant_id.as_uuid())
        .bind(key.warehouse_id.as_uuid())
        .bind(counters.on_hand)
        .bind(counters.reserved)
        .bind(counters.allocated)
        .bind(mutation.record.status().as_str())
        .bind(mutation.record.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_record", e))?;

        insert_entry(&mut tx, &entry).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(Committed {
            record: mutation.record,
            entry,
        })
    }
}

async fn ledger_head(
    tx: &mut Transaction<'_, Postgres>,
    key: StockKey,
) -> LedgerResult<(u64, Option<DateTime<Utc>>)> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(sequence), 0) AS last_sequence, MAX(created_at) AS last_created_at
        FROM ledger_entries
        WHERE variant_id = $1 AND warehouse_id = $2
        "#,
    )
    .bind(key.variant_id.as_uuid())
    .bind(key.warehouse_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("ledger_head", e))?;

    let last_sequence: i64 = row
        .try_get("last_sequence")
        .map_err(|e| map_sqlx_error("ledger_head", e))?;
    let last_created_at: Option<DateTime<Utc>> = row
        .try_get("last_created_at")
        .map_err(|e| map_sqlx_error("ledger_head", e))?;
    Ok((last_sequence as u64, last_created_at))
}

async fn insert_entry(tx: &mut Transaction<'_, Postgres>, entry: &LedgerEntry) -> LedgerResult<()> {
    let document = entry
        .document()
        .map(|d| to_json("document", &d))
        .transpose()?;
    let resulting = entry.resulting();

    sqlx::query(&format!(
        "INSERT INTO ledger_entries ({ENTRY_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
    ))
    .bind(entry.entry_id().as_uuid())
    .bind(entry.variant_id().as_uuid())
    .bind(entry.warehouse_id().as_uuid())
    .bind(entry.sequence() as i64)
    .bind(entry.transaction_type().as_str())
    .bind(entry.quantity())
    .bind(entry.quantity_delta())
    .bind(resulting.on_hand)
    .bind(resulting.reserved)
    .bind(resulting.allocated)
    .bind(entry.cost_price())
    .bind(entry.currency())
    .bind(document)
    .bind(entry.reference())
    .bind(entry.notes())
    .bind(JsonValue::Object(entry.metadata().clone()))
    .bind(entry.created_by().map(|u| *u.as_uuid()))
    .bind(entry.created_at())
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::immutable(format!(
                "ledger entry {} (sequence {}) already written",
                entry.entry_id(),
                entry.sequence()
            ))
        } else {
            map_sqlx_error("insert_entry", e)
        }
    })?;
    Ok(())
}

fn to_json<T: serde::Serialize>(what: &str, value: &T) -> LedgerResult<JsonValue> {
    serde_json::to_value(value)
        .map_err(|e| LedgerError::storage(format!("failed to serialize {what}: {e}")))
}

fn json_object(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    }
}

fn record_from_row(row: &PgRow) -> LedgerResult<StockRecord> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_record", e);

    let status: String = row.try_get("status").map_err(get)?;
    let lot: JsonValue = row.try_get("lot").map_err(get)?;
    let lot: LotInfo = serde_json::from_value(lot)
        .map_err(|e| LedgerError::storage(format!("failed to decode lot: {e}")))?;

    StockRecord::rehydrate(StockRecordSnapshot {
        key: StockKey::new(
            VariantId::from_uuid(row.try_get("variant_id").map_err(get)?),
            WarehouseId::from_uuid(row.try_get("warehouse_id").map_err(get)?),
        ),
        counters: StockCounters {
            on_hand: row.try_get("on_hand").map_err(get)?,
            reserved: row.try_get("reserved").map_err(get)?,
            allocated: row.try_get("allocated").map_err(get)?,
        },
        incoming: row.try_get("incoming").map_err(get)?,
        safety_stock: row.try_get("safety_stock").map_err(get)?,
        status: StockStatus::parse(&status)?,
        lot,
        uom: row.try_get("uom").map_err(get)?,
        metadata: json_object(row.try_get("metadata").map_err(get)?),
        created_at: row.try_get("created_at").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}

fn entry_from_row(row: &PgRow) -> LedgerResult<LedgerEntry> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_entry", e);

    let transaction_type: String = row.try_get("transaction_type").map_err(get)?;
    let sequence: i64 = row.try_get("sequence").map_err(get)?;
    let document: Option<JsonValue> = row.try_get("document").map_err(get)?;
    let document: Option<DocumentRef> = document
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| LedgerError::storage(format!("failed to decode document: {e}")))?;
    let created_by: Option<uuid::Uuid> = row.try_get("created_by").map_err(get)?;

    LedgerEntry::rehydrate(LedgerEntrySnapshot {
        id: LedgerEntryId::from_uuid(row.try_get("entry_id").map_err(get)?),
        key: StockKey::new(
            VariantId::from_uuid(row.try_get("variant_id").map_err(get)?),
            WarehouseId::from_uuid(row.try_get("warehouse_id").map_err(get)?),
        ),
        sequence: u64::try_from(sequence)
            .map_err(|_| LedgerError::storage(format!("negative ledger sequence {sequence}")))?,
        transaction_type: TransactionType::parse(&transaction_type)?,
        quantity: row.try_get("quantity").map_err(get)?,
        quantity_delta: row.try_get("quantity_delta").map_err(get)?,
        resulting: StockCounters {
            on_hand: row.try_get("resulting_on_hand").map_err(get)?,
            reserved: row.try_get("resulting_reserved").map_err(get)?,
            allocated: row.try_get("resulting_allocated").map_err(get)?,
        },
        cost_price: row.try_get("cost_price").map_err(get)?,
        currency: row.try_get("currency").map_err(get)?,
        document,
        reference: row.try_get("reference").map_err(get)?,
        notes: row.try_get("notes").map_err(get)?,
        metadata: json_object(row.try_get("metadata").map_err(get)?),
        created_by: created_by.map(UserId::from_uuid),
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

/// Map SQLx errors to LedgerError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("P0001") => LedgerError::immutable(msg),
                Some("23505") => LedgerError::invalid_state(msg),
                Some("23514") => LedgerError::invalid_state(msg),
                Some("23503") => LedgerError::not_found(msg),
                _ => LedgerError::storage(msg),
            }
        }
        sqlx::Error::RowNotFound => {
            LedgerError::not_found(format!("unexpected row not found in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            LedgerError::storage(format!("connection pool closed in {operation}"))
        }
        _ => LedgerError::storage(format!("sqlx error in {operation}: {err}")),
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

/// Run an async store call from a synchronous trait.
pub(crate) fn block_on<F: Future>(fut: F) -> LedgerResult<F::Output> {
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|_| LedgerError::storage("Postgres stores require a tokio runtime"))?;
    if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::CurrentThread {
        return Err(LedgerError::storage(
            "Postgres stores require a multi-threaded tokio runtime",
        ));
    }
    Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
}

impl InventoryStore for PostgresInventoryStore {
    fn create(&self, record: StockRecord) -> LedgerResult<StockRecord> {
        block_on(self.create_record(record))?
    }

    fn get(&self, key: StockKey) -> LedgerResult<StockRecord> {
        block_on(self.load_record(key))?
    }

    fn list_for_variant(&self, variant_id: VariantId) -> LedgerResult<Vec<StockRecord>> {
        block_on(self.load_variant(variant_id))?
    }

    fn with_lock(
        &self,
        key: StockKey,
        movement: &Movement,
        ctx: &EntryContext,
    ) -> LedgerResult<Committed> {
        block_on(self.lock_and_apply(key, movement, ctx))?
    }

    fn entries(&self, key: StockKey) -> LedgerResult<Vec<LedgerEntry>> {
        block_on(self.load_entries(key))?
    }
}

#[cfg(test)]
mod tests {
    //! Need a live database: `DATABASE_URL=postgres://... cargo test -- --ignored`.

    use super::*;

    async fn test_store() -> PostgresInventoryStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        PostgresInventoryStore::connect(&url, 5).await.unwrap()
    }

    fn test_key() -> StockKey {
        StockKey::new(VariantId::new(), WarehouseId::new())
    }

    fn receipt(quantity: i64) -> Movement {
        Movement::Receipt {
            quantity,
            cost_price: Some(100),
            currency: Some("USD".to_string()),
        }
    }

    fn po() -> EntryContext {
        EntryContext::new().with_reference("po:1")
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore]
    async fn commits_counters_and_entry_together() {
        let store = test_store().await;
        let key = test_key();
        store
            .create_record(StockRecord::new(key, Utc::now()))
            .await
            .unwrap();

        let committed = store.lock_and_apply(key, &receipt(7), &po()).await.unwrap();
        assert_eq!(committed.record.on_hand(), 7);

        let record = store.load_record(key).await.unwrap();
        let entries = store.load_entries(key).await.unwrap();
        assert_eq!(record.on_hand(), 7);
        assert_eq!(entries.len(), 1);
        // What a commit returns is exactly what is read back later.
        assert_eq!(entries[0], committed.entry);
        assert_eq!(record, committed.record);
        assert_eq!(entries[0].reference(), Some("po:1"));
        assert_eq!(entries[0].currency(), Some("USD"));
        stockledger_inventory::verify(&record, &entries).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore]
    async fn failed_transition_rolls_back() {
        let store = test_store().await;
        let key = test_key();
        store
            .create_record(StockRecord::new(key, Utc::now()))
            .await
            .unwrap();

        let err = store
            .lock_and_apply(key, &Movement::Reserve { quantity: 1 }, &EntryContext::new())
            .await
            .unwrap_err();
        assert!(err.is_insufficient_stock());
        assert!(store.load_entries(key).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore]
    async fn ledger_rows_reject_updates() {
        let store = test_store().await;
        let key = test_key();
        store
            .create_record(StockRecord::new(key, Utc::now()))
            .await
            .unwrap();
        let committed = store.lock_and_apply(key, &receipt(3), &po()).await.unwrap();

        let err = sqlx::query("UPDATE ledger_entries SET quantity = 99 WHERE entry_id = $1")
            .bind(committed.entry.entry_id().as_uuid())
            .execute(&*store.pool)
            .await
            .map_err(|e| map_sqlx_error("tamper", e))
            .unwrap_err();
        assert!(matches!(err, LedgerError::ImmutableRecordViolation(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore]
    async fn duplicate_record_is_invalid_state() {
        let store = test_store().await;
        let key = test_key();
        store
            .create_record(StockRecord::new(key, Utc::now()))
            .await
            .unwrap();
        let err = store
            .create_record(StockRecord::new(key, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState(_)));
    }
}
