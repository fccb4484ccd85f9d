//! Postgres-backed allocation links.
//!
//! Lives next to `stock_records` in the same database. One row per
//! (order item, stock key); the unique constraint is what rejects a second
//! link, so concurrent inserts cannot both win.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};

use stockledger_core::{
    AllocationId, LedgerError, LedgerResult, OrderId, OrderItemId, VariantId, WarehouseId,
};
use stockledger_inventory::StockKey;
use stockledger_orders::{Allocation, AllocationSnapshot, AllocationState};

use super::AllocationStore;
use crate::store::postgres::{block_on, is_unique_violation, map_sqlx_error};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS allocations (
    allocation_id  UUID        PRIMARY KEY,
    order_id       UUID        NOT NULL,
    order_item_id  UUID        NOT NULL,
    line_no        INTEGER     NOT NULL CHECK (line_no > 0),
    variant_id     UUID        NOT NULL,
    warehouse_id   UUID        NOT NULL,
    quantity       BIGINT      NOT NULL CHECK (quantity > 0),
    state          TEXT        NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL,
    updated_at     TIMESTAMPTZ NOT NULL,
    CONSTRAINT unique_allocation_per_stock_record
        UNIQUE (order_item_id, variant_id, warehouse_id),
    FOREIGN KEY (variant_id, warehouse_id) REFERENCES stock_records (variant_id, warehouse_id)
);

CREATE INDEX IF NOT EXISTS allocations_order_idx ON allocations (order_id);
"#;

const COLUMNS: &str = "allocation_id, order_id, order_item_id, line_no, variant_id, warehouse_id, \
     quantity, state, created_at, updated_at";

/// Allocation store sharing the inventory store's pool.
///
/// Like [`PostgresInventoryStore`](crate::store::PostgresInventoryStore), the
/// synchronous trait impl needs a multi-threaded tokio runtime.
#[derive(Debug, Clone)]
pub struct PostgresAllocationStore {
    pool: PgPool,
}

impl PostgresAllocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the links table. `stock_records` must already exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> LedgerResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_allocation_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, allocations), fields(count = allocations.len()), err)]
    pub async fn insert_links(&self, allocations: Vec<Allocation>) -> LedgerResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for a in &allocations {
            sqlx::query(&format!(
                "INSERT INTO allocations ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
            ))
            .bind(a.allocation_id().as_uuid())
            .bind(a.order_id().as_uuid())
            .bind(a.order_item_id().as_uuid())
            .bind(i32::try_from(a.line_no()).map_err(|_| {
                LedgerError::invalid_argument(format!("line number {} out of range", a.line_no()))
            })?)
            .bind(a.key().variant_id.as_uuid())
            .bind(a.key().warehouse_id.as_uuid())
            .bind(a.quantity())
            .bind(a.state().as_str())
            .bind(a.created_at())
            .bind(a.updated_at())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    LedgerError::invalid_state(format!(
                        "order item {} is already linked to {}",
                        a.order_item_id(),
                        a.key()
                    ))
                } else {
                    map_sqlx_error("insert_allocation", e)
                }
            })?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(
        skip(self, allocation),
        fields(allocation_id = %allocation.allocation_id(), state = allocation.state().as_str()),
        err
    )]
    pub async fn update_link(&self, allocation: &Allocation) -> LedgerResult<()> {
        let result = sqlx::query(
            "UPDATE allocations SET state = $2, updated_at = $3 WHERE allocation_id = $1",
        )
        .bind(allocation.allocation_id().as_uuid())
        .bind(allocation.state().as_str())
        .bind(allocation.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_allocation", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found(format!(
                "allocation {}",
                allocation.allocation_id()
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(order_id = %order_id, link_count = tracing::field::Empty), err)]
    pub async fn load_order(&self, order_id: OrderId) -> LedgerResult<Vec<Allocation>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM allocations WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_allocations", e))?;

        let mut links = rows
            .iter()
            .map(allocation_from_row)
            .collect::<LedgerResult<Vec<_>>>()?;
        links.sort_by_key(|l| (l.line_no(), l.key()));
        Span::current().record("link_count", links.len());
        Ok(links)
    }
}

fn allocation_from_row(row: &PgRow) -> LedgerResult<Allocation> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_allocation", e);

    let line_no: i32 = row.try_get("line_no").map_err(get)?;
    let state: String = row.try_get("state").map_err(get)?;

    Allocation::rehydrate(AllocationSnapshot {
        id: AllocationId::from_uuid(row.try_get("allocation_id").map_err(get)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(get)?),
        order_item_id: OrderItemId::from_uuid(row.try_get("order_item_id").map_err(get)?),
        line_no: u32::try_from(line_no)
            .map_err(|_| LedgerError::storage(format!("negative line number {line_no}")))?,
        key: StockKey::new(
            VariantId::from_uuid(row.try_get("variant_id").map_err(get)?),
            WarehouseId::from_uuid(row.try_get("warehouse_id").map_err(get)?),
        ),
        quantity: row.try_get("quantity").map_err(get)?,
        state: AllocationState::parse(&state)?,
        created_at: row.try_get("created_at").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}

impl AllocationStore for PostgresAllocationStore {
    fn insert(&self, allocations: Vec<Allocation>) -> LedgerResult<()> {
        block_on(self.insert_links(allocations))?
    }

    fn update(&self, allocation: &Allocation) -> LedgerResult<()> {
        block_on(self.update_link(allocation))?
    }

    fn for_order(&self, order_id: OrderId) -> LedgerResult<Vec<Allocation>> {
        block_on(self.load_order(order_id))?
    }
}
