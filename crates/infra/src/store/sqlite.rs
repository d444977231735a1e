//! SQLite-backed order store.
//!
//! ## Schema
//!
//! ```sql
//! orders(id TEXT PK, order_number TEXT NOT NULL, version INTEGER NOT NULL)
//! order_times(id TEXT PK, display TEXT NOT NULL,
//!             order_id TEXT NOT NULL UNIQUE REFERENCES orders(id),
//!             version INTEGER NOT NULL)
//! ```
//!
//! Foreign keys are switched on for every connection. The `UNIQUE` constraint
//! on `order_times.order_id` is what rejects a second live time for one order.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | Database (unique / primary key) | `UniqueViolation` |
//! | Database (foreign key) | `ForeignKeyViolation` |
//! | UPDATE/DELETE matching no row | `Concurrency` |
//! | Other | `Backend` |

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::error::ErrorKind;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{instrument, warn};

use ordertrack_core::{DomainError, Entity, OrderId, OrderTimeId};
use ordertrack_orders::{InternalOrder, OrderNumber, OrderTime};

use super::r#trait::{BatchOutcome, OrderStore, StoreError};
use crate::config::StoreConfig;
use crate::tracking::{EntityRecord, Operation, StagedEntry};

const SELECT_AGGREGATE: &str = r#"
    SELECT o.id, o.order_number, o.version,
           t.id AS time_id, t.display AS time_display, t.version AS time_version
    FROM orders o
    LEFT JOIN order_times t ON t.order_id = o.id
"#;

#[derive(Debug, Clone)]
pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    /// Wrap an existing pool. The schema is not created.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool from `config` and create the schema if needed.
    #[instrument(skip(config), fields(database_url = %config.database_url), err)]
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| map_sqlx_error("parse_database_url", e))?
            .create_if_missing(config.create_if_missing)
            .foreign_keys(true);

        // Connections are never recycled: an in-memory database would be lost.
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id           TEXT PRIMARY KEY,
                order_number TEXT NOT NULL,
                version      INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_orders_table", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_times (
                id       TEXT PRIMARY KEY,
                display  TEXT NOT NULL,
                order_id TEXT NOT NULL UNIQUE REFERENCES orders(id),
                version  INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_order_times_table", e))?;

        Ok(())
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn fetch(&self, id: OrderId) -> Result<Option<InternalOrder>, StoreError> {
        let sql = format!("{SELECT_AGGREGATE} WHERE o.id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_order", e))?;

        row.as_ref().map(decode_aggregate).transpose()
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn exists(&self, id: OrderId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM orders WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("order_exists", e))?;
        Ok(row.is_some())
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<InternalOrder>, StoreError> {
        let sql = format!("{SELECT_AGGREGATE} ORDER BY o.rowid");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_orders", e))?;

        rows.iter().map(decode_aggregate).collect()
    }

    #[instrument(skip(self), fields(order_time_id = %id), err)]
    async fn order_time_exists(&self, id: OrderTimeId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM order_times WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("order_time_exists", e))?;
        Ok(row.is_some())
    }

    #[instrument(skip(self, batch), fields(entries = batch.len()), err)]
    async fn apply_batch(&self, batch: Vec<StagedEntry>) -> Result<BatchOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut outcome = BatchOutcome::default();
        for (index, entry) in batch.into_iter().enumerate() {
            let kind = entry.kind();
            let key = entry.key();
            let operation = entry.operation;
            match apply_entry(&mut *tx, entry).await {
                Ok(new_version) => {
                    outcome.affected_rows += 1;
                    if let Some(version) = new_version {
                        outcome.versions.push((key, version));
                    }
                }
                Err(err) => {
                    warn!(
                        %kind,
                        id = %key,
                        %operation,
                        index,
                        error = %err,
                        "batch entry failed, rolling back"
                    );
                    tx.rollback()
                        .await
                        .map_err(|e| map_sqlx_error("rollback", e))?;
                    return Err(err);
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(outcome)
    }
}

/// Apply one entry; returns the row's new version for inserts and updates.
async fn apply_entry(
    conn: &mut SqliteConnection,
    entry: StagedEntry,
) -> Result<Option<u64>, StoreError> {
    match (entry.operation, entry.record) {
        (Operation::Added, EntityRecord::Order(r)) => {
            sqlx::query("INSERT INTO orders (id, order_number, version) VALUES (?1, ?2, 1)")
                .bind(r.id.to_string())
                .bind(r.order_number.as_str())
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("insert_order", e))?;
            Ok(Some(1))
        }
        (Operation::Modified, EntityRecord::Order(r)) => {
            let result = sqlx::query(
                "UPDATE orders SET order_number = ?2, version = version + 1 \
                 WHERE id = ?1 AND version = ?3",
            )
            .bind(r.id.to_string())
            .bind(r.order_number.as_str())
            .bind(version_to_db(r.version)?)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("update_order", e))?;
            expect_one_row(result.rows_affected(), "order", &r.id, r.version)?;
            Ok(Some(r.version + 1))
        }
        (Operation::Deleted, EntityRecord::Order(r)) => {
            let result = sqlx::query("DELETE FROM orders WHERE id = ?1 AND version = ?2")
                .bind(r.id.to_string())
                .bind(version_to_db(r.version)?)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("delete_order", e))?;
            expect_one_row(result.rows_affected(), "order", &r.id, r.version)?;
            Ok(None)
        }
        (Operation::Added, EntityRecord::OrderTime(t)) => {
            let owner = owner_of(&t)?;
            sqlx::query(
                "INSERT INTO order_times (id, display, order_id, version) VALUES (?1, ?2, ?3, 1)",
            )
            .bind(t.id_typed().to_string())
            .bind(t.display())
            .bind(owner.to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("insert_order_time", e))?;
            Ok(Some(1))
        }
        (Operation::Modified, EntityRecord::OrderTime(t)) => {
            let owner = owner_of(&t)?;
            let result = sqlx::query(
                "UPDATE order_times SET display = ?2, order_id = ?3, version = version + 1 \
                 WHERE id = ?1 AND version = ?4",
            )
            .bind(t.id_typed().to_string())
            .bind(t.display())
            .bind(owner.to_string())
            .bind(version_to_db(t.version())?)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("update_order_time", e))?;
            expect_one_row(result.rows_affected(), "order time", &t.id_typed(), t.version())?;
            Ok(Some(t.version() + 1))
        }
        (Operation::Deleted, EntityRecord::OrderTime(t)) => {
            let result = sqlx::query("DELETE FROM order_times WHERE id = ?1 AND version = ?2")
                .bind(t.id_typed().to_string())
                .bind(version_to_db(t.version())?)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("delete_order_time", e))?;
            expect_one_row(result.rows_affected(), "order time", &t.id_typed(), t.version())?;
            Ok(None)
        }
    }
}

fn owner_of(time: &OrderTime) -> Result<OrderId, StoreError> {
    time.order_id().ok_or_else(|| {
        StoreError::ForeignKeyViolation(format!(
            "order time {} has no owning order",
            time.id_typed()
        ))
    })
}

fn expect_one_row(
    affected: u64,
    what: &str,
    id: &dyn core::fmt::Display,
    expected_version: u64,
) -> Result<(), StoreError> {
    if affected == 0 {
        return Err(StoreError::Concurrency(format!(
            "{what} {id} at version {expected_version} does not exist"
        )));
    }
    Ok(())
}

fn version_to_db(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Backend(format!("version {version} out of range")))
}

fn version_from_db(raw: i64) -> Result<u64, StoreError> {
    u64::try_from(raw).map_err(|_| StoreError::Backend(format!("negative version {raw} in storage")))
}

fn decode_id<T>(raw: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse()
        .map_err(|e: DomainError| StoreError::Backend(format!("stored id '{raw}': {e}")))
}

fn decode_aggregate(row: &SqliteRow) -> Result<InternalOrder, StoreError> {
    let id: String = row.try_get("id").map_err(|e| map_sqlx_error("decode_order", e))?;
    let number: String = row
        .try_get("order_number")
        .map_err(|e| map_sqlx_error("decode_order", e))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| map_sqlx_error("decode_order", e))?;

    let order_id = decode_id::<OrderId>(&id)?;
    let order_number =
        OrderNumber::new(number).map_err(|e| StoreError::Backend(e.to_string()))?;

    let time_id: Option<String> = row
        .try_get("time_id")
        .map_err(|e| map_sqlx_error("decode_order_time", e))?;
    let time = match time_id {
        Some(time_id) => {
            let display: String = row
                .try_get("time_display")
                .map_err(|e| map_sqlx_error("decode_order_time", e))?;
            let time_version: i64 = row
                .try_get("time_version")
                .map_err(|e| map_sqlx_error("decode_order_time", e))?;
            Some(OrderTime::from_parts(
                decode_id::<OrderTimeId>(&time_id)?,
                display,
                order_id,
                version_from_db(time_version)?,
            ))
        }
        None => None,
    };

    InternalOrder::from_parts(order_id, order_number, version_from_db(version)?, time)
        .map_err(|e| StoreError::Backend(e.to_string()))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.kind() {
                ErrorKind::UniqueViolation => StoreError::UniqueViolation(msg),
                ErrorKind::ForeignKeyViolation => StoreError::ForeignKeyViolation(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
