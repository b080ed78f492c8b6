//! SQLite-backed ledger store.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (nanosecond precision,
//! `Z` suffix) so that text order equals time order and reloaded records
//! compare equal to the ones that were written.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use haas_core::{AllocationId, HardwareKindId, ProjectId, SubjectId};
use haas_hardware::{AllocationRecord, HardwareKind, Quantity};

use super::{sort_checkout_order, LedgerCommit, LedgerStore, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS hardware_kinds (
        id                 TEXT PRIMARY KEY,
        name               TEXT NOT NULL,
        total_capacity     INTEGER NOT NULL CHECK (total_capacity >= 0),
        available_capacity INTEGER NOT NULL
            CHECK (available_capacity >= 0 AND available_capacity <= total_capacity)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS allocation_records (
        id             TEXT PRIMARY KEY,
        kind_id        TEXT NOT NULL REFERENCES hardware_kinds (id),
        project_id     TEXT NOT NULL,
        subject_id     TEXT NOT NULL,
        quantity       INTEGER NOT NULL CHECK (quantity > 0),
        checked_out_at TEXT NOT NULL,
        checked_in_at  TEXT NULL,
        checkout_seq   INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS allocation_records_open_idx
        ON allocation_records (project_id, kind_id, checked_in_at)
    "#,
];

const RECORD_COLUMNS: &str =
    "id, kind_id, project_id, subject_id, quantity, checked_out_at, checked_in_at, checkout_seq";

/// Ledger store over a SQLite database (`sqlite://path` or `sqlite::memory:`).
#[derive(Debug, Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Open (creating if missing) the database and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| map_sqlx_error("parse_url", e))?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is its own database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn register_kind(&self, kind: HardwareKind) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO hardware_kinds (id, name, total_capacity, available_capacity)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(kind.id_typed().as_str())
        .bind(kind.name())
        .bind(i64::from(kind.total_capacity()))
        .bind(i64::from(kind.available_capacity()))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_kind", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_kind(&self, kind_id: &HardwareKindId) -> Result<Option<HardwareKind>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, total_capacity, available_capacity FROM hardware_kinds WHERE id = ?1",
        )
        .bind(kind_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_kind", e))?;

        row.as_ref().map(kind_from_row).transpose()
    }

    async fn list_kinds(&self) -> Result<Vec<HardwareKind>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, total_capacity, available_capacity FROM hardware_kinds ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_kinds", e))?;

        rows.iter().map(kind_from_row).collect()
    }

    async fn open_records(
        &self,
        project_id: ProjectId,
        kind_id: &HardwareKindId,
    ) -> Result<Vec<AllocationRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM allocation_records \
             WHERE project_id = ?1 AND kind_id = ?2 AND checked_in_at IS NULL \
             ORDER BY checked_out_at, checkout_seq, id"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id.to_string())
            .bind(kind_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("open_records", e))?;

        records_from_rows(&rows)
    }

    async fn project_records(&self, project_id: ProjectId) -> Result<Vec<AllocationRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM allocation_records \
             WHERE project_id = ?1 \
             ORDER BY checked_out_at, checkout_seq, id"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("project_records", e))?;

        records_from_rows(&rows)
    }

    async fn open_units(&self, kind_id: &HardwareKindId) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(quantity), 0) AS units
            FROM allocation_records
            WHERE kind_id = ?1 AND checked_in_at IS NULL
            "#,
        )
        .bind(kind_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("open_units", e))?;

        u64::try_from(get::<i64>(&row, "units")?)
            .map_err(|_| StoreError::Corrupt(format!("negative open units for '{kind_id}'")))
    }

    async fn max_checkout_seq(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(checkout_seq), 0) AS seq FROM allocation_records")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("max_checkout_seq", e))?;

        u64::try_from(get::<i64>(&row, "seq")?)
            .map_err(|_| StoreError::Corrupt("negative checkout sequence".to_string()))
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let kind = &commit.kind;
        let updated = sqlx::query(
            r#"
            UPDATE hardware_kinds
            SET available_capacity = ?1
            WHERE id = ?2 AND total_capacity = ?3
            "#,
        )
        .bind(i64::from(kind.available_capacity()))
        .bind(kind.id_typed().as_str())
        .bind(i64::from(kind.total_capacity()))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_kind", e))?;

        if updated.rows_affected() != 1 {
            return rollback(
                tx,
                StoreError::Conflict(format!("unknown hardware kind '{}'", kind.id_typed())),
            )
            .await;
        }

        for record in &commit.updated {
            let result = sqlx::query(
                r#"
                UPDATE allocation_records
                SET quantity = ?1, checked_in_at = ?2
                WHERE id = ?3 AND checked_in_at IS NULL
                "#,
            )
            .bind(i64::from(record.quantity().get()))
            .bind(record.checked_in_at().map(encode_time))
            .bind(record.id_typed().to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_record", e))?;

            if result.rows_affected() != 1 {
                return rollback(
                    tx,
                    StoreError::Conflict(format!(
                        "record {} is missing or already closed",
                        record.id_typed()
                    )),
                )
                .await;
            }
        }

        for record in &commit.inserted {
            let sql = format!(
                "INSERT INTO allocation_records ({RECORD_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            );
            let seq = i64::try_from(record.checkout_seq())
                .map_err(|_| StoreError::Corrupt("checkout sequence out of range".to_string()))?;
            let inserted = sqlx::query(&sql)
                .bind(record.id_typed().to_string())
                .bind(record.kind_id().as_str())
                .bind(record.project_id().to_string())
                .bind(record.subject_id().to_string())
                .bind(i64::from(record.quantity().get()))
                .bind(encode_time(record.checked_out_at()))
                .bind(record.checked_in_at().map(encode_time))
                .bind(seq)
                .execute(&mut *tx)
                .await;

            if let Err(err) = inserted {
                let err = if is_unique_violation(&err) {
                    StoreError::Conflict(format!("record {} already exists", record.id_typed()))
                } else {
                    map_sqlx_error("insert_record", err)
                };
                return rollback(tx, err).await;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

pub(crate) async fn rollback(tx: Transaction<'_, Sqlite>, err: StoreError) -> Result<(), StoreError> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))?;
    Err(err)
}

pub(crate) fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

pub(crate) fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("column '{column}': {e}")))
}

fn kind_from_row(row: &SqliteRow) -> Result<HardwareKind, StoreError> {
    let id = HardwareKindId::new(get::<String>(row, "id")?)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let total = capacity(get::<i64>(row, "total_capacity")?)?;
    let available = capacity(get::<i64>(row, "available_capacity")?)?;

    HardwareKind::restore(id, get::<String>(row, "name")?, total, available)
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn capacity(raw: i64) -> Result<u32, StoreError> {
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("capacity {raw} out of range")))
}

fn records_from_rows(rows: &[SqliteRow]) -> Result<Vec<AllocationRecord>, StoreError> {
    let mut records = rows.iter().map(record_from_row).collect::<Result<Vec<_>, _>>()?;
    sort_checkout_order(&mut records);
    Ok(records)
}

fn record_from_row(row: &SqliteRow) -> Result<AllocationRecord, StoreError> {
    let corrupt = |e: haas_core::DomainError| StoreError::Corrupt(e.to_string());

    let id: AllocationId = get::<String>(row, "id")?.parse().map_err(corrupt)?;
    let kind_id = HardwareKindId::new(get::<String>(row, "kind_id")?).map_err(corrupt)?;
    let project_id: ProjectId = get::<String>(row, "project_id")?.parse().map_err(corrupt)?;
    let subject_id: SubjectId = get::<String>(row, "subject_id")?.parse().map_err(corrupt)?;
    let quantity = Quantity::try_from(get::<i64>(row, "quantity")?)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let checked_out_at = decode_time(&get::<String>(row, "checked_out_at")?)?;
    let checked_in_at = get::<Option<String>>(row, "checked_in_at")?
        .as_deref()
        .map(decode_time)
        .transpose()?;
    let checkout_seq = u64::try_from(get::<i64>(row, "checkout_seq")?)
        .map_err(|_| StoreError::Corrupt(format!("record {id} has a negative checkout sequence")))?;

    AllocationRecord::restore(
        id,
        kind_id,
        project_id,
        subject_id,
        quantity,
        checked_out_at,
        checked_in_at,
        checkout_seq,
    )
    .map_err(corrupt)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

pub(crate) fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    let message = match &err {
        sqlx::Error::Database(db_err) => format!("database error: {}", db_err.message()),
        other => other.to_string(),
    };
    StoreError::Backend { operation, message }
}
