//! SqliteStore - durable queue, archive and sink registry

use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use chrono::DateTime;
use contracts::{
    is_valid_bit, ContractError, MetadataRecord, QueueStore, SinkDescriptor, SinkStore,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite, SqliteConnection};
use tracing::{debug, info, instrument};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS queue (
        transaction_id TEXT PRIMARY KEY,
        key TEXT NOT NULL,
        value BLOB NOT NULL,
        committed_mask INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_queue_created_at ON queue (created_at, transaction_id)",
    "CREATE INDEX IF NOT EXISTS idx_queue_key_created_at ON queue (key, created_at)",
    "CREATE TABLE IF NOT EXISTS archive (
        transaction_id TEXT PRIMARY KEY,
        key TEXT NOT NULL,
        value BLOB NOT NULL,
        committed_mask INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_archive_key_created_at ON archive (key, created_at)",
    "CREATE TABLE IF NOT EXISTS sinks (
        instance_id TEXT PRIMARY KEY,
        bit INTEGER NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        config BLOB NOT NULL
    )",
];

const RECORD_COLUMNS: &str = "transaction_id, key, value, committed_mask, created_at";

// Masks and bits are stored bit-for-bit in SQLite's signed INTEGER.
#[inline]
fn to_sql(mask: u64) -> i64 {
    mask as i64
}

#[inline]
fn from_sql(mask: i64) -> u64 {
    mask as u64
}

fn store_err(context: &str) -> impl FnOnce(sqlx::Error) -> ContractError + '_ {
    move |e| ContractError::store(format!("{context}: {e}"), e)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn record_from_row(row: &SqliteRow) -> Result<MetadataRecord, ContractError> {
    let created_micros: i64 = row
        .try_get("created_at")
        .map_err(store_err("decode created_at"))?;
    let created_at = DateTime::from_timestamp_micros(created_micros).ok_or_else(|| {
        ContractError::Other(format!("stored timestamp out of range: {created_micros}us"))
    })?;
    let value: Vec<u8> = row.try_get("value").map_err(store_err("decode value"))?;
    let mask: i64 = row
        .try_get("committed_mask")
        .map_err(store_err("decode committed_mask"))?;

    Ok(MetadataRecord {
        transaction_id: row
            .try_get("transaction_id")
            .map_err(store_err("decode transaction_id"))?,
        key: row.try_get("key").map_err(store_err("decode key"))?,
        value: Bytes::from(value),
        committed_mask: from_sql(mask),
        created_at,
    })
}

fn sink_from_row(row: &SqliteRow) -> Result<SinkDescriptor, ContractError> {
    let bit: i64 = row.try_get("bit").map_err(store_err("decode bit"))?;
    Ok(SinkDescriptor {
        instance_id: row
            .try_get("instance_id")
            .map_err(store_err("decode instance_id"))?,
        bit: from_sql(bit),
        kind: row.try_get("kind").map_err(store_err("decode kind"))?,
        config: row.try_get("config").map_err(store_err("decode config"))?,
    })
}

/// Insert a record on a caller-owned connection or transaction
///
/// Used by [`crate::Producer::enqueue_in`] so that publication commits or
/// rolls back together with the caller's own writes.
pub(crate) async fn insert_record(
    conn: &mut SqliteConnection,
    record: &MetadataRecord,
) -> Result<(), ContractError> {
    let result = sqlx::query(
        "INSERT INTO queue (transaction_id, key, value, committed_mask, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&record.transaction_id)
    .bind(&record.key)
    .bind(record.value.as_ref())
    .bind(to_sql(record.committed_mask))
    .bind(record.created_at.timestamp_micros())
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(ContractError::RecordExists {
            transaction_id: record.transaction_id.clone(),
        }),
        Err(e) => Err(store_err("insert record")(e)),
    }
}

/// SQLite-backed queue store and sink registry
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Connect to `url` and create the schema if missing
    ///
    /// In-memory databases are pinned to a single connection so every
    /// caller sees the same data.
    #[instrument(name = "sqlite_store_connect", skip(url))]
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, ContractError> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(store_err("parse store url"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let in_memory = url.contains(":memory:");
        let max_connections = if in_memory {
            1
        } else {
            max_connections.max(1)
        };

        let mut pool_opts = SqlitePoolOptions::new().max_connections(max_connections);
        if in_memory {
            // Dropping the only connection would drop the database with it
            pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_opts
            .connect_with(opts)
            .await
            .map_err(store_err("open store"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(max_connections, "SQLite store ready");
        Ok(store)
    }

    /// Private in-memory database
    pub async fn in_memory() -> Result<Self, ContractError> {
        Self::connect("sqlite::memory:", 1).await
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), ContractError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(store_err("migrate schema"))?;
        }
        Ok(())
    }

    async fn fetch_records(
        &self,
        sql: &str,
        bind: Option<&str>,
    ) -> Result<Vec<MetadataRecord>, ContractError> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(store_err("select records"))?;
        rows.iter().map(record_from_row).collect()
    }
}

impl QueueStore for SqliteStore {
    async fn insert(&self, record: &MetadataRecord) -> Result<(), ContractError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(store_err("acquire connection"))?;
        insert_record(&mut conn, record).await
    }

    async fn pending(&self, full_mask: u64) -> Result<Vec<MetadataRecord>, ContractError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM queue
             WHERE (committed_mask & ?1) != ?1
             ORDER BY created_at ASC, transaction_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(to_sql(full_mask))
            .fetch_all(&self.pool)
            .await
            .map_err(store_err("select pending records"))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn mark_committed(&self, transaction_id: &str, bit: u64) -> Result<bool, ContractError> {
        let result = sqlx::query(
            "UPDATE queue SET committed_mask = committed_mask | ?1 WHERE transaction_id = ?2",
        )
        .bind(to_sql(bit))
        .bind(transaction_id)
        .execute(&self.pool)
        .await
        .map_err(store_err("set commit bit"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, transaction_id: &str) -> Result<Option<MetadataRecord>, ContractError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM queue WHERE transaction_id = ?1");
        let row = sqlx::query(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("select record"))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn records_for_key(&self, key: &str) -> Result<Vec<MetadataRecord>, ContractError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM queue WHERE key = ?1
             ORDER BY created_at ASC, transaction_id ASC"
        );
        self.fetch_records(&sql, Some(key)).await
    }

    async fn depth(&self) -> Result<u64, ContractError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err("count queue"))?;
        Ok(count.max(0) as u64)
    }

    async fn keys_at_threshold(&self, threshold: usize) -> Result<Vec<String>, ContractError> {
        sqlx::query_scalar(
            "SELECT key FROM queue GROUP BY key HAVING COUNT(*) >= ?1 ORDER BY key ASC",
        )
        .bind(threshold as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("select keys over threshold"))
    }

    #[instrument(name = "sqlite_store_archive_oldest", skip(self))]
    async fn archive_oldest(
        &self,
        key: &str,
        limit: usize,
        required_mask: Option<u64>,
    ) -> Result<usize, ContractError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(store_err("begin archive"))?;

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM queue WHERE key = ?1
             ORDER BY created_at ASC, transaction_id ASC LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(key)
            .bind(limit as i64)
            .fetch_all(&mut *tx)
            .await
            .map_err(store_err("select archive candidates"))?;

        let mut archived = 0;
        for row in &rows {
            let record = record_from_row(row)?;
            if let Some(mask) = required_mask {
                if !record.is_fully_committed(mask) {
                    continue;
                }
            }

            sqlx::query(
                "INSERT OR REPLACE INTO archive (transaction_id, key, value, committed_mask, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&record.transaction_id)
            .bind(&record.key)
            .bind(record.value.as_ref())
            .bind(to_sql(record.committed_mask))
            .bind(record.created_at.timestamp_micros())
            .execute(&mut *tx)
            .await
            .map_err(store_err("copy record to archive"))?;

            sqlx::query("DELETE FROM queue WHERE transaction_id = ?1")
                .bind(&record.transaction_id)
                .execute(&mut *tx)
                .await
                .map_err(store_err("delete archived record"))?;

            archived += 1;
        }

        tx.commit().await.map_err(store_err("commit archive"))?;
        debug!(key, archived, "Archived records");
        Ok(archived)
    }

    async fn archived_for_key(&self, key: &str) -> Result<Vec<MetadataRecord>, ContractError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM archive WHERE key = ?1
             ORDER BY created_at ASC, transaction_id ASC"
        );
        self.fetch_records(&sql, Some(key)).await
    }
}

impl SinkStore for SqliteStore {
    async fn load_sinks(&self) -> Result<Vec<SinkDescriptor>, ContractError> {
        let rows = sqlx::query("SELECT instance_id, bit, kind, config FROM sinks")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err("select sinks"))?;
        let mut sinks = rows
            .iter()
            .map(sink_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        sinks.sort_by_key(|s| s.bit);
        Ok(sinks)
    }

    #[instrument(
        name = "sqlite_store_register_sink",
        skip(self, descriptor),
        fields(sink = %descriptor.instance_id, bit = descriptor.bit)
    )]
    async fn register_sink(&self, descriptor: &SinkDescriptor) -> Result<(), ContractError> {
        if !is_valid_bit(descriptor.bit) {
            return Err(ContractError::InvalidBit {
                bit: descriptor.bit,
            });
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(store_err("begin register"))?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT instance_id FROM sinks WHERE instance_id = ?1")
                .bind(&descriptor.instance_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(store_err("check instance id"))?;
        if existing.is_some() {
            return Err(ContractError::DuplicateSink {
                instance_id: descriptor.instance_id.clone(),
            });
        }

        let owner: Option<String> =
            sqlx::query_scalar("SELECT instance_id FROM sinks WHERE bit = ?1")
                .bind(to_sql(descriptor.bit))
                .fetch_optional(&mut *tx)
                .await
                .map_err(store_err("check bit owner"))?;
        if let Some(owner) = owner {
            return Err(ContractError::BitInUse {
                bit: descriptor.bit,
                owner,
            });
        }

        let referenced: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queue WHERE (committed_mask & ?1) != 0")
                .bind(to_sql(descriptor.bit))
                .fetch_one(&mut *tx)
                .await
                .map_err(store_err("check bit references"))?;
        if referenced > 0 {
            return Err(ContractError::BitStillReferenced {
                bit: descriptor.bit,
                records: referenced as u64,
            });
        }

        sqlx::query("INSERT INTO sinks (instance_id, bit, kind, config) VALUES (?1, ?2, ?3, ?4)")
            .bind(&descriptor.instance_id)
            .bind(to_sql(descriptor.bit))
            .bind(&descriptor.kind)
            .bind(&descriptor.config)
            .execute(&mut *tx)
            .await
            .map_err(store_err("insert sink"))?;

        tx.commit().await.map_err(store_err("commit register"))?;
        info!("Sink registered");
        Ok(())
    }

    async fn retire_sink(&self, instance_id: &str) -> Result<bool, ContractError> {
        let result = sqlx::query("DELETE FROM sinks WHERE instance_id = ?1")
            .bind(instance_id)
            .execute(&self.pool)
            .await
            .map_err(store_err("retire sink"))?;
        Ok(result.rows_affected() > 0)
    }
}
