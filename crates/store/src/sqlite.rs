//! Durable SQLite-backed group store.
//!
//! Groups are stored as JSON in a single table keyed by
//! `(partition, group_key)`. Every operation runs on the blocking pool so
//! callers never stall the async runtime on disk I/O.

use async_trait::async_trait;
use chrono::Utc;
use correlation_core::error::StoreErrorCode;
use correlation_core::{Error, EventGroup, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics;
use tracing::{debug, info};

use crate::store::GroupStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS event_groups (
    partition  TEXT NOT NULL,
    group_key  TEXT NOT NULL,
    payload    TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (partition, group_key)
)";

/// SQLite group store.
#[derive(Clone)]
pub struct SqliteGroupStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGroupStore {
    /// Opens (or creates) a database file.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::store(
                        StoreErrorCode::Io,
                        format!(
                            "Failed to create database directory {}: {}",
                            parent.display(),
                            e
                        ),
                    )
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(io_error)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0))
            .map_err(io_error)?;

        let store = Self::with_connection(conn)?;
        info!(path = %db_path.display(), "Opened SQLite group store");
        Ok(store)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(io_error)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(SCHEMA, []).map_err(io_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let start = Instant::now();

        let result = tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            op(&mut conn)
        })
        .await
        .map_err(|e| Error::store(StoreErrorCode::Io, format!("Store task failed: {}", e)))?;

        metrics()
            .store_latency_ms
            .observe(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX));

        result
    }
}

fn io_error(e: rusqlite::Error) -> Error {
    Error::store(StoreErrorCode::Io, format!("SQLite error: {}", e))
}

fn encode(group: &EventGroup) -> Result<String> {
    Ok(serde_json::to_string(group)?)
}

fn decode(key: &str, payload: &str) -> Result<EventGroup> {
    serde_json::from_str(payload).map_err(|e| {
        Error::store(
            StoreErrorCode::Serialization,
            format!("Failed to deserialize group {}: {}", key, e),
        )
    })
}

#[async_trait]
impl GroupStore for SqliteGroupStore {
    async fn store(&self, key: &str, group: &EventGroup, partition: &str) -> Result<()> {
        let payload = encode(group)?;
        let created_at = group.creation_time().timestamp_millis();
        let (key, partition) = (key.to_string(), partition.to_string());

        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO event_groups (partition, group_key, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![partition, key, payload, created_at, Utc::now().timestamp_millis()],
            );

            match inserted {
                Ok(_) => {
                    debug!(key = %key, partition = %partition, "Stored group");
                    Ok(())
                }
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(Error::already_exists(&key, &partition))
                }
                Err(e) => Err(io_error(e)),
            }
        })
        .await
    }

    async fn retrieve(&self, key: &str, partition: &str) -> Result<EventGroup> {
        let (key, partition) = (key.to_string(), partition.to_string());

        self.with_conn(move |conn| {
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload FROM event_groups WHERE partition = ?1 AND group_key = ?2",
                    params![partition, key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(io_error)?;

            match payload {
                Some(payload) => decode(&key, &payload),
                None => Err(Error::not_found(&key, &partition)),
            }
        })
        .await
    }

    async fn remove(&self, key: &str, partition: &str) -> Result<EventGroup> {
        let (key, partition) = (key.to_string(), partition.to_string());

        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(io_error)?;

            let payload: Option<String> = tx
                .query_row(
                    "SELECT payload FROM event_groups WHERE partition = ?1 AND group_key = ?2",
                    params![partition, key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(io_error)?;

            let Some(payload) = payload else {
                return Err(Error::not_found(&key, &partition));
            };
            let group = decode(&key, &payload)?;

            tx.execute(
                "DELETE FROM event_groups WHERE partition = ?1 AND group_key = ?2",
                params![partition, key],
            )
            .map_err(io_error)?;
            tx.commit().map_err(io_error)?;

            Ok(group)
        })
        .await
    }

    async fn contains(&self, key: &str, partition: &str) -> Result<bool> {
        let (key, partition) = (key.to_string(), partition.to_string());

        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM event_groups WHERE partition = ?1 AND group_key = ?2)",
                params![partition, key],
                |row| row.get(0),
            )
            .map_err(io_error)
        })
        .await
    }

    async fn all_keys(&self, partition: &str) -> Result<Vec<String>> {
        let partition = partition.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT group_key FROM event_groups WHERE partition = ?1 ORDER BY created_at",
                )
                .map_err(io_error)?;

            let keys = stmt
                .query_map(params![partition], |row| row.get::<_, String>(0))
                .map_err(io_error)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(io_error)?;

            Ok(keys)
        })
        .await
    }

    async fn clear(&self, partition: &str) -> Result<()> {
        let partition = partition.to_string();

        self.with_conn(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM event_groups WHERE partition = ?1",
                    params![partition],
                )
                .map_err(io_error)?;
            debug!(partition = %partition, removed = removed, "Cleared partition");
            Ok(())
        })
        .await
    }

    async fn update(&self, key: &str, group: &EventGroup, partition: &str) -> Result<()> {
        let payload = encode(group)?;
        let (key, partition) = (key.to_string(), partition.to_string());

        self.with_conn(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE event_groups SET payload = ?3, updated_at = ?4
                     WHERE partition = ?1 AND group_key = ?2",
                    params![partition, key, payload, Utc::now().timestamp_millis()],
                )
                .map_err(io_error)?;

            if updated == 0 {
                return Err(Error::not_found(&key, &partition));
            }
            Ok(())
        })
        .await
    }

    fn backend_type(&self) -> &'static str {
        "sqlite"
    }
}
