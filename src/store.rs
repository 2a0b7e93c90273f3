use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const RECENT_LOG_LIMIT: usize = 10;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS processed_products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asin TEXT NOT NULL UNIQUE,
    rakuten_item_url TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS automation_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asin TEXT NOT NULL,
    action TEXT NOT NULL,
    status TEXT NOT NULL,
    message TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS automation_log_asin ON automation_log (asin, timestamp);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("blocking store task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Start,
    Success,
    Failed,
    Error,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Start => "start",
            ActionStatus::Success => "success",
            ActionStatus::Failed => "failed",
            ActionStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedItemRecord {
    pub asin: String,
    pub rakuten_item_url: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionLogEntry {
    pub asin: String,
    pub action: String,
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingSummary {
    pub completed_products: u64,
    pub failed_products: u64,
    pub total_processed: u64,
    pub recent_logs: Vec<ActionLogEntry>,
}

/// SQLite-backed record of processed items and the per-step audit trail.
/// Every call opens its own connection and closes it before returning.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        store.connect()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `op` against this store on the blocking thread pool, keeping
    /// SQLite I/O off the async workers.
    pub async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        Ok(Connection::open(&self.path)?)
    }

    pub fn log_action(
        &self,
        asin: &str,
        action: &str,
        status: ActionStatus,
        message: &str,
    ) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO automation_log (asin, action, status, message, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![asin, action, status.as_str(), message, Utc::now()],
        )?;
        Ok(())
    }

    /// Inserts or updates the single row for `asin`; `created_at` is kept
    /// from the first insert.
    pub fn upsert_item(
        &self,
        asin: &str,
        item_url: &str,
        status: ItemStatus,
    ) -> Result<(), StoreError> {
        let conn = self.connect()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO processed_products (asin, rakuten_item_url, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(asin) DO UPDATE SET
                rakuten_item_url = excluded.rakuten_item_url,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![asin, item_url, status.as_str(), now],
        )?;
        debug!(target = "relay.store", asin = %asin, status = status.as_str(), "item_status_upserted");
        Ok(())
    }

    pub fn item(&self, asin: &str) -> Result<Option<ProcessedItemRecord>, StoreError> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT asin, rakuten_item_url, status, created_at, updated_at
                 FROM processed_products WHERE asin = ?1",
                params![asin],
                |row| {
                    Ok(ProcessedItemRecord {
                        asin: row.get(0)?,
                        rakuten_item_url: row.get(1)?,
                        status: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn count_items(&self) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM processed_products", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Audit trail for one identifier, oldest first.
    pub fn actions_for(&self, asin: &str) -> Result<Vec<ActionLogEntry>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT asin, action, status, message, timestamp
             FROM automation_log WHERE asin = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;
        let entries = stmt
            .query_map(params![asin], map_log_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn summary(&self) -> Result<ProcessingSummary, StoreError> {
        let conn = self.connect()?;
        let count_status = |status: ItemStatus| -> Result<u64, rusqlite::Error> {
            conn.query_row(
                "SELECT COUNT(*) FROM processed_products WHERE status = ?1",
                params![status.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count as u64)
        };
        let completed_products = count_status(ItemStatus::Completed)?;
        let failed_products = count_status(ItemStatus::Failed)?;

        let mut stmt = conn.prepare(
            "SELECT asin, action, status, message, timestamp
             FROM automation_log
             ORDER BY timestamp DESC, id DESC
             LIMIT ?1",
        )?;
        let recent_logs = stmt
            .query_map(params![RECENT_LOG_LIMIT as i64], map_log_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProcessingSummary {
            completed_products,
            failed_products,
            total_processed: completed_products + failed_products,
            recent_logs,
        })
    }
}

fn map_log_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActionLogEntry> {
    Ok(ActionLogEntry {
        asin: row.get(0)?,
        action: row.get(1)?,
        status: row.get(2)?,
        message: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("relay.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn open_is_idempotent() {
        let (dir, store) = store();
        store.log_action("B01", "fetch_source_data", ActionStatus::Start, "go").unwrap();
        let reopened = Store::open(dir.path().join("relay.db")).unwrap();
        assert_eq!(reopened.actions_for("B01").unwrap().len(), 1);
    }

    #[test]
    fn upsert_keeps_one_row_per_asin() {
        let (_dir, store) = store();
        store.upsert_item("B01", "product-b01", ItemStatus::Failed).unwrap();
        let first = store.item("B01").unwrap().unwrap();
        store.upsert_item("B01", "product-b01", ItemStatus::Completed).unwrap();
        store.upsert_item("B01", "product-b01", ItemStatus::Completed).unwrap();
        store.upsert_item("B02", "product-b02", ItemStatus::Failed).unwrap();

        assert_eq!(store.count_items().unwrap(), 2);
        let latest = store.item("B01").unwrap().unwrap();
        assert_eq!(latest.status, "completed");
        assert_eq!(latest.created_at, first.created_at);
        assert!(latest.updated_at >= first.updated_at);
        assert!(store.item("B03").unwrap().is_none());
    }

    #[test]
    fn actions_are_append_only_and_ordered() {
        let (_dir, store) = store();
        store.log_action("B01", "fetch_source_data", ActionStatus::Start, "a").unwrap();
        store.log_action("B02", "fetch_source_data", ActionStatus::Start, "other").unwrap();
        store.log_action("B01", "fetch_source_data", ActionStatus::Success, "b").unwrap();
        store.log_action("B01", "ai_generation", ActionStatus::Start, "c").unwrap();

        let entries = store.actions_for("B01").unwrap();
        let messages: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b", "c"]);
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(entries[1].status, "success");
    }

    #[tokio::test]
    async fn blocking_runs_operations_off_the_runtime() {
        let (_dir, store) = store();
        store
            .blocking(|store| store.upsert_item("B01", "product-b01", ItemStatus::Completed))
            .await
            .unwrap();
        let summary = store.blocking(Store::summary).await.unwrap();
        assert_eq!(summary.completed_products, 1);
    }

    #[test]
    fn summary_counts_and_recent_logs() {
        let (_dir, store) = store();
        store.upsert_item("B01", "product-b01", ItemStatus::Completed).unwrap();
        store.upsert_item("B02", "product-b02", ItemStatus::Completed).unwrap();
        store.upsert_item("B03", "product-b03", ItemStatus::Failed).unwrap();
        for idx in 0..12 {
            store
                .log_action("B01", "step", ActionStatus::Success, &format!("m{idx}"))
                .unwrap();
        }

        let summary = store.summary().unwrap();
        assert_eq!(summary.completed_products, 2);
        assert_eq!(summary.failed_products, 1);
        assert_eq!(summary.total_processed, 3);
        assert_eq!(summary.recent_logs.len(), RECENT_LOG_LIMIT);
        assert_eq!(summary.recent_logs[0].message, "m11");
    }
}
