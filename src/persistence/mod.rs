//! SQLite-backed flag store.
//!
//! Implements the persistent key/value boundary the cooldown latch writes
//! through. Values are plain strings; timestamps travel as RFC 3339 and
//! decimals as their display form, so the table stays greppable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::broker::{BrokerError, FlagStore};

pub struct SqliteFlagStore {
    conn: Mutex<Connection>,
}

impl SqliteFlagStore {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open flag store at {:?}", db_path.as_ref()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("flag store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// In-memory store for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory flag store")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().unwrap().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS flags (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        debug!("flag store schema initialized");
        Ok(())
    }

    fn get_sync(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM flags WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to read flag {key}"))
    }

    fn set_sync(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO flags (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = ?2,
                updated_at = datetime('now')
            "#,
            params![key, value],
        )
        .with_context(|| format!("Failed to write flag {key}"))?;
        Ok(())
    }

    fn delete_sync(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM flags WHERE key = ?1", params![key])
            .with_context(|| format!("Failed to delete flag {key}"))?;
        Ok(())
    }

    /// Dump all flags for the status command.
    pub fn all(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, value FROM flags ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl FlagStore for SqliteFlagStore {
    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        self.get_sync(key)
            .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        self.set_sync(key, value)
            .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), BrokerError> {
        self.delete_sync(key)
            .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let store = SqliteFlagStore::in_memory().unwrap();

        assert_eq!(store.get("cooldown.latched").await.unwrap(), None);

        store.set("cooldown.latched", "1").await.unwrap();
        assert_eq!(
            store.get("cooldown.latched").await.unwrap(),
            Some("1".to_string())
        );

        // Upsert overwrites.
        store.set("cooldown.latched", "0").await.unwrap();
        assert_eq!(
            store.get("cooldown.latched").await.unwrap(),
            Some("0".to_string())
        );

        store.delete("cooldown.latched").await.unwrap();
        assert_eq!(store.get("cooldown.latched").await.unwrap(), None);
    }

    #[tokio::test]
    async fn all_lists_every_flag() {
        let store = SqliteFlagStore::in_memory().unwrap();
        store.set("b", "2").await.unwrap();
        store.set("a", "1").await.unwrap();

        let flags = store.all().unwrap();
        assert_eq!(
            flags,
            vec![("a".into(), "1".into()), ("b".into(), "2".into())]
        );
    }
}
