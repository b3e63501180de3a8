use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::Pack;
use crate::store::PackStore;

/// Persisted pack summary (one per cached park)
#[derive(Debug, Clone, Serialize)]
pub struct CachedPackStat {
    pub key: String,
    pub trackers: i64,
    pub updated: String,
    pub fingerprint: String,
    pub stored_at: String,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Packs Table (one row per park key, pack stored as JSON)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS packs (
            key TEXT PRIMARY KEY,
            pack TEXT NOT NULL,
            trackers INTEGER NOT NULL,
            updated TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            stored_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Settings Table (last selected park, ...)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

pub fn get_pack(conn: &Connection, key: &str) -> Result<Option<Pack>> {
    let json: Option<String> = conn
        .query_row("SELECT pack FROM packs WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?;

    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub fn put_pack(conn: &Connection, key: &str, pack: &Pack) -> Result<()> {
    let json = serde_json::to_string(pack)?;

    conn.execute(
        "INSERT INTO packs (key, pack, trackers, updated, fingerprint, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(key) DO UPDATE SET
            pack = excluded.pack,
            trackers = excluded.trackers,
            updated = excluded.updated,
            fingerprint = excluded.fingerprint,
            stored_at = excluded.stored_at",
        params![
            key,
            json,
            pack.trackers.len() as i64,
            pack.updated,
            pack.fingerprint(),
            Utc::now().to_rfc3339(),
        ],
    )?;

    Ok(())
}

pub fn delete_pack(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM packs WHERE key = ?1", params![key])?;
    Ok(())
}

pub fn get_cached_pack_stats(conn: &Connection) -> Result<Vec<CachedPackStat>> {
    let mut stmt = conn.prepare(
        "SELECT key, trackers, updated, fingerprint, stored_at
         FROM packs
         ORDER BY key",
    )?;

    let stats = stmt
        .query_map([], |row| {
            Ok(CachedPackStat {
                key: row.get(0)?,
                trackers: row.get(1)?,
                updated: row.get(2)?,
                fingerprint: row.get(3)?,
                stored_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(stats)
}

pub fn get_setting(conn: &Connection, name: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM settings WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn put_setting(conn: &Connection, name: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (name, value) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        params![name, value],
    )?;
    Ok(())
}

// ============================================================================
// SQLITE PACK STORE
// ============================================================================

/// `PackStore` over a single SQLite connection
#[derive(Clone)]
pub struct SqlitePackStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePackStore {
    /// Open (or create) the database file, creating parent directories
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("database connection lock poisoned".to_string()))
    }

    pub fn cached_pack_stats(&self) -> Result<Vec<CachedPackStat>> {
        let conn = self.lock()?;
        get_cached_pack_stats(&conn)
    }
}

#[async_trait]
impl PackStore for SqlitePackStore {
    async fn get(&self, key: &str) -> Result<Option<Pack>> {
        let conn = self.lock()?;
        get_pack(&conn, key)
    }

    async fn set(&self, key: &str, pack: &Pack) -> Result<()> {
        let conn = self.lock()?;
        put_pack(&conn, key, pack)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        delete_pack(&conn, key)
    }

    async fn get_setting(&self, name: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        get_setting(&conn, name)
    }

    async fn set_setting(&self, name: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        put_setting(&conn, name, value)
    }
}
