//! Persistent device identities and scan history backed by SQLite.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::error::RepositoryError;
use crate::types::{DeviceIdentity, ScanSummary, UNKNOWN};

/// UTC wall-clock timestamp in the stored `YYYY-MM-DD HH:MM:SS` layout.
pub fn format_timestamp(at: OffsetDateTime) -> String {
    let utc = at.to_offset(UtcOffset::UTC);
    utc.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .unwrap_or_else(|_| utc.unix_timestamp().to_string())
}

/// Device identity and scan history store.
///
/// Blocking; async callers go through `spawn_blocking`.
pub trait Repository: Send + Sync {
    /// Insert or refresh the identity keyed by `mac`. `first_seen` is set once,
    /// `last_seen` never moves backwards, and an `"Unknown"` hostname never
    /// replaces a resolved one.
    fn upsert_device(
        &self,
        ip: &str,
        mac: &str,
        hostname: &str,
        seen_at: OffsetDateTime,
    ) -> Result<(), RepositoryError>;

    fn append_scan_summary(&self, summary: &ScanSummary) -> Result<(), RepositoryError>;

    fn devices(&self) -> Result<Vec<DeviceIdentity>, RepositoryError>;

    fn latest_scan(&self) -> Result<Option<ScanSummary>, RepositoryError>;

    /// All summaries, newest first.
    fn scan_history(&self) -> Result<Vec<ScanSummary>, RepositoryError>;

    /// Number of distinct hardware addresses ever seen.
    fn total_devices(&self) -> Result<u64, RepositoryError>;
}

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let repo = Self {
            conn: Mutex::new(Connection::open(path.as_ref())?),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    pub fn in_memory() -> Result<Self, RepositoryError> {
        let repo = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> Result<(), RepositoryError> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                ip TEXT NOT NULL,
                mac TEXT PRIMARY KEY,
                hostname TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                devices_count INTEGER NOT NULL,
                open_ports_count INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.conn.lock().map_err(|_| RepositoryError::Poisoned)
    }
}

fn summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScanSummary> {
    Ok(ScanSummary {
        timestamp: row.get(0)?,
        device_count: row.get::<_, i64>(1)?.max(0) as u64,
        open_port_count: row.get::<_, i64>(2)?.max(0) as u64,
    })
}

impl Repository for SqliteRepository {
    fn upsert_device(
        &self,
        ip: &str,
        mac: &str,
        hostname: &str,
        seen_at: OffsetDateTime,
    ) -> Result<(), RepositoryError> {
        let seen = format_timestamp(seen_at);
        self.conn()?.execute(
            r#"
            INSERT INTO devices (ip, mac, hostname, first_seen, last_seen)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(mac) DO UPDATE SET
                ip = excluded.ip,
                hostname = CASE
                    WHEN excluded.hostname = ?5 THEN devices.hostname
                    ELSE excluded.hostname
                END,
                last_seen = MAX(devices.last_seen, excluded.last_seen)
            "#,
            params![ip, mac, hostname, seen, UNKNOWN],
        )?;
        Ok(())
    }

    fn append_scan_summary(&self, summary: &ScanSummary) -> Result<(), RepositoryError> {
        self.conn()?.execute(
            "INSERT INTO scans (timestamp, devices_count, open_ports_count) VALUES (?1, ?2, ?3)",
            params![
                summary.timestamp,
                summary.device_count as i64,
                summary.open_port_count as i64
            ],
        )?;
        Ok(())
    }

    fn devices(&self) -> Result<Vec<DeviceIdentity>, RepositoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ip, mac, hostname, first_seen, last_seen FROM devices ORDER BY last_seen DESC, mac",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DeviceIdentity {
                ip: row.get(0)?,
                mac: row.get(1)?,
                hostname: row.get(2)?,
                first_seen: row.get(3)?,
                last_seen: row.get(4)?,
            })
        })?;
        let devices = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(devices)
    }

    fn latest_scan(&self) -> Result<Option<ScanSummary>, RepositoryError> {
        let conn = self.conn()?;
        let summary = conn
            .query_row(
                "SELECT timestamp, devices_count, open_ports_count FROM scans ORDER BY id DESC LIMIT 1",
                [],
                summary_from_row,
            )
            .optional()?;
        Ok(summary)
    }

    fn scan_history(&self) -> Result<Vec<ScanSummary>, RepositoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, devices_count, open_ports_count FROM scans ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], summary_from_row)?;
        let history = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(history)
    }

    fn total_devices(&self) -> Result<u64, RepositoryError> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(DISTINCT mac) FROM devices", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}
