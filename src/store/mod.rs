//! SQLite-backed durability for flows and alerts
//!
//! The pipeline depends on exactly two read shapes beyond its own
//! writes: "most recent N alerts, newest first" and the retention
//! sweep. Opening the database is the one operation whose failure is
//! fatal to the caller; every later write is best-effort and its
//! errors are handled at the write site.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::detect::Alert;
use crate::error::Result;
use crate::flow::{FlowAggregate, FlowKey};

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS flows (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    flow_key      TEXT NOT NULL UNIQUE,
    src_ip        TEXT NOT NULL,
    dst_ip        TEXT NOT NULL,
    src_port      INTEGER,
    dst_port      INTEGER,
    protocol      INTEGER NOT NULL,
    first_seen_ms INTEGER NOT NULL,
    last_seen_ms  INTEGER NOT NULL,
    bytes         INTEGER NOT NULL,
    packets       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_flows_last_seen ON flows(last_seen_ms);

CREATE TABLE IF NOT EXISTS alerts (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_type TEXT NOT NULL,
    message    TEXT NOT NULL,
    ts_ms      INTEGER NOT NULL,
    confidence REAL NOT NULL,
    evidence   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_ts ON alerts(ts_ms);
"#;

/// Database file name under the local data directory
const DB_FILE: &str = "netsentry.db";

// ============================================================================
// RECORDS
// ============================================================================

/// One flow row: the latest snapshot of a live flow, replaced wholesale
/// on every packet for its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub flow_key: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub protocol: u8,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub bytes: u64,
    pub packets: u64,
}

impl FlowRecord {
    pub fn from_aggregate(key: &FlowKey, agg: &FlowAggregate) -> Self {
        Self {
            flow_key: key.to_string(),
            src_ip: key.src_ip.to_string(),
            dst_ip: key.dst_ip.to_string(),
            src_port: key.src_port,
            dst_port: key.dst_port,
            protocol: key.protocol,
            first_seen_ms: agg.first_seen_ms,
            last_seen_ms: agg.last_seen_ms,
            bytes: agg.bytes,
            packets: agg.packets,
        }
    }
}

/// One alert row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_type: String,
    pub message: String,
    pub ts_ms: i64,
    pub confidence: f64,
    /// Evidence JSON, serialized
    pub evidence: String,
}

impl From<Alert> for AlertRecord {
    fn from(alert: Alert) -> Self {
        Self {
            alert_type: alert.alert_type,
            message: alert.message,
            ts_ms: alert.ts_ms,
            confidence: alert.confidence,
            evidence: alert.evidence.to_string(),
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the database at the platform's local data directory.
    pub fn open_default() -> Result<Self> {
        let dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("netsentry");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(DB_FILE);
        log::info!("Opening store: {:?}", path);
        Self::open(path)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert-or-replace the snapshot for a flow key. A conflict on the
    /// natural key replaces the whole row.
    pub fn upsert_flow(&self, record: &FlowRecord) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO flows
                (flow_key, src_ip, dst_ip, src_port, dst_port, protocol,
                 first_seen_ms, last_seen_ms, bytes, packets)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(flow_key) DO UPDATE SET
                src_ip = excluded.src_ip,
                dst_ip = excluded.dst_ip,
                src_port = excluded.src_port,
                dst_port = excluded.dst_port,
                protocol = excluded.protocol,
                first_seen_ms = excluded.first_seen_ms,
                last_seen_ms = excluded.last_seen_ms,
                bytes = excluded.bytes,
                packets = excluded.packets",
            params![
                record.flow_key,
                record.src_ip,
                record.dst_ip,
                record.src_port,
                record.dst_port,
                record.protocol,
                record.first_seen_ms,
                record.last_seen_ms,
                record.bytes as i64,
                record.packets as i64,
            ],
        )?;
        Ok(())
    }

    pub fn insert_alert(&self, record: &AlertRecord) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO alerts (alert_type, message, ts_ms, confidence, evidence)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.alert_type,
                record.message,
                record.ts_ms,
                record.confidence,
                record.evidence,
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Most recent alerts, newest first.
    pub fn recent_alerts(&self, limit: u32) -> Result<Vec<AlertRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT alert_type, message, ts_ms, confidence, evidence
             FROM alerts ORDER BY ts_ms DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok(AlertRecord {
                alert_type: row.get(0)?,
                message: row.get(1)?,
                ts_ms: row.get(2)?,
                confidence: row.get(3)?,
                evidence: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Latest stored snapshot for one flow key.
    pub fn flow_by_key(&self, flow_key: &str) -> Result<Option<FlowRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT flow_key, src_ip, dst_ip, src_port, dst_port, protocol,
                    first_seen_ms, last_seen_ms, bytes, packets
             FROM flows WHERE flow_key = ?1 LIMIT 1",
        )?;
        let record = stmt
            .query_row([flow_key], |row| {
                Ok(FlowRecord {
                    flow_key: row.get(0)?,
                    src_ip: row.get(1)?,
                    dst_ip: row.get(2)?,
                    src_port: row.get(3)?,
                    dst_port: row.get(4)?,
                    protocol: row.get(5)?,
                    first_seen_ms: row.get(6)?,
                    last_seen_ms: row.get(7)?,
                    bytes: row.get::<_, i64>(8)? as u64,
                    packets: row.get::<_, i64>(9)? as u64,
                })
            })
            .optional()?;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Retention
    // ------------------------------------------------------------------

    /// Delete flows last seen before the cutoff. Returns rows removed.
    pub fn prune_flows(&self, cutoff_ms: i64) -> Result<usize> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM flows WHERE last_seen_ms < ?1", [cutoff_ms])?;
        Ok(removed)
    }

    /// Delete alerts raised before the cutoff. Returns rows removed.
    pub fn prune_alerts(&self, cutoff_ms: i64) -> Result<usize> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM alerts WHERE ts_ms < ?1", [cutoff_ms])?;
        Ok(removed)
    }

    /// Total alerts on disk (test/diagnostic helper).
    pub fn alert_count(&self) -> Result<u64> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// ============================================================================
// TESTS
// ============================================================================
