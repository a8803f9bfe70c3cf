use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// The calendar that the synced-call markers refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarBinding {
    pub calendar_id: String,
    pub calendar_name: String,
}

/// Marker recording that a call already has an event in the bound calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncedCallRecord {
    pub call_id: String,
    pub remote_event_id: String,
    pub synced_at: DateTime<Utc>,
}

/// One row of the `sync_runs` log.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRunRecord {
    pub run_id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub calls_seen: u64,
    pub calls_synced: u64,
    pub calls_failed: u64,
    pub error_message: Option<String>,
}

fn parse_timestamp(idx: usize, raw: String) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ── Calendar binding ───────────────────────────────────────────────

pub fn get_binding(conn: &Connection) -> Result<Option<CalendarBinding>, rusqlite::Error> {
    conn.query_row(
        "SELECT calendar_id, calendar_name FROM calendar_binding WHERE id = 1",
        [],
        |row| {
            Ok(CalendarBinding {
                calendar_id: row.get(0)?,
                calendar_name: row.get(1)?,
            })
        },
    )
    .optional()
}

/// Replace the binding. When the calendar id changed (or no binding existed)
/// every synced-call marker is deleted in the same transaction, since those
/// markers point at events in a calendar that may no longer exist.
///
/// Returns whether the markers were reset.
pub fn set_binding(
    conn: &Connection,
    calendar_id: &str,
    calendar_name: &str,
) -> Result<bool, rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;

    let previous: Option<String> = tx
        .query_row(
            "SELECT calendar_id FROM calendar_binding WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    let reset = previous.as_deref() != Some(calendar_id);

    if reset {
        tx.execute("DELETE FROM synced_calls", [])?;
    }
    tx.execute(
        "INSERT INTO calendar_binding (id, calendar_id, calendar_name, bound_at)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
           calendar_id = excluded.calendar_id,
           calendar_name = excluded.calendar_name,
           bound_at = CASE WHEN calendar_binding.calendar_id = excluded.calendar_id
                           THEN calendar_binding.bound_at ELSE excluded.bound_at END",
        params![calendar_id, calendar_name, Utc::now().to_rfc3339()],
    )?;

    tx.commit()?;
    Ok(reset)
}

// ── Synced calls ───────────────────────────────────────────────────

pub fn is_synced(conn: &Connection, call_id: &str) -> Result<bool, rusqlite::Error> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM synced_calls WHERE call_id = ?1",
            params![call_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Record a synced call. Marking an already-synced call keeps the original
/// marker and returns `false`.
pub fn mark_synced(
    conn: &Connection,
    call_id: &str,
    remote_event_id: &str,
) -> Result<bool, rusqlite::Error> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO synced_calls (call_id, remote_event_id, synced_at)
         VALUES (?1, ?2, ?3)",
        params![call_id, remote_event_id, Utc::now().to_rfc3339()],
    )?;
    Ok(inserted > 0)
}

pub fn synced_count(conn: &Connection) -> Result<u64, rusqlite::Error> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM synced_calls", [], |row| row.get(0))?;
    Ok(count as u64)
}

pub fn synced_call_ids(conn: &Connection) -> Result<HashSet<String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT call_id FROM synced_calls")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect()
}

pub fn get_synced_call(
    conn: &Connection,
    call_id: &str,
) -> Result<Option<SyncedCallRecord>, rusqlite::Error> {
    conn.query_row(
        "SELECT call_id, remote_event_id, synced_at FROM synced_calls WHERE call_id = ?1",
        params![call_id],
        |row| {
            Ok(SyncedCallRecord {
                call_id: row.get(0)?,
                remote_event_id: row.get(1)?,
                synced_at: parse_timestamp(2, row.get(2)?)?,
            })
        },
    )
    .optional()
}

pub fn remove_synced_call(conn: &Connection, call_id: &str) -> Result<bool, rusqlite::Error> {
    let deleted = conn.execute(
        "DELETE FROM synced_calls WHERE call_id = ?1",
        params![call_id],
    )?;
    Ok(deleted > 0)
}

pub fn clear_synced_calls(conn: &Connection) -> Result<u64, rusqlite::Error> {
    let deleted = conn.execute("DELETE FROM synced_calls", [])?;
    Ok(deleted as u64)
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub fn delete_config(conn: &Connection, key: &str) -> Result<bool, rusqlite::Error> {
    let deleted = conn.execute("DELETE FROM app_config WHERE key = ?1", params![key])?;
    Ok(deleted > 0)
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Sync runs ──────────────────────────────────────────────────────

pub fn insert_sync_run(
    conn: &Connection,
    range_start: Option<&str>,
    range_end: Option<&str>,
    dry_run: bool,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_runs (started_at, range_start, range_end, dry_run)
         VALUES (?1, ?2, ?3, ?4)",
        params![Utc::now().to_rfc3339(), range_start, range_end, dry_run as i32],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_sync_run(
    conn: &Connection,
    run_id: i64,
    status: &str,
    calls_seen: u64,
    calls_synced: u64,
    calls_failed: u64,
    error_message: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_runs SET
            finished_at = ?2, status = ?3, calls_seen = ?4,
            calls_synced = ?5, calls_failed = ?6, error_message = ?7
         WHERE run_id = ?1",
        params![
            run_id,
            Utc::now().to_rfc3339(),
            status,
            calls_seen as i64,
            calls_synced as i64,
            calls_failed as i64,
            error_message,
        ],
    )?;
    Ok(())
}

/// Most recent finished, non-dry-run sync pass.
pub fn last_sync_run(conn: &Connection) -> Result<Option<SyncRunRecord>, rusqlite::Error> {
    conn.query_row(
        "SELECT run_id, started_at, finished_at, status,
                calls_seen, calls_synced, calls_failed, error_message
         FROM sync_runs
         WHERE finished_at IS NOT NULL AND dry_run = 0
         ORDER BY run_id DESC LIMIT 1",
        [],
        |row| {
            Ok(SyncRunRecord {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                finished_at: row.get(2)?,
                status: row.get(3)?,
                calls_seen: row.get::<_, i64>(4)? as u64,
                calls_synced: row.get::<_, i64>(5)? as u64,
                calls_failed: row.get::<_, i64>(6)? as u64,
                error_message: row.get(7)?,
            })
        },
    )
    .optional()
}
