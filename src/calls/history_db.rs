use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OpenFlags};

use super::{CallRecord, CallSource};
use crate::date_util::{apple_timestamp_to_datetime, datetime_to_apple_timestamp};
use crate::error::{Error, Result};

/// Location of the system call-history database, relative to home.
const DEFAULT_CALL_DB: &str = "Library/Application Support/CallHistoryDB/CallHistory.storedata";

/// Calls younger than this are skipped so in-progress calls are not synced.
pub const DEFAULT_MIN_AGE_SECONDS: i64 = 120;

/// Outgoing rows never set `ZANSWERED`; a connected outgoing call is
/// recognized by lasting longer than this.
const OUTGOING_CONNECTED_SECONDS: f64 = 5.0;

const FULL_DISK_ACCESS_HINT: &str =
    "cannot read call history. Full Disk Access permission is required";

/// Read-only reader of the macOS `CallHistory.storedata` SQLite database.
#[derive(Debug, Clone)]
pub struct CallHistoryDb {
    path: PathBuf,
    min_age_seconds: i64,
}

impl CallHistoryDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            min_age_seconds: DEFAULT_MIN_AGE_SECONDS,
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?;
        Ok(home.join(DEFAULT_CALL_DB))
    }

    pub fn with_min_age(mut self, seconds: i64) -> Self {
        self.min_age_seconds = seconds.max(0);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Whether the database can actually be queried. Fails without Full Disk
    /// Access even when the file exists.
    pub async fn is_readable(&self) -> bool {
        if !self.exists() {
            return false;
        }
        match self.open().await {
            Ok(conn) => conn
                .call(|conn| {
                    conn.query_row("SELECT 1 FROM ZCALLRECORD LIMIT 1", [], |_| Ok(()))
                        .or_else(|e| match e {
                            rusqlite::Error::QueryReturnedNoRows => Ok(()),
                            other => Err(other),
                        })
                })
                .await
                .is_ok(),
            Err(_) => false,
        }
    }

    pub async fn total_call_count(&self) -> Result<u64> {
        let conn = self.open().await?;
        let count: i64 = conn
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM ZCALLRECORD", [], |row| row.get(0)))
            .await
            .map_err(|e| classify_error(e.to_string()))?;
        Ok(count as u64)
    }

    async fn open(&self) -> Result<tokio_rusqlite::Connection> {
        if !self.exists() {
            return Err(Error::CallHistory(format!(
                "call history database not found: {}",
                self.path.display()
            )));
        }
        tokio_rusqlite::Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .await
        .map_err(|e| classify_error(e.to_string()))
    }
}

/// SQLite reports a TCC denial as a generic "unable to open" failure.
fn classify_error(message: String) -> Error {
    if message.to_lowercase().contains("unable to open") {
        Error::PermissionDenied(FULL_DISK_ACCESS_HINT.to_string())
    } else {
        Error::CallHistory(message)
    }
}

#[async_trait]
impl CallSource for CallHistoryDb {
    async fn list_calls(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<CallRecord>> {
        let cutoff = Utc::now() - Duration::seconds(self.min_age_seconds);
        // An explicit upper bound is inclusive; the min-age cutoff is not.
        let (max_ts, until_inclusive) = match until {
            Some(u) if u < cutoff => (datetime_to_apple_timestamp(u), true),
            _ => (datetime_to_apple_timestamp(cutoff), false),
        };
        let min_ts = since.map(datetime_to_apple_timestamp);

        let conn = self.open().await?;
        let rows = conn
            .call(move |conn| {
                // GROUP BY collapses duplicate rows for one physical call.
                let mut stmt = conn.prepare(
                    "SELECT ZUNIQUE_ID, ZADDRESS, ZNAME, ZDATE, ZDURATION, ZANSWERED, ZORIGINATED
                     FROM ZCALLRECORD
                     WHERE (ZDATE < ?1 OR (?3 AND ZDATE = ?1))
                       AND (?2 IS NULL OR ZDATE >= ?2)
                     GROUP BY ZUNIQUE_ID
                     ORDER BY ZDATE ASC",
                )?;
                let rows = stmt.query_map(params![max_ts, min_ts, until_inclusive], |row| {
                    Ok(RawCallRow {
                        unique_id: row.get(0)?,
                        address: row.get(1)?,
                        name: row.get(2)?,
                        date: row.get(3)?,
                        duration: row.get(4)?,
                        answered: row.get(5)?,
                        originated: row.get(6)?,
                    })
                })?;
                rows.collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            })
            .await
            .map_err(|e| classify_error(e.to_string()))?;

        let mut calls = Vec::with_capacity(rows.len());
        for raw in rows {
            match raw.into_record() {
                Some(call) => calls.push(call),
                None => log::warn!("Skipping call history row with an invalid ZDATE"),
            }
        }
        log::debug!("Read {} calls from {}", calls.len(), self.path.display());
        Ok(calls)
    }
}

struct RawCallRow {
    unique_id: String,
    address: Option<String>,
    name: Option<String>,
    date: f64,
    duration: Option<f64>,
    answered: Option<i64>,
    originated: Option<i64>,
}

impl RawCallRow {
    fn into_record(self) -> Option<CallRecord> {
        let start_time = apple_timestamp_to_datetime(self.date)?;
        let duration = self.duration.unwrap_or(0.0);
        let outgoing = self.originated.unwrap_or(0) == 1;
        let answered =
            self.answered.unwrap_or(0) == 1 || (outgoing && duration > OUTGOING_CONNECTED_SECONDS);
        Some(CallRecord {
            call_id: self.unique_id,
            address: self.address.unwrap_or_default(),
            display_name: self.name.filter(|n| !n.trim().is_empty()),
            start_time,
            duration_seconds: duration as i64,
            answered,
            outgoing,
        })
    }
}
