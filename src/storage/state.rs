//! The sync state store: calendar binding plus synced-call markers.
//!
//! All access to `calendar_binding` and `synced_calls` goes through
//! [`SyncState`]; the orchestrator never touches the tables directly.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::storage::repository::{self, CalendarBinding, SyncRunRecord, SyncedCallRecord};
use crate::storage::Database;

/// Snapshot of the store for `status` reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusInfo {
    pub last_run_time: Option<DateTime<Utc>>,
    pub last_run: Option<SyncRunRecord>,
    pub synced_count: u64,
    pub bound_calendar_name: Option<String>,
    pub bound_calendar_id: Option<String>,
}

#[derive(Clone)]
pub struct SyncState {
    db: Database,
}

impl SyncState {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub async fn get_binding(&self) -> Result<Option<CalendarBinding>> {
        Ok(self.db.reader().call(|conn| repository::get_binding(conn)).await?)
    }

    /// Replace the binding; returns `true` when the markers were reset.
    pub async fn set_binding(&self, calendar_id: &str, calendar_name: &str) -> Result<bool> {
        let calendar_id = calendar_id.to_string();
        let calendar_name = calendar_name.to_string();
        Ok(self
            .db
            .writer()
            .call(move |conn| repository::set_binding(conn, &calendar_id, &calendar_name))
            .await?)
    }

    pub async fn is_synced(&self, call_id: &str) -> Result<bool> {
        let call_id = call_id.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::is_synced(conn, &call_id))
            .await?)
    }

    /// Idempotent: returns `false` if the call was already marked.
    pub async fn mark_synced(&self, call_id: &str, remote_event_id: &str) -> Result<bool> {
        let call_id = call_id.to_string();
        let remote_event_id = remote_event_id.to_string();
        Ok(self
            .db
            .writer()
            .call(move |conn| repository::mark_synced(conn, &call_id, &remote_event_id))
            .await?)
    }

    pub async fn synced_count(&self) -> Result<u64> {
        Ok(self.db.reader().call(|conn| repository::synced_count(conn)).await?)
    }

    pub async fn synced_call_ids(&self) -> Result<HashSet<String>> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::synced_call_ids(conn))
            .await?)
    }

    pub async fn get_synced_call(&self, call_id: &str) -> Result<Option<SyncedCallRecord>> {
        let call_id = call_id.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::get_synced_call(conn, &call_id))
            .await?)
    }

    pub async fn remove_synced_call(&self, call_id: &str) -> Result<bool> {
        let call_id = call_id.to_string();
        Ok(self
            .db
            .writer()
            .call(move |conn| repository::remove_synced_call(conn, &call_id))
            .await?)
    }

    pub async fn status(&self) -> Result<SyncStatusInfo> {
        Ok(self
            .db
            .reader()
            .call(|conn| {
                let binding = repository::get_binding(conn)?;
                let synced_count = repository::synced_count(conn)?;
                let last_run = repository::last_sync_run(conn)?;
                Ok::<_, rusqlite::Error>(SyncStatusInfo {
                    last_run_time: last_run.as_ref().and_then(|r| {
                        DateTime::parse_from_rfc3339(&r.started_at)
                            .ok()
                            .map(|dt| dt.with_timezone(&Utc))
                    }),
                    last_run,
                    synced_count,
                    bound_calendar_name: binding.as_ref().map(|b| b.calendar_name.clone()),
                    bound_calendar_id: binding.map(|b| b.calendar_id),
                })
            })
            .await?)
    }

    pub async fn clear_synced_calls(&self) -> Result<u64> {
        Ok(self
            .db
            .writer()
            .call(|conn| repository::clear_synced_calls(conn))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drift_reset_through_store() {
        let state = SyncState::new(Database::open_memory().await.unwrap());

        assert!(state.set_binding("cal-a", "Call Tracking").await.unwrap());
        for i in 0..5 {
            state
                .mark_synced(&format!("call-{i}"), &format!("evt-{i}"))
                .await
                .unwrap();
        }
        assert_eq!(state.synced_count().await.unwrap(), 5);
        assert!(!state.set_binding("cal-a", "Call Tracking").await.unwrap());
        assert_eq!(state.synced_count().await.unwrap(), 5);

        assert!(state.set_binding("cal-b", "Call Tracking").await.unwrap());
        assert_eq!(state.synced_count().await.unwrap(), 0);
        assert!(!state.is_synced("call-0").await.unwrap());
        assert_eq!(
            state.get_binding().await.unwrap().unwrap().calendar_id,
            "cal-b"
        );
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let state = SyncState::new(Database::open_memory().await.unwrap());

        let empty = state.status().await.unwrap();
        assert_eq!(empty.synced_count, 0);
        assert!(empty.last_run_time.is_none());
        assert!(empty.bound_calendar_id.is_none());

        state.set_binding("cal-a", "Call Tracking").await.unwrap();
        state.mark_synced("a", "evt-1").await.unwrap();
        state
            .db()
            .writer()
            .call(|conn| {
                let id = repository::insert_sync_run(conn, None, None, false)?;
                repository::finish_sync_run(conn, id, "success", 1, 1, 0, None)
            })
            .await
            .unwrap();

        let info = state.status().await.unwrap();
        assert_eq!(info.synced_count, 1);
        assert_eq!(info.bound_calendar_id.as_deref(), Some("cal-a"));
        assert_eq!(info.bound_calendar_name.as_deref(), Some("Call Tracking"));
        assert!(info.last_run_time.is_some());
        assert_eq!(info.last_run.unwrap().status, "success");
    }

    #[tokio::test]
    async fn test_mark_synced_twice_is_noop() {
        let state = SyncState::new(Database::open_memory().await.unwrap());

        assert!(state.mark_synced("a", "evt-1").await.unwrap());
        assert!(!state.mark_synced("a", "evt-2").await.unwrap());
        assert_eq!(state.synced_count().await.unwrap(), 1);
        assert_eq!(
            state.get_synced_call("a").await.unwrap().unwrap().remote_event_id,
            "evt-1"
        );
    }
}
