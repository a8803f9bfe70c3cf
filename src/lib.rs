pub mod calendar;
pub mod calls;
pub mod config;
pub mod contacts;
pub mod date_util;
pub mod error;
pub mod lock;
pub mod mapper;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use calendar::{CalendarProvider, CalendarRef, GoogleCalendar, ProviderError};
pub use calls::{CallHistoryDb, CallRecord, CallSource};
pub use config::AppConfig;
pub use contacts::{AddressBook, ContactResolver};
pub use error::{Error, Result};
pub use lock::RunLock;
pub use mapper::{map_call, EventDraft};
pub use storage::{Database, SyncState, SyncStatusInfo};
pub use sync::{
    CallFailure, FailureKind, NoopProgress, RetryPolicy, SyncOptions, SyncProgress, SyncStatus,
    SyncSummary, SyncWindow,
};

use storage::repository;
use sync::rate_limit::retry_provider;
use sync::Syncer;

/// Main entry point: syncs a call source into a calendar provider and
/// manages the local state that makes repeated passes idempotent.
///
/// A facade built with [`CallCal::local`] has no provider. It can read
/// status, manage config and reset markers, but cannot sync or unsync.
pub struct CallCal {
    state: SyncState,
    remote: Option<Remote>,
}

struct Remote {
    calendar: Arc<dyn CalendarProvider>,
    syncer: Syncer,
}

impl CallCal {
    pub fn new(
        db: Database,
        source: Arc<dyn CallSource>,
        calendar: Arc<dyn CalendarProvider>,
    ) -> Self {
        let state = SyncState::new(db);
        let syncer = Syncer::new(state.clone(), source, calendar.clone());
        Self {
            state,
            remote: Some(Remote { calendar, syncer }),
        }
    }

    /// Facade over the local state only.
    pub fn local(db: Database) -> Self {
        Self {
            state: SyncState::new(db),
            remote: None,
        }
    }

    /// Name unnamed calls through `contacts`.
    pub fn with_contacts(mut self, contacts: Arc<dyn ContactResolver>) -> Self {
        self.remote = self.remote.map(|r| Remote {
            calendar: r.calendar,
            syncer: r.syncer.with_contacts(contacts),
        });
        self
    }

    fn remote(&self) -> Result<&Remote> {
        self.remote
            .as_ref()
            .ok_or_else(|| Error::Config("no calendar provider configured".into()))
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        self.state.db()
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub async fn app_config(&self) -> Result<AppConfig> {
        AppConfig::load(self.db()).await
    }

    /// Run one pass. After the first non-dry pass that was not aborted,
    /// later default windows cover all history.
    pub async fn run_sync(
        &self,
        window: SyncWindow,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<SyncSummary> {
        let summary = self.remote()?.syncer.run(window, options, progress).await?;
        if !summary.dry_run && summary.aborted.is_none() {
            self.config_set(config::KEY_INITIAL_SYNC_DONE, "true").await?;
        }
        Ok(summary)
    }

    pub async fn get_sync_status(&self) -> Result<SyncStatusInfo> {
        self.state.status().await
    }

    /// Delete the event created for `call_id` and forget the marker so the
    /// next pass re-creates it. Returns `false` when the call was never
    /// synced. When the bound calendar no longer exists there is nothing to
    /// delete and only the marker goes.
    pub async fn unsync(&self, call_id: &str) -> Result<bool> {
        let remote = self.remote()?;
        let Some(record) = self.state.get_synced_call(call_id).await? else {
            return Ok(false);
        };
        if let Some(binding) = self.state.get_binding().await? {
            let policy = RetryPolicy::default();
            let exists = retry_provider!(
                &policy,
                remote.calendar.calendar_exists(&binding.calendar_id)
            )?;
            if !exists {
                log::info!(
                    "Calendar {} is gone; forgetting call {call_id} only",
                    binding.calendar_id
                );
            } else {
                let deleted = retry_provider!(
                    &policy,
                    remote
                        .calendar
                        .delete_event(&binding.calendar_id, &record.remote_event_id)
                )?;
                if !deleted {
                    log::info!(
                        "Event {} for call {call_id} was already gone",
                        record.remote_event_id
                    );
                }
            }
        }
        self.state.remove_synced_call(call_id).await
    }

    /// Forget every marker. Events already in the calendar are left alone
    /// and will be created again on the next pass.
    pub async fn reset(&self) -> Result<u64> {
        let cleared = self.state.clear_synced_calls().await?;
        log::info!("Cleared {cleared} synced-call markers");
        Ok(cleared)
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db()
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Validate and store a setting.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let value = config::validate(key, value)?;
        self.db()
            .writer()
            .call({
                let key = key.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db()
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
