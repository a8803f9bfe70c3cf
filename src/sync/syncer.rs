use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;

use crate::calendar::{CalendarProvider, CalendarRef};
use crate::calls::{CallRecord, CallSource};
use crate::contacts::ContactResolver;
use crate::error::Result;
use crate::mapper::map_call;
use crate::storage::repository;
use crate::storage::SyncState;
use crate::sync::rate_limit::retry_provider;
use crate::sync::{FailureKind, SyncOptions, SyncProgress, SyncSummary, SyncWindow};

/// Runs sync passes: call history in, calendar events out.
///
/// Collaborators are injected so tests can swap in fakes. A pass is
/// sequential; the caller is responsible for not running two at once
/// (see [`crate::lock::RunLock`]).
pub struct Syncer {
    state: SyncState,
    source: Arc<dyn CallSource>,
    calendar: Arc<dyn CalendarProvider>,
    contacts: Option<Arc<dyn ContactResolver>>,
}

impl Syncer {
    pub fn new(
        state: SyncState,
        source: Arc<dyn CallSource>,
        calendar: Arc<dyn CalendarProvider>,
    ) -> Self {
        Self {
            state,
            source,
            calendar,
            contacts: None,
        }
    }

    pub fn with_contacts(mut self, contacts: Arc<dyn ContactResolver>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    /// Run one pass over `window` and record it in the `sync_runs` log.
    ///
    /// Per-call failures are reported in the summary. An `Err` means the
    /// pass itself failed: the calendar could not be resolved, the call
    /// history could not be read, or the state store failed.
    pub async fn run(
        &self,
        window: SyncWindow,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<SyncSummary> {
        let range_start = window.since.map(|d| d.to_rfc3339());
        let range_end = window.until.map(|d| d.to_rfc3339());
        let dry_run = options.dry_run;
        let run_id = self
            .state
            .db()
            .writer()
            .call(move |conn| {
                repository::insert_sync_run(
                    conn,
                    range_start.as_deref(),
                    range_end.as_deref(),
                    dry_run,
                )
            })
            .await?;

        let result = self.sync_pass(window, options, progress).await;

        let (status, seen, synced, failed, message) = match &result {
            Ok(s) => (
                s.status().as_str(),
                s.calls_seen,
                s.calls_synced,
                s.calls_failed,
                s.aborted.clone(),
            ),
            Err(e) => ("failed", 0, 0, 0, Some(e.to_string())),
        };
        let recorded = self
            .state
            .db()
            .writer()
            .call(move |conn| {
                repository::finish_sync_run(
                    conn,
                    run_id,
                    status,
                    seen,
                    synced,
                    failed,
                    message.as_deref(),
                )
            })
            .await;

        match (result, recorded) {
            (Ok(summary), Ok(())) => {
                log::info!("{summary}");
                progress.on_complete(&summary);
                Ok(summary)
            }
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), recorded) => {
                if let Err(re) = recorded {
                    log::warn!("Failed to record sync run {run_id}: {re}");
                }
                Err(e)
            }
        }
    }

    async fn sync_pass(
        &self,
        window: SyncWindow,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<SyncSummary> {
        let mut summary = SyncSummary::new(Utc::now(), options.dry_run);

        let calendar = retry_provider!(
            &options.retry,
            self.calendar.resolve_calendar(&options.calendar_name)
        )?;
        let reset = self.bind_calendar(&calendar, options.dry_run).await?;
        progress.on_calendar_resolved(&calendar, reset);
        summary.calendar = Some(calendar.clone());
        summary.calendar_reset = reset;

        // A dry run does not clear markers, so after drift it has to ignore
        // them instead.
        let ignore_markers = reset && options.dry_run;

        let calls = self.source.list_calls(window.since, window.until).await?;
        summary.calls_seen = calls.len() as u64;

        let synced_ids = if ignore_markers {
            HashSet::new()
        } else {
            self.state.synced_call_ids().await?
        };
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut pending: Vec<CallRecord> = Vec::new();
        for call in calls {
            if !seen_ids.insert(call.call_id.clone()) {
                summary.calls_skipped_duplicate += 1;
                continue;
            }
            if synced_ids.contains(&call.call_id) {
                summary.calls_skipped_already_synced += 1;
                continue;
            }
            if options.answered_only && !call.answered {
                summary.calls_skipped_unanswered += 1;
                continue;
            }
            pending.push(call);
        }
        pending.sort_by_key(|c| c.start_time);

        log::info!(
            "{} calls in window, {} to sync into \"{}\"",
            summary.calls_seen,
            pending.len(),
            calendar.name
        );
        progress.on_calls_fetched(summary.calls_seen as usize, pending.len());

        let names = self.lookup_contacts(&pending).await;

        let total = pending.len();
        for (i, call) in pending.iter().enumerate() {
            progress.on_call_progress(i + 1, total);

            let contact = names.get(&call.address).map(String::as_str);
            let draft = match map_call(call, contact) {
                Ok(draft) => draft,
                Err(e) => {
                    log::warn!("Skipping call {}: {e}", call.call_id);
                    summary.record_failure(&call.call_id, FailureKind::Validation, e.to_string());
                    continue;
                }
            };

            if options.dry_run {
                log::info!(
                    "[dry run] Would create \"{}\" at {}",
                    draft.title,
                    draft.start_time
                );
                summary.calls_synced += 1;
                continue;
            }

            match retry_provider!(
                &options.retry,
                self.calendar.create_event(&calendar.id, &draft)
            ) {
                Ok(event_id) => {
                    if let Err(e) = self.state.mark_synced(&call.call_id, &event_id).await {
                        log::error!(
                            "Created event {event_id} for call {} but could not record it: {e}",
                            call.call_id
                        );
                        return Err(e);
                    }
                    log::debug!("Synced call {} as event {event_id}", call.call_id);
                    summary.calls_synced += 1;
                }
                Err(e) if e.is_fatal() => {
                    log::error!("Aborting sync at call {}: {e}", call.call_id);
                    summary.record_failure(&call.call_id, FailureKind::Fatal, e.to_string());
                    summary.calls_not_attempted = (total - i - 1) as u64;
                    summary.aborted = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    let kind = if e.is_retryable() {
                        FailureKind::RetriesExhausted
                    } else {
                        FailureKind::Unexpected
                    };
                    log::warn!("Failed to create event for call {}: {e}", call.call_id);
                    summary.record_failure(&call.call_id, kind, e.to_string());
                }
            }
        }

        summary.finished_at = Utc::now();
        Ok(summary)
    }

    /// Bind the state store to `calendar`. Returns `true` when a different
    /// calendar was bound before, which drops every marker.
    async fn bind_calendar(&self, calendar: &CalendarRef, dry_run: bool) -> Result<bool> {
        let previous = self.state.get_binding().await?;
        let reset = previous
            .as_ref()
            .is_some_and(|b| b.calendar_id != calendar.id);
        let changed = previous.as_ref().map_or(true, |b| {
            b.calendar_id != calendar.id || b.calendar_name != calendar.name
        });

        if reset {
            log::warn!(
                "Calendar \"{}\" changed identity ({} -> {}); previously synced calls will be re-created",
                calendar.name,
                previous.as_ref().map_or("", |b| b.calendar_id.as_str()),
                calendar.id
            );
        }
        if changed && !dry_run {
            self.state.set_binding(&calendar.id, &calendar.name).await?;
        }
        Ok(reset)
    }

    /// Names for calls the call history left unnamed. Lookup failures only
    /// cost the names.
    async fn lookup_contacts(&self, calls: &[CallRecord]) -> HashMap<String, String> {
        let Some(contacts) = &self.contacts else {
            return HashMap::new();
        };

        let mut numbers: Vec<String> = calls
            .iter()
            .filter(|c| c.display_name.as_deref().map_or(true, |n| n.trim().is_empty()))
            .filter(|c| !c.address.is_empty())
            .map(|c| c.address.clone())
            .collect();
        numbers.sort();
        numbers.dedup();
        if numbers.is_empty() {
            return HashMap::new();
        }

        match contacts.resolve(&numbers).await {
            Ok(names) => {
                log::debug!("Resolved {} of {} numbers to contacts", names.len(), numbers.len());
                names
            }
            Err(e) => {
                log::warn!("Contact lookup failed, continuing without names: {e}");
                HashMap::new()
            }
        }
    }
}
