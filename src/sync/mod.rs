pub mod rate_limit;
pub mod syncer;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::calendar::CalendarRef;
use crate::config::DEFAULT_CALENDAR_NAME;

pub use rate_limit::RetryPolicy;
pub use syncer::Syncer;

/// The `[since, until]` range of call start times considered by a pass.
/// `None` leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl SyncWindow {
    pub fn all_time() -> Self {
        Self::default()
    }

    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            until: None,
        }
    }
}

/// Options controlling a sync pass.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Name of the target calendar (found or created).
    pub calendar_name: String,
    /// Only answered calls produce events.
    pub answered_only: bool,
    /// Resolve, filter and map, but create nothing and record nothing.
    pub dry_run: bool,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            calendar_name: DEFAULT_CALENDAR_NAME.to_string(),
            answered_only: true,
            dry_run: false,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::PartialFailure => "partial_failure",
            SyncStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The call record itself was malformed.
    Validation,
    /// Rate limits or transient errors outlasted the retry budget.
    RetriesExhausted,
    /// The calendar or the credentials went away; the batch was aborted.
    Fatal,
    /// The provider rejected the request for a reason outside the taxonomy.
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallFailure {
    pub call_id: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one sync pass. This is the single source of truth for partial
/// success: per-call errors land in `failures`, never in logs alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSummary {
    pub calls_seen: u64,
    pub calls_synced: u64,
    pub calls_skipped_duplicate: u64,
    pub calls_skipped_already_synced: u64,
    pub calls_skipped_unanswered: u64,
    pub calls_failed: u64,
    /// Calls left untouched because the batch was aborted.
    pub calls_not_attempted: u64,
    pub calendar: Option<CalendarRef>,
    /// The calendar identity changed and prior sync history was dropped.
    pub calendar_reset: bool,
    pub dry_run: bool,
    pub aborted: Option<String>,
    pub failures: Vec<CallFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncSummary {
    pub fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            calls_seen: 0,
            calls_synced: 0,
            calls_skipped_duplicate: 0,
            calls_skipped_already_synced: 0,
            calls_skipped_unanswered: 0,
            calls_failed: 0,
            calls_not_attempted: 0,
            calendar: None,
            calendar_reset: false,
            dry_run,
            aborted: None,
            failures: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    pub fn status(&self) -> SyncStatus {
        if self.calls_failed == 0 && self.aborted.is_none() {
            SyncStatus::Success
        } else if self.calls_synced > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Failed
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == SyncStatus::Success
    }

    pub(crate) fn record_failure(&mut self, call_id: &str, kind: FailureKind, message: String) {
        self.calls_failed += 1;
        self.failures.push(CallFailure {
            call_id: call_id.to_string(),
            kind,
            message,
        });
    }

    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

impl std::fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sync {}: {} synced, {} failed, {} skipped ({} duplicate, {} already synced, {} unanswered) in {:.1}s",
            self.status().as_str(),
            self.calls_synced,
            self.calls_failed,
            self.calls_skipped_duplicate
                + self.calls_skipped_already_synced
                + self.calls_skipped_unanswered,
            self.calls_skipped_duplicate,
            self.calls_skipped_already_synced,
            self.calls_skipped_unanswered,
            self.duration_seconds()
        )
    }
}

/// Progress callbacks for long sync passes.
pub trait SyncProgress: Send + Sync {
    fn on_calendar_resolved(&self, _calendar: &CalendarRef, _reset: bool) {}
    fn on_calls_fetched(&self, _fetched: usize, _to_sync: usize) {}
    fn on_call_progress(&self, _current: usize, _total: usize) {}
    fn on_complete(&self, _summary: &SyncSummary) {}
}

/// Progress reporter that ignores every event.
pub struct NoopProgress;

impl SyncProgress for NoopProgress {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn summary() -> SyncSummary {
        SyncSummary::new(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(), false)
    }

    #[test]
    fn test_status_from_counts() {
        let mut s = summary();
        assert_eq!(s.status(), SyncStatus::Success);

        s.record_failure("a", FailureKind::RetriesExhausted, "503".into());
        assert_eq!(s.status(), SyncStatus::Failed);

        s.calls_synced = 2;
        assert_eq!(s.status(), SyncStatus::PartialFailure);
        assert_eq!(s.failures[0].call_id, "a");
    }

    #[test]
    fn test_abort_without_failures_is_not_success() {
        let mut s = summary();
        s.aborted = Some("calendar vanished".into());
        assert_eq!(s.status(), SyncStatus::Failed);
    }

    #[test]
    fn test_display() {
        let mut s = summary();
        s.calls_synced = 1;
        s.calls_skipped_duplicate = 1;
        s.calls_skipped_unanswered = 1;
        s.finished_at = s.started_at + chrono::Duration::milliseconds(2500);
        assert_eq!(
            s.to_string(),
            "Sync success: 1 synced, 0 failed, 2 skipped (1 duplicate, 0 already synced, 1 unanswered) in 2.5s"
        );
    }
}
