//! Call records and the sources that produce them.

pub mod history_db;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

pub use history_db::CallHistoryDb;

/// One physical phone call as reported by the call-history store.
///
/// `call_id` identifies the physical call but is not unique at the storage
/// layer: the same call can come back as several rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub call_id: String,
    pub address: String,
    pub display_name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub answered: bool,
    pub outgoing: bool,
}

impl CallRecord {
    pub fn direction(&self) -> &'static str {
        if self.outgoing {
            "Outgoing"
        } else {
            "Incoming"
        }
    }
}

/// Read-only provider of call records.
#[async_trait]
pub trait CallSource: Send + Sync {
    /// Calls whose start time falls in `[since, until]`. `None` leaves that
    /// side of the window open. Results may be in any order and may contain
    /// repeated `call_id`s.
    async fn list_calls(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<CallRecord>>;
}
