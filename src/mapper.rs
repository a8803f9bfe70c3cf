//! Call record to calendar event mapping.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::calls::CallRecord;
use crate::date_util::format_duration;
use crate::error::{Error, Result};

/// Provider-agnostic description of the event to create for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventDraft {
    /// The call this event represents; providers may tag the event with it.
    pub call_id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub description: String,
}

/// Build the event for `call`. `contact_name` takes precedence over the name
/// stored with the call; the raw address is the last resort.
pub fn map_call(call: &CallRecord, contact_name: Option<&str>) -> Result<EventDraft> {
    if call.duration_seconds < 0 {
        return Err(Error::Validation(format!(
            "call {} has negative duration {}",
            call.call_id, call.duration_seconds
        )));
    }

    let end_time = Duration::try_seconds(call.duration_seconds)
        .and_then(|d| call.start_time.checked_add_signed(d))
        .ok_or_else(|| {
            Error::Validation(format!(
                "call {} has out-of-range duration {}",
                call.call_id, call.duration_seconds
            ))
        })?;

    let name = contact_name
        .or(call.display_name.as_deref())
        .filter(|n| !n.trim().is_empty())
        .or_else(|| Some(call.address.as_str()).filter(|a| !a.is_empty()))
        .unwrap_or("Unknown");

    let mut lines = vec![
        format!("Direction: {}", call.direction()),
        format!("Duration: {}", format_duration(call.duration_seconds)),
        format!("Answered: {}", if call.answered { "Yes" } else { "No" }),
    ];
    if !call.address.is_empty() {
        lines.push(format!("Number: {}", call.address));
    }

    Ok(EventDraft {
        call_id: call.call_id.clone(),
        title: format!("Call with {name}"),
        start_time: call.start_time,
        end_time,
        description: lines.join("\n"),
    })
}
