//! Remote calendar providers.

pub mod google;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::mapper::EventDraft;

pub use google::GoogleCalendar;

/// Identity of a remote calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarRef {
    pub id: String,
    pub name: String,
}

/// Failures reported by a calendar provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("rate limited by calendar provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected provider response: {0}")]
    Unexpected(String),
}

impl ProviderError {
    /// Worth retrying after a pause.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// The calendar or the credentials are gone; nothing else in the batch
    /// can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Unauthorized(_))
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Remote calendar service the sync engine writes to.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Find the calendar named `name`, creating it when missing.
    async fn resolve_calendar(&self, name: &str) -> ProviderResult<CalendarRef>;

    /// Create an event and return its remote id.
    async fn create_event(&self, calendar_id: &str, draft: &EventDraft) -> ProviderResult<String>;

    /// Delete an event. Returns `false` when it was already gone.
    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> ProviderResult<bool>;

    async fn calendar_exists(&self, calendar_id: &str) -> ProviderResult<bool>;
}
