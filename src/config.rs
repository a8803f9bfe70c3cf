//! Persistent settings kept in the `app_config` table.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::date_util::{days_ago, start_of_day_utc};
use crate::error::{Error, Result};
use crate::storage::{repository, Database};
use crate::sync::{SyncOptions, SyncWindow};

pub const DEFAULT_CALENDAR_NAME: &str = "Call Tracking";
/// Lookback of the first pass when nothing else is configured.
pub const DEFAULT_INITIAL_DAYS: u32 = 30;

pub const KEY_CALENDAR_NAME: &str = "calendar_name";
pub const KEY_ANSWERED_ONLY: &str = "answered_only";
pub const KEY_SYNC_ALL_HISTORY: &str = "sync_all_history";
pub const KEY_INITIAL_SYNC_DONE: &str = "initial_sync_done";

pub const KNOWN_KEYS: &[&str] = &[
    KEY_CALENDAR_NAME,
    KEY_ANSWERED_ONLY,
    KEY_SYNC_ALL_HISTORY,
    KEY_INITIAL_SYNC_DONE,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppConfig {
    pub calendar_name: String,
    pub answered_only: bool,
    pub sync_all_history: bool,
    pub initial_sync_done: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            calendar_name: DEFAULT_CALENDAR_NAME.to_string(),
            answered_only: true,
            sync_all_history: false,
            initial_sync_done: false,
        }
    }
}

impl AppConfig {
    pub async fn load(db: &Database) -> Result<Self> {
        let pairs = db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?;
        Self::from_pairs(pairs)
    }

    /// Build from stored key/value pairs. Unknown keys are ignored; a
    /// malformed known key is an error rather than a silent default.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                KEY_CALENDAR_NAME => config.calendar_name = value,
                KEY_ANSWERED_ONLY => config.answered_only = parse_bool(&key, &value)?,
                KEY_SYNC_ALL_HISTORY => config.sync_all_history = parse_bool(&key, &value)?,
                KEY_INITIAL_SYNC_DONE => config.initial_sync_done = parse_bool(&key, &value)?,
                _ => log::debug!("Ignoring unknown config key {key}"),
            }
        }
        Ok(config)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            calendar_name: self.calendar_name.clone(),
            answered_only: self.answered_only,
            ..Default::default()
        }
    }

    /// Window for a pass. `--since` beats `--days`; without either, the
    /// first pass covers the last [`DEFAULT_INITIAL_DAYS`] and later passes
    /// (or `sync_all_history`) cover everything.
    pub fn default_window(
        &self,
        since: Option<NaiveDate>,
        days: Option<u32>,
        now: DateTime<Utc>,
    ) -> SyncWindow {
        if let Some(date) = since {
            return SyncWindow::since(start_of_day_utc(date));
        }
        if let Some(days) = days {
            return SyncWindow::since(days_ago(now, days));
        }
        if self.sync_all_history || self.initial_sync_done {
            return SyncWindow::all_time();
        }
        SyncWindow::since(days_ago(now, DEFAULT_INITIAL_DAYS))
    }
}

/// Check a `config set` value and return its stored form.
pub fn validate(key: &str, value: &str) -> Result<String> {
    match key {
        KEY_CALENDAR_NAME => {
            let name = value.trim();
            if name.is_empty() {
                return Err(Error::Config("calendar_name cannot be empty".into()));
            }
            Ok(name.to_string())
        }
        KEY_ANSWERED_ONLY | KEY_SYNC_ALL_HISTORY | KEY_INITIAL_SYNC_DONE => {
            Ok(parse_bool(key, value)?.to_string())
        }
        _ => Err(Error::Config(format!(
            "unknown config key '{key}' (known: {})",
            KNOWN_KEYS.join(", ")
        ))),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{key} must be true or false, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_defaults_and_overrides() {
        assert_eq!(AppConfig::from_pairs(vec![]).unwrap(), AppConfig::default());

        let config = AppConfig::from_pairs(vec![
            ("calendar_name".into(), "Phone".into()),
            ("answered_only".into(), "false".into()),
            ("something_else".into(), "x".into()),
        ])
        .unwrap();
        assert_eq!(config.calendar_name, "Phone");
        assert!(!config.answered_only);

        let options = config.sync_options();
        assert_eq!(options.calendar_name, "Phone");
        assert!(!options.answered_only);
        assert!(!options.dry_run);
    }

    #[test]
    fn test_malformed_bool_is_error() {
        let err = AppConfig::from_pairs(vec![("sync_all_history".into(), "maybe".into())]);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_window_resolution() {
        let mut config = AppConfig::default();
        let first = config.default_window(None, None, now());
        assert_eq!(first.since, Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        assert_eq!(first.until, None);

        let days = config.default_window(None, Some(7), now());
        assert_eq!(days.since, Some(Utc.with_ymd_and_hms(2024, 3, 24, 12, 0, 0).unwrap()));

        let date = NaiveDate::from_ymd_opt(2024, 2, 10).unwrap();
        let since = config.default_window(Some(date), Some(7), now());
        assert_eq!(since.since, Some(Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap()));

        config.initial_sync_done = true;
        assert_eq!(config.default_window(None, None, now()), SyncWindow::all_time());

        config.initial_sync_done = false;
        config.sync_all_history = true;
        assert_eq!(config.default_window(None, None, now()), SyncWindow::all_time());
    }

    #[test]
    fn test_validate() {
        assert_eq!(validate("answered_only", "No").unwrap(), "false");
        assert_eq!(validate("calendar_name", "  Calls ").unwrap(), "Calls");
        assert!(validate("calendar_name", " ").is_err());
        assert!(validate("answered_only", "sometimes").is_err());
        assert!(matches!(validate("workspace", "1"), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_load_from_database() {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| repository::set_config(conn, KEY_SYNC_ALL_HISTORY, "true"))
            .await
            .unwrap();

        let config = AppConfig::load(&db).await.unwrap();
        assert!(config.sync_all_history);
        assert_eq!(config.calendar_name, DEFAULT_CALENDAR_NAME);
    }
}
