//! Google Calendar v3 REST client.
//!
//! Only the calls the sync engine needs: list and create calendars, insert
//! and delete events, and fetch a calendar to check it still exists. The
//! OAuth access token is supplied by the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::{CalendarProvider, CalendarRef, ProviderError, ProviderResult};
use crate::error::{Error, Result};
use crate::mapper::EventDraft;

pub const DEFAULT_API_URL: &str = "https://www.googleapis.com/calendar/v3";
pub const TOKEN_ENV: &str = "CALLCAL_GOOGLE_TOKEN";
pub const API_URL_ENV: &str = "CALLCAL_GOOGLE_API_URL";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CALENDAR_DESCRIPTION: &str = "Automatically synced call history from macOS";

pub struct GoogleCalendar {
    http: Client,
    base_url: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListPage {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarListEntry {
    id: String,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct CreatedResource {
    id: String,
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Unexpected(e.to_string())
        } else {
            // Connect failures, timeouts and dropped bodies are worth a retry.
            ProviderError::Transient(e.to_string())
        }
    }
}

impl GoogleCalendar {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: Url::parse(DEFAULT_API_URL)?,
            token: token.into(),
        })
    }

    /// Point the client at another API root (used by tests and proxies).
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = Url::parse(base_url)?;
        Ok(self)
    }

    /// Build a client from `CALLCAL_GOOGLE_TOKEN` and, when set,
    /// `CALLCAL_GOOGLE_API_URL`.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "no Google access token. Set {TOKEN_ENV} to an OAuth token with calendar scope"
                ))
            })?;
        let client = Self::new(token)?;
        match std::env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => client.with_base_url(url.trim()),
            _ => Ok(client),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> ProviderResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Unexpected(format!("invalid API URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> ProviderResult<Response> {
        let response = request.bearer_auth(&self.token).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }

    async fn list_calendars(&self) -> ProviderResult<Vec<CalendarListEntry>> {
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.endpoint(&["users", "me", "calendarList"])?;
            if let Some(ref token) = page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let page: CalendarListPage = self.send(self.http.get(url)).await?.json().await?;
            calendars.extend(page.items);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(calendars)
    }

    async fn create_calendar(&self, name: &str) -> ProviderResult<CalendarRef> {
        let body = json!({
            "summary": name,
            "description": CALENDAR_DESCRIPTION,
            "timeZone": "UTC",
        });
        let url = self.endpoint(&["calendars"])?;
        let created: CreatedResource = self.send(self.http.post(url).json(&body)).await?.json().await?;
        Ok(CalendarRef {
            id: created.id,
            name: name.to_string(),
        })
    }
}

/// Map a non-2xx response onto the provider error taxonomy.
async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    classify_status(status, retry_after, body)
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: String) -> ProviderError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        body
    };
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after },
        // Google reports quota exhaustion as 403 with a rate-limit reason.
        StatusCode::FORBIDDEN if message.contains("ateLimitExceeded") => {
            ProviderError::RateLimited { retry_after }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(message),
        StatusCode::NOT_FOUND | StatusCode::GONE => ProviderError::NotFound(message),
        StatusCode::REQUEST_TIMEOUT => ProviderError::Transient(message),
        s if s.is_server_error() => ProviderError::Transient(message),
        s => ProviderError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    async fn resolve_calendar(&self, name: &str) -> ProviderResult<CalendarRef> {
        let calendars = self.list_calendars().await?;
        if let Some(found) = calendars.into_iter().find(|c| c.summary == name) {
            log::info!("Found existing calendar: {name}");
            return Ok(CalendarRef {
                id: found.id,
                name: found.summary,
            });
        }
        let created = self.create_calendar(name).await?;
        log::info!("Created new calendar: {name}");
        Ok(created)
    }

    async fn create_event(&self, calendar_id: &str, draft: &EventDraft) -> ProviderResult<String> {
        let body = json!({
            "summary": draft.title,
            "description": draft.description,
            "start": {
                "dateTime": draft.start_time.to_rfc3339(),
                "timeZone": "UTC",
            },
            "end": {
                "dateTime": draft.end_time.to_rfc3339(),
                "timeZone": "UTC",
            },
            "extendedProperties": {
                "private": {
                    "callUniqueId": draft.call_id,
                },
            },
        });
        let url = self.endpoint(&["calendars", calendar_id, "events"])?;
        let created: CreatedResource = self.send(self.http.post(url).json(&body)).await?.json().await?;
        log::debug!("Created event {} for call {}", created.id, draft.call_id);
        Ok(created.id)
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> ProviderResult<bool> {
        let url = self.endpoint(&["calendars", calendar_id, "events", event_id])?;
        match self.send(self.http.delete(url)).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn calendar_exists(&self, calendar_id: &str) -> ProviderResult<bool> {
        let url = self.endpoint(&["calendars", calendar_id])?;
        match self.send(self.http.get(url)).await {
            Ok(_) => Ok(true),
            Err(ProviderError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> GoogleCalendar {
        GoogleCalendar::new("test-token")
            .unwrap()
            .with_base_url(&server.url())
            .unwrap()
    }

    fn draft() -> EventDraft {
        EventDraft {
            call_id: "call-1".into(),
            title: "Call with Alice".into(),
            start_time: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2024, 1, 15, 10, 1, 5).unwrap(),
            description: "Direction: Incoming".into(),
        }
    }

    #[test]
    fn test_endpoint_keeps_api_prefix() {
        let cal = GoogleCalendar::new("t").unwrap();
        let url = cal.endpoint(&["calendars", "abc@group.calendar.google.com", "events"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/abc@group.calendar.google.com/events"
        );

        let hashed = cal.endpoint(&["calendars", "en.usa#holiday"]).unwrap();
        assert!(hashed.as_str().ends_with("/calendars/en.usa%23holiday"));
    }

    #[test]
    fn test_classify_status() {
        let retry = Some(Duration::from_secs(7));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, retry, String::new()),
            ProviderError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(7)
        ));
        assert!(matches!(
            classify_status(
                StatusCode::FORBIDDEN,
                None,
                r#"{"error":{"errors":[{"reason":"userRateLimitExceeded"}]}}"#.into()
            ),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, None, "insufficient scope".into()),
            ProviderError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::GONE, None, String::new()),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, None, String::new()),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, None, "bad".into()),
            ProviderError::Rejected { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn test_resolve_finds_existing_calendar() {
        let mut server = mockito::Server::new_async().await;
        let list = server
            .mock("GET", "/users/me/calendarList")
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"items":[{"id":"primary","summary":"me@example.com"},
                             {"id":"calls-1","summary":"Call Tracking"}]}"#,
            )
            .create_async()
            .await;

        let cal = client(&server).resolve_calendar("Call Tracking").await.unwrap();
        assert_eq!(
            cal,
            CalendarRef {
                id: "calls-1".into(),
                name: "Call Tracking".into()
            }
        );
        list.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_creates_missing_calendar() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/me/calendarList")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"items":[{"id":"primary","summary":"me@example.com"}]}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/calendars")
            .match_body(Matcher::PartialJson(json!({"summary": "Call Tracking"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"new-cal","summary":"Call Tracking"}"#)
            .create_async()
            .await;

        let cal = client(&server).resolve_calendar("Call Tracking").await.unwrap();
        assert_eq!(cal.id, "new-cal");
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_event_sends_call_id() {
        let mut server = mockito::Server::new_async().await;
        let insert = server
            .mock("POST", "/calendars/cal-1/events")
            .match_body(Matcher::PartialJson(json!({
                "summary": "Call with Alice",
                "start": {"dateTime": "2024-01-15T10:00:00+00:00"},
                "end": {"dateTime": "2024-01-15T10:01:05+00:00"},
                "extendedProperties": {"private": {"callUniqueId": "call-1"}},
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"evt-99"}"#)
            .create_async()
            .await;

        let id = client(&server).create_event("cal-1", &draft()).await.unwrap();
        assert_eq!(id, "evt-99");
        insert.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_event_error_mapping() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/calendars/gone/events")
            .with_status(404)
            .with_body(r#"{"error":{"code":404,"message":"Not Found"}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/calendars/busy/events")
            .with_status(429)
            .with_header("retry-after", "3")
            .create_async()
            .await;
        server
            .mock("POST", "/calendars/flaky/events")
            .with_status(503)
            .create_async()
            .await;

        let cal = client(&server);
        assert!(matches!(
            cal.create_event("gone", &draft()).await,
            Err(ProviderError::NotFound(_))
        ));
        assert!(matches!(
            cal.create_event("busy", &draft()).await,
            Err(ProviderError::RateLimited { retry_after: Some(d) }) if d == Duration::from_secs(3)
        ));
        assert!(matches!(
            cal.create_event("flaky", &draft()).await,
            Err(ProviderError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_event_and_exists() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/calendars/cal-1/events/evt-1")
            .with_status(204)
            .create_async()
            .await;
        server
            .mock("DELETE", "/calendars/cal-1/events/evt-2")
            .with_status(410)
            .create_async()
            .await;
        server
            .mock("GET", "/calendars/cal-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"cal-1"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/calendars/cal-2")
            .with_status(404)
            .create_async()
            .await;

        let cal = client(&server);
        assert!(cal.delete_event("cal-1", "evt-1").await.unwrap());
        assert!(!cal.delete_event("cal-1", "evt-2").await.unwrap());
        assert!(cal.calendar_exists("cal-1").await.unwrap());
        assert!(!cal.calendar_exists("cal-2").await.unwrap());
    }
}
