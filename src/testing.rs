//! In-crate fakes for the sync collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::calendar::{CalendarProvider, CalendarRef, ProviderError, ProviderResult};
use crate::calls::{CallRecord, CallSource};
use crate::contacts::ContactResolver;
use crate::error::{Error, Result};
use crate::mapper::EventDraft;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
}

/// An incoming call `minute` minutes after [`base_time`].
pub fn call(id: &str, minute: i64, duration_seconds: i64, answered: bool) -> CallRecord {
    CallRecord {
        call_id: id.to_string(),
        address: "+15551234567".to_string(),
        display_name: Some(format!("Caller {id}")),
        start_time: base_time() + Duration::minutes(minute),
        duration_seconds,
        answered,
        outgoing: false,
    }
}

pub struct StaticCallSource {
    calls: Mutex<Vec<CallRecord>>,
    fail: bool,
}

impl StaticCallSource {
    pub fn new(calls: Vec<CallRecord>) -> Self {
        Self {
            calls: Mutex::new(calls),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn push(&self, call: CallRecord) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CallSource for StaticCallSource {
    async fn list_calls(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<CallRecord>> {
        if self.fail {
            return Err(Error::PermissionDenied("call history unreadable".into()));
        }
        Ok(self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| since.map_or(true, |s| c.start_time >= s))
            .filter(|c| until.map_or(true, |u| c.start_time <= u))
            .cloned()
            .collect())
    }
}

enum Scripted {
    Once(ProviderError),
    Always(ProviderError),
}

/// Calendar provider that records what it was asked to do and fails on
/// request.
pub struct FakeCalendar {
    calendar: Mutex<CalendarRef>,
    created: Mutex<Vec<EventDraft>>,
    deleted: Mutex<Vec<(String, String)>>,
    create_failures: Mutex<HashMap<String, Scripted>>,
    resolve_failure: Mutex<Option<ProviderError>>,
    resolve_calls: AtomicUsize,
}

impl FakeCalendar {
    pub fn new() -> Self {
        Self {
            calendar: Mutex::new(CalendarRef {
                id: "cal-1".into(),
                name: "Call Tracking".into(),
            }),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            create_failures: Mutex::new(HashMap::new()),
            resolve_failure: Mutex::new(None),
            resolve_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate the calendar being deleted and recreated under a new id.
    pub fn set_calendar_id(&self, id: &str) {
        self.calendar.lock().unwrap().id = id.to_string();
    }

    pub fn fail_once(&self, call_id: &str, error: ProviderError) {
        self.create_failures
            .lock()
            .unwrap()
            .insert(call_id.to_string(), Scripted::Once(error));
    }

    pub fn fail_always(&self, call_id: &str, error: ProviderError) {
        self.create_failures
            .lock()
            .unwrap()
            .insert(call_id.to_string(), Scripted::Always(error));
    }

    pub fn fail_resolve(&self, error: ProviderError) {
        *self.resolve_failure.lock().unwrap() = Some(error);
    }

    pub fn created(&self) -> Vec<EventDraft> {
        self.created.lock().unwrap().clone()
    }

    pub fn created_call_ids(&self) -> Vec<String> {
        self.created().into_iter().map(|d| d.call_id).collect()
    }

    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarProvider for FakeCalendar {
    async fn resolve_calendar(&self, name: &str) -> ProviderResult<CalendarRef> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.resolve_failure.lock().unwrap().clone() {
            return Err(e);
        }
        let mut calendar = self.calendar.lock().unwrap().clone();
        calendar.name = name.to_string();
        Ok(calendar)
    }

    async fn create_event(&self, calendar_id: &str, draft: &EventDraft) -> ProviderResult<String> {
        {
            let mut failures = self.create_failures.lock().unwrap();
            match failures.remove(&draft.call_id) {
                Some(Scripted::Once(e)) => return Err(e),
                Some(Scripted::Always(e)) => {
                    failures.insert(draft.call_id.clone(), Scripted::Always(e.clone()));
                    return Err(e);
                }
                None => {}
            }
        }
        let mut created = self.created.lock().unwrap();
        created.push(draft.clone());
        Ok(format!("{calendar_id}-evt-{}", created.len()))
    }

    async fn delete_event(&self, calendar_id: &str, event_id: &str) -> ProviderResult<bool> {
        self.deleted
            .lock()
            .unwrap()
            .push((calendar_id.to_string(), event_id.to_string()));
        Ok(true)
    }

    async fn calendar_exists(&self, calendar_id: &str) -> ProviderResult<bool> {
        Ok(self.calendar.lock().unwrap().id == calendar_id)
    }
}

/// Contact resolver backed by a fixed map.
pub struct FakeContacts {
    names: HashMap<String, String>,
    fail: bool,
    pub lookups: Mutex<Vec<Vec<String>>>,
}

impl FakeContacts {
    pub fn new(names: &[(&str, &str)]) -> Self {
        Self {
            names: names
                .iter()
                .map(|(n, name)| (n.to_string(), name.to_string()))
                .collect(),
            fail: false,
            lookups: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&[])
        }
    }
}

#[async_trait]
impl ContactResolver for FakeContacts {
    async fn resolve(&self, numbers: &[String]) -> Result<HashMap<String, String>> {
        self.lookups.lock().unwrap().push(numbers.to_vec());
        if self.fail {
            return Err(Error::Other("address book locked".into()));
        }
        Ok(numbers
            .iter()
            .filter_map(|n| self.names.get(n).map(|name| (n.clone(), name.clone())))
            .collect())
    }
}
