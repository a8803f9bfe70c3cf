//! Contact-name lookup for calls that the call history did not name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use rusqlite::OpenFlags;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

const DEFAULT_ADDRESS_BOOK: &str =
    "Library/Application Support/AddressBook/AddressBook-v22.abcddb";

/// Numbers are matched on their trailing digits to ignore country codes.
const MATCH_DIGITS: usize = 10;
const MIN_DIGITS: usize = 7;

/// Resolves phone numbers to display names.
#[async_trait]
pub trait ContactResolver: Send + Sync {
    /// Names for the numbers that have one. Numbers without a match are
    /// absent from the map.
    async fn resolve(&self, numbers: &[String]) -> Result<HashMap<String, String>>;
}

/// Strip everything but digits.
pub fn normalize_phone_number(number: &str) -> String {
    static NON_DIGIT: OnceLock<Regex> = OnceLock::new();
    let re = NON_DIGIT.get_or_init(|| Regex::new(r"\D").expect("static regex"));
    re.replace_all(number, "").into_owned()
}

/// Lookup key for a number, or `None` when it is too short to match safely.
pub fn match_key(number: &str) -> Option<String> {
    let digits = normalize_phone_number(number);
    if digits.len() < MIN_DIGITS {
        return None;
    }
    let start = digits.len().saturating_sub(MATCH_DIGITS);
    Some(digits[start..].to_string())
}

/// Reader of the macOS AddressBook SQLite database. The whole book is loaded
/// once per process and cached.
pub struct AddressBook {
    path: PathBuf,
    cache: Mutex<Option<HashMap<String, String>>>,
}

impl AddressBook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?;
        Ok(home.join(DEFAULT_ADDRESS_BOOK))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<String, String>> {
        let conn = tokio_rusqlite::Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .await
        .map_err(|e| Error::Other(format!("cannot open address book: {e}")))?;

        let rows = conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT r.ZFIRSTNAME, r.ZLASTNAME, r.ZORGANIZATION, p.ZFULLNUMBER
                     FROM ZABCDRECORD r
                     JOIN ZABCDPHONENUMBER p ON r.Z_PK = p.ZOWNER",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })?;
                rows.collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            })
            .await
            .map_err(|e| Error::Other(format!("cannot read address book: {e}")))?;

        let mut lookup = HashMap::new();
        for (first, last, org, number) in rows {
            let Some(key) = number.as_deref().and_then(match_key) else {
                continue;
            };
            let full = format!(
                "{} {}",
                first.as_deref().unwrap_or(""),
                last.as_deref().unwrap_or("")
            );
            let name = match full.trim() {
                "" => org.unwrap_or_default(),
                trimmed => trimmed.to_string(),
            };
            if !name.is_empty() {
                lookup.entry(key).or_insert(name);
            }
        }
        log::debug!("Loaded {} contact numbers from address book", lookup.len());
        Ok(lookup)
    }
}

#[async_trait]
impl ContactResolver for AddressBook {
    async fn resolve(&self, numbers: &[String]) -> Result<HashMap<String, String>> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.load().await?);
        }
        let Some(book) = cache.as_ref() else {
            return Ok(HashMap::new());
        };

        Ok(numbers
            .iter()
            .filter_map(|number| {
                let name = book.get(&match_key(number)?)?;
                Some((number.clone(), name.clone()))
            })
            .collect())
    }
}
