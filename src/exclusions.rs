//! Temporary exclusions: managed paths exempted from enforcement until an expiry time
//!
//! Expiries are stored as RFC 3339 strings so the persisted config stays human
//! readable. An unparseable expiry never grants an exemption.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Path -> expiry mapping persisted in the config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionSet {
    entries: BTreeMap<String, String>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exempt `path` for `minutes` starting at `now`, replacing any existing entry
    pub fn add(&mut self, path: &str, minutes: u32, now: DateTime<Local>) -> DateTime<Local> {
        let expiry = now + ChronoDuration::minutes(i64::from(minutes));
        self.entries.insert(path.to_string(), expiry.to_rfc3339());
        expiry
    }

    /// Drop the exemption for `path`, reporting whether one existed
    pub fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    /// True only while a well-formed expiry lies in the future
    pub fn is_excluded(&self, path: &str, now: DateTime<Local>) -> bool {
        self.entries
            .get(path)
            .and_then(|raw| parse_expiry(raw))
            .is_some_and(|expiry| expiry > now)
    }

    /// Remove expired or unparseable entries; true when anything was removed
    pub fn clean_expired(&mut self, now: DateTime<Local>) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|_, raw| parse_expiry(raw).is_some_and(|expiry| expiry >= now));
        self.entries.len() != before
    }

    /// Keep only exemptions whose path is still managed
    pub fn retain_paths(&mut self, managed: &[String]) -> bool {
        let before = self.entries.len();
        self.entries.retain(|path, _| managed.iter().any(|m| m == path));
        self.entries.len() != before
    }

    /// Entries with their parsed expiry; unparseable expiries are skipped
    pub fn iter(&self) -> impl Iterator<Item = (&str, DateTime<FixedOffset>)> {
        self.entries
            .iter()
            .filter_map(|(path, raw)| parse_expiry(raw).map(|expiry| (path.as_str(), expiry)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_expiry(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}
