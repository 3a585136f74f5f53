use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::datetime::parse_feed_timestamp;

/// A link to the event on one of the platforms it was aggregated from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventSource {
    #[serde(default, deserialize_with = "null_as_default")]
    pub platform: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
}

/// An event exactly as it arrives in the region feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub dtstart: Option<String>,

    #[serde(default)]
    pub dtend: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub online: Option<bool>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub sources: Vec<EventSource>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,

    #[serde(default)]
    pub state_code: Option<String>,

    #[serde(default)]
    pub city: Option<String>,

    #[serde(default)]
    pub state: Option<String>,

    #[serde(default)]
    pub organizer: Option<String>,

    #[serde(default)]
    pub country_code: Option<String>,

    #[serde(default)]
    pub city_code: Option<String>,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub hash_key: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EventRecord {
    /// `title`, falling back to `summary`. Blank strings count as missing.
    pub fn raw_title(&self) -> Option<&str> {
        non_blank(self.title.as_deref()).or_else(|| non_blank(self.summary.as_deref()))
    }

    /// Parsed `dtstart`; `None` when absent or malformed.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        parse_optional(self.dtstart.as_deref(), "dtstart")
    }

    /// Parsed `dtend`; `None` when absent or malformed.
    pub fn end(&self) -> Option<DateTime<Utc>> {
        parse_optional(self.dtend.as_deref(), "dtend")
    }

    /// Stable identifier: the feed's own id, its dedup hash, or a
    /// name-based UUID over title, start and url.
    pub fn event_id(&self) -> String {
        if let Some(id) = non_blank(self.id.as_deref()) {
            return id.to_string();
        }
        if let Some(hash) = non_blank(self.hash_key.as_deref()) {
            return hash.to_string();
        }
        let name = format!(
            "{}|{}|{}",
            self.raw_title().unwrap_or_default(),
            self.dtstart.as_deref().unwrap_or_default(),
            self.url.as_deref().unwrap_or_default()
        );
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
    }

    pub fn new_dated(title: &str, dtstart: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            dtstart: Some(dtstart.to_string()),
            ..Self::default()
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.trim().is_empty())
}

fn parse_optional(raw: Option<&str>, field: &'static str) -> Option<DateTime<Utc>> {
    let raw = non_blank(raw)?;
    match parse_feed_timestamp(raw) {
        Ok(dt) => Some(dt),
        Err(err) => {
            trace!(field, error = %err, "dropping unparsable event timestamp");
            None
        }
    }
}

pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    null_as_default(deserializer)
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::EventRecord;

    #[test]
    fn deserializes_sparse_records() {
        let record: EventRecord = serde_json::from_str(
            r#"{"summary":"Rust MX","dtstart":"2025-03-01T18:00Z","tags":null,"venue":"Casa"}"#,
        )
        .expect("parse record");
        assert_eq!(record.raw_title(), Some("Rust MX"));
        assert!(record.tags.is_empty());
        assert!(record.sources.is_empty());
        assert!(record.start().is_some());
        assert_eq!(record.extra.get("venue").and_then(|v| v.as_str()), Some("Casa"));
    }

    #[test]
    fn malformed_dates_read_as_missing() {
        let record = EventRecord::new_dated("Meetup", "next tuesday");
        assert!(record.start().is_none());
        assert!(record.end().is_none());
    }

    #[test]
    fn derived_ids_are_deterministic() {
        let a = EventRecord::new_dated("Meetup", "2025-03-01T18:00Z");
        let b = EventRecord::new_dated("Meetup", "2025-03-01T18:00Z");
        let c = EventRecord::new_dated("Meetup", "2025-03-02T18:00Z");
        assert_eq!(a.event_id(), b.event_id());
        assert_ne!(a.event_id(), c.event_id());

        let hashed = EventRecord {
            hash_key: Some("abc123".to_string()),
            ..a
        };
        assert_eq!(hashed.event_id(), "abc123");
    }
}
