//! API models for the gleaner read/update surface.
//!
//! This module defines the stored domain records ([`Feed`], [`FeedEntry`]) and
//! the JSON contracts returned by the HTTP endpoints:
//! - `GET /settings` returns [`SettingsResponse`]
//! - `GET /settings/{handler}` returns [`HandlerSettingsResponse`]
//! - `GET /read/{id}` returns [`ReadResponse`]
//! - `GET /about` returns [`AboutResponse`]
//!
//! Optional fields are omitted from the JSON when empty.
//!
//! # Ingest payload
//!
//! The external feed poller hands new items to `POST /entries`:
//!
//! ```json
//! {
//!   "feed_id": "6f1c1f34-...",
//!   "title": "Release notes",
//!   "url": "https://blog.example.com/release",
//!   "published_at": "2024-05-01T10:00:00Z",
//!   "authors": ["Jane Doe"],
//!   "preview": "<p>We shipped...</p>"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::handlers::{FieldError, HandlerSchema};
use crate::observability::MetricsSnapshot;
use crate::settings::{Settings, Theme};

/// Deterministic id for anything keyed by URL (feeds, entries)
pub fn url_id(url: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes()).to_string()
}

fn default_category() -> String {
    "uncategorized".to_string()
}

fn default_true() -> bool {
    true
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_category")]
    pub category: String,
    /// Whether new entries of this feed are pushed to the notification handler
    #[serde(default = "default_true")]
    pub notify: bool,
    /// Routing key looked up in the notification handler's `routing` map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_destination: Option<String>,
    /// Only the feed preview is kept; content is never fetched or summarized
    #[serde(default)]
    pub preview_only: bool,
    /// `false` uses the content the feed shipped instead of the active
    /// content handler
    #[serde(default = "default_true")]
    pub retrieve_content: bool,
}

/// One feed item.
///
/// The feed owns the identity, title, timestamps, byline and the `feed_*`
/// fields. `content`, `summary`, `preview` and the reading metrics are
/// written by the enrichment pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: String,
    pub feed_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feed_name: String,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byline: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feed_preview: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feed_content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub preview: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub word_count: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reading_level: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reading_time: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_at: Option<DateTime<Utc>>,
}

impl FeedEntry {
    pub fn is_enriched(&self) -> bool {
        self.enriched_at.is_some()
    }

    /// Most recent of published/updated, used for the recent window
    pub fn latest_timestamp(&self) -> DateTime<Utc> {
        self.published_at.max(self.updated_at)
    }

    /// Take the feed-owned fields of a newer copy of this item. Enrichment
    /// output stays until the next successful run replaces it.
    pub fn apply_feed_update(&mut self, newer: FeedEntry) {
        self.feed_name = newer.feed_name;
        self.title = newer.title;
        self.url = newer.url;
        self.published_at = newer.published_at;
        self.updated_at = newer.updated_at;
        self.byline = newer.byline;
        self.feed_preview = newer.feed_preview;
        self.feed_content = newer.feed_content;
        if !self.is_enriched() {
            self.preview = newer.preview;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFeed {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub notify: Option<bool>,
    #[serde(default)]
    pub notify_destination: Option<String>,
    #[serde(default)]
    pub preview_only: Option<bool>,
    #[serde(default)]
    pub retrieve_content: Option<bool>,
}

impl NewFeed {
    pub fn into_feed(self) -> Feed {
        Feed {
            id: url_id(&self.url),
            name: self.name,
            url: self.url,
            category: self.category.unwrap_or_else(default_category),
            notify: self.notify.unwrap_or(true),
            notify_destination: self.notify_destination,
            preview_only: self.preview_only.unwrap_or(false),
            retrieve_content: self.retrieve_content.unwrap_or(true),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEntry {
    pub feed_id: String,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub preview: Option<String>,
    /// Full content as supplied by the feed
    #[serde(default)]
    pub content: Option<String>,
}

impl NewEntry {
    pub fn into_entry(self, feed: &Feed) -> FeedEntry {
        let preview = self.preview.unwrap_or_default();
        FeedEntry {
            id: url_id(&self.url),
            feed_id: feed.id.clone(),
            feed_name: feed.name.clone(),
            title: self.title,
            url: self.url,
            published_at: self.published_at,
            updated_at: self.updated_at.unwrap_or(self.published_at),
            byline: (!self.authors.is_empty()).then(|| self.authors.join(", ")),
            feed_preview: preview.clone(),
            feed_content: self.content.unwrap_or_default(),
            preview,
            content: String::new(),
            summary: String::new(),
            word_count: 0,
            reading_level: 0,
            reading_time: 0,
            enriched_at: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EntryAccepted {
    pub id: String,
    pub feed_id: String,
    pub queued: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FeedSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EntrySummary {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct EntryFilter {
    #[serde(default)]
    pub feed_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ReadQuery {
    #[serde(default)]
    pub redrive: bool,
}

/// Handler config blob, accepted either as a JSON object or as JSON text
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigBlob {
    Text(String),
    Object(Value),
}

impl ConfigBlob {
    pub fn into_value(self) -> Result<Value, serde_json::Error> {
        match self {
            ConfigBlob::Text(text) if text.trim().is_empty() => Ok(Value::Null),
            ConfigBlob::Text(text) => serde_json::from_str(&text),
            ConfigBlob::Object(value) => Ok(value),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HandlerConfigUpdate {
    #[serde(rename = "type", default)]
    pub handler_type: Option<String>,
    #[serde(default = "null_blob")]
    pub config: ConfigBlob,
}

fn null_blob() -> ConfigBlob {
    ConfigBlob::Object(Value::Null)
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HandlerConfigView {
    #[serde(rename = "type")]
    pub handler_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub themes: Vec<Theme>,
    pub content_handler_choices: Vec<String>,
    pub summarization_handler_choices: Vec<String>,
    pub notification_handler_choices: Vec<String>,
    pub update_status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_exception: Option<String>,
    pub settings: Settings,
}

#[derive(Debug, Serialize)]
pub struct HandlerSettingsResponse {
    pub handler: HandlerConfigView,
    pub schema: HandlerSchema,
    pub settings: Settings,
    pub update_status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_exception: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReadResponse {
    pub content: FeedEntry,
    pub settings: Settings,
}

#[derive(Debug, Serialize)]
pub struct AboutResponse {
    pub settings: Settings,
    pub update_status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_exception: Option<String>,
    pub version: String,
    pub runtime_version: String,
    pub framework_version: String,
    pub docker: bool,
    pub storage_handler: String,
    pub project_url: String,
}

#[derive(Debug, Serialize)]
pub struct OnboardingResponse {
    pub settings: Settings,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub pipeline: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_feed() -> Feed {
        NewFeed {
            name: "Example".to_string(),
            url: "https://example.com/feed.xml".to_string(),
            category: None,
            notify: None,
            notify_destination: None,
            preview_only: None,
            retrieve_content: None,
        }
        .into_feed()
    }

    #[test]
    fn test_ids_are_deterministic() {
        assert_eq!(url_id("https://a.example/1"), url_id("https://a.example/1"));
        assert_ne!(url_id("https://a.example/1"), url_id("https://a.example/2"));
    }

    #[test]
    fn test_new_feed_defaults() {
        let feed = sample_feed();
        assert_eq!(feed.category, "uncategorized");
        assert!(feed.notify);
        assert!(!feed.preview_only);
        assert!(feed.retrieve_content);
        assert_eq!(feed.id, url_id("https://example.com/feed.xml"));
    }

    #[test]
    fn test_new_entry_conversion() {
        let feed = sample_feed();
        let payload: NewEntry = serde_json::from_value(json!({
            "feed_id": feed.id,
            "title": "Hello",
            "url": "https://example.com/hello",
            "published_at": "2024-05-01T10:00:00Z",
            "authors": ["Ada", "Grace"]
        }))
        .unwrap();

        let entry = payload.into_entry(&feed);
        assert_eq!(entry.feed_name, "Example");
        assert_eq!(entry.byline.as_deref(), Some("Ada, Grace"));
        assert_eq!(entry.updated_at, entry.published_at);
        assert!(!entry.is_enriched());
    }

    #[test]
    fn test_feed_update_keeps_enrichment() {
        let feed = sample_feed();
        let payload = |title: &str, updated: &str| -> NewEntry {
            serde_json::from_value(json!({
                "feed_id": feed.id,
                "title": title,
                "url": "https://example.com/hello",
                "published_at": "2024-05-01T10:00:00Z",
                "updated_at": updated,
                "preview": "<p>Teaser</p>",
                "content": "<p>One.</p><p>Two.</p>"
            }))
            .unwrap()
        };

        let mut stored = payload("Hello", "2024-05-01T10:00:00Z").into_entry(&feed);
        assert!(stored.content.is_empty());
        assert_eq!(stored.feed_content, "<p>One.</p><p>Two.</p>");
        assert_eq!(stored.preview, "<p>Teaser</p>");

        stored.content = "One.\n\nTwo.".to_string();
        stored.summary = "Short.".to_string();
        stored.preview = "Short.".to_string();
        stored.word_count = 2;
        stored.enriched_at = Some(Utc::now());

        stored.apply_feed_update(payload("Hello again", "2024-05-02T10:00:00Z").into_entry(&feed));
        assert_eq!(stored.title, "Hello again");
        assert_eq!(stored.updated_at.to_rfc3339(), "2024-05-02T10:00:00+00:00");
        assert_eq!(stored.content, "One.\n\nTwo.");
        assert_eq!(stored.summary, "Short.");
        assert_eq!(stored.preview, "Short.");
        assert_eq!(stored.word_count, 2);
        assert!(stored.is_enriched());
    }

    #[test]
    fn test_entry_omits_empty_fields() {
        let feed = sample_feed();
        let payload: NewEntry = serde_json::from_value(json!({
            "feed_id": feed.id,
            "title": "Hello",
            "url": "https://example.com/hello",
            "published_at": "2024-05-01T10:00:00Z"
        }))
        .unwrap();

        let value = serde_json::to_value(payload.into_entry(&feed)).unwrap();
        assert!(value.get("summary").is_none());
        assert!(value.get("word_count").is_none());
        assert!(value.get("byline").is_none());
    }

    #[test]
    fn test_config_blob_accepts_text_and_object() {
        let text = ConfigBlob::Text(r#"{"topic": "news"}"#.to_string());
        assert_eq!(text.into_value().unwrap(), json!({"topic": "news"}));

        let object = ConfigBlob::Object(json!({"topic": "news"}));
        assert_eq!(object.into_value().unwrap(), json!({"topic": "news"}));

        let empty = ConfigBlob::Text("  ".to_string());
        assert_eq!(empty.into_value().unwrap(), Value::Null);
    }
}
