//! Content retrieval handlers: `requests` (fetch the page over HTTP and
//! extract the article) and `rss` (use what the feed supplied).

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::http::{self, HttpConfig, USER_AGENT};
use super::schema::{FieldKind, FieldSpec, HandlerSchema};
use super::traits::{ContentRetriever, HandlerError};
use crate::api::models::FeedEntry;
use crate::reading;

const DEFAULT_MAX_BYTES: i64 = 5 * 1024 * 1024;
const DEFAULT_BANNED_HOSTS: &[&str] = &[
    "x.com",
    "twitter.com",
    "reddit.com",
    "youtube.com",
    "notion.site",
];

const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "svg",
];
const BLOCK_SELECTOR: &str = "p, h1, h2, h3, h4, h5, h6, pre, li, blockquote";
const ROOT_SELECTORS: &[&str] = &["article", "main", "[role=main]", "body"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestsConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_banned_hosts")]
    pub banned_hosts: Vec<String>,
}

fn default_user_agent() -> String {
    USER_AGENT.to_string()
}

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES as u64
}

fn default_banned_hosts() -> Vec<String> {
    DEFAULT_BANNED_HOSTS.iter().map(ToString::to_string).collect()
}

impl RequestsConfig {
    pub fn schema() -> HandlerSchema {
        HandlerSchema::new("requests")
            .field(
                FieldSpec::optional(
                    "user_agent",
                    FieldKind::String,
                    "User-Agent header sent with page requests",
                )
                .with_default(USER_AGENT),
            )
            .field(
                FieldSpec::optional(
                    "max_bytes",
                    FieldKind::Integer {
                        min: Some(1024),
                        max: Some(64 * 1024 * 1024),
                    },
                    "largest page body accepted, in bytes",
                )
                .with_default(DEFAULT_MAX_BYTES),
            )
            .field(
                FieldSpec::optional(
                    "banned_hosts",
                    FieldKind::StringList,
                    "hosts (and their subdomains) that are never fetched",
                )
                .with_default(DEFAULT_BANNED_HOSTS.to_vec()),
            )
    }
}

/// Fetches the entry URL and extracts the main article text
pub struct RequestsRetriever {
    client: Client,
    config: RequestsConfig,
}

impl RequestsRetriever {
    pub fn new(config: RequestsConfig) -> Result<Self, HandlerError> {
        let client = http::build_client(&HttpConfig::with_user_agent(&config.user_agent))?;
        Ok(Self { client, config })
    }

    fn is_banned(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };

        self.config.banned_hosts.iter().any(|banned| {
            host == banned
                || host
                    .strip_suffix(banned.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

#[async_trait]
impl ContentRetriever for RequestsRetriever {
    fn name(&self) -> &'static str {
        "requests"
    }

    async fn retrieve(&self, entry: &FeedEntry) -> Result<String, HandlerError> {
        if self.is_banned(&entry.url) {
            info!(url = %entry.url, "Skipping banned host");
            return Err(HandlerError::Banned(entry.url.clone()));
        }

        debug!(url = %entry.url, "Fetching page");
        let response = self.client.get(&entry.url).send().await?;
        let response = http::ensure_success(response).await?;
        let html = http::read_limited(response, self.config.max_bytes as usize).await?;

        let text = extract_article(&html);
        if text.is_empty() {
            return Err(HandlerError::Empty(entry.url.clone()));
        }

        debug!(url = %entry.url, chars = text.len(), "Extracted article");
        Ok(text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RssConfig {}

impl RssConfig {
    pub fn schema() -> HandlerSchema {
        HandlerSchema::new("rss")
    }
}

/// Uses the content (or preview) the feed shipped with the entry. Reads
/// only the feed-owned fields, so re-running it over an enriched entry gives
/// the same text.
pub struct RssRetriever;

#[async_trait]
impl ContentRetriever for RssRetriever {
    fn name(&self) -> &'static str {
        "rss"
    }

    async fn retrieve(&self, entry: &FeedEntry) -> Result<String, HandlerError> {
        let source = if entry.feed_content.trim().is_empty() {
            &entry.feed_preview
        } else {
            &entry.feed_content
        };

        let text = extract_article(source);
        if text.is_empty() {
            return Err(HandlerError::Empty(entry.url.clone()));
        }
        Ok(text)
    }
}

/// Extract readable article text from an HTML page or fragment.
///
/// Block elements become paragraphs separated by a blank line; navigation,
/// scripts and similar chrome are skipped.
pub fn extract_article(html: &str) -> String {
    if !html.contains('<') {
        return reading::normalize_whitespace(html);
    }

    let document = Html::parse_document(html);
    let Ok(blocks) = Selector::parse(BLOCK_SELECTOR) else {
        return reading::plain_text(html);
    };

    for root in ROOT_SELECTORS {
        let Ok(selector) = Selector::parse(root) else {
            continue;
        };
        let Some(element) = document.select(&selector).next() else {
            continue;
        };

        let paragraphs: Vec<String> = element
            .select(&blocks)
            .filter(|block| !is_nested_or_skipped(block))
            .map(|block| element_text(&block))
            .filter(|text| !text.is_empty())
            .collect();

        if !paragraphs.is_empty() {
            return paragraphs.join("\n\n");
        }

        let text = element_text(&element);
        if !text.is_empty() {
            return text;
        }
    }

    reading::plain_text(html)
}

fn is_nested_or_skipped(block: &ElementRef<'_>) -> bool {
    block.ancestors().filter_map(ElementRef::wrap).any(|ancestor| {
        let name = ancestor.value().name();
        SKIPPED_ELEMENTS.contains(&name)
            || matches!(
                name,
                "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "pre" | "li" | "blockquote"
            )
    })
}

fn element_text(element: &ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in element.descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| SKIPPED_ELEMENTS.contains(&ancestor.value().name()));
        if !hidden {
            text.push_str(fragment);
            text.push(' ');
        }
    }
    reading::normalize_whitespace(&text)
}
