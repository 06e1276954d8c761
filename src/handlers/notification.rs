//! Notification handlers: `null_notification`, `ntfy`, `slack`, `matrix`
//! and `jira`.
//!
//! Every real handler routes by the feed's `notify_destination`: when the
//! destination is present in the handler's `routing` map the mapped topic,
//! channel, room or project is used, otherwise the handler default.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::info;
use url::Url;
use uuid::Uuid;

use super::http::{self, HttpConfig};
use super::schema::{FieldKind, FieldSpec, HandlerSchema};
use super::traits::{HandlerError, Notifier};
use super::types::Notice;

const NTFY_ROOT_URL: &str = "https://ntfy.sh/";
const SLACK_API_URL: &str = "https://slack.com/api";

fn route<'a>(routing: &'a BTreeMap<String, String>, notice: &Notice, fallback: &'a str) -> &'a str {
    notice
        .feed
        .notify_destination
        .as_deref()
        .and_then(|destination| routing.get(destination))
        .map(String::as_str)
        .unwrap_or(fallback)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NullNotificationConfig {}

impl NullNotificationConfig {
    pub fn schema() -> HandlerSchema {
        HandlerSchema::new("null_notification")
    }
}

pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    fn name(&self) -> &'static str {
        "null_notification"
    }

    async fn notify(&self, _notice: &Notice) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NtfyConfig {
    pub topic: String,
    #[serde(default = "default_ntfy_root")]
    pub root_url: String,
    #[serde(default)]
    pub routing: BTreeMap<String, String>,
}

fn default_ntfy_root() -> String {
    NTFY_ROOT_URL.to_string()
}

impl NtfyConfig {
    pub fn schema() -> HandlerSchema {
        HandlerSchema::new("ntfy")
            .field(FieldSpec::required("topic", FieldKind::String, "default topic"))
            .field(
                FieldSpec::optional("root_url", FieldKind::Url, "ntfy server")
                    .with_default(NTFY_ROOT_URL),
            )
            .field(FieldSpec::optional(
                "routing",
                FieldKind::StringMap,
                "feed notify_destination -> topic",
            ))
    }
}

pub struct NtfyNotifier {
    client: Client,
    config: NtfyConfig,
}

impl NtfyNotifier {
    pub fn new(config: NtfyConfig) -> Result<Self, HandlerError> {
        let client = http::build_client(&HttpConfig::default())?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    fn name(&self) -> &'static str {
        "ntfy"
    }

    async fn notify(&self, notice: &Notice) -> Result<(), HandlerError> {
        let topic = route(&self.config.routing, notice, &self.config.topic);
        info!(entry_id = %notice.entry.id, %topic, "Sending ntfy notification");

        let body = json!({
            "topic": topic,
            "title": "Gleaner: New Feed Entry",
            "tags": ["newspaper"],
            "click": notice.read_link,
            "message": format!("{} - {}", notice.feed.name, notice.entry.title),
            "actions": [
                {"action": "view", "label": "Read in Gleaner", "url": notice.read_link},
                {"action": "view", "label": "View Original", "url": notice.entry.url},
            ],
        });

        let response = self.client.post(&self.config.root_url).json(&body).send().await?;
        http::ensure_success(response).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackConfig {
    pub token: String,
    pub channel: String,
    #[serde(default = "default_slack_api")]
    pub api_url: String,
    #[serde(default)]
    pub routing: BTreeMap<String, String>,
}

fn default_slack_api() -> String {
    SLACK_API_URL.to_string()
}

impl SlackConfig {
    pub fn schema() -> HandlerSchema {
        HandlerSchema::new("slack")
            .field(FieldSpec::required("token", FieldKind::String, "bot token"))
            .field(FieldSpec::required("channel", FieldKind::String, "default channel"))
            .field(
                FieldSpec::optional("api_url", FieldKind::Url, "Slack Web API root")
                    .with_default(SLACK_API_URL),
            )
            .field(FieldSpec::optional(
                "routing",
                FieldKind::StringMap,
                "feed notify_destination -> channel",
            ))
    }
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct SlackNotifier {
    client: Client,
    config: SlackConfig,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig) -> Result<Self, HandlerError> {
        let client = http::build_client(&HttpConfig::default())?;
        Ok(Self { client, config })
    }
}

/// Slack mrkdwn control characters
fn escape_mrkdwn(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify(&self, notice: &Notice) -> Result<(), HandlerError> {
        let channel = route(&self.config.routing, notice, &self.config.channel);
        info!(entry_id = %notice.entry.id, %channel, "Sending Slack notification");

        let text = format!(
            "{}: <{}|{}>",
            notice.feed.name,
            notice.read_link,
            escape_mrkdwn(&notice.entry.title)
        );
        let url = format!("{}/chat.postMessage", self.config.api_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(&json!({"channel": channel, "text": text, "mrkdwn": true}))
            .send()
            .await?;
        let reply: SlackResponse = http::ensure_success(response).await?.json().await?;

        if !reply.ok {
            return Err(HandlerError::InvalidResponse(
                reply.error.unwrap_or_else(|| "slack rejected the message".to_string()),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixConfig {
    pub homeserver: String,
    pub room_id: String,
    pub access_token: String,
    #[serde(default)]
    pub routing: BTreeMap<String, String>,
}

impl MatrixConfig {
    pub fn schema() -> HandlerSchema {
        HandlerSchema::new("matrix")
            .field(FieldSpec::required("homeserver", FieldKind::Url, "homeserver root"))
            .field(FieldSpec::required("room_id", FieldKind::String, "default room"))
            .field(FieldSpec::required(
                "access_token",
                FieldKind::String,
                "access token of the posting user",
            ))
            .field(FieldSpec::optional(
                "routing",
                FieldKind::StringMap,
                "feed notify_destination -> room",
            ))
    }
}

pub struct MatrixNotifier {
    client: Client,
    config: MatrixConfig,
}

impl MatrixNotifier {
    pub fn new(config: MatrixConfig) -> Result<Self, HandlerError> {
        let client = http::build_client(&HttpConfig::default())?;
        Ok(Self { client, config })
    }

    /// `PUT /_matrix/client/v3/rooms/{room}/send/m.room.message/{txn}`
    fn send_url(&self, room: &str, txn_id: &str) -> Result<Url, HandlerError> {
        let mut url = Url::parse(&self.config.homeserver)
            .map_err(|e| HandlerError::Build(format!("matrix homeserver: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| HandlerError::Build("matrix homeserver cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["_matrix", "client", "v3", "rooms", room, "send", "m.room.message", txn_id]);
        Ok(url)
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
impl Notifier for MatrixNotifier {
    fn name(&self) -> &'static str {
        "matrix"
    }

    async fn notify(&self, notice: &Notice) -> Result<(), HandlerError> {
        let room = route(&self.config.routing, notice, &self.config.room_id);
        info!(entry_id = %notice.entry.id, %room, "Sending Matrix notification");

        let url = self.send_url(room, &Uuid::now_v7().to_string())?;
        let body = json!({
            "msgtype": "m.text",
            "body": format!("{}: {} ({})", notice.feed.name, notice.entry.title, notice.read_link),
            "format": "org.matrix.custom.html",
            "formatted_body": format!(
                "{}: <a href=\"{}\">{}</a>",
                escape_html(&notice.feed.name),
                escape_html(&notice.read_link),
                escape_html(&notice.entry.title)
            ),
        });

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await?;
        http::ensure_success(response).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JiraConfig {
    pub server: String,
    pub project: String,
    pub email: String,
    pub token: String,
    #[serde(default)]
    pub routing: BTreeMap<String, String>,
}

impl JiraConfig {
    pub fn schema() -> HandlerSchema {
        HandlerSchema::new("jira")
            .field(FieldSpec::required("server", FieldKind::Url, "Jira Cloud site"))
            .field(FieldSpec::required("project", FieldKind::String, "default project key"))
            .field(FieldSpec::required("email", FieldKind::String, "account email"))
            .field(FieldSpec::required("token", FieldKind::String, "API token"))
            .field(FieldSpec::optional(
                "routing",
                FieldKind::StringMap,
                "feed notify_destination -> project key",
            ))
    }
}

/// Files one Jira task per new entry
pub struct JiraNotifier {
    client: Client,
    config: JiraConfig,
}

impl JiraNotifier {
    pub fn new(config: JiraConfig) -> Result<Self, HandlerError> {
        let client = http::build_client(&HttpConfig::default())?;
        Ok(Self { client, config })
    }
}

/// Kebab-case label: `"HackerNews Daily"` -> `"hacker-news-daily"`
fn labelfy(label: &str) -> String {
    let chars: Vec<char> = label.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if let Some(&prev) = i.checked_sub(1).and_then(|p| chars.get(p)) {
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = (c.is_uppercase() && (prev.is_lowercase() || prev.is_numeric()))
                || (c.is_uppercase() && prev.is_uppercase() && next_is_lower)
                || (c.is_alphabetic() && prev.is_numeric());
            if boundary && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }

    words.join("-")
}

fn adf_link(text: &str, href: &str) -> Value {
    json!({
        "type": "listItem",
        "content": [{
            "type": "paragraph",
            "content": [{
                "type": "text",
                "text": text,
                "marks": [{"type": "link", "attrs": {"href": href}}],
            }],
        }],
    })
}

#[async_trait]
impl Notifier for JiraNotifier {
    fn name(&self) -> &'static str {
        "jira"
    }

    async fn notify(&self, notice: &Notice) -> Result<(), HandlerError> {
        let project = route(&self.config.routing, notice, &self.config.project);
        info!(entry_id = %notice.entry.id, %project, "Creating Jira issue");

        let lead = if notice.entry.preview.trim().is_empty() {
            &notice.entry.title
        } else {
            &notice.entry.preview
        };
        let description = json!({
            "type": "doc",
            "version": 1,
            "content": [
                {"type": "paragraph", "content": [{"type": "text", "text": lead}]},
                {
                    "type": "bulletList",
                    "content": [
                        adf_link("Read in Gleaner", &notice.read_link),
                        adf_link("Read Original", &notice.entry.url),
                    ],
                },
            ],
        });
        let labels: Vec<String> = [&notice.feed.name, &notice.feed.category]
            .into_iter()
            .map(|label| labelfy(label))
            .filter(|label| !label.is_empty())
            .collect();

        let url = format!("{}/rest/api/3/issue", self.config.server.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.email, Some(&self.config.token))
            .json(&json!({
                "fields": {
                    "project": {"key": project},
                    "summary": format!("{}: {}", notice.feed.name, notice.entry.title),
                    "description": description,
                    "issuetype": {"name": "Task"},
                    "labels": labels,
                }
            }))
            .send()
            .await?;
        http::ensure_success(response).await?;
        Ok(())
    }
}
