use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::content::{RequestsConfig, RequestsRetriever, RssConfig, RssRetriever};
use super::notification::{
    JiraConfig, JiraNotifier, MatrixConfig, MatrixNotifier, NtfyConfig, NtfyNotifier,
    NullNotificationConfig, NullNotifier, SlackConfig, SlackNotifier,
};
use super::schema::{HandlerSchema, ValidatedConfig};
use super::summarization::{
    NullSummarizationConfig, NullSummarizer, OllamaConfig, OllamaSummarizer, OpenAiConfig,
    OpenAiSummarizer,
};
use super::traits::{ContentRetriever, HandlerError, Notifier, Summarizer};
use crate::api::models::{Feed, FeedEntry};

/// The three interchangeable handler roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerCategory {
    ContentRetrieval,
    Summarization,
    Notification,
}

impl HandlerCategory {
    pub const ALL: [HandlerCategory; 3] = [
        HandlerCategory::ContentRetrieval,
        HandlerCategory::Summarization,
        HandlerCategory::Notification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HandlerCategory::ContentRetrieval => "content_retrieval",
            HandlerCategory::Summarization => "summarization",
            HandlerCategory::Notification => "notification",
        }
    }
}

impl fmt::Display for HandlerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public view of one registered handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub category: HandlerCategory,
    pub configured: bool,
}

/// Closed set of built-in handler implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Requests,
    Rss,
    NullSummarization,
    Ollama,
    OpenAi,
    NullNotification,
    Ntfy,
    Slack,
    Matrix,
    Jira,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 10] = [
        HandlerKind::Requests,
        HandlerKind::Rss,
        HandlerKind::NullSummarization,
        HandlerKind::Ollama,
        HandlerKind::OpenAi,
        HandlerKind::NullNotification,
        HandlerKind::Ntfy,
        HandlerKind::Slack,
        HandlerKind::Matrix,
        HandlerKind::Jira,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HandlerKind::Requests => "requests",
            HandlerKind::Rss => "rss",
            HandlerKind::NullSummarization => "null_summarization",
            HandlerKind::Ollama => "ollama",
            HandlerKind::OpenAi => "openai",
            HandlerKind::NullNotification => "null_notification",
            HandlerKind::Ntfy => "ntfy",
            HandlerKind::Slack => "slack",
            HandlerKind::Matrix => "matrix",
            HandlerKind::Jira => "jira",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn category(self) -> HandlerCategory {
        match self {
            HandlerKind::Requests | HandlerKind::Rss => HandlerCategory::ContentRetrieval,
            HandlerKind::NullSummarization | HandlerKind::Ollama | HandlerKind::OpenAi => {
                HandlerCategory::Summarization
            }
            HandlerKind::NullNotification
            | HandlerKind::Ntfy
            | HandlerKind::Slack
            | HandlerKind::Matrix
            | HandlerKind::Jira => HandlerCategory::Notification,
        }
    }

    pub fn schema(self) -> HandlerSchema {
        match self {
            HandlerKind::Requests => RequestsConfig::schema(),
            HandlerKind::Rss => RssConfig::schema(),
            HandlerKind::NullSummarization => NullSummarizationConfig::schema(),
            HandlerKind::Ollama => OllamaConfig::schema(),
            HandlerKind::OpenAi => OpenAiConfig::schema(),
            HandlerKind::NullNotification => NullNotificationConfig::schema(),
            HandlerKind::Ntfy => NtfyConfig::schema(),
            HandlerKind::Slack => SlackConfig::schema(),
            HandlerKind::Matrix => MatrixConfig::schema(),
            HandlerKind::Jira => JiraConfig::schema(),
        }
    }
}

/// Typed configuration, one variant per handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum HandlerSettings {
    Requests(RequestsConfig),
    Rss(RssConfig),
    NullSummarization(NullSummarizationConfig),
    Ollama(OllamaConfig),
    #[serde(rename = "openai")]
    OpenAi(OpenAiConfig),
    NullNotification(NullNotificationConfig),
    Ntfy(NtfyConfig),
    Slack(SlackConfig),
    Matrix(MatrixConfig),
    Jira(JiraConfig),
}

impl HandlerSettings {
    /// Convert a validated blob into the typed config of `kind`
    pub fn from_validated(kind: HandlerKind, validated: ValidatedConfig) -> Result<Self, HandlerError> {
        let values = validated.into_values();
        let parsed = match kind {
            HandlerKind::Requests => serde_json::from_value(values).map(HandlerSettings::Requests),
            HandlerKind::Rss => serde_json::from_value(values).map(HandlerSettings::Rss),
            HandlerKind::NullSummarization => {
                serde_json::from_value(values).map(HandlerSettings::NullSummarization)
            }
            HandlerKind::Ollama => serde_json::from_value(values).map(HandlerSettings::Ollama),
            HandlerKind::OpenAi => serde_json::from_value(values).map(HandlerSettings::OpenAi),
            HandlerKind::NullNotification => {
                serde_json::from_value(values).map(HandlerSettings::NullNotification)
            }
            HandlerKind::Ntfy => serde_json::from_value(values).map(HandlerSettings::Ntfy),
            HandlerKind::Slack => serde_json::from_value(values).map(HandlerSettings::Slack),
            HandlerKind::Matrix => serde_json::from_value(values).map(HandlerSettings::Matrix),
            HandlerKind::Jira => serde_json::from_value(values).map(HandlerSettings::Jira),
        };

        parsed.map_err(|e| HandlerError::Build(format!("{}: {e}", kind.name())))
    }

    /// Build the live handler for this config
    pub fn build(self) -> Result<HandlerInstance, HandlerError> {
        Ok(match self {
            HandlerSettings::Requests(config) => {
                HandlerInstance::Content(Arc::new(RequestsRetriever::new(config)?))
            }
            HandlerSettings::Rss(_) => HandlerInstance::Content(Arc::new(RssRetriever)),
            HandlerSettings::NullSummarization(_) => {
                HandlerInstance::Summarization(Arc::new(NullSummarizer))
            }
            HandlerSettings::Ollama(config) => {
                HandlerInstance::Summarization(Arc::new(OllamaSummarizer::new(config)?))
            }
            HandlerSettings::OpenAi(config) => {
                HandlerInstance::Summarization(Arc::new(OpenAiSummarizer::new(config)?))
            }
            HandlerSettings::NullNotification(_) => {
                HandlerInstance::Notification(Arc::new(NullNotifier))
            }
            HandlerSettings::Ntfy(config) => {
                HandlerInstance::Notification(Arc::new(NtfyNotifier::new(config)?))
            }
            HandlerSettings::Slack(config) => {
                HandlerInstance::Notification(Arc::new(SlackNotifier::new(config)?))
            }
            HandlerSettings::Matrix(config) => {
                HandlerInstance::Notification(Arc::new(MatrixNotifier::new(config)?))
            }
            HandlerSettings::Jira(config) => {
                HandlerInstance::Notification(Arc::new(JiraNotifier::new(config)?))
            }
        })
    }
}

/// A configured, ready-to-call handler
#[derive(Clone)]
pub enum HandlerInstance {
    Content(Arc<dyn ContentRetriever>),
    Summarization(Arc<dyn Summarizer>),
    Notification(Arc<dyn Notifier>),
}

impl fmt::Debug for HandlerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerInstance::Content(handler) => write!(f, "Content({})", handler.name()),
            HandlerInstance::Summarization(handler) => {
                write!(f, "Summarization({})", handler.name())
            }
            HandlerInstance::Notification(handler) => write!(f, "Notification({})", handler.name()),
        }
    }
}

/// Everything a notifier needs to announce an entry
#[derive(Debug, Clone)]
pub struct Notice {
    pub feed: Feed,
    pub entry: FeedEntry,
    pub read_link: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::schema::validate;
    use serde_json::json;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in HandlerKind::ALL {
            assert_eq!(HandlerKind::from_name(kind.name()), Some(kind));
            assert_eq!(kind.schema().handler, kind.name());
        }
        assert_eq!(HandlerKind::from_name("playwright"), None);
    }

    #[test]
    fn test_categories() {
        assert_eq!(HandlerKind::Rss.category(), HandlerCategory::ContentRetrieval);
        assert_eq!(HandlerKind::OpenAi.category(), HandlerCategory::Summarization);
        assert_eq!(HandlerKind::Slack.category(), HandlerCategory::Notification);
        assert_eq!(HandlerKind::Matrix.category(), HandlerCategory::Notification);
        assert_eq!(HandlerKind::Jira.category(), HandlerCategory::Notification);
    }

    #[test]
    fn test_descriptor_serializes_category_as_type() {
        let descriptor = HandlerDescriptor {
            name: "ntfy".to_string(),
            category: HandlerCategory::Notification,
            configured: false,
        };
        assert_eq!(
            serde_json::to_value(&descriptor).unwrap(),
            json!({"name": "ntfy", "type": "notification", "configured": false})
        );
    }

    #[test]
    fn test_settings_from_validated() {
        let validated = validate(&HandlerKind::Ntfy.schema(), &json!({"topic": "news"})).unwrap();
        let settings = HandlerSettings::from_validated(HandlerKind::Ntfy, validated).unwrap();

        let HandlerSettings::Ntfy(config) = &settings else {
            panic!("expected ntfy settings");
        };
        assert_eq!(config.root_url, "https://ntfy.sh/");

        let tagged = serde_json::to_value(&settings).unwrap();
        assert_eq!(tagged["type"], "ntfy");
        assert_eq!(tagged["config"]["topic"], "news");
    }

    #[test]
    fn test_openai_tag() {
        let validated = validate(&HandlerKind::OpenAi.schema(), &json!({"api_key": "k"})).unwrap();
        let settings = HandlerSettings::from_validated(HandlerKind::OpenAi, validated).unwrap();
        assert_eq!(serde_json::to_value(&settings).unwrap()["type"], "openai");
    }

    #[test]
    fn test_build_matches_category() {
        for kind in [HandlerKind::Rss, HandlerKind::NullSummarization, HandlerKind::NullNotification] {
            let validated = validate(&kind.schema(), &serde_json::Value::Null).unwrap();
            let instance = HandlerSettings::from_validated(kind, validated)
                .unwrap()
                .build()
                .unwrap();
            let category = match instance {
                HandlerInstance::Content(_) => HandlerCategory::ContentRetrieval,
                HandlerInstance::Summarization(_) => HandlerCategory::Summarization,
                HandlerInstance::Notification(_) => HandlerCategory::Notification,
            };
            assert_eq!(category, kind.category());
        }
    }
}
