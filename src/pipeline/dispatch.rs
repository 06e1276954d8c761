use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::models::{Feed, FeedEntry};
use crate::handlers::{HandlerError, HandlerRegistry, Notice, Notifier};
use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum NotificationFailure {
    #[error("no notification handler available (key '{0}')")]
    HandlerUnavailable(String),
    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
    #[error("notification handler failed: {0}")]
    Handler(#[from] HandlerError),
}

/// Sends entry notices through the active notification handler
pub struct NotificationDispatcher {
    registry: Arc<HandlerRegistry>,
    base_url: String,
    timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn read_link(&self, entry: &FeedEntry) -> String {
        format!("{}/read/{}", self.base_url, entry.id)
    }

    /// Resolve the notifier named by `settings`, if any
    pub fn resolve(&self, settings: &Settings) -> Option<Arc<dyn Notifier>> {
        if settings.notification_handler_key.is_empty() {
            return None;
        }
        self.registry.notifier(&settings.notification_handler_key).ok()
    }

    /// Notify with an already snapshotted settings value and notifier.
    ///
    /// A no-op when notifications are switched off.
    pub async fn dispatch(
        &self,
        settings: &Settings,
        notifier: Option<Arc<dyn Notifier>>,
        feed: &Feed,
        entry: &FeedEntry,
    ) -> Result<(), NotificationFailure> {
        if !settings.send_notification {
            debug!(entry_id = %entry.id, "Notifications disabled");
            return Ok(());
        }

        let Some(notifier) = notifier else {
            warn!(
                entry_id = %entry.id,
                handler = %settings.notification_handler_key,
                "No notification handler available"
            );
            return Err(NotificationFailure::HandlerUnavailable(
                settings.notification_handler_key.clone(),
            ));
        };

        let notice = Notice {
            feed: feed.clone(),
            entry: entry.clone(),
            read_link: self.read_link(entry),
        };

        match tokio::time::timeout(self.timeout, notifier.notify(&notice)).await {
            Ok(Ok(())) => {
                info!(entry_id = %entry.id, handler = notifier.name(), "Notification sent");
                Ok(())
            }
            Ok(Err(e)) => Err(NotificationFailure::Handler(e)),
            Err(_) => Err(NotificationFailure::Timeout(self.timeout)),
        }
    }
}
