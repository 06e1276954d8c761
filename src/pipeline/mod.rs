//! Enrichment pipeline: fetch -> metrics -> summarize -> notify.
//!
//! A run works on a snapshot taken when it starts (entry, feed, settings,
//! handler instances), so concurrent settings or handler changes only affect
//! later runs. Problems in optional stages are recorded as [`Diagnostic`]s
//! and the run carries on; only a missing content handler, a failed fetch or
//! a failed write stops it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let pipeline = EnrichmentPipeline::new(store, registry, settings, options, metrics);
//! let report = pipeline.enrich(&entry_id, false).await?;
//! assert_eq!(report.state, EntryState::Done);
//! ```

pub mod dispatch;
pub mod queue;

use chrono::{DateTime, Duration as TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::models::{Feed, FeedEntry};
use crate::handlers::content::RssRetriever;
use crate::handlers::{ContentRetriever, HandlerCategory, HandlerRegistry, Notifier, Summarizer};
use crate::ledger::{EntryWrite, FjallStore, LedgerError};
use crate::observability::Metrics;
use crate::reading;
use crate::settings::{Settings, SettingsStore};

pub use dispatch::{NotificationDispatcher, NotificationFailure};
pub use queue::{EnrichmentQueue, EnrichmentRequest, QueueError};

/// Storage capability the pipeline needs
pub trait EntryStore: Send + Sync {
    fn get_entry(&self, entry_id: &str) -> std::result::Result<Option<FeedEntry>, LedgerError>;
    fn get_feed(&self, feed_id: &str) -> std::result::Result<Option<Feed>, LedgerError>;
    /// Write enrichment output unless the stored entry is newer than
    /// `seen_updated_at`; the check and the write are atomic
    fn save_enriched(
        &self,
        entry: &FeedEntry,
        seen_updated_at: DateTime<Utc>,
    ) -> std::result::Result<EntryWrite, LedgerError>;
    fn record_diagnostics(&self, diagnostics: &[Diagnostic]) -> std::result::Result<(), LedgerError>;
}

impl EntryStore for FjallStore {
    fn get_entry(&self, entry_id: &str) -> std::result::Result<Option<FeedEntry>, LedgerError> {
        FjallStore::get_entry(self, entry_id)
    }

    fn get_feed(&self, feed_id: &str) -> std::result::Result<Option<Feed>, LedgerError> {
        FjallStore::get_feed(self, feed_id)
    }

    fn save_enriched(
        &self,
        entry: &FeedEntry,
        seen_updated_at: DateTime<Utc>,
    ) -> std::result::Result<EntryWrite, LedgerError> {
        self.put_enriched(entry, seen_updated_at)
    }

    fn record_diagnostics(&self, diagnostics: &[Diagnostic]) -> std::result::Result<(), LedgerError> {
        self.append_diagnostics(diagnostics)
    }
}

/// Upper bounds for each handler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub fetch: Duration,
    pub summarize: Duration,
    pub notify: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(30),
            summarize: Duration::from_secs(120),
            notify: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub timeouts: StageTimeouts,
    /// Longest preview excerpt, in characters
    pub preview_chars: usize,
    /// Public root used for read links in notifications
    pub base_url: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            timeouts: StageTimeouts::default(),
            preview_chars: 280,
            base_url: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Fetch,
    Metrics,
    Summarize,
    Store,
    Notify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    ContentFetched,
    MetricsComputed,
    Summarized,
    Done,
    Failed { stage: Stage, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    FetchFailure,
    HandlerUnavailable,
    SummarizationFailure,
    NotificationFailure,
    StaleWrite,
    StoreFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub entry_id: String,
    pub run_id: String,
    pub stage: Stage,
    pub kind: DiagnosticKind,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of one enrichment run
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentReport {
    pub entry_id: String,
    pub run_id: String,
    pub state: EntryState,
    pub diagnostics: Vec<Diagnostic>,
}

impl EnrichmentReport {
    pub fn has(&self, kind: DiagnosticKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("entry not found: {0}")]
    EntryNotFound(String),
    #[error("entry {0} is already being enriched")]
    AlreadyInFlight(String),
    #[error("ledger error: {0}")]
    Store(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Entry ids with a run in progress
#[derive(Default)]
struct InFlight {
    busy: Mutex<HashSet<String>>,
    released: Notify,
}

/// Marks an entry id busy until dropped
struct InFlightGuard {
    in_flight: Arc<InFlight>,
    entry_id: String,
}

impl InFlightGuard {
    fn try_acquire(in_flight: &Arc<InFlight>, entry_id: &str) -> Result<Self> {
        let mut busy = in_flight.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(entry_id.to_string()) {
            return Err(PipelineError::AlreadyInFlight(entry_id.to_string()));
        }
        Ok(Self {
            in_flight: in_flight.clone(),
            entry_id: entry_id.to_string(),
        })
    }

    /// Wait until no run holds `entry_id`, then take it
    async fn acquire(in_flight: &Arc<InFlight>, entry_id: &str) -> Self {
        loop {
            let released = in_flight.released.notified();
            tokio::pin!(released);
            // registered before the check so a release in between is not missed
            released.as_mut().enable();

            if let Ok(guard) = Self::try_acquire(in_flight, entry_id) {
                return guard;
            }
            released.await;
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.entry_id);
        self.in_flight.released.notify_waiters();
    }
}

/// Collects diagnostics for one run
struct RunLog {
    entry_id: String,
    run_id: String,
    diagnostics: Vec<Diagnostic>,
}

impl RunLog {
    fn record(&mut self, stage: Stage, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        debug!(entry_id = %self.entry_id, run_id = %self.run_id, ?stage, ?kind, %message, "Diagnostic");
        self.diagnostics.push(Diagnostic {
            entry_id: self.entry_id.clone(),
            run_id: self.run_id.clone(),
            stage,
            kind,
            message,
            recorded_at: Utc::now(),
        });
    }
}

/// Feed, handlers and settings a run works with
struct RunSnapshot {
    settings: Arc<Settings>,
    feed: Option<Feed>,
    content: Arc<dyn ContentRetriever>,
    summarizer: Option<Arc<dyn Summarizer>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl RunSnapshot {
    fn preview_only(&self) -> bool {
        self.feed.as_ref().is_some_and(|feed| feed.preview_only)
    }
}

pub struct EnrichmentPipeline {
    store: Arc<dyn EntryStore>,
    registry: Arc<HandlerRegistry>,
    settings: Arc<SettingsStore>,
    dispatcher: NotificationDispatcher,
    options: PipelineOptions,
    metrics: Arc<Metrics>,
    in_flight: Arc<InFlight>,
}

impl EnrichmentPipeline {
    pub fn new(
        store: Arc<dyn EntryStore>,
        registry: Arc<HandlerRegistry>,
        settings: Arc<SettingsStore>,
        options: PipelineOptions,
        metrics: Arc<Metrics>,
    ) -> Self {
        let dispatcher = NotificationDispatcher::new(
            registry.clone(),
            options.base_url.clone(),
            options.timeouts.notify,
        );
        Self {
            store,
            registry,
            settings,
            dispatcher,
            options,
            metrics,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Run the pipeline for one entry.
    ///
    /// An entry that was already enriched is left alone unless `force` is set.
    /// Fails with [`PipelineError::AlreadyInFlight`] while another run holds
    /// the entry.
    pub async fn enrich(&self, entry_id: &str, force: bool) -> Result<EnrichmentReport> {
        let guard = InFlightGuard::try_acquire(&self.in_flight, entry_id)?;
        self.enrich_guarded(guard, entry_id, force).await
    }

    /// Like [`enrich`](Self::enrich), but waits for a run already in flight
    /// for the entry to finish and then runs against the stored state.
    pub async fn enrich_when_idle(&self, entry_id: &str, force: bool) -> Result<EnrichmentReport> {
        let guard = InFlightGuard::acquire(&self.in_flight, entry_id).await;
        self.enrich_guarded(guard, entry_id, force).await
    }

    async fn enrich_guarded(
        &self,
        _guard: InFlightGuard,
        entry_id: &str,
        force: bool,
    ) -> Result<EnrichmentReport> {
        let entry = self
            .store
            .get_entry(entry_id)?
            .ok_or_else(|| PipelineError::EntryNotFound(entry_id.to_string()))?;

        let mut log = RunLog {
            entry_id: entry_id.to_string(),
            run_id: Uuid::now_v7().to_string(),
            diagnostics: Vec::new(),
        };

        if entry.is_enriched() && !force {
            debug!(entry_id, "Entry already enriched, skipping");
            return Ok(self.finish(log, EntryState::Done));
        }

        info!(entry_id, run_id = %log.run_id, feed_id = %entry.feed_id, "Enrichment started");
        let state = self.run(&entry, &mut log).await;

        match &state {
            EntryState::Done => {
                self.metrics.run_completed();
                info!(entry_id, run_id = %log.run_id, "Enrichment finished");
            }
            EntryState::Failed { stage, reason } => {
                self.metrics.run_failed();
                error!(entry_id, run_id = %log.run_id, ?stage, %reason, "Enrichment failed");
            }
            _ => {}
        }

        if let Err(e) = self.store.record_diagnostics(&log.diagnostics) {
            warn!(entry_id, error = %e, "Failed to persist diagnostics");
        }
        Ok(self.finish(log, state))
    }

    fn finish(&self, log: RunLog, state: EntryState) -> EnrichmentReport {
        EnrichmentReport {
            entry_id: log.entry_id,
            run_id: log.run_id,
            state,
            diagnostics: log.diagnostics,
        }
    }

    fn snapshot(&self, entry: &FeedEntry, log: &mut RunLog) -> std::result::Result<RunSnapshot, EntryState> {
        let settings = self.settings.get();

        let feed = match self.store.get_feed(&entry.feed_id) {
            Ok(feed) => feed,
            Err(e) => {
                let reason = e.to_string();
                log.record(Stage::Resolve, DiagnosticKind::StoreFailure, &reason);
                return Err(EntryState::Failed {
                    stage: Stage::Resolve,
                    reason,
                });
            }
        };

        let content: Arc<dyn ContentRetriever> = match &feed {
            Some(feed) if !feed.retrieve_content => {
                debug!(feed_id = %feed.id, "Feed does not retrieve content, using feed-supplied content");
                Arc::new(RssRetriever)
            }
            _ => {
                let content_key = settings.handler_key(HandlerCategory::ContentRetrieval);
                match self.registry.content_retriever(content_key) {
                    Ok(handler) => handler,
                    Err(e) => {
                        let reason = e.to_string();
                        log.record(Stage::Resolve, DiagnosticKind::HandlerUnavailable, &reason);
                        return Err(EntryState::Failed {
                            stage: Stage::Resolve,
                            reason,
                        });
                    }
                }
            }
        };

        let summary_key = settings.handler_key(HandlerCategory::Summarization);
        let summarizer = if summary_key.is_empty() {
            None
        } else {
            match self.registry.summarizer(summary_key) {
                Ok(handler) => Some(handler),
                Err(e) => {
                    log.record(Stage::Summarize, DiagnosticKind::HandlerUnavailable, e.to_string());
                    None
                }
            }
        };

        let notifier = self.dispatcher.resolve(&settings);
        Ok(RunSnapshot {
            settings,
            feed,
            content,
            summarizer,
            notifier,
        })
    }

    async fn run(&self, entry: &FeedEntry, log: &mut RunLog) -> EntryState {
        // 1. resolve
        let snapshot = match self.snapshot(entry, log) {
            Ok(snapshot) => snapshot,
            Err(state) => return state,
        };

        let enriched = if snapshot.preview_only() {
            debug!(entry_id = %entry.id, "Preview-only feed, skipping fetch and summary");
            FeedEntry {
                content: String::new(),
                summary: String::new(),
                preview: self.feed_preview(entry),
                word_count: 0,
                reading_level: 0,
                reading_time: 0,
                enriched_at: Some(Utc::now()),
                ..entry.clone()
            }
        } else {
            match self.enrich_content(entry, &snapshot, log).await {
                Ok(enriched) => enriched,
                Err(state) => return state,
            }
        };

        // 5. store, unless the entry changed underneath us
        match self.store.save_enriched(&enriched, entry.updated_at) {
            Ok(EntryWrite::Written) => {}
            Ok(EntryWrite::Stale { updated_at }) => {
                self.metrics.stale_write();
                let reason = format!("stored entry was updated at {updated_at} after this run started");
                warn!(entry_id = %entry.id, %reason, "Discarding stale enrichment");
                log.record(Stage::Store, DiagnosticKind::StaleWrite, &reason);
                return EntryState::Failed {
                    stage: Stage::Store,
                    reason,
                };
            }
            Err(e) => {
                let reason = e.to_string();
                log.record(Stage::Store, DiagnosticKind::StoreFailure, &reason);
                return EntryState::Failed {
                    stage: Stage::Store,
                    reason,
                };
            }
        }

        // 6. notify new, recent entries
        if entry.enriched_at.is_none() {
            self.maybe_notify(
                &snapshot.settings,
                snapshot.notifier.clone(),
                snapshot.feed.as_ref(),
                &enriched,
                log,
            )
            .await;
        }

        EntryState::Done
    }

    /// Stages 2-4: fetch, metrics, summary
    async fn enrich_content(
        &self,
        entry: &FeedEntry,
        snapshot: &RunSnapshot,
        log: &mut RunLog,
    ) -> std::result::Result<FeedEntry, EntryState> {
        let timeouts = self.options.timeouts;

        // 2. fetch
        let fetched = tokio::time::timeout(timeouts.fetch, snapshot.content.retrieve(entry)).await;
        let content = match fetched {
            Ok(Ok(content)) if !content.trim().is_empty() => content,
            Ok(Ok(_)) => {
                return Err(self.fetch_failed(log, entry, "retrieved content is empty".to_string()));
            }
            Ok(Err(e)) => return Err(self.fetch_failed(log, entry, e.to_string())),
            Err(_) => {
                return Err(self.fetch_failed(
                    log,
                    entry,
                    format!("timed out after {:?}", timeouts.fetch),
                ));
            }
        };
        let mut state = EntryState::ContentFetched;
        debug!(entry_id = %entry.id, handler = snapshot.content.name(), chars = content.len(), ?state, "Content fetched");

        // 3. metrics
        let metrics = reading::compute(&content, snapshot.settings.reading_speed);
        state = EntryState::MetricsComputed;
        debug!(entry_id = %entry.id, word_count = metrics.word_count, ?state, "Metrics computed");

        // 4. summarize
        let mut summary = String::new();
        if let Some(summarizer) = &snapshot.summarizer {
            let result =
                tokio::time::timeout(timeouts.summarize, summarizer.summarize(entry, &content)).await;
            let failure = match result {
                Ok(Ok(Some(text))) => {
                    summary = text;
                    state = EntryState::Summarized;
                    None
                }
                Ok(Ok(None)) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("timed out after {:?}", timeouts.summarize)),
            };
            if let Some(reason) = failure {
                warn!(entry_id = %entry.id, handler = summarizer.name(), %reason, "Summarization failed");
                self.metrics.summarization_failed();
                log.record(Stage::Summarize, DiagnosticKind::SummarizationFailure, reason);
            }
        }
        debug!(entry_id = %entry.id, ?state, "Summarize stage finished");

        let preview = if !summary.is_empty() {
            reading::excerpt(&reading::plain_text(&summary), self.options.preview_chars)
        } else if !entry.feed_preview.trim().is_empty() {
            self.feed_preview(entry)
        } else {
            reading::excerpt(&content, self.options.preview_chars)
        };

        Ok(FeedEntry {
            content,
            summary,
            preview,
            word_count: metrics.word_count,
            reading_level: metrics.reading_level,
            reading_time: metrics.reading_time,
            enriched_at: Some(Utc::now()),
            ..entry.clone()
        })
    }

    fn feed_preview(&self, entry: &FeedEntry) -> String {
        reading::excerpt(&reading::plain_text(&entry.feed_preview), self.options.preview_chars)
    }

    fn fetch_failed(&self, log: &mut RunLog, entry: &FeedEntry, reason: String) -> EntryState {
        warn!(entry_id = %entry.id, url = %entry.url, %reason, "Content retrieval failed");
        self.metrics.fetch_failed();
        log.record(Stage::Fetch, DiagnosticKind::FetchFailure, &reason);
        EntryState::Failed {
            stage: Stage::Fetch,
            reason,
        }
    }

    async fn maybe_notify(
        &self,
        settings: &Settings,
        notifier: Option<Arc<dyn Notifier>>,
        feed: Option<&Feed>,
        entry: &FeedEntry,
        log: &mut RunLog,
    ) {
        let window_start = Utc::now() - TimeDelta::hours(i64::from(settings.recent_hours));
        if entry.latest_timestamp() < window_start {
            debug!(entry_id = %entry.id, "Entry outside recent window, not notifying");
            return;
        }

        let Some(feed) = feed else {
            debug!(entry_id = %entry.id, feed_id = %entry.feed_id, "Feed unknown, not notifying");
            return;
        };
        if !feed.notify {
            debug!(entry_id = %entry.id, feed_id = %feed.id, "Feed notifications off");
            return;
        }

        match self.dispatcher.dispatch(settings, notifier, feed, entry).await {
            Ok(()) => {
                if settings.send_notification {
                    self.metrics.notification_sent();
                }
            }
            Err(e) => {
                self.metrics.notification_failed();
                let kind = match e {
                    NotificationFailure::HandlerUnavailable(_) => DiagnosticKind::HandlerUnavailable,
                    _ => DiagnosticKind::NotificationFailure,
                };
                warn!(entry_id = %entry.id, error = %e, "Notification failed");
                log.record(Stage::Notify, kind, e.to_string());
            }
        }
    }
}
