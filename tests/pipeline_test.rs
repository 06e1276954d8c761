//! Enrichment scenarios against mock HTTP services

use chrono::{Duration as TimeDelta, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gleaner::api::models::{Feed, FeedEntry, url_id};
use gleaner::handlers::{HandlerCategory, HandlerRegistry};
use gleaner::ledger::FjallStore;
use gleaner::observability::Metrics;
use gleaner::pipeline::{
    DiagnosticKind, EnrichmentPipeline, EnrichmentQueue, EnrichmentRequest, EntryState,
    PipelineOptions, Stage, StageTimeouts,
};
use gleaner::settings::{SettingsPatch, SettingsStore};

struct Harness {
    store: Arc<FjallStore>,
    registry: Arc<HandlerRegistry>,
    settings: Arc<SettingsStore>,
    metrics: Arc<Metrics>,
    pipeline: Arc<EnrichmentPipeline>,
    _temp_dir: TempDir,
}

impl Harness {
    fn new(summarize_timeout: Duration) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FjallStore::open(temp_dir.path().join("ledger")).unwrap());
        let registry = Arc::new(HandlerRegistry::with_builtins(Some(store.clone())));
        let settings = Arc::new(
            SettingsStore::load(Some(store.clone()), &registry, &SettingsPatch::default()).unwrap(),
        );
        let metrics = Arc::new(Metrics::new());

        let options = PipelineOptions {
            timeouts: StageTimeouts {
                fetch: Duration::from_secs(5),
                summarize: summarize_timeout,
                notify: Duration::from_secs(5),
            },
            preview_chars: 120,
            base_url: "http://reader.test".to_string(),
        };
        let pipeline = Arc::new(EnrichmentPipeline::new(
            store.clone(),
            registry.clone(),
            settings.clone(),
            options,
            metrics.clone(),
        ));

        Self {
            store,
            registry,
            settings,
            metrics,
            pipeline,
            _temp_dir: temp_dir,
        }
    }

    fn activate(&self, category: HandlerCategory, name: &str) {
        self.settings
            .update(SettingsPatch::handler_key(category, name), &self.registry)
            .unwrap();
    }

    fn add_entry(&self, url: &str, published_ago: TimeDelta) -> FeedEntry {
        self.add_feed_entry(url, published_ago, "")
    }

    /// Store an entry whose feed shipped `feed_content`
    fn add_feed_entry(&self, url: &str, published_ago: TimeDelta, feed_content: &str) -> FeedEntry {
        let feed = Feed {
            id: url_id("https://blog.example.com/feed.xml"),
            name: "Example Blog".to_string(),
            url: "https://blog.example.com/feed.xml".to_string(),
            category: "tech".to_string(),
            notify: true,
            notify_destination: None,
            preview_only: false,
            retrieve_content: true,
        };
        self.store.put_feed(&feed).unwrap();

        let published_at = Utc::now() - published_ago;
        let entry = FeedEntry {
            id: url_id(url),
            feed_id: feed.id.clone(),
            feed_name: feed.name.clone(),
            title: "A long article".to_string(),
            url: url.to_string(),
            published_at,
            updated_at: published_at,
            byline: None,
            feed_preview: String::new(),
            feed_content: feed_content.to_string(),
            preview: String::new(),
            content: String::new(),
            summary: String::new(),
            word_count: 0,
            reading_level: 0,
            reading_time: 0,
            enriched_at: None,
        };
        self.store.upsert_entry(entry.clone()).unwrap();
        entry
    }
}

fn article_page(words: usize) -> String {
    format!(
        "<html><head><title>t</title><script>var x = 1;</script></head>\
         <body><nav>Home About</nav><article><p>{}</p></article></body></html>",
        "word ".repeat(words)
    )
}

async fn mount_article(server: &MockServer, route: &str, words: usize) {
    mount_slow_article(server, route, words, Duration::ZERO).await;
}

async fn mount_slow_article(server: &MockServer, route: &str, words: usize, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(article_page(words))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_and_measure_article() {
    let server = MockServer::start().await;
    mount_article(&server, "/article", 1190).await;

    let harness = Harness::new(Duration::from_secs(5));
    let entry = harness.add_entry(&format!("{}/article", server.uri()), TimeDelta::days(30));

    let report = harness.pipeline.enrich(&entry.id, false).await.unwrap();
    assert_eq!(report.state, EntryState::Done);
    assert!(report.diagnostics.is_empty());

    let stored = harness.store.get_entry(&entry.id).unwrap().unwrap();
    assert_eq!(stored.word_count, 1190);
    assert_eq!(stored.reading_time, 5);
    assert!(!stored.content.contains("Home About"));
    assert!(stored.preview.ends_with("..."));
    assert!(stored.summary.is_empty());
    assert!(stored.is_enriched());
}

#[tokio::test]
async fn test_summarizer_timeout_keeps_content() {
    let server = MockServer::start().await;
    mount_article(&server, "/article", 300).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": {"role": "assistant", "content": "Too late"}}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let harness = Harness::new(Duration::from_millis(100));
    harness
        .registry
        .configure("ollama", &json!({"base_url": server.uri(), "model": "llama3"}))
        .unwrap();
    harness.activate(HandlerCategory::Summarization, "ollama");

    let entry = harness.add_entry(&format!("{}/article", server.uri()), TimeDelta::days(30));
    let report = harness.pipeline.enrich(&entry.id, false).await.unwrap();

    assert_eq!(report.state, EntryState::Done);
    assert!(report.has(DiagnosticKind::SummarizationFailure));

    let stored = harness.store.get_entry(&entry.id).unwrap().unwrap();
    assert_eq!(stored.word_count, 300);
    assert_eq!(stored.reading_time, 2);
    assert!(!stored.content.is_empty());
    assert!(stored.summary.is_empty());
    assert_eq!(harness.metrics.snapshot().summarization_failures, 1);

    let persisted = harness.store.list_diagnostics(&entry.id).unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].kind, DiagnosticKind::SummarizationFailure);
    assert_eq!(persisted[0].stage, Stage::Summarize);
}

#[tokio::test]
async fn test_summary_becomes_preview() {
    let server = MockServer::start().await;
    mount_article(&server, "/article", 50).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"model": "llama3", "stream": false})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": {"role": "assistant", "content": "  A short summary.  "}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(Duration::from_secs(5));
    harness
        .registry
        .configure("ollama", &json!({"base_url": server.uri(), "model": "llama3"}))
        .unwrap();
    harness.activate(HandlerCategory::Summarization, "ollama");

    let entry = harness.add_entry(&format!("{}/article", server.uri()), TimeDelta::days(30));
    let report = harness.pipeline.enrich(&entry.id, false).await.unwrap();
    assert_eq!(report.state, EntryState::Done);

    let stored = harness.store.get_entry(&entry.id).unwrap().unwrap();
    assert_eq!(stored.summary, "A short summary.");
    assert_eq!(stored.preview, "A short summary.");
}

#[tokio::test]
async fn test_no_content_handler() {
    let harness = Harness::new(Duration::from_secs(5));
    harness.activate(HandlerCategory::ContentRetrieval, "");
    let entry = harness.add_entry("https://blog.example.com/a", TimeDelta::days(30));

    let report = harness.pipeline.enrich(&entry.id, false).await.unwrap();

    assert!(matches!(
        report.state,
        EntryState::Failed {
            stage: Stage::Resolve,
            ..
        }
    ));
    assert!(report.has(DiagnosticKind::HandlerUnavailable));

    let stored = harness.store.get_entry(&entry.id).unwrap().unwrap();
    assert_eq!(stored.word_count, 0);
    assert_eq!(stored.reading_time, 0);
    assert!(!stored.is_enriched());
}

#[tokio::test]
async fn test_fetch_failure_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let harness = Harness::new(Duration::from_secs(5));
    let entry = harness.add_entry(&format!("{}/gone", server.uri()), TimeDelta::days(30));

    let report = harness.pipeline.enrich(&entry.id, false).await.unwrap();

    assert!(matches!(
        report.state,
        EntryState::Failed {
            stage: Stage::Fetch,
            ..
        }
    ));
    assert!(report.has(DiagnosticKind::FetchFailure));
    assert_eq!(harness.metrics.snapshot().fetch_failures, 1);
    assert!(!harness.store.get_entry(&entry.id).unwrap().unwrap().is_enriched());
}

#[tokio::test]
async fn test_reenrichment_is_idempotent() {
    let server = MockServer::start().await;
    mount_article(&server, "/article", 400).await;

    let harness = Harness::new(Duration::from_secs(5));
    let entry = harness.add_entry(&format!("{}/article", server.uri()), TimeDelta::days(30));

    harness.pipeline.enrich(&entry.id, false).await.unwrap();
    let first = harness.store.get_entry(&entry.id).unwrap().unwrap();

    let report = harness.pipeline.enrich(&entry.id, true).await.unwrap();
    assert_eq!(report.state, EntryState::Done);
    let second = harness.store.get_entry(&entry.id).unwrap().unwrap();

    assert_eq!(first.content, second.content);
    assert_eq!(first.preview, second.preview);
    assert_eq!(first.summary, second.summary);
    assert_eq!(
        (first.word_count, first.reading_level, first.reading_time),
        (second.word_count, second.reading_level, second.reading_time)
    );
}

#[tokio::test]
async fn test_recent_entry_notifies_ntfy() {
    let server = MockServer::start().await;
    mount_article(&server, "/fresh", 120).await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(json!({
            "topic": "gleaner-news",
            "title": "Gleaner: New Feed Entry",
            "message": "Example Blog - A long article"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(Duration::from_secs(5));
    harness
        .registry
        .configure(
            "ntfy",
            &json!({"topic": "gleaner-news", "root_url": format!("{}/", server.uri())}),
        )
        .unwrap();
    harness.activate(HandlerCategory::Notification, "ntfy");

    let entry = harness.add_entry(&format!("{}/fresh", server.uri()), TimeDelta::hours(1));
    let report = harness.pipeline.enrich(&entry.id, false).await.unwrap();

    assert_eq!(report.state, EntryState::Done);
    assert!(report.diagnostics.is_empty());
    assert_eq!(harness.metrics.snapshot().notifications_sent, 1);

    // A forced re-run of an already enriched entry does not notify again
    harness.pipeline.enrich(&entry.id, true).await.unwrap();
    assert_eq!(harness.metrics.snapshot().notifications_sent, 1);
}

#[tokio::test]
async fn test_notification_failure_is_not_fatal() {
    let server = MockServer::start().await;
    mount_article(&server, "/fresh", 120).await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let harness = Harness::new(Duration::from_secs(5));
    harness
        .registry
        .configure("ntfy", &json!({"topic": "t", "root_url": format!("{}/", server.uri())}))
        .unwrap();
    harness.activate(HandlerCategory::Notification, "ntfy");

    let entry = harness.add_entry(&format!("{}/fresh", server.uri()), TimeDelta::hours(1));
    let report = harness.pipeline.enrich(&entry.id, false).await.unwrap();

    assert_eq!(report.state, EntryState::Done);
    assert!(report.has(DiagnosticKind::NotificationFailure));
    assert!(harness.store.get_entry(&entry.id).unwrap().unwrap().is_enriched());
}

#[tokio::test]
async fn test_workers_drain_queue() {
    let server = MockServer::start().await;
    mount_article(&server, "/one", 10).await;
    mount_article(&server, "/two", 20).await;

    let harness = Harness::new(Duration::from_secs(5));
    let one = harness.add_entry(&format!("{}/one", server.uri()), TimeDelta::days(30));
    let two = harness.add_entry(&format!("{}/two", server.uri()), TimeDelta::days(30));

    let (queue, receivers) = EnrichmentQueue::new(2, 8, harness.metrics.clone());
    let workers = EnrichmentQueue::spawn_workers(harness.pipeline.clone(), receivers);

    for entry in [&one, &two] {
        queue
            .enqueue(EnrichmentRequest {
                entry_id: entry.id.clone(),
                feed_id: entry.feed_id.clone(),
                force: false,
            })
            .await
            .unwrap();
    }

    // Closing the queue lets the workers finish what they hold and stop
    drop(queue);
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(harness.store.get_entry(&one.id).unwrap().unwrap().word_count, 10);
    assert_eq!(harness.store.get_entry(&two.id).unwrap().unwrap().word_count, 20);
    assert_eq!(harness.metrics.snapshot().runs_completed, 2);
}

#[tokio::test]
async fn test_rss_reenrichment_keeps_paragraphs() {
    let harness = Harness::new(Duration::from_secs(5));
    harness.activate(HandlerCategory::ContentRetrieval, "rss");

    let entry = harness.add_feed_entry(
        "https://blog.example.com/paragraphs",
        TimeDelta::days(30),
        "<p>One here.</p><p>Two there.</p>",
    );

    harness.pipeline.enrich(&entry.id, false).await.unwrap();
    let first = harness.store.get_entry(&entry.id).unwrap().unwrap();
    assert_eq!(first.content, "One here.\n\nTwo there.");

    harness.pipeline.enrich(&entry.id, true).await.unwrap();
    let second = harness.store.get_entry(&entry.id).unwrap().unwrap();
    assert_eq!(second.content, first.content);
    assert_eq!(second.preview, first.preview);
    assert_eq!(second.word_count, first.word_count);
}

#[tokio::test]
async fn test_update_during_run_discards_stale_output() {
    let server = MockServer::start().await;
    mount_slow_article(&server, "/slow", 200, Duration::from_millis(500)).await;

    let harness = Harness::new(Duration::from_secs(5));
    let entry = harness.add_entry(&format!("{}/slow", server.uri()), TimeDelta::days(30));

    let run = {
        let pipeline = harness.pipeline.clone();
        let entry_id = entry.id.clone();
        tokio::spawn(async move { pipeline.enrich(&entry_id, false).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the feed republishes the item while the article is still downloading
    let mut newer = entry.clone();
    newer.title = "A longer article".to_string();
    newer.updated_at = entry.updated_at + TimeDelta::minutes(10);
    harness.store.upsert_entry(newer.clone()).unwrap();

    let report = run.await.unwrap().unwrap();
    assert!(matches!(
        report.state,
        EntryState::Failed {
            stage: Stage::Store,
            ..
        }
    ));
    assert!(report.has(DiagnosticKind::StaleWrite));
    assert_eq!(harness.metrics.snapshot().stale_writes, 1);

    let stored = harness.store.get_entry(&entry.id).unwrap().unwrap();
    assert_eq!(stored.title, "A longer article");
    assert_eq!(stored.updated_at, newer.updated_at);
    assert!(!stored.is_enriched());
    assert_eq!(stored.word_count, 0);

    let persisted = harness.store.list_diagnostics(&entry.id).unwrap();
    assert!(persisted.iter().any(|d| d.kind == DiagnosticKind::StaleWrite && d.stage == Stage::Store));
}

#[tokio::test]
async fn test_run_keeps_handlers_from_its_start() {
    let server = MockServer::start().await;
    mount_article(&server, "/fresh", 80).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": {"role": "assistant", "content": "Slow summary."}}))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(json!({"topic": "gleaner-news"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(Duration::from_secs(5));
    harness
        .registry
        .configure("ollama", &json!({"base_url": server.uri(), "model": "llama3"}))
        .unwrap();
    harness
        .registry
        .configure(
            "ntfy",
            &json!({"topic": "gleaner-news", "root_url": format!("{}/", server.uri())}),
        )
        .unwrap();
    harness.activate(HandlerCategory::Summarization, "ollama");
    harness.activate(HandlerCategory::Notification, "ntfy");

    let entry = harness.add_entry(&format!("{}/fresh", server.uri()), TimeDelta::hours(1));
    let run = {
        let pipeline = harness.pipeline.clone();
        let entry_id = entry.id.clone();
        tokio::spawn(async move { pipeline.enrich(&entry_id, false).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // switch both handlers away while the summary is still being generated
    harness.activate(HandlerCategory::Summarization, "null_summarization");
    harness.activate(HandlerCategory::Notification, "null_notification");

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.state, EntryState::Done);
    assert!(report.diagnostics.is_empty());

    let stored = harness.store.get_entry(&entry.id).unwrap().unwrap();
    assert_eq!(stored.summary, "Slow summary.");
    assert_eq!(harness.metrics.snapshot().notifications_sent, 1);
    assert_eq!(
        harness.settings.get().summarization_handler_key,
        "null_summarization"
    );
}

#[tokio::test]
async fn test_worker_waits_for_run_in_flight() {
    let server = MockServer::start().await;
    mount_slow_article(&server, "/slow", 30, Duration::from_millis(300)).await;

    let harness = Harness::new(Duration::from_secs(5));
    let entry = harness.add_entry(&format!("{}/slow", server.uri()), TimeDelta::days(30));

    let direct = {
        let pipeline = harness.pipeline.clone();
        let entry_id = entry.id.clone();
        tokio::spawn(async move { pipeline.enrich(&entry_id, false).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (queue, receivers) = EnrichmentQueue::new(1, 8, harness.metrics.clone());
    let workers = EnrichmentQueue::spawn_workers(harness.pipeline.clone(), receivers);
    queue
        .enqueue(EnrichmentRequest {
            entry_id: entry.id.clone(),
            feed_id: entry.feed_id.clone(),
            force: true,
        })
        .await
        .unwrap();

    drop(queue);
    for worker in workers {
        worker.await.unwrap();
    }
    assert_eq!(direct.await.unwrap().unwrap().state, EntryState::Done);

    // the queued request ran after the direct one instead of being dropped
    assert_eq!(harness.metrics.snapshot().runs_completed, 2);
    assert_eq!(harness.store.get_entry(&entry.id).unwrap().unwrap().word_count, 30);
}
