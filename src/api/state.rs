use std::sync::Arc;

use tokio::sync::mpsc::Receiver;
use tracing::info;

use crate::config::Config;
use crate::handlers::HandlerRegistry;
use crate::ledger::FjallStore;
use crate::observability::Metrics;
use crate::pipeline::{EnrichmentPipeline, EnrichmentQueue, EnrichmentRequest, EntryStore};
use crate::settings::{SettingsError, SettingsStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<HandlerRegistry>,
    pub settings: Arc<SettingsStore>,
    pub store: Arc<FjallStore>,
    pub pipeline: Arc<EnrichmentPipeline>,
    pub queue: Arc<EnrichmentQueue>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire up every component on top of an opened ledger.
    ///
    /// Persisted handler configs and settings win over the initial values in
    /// `config`. The returned receivers feed the enrichment workers.
    pub fn new(
        config: Config,
        store: Arc<FjallStore>,
    ) -> Result<(Self, Vec<Receiver<EnrichmentRequest>>), SettingsError> {
        let registry = Arc::new(HandlerRegistry::with_builtins(Some(store.clone())));
        registry.restore()?;
        registry.seed(&config.handlers)?;

        let settings = Arc::new(SettingsStore::load(
            Some(store.clone()),
            &registry,
            &config.settings,
        )?);

        let metrics = Arc::new(Metrics::new());
        let entry_store: Arc<dyn EntryStore> = store.clone();
        let pipeline = Arc::new(EnrichmentPipeline::new(
            entry_store,
            registry.clone(),
            settings.clone(),
            config.pipeline.options(&config.server.base_url),
            metrics.clone(),
        ));

        let (queue, receivers) = EnrichmentQueue::new(
            config.pipeline.workers,
            config.pipeline.channel_size,
            metrics.clone(),
        );

        info!(
            handlers = registry.list(None).len(),
            workers = queue.num_workers(),
            "Application state initialized"
        );

        let state = Self {
            config: Arc::new(config),
            registry,
            settings,
            store,
            pipeline,
            queue: Arc::new(queue),
            metrics,
        };
        Ok((state, receivers))
    }
}
