use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::collections::HashMap;
use tracing::{debug, info};

use super::{
    error::ApiError,
    models::{
        AboutResponse, EntryAccepted, EntryFilter, EntrySummary, FeedSummary, HandlerConfigUpdate,
        HandlerConfigView, HandlerSettingsResponse, HealthResponse, NewEntry, NewFeed,
        OnboardingResponse, ReadQuery, ReadResponse, SettingsResponse,
    },
    state::AppState,
    utils::read_json,
    validation::{canonical_url, validate_new_entry, validate_new_feed},
};
use crate::handlers::HandlerCategory;
use crate::ledger::EntryUpsert;
use crate::pipeline::{EnrichmentRequest, PipelineError};
use crate::settings::{SettingsPatch, Theme};

const RUNTIME_VERSION: &str = concat!("rust ", env!("CARGO_PKG_RUST_VERSION"));
const FRAMEWORK_VERSION: &str = "axum 0.8";
const STORAGE_HANDLER: &str = "fjall";

fn max_payload(state: &AppState) -> usize {
    state.config.server.max_payload_bytes as usize
}

fn settings_response(state: &AppState) -> SettingsResponse {
    SettingsResponse {
        themes: Theme::ALL.to_vec(),
        content_handler_choices: state.registry.choices(HandlerCategory::ContentRetrieval),
        summarization_handler_choices: state.registry.choices(HandlerCategory::Summarization),
        notification_handler_choices: state.registry.choices(HandlerCategory::Notification),
        update_status: false,
        update_exception: None,
        settings: (*state.settings.get()).clone(),
    }
}

fn handler_settings_response(state: &AppState, name: &str) -> Result<HandlerSettingsResponse, ApiError> {
    let schema = state.registry.schema(name)?;
    let config = state
        .registry
        .config(name)?
        .map(|value| serde_json::to_string_pretty(&value))
        .transpose()?;

    Ok(HandlerSettingsResponse {
        handler: HandlerConfigView {
            handler_type: name.to_string(),
            config,
        },
        schema,
        settings: (*state.settings.get()).clone(),
        update_status: false,
        update_exception: None,
    })
}

/// Settings page (GET /settings)
pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(settings_response(&state))
}

/// Settings update (PUT|POST /settings)
///
/// Accepts a partial [`Settings`](crate::settings::Settings); absent fields
/// keep their value. The whole update is rejected if any field is invalid
/// or a handler key names a handler that is not configured.
pub async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<SettingsResponse>, ApiError> {
    let patch: SettingsPatch = read_json(&headers, body, max_payload(&state)).await?;
    state.settings.update(patch, &state.registry)?;
    Ok(Json(settings_response(&state)))
}

/// Handler config page (GET /settings/{handler})
pub async fn get_handler_settings(
    State(state): State<AppState>,
    Path(handler): Path<String>,
) -> Result<Json<HandlerSettingsResponse>, ApiError> {
    Ok(Json(handler_settings_response(&state, &handler)?))
}

/// Handler config update (PUT|POST /settings/{handler})
///
/// `config` may be a JSON object or JSON text. The previous config stays in
/// place when validation fails.
pub async fn update_handler_settings(
    State(state): State<AppState>,
    Path(handler): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<HandlerSettingsResponse>, ApiError> {
    let update: HandlerConfigUpdate = read_json(&headers, body, max_payload(&state)).await?;

    if let Some(handler_type) = update.handler_type.as_deref() {
        if handler_type != handler {
            return Err(ApiError::InvalidPayload(format!(
                "type '{handler_type}' does not match handler '{handler}'"
            )));
        }
    }

    let config = update.config.into_value()?;
    state.registry.configure(&handler, &config)?;
    info!(%handler, "Handler config updated via API");

    Ok(Json(handler_settings_response(&state, &handler)?))
}

/// Handler catalog (GET /util/list-handlers)
pub async fn list_handlers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list(None))
}

/// Feed picker (GET /util/list-feeds)
pub async fn list_feeds(State(state): State<AppState>) -> Result<Json<Vec<FeedSummary>>, ApiError> {
    let feeds = state
        .store
        .list_feeds()?
        .into_iter()
        .map(|feed| FeedSummary {
            id: feed.id,
            name: feed.name,
        })
        .collect();
    Ok(Json(feeds))
}

/// Entry picker (GET /util/list-feed-entries?feed_id=)
pub async fn list_feed_entries(
    State(state): State<AppState>,
    Query(filter): Query<EntryFilter>,
) -> Result<Json<Vec<EntrySummary>>, ApiError> {
    let entries = state
        .store
        .list_entries(filter.feed_id.as_deref())?
        .into_iter()
        .map(|entry| EntrySummary {
            id: entry.id,
            title: entry.title,
        })
        .collect();
    Ok(Json(entries))
}

/// Reader view (GET /read/{id}?redrive=bool)
///
/// Enriches synchronously when the entry was never enriched or `redrive` is
/// set. A run already in flight for the entry is not waited for; the stored
/// entry is returned as is. Entries of preview-only feeds never carry
/// content or summary.
pub async fn read_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Result<Json<ReadResponse>, ApiError> {
    let entry = state
        .store
        .get_entry(&entry_id)?
        .ok_or_else(|| ApiError::NotFound(format!("entry {entry_id}")))?;

    let mut entry = if !entry.is_enriched() || query.redrive {
        match state.pipeline.enrich(&entry_id, query.redrive).await {
            Ok(report) => debug!(%entry_id, state = ?report.state, "Synchronous enrichment finished"),
            Err(PipelineError::AlreadyInFlight(_)) => {
                debug!(%entry_id, "Enrichment in flight, serving stored entry")
            }
            Err(e) => return Err(e.into()),
        }
        state
            .store
            .get_entry(&entry_id)?
            .ok_or_else(|| ApiError::NotFound(format!("entry {entry_id}")))?
    } else {
        entry
    };

    if let Some(feed) = state.store.get_feed(&entry.feed_id)? {
        if feed.preview_only {
            entry.content.clear();
            entry.summary.clear();
        }
    }

    Ok(Json(ReadResponse {
        content: entry,
        settings: (*state.settings.get()).clone(),
    }))
}

/// About page (GET /about)
pub async fn about(State(state): State<AppState>) -> Json<AboutResponse> {
    Json(AboutResponse {
        settings: (*state.settings.get()).clone(),
        update_status: false,
        update_exception: None,
        version: env!("CARGO_PKG_VERSION").to_string(),
        runtime_version: RUNTIME_VERSION.to_string(),
        framework_version: FRAMEWORK_VERSION.to_string(),
        docker: state.config.about.docker,
        storage_handler: STORAGE_HANDLER.to_string(),
        project_url: state.config.about.project_url.clone(),
    })
}

/// Onboarding page (GET /onboarding)
pub async fn onboarding(State(state): State<AppState>) -> Json<OnboardingResponse> {
    Json(OnboardingResponse {
        settings: (*state.settings.get()).clone(),
    })
}

/// Feed registration (POST /feeds)
///
/// Upserts the feed keyed by its URL. Registering the first feed finishes
/// onboarding.
pub async fn create_feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let mut new_feed: NewFeed = read_json(&headers, body, max_payload(&state)).await?;
    validate_new_feed(&new_feed)?;
    new_feed.url = canonical_url(&new_feed.url);

    let feed = new_feed.into_feed();
    let existed = state.store.get_feed(&feed.id)?.is_some();
    state.store.put_feed(&feed)?;
    info!(feed_id = %feed.id, name = %feed.name, existed, "Feed registered");

    if !state.settings.get().finished_onboarding {
        state
            .settings
            .update(SettingsPatch::onboarding_finished(), &state.registry)?;
    }

    let status = if existed { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(feed)))
}

/// Entry ingestion (POST /entries)
///
/// Stores the item and queues it for enrichment; returns 202 Accepted.
/// Re-posting an item that is not newer than the stored copy is a no-op
/// (200 with `queued: false`). A newer copy updates the feed-supplied
/// fields of the stored entry and is enriched again; the previous
/// enrichment stays until that run succeeds.
pub async fn ingest_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let mut new_entry: NewEntry = read_json(&headers, body, max_payload(&state)).await?;
    validate_new_entry(&new_entry)?;
    new_entry.url = canonical_url(&new_entry.url);

    let feed = state
        .store
        .get_feed(&new_entry.feed_id)?
        .ok_or_else(|| ApiError::NotFound(format!("feed {}", new_entry.feed_id)))?;
    let entry = new_entry.into_entry(&feed);

    let (entry_id, feed_id) = (entry.id.clone(), entry.feed_id.clone());

    let force = match state.store.upsert_entry(entry)? {
        EntryUpsert::Unchanged => {
            debug!(%entry_id, "Entry unchanged, not queued");
            let accepted = EntryAccepted {
                id: entry_id,
                feed_id,
                queued: false,
            };
            return Ok((StatusCode::OK, Json(accepted)));
        }
        EntryUpsert::Created => false,
        EntryUpsert::Updated => true,
    };

    state
        .queue
        .enqueue(EnrichmentRequest {
            entry_id: entry_id.clone(),
            feed_id: feed_id.clone(),
            force,
        })
        .await?;

    info!(%entry_id, %feed_id, updated = force, "Entry accepted");
    let accepted = EntryAccepted {
        id: entry_id,
        feed_id,
        queued: true,
    };
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// Enrichment diagnostics of one entry (GET /entries/{id}/diagnostics)
pub async fn entry_diagnostics(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.store.get_entry(&entry_id)?.is_none() {
        return Err(ApiError::NotFound(format!("entry {entry_id}")));
    }
    Ok(Json(state.store.list_diagnostics(&entry_id)?))
}

/// Health check endpoint (GET /health)
///
/// Reports the ledger and the enrichment queue plus pipeline counters.
/// Returns 503 Service Unavailable if any component is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();

    let ledger = match state.store.stats() {
        Ok(_) => "healthy",
        Err(e) => {
            tracing::warn!(error = %e, "Ledger health check failed");
            "unhealthy"
        }
    };
    components.insert("ledger".to_string(), ledger.to_string());

    let queue = if state.queue.health_check() {
        "healthy"
    } else {
        "unhealthy"
    };
    components.insert("enrichment_queue".to_string(), queue.to_string());
    components.insert("api".to_string(), "healthy".to_string());

    let all_healthy = components.values().all(|status| status == "healthy");
    let (status_code, overall_status) = if all_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        pipeline: state.metrics.snapshot(),
    };

    (status_code, Json(response))
}
