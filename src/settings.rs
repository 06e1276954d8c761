//! Process-wide tunables with atomic, versioned replacement.
//!
//! Readers take an `Arc<Settings>` snapshot and never see a half-applied
//! update. Writers are serialized; an update is validated, persisted and only
//! then swapped in.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::handlers::{
    FieldError, FieldProblem, HandlerCategory, HandlerRegistry, RegistryError, ValidationError,
};
use crate::ledger::{FjallStore, LedgerError};

const REFRESH_INTERVAL_RANGE: (u32, u32) = (1, 1440);
const READING_SPEED_RANGE: (u32, u32) = (1, 2000);
const RECENT_HOURS_RANGE: (u32, u32) = (1, 8760);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Black,
    Coffee,
    Dark,
    Fantasy,
    #[default]
    Forest,
    Lemonade,
    Lofi,
    Luxury,
    Night,
    Nord,
    Pastel,
    Synthwave,
    Winter,
}

impl Theme {
    pub const ALL: [Theme; 13] = [
        Theme::Black,
        Theme::Coffee,
        Theme::Dark,
        Theme::Fantasy,
        Theme::Forest,
        Theme::Lemonade,
        Theme::Lofi,
        Theme::Luxury,
        Theme::Night,
        Theme::Nord,
        Theme::Pastel,
        Theme::Synthwave,
        Theme::Winter,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub send_notification: bool,
    pub theme: Theme,
    /// Minutes between feed polls
    pub refresh_interval: u32,
    /// Words per minute
    pub reading_speed: u32,
    pub recent_hours: u32,
    pub finished_onboarding: bool,
    pub notification_handler_key: String,
    pub summarization_handler_key: String,
    pub content_retrieval_handler_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            send_notification: true,
            theme: Theme::Forest,
            refresh_interval: 5,
            reading_speed: 238,
            recent_hours: 36,
            finished_onboarding: false,
            notification_handler_key: "null_notification".to_string(),
            summarization_handler_key: "null_summarization".to_string(),
            content_retrieval_handler_key: "requests".to_string(),
        }
    }
}

impl Settings {
    pub fn handler_key(&self, category: HandlerCategory) -> &str {
        match category {
            HandlerCategory::ContentRetrieval => &self.content_retrieval_handler_key,
            HandlerCategory::Summarization => &self.summarization_handler_key,
            HandlerCategory::Notification => &self.notification_handler_key,
        }
    }

    fn handler_key_mut(&mut self, category: HandlerCategory) -> &mut String {
        match category {
            HandlerCategory::ContentRetrieval => &mut self.content_retrieval_handler_key,
            HandlerCategory::Summarization => &mut self.summarization_handler_key,
            HandlerCategory::Notification => &mut self.notification_handler_key,
        }
    }
}

/// Partial update; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    pub send_notification: Option<bool>,
    pub theme: Option<Theme>,
    pub refresh_interval: Option<u32>,
    pub reading_speed: Option<u32>,
    pub recent_hours: Option<u32>,
    pub finished_onboarding: Option<bool>,
    pub notification_handler_key: Option<String>,
    pub summarization_handler_key: Option<String>,
    pub content_retrieval_handler_key: Option<String>,
}

impl SettingsPatch {
    pub fn handler_key(category: HandlerCategory, name: &str) -> Self {
        let mut patch = Self::default();
        let key = Some(name.to_string());
        match category {
            HandlerCategory::ContentRetrieval => patch.content_retrieval_handler_key = key,
            HandlerCategory::Summarization => patch.summarization_handler_key = key,
            HandlerCategory::Notification => patch.notification_handler_key = key,
        }
        patch
    }

    pub fn onboarding_finished() -> Self {
        Self {
            finished_onboarding: Some(true),
            ..Self::default()
        }
    }

    fn supplied_handler_key(&self, category: HandlerCategory) -> Option<&str> {
        match category {
            HandlerCategory::ContentRetrieval => self.content_retrieval_handler_key.as_deref(),
            HandlerCategory::Summarization => self.summarization_handler_key.as_deref(),
            HandlerCategory::Notification => self.notification_handler_key.as_deref(),
        }
    }

    fn apply(&self, base: &Settings) -> Settings {
        let mut next = base.clone();
        if let Some(value) = self.send_notification {
            next.send_notification = value;
        }
        if let Some(value) = self.theme {
            next.theme = value;
        }
        if let Some(value) = self.refresh_interval {
            next.refresh_interval = value;
        }
        if let Some(value) = self.reading_speed {
            next.reading_speed = value;
        }
        if let Some(value) = self.recent_hours {
            next.recent_hours = value;
        }
        if let Some(value) = self.finished_onboarding {
            next.finished_onboarding = value;
        }
        for category in HandlerCategory::ALL {
            if let Some(key) = self.supplied_handler_key(category) {
                *next.handler_key_mut(category) = key.to_string();
            }
        }
        next
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Handler(#[from] RegistryError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

fn check_bounds(errors: &mut Vec<FieldError>, field: &str, value: u32, (min, max): (u32, u32)) {
    if value < min || value > max {
        errors.push(FieldError::new(
            field,
            FieldProblem::OutOfRange {
                bound: format!("must be between {min} and {max}"),
            },
        ));
    }
}

fn validate_scalars(settings: &Settings) -> std::result::Result<(), ValidationError> {
    let mut errors = Vec::new();
    check_bounds(&mut errors, "refresh_interval", settings.refresh_interval, REFRESH_INTERVAL_RANGE);
    check_bounds(&mut errors, "reading_speed", settings.reading_speed, READING_SPEED_RANGE);
    check_bounds(&mut errors, "recent_hours", settings.recent_hours, RECENT_HOURS_RANGE);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new("settings", errors))
    }
}

struct Current {
    version: u64,
    settings: Arc<Settings>,
}

/// Holder of the single process-wide [`Settings`] value
pub struct SettingsStore {
    current: RwLock<Current>,
    writer: Mutex<()>,
    ledger: Option<Arc<FjallStore>>,
}

impl SettingsStore {
    /// In-memory store starting from `settings`
    pub fn new(settings: Settings, ledger: Option<Arc<FjallStore>>) -> Self {
        Self {
            current: RwLock::new(Current {
                version: 0,
                settings: Arc::new(settings),
            }),
            writer: Mutex::new(()),
            ledger,
        }
    }

    /// Build the startup value: persisted settings if any, otherwise defaults
    /// with `initial` applied. Handler keys that are not eligible anymore are
    /// cleared.
    pub fn load(
        ledger: Option<Arc<FjallStore>>,
        registry: &HandlerRegistry,
        initial: &SettingsPatch,
    ) -> Result<Self> {
        let persisted = match &ledger {
            Some(ledger) => ledger.get_settings()?,
            None => None,
        };

        let mut settings = match persisted {
            Some(raw) => decode_persisted(raw),
            None => {
                let settings = initial.apply(&Settings::default());
                validate_scalars(&settings)?;
                settings
            }
        };

        for category in HandlerCategory::ALL {
            let key = settings.handler_key(category).to_string();
            if key.is_empty() {
                continue;
            }
            if let Err(e) = registry.ensure_eligible(category, &key) {
                warn!(%category, handler = %key, error = %e, "Clearing ineligible handler key");
                settings.handler_key_mut(category).clear();
            }
        }

        Ok(Self::new(settings, ledger))
    }

    /// Current snapshot
    pub fn get(&self) -> Arc<Settings> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .settings
            .clone()
    }

    /// Number of successful updates since startup
    pub fn version(&self) -> u64 {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .version
    }

    /// Merge, validate, persist, then swap. Nothing changes on error.
    pub fn update(&self, patch: SettingsPatch, registry: &HandlerRegistry) -> Result<Arc<Settings>> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let next = patch.apply(&self.get());
        validate_scalars(&next)?;

        for category in HandlerCategory::ALL {
            match patch.supplied_handler_key(category) {
                Some(key) if !key.is_empty() => registry.ensure_eligible(category, key)?,
                _ => {}
            }
        }

        if let Some(ledger) = &self.ledger {
            ledger.put_settings(&next)?;
        }

        let next = Arc::new(next);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        current.version += 1;
        current.settings = next.clone();
        info!(version = current.version, "Settings updated");

        Ok(next)
    }
}

/// Unknown or malformed fields fall back to defaults
fn decode_persisted(raw: Value) -> Settings {
    match serde_json::from_value::<Settings>(raw) {
        Ok(settings) if validate_scalars(&settings).is_ok() => settings,
        Ok(_) => {
            warn!("Persisted settings out of range, using defaults");
            Settings::default()
        }
        Err(e) => {
            warn!(error = %e, "Persisted settings unreadable, using defaults");
            Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (SettingsStore, HandlerRegistry) {
        (
            SettingsStore::new(Settings::default(), None),
            HandlerRegistry::default(),
        )
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.theme, Theme::Forest);
        assert!(settings.send_notification);
        assert_eq!(settings.refresh_interval, 5);
        assert_eq!(settings.reading_speed, 238);
        assert_eq!(settings.recent_hours, 36);
        assert!(!settings.finished_onboarding);
    }

    #[test]
    fn test_theme_serialization() {
        assert_eq!(serde_json::to_value(Theme::Synthwave).unwrap(), json!("synthwave"));
        assert_eq!(Theme::ALL.len(), 13);
    }

    #[test]
    fn test_update_merges_and_bumps_version() {
        let (store, registry) = store();
        let updated = store
            .update(
                SettingsPatch {
                    reading_speed: Some(300),
                    theme: Some(Theme::Nord),
                    ..SettingsPatch::default()
                },
                &registry,
            )
            .unwrap();

        assert_eq!(updated.reading_speed, 300);
        assert_eq!(updated.theme, Theme::Nord);
        assert_eq!(updated.recent_hours, 36);
        assert_eq!(store.version(), 1);
        assert_eq!(*store.get(), *updated);
    }

    #[test]
    fn test_update_rejects_out_of_range() {
        let (store, registry) = store();
        let err = store
            .update(
                SettingsPatch {
                    reading_speed: Some(0),
                    refresh_interval: Some(5000),
                    ..SettingsPatch::default()
                },
                &registry,
            )
            .unwrap_err();

        let SettingsError::Validation(validation) = err else {
            panic!("expected validation error");
        };
        assert!(validation.has_problem("reading_speed"));
        assert!(validation.has_problem("refresh_interval"));
        assert_eq!(store.version(), 0);
        assert_eq!(store.get().reading_speed, 238);
    }

    #[test]
    fn test_update_rejects_unconfigured_handler() {
        let (store, registry) = store();
        let err = store
            .update(
                SettingsPatch::handler_key(HandlerCategory::Summarization, "ollama"),
                &registry,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            SettingsError::Handler(RegistryError::HandlerUnavailable { .. })
        ));
        assert_eq!(store.get().summarization_handler_key, "null_summarization");
    }

    #[test]
    fn test_update_rejects_handler_of_wrong_category() {
        let (store, registry) = store();
        let err = store
            .update(
                SettingsPatch::handler_key(HandlerCategory::ContentRetrieval, "null_notification"),
                &registry,
            )
            .unwrap_err();
        assert!(matches!(err, SettingsError::Handler(_)));
    }

    #[test]
    fn test_empty_handler_key_deactivates() {
        let (store, registry) = store();
        let updated = store
            .update(
                SettingsPatch::handler_key(HandlerCategory::Notification, ""),
                &registry,
            )
            .unwrap();
        assert!(updated.notification_handler_key.is_empty());
    }

    #[test]
    fn test_activate_unconfigured_leaves_settings() {
        let (store, registry) = store();
        let before = store.get();

        let err = registry
            .activate(&store, HandlerCategory::Notification, "slack")
            .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Handler(RegistryError::HandlerUnavailable { .. })
        ));
        assert_eq!(store.get(), before);
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_activate_configured_handler() {
        let (store, registry) = store();
        registry
            .configure("ntfy", &json!({"topic": "news"}))
            .unwrap();

        let updated = registry
            .activate(&store, HandlerCategory::Notification, "ntfy")
            .unwrap();
        assert_eq!(updated.notification_handler_key, "ntfy");
        assert!(registry
            .choices(HandlerCategory::Notification)
            .contains(&updated.notification_handler_key));
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let result: std::result::Result<SettingsPatch, _> =
            serde_json::from_value(json!({"colour": "red"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_persisted_and_clear_ineligible_keys() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Arc::new(FjallStore::open(temp_dir.path().join("ledger")).unwrap());
        ledger
            .put_settings(&Settings {
                reading_speed: 180,
                notification_handler_key: "slack".to_string(),
                ..Settings::default()
            })
            .unwrap();

        let registry = HandlerRegistry::default();
        let store =
            SettingsStore::load(Some(ledger), &registry, &SettingsPatch::default()).unwrap();

        let settings = store.get();
        assert_eq!(settings.reading_speed, 180);
        assert!(settings.notification_handler_key.is_empty());
        assert_eq!(settings.content_retrieval_handler_key, "requests");
    }

    #[test]
    fn test_load_applies_initial_patch_without_persisted_value() {
        let registry = HandlerRegistry::default();
        let initial = SettingsPatch {
            recent_hours: Some(12),
            ..SettingsPatch::default()
        };
        let store = SettingsStore::load(None, &registry, &initial).unwrap();
        assert_eq!(store.get().recent_hours, 12);
    }

    #[test]
    fn test_update_persists() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Arc::new(FjallStore::open(temp_dir.path().join("ledger")).unwrap());
        let registry = HandlerRegistry::default();
        let store = SettingsStore::new(Settings::default(), Some(ledger.clone()));

        store
            .update(SettingsPatch::onboarding_finished(), &registry)
            .unwrap();

        let raw = ledger.get_settings().unwrap().unwrap();
        assert_eq!(raw["finished_onboarding"], json!(true));
    }
}
