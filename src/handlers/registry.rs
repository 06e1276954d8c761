use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::schema::{self, HandlerSchema, ValidationError};
use super::traits::{ContentRetriever, HandlerError, Notifier, Summarizer};
use super::types::{HandlerCategory, HandlerDescriptor, HandlerInstance, HandlerKind, HandlerSettings};
use crate::ledger::{FjallStore, LedgerError, StoredHandlerConfig};
use crate::settings::{Settings, SettingsError, SettingsPatch, SettingsStore};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown handler: {0}")]
    UnknownHandler(String),
    #[error("no configured {category} handler named '{name}'")]
    HandlerUnavailable {
        category: HandlerCategory,
        name: String,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to build handler: {0}")]
    Build(#[from] HandlerError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

struct Slot {
    kind: HandlerKind,
    config: Option<Value>,
    instance: Option<HandlerInstance>,
}

impl Slot {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            name: self.kind.name().to_string(),
            category: self.kind.category(),
            configured: self.instance.is_some(),
        }
    }
}

/// Registry of handler implementations, their configs and live instances
pub struct HandlerRegistry {
    slots: RwLock<BTreeMap<String, Slot>>,
    writer: Mutex<()>,
    ledger: Option<Arc<FjallStore>>,
}

impl HandlerRegistry {
    /// Empty registry; configs are persisted to `ledger` when one is given
    pub fn new(ledger: Option<Arc<FjallStore>>) -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(()),
            ledger,
        }
    }

    /// Registry with every built-in handler registered. Handlers that need no
    /// configuration are configured with their schema defaults.
    pub fn with_builtins(ledger: Option<Arc<FjallStore>>) -> Self {
        let registry = Self::new(ledger);

        for kind in HandlerKind::ALL {
            registry.register(kind);
            if kind.schema().has_required_fields() {
                continue;
            }
            if let Err(e) = registry.install_validated(kind, &Value::Null) {
                warn!(handler = kind.name(), error = %e, "Failed to configure handler defaults");
            }
        }

        registry
    }

    /// Add a handler; registering the same name twice is a no-op
    pub fn register(&self, kind: HandlerKind) -> HandlerDescriptor {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(kind.name().to_string())
            .or_insert_with(|| {
                debug!(handler = kind.name(), category = %kind.category(), "Registered handler");
                Slot {
                    kind,
                    config: None,
                    instance: None,
                }
            })
            .descriptor()
    }

    fn kind_of(&self, name: &str) -> Result<HandlerKind, RegistryError> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(name)
            .map(|slot| slot.kind)
            .ok_or_else(|| RegistryError::UnknownHandler(name.to_string()))
    }

    /// Validate and build without touching registry state
    fn prepare(kind: HandlerKind, raw: &Value) -> Result<(Value, HandlerInstance), RegistryError> {
        let validated = schema::validate(&kind.schema(), raw)?;
        let values = validated.values().clone();
        let instance = HandlerSettings::from_validated(kind, validated)?.build()?;
        Ok((values, instance))
    }

    fn install(&self, kind: HandlerKind, values: Value, instance: HandlerInstance) -> HandlerDescriptor {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(kind.name().to_string()).or_insert(Slot {
            kind,
            config: None,
            instance: None,
        });
        slot.config = Some(values);
        slot.instance = Some(instance);
        slot.descriptor()
    }

    fn install_validated(&self, kind: HandlerKind, raw: &Value) -> Result<HandlerDescriptor, RegistryError> {
        let (values, instance) = Self::prepare(kind, raw)?;
        Ok(self.install(kind, values, instance))
    }

    /// Validate `raw` against the handler schema, persist it and swap in a
    /// freshly built instance. On any failure the previous state is kept.
    pub fn configure(&self, name: &str, raw: &Value) -> Result<HandlerDescriptor, RegistryError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let kind = self.kind_of(name)?;

        let (values, instance) = Self::prepare(kind, raw).inspect_err(|e| {
            warn!(handler = name, error = %e, "Rejected handler configuration");
        })?;

        if let Some(ledger) = &self.ledger {
            ledger.put_handler_config(&StoredHandlerConfig {
                handler: name.to_string(),
                config: values.clone(),
                updated_at: Utc::now(),
            })?;
        }

        let descriptor = self.install(kind, values, instance);
        info!(handler = name, category = %kind.category(), "Handler configured");
        Ok(descriptor)
    }

    /// Reload persisted configs. Entries that no longer validate are skipped.
    pub fn restore(&self) -> Result<usize, RegistryError> {
        let Some(ledger) = &self.ledger else {
            return Ok(0);
        };

        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut restored = 0;
        for stored in ledger.list_handler_configs()? {
            let Some(kind) = HandlerKind::from_name(&stored.handler) else {
                warn!(handler = %stored.handler, "Ignoring config of unknown handler");
                continue;
            };
            match self.install_validated(kind, &stored.config) {
                Ok(_) => restored += 1,
                Err(e) => {
                    warn!(handler = %stored.handler, error = %e, "Stored handler config no longer valid")
                }
            }
        }

        info!(restored, "Restored handler configs");
        Ok(restored)
    }

    /// Apply initial configs for handlers that have nothing persisted yet
    pub fn seed(&self, initial: &HashMap<String, Value>) -> Result<(), RegistryError> {
        for (name, raw) in initial {
            if let Some(ledger) = &self.ledger {
                if ledger.get_handler_config(name)?.is_some() {
                    debug!(handler = %name, "Keeping persisted config over initial config");
                    continue;
                }
            }
            self.configure(name, raw)?;
        }
        Ok(())
    }

    /// `Ok` when `name` is a configured handler of `category`
    pub fn ensure_eligible(&self, category: HandlerCategory, name: &str) -> Result<(), RegistryError> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        match slots.get(name) {
            Some(slot) if slot.kind.category() == category && slot.instance.is_some() => Ok(()),
            _ => Err(RegistryError::HandlerUnavailable {
                category,
                name: name.to_string(),
            }),
        }
    }

    /// Make `name` the active handler of `category`
    pub fn activate(
        &self,
        settings: &SettingsStore,
        category: HandlerCategory,
        name: &str,
    ) -> Result<Arc<Settings>, SettingsError> {
        self.ensure_eligible(category, name)?;
        let updated = settings.update(SettingsPatch::handler_key(category, name), self)?;
        info!(handler = name, %category, "Handler activated");
        Ok(updated)
    }

    /// Snapshot of registered handlers, optionally filtered by category
    pub fn list(&self, category: Option<HandlerCategory>) -> Vec<HandlerDescriptor> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .values()
            .filter(|slot| category.is_none_or(|c| slot.kind.category() == c))
            .map(Slot::descriptor)
            .collect()
    }

    /// Names selectable for `category`
    pub fn choices(&self, category: HandlerCategory) -> Vec<String> {
        self.list(Some(category))
            .into_iter()
            .map(|descriptor| descriptor.name)
            .collect()
    }

    pub fn descriptor(&self, name: &str) -> Result<HandlerDescriptor, RegistryError> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(name)
            .map(Slot::descriptor)
            .ok_or_else(|| RegistryError::UnknownHandler(name.to_string()))
    }

    pub fn schema(&self, name: &str) -> Result<HandlerSchema, RegistryError> {
        Ok(self.kind_of(name)?.schema())
    }

    /// Stored (validated) config blob, `None` when unconfigured
    pub fn config(&self, name: &str) -> Result<Option<Value>, RegistryError> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(name)
            .map(|slot| slot.config.clone())
            .ok_or_else(|| RegistryError::UnknownHandler(name.to_string()))
    }

    fn instance(&self, category: HandlerCategory, name: &str) -> Result<HandlerInstance, RegistryError> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(name)
            .filter(|slot| slot.kind.category() == category)
            .and_then(|slot| slot.instance.clone())
            .ok_or_else(|| RegistryError::HandlerUnavailable {
                category,
                name: name.to_string(),
            })
    }

    pub fn content_retriever(&self, name: &str) -> Result<Arc<dyn ContentRetriever>, RegistryError> {
        match self.instance(HandlerCategory::ContentRetrieval, name)? {
            HandlerInstance::Content(handler) => Ok(handler),
            _ => Err(RegistryError::HandlerUnavailable {
                category: HandlerCategory::ContentRetrieval,
                name: name.to_string(),
            }),
        }
    }

    pub fn summarizer(&self, name: &str) -> Result<Arc<dyn Summarizer>, RegistryError> {
        match self.instance(HandlerCategory::Summarization, name)? {
            HandlerInstance::Summarization(handler) => Ok(handler),
            _ => Err(RegistryError::HandlerUnavailable {
                category: HandlerCategory::Summarization,
                name: name.to_string(),
            }),
        }
    }

    pub fn notifier(&self, name: &str) -> Result<Arc<dyn Notifier>, RegistryError> {
        match self.instance(HandlerCategory::Notification, name)? {
            HandlerInstance::Notification(handler) => Ok(handler),
            _ => Err(RegistryError::HandlerUnavailable {
                category: HandlerCategory::Notification,
                name: name.to_string(),
            }),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins(None)
    }
}
