//! Handler system for Gleaner
//!
//! Handlers are the pluggable capabilities the enrichment pipeline calls out
//! to: content retrieval, summarization and notification.
//!
//! ## Key Components
//!
//! - [`ContentRetriever`], [`Summarizer`], [`Notifier`] - one async trait per category
//! - [`HandlerSchema`] / [`validate`] - declarative config schemas and the validator
//! - [`HandlerSettings`] - typed config blob per built-in handler
//! - [`HandlerRegistry`] - catalog of handlers, their configs and live instances
//!
//! ## Example
//!
//! ```rust,ignore
//! use gleaner::handlers::HandlerRegistry;
//!
//! let registry = HandlerRegistry::with_builtins(None);
//! registry.configure("ntfy", &serde_json::json!({"topic": "news"}))?;
//! let notifier = registry.notifier("ntfy")?;
//! ```

pub mod content;
pub mod http;
pub mod notification;
mod registry;
mod schema;
pub mod summarization;
mod traits;
mod types;

pub use registry::{HandlerRegistry, RegistryError};
pub use schema::{
    FieldError, FieldKind, FieldProblem, FieldSpec, HandlerSchema, ValidatedConfig,
    ValidationError, check_value, validate,
};
pub use traits::{ContentRetriever, HandlerError, Notifier, Summarizer};
pub use types::{
    HandlerCategory, HandlerDescriptor, HandlerInstance, HandlerKind, HandlerSettings, Notice,
};
