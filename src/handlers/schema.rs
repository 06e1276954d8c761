//! Declarative handler configuration schemas and the validator that checks
//! raw config blobs against them.
//!
//! Validation is pure: no I/O, no clock, no globals. Every offending field is
//! reported so the settings page can show all problems at once.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Accepted shape of a single configuration field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Float {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Boolean,
    /// Absolute http/https URL
    Url,
    Enum {
        values: &'static [&'static str],
    },
    StringList,
    StringMap,
}

impl FieldKind {
    fn expected(&self) -> &'static str {
        match self {
            FieldKind::String | FieldKind::Url | FieldKind::Enum { .. } => "string",
            FieldKind::Integer { .. } => "integer",
            FieldKind::Float { .. } => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::StringList => "array of strings",
            FieldKind::StringMap => "object of strings",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    #[serde(flatten)]
    pub kind: FieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub description: &'static str,
}

impl FieldSpec {
    pub fn required(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            description,
        }
    }

    pub fn optional(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            description,
        }
    }

    /// Value filled in by the validator when the field is absent
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Configuration schema declared by one handler implementation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerSchema {
    pub handler: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl HandlerSchema {
    pub fn new(handler: &'static str) -> Self {
        Self {
            handler,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    pub fn has_required_fields(&self) -> bool {
        self.fields.iter().any(|spec| spec.required)
    }
}

/// What is wrong with one field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum FieldProblem {
    Missing,
    Unknown,
    NotAnObject,
    WrongType { expected: &'static str },
    OutOfRange { bound: String },
    NotInEnum { allowed: Vec<&'static str> },
    InvalidUrl { reason: String },
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldProblem::Missing => write!(f, "required field is missing"),
            FieldProblem::Unknown => write!(f, "field is not declared by the schema"),
            FieldProblem::NotAnObject => write!(f, "configuration must be a JSON object"),
            FieldProblem::WrongType { expected } => write!(f, "expected {expected}"),
            FieldProblem::OutOfRange { bound } => write!(f, "value {bound}"),
            FieldProblem::NotInEnum { allowed } => {
                write!(f, "must be one of: {}", allowed.join(", "))
            }
            FieldProblem::InvalidUrl { reason } => write!(f, "invalid url: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    #[serde(flatten)]
    pub problem: FieldProblem,
}

impl FieldError {
    pub fn new(field: impl Into<String>, problem: FieldProblem) -> Self {
        Self {
            field: field.into(),
            problem,
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

/// A config blob (or settings partial) failed validation
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("invalid configuration for '{subject}': {}", describe(.errors))]
pub struct ValidationError {
    pub subject: String,
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn new(subject: impl Into<String>, errors: Vec<FieldError>) -> Self {
        Self {
            subject: subject.into(),
            errors,
        }
    }

    pub fn single(subject: impl Into<String>, field: impl Into<String>, problem: FieldProblem) -> Self {
        Self::new(subject, vec![FieldError::new(field, problem)])
    }

    pub fn has_problem(&self, field: &str) -> bool {
        self.errors.iter().any(|error| error.field == field)
    }
}

fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Config blob that passed validation, with declared defaults filled in
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    values: Value,
}

impl ValidatedConfig {
    pub fn values(&self) -> &Value {
        &self.values
    }

    pub fn into_values(self) -> Value {
        self.values
    }
}

/// Validate `config` against `schema`.
///
/// A `null` blob is treated as an empty object.
pub fn validate(schema: &HandlerSchema, config: &Value) -> Result<ValidatedConfig, ValidationError> {
    let empty = Map::new();
    let object = match config {
        Value::Null => &empty,
        Value::Object(map) => map,
        _ => {
            return Err(ValidationError::single(
                schema.handler,
                "config",
                FieldProblem::NotAnObject,
            ));
        }
    };

    let mut errors = Vec::new();

    for key in object.keys() {
        if schema.get(key).is_none() {
            errors.push(FieldError::new(key.as_str(), FieldProblem::Unknown));
        }
    }

    let mut normalized = Map::new();
    for spec in &schema.fields {
        match object.get(spec.name) {
            None | Some(Value::Null) => {
                if spec.required {
                    errors.push(FieldError::new(spec.name, FieldProblem::Missing));
                } else if let Some(default) = &spec.default {
                    normalized.insert(spec.name.to_string(), default.clone());
                }
            }
            Some(value) => match check_value(&spec.kind, value) {
                Ok(()) => {
                    normalized.insert(spec.name.to_string(), value.clone());
                }
                Err(problem) => errors.push(FieldError::new(spec.name, problem)),
            },
        }
    }

    if !errors.is_empty() {
        return Err(ValidationError::new(schema.handler, errors));
    }

    Ok(ValidatedConfig {
        values: Value::Object(normalized),
    })
}

/// Check one value against its declared kind
pub fn check_value(kind: &FieldKind, value: &Value) -> Result<(), FieldProblem> {
    let wrong_type = || FieldProblem::WrongType {
        expected: kind.expected(),
    };

    match kind {
        FieldKind::String => value.as_str().map(|_| ()).ok_or_else(wrong_type),
        FieldKind::Boolean => value.as_bool().map(|_| ()).ok_or_else(wrong_type),
        FieldKind::Integer { min, max } => {
            if value.is_u64() && value.as_i64().is_none() {
                return Err(FieldProblem::OutOfRange {
                    bound: format!("must be <= {}", max.unwrap_or(i64::MAX)),
                });
            }
            let number = value.as_i64().ok_or_else(wrong_type)?;
            check_range(number, *min, *max)
        }
        FieldKind::Float { min, max } => {
            let number = value.as_f64().ok_or_else(wrong_type)?;
            check_range(number, *min, *max)
        }
        FieldKind::Url => {
            let raw = value.as_str().ok_or_else(wrong_type)?;
            check_url(raw)
        }
        FieldKind::Enum { values } => {
            let raw = value.as_str().ok_or_else(wrong_type)?;
            if values.contains(&raw) {
                Ok(())
            } else {
                Err(FieldProblem::NotInEnum {
                    allowed: values.to_vec(),
                })
            }
        }
        FieldKind::StringList => match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => Ok(()),
            _ => Err(wrong_type()),
        },
        FieldKind::StringMap => match value.as_object() {
            Some(map) if map.values().all(Value::is_string) => Ok(()),
            _ => Err(wrong_type()),
        },
    }
}

fn check_range<T>(number: T, min: Option<T>, max: Option<T>) -> Result<(), FieldProblem>
where
    T: PartialOrd + fmt::Display + Copy,
{
    if let Some(min) = min {
        if number < min {
            return Err(FieldProblem::OutOfRange {
                bound: format!("must be >= {min}"),
            });
        }
    }
    if let Some(max) = max {
        if number > max {
            return Err(FieldProblem::OutOfRange {
                bound: format!("must be <= {max}"),
            });
        }
    }
    Ok(())
}

fn check_url(raw: &str) -> Result<(), FieldProblem> {
    let parsed = url::Url::parse(raw).map_err(|e| FieldProblem::InvalidUrl {
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FieldProblem::InvalidUrl {
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    if parsed.host_str().is_none() {
        return Err(FieldProblem::InvalidUrl {
            reason: "missing host".to_string(),
        });
    }

    Ok(())
}
