//! Shape checks for ingest payloads. Every offending field is reported.

use url::Url;

use super::models::{NewEntry, NewFeed};
use crate::handlers::{FieldError, FieldKind, FieldProblem, ValidationError, check_value};

const MAX_TITLE_CHARS: usize = 1024;
const MAX_NAME_CHARS: usize = 256;

pub fn validate_new_feed(feed: &NewFeed) -> Result<(), ValidationError> {
    let mut errors = Vec::new();
    check_text(&mut errors, "name", &feed.name, MAX_NAME_CHARS);
    check_url(&mut errors, "url", &feed.url);
    if let Some(category) = &feed.category {
        check_text(&mut errors, "category", category, MAX_NAME_CHARS);
    }
    finish("feed", errors)
}

pub fn validate_new_entry(entry: &NewEntry) -> Result<(), ValidationError> {
    let mut errors = Vec::new();
    if entry.feed_id.trim().is_empty() {
        errors.push(FieldError::new("feed_id", FieldProblem::Missing));
    }
    check_text(&mut errors, "title", &entry.title, MAX_TITLE_CHARS);
    check_url(&mut errors, "url", &entry.url);
    if let Some(updated_at) = entry.updated_at {
        if updated_at < entry.published_at {
            errors.push(FieldError::new(
                "updated_at",
                FieldProblem::OutOfRange {
                    bound: "must not be before published_at".to_string(),
                },
            ));
        }
    }
    finish("entry", errors)
}

fn check_text(errors: &mut Vec<FieldError>, field: &str, value: &str, max_chars: usize) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, FieldProblem::Missing));
    } else if value.chars().count() > max_chars {
        errors.push(FieldError::new(
            field,
            FieldProblem::OutOfRange {
                bound: format!("must be at most {max_chars} characters"),
            },
        ));
    }
}

fn check_url(errors: &mut Vec<FieldError>, field: &str, value: &str) {
    let value = serde_json::Value::String(value.to_string());
    if let Err(problem) = check_value(&FieldKind::Url, &value) {
        errors.push(FieldError::new(field, problem));
    }
}

fn finish(subject: &str, errors: Vec<FieldError>) -> Result<(), ValidationError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(subject, errors))
    }
}

/// Canonical form used to derive ids, so `HTTPS://Example.com/a` and
/// `https://example.com/a` name the same item
pub fn canonical_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}
