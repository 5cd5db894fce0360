//! Value-from-notation lookups into JSON responses.
//!
//! Notation is a dotted path with optional bracket indexes: `data.items.0.id`,
//! `data.items[0].id`, and `data["display name"]` all work. Array segments accept negative
//! indexes counted from the end. The empty notation selects the whole document.
//!
//! A path that does not exist is reported as [`NotationError::NotFound`], which is distinct from
//! a path that exists and holds `null`.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotationError {
    #[error("{notation} not found (missing segment '{segment}')")]
    NotFound { notation: String, segment: String },

    #[error("notation '{notation}' is malformed")]
    Malformed { notation: String },
}

/// Look up `notation` inside `document`.
pub fn value_from_notation<'a>(notation: &str, document: &'a Value) -> Result<&'a Value, NotationError> {
    let segments = split_notation(notation).ok_or_else(|| NotationError::Malformed {
        notation: notation.to_string(),
    })?;

    let mut current = document;
    for segment in &segments {
        current = step_into(current, segment).ok_or_else(|| NotationError::NotFound {
            notation: notation.to_string(),
            segment: segment.clone(),
        })?;
    }
    Ok(current)
}

fn step_into<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => {
            let index: i64 = segment.trim().parse().ok()?;
            let resolved = if index < 0 {
                items.len().checked_sub(usize::try_from(index.unsigned_abs()).ok()?)?
            } else {
                usize::try_from(index).ok()?
            };
            items.get(resolved)
        }
        _ => None,
    }
}

/// Split a notation into path segments. Returns `None` for unbalanced brackets.
fn split_notation(notation: &str) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = notation.chars().peekable();

    while let Some(character) = chars.next() {
        match character {
            '.' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(std::mem::take(&mut current));
                }
                let mut inner = String::new();
                let mut closed = false;
                for next_character in chars.by_ref() {
                    if next_character == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(next_character);
                }
                if !closed {
                    return None;
                }
                let trimmed = inner.trim();
                let unquoted = trimmed
                    .strip_prefix('"')
                    .and_then(|rest| rest.strip_suffix('"'))
                    .or_else(|| trimmed.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')))
                    .unwrap_or(trimmed);
                segments.push(unquoted.to_string());
            }
            ']' => return None,
            other => current.push(other),
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }
    Some(segments)
}
