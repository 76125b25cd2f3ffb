//! Recovery of the structured state-change payload a model embeds in its
//! output. Models wrap the object in code fences, prefix it with stray
//! punctuation, or keep talking after the closing brace; extraction tolerates
//! all of that but never invents a payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const STATE_UPDATE_TAG: &str = "state_update";

const FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("directive text is empty")]
    Empty,
    #[error("no opening brace found in directive text")]
    NoObject { raw: String },
    #[error("directive object is never closed")]
    Unbalanced { raw: String },
    #[error("directive is not valid JSON: {reason}")]
    InvalidJson { reason: String, raw: String },
    #[error("directive has an unexpected shape: {reason}")]
    Shape { reason: String, raw: String },
}

impl ExtractError {
    /// Original text handed to the extractor, kept for diagnostics.
    pub fn raw(&self) -> Option<&str> {
        match self {
            ExtractError::Empty => None,
            ExtractError::NoObject { raw }
            | ExtractError::Unbalanced { raw }
            | ExtractError::InvalidJson { raw, .. }
            | ExtractError::Shape { raw, .. } => Some(raw),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDelta {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChanges {
    #[serde(default)]
    pub remove: Vec<ItemDelta>,
    #[serde(default)]
    pub add: Vec<ItemDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    #[serde(default)]
    pub stat_changes: BTreeMap<String, i64>,
    #[serde(default)]
    pub item_changes: ItemChanges,
    #[serde(default, rename = "new_hidden_tags", alias = "new_tags")]
    pub new_tags: Vec<String>,
    #[serde(default, rename = "remove_hidden_tags", alias = "remove_tags")]
    pub remove_tags: Vec<String>,
    #[serde(default)]
    pub score: Option<i64>,
}

pub fn extract(raw: &str) -> Result<Directive, ExtractError> {
    let value = extract_object(raw)?;
    if !value.is_object() {
        return Err(ExtractError::Shape {
            reason: "expected a JSON object".to_string(),
            raw: raw.to_string(),
        });
    }

    serde_json::from_value(value).map_err(|err| ExtractError::Shape {
        reason: err.to_string(),
        raw: raw.to_string(),
    })
}

/// Finds the first balanced `{...}` in `raw` and parses it.
pub fn extract_object(raw: &str) -> Result<Value, ExtractError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ExtractError::Empty);
    }

    let text = strip_fences(text);
    let text = text.strip_prefix(',').map(str::trim_start).unwrap_or(text);

    let Some(start) = text.find('{') else {
        return Err(ExtractError::NoObject {
            raw: raw.to_string(),
        });
    };
    let text = &text[start..];

    let Some(end) = balanced_object_end(text) else {
        return Err(ExtractError::Unbalanced {
            raw: raw.to_string(),
        });
    };

    serde_json::from_str(&text[..end]).map_err(|err| ExtractError::InvalidJson {
        reason: err.to_string(),
        raw: raw.to_string(),
    })
}

/// Extracts the directive carried in a `<tag>...</tag>` block at any position
/// in a longer completion. `None` when the block is absent.
pub fn extract_tagged(text: &str, tag: &str) -> Option<Result<Directive, ExtractError>> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);

    let start = text.find(&open)? + open.len();
    let body = match text[start..].find(&close) {
        Some(len) => &text[start..start + len],
        None => &text[start..],
    };

    Some(extract(body))
}

fn strip_fences(text: &str) -> &str {
    let mut text = text;
    if let Some(rest) = text.strip_prefix(FENCE) {
        text = rest;
        if let Some(lang) = text.get(..4)
            && lang.eq_ignore_ascii_case("json")
        {
            text = &text[4..];
        }
    }
    if let Some(rest) = text.strip_suffix(FENCE) {
        text = rest;
    }
    text.trim()
}

// Byte offset one past the brace that closes the object opening at index 0.
// Braces inside string literals do not count toward depth.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }

    None
}
