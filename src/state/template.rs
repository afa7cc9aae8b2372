//! `${{name:default}}` variable expansion.
//!
//! Only the plain variable form is understood. A pattern whose name has no
//! value and which carries no default stays in the text verbatim and is
//! reported as unresolved.

use regex::{Captures, Regex};
use serde_json::Value;

use crate::core::{HostwalkError, Result};

pub const PATTERN_PREFIX: &str = "${{";
pub const PATTERN_SUFFIX: &str = "}}";
pub const DEFAULT_SEPARATOR: char = ':';

lazy_static::lazy_static! {
    static ref PATTERN: Regex =
        Regex::new(r"\$\{\{\s*([^{}:]+?)\s*(?::([^{}]*))?\}\}").expect("static pattern");
}

/// Result of expanding a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Populated {
    pub text: String,
    pub unresolved: Vec<String>,
}

impl Populated {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// The expanded text, or a template error naming what stayed unresolved
    pub fn into_result(self, pattern: &str) -> Result<String> {
        if self.is_complete() {
            Ok(self.text)
        } else {
            Err(HostwalkError::template(pattern, self.unresolved))
        }
    }
}

/// True when the text holds at least one pattern
pub fn has_pattern(text: &str) -> bool {
    PATTERN.is_match(text)
}

/// Expand every pattern in `text` using `lookup`
pub fn populate<F>(text: &str, lookup: F) -> Populated
where
    F: Fn(&str) -> Option<Value>,
{
    if !text.contains(PATTERN_PREFIX) {
        return Populated {
            text: text.to_string(),
            unresolved: Vec::new(),
        };
    }
    let mut unresolved = Vec::new();
    let expanded = PATTERN.replace_all(text, |caps: &Captures| {
        let name = caps[1].trim();
        match lookup(name) {
            Some(value) => render(&value),
            None => match caps.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    unresolved.push(name.to_string());
                    caps[0].to_string()
                }
            },
        }
    });
    Populated {
        text: expanded.into_owned(),
        unresolved,
    }
}

/// Text form of a state value as it appears in an expanded template
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
