//! Loops and conditionals over input and state

use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use super::{Cmd, Flow, LoopProgress};
use crate::context::Step;
use crate::core::HostwalkError;
use crate::state::template;

pub(crate) fn for_each(step: &mut Step<'_>, name: &str, declared: Option<&str>, input: &str) -> Flow {
    let name = step.populate_lenient(name);
    let source = declared
        .map(|declared| step.populate_lenient(declared))
        .filter(|populated| !populated.trim().is_empty());

    let node = step.node_mut();
    let value = {
        let Cmd::ForEach { progress, .. } = node.cmd_mut() else {
            return Flow::Next(input.to_string());
        };
        let reload = match (&source, progress.as_ref()) {
            (Some(source), Some(loaded)) => loaded.source != *source,
            (None, Some(_)) => false,
            (_, None) => true,
        };
        if reload {
            let source = source.unwrap_or_else(|| input.to_string());
            *progress = Some(LoopProgress {
                items: split(&source),
                source,
                index: 0,
            });
        }
        let has_more = progress.as_ref().is_some_and(|p| p.index < p.items.len());
        if has_more {
            progress.as_mut().map(|loaded| {
                let value = loaded.items[loaded.index].clone();
                loaded.index += 1;
                value
            })
        } else {
            *progress = None;
            None
        }
    };

    match value {
        Some(value) => {
            let value = match value {
                Value::String(s) => Value::String(s.replace(['\r', '\n'], "")),
                other => other,
            };
            debug!(name = %name, value = %value, "for-each");
            let output = template::render(&value);
            node.set_with(name, value);
            Flow::Next(output)
        }
        None => {
            node.remove_with(&name);
            Flow::Skip(input.to_string())
        }
    }
}

/// Split a loop source into elements.
///
/// JSON arrays yield their elements, JSON objects yield `{key, value}`
/// entries, multi-line text yields its non-empty lines, anything else is a
/// comma separated list with optional surrounding brackets and quotes.
pub fn split(text: &str) -> Vec<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
        match parsed {
            Value::Array(items) => return items,
            Value::Object(map) => {
                return map
                    .into_iter()
                    .map(|(key, value)| json!({ "key": key, "value": value }))
                    .collect()
            }
            _ => {}
        }
    }
    if trimmed.contains('\n') {
        return trimmed
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| Value::String(line.to_string()))
            .collect();
    }
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    split_unquoted(inner)
        .into_iter()
        .map(|item| Value::String(unquote(item.trim()).to_string()))
        .filter(|value| value.as_str().is_some_and(|s| !s.is_empty()))
        .collect()
}

fn split_unquoted(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (None, '"') | (None, '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, ',') => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn unquote(text: &str) -> &str {
    for q in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(q) && text.ends_with(q) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

pub(crate) fn repeat_until(step: &mut Step<'_>, signal: &str, input: &str) -> Flow {
    let name = step.populate_lenient(signal);
    let count = step.context().coordinator().count(&name).unwrap_or(0);
    if count > 0 {
        Flow::Next(input.to_string())
    } else {
        Flow::Skip(input.to_string())
    }
}

pub(crate) fn regex(step: &mut Step<'_>, pattern: &str, miss: bool, input: &str) -> Flow {
    let populated = step.populate_lenient(pattern);
    let compiled = match Regex::new(&populated) {
        Ok(compiled) => compiled,
        Err(e) => {
            step.context().error(&format!("invalid regex {}: {}", populated, e));
            return HostwalkError::pattern(populated, e).into();
        }
    };
    let matched = match compiled.captures(input) {
        Some(captures) => {
            let state = step.context().state();
            for name in compiled.capture_names().flatten() {
                if let Some(found) = captures.name(name) {
                    state.set(name, found.as_str());
                }
            }
            true
        }
        None => false,
    };
    if matched != miss {
        Flow::Next(input.to_string())
    } else {
        Flow::Skip(input.to_string())
    }
}

pub(crate) fn read_state(step: &mut Step<'_>, key: &str, input: &str) -> Flow {
    let value = if template::has_pattern(key) {
        let populated = step.populate(key);
        populated.is_complete().then_some(populated.text)
    } else {
        step.lookup(key).map(|value| template::render(&value))
    };
    match value {
        Some(value) if !value.is_empty() => Flow::Next(value),
        _ => Flow::Skip(input.to_string()),
    }
}

pub(crate) fn set_state(step: &mut Step<'_>, key: &str, value: Option<&str>, input: &str) -> Flow {
    let key = step.populate_lenient(key);
    let text = match value {
        Some(value) => step.populate_lenient(value),
        None => input.trim().to_string(),
    };
    let stored = match serde_json::from_str::<Value>(text.trim()) {
        Ok(parsed @ Value::Array(_)) | Ok(parsed @ Value::Object(_)) => parsed,
        _ => Value::String(text),
    };
    step.context().state().set(&key, stored);
    Flow::Next(input.to_string())
}

pub(crate) fn exit_code(step: &mut Step<'_>, expected: &str, input: &str) -> Flow {
    let expected = step.populate_lenient(expected);
    let expected = if expected.trim().is_empty() { "0" } else { expected.trim() };
    let actual = step
        .context()
        .last_exit_code()
        .map(|code| code.to_string())
        .unwrap_or_else(|| "0".to_string());
    if actual == expected {
        Flow::Next(input.to_string())
    } else {
        Flow::Skip(input.to_string())
    }
}

pub(crate) fn countdown(step: &mut Step<'_>, name: &str, initial: i64, input: &str) -> Flow {
    let name = step.populate_lenient(name);
    let remaining = step.context().coordinator().decrease(&name, initial);
    if remaining <= 0 {
        Flow::Next(input.to_string())
    } else {
        Flow::Skip(input.to_string())
    }
}
