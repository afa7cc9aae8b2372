use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use super::secret::SecretFilter;
use super::template::{self, Populated};

pub const RUN_PREFIX: &str = "RUN.";
pub const HOST_PREFIX: &str = "HOST.";
pub const SECRET_PREFIX: &str = "_";
pub const CHILD_DELIMITER: char = '.';

/// Level of a state scope in the run → host → script hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Run,
    Host,
    Script,
}

/// Hierarchical key/value store.
///
/// Reads fall through to the parent scope when a key is not set locally.
/// `RUN.` keys address the root scope and `HOST.` keys the closest host scope.
/// Keys starting with `_` are stored without the prefix and their values are
/// registered with the tree's [`SecretFilter`].
pub struct State {
    name: String,
    scope: Scope,
    parent: Option<Arc<State>>,
    values: RwLock<Map<String, Value>>,
    secrets: Arc<SecretFilter>,
}

impl State {
    /// Create the run-level root scope
    pub fn new_root() -> Arc<Self> {
        Arc::new(Self {
            name: "run".to_string(),
            scope: Scope::Run,
            parent: None,
            values: RwLock::new(Map::new()),
            secrets: Arc::new(SecretFilter::new()),
        })
    }

    /// Create the root scope with initial values
    pub fn with_values(values: Map<String, Value>) -> Arc<Self> {
        let root = Self::new_root();
        for (key, value) in values {
            root.set(&key, value);
        }
        root
    }

    /// Create a child scope sharing this tree's secret filter
    pub fn child(self: &Arc<Self>, name: impl Into<String>, scope: Scope) -> Arc<State> {
        Arc::new(State {
            name: name.into(),
            scope,
            parent: Some(self.clone()),
            values: RwLock::new(Map::new()),
            secrets: self.secrets.clone(),
        })
    }

    /// Copy of this scope's values under the same parent
    pub fn clone_detached(&self) -> Arc<State> {
        Arc::new(State {
            name: self.name.clone(),
            scope: self.scope,
            parent: self.parent.clone(),
            values: RwLock::new(self.values.read().clone()),
            secrets: self.secrets.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn parent(&self) -> Option<&Arc<State>> {
        self.parent.as_ref()
    }

    pub fn secret_filter(&self) -> &Arc<SecretFilter> {
        &self.secrets
    }

    fn root(&self) -> &State {
        let mut current = self;
        while let Some(parent) = current.parent.as_deref() {
            current = parent;
        }
        current
    }

    fn closest(&self, scope: Scope) -> Option<&State> {
        let mut current = Some(self);
        while let Some(state) = current {
            if state.scope == scope {
                return Some(state);
            }
            current = state.parent.as_deref();
        }
        None
    }

    /// Resolve the scope a key addresses and the key within it
    fn target<'a, 'k>(&'a self, key: &'k str) -> (&'a State, &'k str) {
        if let Some(rest) = key.strip_prefix(RUN_PREFIX) {
            (self.root(), rest)
        } else if let Some(rest) = key.strip_prefix(HOST_PREFIX) {
            (self.closest(Scope::Host).unwrap_or(self), rest)
        } else {
            (self, key)
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let (start, key) = self.target(key);
        let mut current = Some(start);
        while let Some(state) = current {
            if let Some(value) = state.get_local(key) {
                return Some(value);
            }
            current = state.parent.as_deref();
        }
        None
    }

    /// Value set in this scope only, following `a.b` into nested objects
    pub fn get_local(&self, key: &str) -> Option<Value> {
        let values = self.values.read();
        if let Some(value) = values.get(key) {
            return Some(value.clone());
        }
        let mut parts = key.split(CHILD_DELIMITER);
        let first = parts.next()?;
        let mut current = values.get(first)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        let (target, key) = self.target(key);
        let key = match key.strip_prefix(SECRET_PREFIX) {
            Some(stripped) if !stripped.is_empty() => {
                self.secrets.add_secret(template::render(&value));
                stripped
            }
            _ => key,
        };
        target.values.write().insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let (target, key) = self.target(key);
        target.values.write().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    /// This scope's own values as a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(self.values.read().clone())
    }

    /// Expand `${{name:default}}` patterns against this scope
    pub fn populate(&self, text: &str) -> Populated {
        template::populate(text, |name| self.get(name))
    }

    /// Indented listing of this scope and its ancestors, secrets masked
    pub fn tree(&self) -> String {
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(state) = current {
            chain.push(state);
            current = state.parent.as_deref();
        }
        let mut out = String::new();
        for (depth, state) in chain.iter().rev().enumerate() {
            let indent = "  ".repeat(depth);
            out.push_str(&format!("{}{} ({:?})\n", indent, state.name, state.scope));
            for (key, value) in state.values.read().iter() {
                out.push_str(&format!("{}  {} = {}\n", indent, key, template::render(value)));
            }
        }
        self.secrets.filter(&out)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("keys", &self.keys())
            .finish()
    }
}
