use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::stage::Stage;
use crate::coord::CoordinatorSnapshot;
use crate::core::{HostwalkError, Result};
use crate::shell::Host;
use crate::state::SecretFilter;

pub const SUMMARY_FILE: &str = "run.json";

/// A download deferred to the end of its stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDownload {
    pub host: Host,
    pub path: String,
    pub destination: String,
    pub max_size: Option<u64>,
}

/// A remote path removed when the run ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelete {
    pub host: Host,
    pub path: String,
}

/// What a finished run reports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub id: String,
    pub name: String,
    pub stage: Stage,
    pub aborted: bool,
    pub abort_reason: Option<String>,
    pub errors: Vec<String>,
    pub timestamps: BTreeMap<String, i64>,
    pub coordinator: CoordinatorSnapshot,
    pub pending_downloads: Vec<PendingDownload>,
    pub pending_deletes: Vec<PendingDelete>,
    pub state: Value,
    pub hosts: BTreeMap<String, Value>,
}

impl RunSummary {
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| HostwalkError::serialization("json", e))
    }

    /// Write `run.json` into `dir`, creating it when missing
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| HostwalkError::io("create output directory", e))?;
        let path = dir.join(SUMMARY_FILE);
        std::fs::write(&path, self.to_json_pretty()?).map_err(|e| HostwalkError::io("write run summary", e))?;
        Ok(path)
    }
}

/// Copy of `value` with every secret in its strings masked
pub(crate) fn mask(value: &Value, filter: &SecretFilter) -> Value {
    match value {
        Value::String(text) => Value::String(filter.filter(text)),
        Value::Array(items) => Value::Array(items.iter().map(|v| mask(v, filter)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), mask(v, filter)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mask_nested_strings() {
        let filter = SecretFilter::new();
        filter.add_secret("hunter2");
        let masked = mask(
            &json!({"password": "hunter2", "list": ["a", "xhunter2x"], "port": 22}),
            &filter,
        );
        assert_eq!(masked, json!({"password": "****", "list": ["a", "x****x"], "port": 22}));
    }
}
