use parking_lot::RwLock;
use std::collections::BTreeSet;

pub const SECRET_MASK: &str = "****";

/// Replaces registered secret values in log text
#[derive(Debug, Default)]
pub struct SecretFilter {
    secrets: RwLock<BTreeSet<String>>,
}

impl SecretFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_secret(&self, secret: impl Into<String>) {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.write().insert(secret);
        }
    }

    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.read().is_empty()
    }

    pub fn filter(&self, text: &str) -> String {
        let secrets = self.secrets.read();
        if secrets.is_empty() {
            return text.to_string();
        }
        // longest first so a secret containing another is masked whole
        let mut ordered: Vec<&String> = secrets.iter().collect();
        ordered.sort_by(|a, b| b.len().cmp(&a.len()));
        let mut filtered = text.to_string();
        for secret in ordered {
            if filtered.contains(secret.as_str()) {
                filtered = filtered.replace(secret.as_str(), SECRET_MASK);
            }
        }
        filtered
    }
}
