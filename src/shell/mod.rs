//! Capabilities the engine consumes from the remote-shell and file-transfer layers.
//!
//! The transport itself (sessions, prompts on the wire, reconnects) lives
//! outside this crate. Walks only see eventual outcomes of these futures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_PORT: u16 = 22;

/// Address of a remote host
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Host {
    pub user: Option<String>,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Host {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            user: None,
            hostname: hostname.into(),
            port: DEFAULT_PORT,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Parse `user@hostname:port`; user and port are optional
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (user, rest) = match text.split_once('@') {
            Some((user, rest)) => (Some(user.to_string()), rest),
            None => (None, text),
        };
        let (hostname, port) = match rest.rsplit_once(':') {
            Some((hostname, port)) => (hostname, port.parse().ok()?),
            None => (rest, DEFAULT_PORT),
        };
        if hostname.is_empty() || user.as_deref() == Some("") {
            return None;
        }
        Some(Self {
            user,
            hostname: hostname.to_string(),
            port,
        })
    }

    /// Hostname up to the first dot
    pub fn short_name(&self) -> &str {
        self.hostname.split('.').next().unwrap_or(&self.hostname)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}@{}:{}", user, self.hostname, self.port),
            None => write!(f, "{}:{}", self.hostname, self.port),
        }
    }
}

/// Response sent when the shell output matches a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub pattern: String,
    pub response: String,
}

impl Prompt {
    pub fn new(pattern: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            response: response.into(),
        }
    }
}

/// Outcome of one shell command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShOutput {
    pub output: String,
    pub exit_code: i32,
}

impl ShOutput {
    pub fn new(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
        }
    }

    pub fn ok(output: impl Into<String>) -> Self {
        Self::new(output, 0)
    }
}

/// An interactive session on one host
#[async_trait]
pub trait Shell: Send + Sync {
    /// Run a command in the interactive session, answering prompts
    async fn sh(&self, command: &str, prompts: &[Prompt]) -> anyhow::Result<ShOutput>;

    /// Run a command outside the interactive session
    async fn exec(&self, command: &str) -> anyhow::Result<ShOutput>;

    fn is_open(&self) -> bool;

    /// Open and idle at a prompt
    fn is_ready(&self) -> bool {
        self.is_open()
    }

    async fn close(&self) {}
}

/// Opens shell sessions
#[async_trait]
pub trait ShellFactory: Send + Sync {
    async fn connect(&self, host: &Host) -> anyhow::Result<Arc<dyn Shell>>;
}

/// Moves files between the local machine and a host
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn upload(&self, path: &str, destination: &str, host: &Host) -> bool;

    async fn download(
        &self,
        path: &str,
        destination: &str,
        host: &Host,
        max_size: Option<u64>,
    ) -> bool;
}
