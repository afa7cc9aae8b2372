//! In-memory shell, factory and transfer used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use hostwalk::{Host, Prompt, RunObserver, ShOutput, Shell, ShellFactory, Stage, Transfer};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Commands seen by every fake shell, as `hostname: command`
pub type CommandLog = Arc<Mutex<Vec<String>>>;

/// Answers `echo X` with `X`, `exit N` with exit code N, `fail` with an error
/// and anything else with empty output
pub struct FakeShell {
    host: Host,
    log: CommandLog,
    open: AtomicBool,
}

impl FakeShell {
    pub fn new(host: Host, log: CommandLog) -> Self {
        Self {
            host,
            log,
            open: AtomicBool::new(true),
        }
    }

    async fn respond(&self, command: &str) -> anyhow::Result<ShOutput> {
        tokio::task::yield_now().await;
        self.log.lock().push(format!("{}: {}", self.host.hostname, command));
        if let Some(text) = command.strip_prefix("echo ") {
            return Ok(ShOutput::ok(text));
        }
        if let Some(code) = command.strip_prefix("exit ") {
            return Ok(ShOutput::new("", code.trim().parse()?));
        }
        if command == "fail" {
            anyhow::bail!("connection reset");
        }
        Ok(ShOutput::ok(""))
    }
}

#[async_trait]
impl Shell for FakeShell {
    async fn sh(&self, command: &str, _prompts: &[Prompt]) -> anyhow::Result<ShOutput> {
        self.respond(command).await
    }

    async fn exec(&self, command: &str) -> anyhow::Result<ShOutput> {
        self.respond(command).await
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pub log: CommandLog,
    pub refused: BTreeSet<String>,
    pub connects: AtomicUsize,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Factory refusing connections to `hostname`
    pub fn refusing(hostname: &str) -> Arc<Self> {
        Arc::new(Self {
            refused: BTreeSet::from([hostname.to_string()]),
            ..Default::default()
        })
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn saw(&self, entry: &str) -> bool {
        self.log.lock().iter().any(|line| line == entry)
    }
}

#[async_trait]
impl ShellFactory for FakeFactory {
    async fn connect(&self, host: &Host) -> anyhow::Result<Arc<dyn Shell>> {
        if self.refused.contains(&host.hostname) {
            anyhow::bail!("connection refused");
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeShell::new(host.clone(), self.log.clone())))
    }
}

/// Records every transfer; paths containing `missing` fail
#[derive(Default)]
pub struct FakeTransfer {
    pub done: Mutex<Vec<String>>,
}

#[async_trait]
impl Transfer for FakeTransfer {
    async fn upload(&self, path: &str, destination: &str, host: &Host) -> bool {
        self.done
            .lock()
            .push(format!("upload {}:{} -> {}", host.hostname, path, destination));
        !path.contains("missing")
    }

    async fn download(&self, path: &str, destination: &str, host: &Host, _max_size: Option<u64>) -> bool {
        self.done
            .lock()
            .push(format!("download {}:{} -> {}", host.hostname, path, destination));
        !path.contains("missing")
    }
}

#[derive(Default)]
pub struct StageRecorder {
    pub stages: Mutex<Vec<Stage>>,
}

impl RunObserver for StageRecorder {
    fn pre_stage(&self, stage: Stage) {
        self.stages.lock().push(stage);
    }
}
