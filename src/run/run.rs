//! Run - the stage machine that builds walks for each stage and waits for them
//!
//! The stage only ever moves forward. The driving loop and `abort` both move
//! it with compare-and-set; whoever loses re-reads and continues from what
//! the other one stored.

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use super::config::{RunConfig, ScriptRef};
use super::observer::{LoggingRunObserver, RunObserver};
use super::stage::Stage;
use super::summary::{mask, PendingDelete, PendingDownload, RunSummary};
use crate::cmd::Cmd;
use crate::context::{Context, LoggingObserver, Supervisor};
use crate::coord::{Coordinator, LoggingLatchObserver};
use crate::core::{EngineConfig, HostwalkError, Result};
use crate::dispatch::{Dispatcher, LoggingDispatchObserver};
use crate::graph::{Graph, Script};
use crate::shell::{Host, Shell, ShellFactory, Transfer};
use crate::state::{Scope, State};

pub struct Run {
    id: String,
    config: RunConfig,
    engine: EngineConfig,
    stage: AtomicU8,
    aborted: AtomicBool,
    abort_reason: Mutex<Option<String>>,
    errors: Mutex<Vec<String>>,
    timestamps: Mutex<BTreeMap<String, i64>>,
    state: Arc<State>,
    host_states: DashMap<Host, Arc<State>>,
    shells: DashMap<Host, Arc<dyn Shell>>,
    sessions: Mutex<Vec<Arc<dyn Shell>>>,
    coordinator: Arc<Coordinator>,
    dispatcher: Arc<Dispatcher>,
    shell_factory: Option<Arc<dyn ShellFactory>>,
    transfer: Option<Arc<dyn Transfer>>,
    pending_downloads: Mutex<Vec<PendingDownload>>,
    pending_deletes: Mutex<Vec<PendingDelete>>,
    observers: RwLock<Vec<Arc<dyn RunObserver>>>,
    me: Weak<Run>,
}

impl Run {
    pub fn builder(config: RunConfig) -> RunBuilder {
        RunBuilder {
            config,
            engine: EngineConfig::default(),
            shell_factory: None,
            transfer: None,
            observers: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn stage(&self) -> Stage {
        Stage::from_u8(self.stage.load(Ordering::SeqCst)).unwrap_or(Stage::Done)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.abort_reason.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn timestamps(&self) -> BTreeMap<String, i64> {
        self.timestamps.lock().clone()
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run-level state, parent of every host scope
    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    /// State scope of `host`, created on first use
    pub fn host_state(&self, host: &Host) -> Arc<State> {
        self.host_states
            .entry(host.clone())
            .or_insert_with(|| self.state.child(host.to_string(), Scope::Host))
            .clone()
    }

    pub fn pending_downloads(&self) -> Vec<PendingDownload> {
        self.pending_downloads.lock().clone()
    }

    pub fn pending_deletes(&self) -> Vec<PendingDelete> {
        self.pending_deletes.lock().clone()
    }

    pub fn add_observer(&self, observer: Arc<dyn RunObserver>) {
        self.observers.write().push(observer);
    }

    /// Drive every stage to `Done` and report the outcome.
    ///
    /// A config with errors is refused before any host is touched. An
    /// aborted run still returns `Ok`; the summary carries the abort.
    pub async fn run(self: &Arc<Self>) -> Result<RunSummary> {
        if !self.config.is_valid() {
            for problem in self.config.errors() {
                error!(run = %self.name(), "{}", problem);
            }
            return Err(HostwalkError::invalid_config(self.config.errors().to_vec()));
        }
        if self
            .stage
            .compare_exchange(
                Stage::Pending.as_u8(),
                Stage::PreSetup.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(HostwalkError::runtime(format!("run {} already started", self.name())));
        }

        info!(run = %self.name(), id = %self.id, hosts = self.config.hosts().len(), "run starting");
        self.stamp("start");
        let mut current = Stage::PreSetup;
        loop {
            self.run_stage(current).await;
            match self.advance_stage() {
                Some(next) => current = next,
                None => break,
            }
        }
        self.stamp("stop");

        let summary = self.summary();
        self.write_summary(&summary);
        info!(run = %self.name(), aborted = summary.aborted, errors = summary.errors.len(), "run finished");
        Ok(summary)
    }

    /// Move from whatever stage is stored to the one after it
    fn advance_stage(&self) -> Option<Stage> {
        loop {
            let observed = self.stage();
            let next = observed.next()?;
            if self
                .stage
                .compare_exchange(observed.as_u8(), next.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(next);
            }
        }
    }

    /// Jump forward to `target` unless the run is already past it
    fn force_stage(&self, target: Stage) {
        loop {
            let observed = self.stage();
            if observed >= target {
                return;
            }
            if self
                .stage
                .compare_exchange(observed.as_u8(), target.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                debug!(run = %self.name(), from = %observed, to = %target, "stage forced");
                return;
            }
        }
    }

    async fn run_stage(self: &Arc<Self>, stage: Stage) {
        if stage.runs_scripts() && self.config.skips(stage) {
            info!(run = %self.name(), stage = %stage, "stage skipped");
            return;
        }
        self.stamp(&format!("{}Start", stage.name()));
        for observer in self.observers.read().iter() {
            observer.pre_stage(stage);
        }
        info!(run = %self.name(), stage = %stage, "stage started");

        match stage {
            Stage::Pending => {}
            Stage::PreSetup => self.connect_hosts().await,
            Stage::Setup | Stage::Cleanup => {
                let contexts = self.host_contexts(stage);
                self.dispatch(stage, contexts).await;
            }
            Stage::Run => {
                let contexts = self.role_contexts().await;
                self.dispatch(stage, contexts).await;
            }
            Stage::PreCleanup => self.run_downloads().await,
            Stage::PostCleanup => {
                self.run_downloads().await;
                self.run_deletes().await;
            }
            Stage::Done => self.close_shells().await,
        }

        self.stamp(&format!("{}Stop", stage.name()));
        for observer in self.observers.read().iter() {
            observer.post_stage(stage);
        }
        info!(run = %self.name(), stage = %stage, "stage finished");
    }

    async fn connect_hosts(&self) {
        let hosts = self.config.hosts();
        if hosts.is_empty() {
            return;
        }
        let Some(factory) = self.shell_factory.clone() else {
            self.abort("no shell factory to connect hosts with", true);
            return;
        };
        let attempts = hosts.into_iter().map(|host| {
            let factory = factory.clone();
            async move {
                let result = factory.connect(&host).await;
                (host, result)
            }
        });
        let mut failed = Vec::new();
        for (host, result) in join_all(attempts).await {
            match result {
                Ok(shell) => {
                    debug!(host = %host, "connected");
                    self.shells.insert(host, shell);
                }
                Err(e) => {
                    let err = HostwalkError::connect(host.to_string(), e);
                    self.record_error(err.to_string());
                    failed.push(host.to_string());
                }
            }
        }
        if !failed.is_empty() {
            self.abort(&format!("failed to connect to {}", failed.join(", ")), true);
        }
    }

    /// One walk per host through the given stage's scripts of all its roles
    fn host_contexts(&self, stage: Stage) -> Vec<Arc<Context>> {
        let mut contexts = Vec::new();
        for host in self.config.hosts() {
            let refs: Vec<&ScriptRef> = self
                .config
                .roles()
                .iter()
                .filter(|role| role.hosts.contains(&host))
                .flat_map(|role| role.scripts(stage).iter())
                .collect();
            if refs.is_empty() {
                continue;
            }
            let combined = self.combine(stage.name(), &refs);
            let mut builder = Context::builder(&combined, self.host_state(&host), self.coordinator.clone())
                .dispatcher(&self.dispatcher)
                .supervisor(self.supervisor_ref());
            if let Some(shell) = self.shells.get(&host) {
                builder = builder.shell(shell.clone());
            }
            contexts.push(builder.host(host).build());
        }
        contexts
    }

    /// Chain `refs` under one root, each keeping its own bindings
    fn combine(&self, name: &str, refs: &[&ScriptRef]) -> Script {
        let mut graph = Graph::new(Cmd::script(name));
        let root = graph.root();
        for script_ref in refs {
            let Some(script) = self.config.script(&script_ref.name) else {
                continue;
            };
            let grafted = graph.graft_then(root, script.graph(), script.graph().root(), false);
            for (key, value) in &script_ref.with {
                graph.node_mut(grafted).set_with(key.clone(), value.clone());
            }
        }
        Script::from_graph(name, graph)
    }

    /// One walk per (role, host, run script), each on its own session
    async fn role_contexts(&self) -> Vec<Arc<Context>> {
        let mut planned = Vec::new();
        for role in self.config.roles() {
            for host in &role.hosts {
                for script_ref in &role.run {
                    if let Some(script) = self.config.script(&script_ref.name) {
                        planned.push((host.clone(), script.clone(), script_ref.with.clone()));
                    }
                }
            }
        }
        let sessions = planned.iter().map(|(host, _, _)| self.open_session(host));
        let sessions = join_all(sessions).await;

        let mut contexts = Vec::new();
        for ((host, script, with), session) in planned.into_iter().zip(sessions) {
            let shell = match session {
                Ok(shell) => shell,
                Err(e) => {
                    self.record_error(e.to_string());
                    self.abort(&format!("failed to open a session on {}", host), false);
                    return Vec::new();
                }
            };
            let state = self.host_state(&host).child(script.name(), Scope::Script);
            let mut builder = Context::builder(&script, state, self.coordinator.clone())
                .host(host)
                .with(with)
                .dispatcher(&self.dispatcher)
                .supervisor(self.supervisor_ref());
            if let Some(shell) = shell {
                builder = builder.shell(shell);
            }
            contexts.push(builder.build());
        }
        contexts
    }

    /// A fresh session from the factory, or the primary shell without one
    async fn open_session(&self, host: &Host) -> Result<Option<Arc<dyn Shell>>> {
        match &self.shell_factory {
            Some(factory) => {
                let shell = factory
                    .connect(host)
                    .await
                    .map_err(|e| HostwalkError::connect(host.to_string(), e))?;
                self.sessions.lock().push(shell.clone());
                Ok(Some(shell))
            }
            None => Ok(self.shells.get(host).map(|s| s.clone())),
        }
    }

    async fn dispatch(&self, stage: Stage, contexts: Vec<Arc<Context>>) {
        if contexts.is_empty() {
            return;
        }
        if self.is_aborted() && stage != Stage::Cleanup {
            debug!(run = %self.name(), stage = %stage, "aborted before dispatch");
            return;
        }
        for ctx in contexts {
            self.dispatcher.add_context(ctx);
        }
        self.dispatcher.run_until_stopped().await;
    }

    async fn run_downloads(&self) {
        let pending = std::mem::take(&mut *self.pending_downloads.lock());
        if pending.is_empty() {
            return;
        }
        let Some(transfer) = self.transfer.clone() else {
            for download in &pending {
                self.record_error(format!("no transfer capability to download {}", download.path));
            }
            return;
        };
        for download in pending {
            let ok = transfer
                .download(&download.path, &download.destination, &download.host, download.max_size)
                .await;
            if ok {
                debug!(host = %download.host, path = %download.path, "downloaded");
            } else {
                let err = HostwalkError::transfer("download", &download.path, &download.destination);
                error!(host = %download.host, "{}", err);
                self.record_error(err.to_string());
            }
        }
    }

    async fn run_deletes(&self) {
        let pending = std::mem::take(&mut *self.pending_deletes.lock());
        for delete in pending {
            let Some(shell) = self.shells.get(&delete.host).map(|s| s.clone()) else {
                self.record_error(format!("no shell on {} to delete {}", delete.host, delete.path));
                continue;
            };
            match shell.exec(&format!("rm -rf {}", delete.path)).await {
                Ok(output) if output.exit_code == 0 => {
                    debug!(host = %delete.host, path = %delete.path, "deleted");
                }
                Ok(output) => self.record_error(format!(
                    "delete {} on {} exited with {}",
                    delete.path, delete.host, output.exit_code
                )),
                Err(e) => self.record_error(format!("delete {} on {} failed: {}", delete.path, delete.host, e)),
            }
        }
    }

    async fn close_shells(&self) {
        let mut shells: Vec<Arc<dyn Shell>> = self.shells.iter().map(|e| e.value().clone()).collect();
        shells.extend(self.sessions.lock().drain(..));
        self.shells.clear();
        for shell in shells {
            shell.close().await;
        }
    }

    fn supervisor_ref(&self) -> Weak<dyn Supervisor> {
        let me: Weak<dyn Supervisor> = self.me.clone();
        me
    }

    fn stamp(&self, key: &str) {
        self.timestamps
            .lock()
            .insert(key.to_string(), chrono::Utc::now().timestamp_millis());
    }

    fn record_error(&self, message: String) {
        let message = self.state.secret_filter().filter(&message);
        warn!(run = %self.name(), "{}", message);
        self.errors.lock().push(message);
    }

    /// Snapshot of the run as it stands, secrets masked
    pub fn summary(&self) -> RunSummary {
        let filter = self.state.secret_filter();
        let hosts = self
            .host_states
            .iter()
            .map(|e| (e.key().to_string(), mask(&e.value().to_json(), filter)))
            .collect();
        RunSummary {
            id: self.id.clone(),
            name: self.name().to_string(),
            stage: self.stage(),
            aborted: self.is_aborted(),
            abort_reason: self.abort_reason(),
            errors: self.errors(),
            timestamps: self.timestamps(),
            coordinator: self.coordinator.snapshot(),
            pending_downloads: self.pending_downloads(),
            pending_deletes: self.pending_deletes(),
            state: mask(&self.state.to_json(), filter),
            hosts,
        }
    }

    fn write_summary(&self, summary: &RunSummary) {
        if !self.engine.write_summary {
            return;
        }
        let Some(dir) = self.config.output_dir().or(self.engine.output_dir.as_deref()) else {
            return;
        };
        match summary.write_to(dir) {
            Ok(path) => info!(run = %self.name(), path = %path.display(), "summary written"),
            Err(e) => error!(run = %self.name(), error = %e, "failed to write summary"),
        }
    }
}

impl Supervisor for Run {
    fn abort(&self, reason: &str, skip_cleanup: bool) {
        if self
            .aborted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(run = %self.name(), "already aborted");
            return;
        }
        let reason = self.state.secret_filter().filter(reason);
        error!(run = %self.name(), skip_cleanup, stage = %self.stage(), "run aborted: {}", reason);
        *self.abort_reason.lock() = Some(reason.clone());
        self.errors.lock().push(reason);
        self.coordinator.clear_waiters();
        self.force_stage(if skip_cleanup { Stage::PostCleanup } else { Stage::Run });
        self.dispatcher.stop();
    }

    fn done(&self) {
        info!(run = %self.name(), stage = %self.stage(), "stage ended by done");
        self.coordinator.clear_waiters();
        self.dispatcher.stop();
    }

    fn script(&self, name: &str) -> Option<Arc<Script>> {
        self.config.script(name).cloned()
    }

    fn transfer(&self) -> Option<Arc<dyn Transfer>> {
        self.transfer.clone()
    }

    fn queue_download(&self, host: &Host, path: String, destination: String, max_size: Option<u64>) {
        debug!(host = %host, path = %path, "download queued");
        self.pending_downloads.lock().push(PendingDownload {
            host: host.clone(),
            path,
            destination,
            max_size,
        });
    }

    fn queue_delete(&self, host: &Host, path: String) {
        debug!(host = %host, path = %path, "delete queued");
        self.pending_deletes.lock().push(PendingDelete {
            host: host.clone(),
            path,
        });
    }

    fn spawn_script(&self, parent: &Arc<Context>, name: &str) -> bool {
        let (Some(script), Some(me)) = (self.config.script(name).cloned(), self.me.upgrade()) else {
            return false;
        };
        let mut builder = Context::builder(&script, parent.state().clone_detached(), self.coordinator.clone())
            .dispatcher(&self.dispatcher)
            .supervisor(self.supervisor_ref());
        if let Some(host) = parent.host() {
            builder = builder.host(host.clone());
        }
        let ctx = builder.build();
        // registered now so the stage cannot end before the walk starts
        self.dispatcher.add_context(ctx.clone());

        match (ctx.host().cloned(), self.shell_factory.clone()) {
            (Some(host), Some(_)) => {
                self.dispatcher.spawn(async move {
                    match me.open_session(&host).await {
                        Ok(Some(shell)) => {
                            ctx.set_shell(shell);
                            me.dispatcher.submit(ctx);
                        }
                        Ok(None) => me.dispatcher.submit(ctx),
                        Err(e) => ctx.abort(&e.to_string(), false),
                    }
                });
            }
            _ => {
                if let Some(shell) = parent.shell() {
                    ctx.set_shell(shell);
                }
                self.dispatcher.submit(ctx);
            }
        }
        true
    }
}

/// Builder for [`Run`]
pub struct RunBuilder {
    config: RunConfig,
    engine: EngineConfig,
    shell_factory: Option<Arc<dyn ShellFactory>>,
    transfer: Option<Arc<dyn Transfer>>,
    observers: Vec<Arc<dyn RunObserver>>,
}

impl RunBuilder {
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn shell_factory(mut self, factory: Arc<dyn ShellFactory>) -> Self {
        self.shell_factory = Some(factory);
        self
    }

    pub fn transfer(mut self, transfer: Arc<dyn Transfer>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Must be called inside a tokio runtime
    pub fn build(self) -> Result<Arc<Run>> {
        let dispatcher = Dispatcher::new(self.engine.clone())?;
        dispatcher.add_observer(Arc::new(LoggingDispatchObserver));
        dispatcher.add_context_observer(Arc::new(LoggingObserver));
        let coordinator = Arc::new(Coordinator::new(self.config.name()));
        coordinator.add_observer(Arc::new(LoggingLatchObserver));
        for (name, count) in self.config.signal_counts() {
            coordinator.initialize(name, *count);
        }
        let mut observers: Vec<Arc<dyn RunObserver>> = vec![Arc::new(LoggingRunObserver)];
        observers.extend(self.observers);
        let state = State::with_values(self.config.state().clone());
        Ok(Arc::new_cyclic(|me| Run {
            id: uuid::Uuid::new_v4().to_string(),
            config: self.config,
            engine: self.engine,
            stage: AtomicU8::new(Stage::Pending.as_u8()),
            aborted: AtomicBool::new(false),
            abort_reason: Mutex::new(None),
            errors: Mutex::new(Vec::new()),
            timestamps: Mutex::new(BTreeMap::new()),
            state,
            host_states: DashMap::new(),
            shells: DashMap::new(),
            sessions: Mutex::new(Vec::new()),
            coordinator,
            dispatcher,
            shell_factory: self.shell_factory,
            transfer: self.transfer,
            pending_downloads: Mutex::new(Vec::new()),
            pending_deletes: Mutex::new(Vec::new()),
            observers: RwLock::new(observers),
            me: me.clone(),
        }))
    }
}
