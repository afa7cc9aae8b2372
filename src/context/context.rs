//! One walk over a private copy of a script.
//!
//! A context never runs two steps at once: a step is only submitted from the
//! previous step's continuation, and the graph lock is held for the whole
//! synchronous part of a step.

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::observer::ContextObserver;
use super::step::Step;
use super::supervisor::Supervisor;
use crate::cmd::{self, Flow};
use crate::coord::Coordinator;
use crate::dispatch::Dispatcher;
use crate::graph::{Graph, NodeId, Script};
use crate::shell::{Host, Shell};
use crate::state::State;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct Cursor {
    node: Option<NodeId>,
    input: String,
    label: String,
}

pub struct Context {
    id: u64,
    script: String,
    host: Option<Host>,
    label: String,
    graph: Mutex<Graph>,
    cursor: Mutex<Cursor>,
    state: Arc<State>,
    coordinator: Arc<Coordinator>,
    dispatcher: Weak<Dispatcher>,
    supervisor: Option<Weak<dyn Supervisor>>,
    shell: RwLock<Option<Arc<dyn Shell>>>,
    halted: AtomicBool,
    aborted: AtomicBool,
    finished: AtomicBool,
    exit_code: Mutex<Option<i32>>,
    waiting: Mutex<Option<String>>,
    created_at: i64,
    step_started_at: AtomicI64,
    steps: AtomicU64,
}

impl Context {
    pub fn builder(script: &Script, state: Arc<State>, coordinator: Arc<Coordinator>) -> ContextBuilder {
        ContextBuilder {
            graph: script.graph().deep_copy(),
            script: script.name().to_string(),
            state,
            coordinator,
            host: None,
            shell: None,
            dispatcher: Weak::new(),
            supervisor: None,
            input: String::new(),
            with: Map::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// `host:script`, or the script name for host-less walks
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn script_name(&self) -> &str {
        &self.script
    }

    pub fn host(&self) -> Option<&Host> {
        self.host.as_ref()
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        self.dispatcher.upgrade()
    }

    pub fn supervisor(&self) -> Option<Arc<dyn Supervisor>> {
        self.supervisor.as_ref().and_then(|s| s.upgrade())
    }

    pub fn shell(&self) -> Option<Arc<dyn Shell>> {
        self.shell.read().clone()
    }

    pub fn set_shell(&self, shell: Arc<dyn Shell>) {
        *self.shell.write() = Some(shell);
    }

    pub fn check_exit_code(&self) -> bool {
        self.dispatcher()
            .map(|d| d.config().check_exit_code)
            .unwrap_or(false)
    }

    fn log_nodes(&self) -> bool {
        self.dispatcher()
            .map(|d| d.config().log_nodes)
            .unwrap_or(true)
    }

    fn observers(&self) -> Vec<Arc<dyn ContextObserver>> {
        self.dispatcher()
            .map(|d| d.context_observers())
            .unwrap_or_default()
    }

    /// Log a line for this walk with secrets masked
    pub fn log(&self, message: &str) {
        let message = self.state.secret_filter().filter(message);
        info!(context = %self.label, "{}", message);
    }

    pub fn error(&self, message: &str) {
        let message = self.state.secret_filter().filter(message);
        error!(context = %self.label, "{}", message);
    }

    pub fn set_exit_code(&self, code: i32) {
        *self.exit_code.lock() = Some(code);
    }

    /// Exit code of the last `sh` this walk ran
    pub fn last_exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }

    pub fn set_waiting(&self, latch: Option<String>) {
        *self.waiting.lock() = latch;
    }

    /// Latch this walk is parked on
    pub fn waiting(&self) -> Option<String> {
        self.waiting.lock().clone()
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.lock().is_some()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Rendering of the node the cursor is on
    pub fn current_node(&self) -> String {
        self.cursor.lock().label.clone()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn step_started_at(&self) -> i64 {
        self.step_started_at.load(Ordering::SeqCst)
    }

    /// Number of steps run so far
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    /// Text rendering of this walk's graph. Not to be called from inside a step.
    pub fn render(&self) -> String {
        self.graph.lock().render()
    }

    /// Stop accepting continuations; pending ones are discarded
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Run a future on the dispatcher's runtime
    pub fn spawn<F>(&self, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.dispatcher() {
            Some(dispatcher) => {
                dispatcher.spawn(future);
                true
            }
            None => false,
        }
    }

    /// Call `f` after `delay` on the dispatcher's timer
    pub fn schedule<F>(&self, delay: Duration, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.dispatcher() {
            Some(dispatcher) => {
                dispatcher.schedule(delay, f);
                true
            }
            None => false,
        }
    }

    /// Run the node under the cursor
    pub(crate) fn step(self: &Arc<Self>) {
        if self.is_halted() {
            return;
        }
        let flow = {
            let mut graph = self.graph.lock();
            let (node, input) = {
                let mut cursor = self.cursor.lock();
                let Some(node) = cursor.node else {
                    return;
                };
                cursor.label = graph.node(node).cmd().to_string();
                (node, cursor.input.clone())
            };
            self.step_started_at.store(now_millis(), Ordering::SeqCst);
            self.steps.fetch_add(1, Ordering::SeqCst);

            let rendered = graph.node(node).cmd().to_string();
            for observer in self.observers() {
                observer.pre_start(self, &rendered);
            }
            if !graph.node(node).is_silent() && self.log_nodes() {
                self.log(&rendered);
            }
            let mut step = Step::new(&mut graph, node, self);
            cmd::run(&mut step, &input)
        };
        self.apply(flow);
    }

    pub(crate) fn apply(self: &Arc<Self>, flow: Flow) {
        match flow {
            Flow::Next(output) => self.advance(output, false),
            Flow::Skip(output) => self.advance(output, true),
            Flow::Abort {
                message,
                skip_cleanup,
            } => self.abort(&message, skip_cleanup),
            Flow::Done => self.done(),
            Flow::Suspend => {}
        }
    }

    /// Move the cursor to the current node's next or skip target and submit
    /// the walk again, or finish it when there is no target
    pub(crate) fn advance(self: &Arc<Self>, output: String, skip: bool) {
        if self.is_halted() {
            debug!(context = %self.label, "discarding continuation of a halted walk");
            return;
        }
        let (rendered, target) = {
            let graph = self.graph.lock();
            let mut cursor = self.cursor.lock();
            let Some(current) = cursor.node else {
                return;
            };
            let target = if skip {
                graph.skip(current)
            } else {
                graph.next(current)
            };
            cursor.node = target;
            cursor.input = output.clone();
            (graph.node(current).cmd().to_string(), target)
        };
        for observer in self.observers() {
            if skip {
                observer.pre_skip(self, &rendered, &output);
            } else {
                observer.pre_next(self, &rendered, &output);
            }
        }
        match (target, self.dispatcher()) {
            (Some(_), Some(dispatcher)) => dispatcher.submit(self.clone()),
            (Some(_), None) => {
                warn!(context = %self.label, "dispatcher gone, walk stops");
                self.halt();
            }
            (None, _) => self.finish(),
        }
    }

    pub(crate) fn abort(self: &Arc<Self>, message: &str, skip_cleanup: bool) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        self.halt();
        self.error(&format!("Abort! {}", message));
        if let Some(supervisor) = self.supervisor() {
            supervisor.abort(message, skip_cleanup);
        }
        if let Some(dispatcher) = self.dispatcher() {
            dispatcher.remove(self.id);
        }
    }

    pub(crate) fn done(self: &Arc<Self>) {
        self.halt();
        match (self.supervisor(), self.dispatcher()) {
            (Some(supervisor), _) => supervisor.done(),
            (None, Some(dispatcher)) => {
                self.coordinator.clear_waiters();
                dispatcher.stop();
            }
            (None, None) => {}
        }
    }

    fn finish(self: &Arc<Self>) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        for observer in self.observers() {
            observer.on_done(self);
        }
        debug!(context = %self.label, steps = self.steps(), "walk finished");
        if let Some(dispatcher) = self.dispatcher() {
            dispatcher.remove(self.id);
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    graph: Graph,
    script: String,
    state: Arc<State>,
    coordinator: Arc<Coordinator>,
    host: Option<Host>,
    shell: Option<Arc<dyn Shell>>,
    dispatcher: Weak<Dispatcher>,
    supervisor: Option<Weak<dyn Supervisor>>,
    input: String,
    with: Map<String, Value>,
}

impl ContextBuilder {
    pub fn host(mut self, host: Host) -> Self {
        self.host = Some(host);
        self
    }

    pub fn shell(mut self, shell: Arc<dyn Shell>) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn dispatcher(mut self, dispatcher: &Arc<Dispatcher>) -> Self {
        self.dispatcher = Arc::downgrade(dispatcher);
        self
    }

    pub fn supervisor(mut self, supervisor: Weak<dyn Supervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Input of the first step
    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    /// Bindings placed on the root node, visible to the whole walk
    pub fn with(mut self, bindings: Map<String, Value>) -> Self {
        self.with.extend(bindings);
        self
    }

    pub fn build(mut self) -> Arc<Context> {
        let root = self.graph.root();
        for (key, value) in self.with {
            self.graph.node_mut(root).set_with(key, value);
        }
        let label = match &self.host {
            Some(host) => format!("{}:{}", host.short_name(), self.script),
            None => self.script.clone(),
        };
        let now = now_millis();
        Arc::new(Context {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            script: self.script,
            host: self.host,
            label,
            cursor: Mutex::new(Cursor {
                node: Some(root),
                input: self.input,
                label: self.graph.node(root).cmd().to_string(),
            }),
            graph: Mutex::new(self.graph),
            state: self.state,
            coordinator: self.coordinator,
            dispatcher: self.dispatcher,
            supervisor: self.supervisor,
            shell: RwLock::new(self.shell),
            halted: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            exit_code: Mutex::new(None),
            waiting: Mutex::new(None),
            created_at: now,
            step_started_at: AtomicI64::new(now),
            steps: AtomicU64::new(0),
        })
    }
}

/// One-shot handle to resume a suspended step.
///
/// Consumed by whichever outcome is reported; dropping it leaves the walk
/// parked for good.
pub struct Continuation {
    ctx: Arc<Context>,
    uid: u64,
}

impl Continuation {
    pub(crate) fn new(ctx: Arc<Context>, uid: u64) -> Self {
        Self { ctx, uid }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Uid of the node that suspended
    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn next(self, output: impl Into<String>) {
        self.ctx.advance(output.into(), false);
    }

    pub fn skip(self, output: impl Into<String>) {
        self.ctx.advance(output.into(), true);
    }

    pub fn abort(self, message: impl Into<String>, skip_cleanup: bool) {
        self.ctx.abort(&message.into(), skip_cleanup);
    }

    pub fn done(self) {
        self.ctx.done();
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("context", &self.ctx.label())
            .field("uid", &self.uid)
            .finish()
    }
}
