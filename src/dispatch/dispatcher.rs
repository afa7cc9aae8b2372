//! Dispatcher - bounded pool of step workers plus the registry of live walks
//!
//! Each submission is one tokio task that holds a semaphore permit for the
//! duration of a single synchronous step. Walks resubmit themselves from
//! their continuations, so nothing here loops over a walk.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};

use super::hooks::DispatchObserver;
use super::types::ActiveContext;
use crate::context::{Context, ContextObserver};
use crate::core::{EngineConfig, HostwalkError, Result};

pub struct Dispatcher {
    config: EngineConfig,
    handle: Handle,
    permits: Arc<Semaphore>,
    contexts: DashMap<u64, Arc<Context>>,
    running: AtomicBool,
    generation: AtomicU64,
    stopped: Notify,
    observers: RwLock<Vec<Arc<dyn DispatchObserver>>>,
    context_observers: RwLock<Vec<Arc<dyn ContextObserver>>>,
    me: Weak<Dispatcher>,
}

impl Dispatcher {
    /// Create a dispatcher on the current tokio runtime
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        config.validate().map_err(HostwalkError::configuration)?;
        let handle = Handle::try_current()
            .map_err(|e| HostwalkError::runtime(format!("dispatcher needs a tokio runtime: {}", e)))?;
        let workers = config.worker_threads;
        Ok(Arc::new_cyclic(|me| Self {
            config,
            handle,
            permits: Arc::new(Semaphore::new(workers)),
            contexts: DashMap::new(),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            stopped: Notify::new(),
            observers: RwLock::new(Vec::new()),
            context_observers: RwLock::new(Vec::new()),
            me: me.clone(),
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn add_observer(&self, observer: Arc<dyn DispatchObserver>) {
        self.observers.write().push(observer);
    }

    pub fn add_context_observer(&self, observer: Arc<dyn ContextObserver>) {
        self.context_observers.write().push(observer);
    }

    pub(crate) fn context_observers(&self) -> Vec<Arc<dyn ContextObserver>> {
        self.context_observers.read().clone()
    }

    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }

    pub fn schedule<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        });
    }

    /// Register a walk for the next `start`
    pub fn add_context(&self, ctx: Arc<Context>) {
        debug!(context = %ctx.label(), id = ctx.id(), "context added");
        self.contexts.insert(ctx.id(), ctx);
    }

    /// Queue one step of `ctx`
    pub fn submit(&self, ctx: Arc<Context>) {
        if ctx.is_halted() {
            return;
        }
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            ctx.step();
        });
    }

    /// Submit every registered walk. Returns false when already running.
    pub fn start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let contexts: Vec<Arc<Context>> = self.contexts.iter().map(|e| e.value().clone()).collect();
        for observer in self.observers.read().iter() {
            observer.pre_start(contexts.len());
        }
        info!(contexts = contexts.len(), generation, "dispatcher started");
        if contexts.is_empty() {
            self.finish();
            return true;
        }
        for ctx in contexts {
            self.submit(ctx);
        }
        self.start_nanny(generation);
        true
    }

    /// Start and wait until every walk ended or the dispatcher was stopped
    pub async fn run_until_stopped(&self) {
        let stopped = self.stopped.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();
        if self.start() {
            stopped.await;
        }
    }

    /// Halt and drop every live walk. Pending continuations are discarded.
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        let drained: Vec<Arc<Context>> = self.contexts.iter().map(|e| e.value().clone()).collect();
        self.contexts.clear();
        for ctx in &drained {
            ctx.halt();
        }
        info!(halted = drained.len(), "dispatcher stopped");
        self.post_stop();
    }

    /// Forget a walk that ended
    pub fn remove(&self, id: u64) {
        if self.contexts.remove(&id).is_some() {
            self.check_active();
        }
    }

    /// End the cycle when no walk is left, or when every walk left is parked
    /// on a latch nothing can signal any more
    pub fn check_active(&self) {
        if !self.is_running() {
            return;
        }
        if self.contexts.is_empty() {
            self.finish();
            return;
        }
        let parked: Vec<String> = self
            .contexts
            .iter()
            .filter_map(|e| {
                let ctx = e.value();
                ctx.waiting()
                    .filter(|latch| ctx.coordinator().count(latch).unwrap_or(0) > 0)
            })
            .collect();
        if parked.len() == self.contexts.len() {
            warn!(latches = ?parked, "every remaining context is waiting, stopping");
            self.stop();
        }
    }

    fn finish(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.generation.fetch_add(1, Ordering::SeqCst);
            debug!("all contexts finished");
            self.post_stop();
        }
    }

    fn post_stop(&self) {
        for observer in self.observers.read().iter() {
            observer.post_stop();
        }
        self.stopped.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Snapshot of every live walk, ordered by id
    pub fn active(&self) -> Vec<ActiveContext> {
        let mut active: Vec<ActiveContext> = self
            .contexts
            .iter()
            .map(|e| ActiveContext::from(e.value().as_ref()))
            .collect();
        active.sort_by_key(|a| a.id);
        active
    }

    fn start_nanny(&self, generation: u64) {
        let Some(period) = self.config.nanny_interval else {
            return;
        };
        let me = self.me.clone();
        self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(dispatcher) = me.upgrade() else {
                    break;
                };
                if dispatcher.generation.load(Ordering::SeqCst) != generation || !dispatcher.is_running() {
                    break;
                }
                dispatcher.inspect();
            }
        });
    }

    /// One nanny pass
    fn inspect(&self) {
        let now = chrono::Utc::now().timestamp_millis();
        let idle_limit = self.config.idle_warning.as_millis() as i64;
        for active in self.active() {
            let idle = now - active.step_started_at;
            if active.waiting.is_none() && idle > idle_limit {
                warn!(
                    context = %active.label,
                    node = %active.node,
                    idle_secs = idle / 1000,
                    "node has been running for a long time"
                );
            }
        }
        self.check_active();
    }
}
