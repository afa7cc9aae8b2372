//! Coordinator - cross-host latches, counters and waiters for one run
//!
//! Every latch update holds that latch's map entry while it inspects or
//! queues waiters, so a wait can never slip in between a signal reaching
//! zero and the release of the queue.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::hooks::LatchObserver;
use super::types::{CoordinatorSnapshot, WaitStatus, Waiter};

pub struct Coordinator {
    name: String,
    latches: DashMap<String, i64>,
    latch_times: DashMap<String, i64>,
    waiters: DashMap<String, Vec<Waiter>>,
    counters: DashMap<String, i64>,
    observers: RwLock<Vec<Arc<dyn LatchObserver>>>,
}

impl Coordinator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latches: DashMap::new(),
            latch_times: DashMap::new(),
            waiters: DashMap::new(),
            counters: DashMap::new(),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_observer(&self, observer: Arc<dyn LatchObserver>) {
        self.observers.write().push(observer);
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Create or reset a latch. A count of zero or less releases its waiters.
    pub fn initialize(&self, name: &str, count: i64) {
        let released = {
            let mut latch = self.latches.entry(name.to_string()).or_insert(count);
            if *latch > 0 && *latch != count {
                warn!(coordinator = %self.name, latch = %name, current = *latch, count, "replacing an active latch");
            }
            *latch = count;
            if count <= 0 {
                self.latch_times.insert(name.to_string(), Self::now());
                self.take_waiters(name)
            } else {
                Vec::new()
            }
        };
        debug!(coordinator = %self.name, latch = %name, count, "latch initialized");
        if count <= 0 {
            self.release(name, released);
        }
    }

    /// Decrement a latch, never below zero. Returns the remaining count, or
    /// `None` when the latch was never initialized.
    pub fn signal(&self, name: &str) -> Option<i64> {
        let (remaining, reached_zero, released) = {
            let Some(mut latch) = self.latches.get_mut(name) else {
                warn!(coordinator = %self.name, latch = %name, "signal for an uninitialized latch");
                return None;
            };
            let reached_zero = *latch == 1;
            if *latch > 0 {
                *latch -= 1;
            }
            let remaining = *latch;
            if reached_zero {
                self.latch_times.insert(name.to_string(), Self::now());
            }
            let released = if remaining <= 0 {
                self.take_waiters(name)
            } else {
                Vec::new()
            };
            (remaining, reached_zero, released)
        };
        debug!(coordinator = %self.name, latch = %name, remaining, "signal");
        if reached_zero {
            self.release(name, released);
        } else {
            for waiter in released {
                waiter.resume();
            }
        }
        Some(remaining)
    }

    /// Park `waiter` until the latch reaches zero.
    ///
    /// A latch that does not exist yet is created at zero, so the wait
    /// resumes immediately. A second wait from the same node replaces the
    /// first one, which is dropped without resuming.
    pub fn wait_for(&self, name: &str, waiter: Waiter) -> WaitStatus {
        let latch = self.latches.entry(name.to_string()).or_insert_with(|| {
            warn!(coordinator = %self.name, latch = %name, "wait-for an uninitialized latch, using 0");
            0
        });
        if *latch <= 0 {
            return WaitStatus::Ready;
        }
        let mut queue = self.waiters.entry(name.to_string()).or_default();
        match queue.iter().position(|w| w.uid() == waiter.uid()) {
            Some(pos) => {
                warn!(coordinator = %self.name, latch = %name, uid = waiter.uid(), "replacing a pending wait from the same node");
                queue[pos] = waiter;
                WaitStatus::Replaced
            }
            None => {
                debug!(coordinator = %self.name, latch = %name, waiter = %waiter.label(), "waiting");
                queue.push(waiter);
                WaitStatus::Parked
            }
        }
    }

    /// Drop the pending wait of node `uid` on `name`
    pub fn remove_waiter(&self, name: &str, uid: u64) -> bool {
        match self.waiters.get_mut(name) {
            Some(mut queue) => {
                let before = queue.len();
                queue.retain(|w| w.uid() != uid);
                before != queue.len()
            }
            None => false,
        }
    }

    /// Drop every pending wait without resuming it
    pub fn clear_waiters(&self) {
        let dropped: usize = self.waiters.iter().map(|e| e.value().len()).sum();
        self.waiters.clear();
        if dropped > 0 {
            debug!(coordinator = %self.name, dropped, "cleared waiters");
        }
    }

    fn take_waiters(&self, name: &str) -> Vec<Waiter> {
        self.waiters.remove(name).map(|(_, w)| w).unwrap_or_default()
    }

    fn release(&self, name: &str, waiters: Vec<Waiter>) {
        for observer in self.observers.read().iter() {
            observer.on_release(name);
        }
        for waiter in waiters {
            waiter.resume();
        }
    }

    pub fn count(&self, name: &str) -> Option<i64> {
        self.latches.get(name).map(|c| *c)
    }

    pub fn has_latch(&self, name: &str) -> bool {
        self.latches.contains_key(name)
    }

    pub fn waiter_count(&self, name: &str) -> usize {
        self.waiters.get(name).map(|q| q.len()).unwrap_or(0)
    }

    pub fn latch_times(&self) -> BTreeMap<String, i64> {
        self.latch_times
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    // Counters

    pub fn increase(&self, name: &str) -> i64 {
        let mut counter = self.counters.entry(name.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Decrement a counter, creating it at `initial` first
    pub fn decrease(&self, name: &str, initial: i64) -> i64 {
        let mut counter = self.counters.entry(name.to_string()).or_insert(initial);
        *counter -= 1;
        *counter
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.counters.get(name).map(|c| *c)
    }

    pub fn set_counter(&self, name: &str, value: i64) {
        self.counters.insert(name.to_string(), value);
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            latches: self
                .latches
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            latch_times: self.latch_times(),
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            waiters: self
                .waiters
                .iter()
                .filter(|e| !e.value().is_empty())
                .map(|e| (e.key().clone(), e.value().iter().map(|w| w.info()).collect()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_waiter(uid: u64, hits: &Arc<AtomicUsize>) -> Waiter {
        let hits = hits.clone();
        Waiter::new(uid, format!("waiter-{}", uid), move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_waiters_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Waiter>();
        assert_send_sync::<Coordinator>();
    }

    #[test]
    fn test_latch_never_negative() {
        let coordinator = Coordinator::new("test");
        coordinator.initialize("ready", 2);
        assert_eq!(coordinator.signal("ready"), Some(1));
        assert_eq!(coordinator.signal("ready"), Some(0));
        assert_eq!(coordinator.signal("ready"), Some(0));
        assert!(coordinator.latch_times().contains_key("ready"));
    }

    #[test]
    fn test_signal_unknown_is_noop() {
        let coordinator = Coordinator::new("test");
        assert_eq!(coordinator.signal("missing"), None);
        assert!(!coordinator.has_latch("missing"));
    }

    #[test]
    fn test_waiter_released_once_after_last_signal() {
        let coordinator = Coordinator::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        coordinator.initialize("go", 2);
        assert_eq!(coordinator.wait_for("go", counting_waiter(1, &hits)), WaitStatus::Parked);
        coordinator.signal("go");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        coordinator.signal("go");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        coordinator.signal("go");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.waiter_count("go"), 0);
    }

    #[test]
    fn test_wait_before_initialize_is_ready() {
        let coordinator = Coordinator::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        assert_eq!(coordinator.wait_for("early", counting_waiter(1, &hits)), WaitStatus::Ready);
        assert_eq!(coordinator.count("early"), Some(0));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_duplicate_wait_replaces() {
        let coordinator = Coordinator::new("test");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        coordinator.initialize("go", 1);
        coordinator.wait_for("go", counting_waiter(7, &first));
        assert_eq!(coordinator.wait_for("go", counting_waiter(7, &second)), WaitStatus::Replaced);
        assert_eq!(coordinator.waiter_count("go"), 1);
        coordinator.signal("go");
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_and_clear_waiters() {
        let coordinator = Coordinator::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        coordinator.initialize("go", 1);
        coordinator.wait_for("go", counting_waiter(1, &hits));
        coordinator.wait_for("go", counting_waiter(2, &hits));
        assert!(coordinator.remove_waiter("go", 1));
        assert!(!coordinator.remove_waiter("go", 1));
        coordinator.clear_waiters();
        coordinator.signal("go");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_initialize_zero_releases() {
        let coordinator = Coordinator::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        coordinator.initialize("go", 3);
        coordinator.wait_for("go", counting_waiter(1, &hits));
        coordinator.initialize("go", 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_counters() {
        let coordinator = Coordinator::new("test");
        assert_eq!(coordinator.increase("hits"), 1);
        assert_eq!(coordinator.increase("hits"), 2);
        assert_eq!(coordinator.decrease("left", 3), 2);
        assert_eq!(coordinator.decrease("left", 3), 1);
        coordinator.set_counter("left", 10);
        assert_eq!(coordinator.counter("left"), Some(10));
        assert_eq!(coordinator.counter("none"), None);
    }

    #[test]
    fn test_observer_and_snapshot() {
        struct Record(parking_lot::Mutex<Vec<String>>);
        impl LatchObserver for Record {
            fn on_release(&self, name: &str) {
                self.0.lock().push(name.to_string());
            }
        }
        let coordinator = Coordinator::new("test");
        let record = Arc::new(Record(parking_lot::Mutex::new(Vec::new())));
        coordinator.add_observer(record.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        coordinator.initialize("a", 1);
        coordinator.initialize("b", 2);
        coordinator.wait_for("b", counting_waiter(9, &hits));
        coordinator.increase("c");
        coordinator.signal("a");
        coordinator.signal("a");

        assert_eq!(*record.0.lock(), vec!["a".to_string()]);
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.latches.get("a"), Some(&0));
        assert_eq!(snapshot.latches.get("b"), Some(&2));
        assert_eq!(snapshot.counters.get("c"), Some(&1));
        assert_eq!(snapshot.waiters["b"][0].uid, 9);
        assert!(snapshot.latch_times.contains_key("a"));
    }
}
