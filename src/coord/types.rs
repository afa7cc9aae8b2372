//! Waiters and read-only snapshots of coordinator state

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A parked walk waiting for a latch to reach zero.
///
/// Keyed by the uid of the node that issued the wait. The resume callback
/// runs at most once, on the thread that releases the latch.
pub struct Waiter {
    uid: u64,
    label: String,
    resume: Box<dyn FnOnce() + Send + Sync>,
}

impl Waiter {
    pub fn new(uid: u64, label: impl Into<String>, resume: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            uid,
            label: label.into(),
            resume: Box::new(resume),
        }
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn info(&self) -> WaiterInfo {
        WaiterInfo {
            uid: self.uid,
            label: self.label.clone(),
        }
    }

    pub(crate) fn resume(self) {
        (self.resume)()
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("uid", &self.uid)
            .field("label", &self.label)
            .finish()
    }
}

/// Result of asking to wait on a latch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The latch is already at zero; the caller continues now
    Ready,
    /// The waiter is queued
    Parked,
    /// The waiter replaced an earlier one from the same node
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiterInfo {
    pub uid: u64,
    pub label: String,
}

/// Serializable view of latches, counters and queued waiters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSnapshot {
    pub latches: BTreeMap<String, i64>,
    pub latch_times: BTreeMap<String, i64>,
    pub counters: BTreeMap<String, i64>,
    pub waiters: BTreeMap<String, Vec<WaiterInfo>>,
}
