//! Observers notified when a latch reaches zero

/// Called on the signalling thread, after the latch reached zero and before
/// its waiters resume. Must not block.
pub trait LatchObserver: Send + Sync {
    fn on_release(&self, name: &str);
}

/// Logs every release
pub struct LoggingLatchObserver;

impl LatchObserver for LoggingLatchObserver {
    fn on_release(&self, name: &str) {
        tracing::info!(latch = %name, "latch released");
    }
}
