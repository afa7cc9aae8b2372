//! Observers of dispatcher start and stop

/// Hooks fired around one dispatch cycle (one stage)
pub trait DispatchObserver: Send + Sync {
    /// The dispatcher is about to submit `contexts` walks
    fn pre_start(&self, _contexts: usize) {}

    /// Every walk ended or the dispatcher was stopped
    fn post_stop(&self) {}
}

pub struct LoggingDispatchObserver;

impl DispatchObserver for LoggingDispatchObserver {
    fn pre_start(&self, contexts: usize) {
        tracing::info!(contexts, "dispatch started");
    }

    fn post_stop(&self) {
        tracing::info!("dispatch stopped");
    }
}
