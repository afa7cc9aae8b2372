//! Hooks around stage transitions

use super::stage::Stage;

pub trait RunObserver: Send + Sync {
    fn pre_stage(&self, _stage: Stage) {}

    fn post_stage(&self, _stage: Stage) {}
}

pub struct LoggingRunObserver;

impl RunObserver for LoggingRunObserver {
    fn pre_stage(&self, stage: Stage) {
        tracing::info!(stage = %stage, "stage starting");
    }

    fn post_stage(&self, stage: Stage) {
        tracing::info!(stage = %stage, "stage finished");
    }
}
