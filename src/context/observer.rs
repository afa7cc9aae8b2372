//! Hooks around every step of a walk

use super::context::Context;

/// Observer of context steps.
///
/// Called on the worker running the step. Implementations must not block and
/// must not drive the context themselves.
pub trait ContextObserver: Send + Sync {
    /// Before the node's logic runs
    fn pre_start(&self, _ctx: &Context, _node: &str) {}

    /// The node finished and the walk moves to its next target
    fn pre_next(&self, _ctx: &Context, _node: &str, _output: &str) {}

    /// The node finished and the walk moves to its skip target
    fn pre_skip(&self, _ctx: &Context, _node: &str, _output: &str) {}

    /// The walk reached the end of its graph
    fn on_done(&self, _ctx: &Context) {}
}

/// Logs step transitions at debug level and finished walks at info
pub struct LoggingObserver;

impl ContextObserver for LoggingObserver {
    fn pre_next(&self, ctx: &Context, node: &str, _output: &str) {
        tracing::debug!(context = %ctx.label(), node = %node, "next");
    }

    fn pre_skip(&self, ctx: &Context, node: &str, _output: &str) {
        tracing::debug!(context = %ctx.label(), node = %node, "skip");
    }

    fn on_done(&self, ctx: &Context) {
        tracing::info!(context = %ctx.label(), "walk finished");
    }
}
