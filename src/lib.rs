// Infrastructure shared by every component
pub mod core;

// Data the walks operate on
pub mod graph;
pub mod state;

// Execution engine
pub mod cmd;
pub mod context;
pub mod coord;
pub mod dispatch;
pub mod run;

// Capabilities supplied by the caller
pub mod shell;

// Re-exports for convenience
pub use crate::core::{init_tracing, EngineConfig, EngineConfigBuilder, HostwalkError, Result};
pub use cmd::{Cmd, Flow};
pub use context::{Context, ContextObserver, Continuation, Step, Supervisor};
pub use coord::{Coordinator, LatchObserver, WaitStatus, Waiter};
pub use dispatch::{ActiveContext, DispatchObserver, Dispatcher};
pub use graph::{Graph, NodeId, NodeSpec, Script};
pub use run::{Role, Run, RunConfig, RunObserver, RunSummary, ScriptRef, Stage};
pub use shell::{Host, Prompt, ShOutput, Shell, ShellFactory, Transfer};
pub use state::{Scope, State};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_engine_handles_cross_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Context>();
        assert_send_sync::<Continuation>();
        assert_send_sync::<Dispatcher>();
        assert_send_sync::<Run>();
    }

    #[tokio::test]
    async fn test_host_less_walk() {
        let dispatcher = Dispatcher::new(EngineConfig::default()).unwrap();
        let script = Script::new(
            "count",
            vec![NodeSpec::from(Cmd::for_each("N", Some("[1,2,3]")))
                .then(Cmd::set_state("OUT", "${{OUT:}}-${{N}}"))],
        );
        let state = State::new_root();
        let ctx = Context::builder(&script, state.clone(), Arc::new(Coordinator::new("test")))
            .dispatcher(&dispatcher)
            .build();
        dispatcher.add_context(ctx.clone());
        dispatcher.run_until_stopped().await;

        assert!(ctx.is_finished());
        assert_eq!(state.get("OUT"), Some(json!("-1-2-3")));
    }
}
