use std::sync::Arc;

use super::context::Context;
use crate::graph::Script;
use crate::shell::{Host, Transfer};

/// Run-level services a walk reaches for.
///
/// Contexts hold their supervisor weakly; once the run is gone the calls are
/// skipped.
pub trait Supervisor: Send + Sync {
    /// Abort the whole run; later calls are ignored
    fn abort(&self, reason: &str, skip_cleanup: bool);

    /// End the current stage for every context
    fn done(&self);

    /// Look up a script by name
    fn script(&self, name: &str) -> Option<Arc<Script>>;

    fn transfer(&self) -> Option<Arc<dyn Transfer>> {
        None
    }

    /// Remember a file to download when the stage ends
    fn queue_download(&self, _host: &Host, _path: String, _destination: String, _max_size: Option<u64>) {}

    /// Remember a file to delete when the run ends
    fn queue_delete(&self, _host: &Host, _path: String) {}

    /// Start the named script in its own context next to `parent`
    fn spawn_script(&self, _parent: &Arc<Context>, _name: &str) -> bool {
        false
    }
}
