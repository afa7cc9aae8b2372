//! Stage machine driving setup, run and cleanup walks across every host

pub mod config;
pub mod observer;
#[allow(clippy::module_inception)]
pub mod run;
pub mod stage;
pub mod summary;

pub use config::{Role, RunConfig, RunConfigBuilder, ScriptRef};
pub use observer::{LoggingRunObserver, RunObserver};
pub use run::{Run, RunBuilder};
pub use stage::Stage;
pub use summary::{PendingDelete, PendingDownload, RunSummary, SUMMARY_FILE};
