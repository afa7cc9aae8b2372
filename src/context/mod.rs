#[allow(clippy::module_inception)]
mod context;
mod observer;
mod step;
mod supervisor;

pub use context::{Context, ContextBuilder, Continuation};
pub use observer::{ContextObserver, LoggingObserver};
pub use step::Step;
pub use supervisor::Supervisor;
