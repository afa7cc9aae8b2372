//! Worker pool that drives walks one step at a time

#[allow(clippy::module_inception)]
mod dispatcher;
mod hooks;
mod types;

pub use dispatcher::Dispatcher;
pub use hooks::{DispatchObserver, LoggingDispatchObserver};
pub use types::ActiveContext;
