//! Run-scoped coordination: named latches, counters and waiters
//!
//! One [`Coordinator`] is constructed per run so concurrent runs never share
//! barrier state.

pub mod coordinator;
pub mod hooks;
pub mod types;

pub use coordinator::*;
pub use hooks::*;
pub use types::*;
