// Infrastructure shared by every component

pub mod config;
pub mod errors;
pub mod logging;

// Re-export commonly used types
pub use config::{EngineConfig, EngineConfigBuilder};
pub use errors::{HostwalkError, Result};
pub use logging::init_tracing;
