//! Hierarchical run state, template expansion and secret filtering

pub mod secret;
pub mod state;
pub mod template;

pub use secret::SecretFilter;
pub use state::{Scope, State, HOST_PREFIX, RUN_PREFIX, SECRET_PREFIX};
pub use template::{populate, Populated};
