use serde::{Deserialize, Serialize};

use crate::context::Context;

/// Read-only view of a live walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveContext {
    pub id: u64,
    pub label: String,
    pub script: String,
    pub host: Option<String>,
    pub node: String,
    pub waiting: Option<String>,
    pub exit_code: Option<i32>,
    pub steps: u64,
    pub created_at: i64,
    pub step_started_at: i64,
}

impl From<&Context> for ActiveContext {
    fn from(ctx: &Context) -> Self {
        Self {
            id: ctx.id(),
            label: ctx.label().to_string(),
            script: ctx.script_name().to_string(),
            host: ctx.host().map(|h| h.to_string()),
            node: ctx.current_node(),
            waiting: ctx.waiting(),
            exit_code: ctx.last_exit_code(),
            steps: ctx.steps(),
            created_at: ctx.created_at(),
            step_started_at: ctx.step_started_at(),
        }
    }
}
