use serde::{Deserialize, Serialize};
use std::fmt;

/// Phases of a run, in the only order they are entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Pending = 0,
    PreSetup = 1,
    Setup = 2,
    Run = 3,
    PreCleanup = 4,
    Cleanup = 5,
    PostCleanup = 6,
    Done = 7,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Pending,
        Stage::PreSetup,
        Stage::Setup,
        Stage::Run,
        Stage::PreCleanup,
        Stage::Cleanup,
        Stage::PostCleanup,
        Stage::Done,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::PreSetup => "preSetup",
            Stage::Setup => "setup",
            Stage::Run => "run",
            Stage::PreCleanup => "preCleanup",
            Stage::Cleanup => "cleanup",
            Stage::PostCleanup => "postCleanup",
            Stage::Done => "done",
        }
    }

    pub fn next(&self) -> Option<Stage> {
        Self::from_u8(self.as_u8() + 1)
    }

    /// Stages that run scripts and can be turned off per run
    pub fn runs_scripts(&self) -> bool {
        matches!(self, Stage::Setup | Stage::Run | Stage::Cleanup)
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Option<Stage> {
        Self::ALL.get(value as usize).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
