//! Node kinds and their logic.
//!
//! `Cmd` is a closed set. Each kind's behaviour is a function over a
//! [`Step`] returning the [`Flow`] the walk takes next.

mod control;
mod remote;
mod script;
mod signal;

pub use control::split;

use serde_json::Value;
use std::fmt;

use crate::context::Step;
use crate::core::HostwalkError;
use crate::shell::Prompt;

/// What a walk does after a node ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the node's next target
    Next(String),
    /// Continue with the node's skip target
    Skip(String),
    /// Abort the run
    Abort { message: String, skip_cleanup: bool },
    /// End the current stage for every context
    Done,
    /// The node handed a continuation to asynchronous work
    Suspend,
}

impl Flow {
    pub fn abort(message: impl Into<String>) -> Self {
        Flow::Abort {
            message: message.into(),
            skip_cleanup: false,
        }
    }
}

impl From<HostwalkError> for Flow {
    fn from(err: HostwalkError) -> Self {
        Flow::abort(err.to_string())
    }
}

/// Iteration progress of a `for-each` node
#[derive(Debug, Clone, PartialEq)]
pub struct LoopProgress {
    pub source: String,
    pub items: Vec<Value>,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cmd {
    Script {
        name: String,
    },
    Log {
        message: String,
    },
    Echo,
    Sh {
        command: String,
        prompts: Vec<Prompt>,
        check_exit_code: Option<bool>,
    },
    Sleep {
        duration: String,
    },
    ForEach {
        name: String,
        input: Option<String>,
        progress: Option<LoopProgress>,
    },
    RepeatUntil {
        signal: String,
    },
    Regex {
        pattern: String,
        miss: bool,
    },
    ReadState {
        key: String,
    },
    SetState {
        key: String,
        value: Option<String>,
    },
    ExitCode {
        expected: String,
    },
    Countdown {
        name: String,
        initial: i64,
    },
    SetSignal {
        name: String,
        count: String,
    },
    Signal {
        name: String,
    },
    WaitFor {
        name: String,
        initial: Option<String>,
    },
    ReadSignal {
        name: String,
    },
    Invoke {
        script: String,
    },
    ScriptCmd {
        name: String,
        run_async: bool,
    },
    Upload {
        path: String,
        destination: String,
    },
    Download {
        path: String,
        destination: String,
        max_size: Option<u64>,
    },
    QueueDownload {
        path: String,
        destination: String,
        max_size: Option<u64>,
    },
    QueueDelete {
        path: String,
    },
    Abort {
        message: String,
        skip_cleanup: bool,
    },
    Done,
}

impl Cmd {
    pub fn script(name: impl Into<String>) -> Self {
        Cmd::Script { name: name.into() }
    }

    pub fn log(message: impl Into<String>) -> Self {
        Cmd::Log {
            message: message.into(),
        }
    }

    pub fn echo() -> Self {
        Cmd::Echo
    }

    pub fn sh(command: impl Into<String>) -> Self {
        Cmd::Sh {
            command: command.into(),
            prompts: Vec::new(),
            check_exit_code: None,
        }
    }

    /// `sh` answering prompts and overriding the engine's exit-code check
    pub fn sh_with(command: impl Into<String>, prompts: Vec<Prompt>, check_exit_code: Option<bool>) -> Self {
        Cmd::Sh {
            command: command.into(),
            prompts,
            check_exit_code,
        }
    }

    pub fn sleep(duration: impl Into<String>) -> Self {
        Cmd::Sleep {
            duration: duration.into(),
        }
    }

    pub fn for_each(name: impl Into<String>, input: Option<&str>) -> Self {
        Cmd::ForEach {
            name: name.into(),
            input: input.map(str::to_string),
            progress: None,
        }
    }

    pub fn repeat_until(signal: impl Into<String>) -> Self {
        Cmd::RepeatUntil {
            signal: signal.into(),
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Cmd::Regex {
            pattern: pattern.into(),
            miss: false,
        }
    }

    /// `regex` that continues when the pattern does not match
    pub fn regex_miss(pattern: impl Into<String>) -> Self {
        Cmd::Regex {
            pattern: pattern.into(),
            miss: true,
        }
    }

    pub fn read_state(key: impl Into<String>) -> Self {
        Cmd::ReadState { key: key.into() }
    }

    pub fn set_state(key: impl Into<String>, value: impl Into<String>) -> Self {
        Cmd::SetState {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// `set-state` storing the trimmed input
    pub fn set_state_from_input(key: impl Into<String>) -> Self {
        Cmd::SetState {
            key: key.into(),
            value: None,
        }
    }

    pub fn exit_code(expected: impl Into<String>) -> Self {
        Cmd::ExitCode {
            expected: expected.into(),
        }
    }

    pub fn countdown(name: impl Into<String>, initial: i64) -> Self {
        Cmd::Countdown {
            name: name.into(),
            initial,
        }
    }

    pub fn set_signal(name: impl Into<String>, count: impl Into<String>) -> Self {
        Cmd::SetSignal {
            name: name.into(),
            count: count.into(),
        }
    }

    pub fn signal(name: impl Into<String>) -> Self {
        Cmd::Signal { name: name.into() }
    }

    pub fn wait_for(name: impl Into<String>) -> Self {
        Cmd::WaitFor {
            name: name.into(),
            initial: None,
        }
    }

    /// `wait-for` that initializes the latch before waiting
    pub fn wait_for_initial(name: impl Into<String>, initial: impl Into<String>) -> Self {
        Cmd::WaitFor {
            name: name.into(),
            initial: Some(initial.into()),
        }
    }

    pub fn read_signal(name: impl Into<String>) -> Self {
        Cmd::ReadSignal { name: name.into() }
    }

    pub fn invoke(script: impl Into<String>) -> Self {
        Cmd::Invoke {
            script: script.into(),
        }
    }

    pub fn script_cmd(name: impl Into<String>, run_async: bool) -> Self {
        Cmd::ScriptCmd {
            name: name.into(),
            run_async,
        }
    }

    pub fn upload(path: impl Into<String>, destination: impl Into<String>) -> Self {
        Cmd::Upload {
            path: path.into(),
            destination: destination.into(),
        }
    }

    pub fn download(path: impl Into<String>, destination: impl Into<String>, max_size: Option<u64>) -> Self {
        Cmd::Download {
            path: path.into(),
            destination: destination.into(),
            max_size,
        }
    }

    pub fn queue_download(path: impl Into<String>, destination: impl Into<String>) -> Self {
        Cmd::QueueDownload {
            path: path.into(),
            destination: destination.into(),
            max_size: None,
        }
    }

    pub fn queue_delete(path: impl Into<String>) -> Self {
        Cmd::QueueDelete { path: path.into() }
    }

    pub fn abort(message: impl Into<String>, skip_cleanup: bool) -> Self {
        Cmd::Abort {
            message: message.into(),
            skip_cleanup,
        }
    }

    pub fn done() -> Self {
        Cmd::Done
    }

    /// Nodes that re-enter their children
    pub fn is_loop(&self) -> bool {
        matches!(self, Cmd::ForEach { .. } | Cmd::RepeatUntil { .. })
    }

    /// Same kind and parameters with no iteration progress
    pub fn fresh(&self) -> Cmd {
        match self {
            Cmd::ForEach { name, input, .. } => Cmd::ForEach {
                name: name.clone(),
                input: input.clone(),
                progress: None,
            },
            other => other.clone(),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Cmd::Script { .. } => "script",
            Cmd::Log { .. } => "log",
            Cmd::Echo => "echo",
            Cmd::Sh { .. } => "sh",
            Cmd::Sleep { .. } => "sleep",
            Cmd::ForEach { .. } => "for-each",
            Cmd::RepeatUntil { .. } => "repeat-until",
            Cmd::Regex { .. } => "regex",
            Cmd::ReadState { .. } => "read-state",
            Cmd::SetState { .. } => "set-state",
            Cmd::ExitCode { .. } => "exit-code",
            Cmd::Countdown { .. } => "countdown",
            Cmd::SetSignal { .. } => "set-signal",
            Cmd::Signal { .. } => "signal",
            Cmd::WaitFor { .. } => "wait-for",
            Cmd::ReadSignal { .. } => "read-signal",
            Cmd::Invoke { .. } => "invoke",
            Cmd::ScriptCmd { .. } => "script-cmd",
            Cmd::Upload { .. } => "upload",
            Cmd::Download { .. } => "download",
            Cmd::QueueDownload { .. } => "queue-download",
            Cmd::QueueDelete { .. } => "queue-delete",
            Cmd::Abort { .. } => "abort",
            Cmd::Done => "done",
        }
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        match self {
            Cmd::Script { name } => write!(f, "{}: {}", tag, name),
            Cmd::Log { message } => write!(f, "{}: {}", tag, message),
            Cmd::Echo | Cmd::Done => write!(f, "{}", tag),
            Cmd::Sh { command, .. } => write!(f, "{}: {}", tag, command),
            Cmd::Sleep { duration } => write!(f, "{}: {}", tag, duration),
            Cmd::ForEach { name, input, .. } => match input {
                Some(input) => write!(f, "{}: {} {}", tag, name, input),
                None => write!(f, "{}: {}", tag, name),
            },
            Cmd::RepeatUntil { signal } => write!(f, "{}: {}", tag, signal),
            Cmd::Regex { pattern, miss } => {
                if *miss {
                    write!(f, "{}: !{}", tag, pattern)
                } else {
                    write!(f, "{}: {}", tag, pattern)
                }
            }
            Cmd::ReadState { key } => write!(f, "{}: {}", tag, key),
            Cmd::SetState { key, value } => match value {
                Some(value) => write!(f, "{}: {} {}", tag, key, value),
                None => write!(f, "{}: {}", tag, key),
            },
            Cmd::ExitCode { expected } => write!(f, "{}: {}", tag, expected),
            Cmd::Countdown { name, initial } => write!(f, "{}: {} {}", tag, name, initial),
            Cmd::SetSignal { name, count } => write!(f, "{}: {} {}", tag, name, count),
            Cmd::Signal { name } | Cmd::ReadSignal { name } => write!(f, "{}: {}", tag, name),
            Cmd::WaitFor { name, initial } => match initial {
                Some(initial) => write!(f, "{}: {} {}", tag, name, initial),
                None => write!(f, "{}: {}", tag, name),
            },
            Cmd::Invoke { script } => write!(f, "{}: {}", tag, script),
            Cmd::ScriptCmd { name, run_async } => {
                if *run_async {
                    write!(f, "{}: {} async", tag, name)
                } else {
                    write!(f, "{}: {}", tag, name)
                }
            }
            Cmd::Upload { path, destination }
            | Cmd::Download {
                path, destination, ..
            }
            | Cmd::QueueDownload {
                path, destination, ..
            } => write!(f, "{}: {} {}", tag, path, destination),
            Cmd::QueueDelete { path } => write!(f, "{}: {}", tag, path),
            Cmd::Abort { message, .. } => write!(f, "{}: {}", tag, message),
        }
    }
}

/// Run the node under `step` with the walk's current input
pub fn run(step: &mut Step<'_>, input: &str) -> Flow {
    match step.node().cmd().fresh() {
        Cmd::Script { .. } => Flow::Next(input.to_string()),
        Cmd::Log { message } => script::log(step, &message, input),
        Cmd::Echo => script::echo(step, input),
        Cmd::Sh {
            command,
            prompts,
            check_exit_code,
        } => remote::sh(step, &command, prompts, check_exit_code),
        Cmd::Sleep { duration } => remote::sleep(step, &duration, input),
        Cmd::ForEach { name, input: declared, .. } => {
            control::for_each(step, &name, declared.as_deref(), input)
        }
        Cmd::RepeatUntil { signal } => control::repeat_until(step, &signal, input),
        Cmd::Regex { pattern, miss } => control::regex(step, &pattern, miss, input),
        Cmd::ReadState { key } => control::read_state(step, &key, input),
        Cmd::SetState { key, value } => control::set_state(step, &key, value.as_deref(), input),
        Cmd::ExitCode { expected } => control::exit_code(step, &expected, input),
        Cmd::Countdown { name, initial } => control::countdown(step, &name, initial, input),
        Cmd::SetSignal { name, count } => signal::set_signal(step, &name, &count, input),
        Cmd::Signal { name } => signal::signal(step, &name, input),
        Cmd::WaitFor { name, initial } => signal::wait_for(step, &name, initial.as_deref(), input),
        Cmd::ReadSignal { name } => signal::read_signal(step, &name, input),
        Cmd::Invoke { script } => script::invoke(step, &script, input),
        Cmd::ScriptCmd { name, run_async } => script::script_cmd(step, &name, run_async, input),
        Cmd::Upload { path, destination } => remote::upload(step, &path, &destination, input),
        Cmd::Download {
            path,
            destination,
            max_size,
        } => remote::download(step, &path, &destination, max_size, input),
        Cmd::QueueDownload {
            path,
            destination,
            max_size,
        } => remote::queue_download(step, &path, &destination, max_size, input),
        Cmd::QueueDelete { path } => remote::queue_delete(step, &path, input),
        Cmd::Abort {
            message,
            skip_cleanup,
        } => script::abort(step, &message, skip_cleanup),
        Cmd::Done => Flow::Done,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Cmd::sh("ls -l").to_string(), "sh: ls -l");
        assert_eq!(Cmd::for_each("ARG", Some("[1,2]")).to_string(), "for-each: ARG [1,2]");
        assert_eq!(Cmd::regex_miss("err").to_string(), "regex: !err");
        assert_eq!(Cmd::done().to_string(), "done");
        assert_eq!(Cmd::script_cmd("build", true).to_string(), "script-cmd: build async");
    }

    #[test]
    fn test_fresh_drops_progress() {
        let cmd = Cmd::ForEach {
            name: "ARG".into(),
            input: None,
            progress: Some(LoopProgress {
                source: "1,2".into(),
                items: vec![Value::from(1), Value::from(2)],
                index: 1,
            }),
        };
        assert_eq!(cmd.fresh(), Cmd::for_each("ARG", None));
        assert!(cmd.is_loop());
        assert!(Cmd::repeat_until("x").is_loop());
        assert!(!Cmd::sh("x").is_loop());
    }
}
