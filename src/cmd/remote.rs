//! Nodes that suspend on the shell, the timer or the transfer capability

use std::time::Duration;

use super::Flow;
use crate::context::Step;
use crate::core::HostwalkError;
use crate::shell::Prompt;

pub(crate) fn sh(step: &mut Step<'_>, command: &str, prompts: Vec<Prompt>, check_exit_code: Option<bool>) -> Flow {
    let command = match step.populate(command).into_result(command) {
        Ok(command) => command,
        Err(e) => return e.into(),
    };
    let ctx = step.context().clone();
    let Some(shell) = ctx.shell() else {
        return Flow::abort(format!("no shell available for {}", command));
    };
    if !shell.is_open() {
        return Flow::abort(format!("shell for {} is closed, cannot run {}", ctx.label(), command));
    }
    let prompts: Vec<Prompt> = prompts
        .iter()
        .map(|p| Prompt::new(step.populate_lenient(&p.pattern), step.populate_lenient(&p.response)))
        .collect();
    let check = check_exit_code.unwrap_or_else(|| ctx.check_exit_code());
    let continuation = step.suspend();

    let spawned = ctx.spawn(async move {
        match shell.sh(&command, &prompts).await {
            Ok(response) => {
                continuation.context().set_exit_code(response.exit_code);
                if check && response.exit_code != 0 {
                    let message = format!("{} exited with {}", command, response.exit_code);
                    continuation.abort(message, false);
                } else {
                    continuation.next(response.output);
                }
            }
            Err(e) => {
                let message = format!("sh failed: {}: {}", command, e);
                continuation.abort(message, false);
            }
        }
    });
    if spawned {
        Flow::Suspend
    } else {
        Flow::abort("no dispatcher to run sh on")
    }
}

/// Parse `250`, `250ms`, `5s`, `2m` or `1h`; a bare number is milliseconds
pub(crate) fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "ms" => Some(Duration::from_millis(amount)),
        "s" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_secs(amount * 60)),
        "h" => Some(Duration::from_secs(amount * 3600)),
        _ => None,
    }
}

pub(crate) fn sleep(step: &mut Step<'_>, duration: &str, input: &str) -> Flow {
    let populated = step.populate_lenient(duration);
    let Some(delay) = parse_duration(&populated) else {
        step.context()
            .error(&format!("sleep cannot parse duration '{}'", populated));
        return Flow::Next(input.to_string());
    };
    let ctx = step.context().clone();
    let continuation = step.suspend();
    let resumed_input = input.to_string();
    if ctx.schedule(delay, move || continuation.next(resumed_input)) {
        Flow::Suspend
    } else {
        Flow::abort("no dispatcher to schedule sleep on")
    }
}

pub(crate) fn upload(step: &mut Step<'_>, path: &str, destination: &str, input: &str) -> Flow {
    let path = step.populate_lenient(path);
    let destination = step.populate_lenient(destination);
    let ctx = step.context().clone();
    let Some(host) = ctx.host().cloned() else {
        return Flow::abort(format!("upload {} needs a host", path));
    };
    let Some(transfer) = ctx.supervisor().and_then(|s| s.transfer()) else {
        return Flow::abort(format!("upload {} needs a transfer capability", path));
    };
    let continuation = step.suspend();
    let resumed_input = input.to_string();
    let spawned = ctx.spawn(async move {
        if transfer.upload(&path, &destination, &host).await {
            continuation.next(resumed_input);
        } else {
            let err = HostwalkError::transfer("upload", path, destination);
            continuation.abort(err.to_string(), false);
        }
    });
    if spawned {
        Flow::Suspend
    } else {
        Flow::abort("no dispatcher to run upload on")
    }
}

pub(crate) fn download(
    step: &mut Step<'_>,
    path: &str,
    destination: &str,
    max_size: Option<u64>,
    input: &str,
) -> Flow {
    let path = step.populate_lenient(path);
    let destination = step.populate_lenient(destination);
    let ctx = step.context().clone();
    let Some(host) = ctx.host().cloned() else {
        return Flow::abort(format!("download {} needs a host", path));
    };
    let Some(transfer) = ctx.supervisor().and_then(|s| s.transfer()) else {
        return Flow::abort(format!("download {} needs a transfer capability", path));
    };
    let continuation = step.suspend();
    let resumed_input = input.to_string();
    let spawned = ctx.spawn(async move {
        if transfer.download(&path, &destination, &host, max_size).await {
            continuation.next(resumed_input);
        } else {
            let err = HostwalkError::transfer("download", path, destination);
            continuation.abort(err.to_string(), false);
        }
    });
    if spawned {
        Flow::Suspend
    } else {
        Flow::abort("no dispatcher to run download on")
    }
}

pub(crate) fn queue_download(
    step: &mut Step<'_>,
    path: &str,
    destination: &str,
    max_size: Option<u64>,
    input: &str,
) -> Flow {
    let path = step.populate_lenient(path);
    let destination = step.populate_lenient(destination);
    let ctx = step.context();
    match (ctx.host(), ctx.supervisor()) {
        (Some(host), Some(supervisor)) => {
            supervisor.queue_download(host, path, destination, max_size);
        }
        _ => ctx.error(&format!("queue-download {} has no run to queue on", path)),
    }
    Flow::Next(input.to_string())
}

pub(crate) fn queue_delete(step: &mut Step<'_>, path: &str, input: &str) -> Flow {
    let path = step.populate_lenient(path);
    let ctx = step.context();
    match (ctx.host(), ctx.supervisor()) {
        (Some(host), Some(supervisor)) => supervisor.queue_delete(host, path),
        _ => ctx.error(&format!("queue-delete {} has no run to queue on", path)),
    }
    Flow::Next(input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 5s "), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("3 days"), None);
    }
}
