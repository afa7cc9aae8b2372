//! Nodes backed by the run's coordinator latches

use crate::coord::{WaitStatus, Waiter};
use crate::context::Step;

use super::Flow;

fn parse_count(step: &Step<'_>, node: &str, text: &str) -> Option<i64> {
    match text.trim().parse::<i64>() {
        Ok(count) => Some(count),
        Err(_) => {
            step.context()
                .error(&format!("{} expects an integer count, got '{}'", node, text));
            None
        }
    }
}

pub(crate) fn set_signal(step: &mut Step<'_>, name: &str, count: &str, input: &str) -> Flow {
    let name = step.populate_lenient(name);
    let count = step.populate_lenient(count);
    if let Some(count) = parse_count(step, "set-signal", &count) {
        step.context().coordinator().initialize(name.trim(), count);
    }
    Flow::Next(input.to_string())
}

pub(crate) fn signal(step: &mut Step<'_>, name: &str, input: &str) -> Flow {
    let name = step.populate_lenient(name);
    step.context().coordinator().signal(name.trim());
    Flow::Next(input.to_string())
}

pub(crate) fn wait_for(step: &mut Step<'_>, name: &str, initial: Option<&str>, input: &str) -> Flow {
    let name = step.populate_lenient(name).trim().to_string();
    if name.is_empty() {
        return Flow::Next(input.to_string());
    }
    if let Some(initial) = initial {
        let initial = step.populate_lenient(initial);
        if let Some(count) = parse_count(step, "wait-for", &initial) {
            step.context().coordinator().initialize(&name, count);
        }
    }

    let ctx = step.context().clone();
    ctx.set_waiting(Some(name.clone()));
    let continuation = step.suspend();
    let resumed_input = input.to_string();
    let waiter = Waiter::new(step.uid(), ctx.label(), move || {
        continuation.context().set_waiting(None);
        continuation.next(resumed_input);
    });
    match ctx.coordinator().wait_for(&name, waiter) {
        WaitStatus::Ready => {
            ctx.set_waiting(None);
            Flow::Next(input.to_string())
        }
        WaitStatus::Parked | WaitStatus::Replaced => {
            if let Some(dispatcher) = ctx.dispatcher() {
                dispatcher.check_active();
            }
            Flow::Suspend
        }
    }
}

pub(crate) fn read_signal(step: &mut Step<'_>, name: &str, input: &str) -> Flow {
    let name = step.populate_lenient(name);
    let count = step.context().coordinator().count(name.trim()).unwrap_or(0);
    if count <= 0 {
        Flow::Next(input.to_string())
    } else {
        Flow::Skip(input.to_string())
    }
}
