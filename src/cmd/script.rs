use super::{Cmd, Flow};
use crate::context::Step;

pub(crate) fn log(step: &mut Step<'_>, message: &str, input: &str) -> Flow {
    let message = step.populate_lenient(message);
    step.context().log(&message);
    Flow::Next(input.to_string())
}

pub(crate) fn echo(step: &mut Step<'_>, input: &str) -> Flow {
    step.context().log(input);
    Flow::Next(input.to_string())
}

/// Graft a private copy of the named script as the node's first child.
/// A copy left by an earlier pass over the same node is removed first.
pub(crate) fn invoke(step: &mut Step<'_>, script: &str, input: &str) -> Flow {
    let name = step.populate_lenient(script);
    let Some(supervisor) = step.context().supervisor() else {
        return Flow::abort(format!("cannot invoke {} without a run", name));
    };
    let Some(script) = supervisor.script(&name) else {
        return Flow::abort(format!("missing script {}", name));
    };
    let id = step.id();
    let graph = step.graph_mut();
    let stale: Vec<_> = graph
        .then(id)
        .iter()
        .copied()
        .filter(|child| matches!(graph.node(*child).cmd(), Cmd::Script { name: n } if *n == name))
        .collect();
    for child in stale {
        graph.remove(child);
    }
    graph.graft_then(id, script.graph(), script.graph().root(), true);
    Flow::Next(input.to_string())
}

pub(crate) fn script_cmd(step: &mut Step<'_>, name: &str, run_async: bool, input: &str) -> Flow {
    if !run_async {
        return invoke(step, name, input);
    }
    let name = step.populate_lenient(name);
    let ctx = step.context().clone();
    let started = ctx
        .supervisor()
        .map(|supervisor| supervisor.spawn_script(&ctx, &name))
        .unwrap_or(false);
    if !started {
        ctx.error(&format!("could not start script {}", name));
    }
    Flow::Next(input.to_string())
}

pub(crate) fn abort(step: &mut Step<'_>, message: &str, skip_cleanup: bool) -> Flow {
    Flow::Abort {
        message: step.populate_lenient(message),
        skip_cleanup,
    }
}
