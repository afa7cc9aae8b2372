//! What a run executes: scripts, roles binding them to hosts, initial state

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::stage::Stage;
use crate::cmd::Cmd;
use crate::graph::Script;
use crate::shell::Host;
use crate::state::template;

/// A script named by a role, with bindings visible to its whole walk
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScriptRef {
    pub name: String,
    #[serde(default)]
    pub with: Map<String, Value>,
}

impl ScriptRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            with: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with.insert(key.into(), value.into());
        self
    }
}

impl From<&str> for ScriptRef {
    fn from(name: &str) -> Self {
        ScriptRef::new(name)
    }
}

/// Hosts sharing the same setup, run and cleanup scripts
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub setup: Vec<ScriptRef>,
    #[serde(default)]
    pub run: Vec<ScriptRef>,
    #[serde(default)]
    pub cleanup: Vec<ScriptRef>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn host(mut self, host: Host) -> Self {
        self.hosts.push(host);
        self
    }

    pub fn setup(mut self, script: impl Into<ScriptRef>) -> Self {
        self.setup.push(script.into());
        self
    }

    pub fn run(mut self, script: impl Into<ScriptRef>) -> Self {
        self.run.push(script.into());
        self
    }

    pub fn cleanup(mut self, script: impl Into<ScriptRef>) -> Self {
        self.cleanup.push(script.into());
        self
    }

    /// Scripts of a script stage; empty for every other stage
    pub fn scripts(&self, stage: Stage) -> &[ScriptRef] {
        match stage {
            Stage::Setup => &self.setup,
            Stage::Run => &self.run,
            Stage::Cleanup => &self.cleanup,
            _ => &[],
        }
    }
}

/// Validated description of one run. Built with [`RunConfigBuilder`].
#[derive(Clone)]
pub struct RunConfig {
    name: String,
    scripts: HashMap<String, Arc<Script>>,
    roles: Vec<Role>,
    state: Map<String, Value>,
    signal_counts: BTreeMap<String, i64>,
    skip_stages: BTreeSet<Stage>,
    output_dir: Option<PathBuf>,
    errors: Vec<String>,
}

impl RunConfig {
    pub fn builder(name: impl Into<String>) -> RunConfigBuilder {
        RunConfigBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn script(&self, name: &str) -> Option<&Arc<Script>> {
        self.scripts.get(name)
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Every host of every role, once
    pub fn hosts(&self) -> Vec<Host> {
        self.roles
            .iter()
            .flat_map(|role| role.hosts.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    /// Latch counts the coordinator starts with
    pub fn signal_counts(&self) -> &BTreeMap<String, i64> {
        &self.signal_counts
    }

    pub fn signal_count(&self, name: &str) -> Option<i64> {
        self.signal_counts.get(name).copied()
    }

    pub fn skips(&self, stage: Stage) -> bool {
        self.skip_stages.contains(&stage)
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Problems found while building; a run refuses to start when not empty
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Default)]
pub struct RunConfigBuilder {
    name: String,
    scripts: HashMap<String, Arc<Script>>,
    roles: Vec<Role>,
    state: Map<String, Value>,
    signal_counts: BTreeMap<String, i64>,
    skip_stages: BTreeSet<Stage>,
    output_dir: Option<PathBuf>,
}

impl RunConfigBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn script(mut self, script: Script) -> Self {
        self.scripts.insert(script.name().to_string(), Arc::new(script));
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    pub fn state(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.state.insert(key.into(), value.into());
        self
    }

    /// Fix a latch count instead of deriving it from the scripts
    pub fn signal_count(mut self, name: impl Into<String>, count: i64) -> Self {
        self.signal_counts.insert(name.into(), count);
        self
    }

    pub fn skip_stage(mut self, stage: Stage) -> Self {
        self.skip_stages.insert(stage);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> RunConfig {
        let mut errors = Vec::new();
        for stage in &self.skip_stages {
            if !stage.runs_scripts() {
                errors.push(format!("stage {} cannot be skipped", stage));
            }
        }

        let mut derived: BTreeMap<String, i64> = BTreeMap::new();
        let mut initialized: BTreeSet<String> = BTreeSet::new();
        let mut waited: BTreeSet<String> = BTreeSet::new();

        for role in &self.roles {
            if role.hosts.is_empty() {
                errors.push(format!("role {} has no hosts", role.name));
            }
            for stage in [Stage::Setup, Stage::Run, Stage::Cleanup] {
                for script_ref in role.scripts(stage) {
                    if !self.scripts.contains_key(&script_ref.name) {
                        errors.push(format!(
                            "role {} references unknown script {}",
                            role.name, script_ref.name
                        ));
                        continue;
                    }
                    let mut names = LatchNames::default();
                    let mut stack = Vec::new();
                    self.scan(&script_ref.name, script_ref, &mut stack, &mut names, &mut errors);
                    for (signal, occurrences) in names.signals {
                        *derived.entry(signal).or_insert(0) += occurrences * role.hosts.len() as i64;
                    }
                    initialized.extend(names.initialized);
                    waited.extend(names.waited);
                }
            }
        }

        let mut signal_counts = derived;
        signal_counts.extend(self.signal_counts.clone());

        for name in &waited {
            if !signal_counts.contains_key(name) && !initialized.contains(name) {
                errors.push(format!("wait-for {} is never signalled", name));
            }
        }
        errors.sort();
        errors.dedup();
        debug!(run = %self.name, latches = signal_counts.len(), errors = errors.len(), "run config built");

        RunConfig {
            name: self.name,
            scripts: self.scripts,
            roles: self.roles,
            state: self.state,
            signal_counts,
            skip_stages: self.skip_stages,
            output_dir: self.output_dir,
            errors,
        }
    }

    /// Walk `name` and every script it invokes by a literal name, recording
    /// one signal per `signal` node per call site. Names are resolved against
    /// the reference's bindings and the initial state; names that stay
    /// templated are left to run time.
    fn scan(
        &self,
        name: &str,
        script_ref: &ScriptRef,
        stack: &mut Vec<String>,
        names: &mut LatchNames,
        errors: &mut Vec<String>,
    ) {
        let Some(script) = self.scripts.get(name) else {
            return;
        };
        let resolve = |text: &str| -> Option<String> {
            let populated = template::populate(text, |key| {
                script_ref
                    .with
                    .get(key)
                    .or_else(|| self.state.get(key))
                    .cloned()
            });
            let name = populated.text.trim().to_string();
            (populated.is_complete() && !name.is_empty()).then_some(name)
        };

        stack.push(name.to_string());
        let graph = script.graph();
        for id in graph.descendants(graph.root()) {
            match graph.node(id).cmd() {
                Cmd::Signal { name } => {
                    if let Some(name) = resolve(name) {
                        *names.signals.entry(name).or_insert(0) += 1;
                    }
                }
                Cmd::SetSignal { name, .. } => names.initialized.extend(resolve(name)),
                Cmd::WaitFor { name, initial } => {
                    if let Some(name) = resolve(name) {
                        if initial.is_some() {
                            names.initialized.insert(name);
                        } else {
                            names.waited.insert(name);
                        }
                    }
                }
                Cmd::Invoke { script: called } | Cmd::ScriptCmd { name: called, .. } => {
                    if template::has_pattern(called) || stack.contains(called) {
                        continue;
                    }
                    if self.scripts.contains_key(called.as_str()) {
                        self.scan(called, script_ref, stack, names, errors);
                    } else {
                        errors.push(format!("script {} invokes unknown script {}", name, called));
                    }
                }
                _ => {}
            }
        }
        stack.pop();
    }
}

#[derive(Default)]
struct LatchNames {
    signals: BTreeMap<String, i64>,
    initialized: BTreeSet<String>,
    waited: BTreeSet<String>,
}
