use std::fmt;

use super::graph::Graph;
use super::builder::NodeSpec;
use crate::cmd::Cmd;

/// A named command tree, compiled once and deep-copied for every walk
#[derive(Debug)]
pub struct Script {
    name: String,
    graph: Graph,
}

impl Script {
    /// Script whose root runs `steps` in order
    pub fn new(name: impl Into<String>, steps: Vec<NodeSpec>) -> Self {
        let name = name.into();
        let mut root = NodeSpec::from(Cmd::script(name.clone()));
        root.then = steps;
        Self {
            graph: root.build(),
            name,
        }
    }

    /// Wrap an existing graph
    pub fn from_graph(name: impl Into<String>, graph: Graph) -> Self {
        Self {
            name: name.into(),
            graph,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Private copy for one walk: fresh uids, no loop progress
    pub fn deep_copy(&self) -> Script {
        Script {
            name: self.name.clone(),
            graph: self.graph.deep_copy(),
        }
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.graph.render())
    }
}
