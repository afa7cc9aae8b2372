//! Value-tree description of a command subtree, compiled into a [`Graph`].

use serde_json::{Map, Value};

use super::graph::{Graph, NodeId};
use crate::cmd::Cmd;

/// A node and its children, ready to be compiled
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub cmd: Cmd,
    pub then: Vec<NodeSpec>,
    pub elses: Vec<NodeSpec>,
    pub with: Map<String, Value>,
    pub silent: bool,
}

impl NodeSpec {
    pub fn new(cmd: Cmd) -> Self {
        Self {
            cmd,
            then: Vec::new(),
            elses: Vec::new(),
            with: Map::new(),
            silent: false,
        }
    }

    /// Append a child run when the node continues normally
    pub fn then(mut self, child: impl Into<NodeSpec>) -> Self {
        self.then.push(child.into());
        self
    }

    /// Append a child run when the node skips
    pub fn otherwise(mut self, child: impl Into<NodeSpec>) -> Self {
        self.elses.push(child.into());
        self
    }

    /// Bind a value visible to this node and its descendants
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with.insert(key.into(), value.into());
        self
    }

    /// Do not log the node when it runs
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Build this node as a subtree of `graph` under `parent`
    pub fn attach(&self, graph: &mut Graph, parent: NodeId) -> NodeId {
        let id = graph.add_then(parent, self.cmd.clone());
        self.fill(graph, id);
        id
    }

    /// Build this node as a standalone graph
    pub fn build(&self) -> Graph {
        let mut graph = Graph::new(self.cmd.clone());
        let root = graph.root();
        self.fill(&mut graph, root);
        graph
    }

    fn fill(&self, graph: &mut Graph, id: NodeId) {
        {
            let node = graph.node_mut(id);
            for (key, value) in &self.with {
                node.set_with(key.clone(), value.clone());
            }
            node.set_silent(self.silent);
        }
        for child in &self.then {
            child.attach(graph, id);
        }
        for child in &self.elses {
            let else_id = graph.add_else(id, child.cmd.clone());
            child.fill(graph, else_id);
        }
    }
}

impl From<Cmd> for NodeSpec {
    fn from(cmd: Cmd) -> Self {
        Self::new(cmd)
    }
}
