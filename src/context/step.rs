use serde_json::Value;
use std::sync::Arc;

use super::context::{Context, Continuation};
use crate::graph::{Graph, Node, NodeId};
use crate::state::{template, Populated};

/// The node being run, with the walk's graph borrowed for the duration of
/// its synchronous logic
pub struct Step<'a> {
    graph: &'a mut Graph,
    id: NodeId,
    ctx: &'a Arc<Context>,
}

impl<'a> Step<'a> {
    pub(crate) fn new(graph: &'a mut Graph, id: NodeId, ctx: &'a Arc<Context>) -> Self {
        Self { graph, id, ctx }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn uid(&self) -> u64 {
        self.graph.node(self.id).uid()
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        self.graph
    }

    pub fn node(&self) -> &Node {
        self.graph.node(self.id)
    }

    pub fn node_mut(&mut self) -> &mut Node {
        self.graph.node_mut(self.id)
    }

    pub fn context(&self) -> &Arc<Context> {
        self.ctx
    }

    /// Resolve a name against `with` bindings up the tree, then state
    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.graph
            .lookup_with(self.id, key)
            .cloned()
            .or_else(|| self.ctx.state().get(key))
    }

    pub fn populate(&self, text: &str) -> Populated {
        template::populate(text, |key| self.lookup(key))
    }

    /// Populate, leaving unresolved references as they were
    pub fn populate_lenient(&self, text: &str) -> String {
        self.populate(text).text
    }

    /// Take the continuation of this step. The node must then return
    /// `Flow::Suspend`.
    pub fn suspend(&self) -> Continuation {
        Continuation::new(self.ctx.clone(), self.uid())
    }
}
