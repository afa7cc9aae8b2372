use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cmd::Cmd;

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// Process-unique node identity, fresh for every copy of a node
pub fn next_uid() -> u64 {
    NEXT_UID.fetch_add(1, Ordering::Relaxed)
}

/// Index of a node inside one [`Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which child list of its parent a node sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Then,
    Else,
}

/// One command node. The parent link is an index into the owning arena.
#[derive(Debug)]
pub struct Node {
    uid: u64,
    cmd: Cmd,
    parent: Option<NodeId>,
    then: Vec<NodeId>,
    elses: Vec<NodeId>,
    with: Map<String, Value>,
    silent: bool,
}

impl Node {
    fn new(cmd: Cmd) -> Self {
        Self {
            uid: next_uid(),
            cmd,
            parent: None,
            then: Vec::new(),
            elses: Vec::new(),
            with: Map::new(),
            silent: false,
        }
    }

    /// Same kind and parameters, fresh uid, no children and no loop progress
    fn shallow_copy(&self) -> Self {
        Self {
            uid: next_uid(),
            cmd: self.cmd.fresh(),
            parent: None,
            then: Vec::new(),
            elses: Vec::new(),
            with: self.with.clone(),
            silent: self.silent,
        }
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn cmd(&self) -> &Cmd {
        &self.cmd
    }

    pub fn cmd_mut(&mut self) -> &mut Cmd {
        &mut self.cmd
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn then(&self) -> &[NodeId] {
        &self.then
    }

    pub fn elses(&self) -> &[NodeId] {
        &self.elses
    }

    pub fn with(&self) -> &Map<String, Value> {
        &self.with
    }

    pub fn set_with(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.with.insert(key.into(), value.into());
    }

    pub fn remove_with(&mut self, key: &str) -> Option<Value> {
        self.with.remove(key)
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }
}

/// Arena-backed command tree.
///
/// A detached subtree stays in the arena until [`Graph::remove`] hands its
/// slots to the free list, where later insertions reuse them. `next` and
/// `skip` are computed from the live parent/child links on every call, so
/// mutations are visible immediately.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: NodeId,
}

impl Graph {
    pub fn new(root: Cmd) -> Self {
        Self {
            nodes: vec![Node::new(root)],
            free: Vec::new(),
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of occupied arena slots, detached but not removed nodes included
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn then(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).then
    }

    pub fn elses(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).elses
    }

    fn push(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot.0] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, branch: Branch, front: bool) {
        self.nodes[child.0].parent = Some(parent);
        let list = match branch {
            Branch::Then => &mut self.nodes[parent.0].then,
            Branch::Else => &mut self.nodes[parent.0].elses,
        };
        if front {
            list.insert(0, child);
        } else {
            list.push(child);
        }
    }

    /// Append a child to `parent`'s then-list
    pub fn add_then(&mut self, parent: NodeId, cmd: Cmd) -> NodeId {
        let id = self.push(Node::new(cmd));
        self.attach(parent, id, Branch::Then, false);
        id
    }

    /// Append a child to `parent`'s else-list
    pub fn add_else(&mut self, parent: NodeId, cmd: Cmd) -> NodeId {
        let id = self.push(Node::new(cmd));
        self.attach(parent, id, Branch::Else, false);
        id
    }

    /// Insert a child in front of `parent`'s then-list
    pub fn inject_then(&mut self, parent: NodeId, cmd: Cmd) -> NodeId {
        let id = self.push(Node::new(cmd));
        self.attach(parent, id, Branch::Then, true);
        id
    }

    /// Deep-copy `source`'s subtree at `from` into this graph under `parent`
    pub fn graft_then(&mut self, parent: NodeId, source: &Graph, from: NodeId, front: bool) -> NodeId {
        let id = self.copy_from(source, from);
        self.attach(parent, id, Branch::Then, front);
        id
    }

    fn copy_from(&mut self, source: &Graph, from: NodeId) -> NodeId {
        let id = self.push(source.node(from).shallow_copy());
        for &child in source.then(from) {
            let copied = self.copy_from(source, child);
            self.attach(id, copied, Branch::Then, false);
        }
        for &child in source.elses(from) {
            let copied = self.copy_from(source, child);
            self.attach(id, copied, Branch::Else, false);
        }
        id
    }

    /// Unlink a node from its parent. Returns false for the root or an already detached node.
    pub fn detach(&mut self, id: NodeId) -> bool {
        let Some(parent) = self.nodes[id.0].parent.take() else {
            return false;
        };
        let node = &mut self.nodes[parent.0];
        node.then.retain(|c| *c != id);
        node.elses.retain(|c| *c != id);
        true
    }

    /// Detach `id` and release its whole subtree for reuse. Ids under `id`
    /// must not be used afterwards.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if !self.detach(id) {
            return false;
        }
        let released = self.descendants(id);
        self.free.extend(released);
        true
    }

    /// Single node copy of `id` (same kind, parameters and "with" bindings)
    pub fn shallow_copy(&self, id: NodeId) -> Graph {
        Graph {
            nodes: vec![self.node(id).shallow_copy()],
            free: Vec::new(),
            root: NodeId(0),
        }
    }

    /// Copy of the subtree rooted at `id` with fresh uids and no loop progress
    pub fn copy_subtree(&self, id: NodeId) -> Graph {
        let mut copy = Graph {
            nodes: Vec::with_capacity(self.len()),
            free: Vec::new(),
            root: NodeId(0),
        };
        copy.copy_from(self, id);
        copy
    }

    /// Copy of the whole reachable tree
    pub fn deep_copy(&self) -> Graph {
        self.copy_subtree(self.root)
    }

    fn branch_of(&self, parent: NodeId, child: NodeId) -> (Branch, usize) {
        let node = self.node(parent);
        if let Some(pos) = node.then.iter().position(|c| *c == child) {
            (Branch::Then, pos)
        } else {
            let pos = node.elses.iter().position(|c| *c == child).unwrap_or(node.elses.len());
            (Branch::Else, pos)
        }
    }

    /// Normal continuation: first child, otherwise [`Graph::after`]
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        match self.node(id).then.first() {
            Some(first) => Some(*first),
            None => self.after(id),
        }
    }

    /// Continuation that bypasses the node's own children: the first else
    /// child when there is one, otherwise [`Graph::after`]
    pub fn skip(&self, id: NodeId) -> Option<NodeId> {
        match self.node(id).elses.first() {
            Some(first) => Some(*first),
            None => self.after(id),
        }
    }

    /// First node after `id`'s subtree: the following sibling, or walking up
    /// the ancestors until one has a following sibling. Reaching the end of a
    /// loop's children returns the loop itself so it can iterate again.
    pub fn after(&self, id: NodeId) -> Option<NodeId> {
        let mut current = id;
        loop {
            let parent = self.node(current).parent?;
            let (branch, pos) = self.branch_of(parent, current);
            let siblings = match branch {
                Branch::Then => &self.node(parent).then,
                Branch::Else => &self.node(parent).elses,
            };
            if let Some(sibling) = siblings.get(pos + 1) {
                return Some(*sibling);
            }
            if branch == Branch::Then && self.node(parent).cmd.is_loop() {
                return Some(parent);
            }
            current = parent;
        }
    }

    /// "with" value bound on the node or its closest ancestor
    pub fn lookup_with(&self, id: NodeId, key: &str) -> Option<&Value> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            if let Some(value) = node.with.get(key) {
                return Some(value);
            }
            current = node.parent;
        }
        None
    }

    /// Reachable nodes under `id`, depth first, `id` included
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            let node = self.node(current);
            stack.extend(node.elses.iter().rev());
            stack.extend(node.then.iter().rev());
        }
        out
    }

    /// Indented text rendering of the reachable tree
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(self.root, 0, &mut out);
        out
    }

    fn render_into(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        out.push_str(&"  ".repeat(depth));
        out.push_str(&node.cmd.to_string());
        out.push('\n');
        for &child in &node.then {
            self.render_into(child, depth + 1, out);
        }
        if !node.elses.is_empty() {
            out.push_str(&"  ".repeat(depth));
            out.push_str("else:\n");
            for &child in &node.elses {
                self.render_into(child, depth + 1, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(msg: &str) -> Cmd {
        Cmd::log(msg)
    }

    // sh:1 -> [sh:2 -> [sh:3, sh:4], sh:5], sh:6
    fn sample() -> (Graph, Vec<NodeId>) {
        let mut g = Graph::new(Cmd::script("sample"));
        let root = g.root();
        let one = g.add_then(root, log("1"));
        let two = g.add_then(one, log("2"));
        let three = g.add_then(two, log("3"));
        let four = g.add_then(two, log("4"));
        let five = g.add_then(one, log("5"));
        let six = g.add_then(root, log("6"));
        (g, vec![root, one, two, three, four, five, six])
    }

    #[test]
    fn test_next_first_child_then_sibling_then_ancestor() {
        let (g, n) = sample();
        assert_eq!(g.next(n[0]), Some(n[1]));
        assert_eq!(g.next(n[1]), Some(n[2]));
        assert_eq!(g.next(n[3]), Some(n[4]));
        assert_eq!(g.next(n[4]), Some(n[5]));
        assert_eq!(g.next(n[5]), Some(n[6]));
        assert_eq!(g.next(n[6]), None);
    }

    #[test]
    fn test_skip_ignores_own_children() {
        let (g, n) = sample();
        assert_eq!(g.skip(n[1]), Some(n[6]));
        assert_eq!(g.skip(n[2]), Some(n[5]));
        assert_eq!(g.skip(n[4]), Some(n[5]));
        assert_eq!(g.skip(n[0]), None);
    }

    #[test]
    fn test_injection_reroutes_live() {
        let (mut g, n) = sample();
        let injected = g.inject_then(n[6], log("injected"));
        assert_eq!(g.next(n[6]), Some(injected));
        let front = g.inject_then(n[4], log("front"));
        assert_eq!(g.next(n[4]), Some(front));
        assert_eq!(g.next(front), Some(n[5]));
        assert!(g.detach(front));
        assert_eq!(g.next(n[4]), Some(n[5]));
        assert!(!g.detach(g.root()));
    }

    #[test]
    fn test_else_branch() {
        let mut g = Graph::new(Cmd::script("cond"));
        let root = g.root();
        let check = g.add_then(root, Cmd::read_state("x"));
        let yes = g.add_then(check, log("yes"));
        let no1 = g.add_else(check, log("no1"));
        let no2 = g.add_else(check, log("no2"));
        let tail = g.add_then(root, log("tail"));
        assert_eq!(g.next(check), Some(yes));
        assert_eq!(g.skip(check), Some(no1));
        assert_eq!(g.next(yes), Some(tail));
        assert_eq!(g.next(no1), Some(no2));
        assert_eq!(g.next(no2), Some(tail));
    }

    #[test]
    fn test_loop_end_reenters_loop() {
        let mut g = Graph::new(Cmd::script("loop"));
        let root = g.root();
        let each = g.add_then(root, Cmd::for_each("ARG", Some("[1,2]")));
        let body = g.add_then(each, log("${{ARG}}"));
        let tail = g.add_then(root, log("tail"));
        assert_eq!(g.next(each), Some(body));
        assert_eq!(g.next(body), Some(each));
        assert_eq!(g.skip(body), Some(each));
        assert_eq!(g.skip(each), Some(tail));
    }

    #[test]
    fn test_skip_climbs_nested_loops_one_level_at_a_time() {
        let mut g = Graph::new(Cmd::script("nested"));
        let root = g.root();
        let outer = g.add_then(root, Cmd::for_each("A", Some("[1,2]")));
        let middle = g.add_then(outer, Cmd::for_each("B", Some("[1,2]")));
        let inner = g.add_then(middle, Cmd::repeat_until("C"));
        let leaf = g.add_then(inner, log("leaf"));
        let tail = g.add_then(root, log("tail"));
        assert_eq!(g.next(leaf), Some(inner));
        assert_eq!(g.skip(leaf), Some(inner));
        assert_eq!(g.skip(inner), Some(middle));
        assert_eq!(g.skip(middle), Some(outer));
        assert_eq!(g.skip(outer), Some(tail));
    }

    #[test]
    fn test_removed_subtrees_are_reused() {
        let mut g = Graph::new(Cmd::script("host"));
        let root = g.root();
        let each = g.add_then(root, Cmd::for_each("N", None));
        let mut child = Graph::new(Cmd::script("child"));
        let child_root = child.root();
        child.add_then(child_root, log("inside"));

        for _ in 0..200 {
            let stale: Vec<NodeId> = g.then(each).to_vec();
            for id in stale {
                assert!(g.remove(id));
            }
            g.graft_then(each, &child, child_root, true);
        }
        assert_eq!(g.len(), 4);
        assert_eq!(g.descendants(root).len(), 4);
        assert!(!g.remove(root));
        assert!(g.render().contains("script: child\n      log: inside"));
    }

    #[test]
    fn test_deep_copy_has_fresh_uids() {
        let (mut g, n) = sample();
        g.node_mut(n[2]).set_with("k", "v");
        let copy = g.deep_copy();
        assert_eq!(copy.render(), g.render());
        let uids: Vec<u64> = g.descendants(g.root()).iter().map(|id| g.node(*id).uid()).collect();
        for id in copy.descendants(copy.root()) {
            assert!(!uids.contains(&copy.node(id).uid()));
        }
        let copied_two = copy.then(copy.then(copy.root())[0])[0];
        assert_eq!(copy.lookup_with(copied_two, "k"), Some(&Value::from("v")));
    }

    #[test]
    fn test_graft_and_lookup_with() {
        let (mut g, n) = sample();
        let mut other = Graph::new(Cmd::script("other"));
        let other_root = other.root();
        other.add_then(other_root, log("a"));
        let grafted = g.graft_then(n[3], &other, other_root, true);
        assert_eq!(g.next(n[3]), Some(grafted));
        let a = g.then(grafted)[0];
        assert_eq!(g.next(a), Some(n[4]));
        g.node_mut(n[1]).set_with("x", 1);
        assert_eq!(g.lookup_with(a, "x"), Some(&Value::from(1)));
        assert_eq!(g.lookup_with(n[6], "x"), None);
    }

    #[test]
    fn test_render_indents() {
        let (g, _) = sample();
        let rendered = g.render();
        assert!(rendered.starts_with("script: sample\n  log: 1\n    log: 2\n"));
    }
}
