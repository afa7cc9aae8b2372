//! Command graph: arena tree of nodes with live next/skip resolution

pub mod builder;
pub mod graph;
pub mod script;

pub use builder::NodeSpec;
pub use graph::{next_uid, Branch, Graph, Node, NodeId};
pub use script::Script;
