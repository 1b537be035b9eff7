use crate::graph::{self, NodeId};

/// The most recently recorded `sources` of a computed or watcher, in
/// insertion order.
pub fn introspect_sources(node: NodeId) -> Vec<NodeId> {
    graph::introspect_sources(node.0).into_iter().map(NodeId).collect()
}

/// The live sinks of a state or computed node.
pub fn introspect_sinks(node: NodeId) -> Vec<NodeId> {
    graph::introspect_sinks(node.0).into_iter().map(NodeId).collect()
}

pub fn has_sinks(node: NodeId) -> bool {
    graph::has_sinks(node.0)
}

pub fn has_sources(node: NodeId) -> bool {
    graph::has_sources(node.0)
}

/// The computed currently being evaluated, if any.
pub fn current_computed() -> Option<NodeId> {
    graph::current_computed().map(NodeId)
}

/// Runs `f` with dependency capture disabled: reads performed inside `f` do
/// not install themselves as sources of the currently evaluating consumer.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    graph::untrack(f)
}
