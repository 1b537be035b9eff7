use std::panic::Location;

use crate::graph::{self, NodeId, NodePtr};
use crate::GraphError;

/// An always-live sink with no cached value of its own. Fans dirty
/// notifications out of the graph to `notify`, synchronously, during the
/// write that first dirties one of its watched nodes.
pub struct Watcher {
    ptr: NodePtr,
    location: &'static Location<'static>,
}

impl Clone for Watcher {
    fn clone(&self) -> Self {
        graph::inc_handle(self.ptr);
        Watcher {
            ptr: self.ptr,
            location: self.location,
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        graph::dec_handle(self.ptr);
    }
}

impl Watcher {
    #[track_caller]
    pub fn new(notify: impl FnMut() + 'static) -> Watcher {
        let location = Location::caller();
        let ptr = graph::alloc_watcher(Box::new(notify), location);
        Watcher { ptr, location }
    }

    /// Adds each node to the watched set if absent, and re-arms the
    /// watcher (clears its "dirty since last arm" bit) even if `nodes` is
    /// empty. Watching a node promotes its liveness, and that of every node
    /// transitively in its sources.
    pub fn watch(&self, nodes: &[NodeId]) -> Result<(), GraphError> {
        let ptrs: Vec<NodePtr> = nodes.iter().map(|id| id.0).collect();
        graph::watcher_watch(self.ptr, &ptrs)
    }

    /// Removes each node from the watched set, demoting the liveness of
    /// whatever becomes unreachable from any watcher as a result.
    pub fn unwatch(&self, nodes: &[NodeId]) -> Result<(), GraphError> {
        let ptrs: Vec<NodePtr> = nodes.iter().map(|id| id.0).collect();
        graph::watcher_unwatch(self.ptr, &ptrs)
    }

    /// The subset of watched nodes currently dirty or checked — those whose
    /// next read may recompute.
    pub fn get_pending(&self) -> Vec<NodeId> {
        graph::watcher_pending(self.ptr).into_iter().map(NodeId).collect()
    }

    pub fn id(&self) -> NodeId {
        NodeId(self.ptr)
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("location", &self.location)
            .finish()
    }
}
