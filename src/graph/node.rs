use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::Location;
use std::rc::Rc;

use crate::arena;

/// A stable handle to a node living in the thread-local [`Graph`](super::Graph)'s arena.
pub(crate) type NodePtr = arena::NodePtr<Node>;
pub(crate) type NodeGuard<'gg> = arena::NodeGuard<'gg, Node>;

/// The three-colour propagation status of a node, plus a fourth terminal
/// state for nodes whose last handle has been dropped.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum Status {
    Clean,
    Checked,
    Dirty,
    Destroyed,
}

/// The cached payload of a State or Computed node: absent, a value, or a
/// captured error. Type-erased so that a single homogeneous `Node` type can
/// back every concrete `State<T>` / `Computed<T, E>`.
pub(crate) enum Slot {
    Uninitialized,
    Value(Rc<dyn Any>),
    Error(Rc<dyn Any>),
}

/// The behavior specific to each of the three node kinds. A tagged variant
/// on a single `Node` type, rather than a trait-object hierarchy: only a
/// handful of operations branch on kind, and homogeneous storage keeps the
/// arena simple.
pub(crate) enum NodeKind {
    State,
    Computed {
        /// Cleared (replaced with `None`) once the node is destroyed, which
        /// drops whatever the closure captured and breaks any reference
        /// cycles formed through it.
        compute: RefCell<Option<Box<dyn FnMut() -> Result<Rc<dyn Any>, Rc<dyn Any>>>>>,
    },
    Watcher {
        notify: RefCell<Option<Box<dyn FnMut()>>>,
        dirty_since_arm: Cell<bool>,
    },
}

impl NodeKind {
    pub(crate) fn is_watcher(&self) -> bool {
        matches!(self, NodeKind::Watcher { .. })
    }

    pub(crate) fn is_signal(&self) -> bool {
        !self.is_watcher()
    }
}

pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) status: Cell<Status>,
    pub(crate) slot: RefCell<Slot>,
    /// `eq(prev, next) -> bool`, type-erased. Never invoked for errors.
    pub(crate) eq: Box<dyn Fn(&dyn Any, &dyn Any) -> bool>,
    /// Ordered, possibly-duplicated list of nodes read during the most
    /// recent evaluation. Meaningless (always empty) for State and Watcher.
    pub(crate) sources: RefCell<Vec<NodePtr>>,
    /// Scratch accumulator filled in by the read-observation hook while this
    /// node (if a Computed) is the currently-evaluating consumer.
    pub(crate) pending_sources: RefCell<Vec<NodePtr>>,
    /// Live back-edges: nodes that observe this one and are reachable from a
    /// watcher. Deduplicated, insertion-ordered.
    pub(crate) sinks: RefCell<Vec<NodePtr>>,
    /// Reference count of live paths reaching this node through `sinks`.
    /// Zero means unowned/unwatched.
    pub(crate) watch_count: Cell<u32>,
    /// Re-entrancy guard for cycle detection during recomputation.
    pub(crate) visiting: Cell<bool>,
    pub(crate) on_watched: RefCell<Option<Box<dyn FnMut()>>>,
    pub(crate) on_unwatched: RefCell<Option<Box<dyn FnMut()>>>,
    pub(crate) handle_count: Cell<u32>,
    pub(crate) location: &'static Location<'static>,
}

impl Node {
    pub(crate) fn is_live(&self) -> bool {
        self.watch_count.get() > 0
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.status.get() == Status::Destroyed
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            NodeKind::State => "State",
            NodeKind::Computed { .. } => "Computed",
            NodeKind::Watcher { .. } => "Watcher",
        };
        f.debug_struct(kind)
            .field("status", &self.status.get())
            .field("location", &self.location)
            .finish()
    }
}
