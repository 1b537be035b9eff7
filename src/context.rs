use std::cell::Cell;

use crate::arena;
use crate::graph::node::{Node, NodePtr};

/// The engine's thread-local state: the arena backing every node, plus the
/// ambient bookkeeping the propagation algorithm needs while a computed is
/// being evaluated. One instance per thread; graphs are never shared across
/// threads (see the crate's concurrency model).
pub(crate) struct Context {
    pub(crate) graph: arena::Graph<Node>,
    pub(crate) current_consumer: Cell<Option<NodePtr>>,
    pub(crate) untracking: Cell<bool>,
    pub(crate) notifying: Cell<bool>,
}

impl Context {
    fn new() -> Self {
        Context {
            graph: arena::Graph::new(),
            current_consumer: Cell::new(None),
            untracking: Cell::new(false),
            notifying: Cell::new(false),
        }
    }
}

thread_local! {
    pub(crate) static CTX: Context = Context::new();
}

pub(crate) fn with_ctx<R>(f: impl FnOnce(&Context) -> R) -> R {
    CTX.with(f)
}

/// Installs `ptr` as the currently-evaluating consumer for the lifetime of
/// the guard, restoring whatever was previously installed on drop (even on
/// unwind), the way the teacher's engines save and restore the prior
/// `DirtyHandle`/context across a nested `poll_updated` call.
pub(crate) struct ConsumerGuard {
    prior: Option<NodePtr>,
}

impl ConsumerGuard {
    pub(crate) fn enter(ptr: NodePtr) -> Self {
        let prior = with_ctx(|ctx| ctx.current_consumer.replace(Some(ptr)));
        ConsumerGuard { prior }
    }
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        with_ctx(|ctx| ctx.current_consumer.set(self.prior));
    }
}

pub(crate) struct UntrackGuard {
    prior: bool,
}

impl UntrackGuard {
    pub(crate) fn enter() -> Self {
        let prior = with_ctx(|ctx| ctx.untracking.replace(true));
        UntrackGuard { prior }
    }
}

impl Drop for UntrackGuard {
    fn drop(&mut self) {
        with_ctx(|ctx| ctx.untracking.set(self.prior));
    }
}

pub(crate) struct NotifyingGuard;

impl NotifyingGuard {
    pub(crate) fn enter() -> Self {
        with_ctx(|ctx| ctx.notifying.set(true));
        NotifyingGuard
    }
}

impl Drop for NotifyingGuard {
    fn drop(&mut self) {
        with_ctx(|ctx| ctx.notifying.set(false));
    }
}
