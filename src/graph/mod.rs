//! The propagation engine: node allocation, the read-observation hook,
//! write-propagation, and the pull-based consistency walk that drives
//! recomputation. Everything here operates on type-erased [`NodePtr`]s;
//! the public `State`/`Computed`/`Watcher` wrappers downcast at the edges.

pub(crate) mod node;

use std::any::Any;
use std::panic::Location;
use std::rc::Rc;

use node::{Node, NodeKind, Slot, Status};
pub(crate) use node::NodePtr;

use crate::context::{with_ctx, ConsumerGuard, NotifyingGuard, UntrackGuard};
use crate::error::{GraphError, PanicPayload};

/// An opaque, type-erased reference to a node, returned by the
/// introspection functions and by every handle's `id()` method.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) NodePtr);

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let node = unsafe { self.0.lookup_unchecked() };
        write!(f, "NodeId({:?})", &*node)
    }
}

/// The result of resolving a computed to a value: either its cached output
/// or its cached, type-erased error.
pub(crate) enum ComputedOutcome {
    Value(Rc<dyn Any>),
    Error(Rc<dyn Any>),
}

// ---------------------------------------------------------------------
// allocation & handle lifetime
// ---------------------------------------------------------------------

pub(crate) fn alloc_state(
    value: Rc<dyn Any>,
    eq: Box<dyn Fn(&dyn Any, &dyn Any) -> bool>,
    on_watched: Option<Box<dyn FnMut()>>,
    on_unwatched: Option<Box<dyn FnMut()>>,
    location: &'static Location<'static>,
) -> NodePtr {
    alloc_node(Node {
        kind: NodeKind::State,
        status: std::cell::Cell::new(Status::Clean),
        slot: std::cell::RefCell::new(Slot::Value(value)),
        eq,
        sources: Default::default(),
        pending_sources: Default::default(),
        sinks: Default::default(),
        watch_count: std::cell::Cell::new(0),
        visiting: std::cell::Cell::new(false),
        on_watched: std::cell::RefCell::new(on_watched),
        on_unwatched: std::cell::RefCell::new(on_unwatched),
        handle_count: std::cell::Cell::new(1),
        location,
    })
}

pub(crate) fn alloc_computed(
    compute: Box<dyn FnMut() -> Result<Rc<dyn Any>, Rc<dyn Any>>>,
    eq: Box<dyn Fn(&dyn Any, &dyn Any) -> bool>,
    on_watched: Option<Box<dyn FnMut()>>,
    on_unwatched: Option<Box<dyn FnMut()>>,
    location: &'static Location<'static>,
) -> NodePtr {
    alloc_node(Node {
        kind: NodeKind::Computed {
            compute: std::cell::RefCell::new(Some(compute)),
        },
        status: std::cell::Cell::new(Status::Dirty),
        slot: std::cell::RefCell::new(Slot::Uninitialized),
        eq,
        sources: Default::default(),
        pending_sources: Default::default(),
        sinks: Default::default(),
        watch_count: std::cell::Cell::new(0),
        visiting: std::cell::Cell::new(false),
        on_watched: std::cell::RefCell::new(on_watched),
        on_unwatched: std::cell::RefCell::new(on_unwatched),
        handle_count: std::cell::Cell::new(1),
        location,
    })
}

pub(crate) fn alloc_watcher(
    notify: Box<dyn FnMut()>,
    location: &'static Location<'static>,
) -> NodePtr {
    alloc_node(Node {
        kind: NodeKind::Watcher {
            notify: std::cell::RefCell::new(Some(notify)),
            dirty_since_arm: std::cell::Cell::new(false),
        },
        status: std::cell::Cell::new(Status::Clean),
        slot: std::cell::RefCell::new(Slot::Uninitialized),
        eq: Box::new(|_, _| false),
        sources: Default::default(),
        pending_sources: Default::default(),
        sinks: Default::default(),
        watch_count: std::cell::Cell::new(0),
        visiting: std::cell::Cell::new(false),
        on_watched: std::cell::RefCell::new(None),
        on_unwatched: std::cell::RefCell::new(None),
        handle_count: std::cell::Cell::new(1),
        location,
    })
}

fn alloc_node(node: Node) -> NodePtr {
    with_ctx(|ctx| {
        let guard = unsafe { ctx.graph.with_unchecked() };
        let node_guard = guard.insert(node);
        unsafe { node_guard.make_ptr() }
    })
}

pub(crate) fn inc_handle(ptr: NodePtr) {
    let node = unsafe { ptr.lookup_unchecked() };
    node.handle_count.set(node.handle_count.get() + 1);
}

pub(crate) fn dec_handle(ptr: NodePtr) {
    let node = unsafe { ptr.lookup_unchecked() };
    let count = node.handle_count.get().saturating_sub(1);
    node.handle_count.set(count);
    if count == 0 {
        destroy(ptr);
    }
}

/// Tears down a node whose last handle was dropped: unlinks it from its
/// sources and drops every captured closure, breaking whatever `Rc` cycles
/// those closures formed. The arena slot itself is never reclaimed (see
/// `DESIGN.md`); this only releases application-level state.
fn destroy(ptr: NodePtr) {
    let node = unsafe { ptr.lookup_unchecked() };
    if node.is_destroyed() {
        return;
    }
    let sources: Vec<NodePtr> = node.sources.borrow().clone();
    let self_live = node.is_live();
    for s in sources {
        let source_node = unsafe { s.lookup_unchecked() };
        let mut sinks = source_node.sinks.borrow_mut();
        if let Some(i) = sinks.iter().position(|p| *p == ptr) {
            sinks.remove(i);
        }
        drop(sinks);
        if self_live {
            demote_liveness(s);
        }
    }
    node.sources.borrow_mut().clear();
    node.sinks.borrow_mut().clear();
    node.status.set(Status::Destroyed);
    *node.on_watched.borrow_mut() = None;
    *node.on_unwatched.borrow_mut() = None;
    match &node.kind {
        NodeKind::Computed { compute } => *compute.borrow_mut() = None,
        NodeKind::Watcher { notify, .. } => *notify.borrow_mut() = None,
        NodeKind::State => {}
    }
}

// ---------------------------------------------------------------------
// read-observation hook
// ---------------------------------------------------------------------

/// Every read of `source` passes through here. If a consumer is currently
/// being evaluated and untracking is not in effect, the read is recorded
/// onto the consumer's in-progress source list and a (deduplicated) sink
/// back-edge is installed unconditionally, so that a later write can find
/// its way to this consumer by walking `sinks` regardless of whether
/// anyone is watching it. Liveness (`watch_count`, `on_watched`/
/// `on_unwatched`) is a separate concern driven only by `Watcher::watch`;
/// see `promote_liveness`/`demote_liveness` below and `DESIGN.md`.
fn record_read(source: NodePtr) {
    with_ctx(|ctx| {
        if ctx.untracking.get() {
            return;
        }
        if let Some(consumer) = ctx.current_consumer.get() {
            let consumer_node = unsafe { consumer.lookup_unchecked() };
            consumer_node.pending_sources.borrow_mut().push(source);
            let source_node = unsafe { source.lookup_unchecked() };
            let mut sinks = source_node.sinks.borrow_mut();
            if !sinks.contains(&consumer) {
                sinks.push(consumer);
            }
        }
    });
}

/// Raises `ptr`'s liveness refcount, firing `on_watched` and cascading to
/// its current sources only on the 0→1 transition.
fn promote_liveness(ptr: NodePtr) {
    let node = unsafe { ptr.lookup_unchecked() };
    let was_unwatched = node.watch_count.get() == 0;
    node.watch_count.set(node.watch_count.get() + 1);
    if was_unwatched {
        log::trace!("{:?} became live", &*node);
        if let Some(hook) = node.on_watched.borrow_mut().as_mut() {
            hook();
        }
        let sources: Vec<NodePtr> = node.sources.borrow().clone();
        for s in sources {
            promote_liveness(s);
        }
    }
}

/// Lowers `ptr`'s liveness refcount, firing `on_unwatched` and cascading to
/// its current sources only on the 1→0 transition.
fn demote_liveness(ptr: NodePtr) {
    let node = unsafe { ptr.lookup_unchecked() };
    let new_count = node.watch_count.get().saturating_sub(1);
    node.watch_count.set(new_count);
    if new_count == 0 {
        log::trace!("{:?} became unwatched", &*node);
        if let Some(hook) = node.on_unwatched.borrow_mut().as_mut() {
            hook();
        }
        let sources: Vec<NodePtr> = node.sources.borrow().clone();
        for s in sources {
            demote_liveness(s);
        }
    }
}

// ---------------------------------------------------------------------
// guards
// ---------------------------------------------------------------------

fn check_not_notifying() -> Result<(), GraphError> {
    if with_ctx(|ctx| ctx.notifying.get()) {
        Err(GraphError::NotificationPhase)
    } else {
        Ok(())
    }
}

fn check_not_destroyed(ptr: NodePtr) -> Result<(), GraphError> {
    let node = unsafe { ptr.lookup_unchecked() };
    if node.is_destroyed() {
        Err(GraphError::Destroyed)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// State operations
// ---------------------------------------------------------------------

pub(crate) fn state_get(ptr: NodePtr) -> Result<Rc<dyn Any>, GraphError> {
    check_not_notifying()?;
    check_not_destroyed(ptr)?;
    record_read(ptr);
    let node = unsafe { ptr.lookup_unchecked() };
    match &*node.slot.borrow() {
        Slot::Value(v) => Ok(v.clone()),
        _ => unreachable!("a State node's slot is always initialized"),
    }
}

pub(crate) fn state_set(ptr: NodePtr, new: Rc<dyn Any>) -> Result<(), GraphError> {
    check_not_notifying()?;
    check_not_destroyed(ptr)?;
    let node = unsafe { ptr.lookup_unchecked() };
    let changed = match &*node.slot.borrow() {
        Slot::Value(old) => !(node.eq)(old.as_ref(), new.as_ref()),
        _ => true,
    };
    if !changed {
        return Ok(());
    }
    *node.slot.borrow_mut() = Slot::Value(new);
    node.status.set(Status::Dirty);
    log::debug!("{:?} written, propagating", &*node);
    let watchers = propagate_from_write(ptr);
    run_notifications(watchers)
}

/// Two explicit passes, per spec.md §4.2: every direct sink is dirtied
/// unconditionally first, and only once that whole set is settled does the
/// transitive checked cascade run from each direct sink's own sinks. Doing
/// this in one combined recursive pass (cascading into a sink's own sinks
/// immediately after marking it) would let an earlier direct sink's cascade
/// reach a *later* direct sink first and mark it checked, so the later
/// sink's own "is a direct sink, so dirty" marking would then no-op against
/// the already-non-clean guard — silently downgrading a direct sink to
/// checked. Two passes make direct-sink dirtying independent of traversal
/// order.
fn propagate_from_write(root: NodePtr) -> Vec<NodePtr> {
    let mut notify = Vec::new();
    let root_node = unsafe { root.lookup_unchecked() };
    let direct: Vec<NodePtr> = root_node.sinks.borrow().clone();

    for &s in &direct {
        mark_direct(s, &mut notify);
    }
    for &s in &direct {
        let node = unsafe { s.lookup_unchecked() };
        if node.kind.is_watcher() {
            continue;
        }
        let sinks: Vec<NodePtr> = node.sinks.borrow().clone();
        for sink in sinks {
            mark_checked(sink, &mut notify);
        }
    }

    notify
}

/// Pass 1: `ptr` is a direct sink of the write. Becomes dirty unconditionally,
/// even if an earlier sibling's cascade already marked it checked — dirty
/// dominates checked (invariant 4). A watcher has no dirty/checked status of
/// its own; it is queued for notification instead.
fn mark_direct(ptr: NodePtr, notify: &mut Vec<NodePtr>) {
    let node = unsafe { ptr.lookup_unchecked() };
    if let NodeKind::Watcher { dirty_since_arm, .. } = &node.kind {
        queue_watcher(ptr, dirty_since_arm, notify);
        return;
    }
    node.status.set(Status::Dirty);
}

/// Pass 2: transitively marks `ptr` checked, recursing into its own sinks.
/// A node that is already non-clean (dirty from pass 1, or checked from an
/// earlier branch of this same pass) stops the walk: its descendants are
/// already consistent with whatever first marked it.
fn mark_checked(ptr: NodePtr, notify: &mut Vec<NodePtr>) {
    let node = unsafe { ptr.lookup_unchecked() };
    if let NodeKind::Watcher { dirty_since_arm, .. } = &node.kind {
        queue_watcher(ptr, dirty_since_arm, notify);
        return;
    }
    if node.status.get() != Status::Clean {
        return;
    }
    node.status.set(Status::Checked);
    let sinks: Vec<NodePtr> = node.sinks.borrow().clone();
    for sink in sinks {
        mark_checked(sink, notify);
    }
}

fn queue_watcher(ptr: NodePtr, dirty_since_arm: &std::cell::Cell<bool>, notify: &mut Vec<NodePtr>) {
    if !dirty_since_arm.get() {
        dirty_since_arm.set(true);
        notify.push(ptr);
    }
}

fn run_notifications(watchers: Vec<NodePtr>) -> Result<(), GraphError> {
    if watchers.is_empty() {
        return Ok(());
    }
    let _guard = NotifyingGuard::enter();
    let mut failures = 0usize;
    for w in watchers {
        let node = unsafe { w.lookup_unchecked() };
        let NodeKind::Watcher { notify, .. } = &node.kind else {
            continue;
        };
        let mut slot = notify.borrow_mut();
        let Some(cb) = slot.as_mut() else { continue };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb()));
        if let Err(payload) = result {
            failures += 1;
            log::debug!(
                "watcher notify callback panicked: {}",
                PanicPayload::capture(payload)
            );
        }
    }
    if failures > 0 {
        Err(GraphError::Aggregate(failures))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Computed operations
// ---------------------------------------------------------------------

pub(crate) fn computed_get(ptr: NodePtr) -> Result<ComputedOutcome, GraphError> {
    check_not_notifying()?;
    check_not_destroyed(ptr)?;
    record_read(ptr);
    ensure_clean(ptr)?;
    let node = unsafe { ptr.lookup_unchecked() };
    match &*node.slot.borrow() {
        Slot::Value(v) => Ok(ComputedOutcome::Value(v.clone())),
        Slot::Error(e) => Ok(ComputedOutcome::Error(e.clone())),
        Slot::Uninitialized => unreachable!("ensure_clean always leaves a value or error"),
    }
}

/// Resolves `ptr` to clean, recursing into a checked node's sources in
/// insertion order. Returns whether the node's cached output changed as a
/// result (used by the caller's own consistency walk, one layer up).
fn ensure_clean(ptr: NodePtr) -> Result<bool, GraphError> {
    let node = unsafe { ptr.lookup_unchecked() };
    match node.status.get() {
        Status::Destroyed => Err(GraphError::Destroyed),
        Status::Clean => Ok(false),
        Status::Dirty => recompute(ptr),
        Status::Checked => {
            let sources: Vec<NodePtr> = node.sources.borrow().clone();
            let mut any_changed = false;
            for source in sources {
                let source_node = unsafe { source.lookup_unchecked() };
                if matches!(source_node.kind, NodeKind::State) {
                    continue; // states carry no further ancestors to verify
                }
                if ensure_clean(source)? {
                    any_changed = true;
                }
            }
            if any_changed {
                recompute(ptr)
            } else {
                node.status.set(Status::Clean);
                Ok(false)
            }
        }
    }
}

fn recompute(ptr: NodePtr) -> Result<bool, GraphError> {
    let node = unsafe { ptr.lookup_unchecked() };
    if node.visiting.get() {
        return Err(GraphError::Cycle);
    }
    let compute_cell = match &node.kind {
        NodeKind::Computed { compute } => compute,
        _ => unreachable!("recompute is only called on Computed nodes"),
    };

    node.visiting.set(true);
    node.pending_sources.borrow_mut().clear();
    let consumer_guard = ConsumerGuard::enter(ptr);

    let outcome = {
        let mut slot = compute_cell.borrow_mut();
        match slot.as_mut() {
            Some(cb) => cb(),
            None => {
                drop(slot);
                drop(consumer_guard);
                node.visiting.set(false);
                return Err(GraphError::Destroyed);
            }
        }
    };

    drop(consumer_guard);
    node.visiting.set(false);

    let new_sources = node.pending_sources.borrow_mut().split_off(0);
    diff_sources(ptr, &new_sources);
    *node.sources.borrow_mut() = new_sources;

    let changed = match outcome {
        Ok(value) => {
            let changed = match &*node.slot.borrow() {
                Slot::Value(old) => !(node.eq)(old.as_ref(), value.as_ref()),
                _ => true,
            };
            if changed {
                *node.slot.borrow_mut() = Slot::Value(value);
            }
            changed
        }
        Err(err) => {
            // A cycle surfaces here as an ordinary erased error: the
            // reentrant call at the top of this function returned
            // `GraphError::Cycle` through the callback's own `?`, possibly
            // by way of other nodes in the cycle. That is not a genuine
            // callback failure to cache — spec.md §7 treats "Cycle" and
            // "Cached error" as distinct rows, and a cycle must leave this
            // node dirty so the next read re-attempts instead of replaying
            // the same `Cycle` forever.
            if matches!(err.downcast_ref::<GraphError>(), Some(GraphError::Cycle)) {
                log::debug!("{:?} is part of a cycle, leaving it dirty", &*node);
                node.status.set(Status::Dirty);
                return Err(GraphError::Cycle);
            }
            log::debug!("{:?} produced a cached error", &*node);
            *node.slot.borrow_mut() = Slot::Error(err);
            true
        }
    };
    node.status.set(Status::Clean);
    Ok(changed)
}

/// Reconciles a fresh evaluation's source list against the prior one: the
/// sink back-edge (always tracked, live or not) is dropped for sources that
/// disappeared. When `ptr` is itself watcher-reachable, its own liveness is
/// cascaded onto newly-appearing sources and withdrawn from ones that
/// disappeared, so a conditional branch switching dependencies keeps
/// `on_watched`/`on_unwatched` firing correctly (see S2/S6 in `lib.rs`).
fn diff_sources(ptr: NodePtr, new_sources: &[NodePtr]) {
    let node = unsafe { ptr.lookup_unchecked() };
    let old_sources = node.sources.borrow().clone();
    let self_live = node.is_live();
    for &old in &old_sources {
        if !new_sources.contains(&old) {
            let old_node = unsafe { old.lookup_unchecked() };
            let mut sinks = old_node.sinks.borrow_mut();
            if let Some(i) = sinks.iter().position(|p| *p == ptr) {
                sinks.remove(i);
            }
            drop(sinks);
            if self_live {
                demote_liveness(old);
            }
        }
    }
    if self_live {
        for &new in new_sources {
            if !old_sources.contains(&new) {
                promote_liveness(new);
            }
        }
    }
}

// ---------------------------------------------------------------------
// Watcher operations
// ---------------------------------------------------------------------

pub(crate) fn watcher_watch(ptr: NodePtr, nodes: &[NodePtr]) -> Result<(), GraphError> {
    check_not_notifying()?;
    for &n in nodes {
        let target = unsafe { n.lookup_unchecked() };
        if !target.kind.is_signal() {
            return Err(GraphError::Kind("watch expects a State or Computed node"));
        }
    }
    let node = unsafe { ptr.lookup_unchecked() };
    if let NodeKind::Watcher {
        dirty_since_arm, ..
    } = &node.kind
    {
        dirty_since_arm.set(false);
    }
    for &n in nodes {
        let already_watched = node.sources.borrow().contains(&n);
        if !already_watched {
            node.sources.borrow_mut().push(n);
            let target = unsafe { n.lookup_unchecked() };
            if !target.sinks.borrow().contains(&ptr) {
                target.sinks.borrow_mut().push(ptr);
            }
            promote_liveness(n);
        }
        let target = unsafe { n.lookup_unchecked() };
        if matches!(target.kind, NodeKind::State) {
            target.status.set(Status::Clean);
        }
    }
    Ok(())
}

pub(crate) fn watcher_unwatch(ptr: NodePtr, nodes: &[NodePtr]) -> Result<(), GraphError> {
    check_not_notifying()?;
    let node = unsafe { ptr.lookup_unchecked() };
    for &n in nodes {
        let position = node.sources.borrow().iter().position(|p| *p == n);
        if let Some(i) = position {
            node.sources.borrow_mut().remove(i);
            let target = unsafe { n.lookup_unchecked() };
            if let Some(j) = target.sinks.borrow().iter().position(|p| *p == ptr) {
                target.sinks.borrow_mut().remove(j);
            }
            demote_liveness(n);
        }
    }
    Ok(())
}

pub(crate) fn watcher_pending(ptr: NodePtr) -> Vec<NodePtr> {
    let node = unsafe { ptr.lookup_unchecked() };
    node.sources
        .borrow()
        .iter()
        .cloned()
        .filter(|&n| {
            let target = unsafe { n.lookup_unchecked() };
            matches!(target.status.get(), Status::Dirty | Status::Checked)
        })
        .collect()
}

// ---------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------

pub(crate) fn introspect_sources(ptr: NodePtr) -> Vec<NodePtr> {
    let node = unsafe { ptr.lookup_unchecked() };
    node.sources.borrow().clone()
}

/// The spec's `introspect_sinks` is documented as "live sinks": a sink edge
/// only counts if it is actually reachable from a watcher. `sinks` itself
/// tracks every consumer that has ever read this node (live or not, see
/// `record_read`), so this filters down to the ones a watcher could
/// actually be reached through.
pub(crate) fn introspect_sinks(ptr: NodePtr) -> Vec<NodePtr> {
    let node = unsafe { ptr.lookup_unchecked() };
    node.sinks
        .borrow()
        .iter()
        .cloned()
        .filter(|&s| is_live_sink(s))
        .collect()
}

pub(crate) fn has_sinks(ptr: NodePtr) -> bool {
    let node = unsafe { ptr.lookup_unchecked() };
    node.sinks.borrow().iter().any(|&s| is_live_sink(s))
}

fn is_live_sink(ptr: NodePtr) -> bool {
    let node = unsafe { ptr.lookup_unchecked() };
    node.kind.is_watcher() || node.is_live()
}

pub(crate) fn has_sources(ptr: NodePtr) -> bool {
    let node = unsafe { ptr.lookup_unchecked() };
    !node.sources.borrow().is_empty()
}

pub(crate) fn current_computed() -> Option<NodePtr> {
    with_ctx(|ctx| ctx.current_consumer.get())
}

pub(crate) fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _guard = UntrackGuard::enter();
    f()
}
