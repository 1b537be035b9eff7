use std::any::Any;
use std::panic::Location;
use std::rc::Rc;

use crate::eq::erase_eq;
use crate::graph::{self, NodeId, NodePtr};
use crate::options::NodeOptions;
use crate::GraphError;

/// A writable leaf node. `sources` is always empty; its status is clean
/// except briefly while a write is propagating.
pub struct State<T> {
    ptr: NodePtr,
    location: &'static Location<'static>,
    _marker: std::marker::PhantomData<Rc<T>>,
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        graph::inc_handle(self.ptr);
        State {
            ptr: self.ptr,
            location: self.location,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Drop for State<T> {
    fn drop(&mut self) {
        graph::dec_handle(self.ptr);
    }
}

impl<T> State<T>
where
    T: PartialEq + 'static,
{
    /// Creates a new state node holding `value`.
    #[track_caller]
    pub fn new(value: T) -> State<T> {
        Self::with_options(value, NodeOptions::default())
    }

    /// Creates a new state node, overriding equality and/or liveness hooks.
    #[track_caller]
    pub fn with_options(value: T, options: NodeOptions<T>) -> State<T> {
        let location = Location::caller();
        let eq = erase_eq(options.eq);
        let ptr = graph::alloc_state(
            Rc::new(value) as Rc<dyn Any>,
            eq,
            options.on_watched,
            options.on_unwatched,
            location,
        );
        State {
            ptr,
            location,
            _marker: std::marker::PhantomData,
        }
    }

    /// Runs the read-observation hook and returns the current value.
    /// Fails only if called while a watcher's `notify` callback is running.
    pub fn get(&self) -> Result<Rc<T>, GraphError> {
        let value = graph::state_get(self.ptr)?;
        Ok(value.downcast::<T>().expect("State value type mismatch"))
    }

    /// Compares `next` against the current value with this node's equality
    /// predicate; on inequality, stores it and synchronously runs the
    /// write-propagation protocol, notifying every newly-dirtied watcher.
    pub fn set(&self, next: T) -> Result<(), GraphError> {
        graph::state_set(self.ptr, Rc::new(next) as Rc<dyn Any>)
    }

    pub fn id(&self) -> NodeId {
        NodeId(self.ptr)
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl<T> std::fmt::Debug for State<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("location", &self.location)
            .finish()
    }
}
