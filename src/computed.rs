use std::any::Any;
use std::panic::Location;
use std::rc::Rc;

use crate::eq::erase_eq;
use crate::graph::{self, ComputedOutcome, NodeId, NodePtr};
use crate::options::NodeOptions;
use crate::{ComputedError, GraphError};

/// A lazily-recomputed derived node. Its `sources` are rediscovered on
/// every evaluation by recording every `get()` the callback performs.
pub struct Computed<T, E = GraphError> {
    ptr: NodePtr,
    location: &'static Location<'static>,
    _marker: std::marker::PhantomData<(Rc<T>, E)>,
}

impl<T, E> Clone for Computed<T, E> {
    fn clone(&self) -> Self {
        graph::inc_handle(self.ptr);
        Computed {
            ptr: self.ptr,
            location: self.location,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, E> Drop for Computed<T, E> {
    fn drop(&mut self) {
        graph::dec_handle(self.ptr);
    }
}

impl<T, E> Computed<T, E>
where
    T: PartialEq + 'static,
    E: Clone + 'static,
{
    /// Creates a new computed node wrapping `compute`. The callback reads
    /// its dependencies by calling `get()` on the `State`/`Computed`
    /// handles it closes over; there is no explicit dependency list.
    #[track_caller]
    pub fn new(compute: impl FnMut() -> Result<T, E> + 'static) -> Computed<T, E> {
        Self::with_options(compute, NodeOptions::default())
    }

    #[track_caller]
    pub fn with_options(
        mut compute: impl FnMut() -> Result<T, E> + 'static,
        options: NodeOptions<T>,
    ) -> Computed<T, E> {
        let location = Location::caller();
        let eq = erase_eq(options.eq);
        let erased = move || -> Result<Rc<dyn Any>, Rc<dyn Any>> {
            match compute() {
                Ok(value) => Ok(Rc::new(value) as Rc<dyn Any>),
                Err(error) => Err(Rc::new(error) as Rc<dyn Any>),
            }
        };
        let ptr = graph::alloc_computed(
            Box::new(erased),
            eq,
            options.on_watched,
            options.on_unwatched,
            location,
        );
        Computed {
            ptr,
            location,
            _marker: std::marker::PhantomData,
        }
    }

    /// Runs the read-observation hook, brings the node to clean (recomputing
    /// or walking checked sources as needed), and returns the cached value
    /// or re-throws the cached error.
    pub fn get(&self) -> Result<Rc<T>, ComputedError<E>> {
        match graph::computed_get(self.ptr) {
            Ok(ComputedOutcome::Value(v)) => {
                Ok(v.downcast::<T>().expect("Computed value type mismatch"))
            }
            Ok(ComputedOutcome::Error(e)) => {
                let e = e.downcast::<E>().expect("Computed error type mismatch");
                Err(ComputedError::Cached((*e).clone()))
            }
            Err(graph_error) => Err(ComputedError::Graph(graph_error)),
        }
    }

    pub fn id(&self) -> NodeId {
        NodeId(self.ptr)
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl<T, E> std::fmt::Debug for Computed<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("location", &self.location)
            .finish()
    }
}
