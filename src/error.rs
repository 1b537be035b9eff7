use std::fmt;

/// Errors raised directly by the engine, as opposed to errors produced by a
/// computed's own callback (which are cached and re-thrown as the caller's
/// own error type; see [`crate::Computed`]).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The receiver or an argument failed a type check (for example,
    /// [`crate::Watcher::watch`] given the id of a watcher rather than a
    /// signal node).
    #[error("type check failed: {0}")]
    Kind(&'static str),
    /// `State::get`/`set` or `Computed::get` was called while a watcher's
    /// `notify` callback was on the stack.
    #[error("node operation attempted during watcher notification")]
    NotificationPhase,
    /// A computed's callback re-entered its own recomputation.
    #[error("cycle detected while recomputing a computed node")]
    Cycle,
    /// The node has already been destroyed (all handles dropped).
    #[error("node has been destroyed")]
    Destroyed,
    /// One or more watcher `notify` callbacks panicked during a single
    /// `State::set` write.
    #[error("{0} watcher notification(s) failed")]
    Aggregate(usize),
}

/// The error surfaced by [`crate::Computed::get`]: either an engine-level
/// failure (cycle, notification-phase violation, ...), or the node's own
/// cached error, re-thrown verbatim until a source changes and
/// recomputation yields a different outcome.
#[derive(Debug, Clone)]
pub enum ComputedError<E> {
    Graph(GraphError),
    Cached(E),
}

impl<E: fmt::Debug> fmt::Display for ComputedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputedError::Graph(e) => write!(f, "{}", e),
            ComputedError::Cached(e) => write!(f, "cached error: {:?}", e),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for ComputedError<E> {}

/// Lets a computed callback use `?` directly on another computed whose
/// cached error is itself a plain `GraphError` (the common case when no
/// custom error type is needed): both variants collapse back to the one
/// `GraphError` they carry.
impl From<ComputedError<GraphError>> for GraphError {
    fn from(e: ComputedError<GraphError>) -> GraphError {
        match e {
            ComputedError::Graph(inner) => inner,
            ComputedError::Cached(inner) => inner,
        }
    }
}

/// A human-readable rendering of a caught `notify` panic payload, kept only
/// for diagnostics (logged, not part of any public error path).
#[derive(Debug, Clone)]
pub(crate) struct PanicPayload(pub(crate) String);

impl PanicPayload {
    pub(crate) fn capture(payload: Box<dyn std::any::Any + Send>) -> Self {
        if let Some(message) = payload.downcast_ref::<&'static str>() {
            PanicPayload((*message).to_string())
        } else if let Some(message) = payload.downcast_ref::<String>() {
            PanicPayload(message.clone())
        } else {
            PanicPayload("non-string panic payload".to_string())
        }
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
