/// Construction options shared by `State` and `Computed`, matching the
/// `{eq, on_watched, on_unwatched}` option bag in the external interface.
pub struct NodeOptions<T> {
    pub(crate) eq: Option<Box<dyn Fn(&T, &T) -> bool>>,
    pub(crate) on_watched: Option<Box<dyn FnMut()>>,
    pub(crate) on_unwatched: Option<Box<dyn FnMut()>>,
}

impl<T> Default for NodeOptions<T> {
    fn default() -> Self {
        NodeOptions {
            eq: None,
            on_watched: None,
            on_unwatched: None,
        }
    }
}

impl<T> NodeOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the default equality predicate used to decide whether a
    /// write or recomputation actually changed the node's value.
    pub fn eq(mut self, f: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.eq = Some(Box::new(f));
        self
    }

    /// Runs once when the node transitions from unwatched to live.
    pub fn on_watched(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_watched = Some(Box::new(f));
        self
    }

    /// Runs once when the node loses its last live sink.
    pub fn on_unwatched(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_unwatched = Some(Box::new(f));
        self
    }
}
