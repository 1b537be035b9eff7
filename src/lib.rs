//! A single-threaded reactive value graph: `State` nodes hold values,
//! `Computed` nodes derive values lazily from other nodes, and `Watcher`
//! nodes subscribe to be notified, synchronously, the moment a write makes
//! one of their watched nodes' output possibly stale.
//!
//! Evaluation is pull-based and glitch-free: a write only ever marks nodes
//! dirty or checked, and a checked node is resolved to clean (recomputing
//! only if something it depends on actually changed) the next time it, or
//! something downstream of it, is read. See `DESIGN.md` for the grounding
//! of each piece in the engine this crate grew out of.

mod arena;
mod context;
mod eq;
mod error;
mod graph;
mod options;

mod computed;
mod introspect;
mod state;
mod watcher;

pub use crate::computed::Computed;
pub use crate::error::{ComputedError, GraphError};
pub use crate::graph::NodeId;
pub use crate::introspect::{
    current_computed, has_sinks, has_sources, introspect_sinks, introspect_sources, untrack,
};
pub use crate::options::NodeOptions;
pub use crate::state::State;
pub use crate::watcher::Watcher;

/// The crate's prelude.
pub mod prelude {
    pub use crate::{
        current_computed, has_sinks, has_sources, introspect_sinks, introspect_sources, untrack,
        Computed, ComputedError, GraphError, NodeId, NodeOptions, State, Watcher,
    };
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::prelude::*;

    /// Lets a failing test's propagation steps be inspected with
    /// `RUST_LOG=trace cargo test -- --nocapture`. Safe to call from every
    /// test: `env_logger` only installs the global logger once.
    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    // --- S1: parity counter -------------------------------------------
    //
    // A two-level pull chain with no watcher at all. `is_even` recomputes
    // on every write to `counter` (its only source changed), but `parity`
    // only recomputes when `is_even`'s own cached value actually flips.

    #[test]
    fn s1_parity_counter_prunes_unchanged_intermediate() {
        init_log();
        let counter = State::new(0i64);
        let is_even_calls = Rc::new(Cell::new(0u32));
        let is_even = {
            let counter = counter.clone();
            let calls = is_even_calls.clone();
            Computed::<bool>::new(move || {
                calls.set(calls.get() + 1);
                Ok((*counter.get()? & 1) == 0)
            })
        };
        let parity_calls = Rc::new(Cell::new(0u32));
        let parity = {
            let is_even = is_even.clone();
            let calls = parity_calls.clone();
            Computed::<&'static str>::new(move || {
                calls.set(calls.get() + 1);
                Ok(if *is_even.get()? { "even" } else { "odd" })
            })
        };

        assert_eq!(*parity.get().unwrap(), "even");
        assert_eq!(is_even_calls.get(), 1);
        assert_eq!(parity_calls.get(), 1);

        counter.set(2).unwrap();
        assert_eq!(*parity.get().unwrap(), "even");
        assert_eq!(is_even_calls.get(), 2);
        assert_eq!(parity_calls.get(), 1, "parity's value didn't change, so it shouldn't rerun");

        counter.set(3).unwrap();
        assert_eq!(*parity.get().unwrap(), "odd");
        assert_eq!(is_even_calls.get(), 3);
        assert_eq!(parity_calls.get(), 2);
    }

    #[test]
    fn idempotent_read_does_not_reinvoke_a_clean_computed() {
        init_log();
        let calls = Rc::new(Cell::new(0u32));
        let c = {
            let calls = calls.clone();
            Computed::<i32>::new(move || {
                calls.set(calls.get() + 1);
                Ok(41)
            })
        };
        assert_eq!(*c.get().unwrap(), 41);
        assert_eq!(*c.get().unwrap(), 41);
        assert_eq!(*c.get().unwrap(), 41);
        assert_eq!(calls.get(), 1);
    }

    // --- S2: conditional dependency --------------------------------------
    //
    // `picked` reads `flag` and then one of `a`/`b` depending on its value.
    // Switching branches must update `picked`'s recorded source set so a
    // write to the now-unread branch no longer dirties it.

    #[test]
    fn s2_conditional_dependency_follows_the_live_branch() {
        init_log();
        let flag = State::new(true);
        let a = State::new(1i32);
        let b = State::new(2i32);
        let picked = {
            let (flag, a, b) = (flag.clone(), a.clone(), b.clone());
            Computed::<i32>::new(move || {
                if *flag.get()? {
                    Ok(*a.get()?)
                } else {
                    Ok(*b.get()?)
                }
            })
        };

        assert_eq!(*picked.get().unwrap(), 1);
        assert!(introspect_sources(picked.id()).contains(&a.id()));
        assert!(!introspect_sources(picked.id()).contains(&b.id()));

        flag.set(false).unwrap();
        assert_eq!(*picked.get().unwrap(), 2);
        assert!(introspect_sources(picked.id()).contains(&b.id()));
        assert!(!introspect_sources(picked.id()).contains(&a.id()));

        // `a` is no longer read; writing it must not affect `picked`'s cache.
        a.set(100).unwrap();
        assert_eq!(*picked.get().unwrap(), 2);
    }

    // --- write-propagation two-pass marking -------------------------------
    //
    // `a` is a direct sink of `root` and also a source of `b`, which is
    // itself a direct sink of `root`. A single combined marking pass would
    // cascade from `a` into `b` (marking `b` checked) before the write's own
    // loop over direct sinks reaches `b`, so `b`'s "I'm a direct sink, go
    // dirty" marking would no-op against the already-non-clean guard and
    // leave it checked. Checked `b` would then only recompute if `a`'s
    // cached output changed — but `b`'s callback also reads `root` directly,
    // so a same-parity write (which leaves `a` unchanged) must still
    // recompute `b`.

    #[test]
    fn write_propagation_dirties_every_direct_sink_regardless_of_transitive_order() {
        init_log();
        let root = State::new(0i32);
        let a = {
            let root = root.clone();
            Computed::<bool>::new(move || Ok((*root.get()? & 1) == 0))
        };
        let b_calls = Rc::new(Cell::new(0u32));
        let b = {
            let root = root.clone();
            let a = a.clone();
            let calls = b_calls.clone();
            Computed::<i32>::new(move || {
                calls.set(calls.get() + 1);
                let r = *root.get()?;
                let bump = if *a.get()? { 0 } else { 1 };
                Ok(r + bump)
            })
        };

        assert_eq!(*a.get().unwrap(), true);
        assert_eq!(*b.get().unwrap(), 0);
        assert_eq!(b_calls.get(), 1);

        // Same parity: `a`'s cached value is unchanged, but `root` itself
        // moved from 0 to 2, and `b` reads `root` directly — it must
        // recompute, not stay checked-then-pruned-to-clean.
        root.set(2).unwrap();
        assert_eq!(*a.get().unwrap(), true);
        assert_eq!(*b.get().unwrap(), 2, "b reads root directly and must reflect the new value");
        assert_eq!(b_calls.get(), 2);
    }

    // --- S3: error caching -------------------------------------------------
    //
    // A computed whose callback fails caches the error and re-throws it
    // verbatim on every read until a source change causes a different
    // outcome.

    #[test]
    fn s3_error_caching_rethrows_until_recomputed() {
        init_log();
        let n = State::new(0i32);
        let calls = Rc::new(Cell::new(0u32));
        let reciprocal = {
            let n = n.clone();
            let calls = calls.clone();
            Computed::<i32, String>::new(move || {
                calls.set(calls.get() + 1);
                let value = *n.get().map_err(|e| e.to_string())?;
                if value == 0 {
                    Err("division by zero".to_string())
                } else {
                    Ok(100 / value)
                }
            })
        };

        let err = reciprocal.get().unwrap_err();
        assert!(matches!(err, ComputedError::Cached(ref m) if m == "division by zero"));
        let err_again = reciprocal.get().unwrap_err();
        assert!(matches!(err_again, ComputedError::Cached(ref m) if m == "division by zero"));
        assert_eq!(calls.get(), 1, "a clean erroring computed must not rerun on repeat reads");

        n.set(4).unwrap();
        assert_eq!(*reciprocal.get().unwrap(), 25);
        assert_eq!(calls.get(), 2);
    }

    // --- S4: watcher notification -------------------------------------

    #[test]
    fn s4_watcher_fires_once_per_write_that_dirties_it() {
        init_log();
        let s = State::new(1i32);
        let doubled = {
            let s = s.clone();
            Computed::<i32>::new(move || Ok(*s.get()? * 2))
        };
        let notifications = Rc::new(Cell::new(0u32));
        let w = {
            let notifications = notifications.clone();
            Watcher::new(move || notifications.set(notifications.get() + 1))
        };
        w.watch(&[doubled.id()]).unwrap();

        s.set(2).unwrap();
        assert_eq!(notifications.get(), 1);
        assert_eq!(*doubled.get().unwrap(), 4);

        // A second write before the watcher is re-armed must not notify again.
        s.set(3).unwrap();
        assert_eq!(notifications.get(), 1);

        w.watch(&[doubled.id()]).unwrap();
        s.set(4).unwrap();
        assert_eq!(notifications.get(), 2);
    }

    #[test]
    fn s4_get_pending_reflects_dirty_watched_state() {
        init_log();
        let s = State::new(1i32);
        let w = Watcher::new(|| {});
        w.watch(&[s.id()]).unwrap();
        assert!(w.get_pending().is_empty());

        s.set(2).unwrap();
        assert_eq!(w.get_pending(), vec![s.id()]);

        w.watch(&[s.id()]).unwrap();
        assert!(w.get_pending().is_empty());
    }

    // --- S5: pruning --------------------------------------------------

    #[test]
    fn s5_pruning_skips_a_watcher_notification_when_nothing_actually_changed() {
        init_log();
        let raw = State::new(10i32);
        let clamped = {
            let raw = raw.clone();
            Computed::<i32>::new(move || Ok((*raw.get()?).clamp(0, 10)))
        };
        let notifications = Rc::new(Cell::new(0u32));
        let w = {
            let notifications = notifications.clone();
            Watcher::new(move || notifications.set(notifications.get() + 1))
        };
        w.watch(&[clamped.id()]).unwrap();

        assert_eq!(*clamped.get().unwrap(), 10);
        raw.set(10).unwrap(); // no-op write: state's own eq check short-circuits
        assert_eq!(notifications.get(), 0);

        raw.set(20).unwrap();
        assert_eq!(notifications.get(), 1);
        assert_eq!(*clamped.get().unwrap(), 10, "clamp output is unchanged by 10 -> 20");
    }

    // --- S6: liveness hooks ---------------------------------------------

    #[test]
    fn s6_liveness_hooks_fire_exactly_once_per_transition() {
        init_log();
        let watched_count = Rc::new(Cell::new(0u32));
        let unwatched_count = Rc::new(Cell::new(0u32));
        let s = {
            let watched_count = watched_count.clone();
            let unwatched_count = unwatched_count.clone();
            State::with_options(
                1i32,
                NodeOptions::new()
                    .on_watched(move || watched_count.set(watched_count.get() + 1))
                    .on_unwatched(move || unwatched_count.set(unwatched_count.get() + 1)),
            )
        };
        let c = {
            let s = s.clone();
            Computed::<i32>::new(move || Ok(*s.get()?))
        };

        // Reading `c` directly never promotes liveness: nothing watches it.
        assert_eq!(*c.get().unwrap(), 1);
        assert_eq!(watched_count.get(), 0);

        let w = Watcher::new(|| {});
        w.watch(&[c.id()]).unwrap();
        assert_eq!(watched_count.get(), 1);
        assert_eq!(unwatched_count.get(), 0);

        w.unwatch(&[c.id()]).unwrap();
        assert_eq!(watched_count.get(), 1);
        assert_eq!(unwatched_count.get(), 1);
    }

    #[test]
    fn liveness_is_shared_across_two_watchers() {
        init_log();
        let unwatched_count = Rc::new(Cell::new(0u32));
        let s = {
            let unwatched_count = unwatched_count.clone();
            State::with_options(
                1i32,
                NodeOptions::new().on_unwatched(move || unwatched_count.set(unwatched_count.get() + 1)),
            )
        };
        let w1 = Watcher::new(|| {});
        let w2 = Watcher::new(|| {});
        w1.watch(&[s.id()]).unwrap();
        w2.watch(&[s.id()]).unwrap();

        w1.unwatch(&[s.id()]).unwrap();
        assert_eq!(unwatched_count.get(), 0, "w2 still watches s");

        w2.unwatch(&[s.id()]).unwrap();
        assert_eq!(unwatched_count.get(), 1);
    }

    // --- cycle detection -------------------------------------------------

    #[test]
    fn self_referential_computed_reports_a_cycle_and_always_reattempts() {
        init_log();
        // A computed cannot close over its own handle before it exists, so
        // the cycle is built with interior mutability: a `State<Option<..>>`
        // style trick isn't available without `T: Clone`, so instead this
        // exercises the simplest possible cycle, a computed whose callback
        // calls back into itself via a shared `Rc<RefCell<..>>` indirection.
        use std::cell::RefCell;

        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let calls = Rc::new(Cell::new(0u32));
        let c = {
            let slot = slot.clone();
            let calls = calls.clone();
            Computed::<i32>::new(move || {
                calls.set(calls.get() + 1);
                let inner = slot.borrow().clone();
                match inner {
                    Some(inner) => Ok(*inner.get()?),
                    None => Ok(0),
                }
            })
        };
        *slot.borrow_mut() = Some(c.clone());

        let err: GraphError = c.get().unwrap_err().into();
        assert_eq!(err, GraphError::Cycle);
        assert_eq!(calls.get(), 1);

        // A cycle is not a cached error (spec.md §7 distinguishes the two):
        // the next read must rerun the callback rather than replaying the
        // same `Cycle` forever.
        let err_again: GraphError = c.get().unwrap_err().into();
        assert_eq!(err_again, GraphError::Cycle);
        assert_eq!(calls.get(), 2, "a cycle must not be cached as a clean error");
    }

    // --- untrack -----------------------------------------------------------

    #[test]
    fn untrack_prevents_dependency_capture() {
        init_log();
        let s = State::new(1i32);
        let calls = Rc::new(Cell::new(0u32));
        let c = {
            let s = s.clone();
            let calls = calls.clone();
            Computed::<i32>::new(move || {
                calls.set(calls.get() + 1);
                Ok(untrack(|| *s.get().unwrap()))
            })
        };
        assert_eq!(*c.get().unwrap(), 1);
        assert!(!has_sources(c.id()));

        s.set(2).unwrap();
        // `c` has no recorded source, so the write can't reach it; its
        // stale cached value is returned without rerunning the callback.
        assert_eq!(*c.get().unwrap(), 1);
        assert_eq!(calls.get(), 1);
    }

    // --- notification-phase reentrancy guard -----------------------------

    #[test]
    fn writing_from_inside_a_notify_callback_is_rejected() {
        init_log();
        let s = State::new(1i32);
        let other = State::new(0i32);
        let result: Rc<Cell<Option<GraphError>>> = Rc::new(Cell::new(None));
        let w = {
            let other = other.clone();
            let result = result.clone();
            Watcher::new(move || {
                result.set(other.set(1).err());
            })
        };
        w.watch(&[s.id()]).unwrap();
        s.set(2).unwrap();
        assert_eq!(result.take(), Some(GraphError::NotificationPhase));
    }
}
