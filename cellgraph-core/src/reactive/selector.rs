//! Selectors
//!
//! A selector projects part of a source into its own derived node, so
//! consumers that only care about the projection are not disturbed by
//! unrelated changes to the source.
//!
//! - [`create_selector`] re-exposes every recomputed projection. Dependents
//!   are invalidated whenever the source changes.
//! - [`create_memoized_selector`] checks the projection with an explicit
//!   equality before exposing it, so dependents only see real changes.

use tracing::debug;

use super::derived::Derived;
use super::Source;

/// Project `source` through `f`.
///
/// The projection is recomputed lazily like any derived node, but no
/// equality check is applied to its result.
pub fn create_selector<S, T, U, F>(source: &S, f: F) -> Derived<U>
where
    S: Source<T> + Clone + 'static,
    T: 'static,
    U: Clone + 'static,
    F: Fn(&T) -> U + 'static,
{
    let source = source.clone();
    let upstream = source.node_id();
    let selector = Derived::with_comparator(move || source.read().map(|value| f(&value)), |_, _| false);
    debug!(source = ?upstream, selector = ?selector.id(), "selector created");
    selector
}

/// Project `source` through `f`, exposing a new value only when `eq`
/// says it differs from the previous one.
pub fn create_memoized_selector<S, T, U, F, E>(source: &S, f: F, eq: E) -> Derived<U>
where
    S: Source<T> + Clone + 'static,
    T: 'static,
    U: Clone + 'static,
    F: Fn(&T) -> U + 'static,
    E: Fn(&U, &U) -> bool + 'static,
{
    let source = source.clone();
    let upstream = source.node_id();
    let selector = Derived::with_comparator(move || source.read().map(|value| f(&value)), eq);
    debug!(source = ?upstream, selector = ?selector.id(), memoized = true, "selector created");
    selector
}
