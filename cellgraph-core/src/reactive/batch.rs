//! Batching and untracked scopes.

use super::context::ReactiveContext;
use super::runtime::Runtime;

/// Closes the batch even if the body panics.
struct BatchGuard;

impl BatchGuard {
    fn open() -> Self {
        Runtime::with(Runtime::open_batch);
        Self
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        Runtime::close_batch();
    }
}

/// Run `f` with effect execution deferred.
///
/// Writes inside the batch mark the graph immediately, so derived reads
/// inside `f` already see the new values. Pending effects run once, with
/// the final values, when the outermost batch returns.
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use cellgraph_core::{batch, Cell, Effect};
///
/// let a = Cell::new(0);
/// let log = Rc::new(RefCell::new(Vec::new()));
/// let (reader, sink) = (a.clone(), log.clone());
/// let _effect = Effect::new(move || {
///     sink.borrow_mut().push(reader.read());
///     Ok(None)
/// });
///
/// batch(|| {
///     a.write(1).unwrap();
///     a.write(2).unwrap();
/// });
/// assert_eq!(*log.borrow(), vec![0, 2]);
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let guard = BatchGuard::open();
    let out = f();
    drop(guard);

    Runtime::with(Runtime::flush);
    out
}

/// Run `f` without recording any reads against the running computation.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let context = ReactiveContext::untracked();
    let out = f();
    drop(context);

    Runtime::with(Runtime::flush);
    out
}

/// Whether a batch is currently open on this thread.
pub fn is_batching() -> bool {
    Runtime::with(Runtime::is_batching)
}
