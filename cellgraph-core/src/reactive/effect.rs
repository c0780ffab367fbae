//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued. It runs during the
//!    settle phase, after every derived node it reads has been brought up
//!    to date, so it never sees a half-propagated graph.
//!
//! 3. Before re-running, the previous cleanup (if any) is invoked and the
//!    old dependencies are replaced by whatever the new run reads.
//!
//! # Differences from Derived
//!
//! - Derived nodes return a value; effects return at most a cleanup.
//! - Derived nodes are lazy (compute on access); effects are eager.
//! - Derived nodes live as long as their handles; effects live until
//!   disposed.
//!
//! # Errors
//!
//! An effect body that fails does not abort the settle pass. The error goes
//! to the handler configured with
//! [`RuntimeConfig::on_effect_error`](crate::RuntimeConfig::on_effect_error).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::Result;
use crate::graph::{Body, NodeId, NodeKind};

use super::runtime::{Computation, Runtime};

/// A cleanup callback returned by an effect body.
pub type Cleanup = Box<dyn FnOnce()>;

type EffectFn = Box<dyn FnMut() -> Result<Option<Cleanup>>>;

/// Wrap a closure as an effect's cleanup.
///
/// ```rust
/// use cellgraph_core::{cleanup, Cell, Effect};
///
/// let cell = Cell::new(1);
/// let reader = cell.clone();
/// let effect = Effect::new(move || {
///     let value = reader.read();
///     Ok(cleanup(move || println!("leaving {value}")))
/// });
/// effect.dispose();
/// ```
pub fn cleanup<F>(f: F) -> Option<Cleanup>
where
    F: FnOnce() + 'static,
{
    Some(Box::new(f))
}

struct EffectInner {
    body: RefCell<EffectFn>,
    cleanup: RefCell<Option<Cleanup>>,
    disposed: Cell<bool>,
    run_count: Cell<usize>,
}

impl EffectInner {
    fn take_cleanup(&self) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

impl Computation for EffectInner {
    fn run(&self) -> Result<bool> {
        self.take_cleanup();

        let outcome = {
            let mut body = self.body.borrow_mut();
            (*body)()
        };
        self.run_count.set(self.run_count.get() + 1);

        let cleanup = outcome?;
        if self.disposed.get() {
            // Disposed from inside its own body.
            if let Some(cleanup) = cleanup {
                cleanup();
            }
        } else {
            *self.cleanup.borrow_mut() = cleanup;
        }
        Ok(false)
    }

    fn dispose(&self) {
        self.disposed.set(true);
        self.take_cleanup();
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// Cloning the handle does not clone the effect; all clones dispose the
/// same one. Dropping handles does not dispose it.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use cellgraph_core::{Cell, Effect};
///
/// let count = Cell::new(0);
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let (reader, sink) = (count.clone(), log.clone());
/// let effect = Effect::new(move || {
///     sink.borrow_mut().push(reader.read());
///     Ok(None)
/// });
///
/// count.write(5).unwrap();
/// assert_eq!(*log.borrow(), vec![0, 5]);
/// effect.dispose();
/// ```
#[derive(Clone)]
pub struct Effect {
    id: NodeId,
    inner: Rc<EffectInner>,
}

/// Create an effect; see [`Effect::new`].
pub fn create_effect<F>(f: F) -> Effect
where
    F: FnMut() -> Result<Option<Cleanup>> + 'static,
{
    Effect::new(f)
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    /// It may return a cleanup, which is called before the next run and on
    /// disposal.
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut() -> Result<Option<Cleanup>> + 'static,
    {
        let inner = Rc::new(EffectInner {
            body: RefCell::new(Box::new(f)),
            cleanup: RefCell::new(None),
            disposed: Cell::new(false),
            run_count: Cell::new(0),
        });

        Runtime::with(|rt| {
            let body: Rc<dyn Computation> = Rc::clone(&inner) as Rc<dyn Computation>;
            let (id, ()) = rt.register(NodeKind::Effect, |_| (Body::Effect(body), ()));
            debug!(effect = ?id, "effect created");

            rt.run_new_effect(id);
            Self { id, inner }
        })
    }

    /// The effect's node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Stop the effect: run its final cleanup and unsubscribe it from
    /// everything it read. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.get() {
            return;
        }
        Runtime::with(|rt| rt.dispose_effect(self.id));
        // Covers an effect whose node was already gone.
        self.inner.dispose();
    }

    /// A closure that disposes this effect.
    pub fn disposer(&self) -> impl Fn() {
        let effect = self.clone();
        move || effect.dispose()
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Get the number of nodes read by the last run.
    pub fn dependency_count(&self) -> usize {
        Runtime::with(|rt| rt.upstream_count(self.id))
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
