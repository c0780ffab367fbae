//! Runtime configuration.
//!
//! Configuration is per thread, like the runtime itself. Install it with
//! [`configure`](crate::configure) before building the graph, or at any
//! point in between settle passes.

use std::fmt;
use std::rc::Rc;

use tracing::error;

use crate::error::ReactiveError;
use crate::graph::NodeId;

/// Callback receiving errors raised by effects.
pub type EffectErrorHandler = Rc<dyn Fn(NodeId, &ReactiveError)>;

/// Default upper bound on runs of one effect within one settle pass.
pub const DEFAULT_MAX_EFFECT_RERUNS: usize = 100;

/// Knobs for the reactive runtime.
///
/// ```rust
/// use cellgraph_core::RuntimeConfig;
///
/// let config = RuntimeConfig::default()
///     .with_max_effect_reruns(16)
///     .on_effect_error(|effect, err| eprintln!("{effect:?}: {err}"));
/// assert_eq!(config.max_effect_reruns(), 16);
/// ```
#[derive(Clone)]
pub struct RuntimeConfig {
    max_effect_reruns: usize,
    on_effect_error: EffectErrorHandler,
}

impl RuntimeConfig {
    /// How many times one effect may be taken off the queue within a single
    /// settle pass before it is reported as [`ReactiveError::EffectLoop`].
    /// Values below 1 are raised to 1.
    pub fn with_max_effect_reruns(mut self, max: usize) -> Self {
        self.max_effect_reruns = max.max(1);
        self
    }

    /// Route effect failures to `handler` instead of the log.
    pub fn on_effect_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(NodeId, &ReactiveError) + 'static,
    {
        self.on_effect_error = Rc::new(handler);
        self
    }

    pub fn max_effect_reruns(&self) -> usize {
        self.max_effect_reruns
    }

    pub fn effect_error_handler(&self) -> EffectErrorHandler {
        Rc::clone(&self.on_effect_error)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_effect_reruns: DEFAULT_MAX_EFFECT_RERUNS,
            on_effect_error: Rc::new(log_effect_error),
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("max_effect_reruns", &self.max_effect_reruns)
            .finish_non_exhaustive()
    }
}

fn log_effect_error(effect: NodeId, err: &ReactiveError) {
    error!(effect = ?effect, error = %err, "effect failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_effect_reruns(), DEFAULT_MAX_EFFECT_RERUNS);
    }

    #[test]
    fn rerun_limit_is_at_least_one() {
        let config = RuntimeConfig::default().with_max_effect_reruns(0);
        assert_eq!(config.max_effect_reruns(), 1);
    }

    #[test]
    fn custom_handler_is_used() {
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let config = RuntimeConfig::default().on_effect_error(move |_, _| {
            counter.set(counter.get() + 1);
        });

        let handler = config.effect_error_handler();
        handler(NodeId::default(), &ReactiveError::from("boom"));
        assert_eq!(hits.get(), 1);
    }
}
