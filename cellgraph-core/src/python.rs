//! Python bindings.
//!
//! Exposes `Cell`, `Derived`, `Effect`, `batch` and `untrack` from the
//! `_core` extension module. Values are arbitrary Python objects compared
//! with `==`. The graph is owned by the thread that built it, so every
//! class is `unsendable`.

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use tracing::warn;

use crate::error::ReactiveError;
use crate::reactive::{self, cleanup, Cell, Derived, Effect};

/// A Python object stored in the graph.
struct PyValue(PyObject);

impl Clone for PyValue {
    fn clone(&self) -> Self {
        Python::with_gil(|py| PyValue(self.0.clone_ref(py)))
    }
}

/// `==` on the Python side. A raising `__eq__` counts as "changed".
fn py_eq(a: &PyValue, b: &PyValue) -> bool {
    Python::with_gil(|py| a.0.bind(py).eq(&b.0).unwrap_or(false))
}

fn call(py: Python<'_>, f: &PyObject) -> Result<PyValue, ReactiveError> {
    f.call0(py).map(PyValue).map_err(ReactiveError::compute)
}

/// Python exceptions travel through the engine untouched; engine errors
/// become `RuntimeError`.
fn to_py_err(err: ReactiveError) -> PyErr {
    match err {
        ReactiveError::Compute(source) => match source.downcast::<PyErr>() {
            Ok(original) => *original,
            Err(other) => PyRuntimeError::new_err(format!("computation failed: {other}")),
        },
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

fn repr(py: Python<'_>, value: &PyObject) -> String {
    value
        .bind(py)
        .repr()
        .map(|r| r.to_string())
        .unwrap_or_else(|_| "?".to_string())
}

#[pyclass(unsendable, name = "Cell")]
pub struct CellHandle {
    inner: Cell<PyValue>,
}

#[pymethods]
impl CellHandle {
    #[new]
    fn new(value: PyObject) -> Self {
        Self {
            inner: Cell::with_comparator(PyValue(value), py_eq),
        }
    }

    /// Current value; tracked when read inside a derived node or effect.
    #[getter]
    fn value(&self) -> PyObject {
        self.inner.read().0
    }

    #[setter]
    fn set_value(&self, value: PyObject) -> PyResult<()> {
        self.inner.write(PyValue(value)).map(drop).map_err(to_py_err)
    }

    fn read(&self) -> PyObject {
        self.value()
    }

    fn read_untracked(&self) -> PyObject {
        self.inner.read_untracked().0
    }

    /// Returns whether the value changed.
    fn write(&self, value: PyObject) -> PyResult<bool> {
        self.inner.write(PyValue(value)).map_err(to_py_err)
    }

    /// Write `f(current)`.
    fn update(&self, py: Python<'_>, f: PyObject) -> PyResult<bool> {
        let current = self.inner.read_untracked();
        let next = f.call1(py, (current.0,))?;
        self.write(next)
    }

    fn derive(&self, f: PyObject) -> DerivedHandle {
        let source = self.inner.clone();
        DerivedHandle {
            inner: Derived::with_comparator(
                move || {
                    let value = source.read();
                    Python::with_gil(|py| {
                        f.call1(py, (value.0,))
                            .map(PyValue)
                            .map_err(ReactiveError::compute)
                    })
                },
                py_eq,
            ),
        }
    }

    fn dependent_count(&self) -> usize {
        self.inner.dependent_count()
    }

    fn __repr__(&self, py: Python<'_>) -> String {
        let value = self.inner.read_untracked();
        format!(
            "Cell(id={:?}, value={}, dependents={})",
            self.inner.id(),
            repr(py, &value.0),
            self.dependent_count()
        )
    }
}

#[pyclass(unsendable, name = "Derived")]
pub struct DerivedHandle {
    inner: Derived<PyValue>,
}

#[pymethods]
impl DerivedHandle {
    /// Wrap a zero-argument callable. Nothing runs until the first read.
    #[new]
    fn new(compute: PyObject) -> Self {
        Self {
            inner: Derived::with_comparator(
                move || Python::with_gil(|py| call(py, &compute)),
                py_eq,
            ),
        }
    }

    #[getter]
    fn value(&self) -> PyResult<PyObject> {
        self.read()
    }

    fn read(&self) -> PyResult<PyObject> {
        self.inner.read().map(|v| v.0).map_err(to_py_err)
    }

    fn read_untracked(&self) -> PyResult<PyObject> {
        self.inner.read_untracked().map(|v| v.0).map_err(to_py_err)
    }

    fn dispose(&self) {
        self.inner.dispose();
    }

    #[getter]
    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    #[getter]
    fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    #[getter]
    fn compute_count(&self) -> usize {
        self.inner.compute_count()
    }

    fn __repr__(&self, py: Python<'_>) -> String {
        let cached = self
            .inner
            .peek()
            .map(|v| repr(py, &v.0))
            .unwrap_or_else(|| "<uncomputed>".to_string());
        format!(
            "Derived(id={:?}, cached={}, dirty={})",
            self.inner.id(),
            cached,
            self.inner.is_dirty()
        )
    }
}

#[pyclass(unsendable, name = "Effect")]
pub struct EffectHandle {
    inner: Effect,
}

#[pymethods]
impl EffectHandle {
    /// Run `f` now and again whenever something it read changes. If `f`
    /// returns a callable, it is called before the next run and on
    /// disposal.
    #[new]
    fn new(f: PyObject) -> Self {
        let inner = Effect::new(move || {
            Python::with_gil(|py| {
                let returned = f.call0(py).map_err(ReactiveError::compute)?;
                if returned.is_none(py) {
                    return Ok(None);
                }
                Ok(cleanup(move || {
                    Python::with_gil(|py| {
                        if let Err(err) = returned.call0(py) {
                            warn!(error = %err, "effect cleanup raised");
                        }
                    })
                }))
            })
        });
        Self { inner }
    }

    fn dispose(&self) {
        self.inner.dispose();
    }

    /// Calling the effect disposes it, so it can be used as a disposer.
    fn __call__(&self) {
        self.dispose();
    }

    #[getter]
    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    #[getter]
    fn run_count(&self) -> usize {
        self.inner.run_count()
    }

    fn __repr__(&self) -> String {
        format!(
            "Effect(id={:?}, runs={}, disposed={})",
            self.inner.id(),
            self.inner.run_count(),
            self.inner.is_disposed()
        )
    }
}

/// Run `f` with effects deferred until it returns.
#[pyfunction]
fn batch(py: Python<'_>, f: PyObject) -> PyResult<PyObject> {
    reactive::batch(|| f.call0(py))
}

/// Run `f` without recording reads.
#[pyfunction]
fn untrack(py: Python<'_>, f: PyObject) -> PyResult<PyObject> {
    reactive::untrack(|| f.call0(py))
}

/// Python module definition.
///
/// This function is called by Python when importing the module.
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<CellHandle>()?;
    m.add_class::<DerivedHandle>()?;
    m.add_class::<EffectHandle>()?;
    m.add_function(wrap_pyfunction!(batch, m)?)?;
    m.add_function(wrap_pyfunction!(untrack, m)?)?;

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}
