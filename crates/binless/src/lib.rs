// =============================================================================
// Binless Python Bindings
// =============================================================================
//
// This module creates the bridge between Rust and Python using PyO3.
// It wraps the pure Rust code from `binless-core` and exposes it as
// a Python extension module named `_binless`.
//
// STRUCTURE:
// ----------
// - `fitting_py`:  the outer loop, `fast_binless`
// - `sparsity_py`: trails, patches and the two penalty searches
//
// Every function takes and returns plain numpy arrays and dicts. Errors
// from the core library are raised as `ValueError`.
//
// FOR MAINTAINERS:
// ----------------
// When adding new functionality:
// 1. Implement the logic in `binless-core` first
// 2. Create a Python wrapper in the matching `*_py` module
// 3. Add it to the module in the `_binless` function at the bottom
//
// =============================================================================

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use binless_core::BinlessError;

mod fitting_py;
mod sparsity_py;

use fitting_py::fast_binless;
use sparsity_py::{optimize_lambda1_ecprime_py, optimize_lambda1_py, patch_components, triangle_grid_trails};

pub(crate) fn to_py_err(e: BinlessError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

#[pymodule]
fn _binless(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Grid and penalty selection
    m.add_function(wrap_pyfunction!(triangle_grid_trails, m)?)?;
    m.add_function(wrap_pyfunction!(patch_components, m)?)?;
    m.add_function(wrap_pyfunction!(optimize_lambda1_py, m)?)?;
    m.add_function(wrap_pyfunction!(optimize_lambda1_ecprime_py, m)?)?;

    // Full fit
    m.add_function(wrap_pyfunction!(fast_binless, m)?)?;

    Ok(())
}
