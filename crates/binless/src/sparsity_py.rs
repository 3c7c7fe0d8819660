// =============================================================================
// Grid and Penalty Selection Bindings
// =============================================================================
//
// Lower-level entry points used when the host drives the fused lasso itself:
// the trail decomposition, patch detection, and the two penalty searches.
// Per-cell vectors are in linear grid order.
//
// =============================================================================

use ndarray::Array1;
use numpy::{IntoPyArray, PyReadonlyArray1};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use binless_core::sparsity::{
    optimize_lambda1, optimize_lambda1_ecprime, BinnedSignal, PatchGrouper, PenaltySelection, SearchPath,
    SparsityConfig,
};
use binless_core::TrailSet;

use crate::to_py_err;

pub(crate) fn selection_to_py<'py>(py: Python<'py>, sel: &PenaltySelection) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("lambda1", sel.lambda1)?;
    dict.set_item("eCprime", sel.ecprime)?;
    dict.set_item("BIC", sel.bic)?;
    dict.set_item("dof", sel.dof)?;
    dict.set_item("feasible", sel.dof.is_some())?;
    let (path, iterations, converged) = match sel.path {
        SearchPath::SinglePatch => ("single_patch", None, None),
        SearchPath::CollapsedInterval => ("collapsed_interval", None, None),
        SearchPath::Brent { iterations, converged } => ("brent", Some(iterations), Some(converged)),
    };
    dict.set_item("path", path)?;
    dict.set_item("brent_iterations", iterations)?;
    dict.set_item("brent_converged", converged)?;
    Ok(dict)
}

fn binned_from_py(
    nbins: usize,
    beta: PyReadonlyArray1<f64>,
    phihat: PyReadonlyArray1<f64>,
    weight: PyReadonlyArray1<f64>,
    ncounts: PyReadonlyArray1<f64>,
) -> PyResult<BinnedSignal> {
    BinnedSignal::new(
        nbins,
        beta.as_array().to_owned(),
        phihat.as_array().to_owned(),
        weight.as_array().to_owned(),
        ncounts.as_array().to_owned(),
    )
    .map_err(to_py_err)
}

/// Row and column trails of a triangle grid with `nrows` bins.
///
/// Returns a dict with the flattened `trails`, the end offset of each trail
/// in `breakpoints`, and `ntrails`.
#[pyfunction]
pub fn triangle_grid_trails<'py>(py: Python<'py>, nrows: usize) -> PyResult<Bound<'py, PyDict>> {
    let trails = TrailSet::triangle_grid(nrows);
    let dict = PyDict::new_bound(py);
    dict.set_item("ntrails", trails.ntrails())?;
    dict.set_item("trails", trails.flat().to_vec())?;
    dict.set_item("breakpoints", trails.breakpoints().to_vec())?;
    Ok(dict)
}

/// Patches of tolerance-equal adjacent cells.
#[pyfunction]
pub fn patch_components<'py>(
    py: Python<'py>,
    nbins: usize,
    beta: PyReadonlyArray1<f64>,
    tol_val: f64,
) -> PyResult<Bound<'py, PyDict>> {
    let beta: Array1<f64> = beta.as_array().to_owned();
    let patches = PatchGrouper::new(nbins, tol_val).group(&beta).map_err(to_py_err)?;
    let dict = PyDict::new_bound(py);
    dict.set_item("no", patches.npatches)?;
    dict.set_item("membership", patches.membership.clone())?;
    dict.set_item("values", Array1::from(patches.sorted_values()).into_pyarray_bound(py))?;
    Ok(dict)
}

/// Sparsity penalty for a signal map, offset held at zero.
#[pyfunction]
#[pyo3(name = "optimize_lambda1", signature = (beta, phihat, weight, ncounts, nbins, tol_val, positive=true, constrained=true, lambda1_min=0.0, refine_num=20))]
#[allow(clippy::too_many_arguments)]
pub fn optimize_lambda1_py<'py>(
    py: Python<'py>,
    beta: PyReadonlyArray1<f64>,
    phihat: PyReadonlyArray1<f64>,
    weight: PyReadonlyArray1<f64>,
    ncounts: PyReadonlyArray1<f64>,
    nbins: usize,
    tol_val: f64,
    positive: bool,
    constrained: bool,
    lambda1_min: f64,
    refine_num: usize,
) -> PyResult<Bound<'py, PyDict>> {
    let binned = binned_from_py(nbins, beta, phihat, weight, ncounts)?;
    let config = SparsityConfig {
        lambda1_min,
        refine_num,
        ..SparsityConfig::from_flags(tol_val, positive, constrained)
    };
    let sel = optimize_lambda1(&binned, &config).map_err(to_py_err)?;
    selection_to_py(py, &sel)
}

/// Sparsity penalty and offset for a difference map.
#[pyfunction]
#[pyo3(name = "optimize_lambda1_ecprime", signature = (beta, phihat, weight, ncounts, nbins, tol_val, constrained=true, lambda1_min=0.0, percent_closest=10.0))]
#[allow(clippy::too_many_arguments)]
pub fn optimize_lambda1_ecprime_py<'py>(
    py: Python<'py>,
    beta: PyReadonlyArray1<f64>,
    phihat: PyReadonlyArray1<f64>,
    weight: PyReadonlyArray1<f64>,
    ncounts: PyReadonlyArray1<f64>,
    nbins: usize,
    tol_val: f64,
    constrained: bool,
    lambda1_min: f64,
    percent_closest: f64,
) -> PyResult<Bound<'py, PyDict>> {
    let binned = binned_from_py(nbins, beta, phihat, weight, ncounts)?;
    let config = SparsityConfig {
        lambda1_min,
        percent_closest,
        ..SparsityConfig::from_flags(tol_val, false, constrained)
    };
    let sel = optimize_lambda1_ecprime(&binned, &config).map_err(to_py_err)?;
    selection_to_py(py, &sel)
}
