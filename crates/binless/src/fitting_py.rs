// =============================================================================
// Binless Fitting (Python Bindings)
// =============================================================================
//
// `fast_binless` takes the observation table as parallel arrays with 1-based
// bins and datasets, runs the outer loop and returns the fitted table with
// the per-step diagnostics.
//
// =============================================================================

use numpy::{IntoPyArray, PyReadonlyArray1};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

use binless_core::sparsity::SparsityConfig;
use binless_core::{fit_binless, BinlessConfig, BinlessResult, IterationSnapshot, Observation, ResidualFamily, SignalData};

use crate::sparsity_py::selection_to_py;
use crate::to_py_err;

fn host_index(value: i64, what: &str) -> PyResult<usize> {
    usize::try_from(value).map_err(|_| PyValueError::new_err(format!("{} must be positive, got {}", what, value)))
}

fn observations_from_py(
    bin1: PyReadonlyArray1<i64>,
    bin2: PyReadonlyArray1<i64>,
    dataset: PyReadonlyArray1<i64>,
    observed: PyReadonlyArray1<f64>,
) -> PyResult<Vec<Observation>> {
    let (bin1, bin2, dataset, observed) = (bin1.as_array(), bin2.as_array(), dataset.as_array(), observed.as_array());
    let n = observed.len();
    if bin1.len() != n || bin2.len() != n || dataset.len() != n {
        return Err(PyValueError::new_err(format!(
            "bin1, bin2, dataset and observed must have the same length, got {}, {}, {} and {}",
            bin1.len(),
            bin2.len(),
            dataset.len(),
            n
        )));
    }
    (0..n)
        .map(|i| {
            Observation::from_host(
                host_index(bin1[i], "bin1")?,
                host_index(bin2[i], "bin2")?,
                host_index(dataset[i], "dataset")?,
                observed[i],
            )
            .map_err(to_py_err)
        })
        .collect()
}

/// Observation table as a dict of columns, bins and datasets 1-based.
fn table_to_py<'py>(py: Python<'py>, data: &SignalData) -> PyResult<Bound<'py, PyDict>> {
    let one_based = |v: &[usize]| v.iter().map(|&x| x as i64 + 1).collect::<Vec<i64>>();
    let dict = PyDict::new_bound(py);
    dict.set_item("bin1", one_based(data.bin1()).into_pyarray_bound(py))?;
    dict.set_item("bin2", one_based(data.bin2()).into_pyarray_bound(py))?;
    dict.set_item("dataset", one_based(data.dataset()).into_pyarray_bound(py))?;
    dict.set_item("observed", data.observed().clone().into_pyarray_bound(py))?;
    dict.set_item("log_expected", data.log_expected().into_pyarray_bound(py))?;
    dict.set_item("log_signal", data.log_signal().clone().into_pyarray_bound(py))?;
    dict.set_item("phihat", data.phihat().clone().into_pyarray_bound(py))?;
    dict.set_item("weight", data.signal_weights().clone().into_pyarray_bound(py))?;
    Ok(dict)
}

fn snapshot_to_py<'py>(py: Python<'py>, snap: &IterationSnapshot) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("step", snap.step)?;
    dict.set_item("precision", snap.precision)?;
    dict.set_item("converged", snap.converged)?;
    dict.set_item("deviance", snap.deviance)?;
    dict.set_item("mat", table_to_py(py, &snap.table)?)?;
    Ok(dict)
}

fn result_to_py<'py>(py: Python<'py>, result: BinlessResult, family: ResidualFamily) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("nbins", result.nbins())?;
    dict.set_item("family", family.name())?;
    dict.set_item("mat", table_to_py(py, &result.data)?)?;
    dict.set_item("log_biases", result.log_biases.into_pyarray_bound(py))?;
    dict.set_item("log_decay", result.log_decay.into_pyarray_bound(py))?;
    dict.set_item("exposures", result.exposures.into_pyarray_bound(py))?;
    dict.set_item("iterations", result.iterations)?;
    dict.set_item("converged", result.converged)?;
    dict.set_item("inner_iterations", result.inner_iterations)?;

    let diagnostics = PyList::empty_bound(py);
    for snap in &result.diagnostics {
        diagnostics.append(snapshot_to_py(py, snap)?)?;
    }
    dict.set_item("diagnostics", diagnostics)?;

    let selections = PyList::empty_bound(py);
    for sel in &result.selections {
        match sel {
            Some(sel) => selections.append(selection_to_py(py, sel)?)?,
            None => selections.append(py.None())?,
        }
    }
    dict.set_item("selections", selections)?;
    Ok(dict)
}

/// Fit biases, decay, exposures and the fused lasso signal.
///
/// With `sparsity=True` the sparsity penalty of each dataset is selected by
/// BIC at every step, using `positive`, `constrained`, `lambda1_min` and
/// `refine_num`. The GIL is released while fitting.
#[pyfunction]
#[pyo3(signature = (
    bin1, bin2, dataset, observed, nbins,
    ngibbs=20, lam2=1.0, tol_val=1e-2, family="poisson", clamp=None,
    init_decay=false, parallel=false,
    sparsity=false, positive=true, constrained=true, lambda1_min=0.0, refine_num=20
))]
#[allow(clippy::too_many_arguments)]
pub fn fast_binless<'py>(
    py: Python<'py>,
    bin1: PyReadonlyArray1<i64>,
    bin2: PyReadonlyArray1<i64>,
    dataset: PyReadonlyArray1<i64>,
    observed: PyReadonlyArray1<f64>,
    nbins: usize,
    ngibbs: usize,
    lam2: f64,
    tol_val: f64,
    family: &str,
    clamp: Option<f64>,
    init_decay: bool,
    parallel: bool,
    sparsity: bool,
    positive: bool,
    constrained: bool,
    lambda1_min: f64,
    refine_num: usize,
) -> PyResult<Bound<'py, PyDict>> {
    let family = ResidualFamily::from_name(family)
        .ok_or_else(|| PyValueError::new_err(format!("Unknown family '{}'. Use 'poisson' or 'gaussian'.", family)))?;
    let observations = observations_from_py(bin1, bin2, dataset, observed)?;

    let config = BinlessConfig {
        ngibbs,
        lam2,
        family,
        clamp,
        init_decay,
        parallel,
        sparsity: sparsity.then(|| SparsityConfig {
            lambda1_min,
            refine_num,
            ..SparsityConfig::from_flags(tol_val, positive, constrained)
        }),
        ..BinlessConfig::with_tolerance(tol_val)
    };

    let result = py
        .allow_threads(|| fit_binless(&observations, nbins, &config))
        .map_err(to_py_err)?;
    result_to_py(py, result, config.family)
}
