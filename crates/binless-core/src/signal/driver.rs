// =============================================================================
// Outer Estimation Loop
// =============================================================================
//
// Each outer step updates the model components in turn:
//
//   1. biases and decay, one IRLS step each;
//   2. signal: per dataset, working estimates φ̂ = signal + residual are
//      pooled per grid cell, smoothed by the fused lasso (warm-started at the
//      current signal) and optionally sparsified with a BIC-selected λ₁;
//   3. convergence check on the change of the per-observation signal
//      weights;
//   4. identifiability: degeneracy removal, or the final zero-floor shift on
//      the last step;
//   5. exposures, one IRLS step.
//
// Datasets share biases and decay but own their signal and their fused
// lasso solver, so step 2 can run on several threads.
//
// =============================================================================

use ndarray::Array1;
use rayon::prelude::*;

use crate::constants::ADMM_CONVERGE_DIVISOR;
use crate::diagnostics::{Component, IterationObserver, IterationSnapshot, LogObserver};
use crate::error::{BinlessError, Result};
use crate::signal::components::{
    compute_exposures, compute_log_biases, compute_log_decay, poisson_lsq_log_decay, precision,
    remove_signal_degeneracy, shift_signal,
};
use crate::signal::{Observation, ResidualFamily, ResidualsPair, SignalData};
use crate::solvers::{FusedLassoConfig, GeneralizedFusedLassoEstimator, SolveStatus};
use crate::sparsity::{optimize_lambda1, BinnedSignal, PenaltySelection, SparsityConfig};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration of the outer loop.
#[derive(Debug, Clone)]
pub struct BinlessConfig {
    /// Maximum number of outer steps.
    /// Default: 20
    pub ngibbs: usize,

    /// Fused lasso smoothness penalty.
    /// Default: 1.0
    pub lam2: f64,

    /// Relative precision at which the outer loop stops.
    /// Default: 1e-2
    pub tol_val: f64,

    /// Likelihood of the working residuals.
    /// Default: Poisson
    pub family: ResidualFamily,

    /// Symmetric bound on the signal magnitude, disabled when `None`.
    pub clamp: Option<f64>,

    /// ADMM options. `with_tolerance` sets `converge` to `tol_val / 20`.
    pub admm: FusedLassoConfig,

    /// Sparsity penalty selection; plain fused lasso when `None`.
    pub sparsity: Option<SparsityConfig>,

    /// Start the decay from per-diagonal count ratios.
    /// Default: false
    pub init_decay: bool,

    /// Solve datasets on the rayon thread pool.
    /// Default: false
    pub parallel: bool,
}

impl Default for BinlessConfig {
    fn default() -> Self {
        Self::with_tolerance(1e-2)
    }
}

impl BinlessConfig {
    pub fn with_tolerance(tol_val: f64) -> Self {
        Self {
            ngibbs: 20,
            lam2: 1.0,
            tol_val,
            family: ResidualFamily::Poisson,
            clamp: None,
            admm: FusedLassoConfig::with_converge(tol_val / ADMM_CONVERGE_DIVISOR),
            sparsity: None,
            init_decay: false,
            parallel: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ngibbs == 0 {
            return Err(BinlessError::InvalidValue("ngibbs must be at least 1".to_string()));
        }
        if !(self.lam2 >= 0.0) || !self.lam2.is_finite() {
            return Err(BinlessError::InvalidValue(format!(
                "lam2 must be finite and non-negative, got {}",
                self.lam2
            )));
        }
        if !(self.tol_val > 0.0) {
            return Err(BinlessError::InvalidValue(format!(
                "tol_val must be positive, got {}",
                self.tol_val
            )));
        }
        if !(self.admm.alpha > 0.0) || !(self.admm.inflate >= 1.0) {
            return Err(BinlessError::InvalidValue(format!(
                "ADMM needs alpha > 0 and inflate >= 1, got alpha = {}, inflate = {}",
                self.admm.alpha, self.admm.inflate
            )));
        }
        if let Some(sparsity) = &self.sparsity {
            sparsity.validate()?;
        }
        Ok(())
    }
}

// =============================================================================
// Result
// =============================================================================

/// Outcome of `fit_binless`.
#[derive(Debug, Clone)]
pub struct BinlessResult {
    /// Final observation table with every model component.
    pub data: SignalData,
    pub log_biases: Array1<f64>,
    pub log_decay: Array1<f64>,
    pub exposures: Array1<f64>,
    /// One snapshot per outer step.
    pub diagnostics: Vec<IterationSnapshot>,
    /// Outer steps performed.
    pub iterations: usize,
    /// False when the step limit ended the loop.
    pub converged: bool,
    /// Inner ADMM iterations of the last step, per dataset.
    pub inner_iterations: Vec<usize>,
    /// Sparsity penalty of the last step, per dataset.
    pub selections: Vec<Option<PenaltySelection>>,
}

impl BinlessResult {
    pub fn nbins(&self) -> usize {
        self.data.nbins()
    }
}

// =============================================================================
// Per-dataset signal step
// =============================================================================

/// Working estimates of one dataset pooled per grid cell.
#[derive(Debug, Clone)]
struct CellInputs {
    phihat: Array1<f64>,
    weights: Array1<f64>,
    ncounts: Array1<f64>,
    beta_init: Array1<f64>,
}

impl CellInputs {
    fn gather(data: &SignalData, z: &ResidualsPair, members: &[usize]) -> Self {
        let ncells = data.grid().ncells();
        let mut sums = Array1::<f64>::zeros(ncells);
        let mut weights = Array1::<f64>::zeros(ncells);
        let mut ncounts = Array1::<f64>::zeros(ncells);
        let mut beta_init = Array1::<f64>::zeros(ncells);
        let log_signal = data.log_signal();
        for &i in members {
            let c = data.cell()[i];
            let w = z.weights[i];
            sums[c] += w * (log_signal[i] + z.residuals[i]);
            weights[c] += w;
            ncounts[c] += 1.0;
            beta_init[c] += log_signal[i];
        }
        let mut phihat = Array1::<f64>::zeros(ncells);
        for c in 0..ncells {
            if ncounts[c] > 0.0 {
                beta_init[c] /= ncounts[c];
            }
            phihat[c] = if weights[c] > 0.0 {
                sums[c] / weights[c]
            } else {
                beta_init[c]
            };
        }
        Self {
            phihat,
            weights,
            ncounts,
            beta_init,
        }
    }
}

#[derive(Debug, Clone)]
struct DatasetFit {
    signal: Array1<f64>,
    status: SolveStatus,
    selection: Option<PenaltySelection>,
}

fn solve_dataset(
    estimator: &mut GeneralizedFusedLassoEstimator,
    inputs: &CellInputs,
    nbins: usize,
    config: &BinlessConfig,
) -> Result<DatasetFit> {
    let status = estimator.optimize(&inputs.phihat, &inputs.beta_init, &inputs.weights, config.lam2)?;
    let (signal, selection) = match &config.sparsity {
        Some(sparsity) => {
            let binned = BinnedSignal::new(
                nbins,
                estimator.beta()?,
                inputs.phihat.clone(),
                inputs.weights.clone(),
                inputs.ncounts.clone(),
            )?;
            let selection = optimize_lambda1(&binned, sparsity)?;
            (estimator.get(selection.ecprime, selection.lambda1)?, Some(selection))
        }
        None => (estimator.get(0.0, 0.0)?, None),
    };
    Ok(DatasetFit {
        signal,
        status,
        selection,
    })
}

// =============================================================================
// Entry points
// =============================================================================

/// Fit the model, reporting progress through `log`.
pub fn fit_binless(observations: &[Observation], nbins: usize, config: &BinlessConfig) -> Result<BinlessResult> {
    fit_binless_observed(observations, nbins, config, &mut LogObserver)
}

/// Fit the model, reporting progress to `observer`.
pub fn fit_binless_observed(
    observations: &[Observation],
    nbins: usize,
    config: &BinlessConfig,
    observer: &mut dyn IterationObserver,
) -> Result<BinlessResult> {
    config.validate()?;
    let family = config.family;
    let mut data = SignalData::new(nbins, observations)?;
    let nd = data.ndatasets();
    observer.on_init(data.len(), nd);

    if config.init_decay {
        let log_decay = poisson_lsq_log_decay(&data)?;
        data.set_log_decay(log_decay);
    }
    data.set_exposures(compute_exposures(&data, family));

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); nd];
    for (i, &d) in data.dataset().iter().enumerate() {
        members[d].push(i);
    }
    let mut estimators = vec![GeneralizedFusedLassoEstimator::new(nbins, config.admm.clone(), config.clamp); nd];

    let mut diagnostics = Vec::with_capacity(config.ngibbs);
    let mut inner_iterations = vec![0; nd];
    let mut selections = vec![None; nd];
    let mut iterations = 0;
    let mut converged = false;

    for step in 1..=config.ngibbs {
        iterations = step;
        observer.on_step_start(step, config.ngibbs);

        observer.on_component(step, Component::Biases);
        data.set_log_biases(compute_log_biases(&data, family));

        observer.on_component(step, Component::Decay);
        data.set_log_decay(compute_log_decay(&data, family));

        observer.on_component(step, Component::Signal);
        let old_weights = data.signal_weights().clone();
        let z = family.residuals(&data);
        let inputs: Vec<CellInputs> = members
            .iter()
            .map(|m| CellInputs::gather(&data, &z, m))
            .collect();
        let fits: Vec<DatasetFit> = if config.parallel {
            estimators
                .par_iter_mut()
                .zip(inputs.par_iter())
                .map(|(est, inp)| solve_dataset(est, inp, nbins, config))
                .collect::<Result<Vec<_>>>()?
        } else {
            estimators
                .iter_mut()
                .zip(inputs.iter())
                .map(|(est, inp)| solve_dataset(est, inp, nbins, config))
                .collect::<Result<Vec<_>>>()?
        };

        let mut log_signal = Array1::zeros(data.len());
        let mut phihat = Array1::zeros(data.len());
        let mut weights = Array1::zeros(data.len());
        for (d, (fit, inp)) in fits.iter().zip(&inputs).enumerate() {
            for &i in &members[d] {
                let c = data.cell()[i];
                log_signal[i] = fit.signal[c];
                phihat[i] = inp.phihat[c];
                weights[i] = inp.weights[c];
            }
            observer.on_signal(step, d, &fit.status, fit.selection.as_ref());
            inner_iterations[d] = fit.status.iterations;
            selections[d] = fit.selection;
        }
        data.set_log_signal(log_signal);
        data.set_phihat(phihat);
        data.set_signal_weights(weights);

        let step_precision = precision(data.signal_weights(), &old_weights)?;
        converged = step_precision < config.tol_val;
        observer.on_convergence_check(step, step_precision, converged);

        if converged || step == config.ngibbs {
            data.set_log_signal(shift_signal(&data));
        } else {
            let (adjusted, _) = remove_signal_degeneracy(&data);
            data.set_log_signal(adjusted);
        }

        observer.on_component(step, Component::Exposures);
        data.set_exposures(compute_exposures(&data, family));

        diagnostics.push(IterationSnapshot::capture(step, step_precision, converged, &data));
        if converged {
            break;
        }
    }
    observer.on_finish(iterations, converged);

    Ok(BinlessResult {
        log_biases: data.log_biases().clone(),
        log_decay: data.log_decay().clone(),
        exposures: data.exposures().clone(),
        data,
        diagnostics,
        iterations,
        converged,
        inner_iterations,
        selections,
    })
}
