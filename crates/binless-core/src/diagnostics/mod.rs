// =============================================================================
// Iteration Diagnostics
// =============================================================================
//
// The outer loop reports its progress through an `IterationObserver`:
//
//   - step start and the component being updated,
//   - the fused lasso outcome of each dataset,
//   - the convergence check,
//   - the end of the fit.
//
// `LogObserver` forwards everything to the `log` facade, `NoopObserver`
// discards it. After every step the driver also stores an
// `IterationSnapshot` of the full table, returned with the fit.
//
// =============================================================================

use ndarray::Array1;

use crate::signal::SignalData;
use crate::solvers::SolveStatus;
use crate::sparsity::PenaltySelection;

/// Model components updated in each outer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Biases,
    Decay,
    Signal,
    Exposures,
}

/// Receives checkpoints from the outer loop. Every method has an empty
/// default.
pub trait IterationObserver {
    fn on_init(&mut self, _nobservations: usize, _ndatasets: usize) {}

    fn on_step_start(&mut self, _step: usize, _ngibbs: usize) {}

    fn on_component(&mut self, _step: usize, _component: Component) {}

    fn on_signal(
        &mut self,
        _step: usize,
        _dataset: usize,
        _status: &SolveStatus,
        _selection: Option<&PenaltySelection>,
    ) {
    }

    fn on_convergence_check(&mut self, _step: usize, _precision: f64, _converged: bool) {}

    fn on_finish(&mut self, _iterations: usize, _converged: bool) {}
}

/// Discards every checkpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl IterationObserver for NoopObserver {}

/// Forwards checkpoints to `log`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl IterationObserver for LogObserver {
    fn on_init(&mut self, nobservations: usize, ndatasets: usize) {
        log::info!("init: {} observations in {} datasets", nobservations, ndatasets);
    }

    fn on_step_start(&mut self, step: usize, ngibbs: usize) {
        log::info!("step {}/{}", step, ngibbs);
    }

    fn on_component(&mut self, step: usize, component: Component) {
        log::debug!("step {}: updating {:?}", step, component);
    }

    fn on_signal(
        &mut self,
        step: usize,
        dataset: usize,
        status: &SolveStatus,
        selection: Option<&PenaltySelection>,
    ) {
        if !status.converged() {
            log::warn!(
                "step {}: fused lasso for dataset {} hit the iteration cap ({} iterations, precision {:.2e}, alpha {:.3e})",
                step,
                dataset,
                status.iterations,
                status.precision,
                status.alpha
            );
        }
        match selection {
            Some(sel) => log::debug!(
                "step {}: dataset {} lambda1 = {:.4e}, dof = {:?}, {} inner iterations",
                step,
                dataset,
                sel.lambda1,
                sel.dof,
                status.iterations
            ),
            None => log::debug!(
                "step {}: dataset {} solved in {} inner iterations",
                step,
                dataset,
                status.iterations
            ),
        }
    }

    fn on_convergence_check(&mut self, step: usize, precision: f64, converged: bool) {
        log::info!(
            "step {}: reached relative precision {:.4e}{}",
            step,
            precision,
            if converged { " (converged)" } else { "" }
        );
    }

    fn on_finish(&mut self, iterations: usize, converged: bool) {
        if converged {
            log::info!("converged after {} steps", iterations);
        } else {
            log::info!("stopped at the step limit ({} steps)", iterations);
        }
    }
}

/// State of the table at the end of one outer step.
#[derive(Debug, Clone)]
pub struct IterationSnapshot {
    pub step: usize,
    pub precision: f64,
    pub converged: bool,
    /// Poisson deviance of the observations under the current model.
    pub deviance: f64,
    pub table: SignalData,
}

impl IterationSnapshot {
    pub fn capture(step: usize, precision: f64, converged: bool, data: &SignalData) -> Self {
        Self {
            step,
            precision,
            converged,
            deviance: poisson_deviance(data.observed(), &data.log_expected()),
            table: data.clone(),
        }
    }
}

/// `2 Σ [y ln(y/μ) - (y - μ)]`, with `y ln y = 0` at `y = 0`.
pub fn poisson_deviance(observed: &Array1<f64>, log_expected: &Array1<f64>) -> f64 {
    observed
        .iter()
        .zip(log_expected.iter())
        .map(|(&y, &log_mu)| {
            let mu = log_mu.exp();
            let ylogy = if y > 0.0 { y * (y.ln() - log_mu) } else { 0.0 };
            2.0 * (ylogy - (y - mu))
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[derive(Default)]
    struct Recorder {
        steps: Vec<usize>,
        finished: Option<(usize, bool)>,
    }

    impl IterationObserver for Recorder {
        fn on_step_start(&mut self, step: usize, _ngibbs: usize) {
            self.steps.push(step);
        }

        fn on_finish(&mut self, iterations: usize, converged: bool) {
            self.finished = Some((iterations, converged));
        }
    }

    #[test]
    fn test_default_methods_are_optional() {
        let mut rec = Recorder::default();
        rec.on_step_start(1, 3);
        rec.on_component(1, Component::Biases);
        rec.on_convergence_check(1, 0.5, false);
        rec.on_finish(1, false);
        assert_eq!(rec.steps, vec![1]);
        assert_eq!(rec.finished, Some((1, false)));
    }

    #[test]
    fn test_poisson_deviance_zero_at_perfect_fit() {
        let obs = array![1.0, 5.0, 0.0];
        let log_mu = array![0.0, 5f64.ln(), -50.0];
        assert!(poisson_deviance(&obs, &log_mu).abs() < 1e-12);
        assert!(poisson_deviance(&obs, &array![0.5, 0.5, 0.5]) > 0.0);
    }
}
