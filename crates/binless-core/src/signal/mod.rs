// =============================================================================
// Signal Estimation
// =============================================================================
//
// Model for the observed counts of one or more datasets on the same grid:
//
//     log E[count] = bias[bin1] + bias[bin2] + decay[bin2 - bin1]
//                    + signal[cell, dataset] + exposure[dataset]
//
// `SignalData` holds the observations and the current value of every
// component. The outer loop in `driver` updates the components one at a
// time from GLM working residuals (`residuals`, `components`).
//
// =============================================================================

pub mod components;
pub mod driver;
pub mod residuals;

pub use components::{
    compute_exposures, compute_log_biases, compute_log_decay, poisson_lsq_log_decay, precision,
    remove_signal_degeneracy, shift_signal,
};
pub use driver::{fit_binless, fit_binless_observed, BinlessConfig, BinlessResult};
pub use residuals::{ResidualFamily, ResidualsPair};

use ndarray::Array1;

use crate::error::{BinlessError, Result};
use crate::grid::TriangleGrid;

/// One observed count, bins 0-based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub bin1: usize,
    pub bin2: usize,
    pub dataset: usize,
    pub observed: f64,
}

impl Observation {
    pub fn new(bin1: usize, bin2: usize, dataset: usize, observed: f64) -> Self {
        Self {
            bin1,
            bin2,
            dataset,
            observed,
        }
    }

    /// Observation from 1-based bin and dataset numbers.
    pub fn from_host(bin1: usize, bin2: usize, dataset: usize, observed: f64) -> Result<Self> {
        if bin1 == 0 || bin2 == 0 || dataset == 0 {
            return Err(BinlessError::InvalidValue(format!(
                "bins and datasets are numbered from 1, got bin1 = {}, bin2 = {}, dataset = {}",
                bin1, bin2, dataset
            )));
        }
        Ok(Self::new(bin1 - 1, bin2 - 1, dataset - 1, observed))
    }
}

/// Observations together with the current model components.
#[derive(Debug, Clone)]
pub struct SignalData {
    grid: TriangleGrid,
    ndatasets: usize,
    bin1: Vec<usize>,
    bin2: Vec<usize>,
    dataset: Vec<usize>,
    cell: Vec<usize>,
    observed: Array1<f64>,
    log_biases: Array1<f64>,
    log_decay: Array1<f64>,
    log_signal: Array1<f64>,
    exposures: Array1<f64>,
    phihat: Array1<f64>,
    signal_weights: Array1<f64>,
}

impl SignalData {
    /// Table over a grid of `nbins` bins. All components start at zero.
    pub fn new(nbins: usize, observations: &[Observation]) -> Result<Self> {
        if observations.is_empty() {
            return Err(BinlessError::EmptyInput("no observations".to_string()));
        }
        let grid = TriangleGrid::new(nbins);
        let n = observations.len();
        let mut bin1 = Vec::with_capacity(n);
        let mut bin2 = Vec::with_capacity(n);
        let mut dataset = Vec::with_capacity(n);
        let mut cell = Vec::with_capacity(n);
        let mut observed = Array1::zeros(n);
        for (i, obs) in observations.iter().enumerate() {
            cell.push(grid.try_index(obs.bin1, obs.bin2)?);
            if !(obs.observed >= 0.0) || !obs.observed.is_finite() {
                return Err(BinlessError::InvalidValue(format!(
                    "observation {} has count {}",
                    i, obs.observed
                )));
            }
            bin1.push(obs.bin1);
            bin2.push(obs.bin2);
            dataset.push(obs.dataset);
            observed[i] = obs.observed;
        }
        let ndatasets = dataset.iter().max().map_or(0, |&d| d + 1);

        Ok(Self {
            grid,
            ndatasets,
            bin1,
            bin2,
            dataset,
            cell,
            observed,
            log_biases: Array1::zeros(nbins),
            log_decay: Array1::zeros(nbins),
            log_signal: Array1::zeros(n),
            exposures: Array1::zeros(ndatasets),
            phihat: Array1::zeros(n),
            signal_weights: Array1::zeros(n),
        })
    }

    pub fn grid(&self) -> &TriangleGrid {
        &self.grid
    }

    pub fn nbins(&self) -> usize {
        self.grid.nbins()
    }

    pub fn ndatasets(&self) -> usize {
        self.ndatasets
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn bin1(&self) -> &[usize] {
        &self.bin1
    }

    pub fn bin2(&self) -> &[usize] {
        &self.bin2
    }

    pub fn dataset(&self) -> &[usize] {
        &self.dataset
    }

    /// Grid cell of each observation.
    pub fn cell(&self) -> &[usize] {
        &self.cell
    }

    /// Counter diagonal of observation `i`.
    #[inline]
    pub fn diagonal(&self, i: usize) -> usize {
        self.bin2[i] - self.bin1[i]
    }

    pub fn observed(&self) -> &Array1<f64> {
        &self.observed
    }

    pub fn log_biases(&self) -> &Array1<f64> {
        &self.log_biases
    }

    pub fn log_decay(&self) -> &Array1<f64> {
        &self.log_decay
    }

    pub fn log_signal(&self) -> &Array1<f64> {
        &self.log_signal
    }

    pub fn exposures(&self) -> &Array1<f64> {
        &self.exposures
    }

    pub fn phihat(&self) -> &Array1<f64> {
        &self.phihat
    }

    pub fn signal_weights(&self) -> &Array1<f64> {
        &self.signal_weights
    }

    pub fn set_log_biases(&mut self, log_biases: Array1<f64>) {
        debug_assert_eq!(log_biases.len(), self.nbins());
        self.log_biases = log_biases;
    }

    pub fn set_log_decay(&mut self, log_decay: Array1<f64>) {
        debug_assert_eq!(log_decay.len(), self.nbins());
        self.log_decay = log_decay;
    }

    pub fn set_log_signal(&mut self, log_signal: Array1<f64>) {
        debug_assert_eq!(log_signal.len(), self.len());
        self.log_signal = log_signal;
    }

    pub fn set_exposures(&mut self, exposures: Array1<f64>) {
        debug_assert_eq!(exposures.len(), self.ndatasets);
        self.exposures = exposures;
    }

    pub fn set_phihat(&mut self, phihat: Array1<f64>) {
        debug_assert_eq!(phihat.len(), self.len());
        self.phihat = phihat;
    }

    pub fn set_signal_weights(&mut self, weights: Array1<f64>) {
        debug_assert_eq!(weights.len(), self.len());
        self.signal_weights = weights;
    }

    /// `log_expected` of every observation from the current components.
    pub fn log_expected(&self) -> Array1<f64> {
        Array1::from_iter((0..self.len()).map(|i| {
            self.log_biases[self.bin1[i]]
                + self.log_biases[self.bin2[i]]
                + self.log_decay[self.diagonal(i)]
                + self.log_signal[i]
                + self.exposures[self.dataset[i]]
        }))
    }
}

#[cfg(test)]
pub(crate) mod test_data {
    use super::*;

    /// Every cell of an `nbins` grid observed once per dataset with `count`.
    pub fn full_grid(nbins: usize, ndatasets: usize, count: f64) -> Vec<Observation> {
        let grid = TriangleGrid::new(nbins);
        let mut obs = Vec::new();
        for dataset in 0..ndatasets {
            for (bin1, bin2) in grid.coordinates() {
                obs.push(Observation::new(bin1, bin2, dataset, count));
            }
        }
        obs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_observations_are_one_based() {
        let obs = Observation::from_host(1, 3, 2, 5.0).unwrap();
        assert_eq!(obs, Observation::new(0, 2, 1, 5.0));
        assert!(Observation::from_host(0, 1, 1, 1.0).is_err());
    }

    #[test]
    fn test_signal_data_rejects_bad_input() {
        assert!(SignalData::new(3, &[]).is_err());
        let lower = [Observation::new(2, 1, 0, 1.0)];
        assert!(matches!(
            SignalData::new(3, &lower),
            Err(BinlessError::InvalidBin { .. })
        ));
        let negative = [Observation::new(0, 1, 0, -1.0)];
        assert!(SignalData::new(3, &negative).is_err());
    }

    #[test]
    fn test_log_expected_adds_components() {
        let obs = [Observation::new(0, 1, 0, 3.0), Observation::new(1, 2, 1, 4.0)];
        let mut data = SignalData::new(3, &obs).unwrap();
        assert_eq!(data.ndatasets(), 2);
        assert_eq!(data.cell(), &[1, 4]);
        data.set_log_biases(ndarray::array![0.1, 0.2, 0.3]);
        data.set_log_decay(ndarray::array![0.0, 1.0, 2.0]);
        data.set_log_signal(ndarray::array![0.5, 0.0]);
        data.set_exposures(ndarray::array![0.0, -1.0]);
        let le = data.log_expected();
        assert!((le[0] - (0.1 + 0.2 + 1.0 + 0.5)).abs() < 1e-12);
        assert!((le[1] - (0.2 + 0.3 + 1.0 - 1.0)).abs() < 1e-12);
    }
}
