// =============================================================================
// Model Component Updates
// =============================================================================
//
// Each update averages working residuals over the observations that share a
// component (a bin, a counter diagonal, a dataset), adds the average to the
// current value and re-centres where the model would otherwise be
// unidentifiable. Components with zero total weight get no update.
//
// The signal is only identified up to per-row and per-diagonal constants that
// the biases and the decay can absorb. Between iterations those constants are
// removed (`remove_signal_degeneracy`); at the end the signal is shifted so
// its smallest value in each dataset is exactly zero (`shift_signal`).
//
// =============================================================================

use ndarray::Array1;

use crate::error::{BinlessError, Result};
use crate::signal::{ResidualFamily, SignalData};
use crate::solvers::fused_lasso::relative_change;

/// Weighted average of `sums / weightsums` added to `current`, then
/// re-centred to zero weighted mean.
fn averaged_update(sums: &[f64], weightsums: &[f64], current: &Array1<f64>) -> Array1<f64> {
    let mut updated = Array1::zeros(current.len());
    let mut avg = 0.0;
    let mut wsum = 0.0;
    for i in 0..current.len() {
        let step = if weightsums[i] > 0.0 { sums[i] / weightsums[i] } else { 0.0 };
        updated[i] = current[i] + step;
        avg += updated[i] * weightsums[i];
        wsum += weightsums[i];
    }
    let avg = if wsum > 0.0 { avg / wsum } else { 0.0 };
    updated - avg
}

/// One IRLS step for the per-bin biases. An observation contributes to both
/// of its bins (once on the diagonal).
pub fn compute_log_biases(data: &SignalData, family: ResidualFamily) -> Array1<f64> {
    let z = family.residuals(data);
    let nbins = data.nbins();
    let mut sums = vec![0.0; nbins];
    let mut weightsums = vec![0.0; nbins];
    for i in 0..data.len() {
        let (b1, b2) = (data.bin1()[i], data.bin2()[i]);
        let w = z.weights[i];
        let contribution = z.residuals[i] * w;
        sums[b1] += contribution;
        weightsums[b1] += w;
        if b1 != b2 {
            sums[b2] += contribution;
            weightsums[b2] += w;
        }
    }
    averaged_update(&sums, &weightsums, data.log_biases())
}

/// One IRLS step for the per-diagonal decay.
pub fn compute_log_decay(data: &SignalData, family: ResidualFamily) -> Array1<f64> {
    let z = family.residuals(data);
    let nbins = data.nbins();
    let mut sums = vec![0.0; nbins];
    let mut weightsums = vec![0.0; nbins];
    for i in 0..data.len() {
        let d = data.diagonal(i);
        sums[d] += z.residuals[i] * z.weights[i];
        weightsums[d] += z.weights[i];
    }
    averaged_update(&sums, &weightsums, data.log_decay())
}

/// Decay from `ln(Σ observed / Σ expected)` per counter diagonal, centred
/// to zero mean.
///
/// Fails if a diagonal has no observed count at all.
pub fn poisson_lsq_log_decay(data: &SignalData) -> Result<Array1<f64>> {
    let nbins = data.nbins();
    let log_expected = data.log_expected();
    let mut sum_obs = vec![0.0; nbins];
    let mut sum_exp = vec![0.0; nbins];
    for i in 0..data.len() {
        let d = data.diagonal(i);
        sum_obs[d] += data.observed()[i];
        sum_exp[d] += log_expected[i].exp();
    }
    if let Some(diagonal) = sum_obs.iter().position(|&s| s == 0.0) {
        log::error!("counter diagonal {} has no observed counts", diagonal);
        return Err(BinlessError::ZeroCounterDiagonal { diagonal });
    }
    let current = data.log_decay();
    let log_decay = Array1::from_iter((0..nbins).map(|d| current[d] + (sum_obs[d] / sum_exp[d]).ln()));
    let avg = log_decay.mean().unwrap_or(0.0);
    Ok(log_decay - avg)
}

/// One IRLS step for the per-dataset exposures.
pub fn compute_exposures(data: &SignalData, family: ResidualFamily) -> Array1<f64> {
    let z = family.residuals(data);
    let nd = data.ndatasets();
    let mut sums = vec![0.0; nd];
    let mut weightsums = vec![0.0; nd];
    for i in 0..data.len() {
        let d = data.dataset()[i];
        sums[d] += z.residuals[i] * z.weights[i];
        weightsums[d] += z.weights[i];
    }
    let current = data.exposures();
    Array1::from_iter((0..nd).map(|d| {
        let step = if weightsums[d] > 0.0 { sums[d] / weightsums[d] } else { 0.0 };
        current[d] + step
    }))
}

/// Largest change between two weight vectors relative to the range of the
/// new one.
pub fn precision(weights: &Array1<f64>, weights_old: &Array1<f64>) -> Result<f64> {
    if weights.len() != weights_old.len() {
        return Err(BinlessError::DimensionMismatch(format!(
            "weights have {} and {} entries",
            weights.len(),
            weights_old.len()
        )));
    }
    if weights.is_empty() {
        return Err(BinlessError::EmptyInput("no weights to compare".to_string()));
    }
    Ok(relative_change(weights, weights_old))
}

/// Subtract from each signal value the largest of the minima over its two
/// rows and its counter diagonal (per dataset), floored at zero.
///
/// Returns the new signal and the largest adjustment applied.
pub fn remove_signal_degeneracy(data: &SignalData) -> (Array1<f64>, f64) {
    let log_signal = data.log_signal();
    let nbins = data.nbins();
    let nd = data.ndatasets();
    let max_signal = log_signal.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut min_per_row = vec![vec![max_signal; nd]; nbins];
    let mut min_per_diag = vec![vec![max_signal; nd]; nbins];
    for i in 0..data.len() {
        let (b1, b2, d) = (data.bin1()[i], data.bin2()[i], data.dataset()[i]);
        let s = log_signal[i];
        let diag = data.diagonal(i);
        min_per_diag[diag][d] = min_per_diag[diag][d].min(s);
        min_per_row[b1][d] = min_per_row[b1][d].min(s);
        if b1 != b2 {
            min_per_row[b2][d] = min_per_row[b2][d].min(s);
        }
    }

    let mut max_adjust = f64::NEG_INFINITY;
    let adjusted = Array1::from_iter((0..data.len()).map(|i| {
        let (b1, b2, d) = (data.bin1()[i], data.bin2()[i], data.dataset()[i]);
        let adjust = min_per_row[b1][d]
            .max(min_per_row[b2][d])
            .max(min_per_diag[data.diagonal(i)][d]);
        max_adjust = max_adjust.max(adjust);
        (log_signal[i] - adjust).max(0.0)
    }));
    log::debug!("max adjustment for constraint: {:.4e}", max_adjust);
    (adjusted, max_adjust)
}

/// Shift the signal of each dataset so its minimum is zero.
pub fn shift_signal(data: &SignalData) -> Array1<f64> {
    let log_signal = data.log_signal();
    let max_signal = log_signal.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut min_per_dataset = vec![max_signal; data.ndatasets()];
    for (i, &d) in data.dataset().iter().enumerate() {
        min_per_dataset[d] = min_per_dataset[d].min(log_signal[i]);
    }
    Array1::from_iter(
        data.dataset()
            .iter()
            .enumerate()
            .map(|(i, &d)| (log_signal[i] - min_per_dataset[d]).max(0.0)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::test_data::full_grid;
    use crate::signal::Observation;
    use ndarray::array;

    #[test]
    fn test_biases_are_zero_for_flat_data() {
        let data = SignalData::new(3, &full_grid(3, 1, 1.0)).unwrap();
        // expected = 1 everywhere, residuals vanish
        let biases = compute_log_biases(&data, ResidualFamily::Poisson);
        assert!(biases.iter().all(|b| b.abs() < 1e-12));
        let decay = compute_log_decay(&data, ResidualFamily::Poisson);
        assert!(decay.iter().all(|d| d.abs() < 1e-12));
    }

    #[test]
    fn test_biases_are_centred() {
        let obs = [
            Observation::new(0, 0, 0, 4.0),
            Observation::new(0, 1, 0, 2.0),
            Observation::new(1, 1, 0, 1.0),
        ];
        let data = SignalData::new(2, &obs).unwrap();
        let biases = compute_log_biases(&data, ResidualFamily::Poisson);
        // all expected = 1, so the weights per bin are 2 and 2
        let weighted_mean = (biases[0] * 2.0 + biases[1] * 2.0) / 4.0;
        assert!(weighted_mean.abs() < 1e-12);
        assert!(biases[0] > biases[1]);
    }

    #[test]
    fn test_zero_weights_contribute_nothing() {
        // gaussian residuals drop zero counts with weight zero
        let obs = [
            Observation::new(0, 0, 0, 0.0),
            Observation::new(0, 1, 0, 0.0),
            Observation::new(1, 1, 0, 0.0),
            Observation::new(0, 0, 1, 0.0),
        ];
        let data = SignalData::new(2, &obs).unwrap();
        let biases = compute_log_biases(&data, ResidualFamily::Gaussian);
        let decay = compute_log_decay(&data, ResidualFamily::Gaussian);
        let exposures = compute_exposures(&data, ResidualFamily::Gaussian);
        for v in biases.iter().chain(decay.iter()).chain(exposures.iter()) {
            assert_eq!(*v, 0.0);
        }
    }

    #[test]
    fn test_exposures_move_toward_counts() {
        let mut obs = full_grid(2, 1, 2.0);
        obs.extend(full_grid(2, 1, 1.0).into_iter().map(|o| Observation { dataset: 1, ..o }));
        let data = SignalData::new(2, &obs).unwrap();
        let exposures = compute_exposures(&data, ResidualFamily::Poisson);
        assert!((exposures[0] - 1.0).abs() < 1e-12);
        assert!(exposures[1].abs() < 1e-12);
    }

    #[test]
    fn test_poisson_lsq_decay() {
        let obs = [
            Observation::new(0, 0, 0, 4.0),
            Observation::new(1, 1, 0, 4.0),
            Observation::new(0, 1, 0, 1.0),
        ];
        let data = SignalData::new(2, &obs).unwrap();
        let decay = poisson_lsq_log_decay(&data).unwrap();
        // ln(8/2) and ln(1/1), centred
        let half = 4f64.ln() / 2.0;
        assert!((decay[0] - half).abs() < 1e-12);
        assert!((decay[1] + half).abs() < 1e-12);
    }

    #[test]
    fn test_poisson_lsq_decay_rejects_empty_diagonal() {
        let obs = [
            Observation::new(0, 0, 0, 4.0),
            Observation::new(0, 1, 0, 0.0),
            Observation::new(1, 1, 0, 4.0),
        ];
        let data = SignalData::new(2, &obs).unwrap();
        assert_eq!(
            poisson_lsq_log_decay(&data),
            Err(BinlessError::ZeroCounterDiagonal { diagonal: 1 })
        );
    }

    #[test]
    fn test_precision_uses_range() {
        let p = precision(&array![0.0, 2.0, 4.0], &array![0.0, 1.0, 4.0]).unwrap();
        assert!((p - 0.25).abs() < 1e-12);
        assert!(precision(&array![1.0], &array![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_degeneracy_removal_and_shift() {
        let mut data = SignalData::new(2, &full_grid(2, 1, 1.0)).unwrap();
        // cells (0,0), (0,1), (1,1)
        data.set_log_signal(array![1.0, 3.0, 2.0]);
        let (adjusted, max_adjust) = remove_signal_degeneracy(&data);
        // row minima: bin 0 -> 1, bin 1 -> 2; diagonal minima: 1 and 3
        assert_eq!(adjusted, array![0.0, 0.0, 0.0]);
        assert_eq!(max_adjust, 3.0);

        let shifted = shift_signal(&data);
        assert_eq!(shifted, array![0.0, 2.0, 1.0]);
    }
}
