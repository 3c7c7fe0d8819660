// =============================================================================
// Working Residuals
// =============================================================================
//
// Every component update is one IRLS step: a weighted average of working
// residuals added to the current value. Two likelihoods are available, both
// with a log link:
//
//   Poisson   r = y/μ - 1,         w = μ
//   Gaussian  r = ln y - ln μ,     w = 1      (zero counts dropped: r = w = 0)
//
// =============================================================================

use ndarray::Array1;

use crate::signal::SignalData;

/// Likelihood used to derive working residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResidualFamily {
    #[default]
    Poisson,
    /// Normal errors on the log scale.
    Gaussian,
}

impl ResidualFamily {
    pub fn name(&self) -> &'static str {
        match self {
            ResidualFamily::Poisson => "poisson",
            ResidualFamily::Gaussian => "gaussian",
        }
    }

    /// Parse a family name as given by the host.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "poisson" => Some(ResidualFamily::Poisson),
            "gaussian" | "normal" => Some(ResidualFamily::Gaussian),
            _ => None,
        }
    }

    pub fn residuals(&self, data: &SignalData) -> ResidualsPair {
        let log_expected = data.log_expected();
        match self {
            ResidualFamily::Poisson => poisson_residuals(data.observed(), &log_expected),
            ResidualFamily::Gaussian => gaussian_residuals(data.observed(), &log_expected),
        }
    }
}

/// Residuals and their IRLS weights, one entry per observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualsPair {
    pub residuals: Array1<f64>,
    pub weights: Array1<f64>,
}

pub fn poisson_residuals(observed: &Array1<f64>, log_expected: &Array1<f64>) -> ResidualsPair {
    let expected = log_expected.mapv(f64::exp);
    let residuals = observed / &expected - 1.0;
    ResidualsPair {
        residuals,
        weights: expected,
    }
}

pub fn gaussian_residuals(observed: &Array1<f64>, log_expected: &Array1<f64>) -> ResidualsPair {
    let n = observed.len();
    let mut residuals = Array1::zeros(n);
    let mut weights = Array1::zeros(n);
    for i in 0..n {
        if observed[i] > 0.0 {
            residuals[i] = observed[i].ln() - log_expected[i];
            weights[i] = 1.0;
        }
    }
    ResidualsPair { residuals, weights }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_poisson_residuals() {
        let z = poisson_residuals(&array![2.0, 0.0], &array![0.0, 2f64.ln()]);
        assert!((z.residuals[0] - 1.0).abs() < 1e-12);
        assert!((z.residuals[1] + 1.0).abs() < 1e-12);
        assert!((z.weights[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_gaussian_drops_zero_counts() {
        let z = gaussian_residuals(&array![0.0, std::f64::consts::E], &array![1.0, 0.5]);
        assert_eq!(z.residuals[0], 0.0);
        assert_eq!(z.weights[0], 0.0);
        assert!((z.residuals[1] - 0.5).abs() < 1e-12);
        assert_eq!(z.weights[1], 1.0);
    }

    #[test]
    fn test_family_names() {
        assert_eq!(ResidualFamily::from_name("Normal"), Some(ResidualFamily::Gaussian));
        assert_eq!(ResidualFamily::from_name("poisson"), Some(ResidualFamily::Poisson));
        assert_eq!(ResidualFamily::from_name("binomial"), None);
        assert_eq!(ResidualFamily::default().name(), "poisson");
    }
}
