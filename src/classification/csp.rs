// src/classification/csp.rs
//! Common Spatial Pattern filters for two-class motor imagery
//!
//! Fitting averages trace-normalized channel covariances per class and solves
//! `C0 w = λ (C0 + C1) w`. With the Cholesky factor `L` of the combined
//! covariance this becomes the ordinary symmetric problem
//! `L⁻¹ C0 L⁻ᵀ v = λ v`, and the filters are `w = L⁻ᵀ v`.
//! Eigenvalues sorted by magnitude put the most class-0-dominant filters
//! first and the most class-1-dominant last.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView2, ArrayView3, ArrayViewD, Axis, Ix2, Ix3};
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

/// CSP fitting and transformation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CspError {
    #[error("CSP model is not fitted")]
    NotFitted,

    #[error("CSP requires exactly 2 classes, got {0}")]
    ClassCount(usize),

    #[error("invalid input shape: {0}")]
    Dimension(String),

    #[error("cannot keep {requested} components from {channels} channels (must be even and non-zero)")]
    ComponentCount { requested: usize, channels: usize },

    #[error("combined class covariance is not positive definite")]
    Singular,

    #[error("degenerate variance: {0}")]
    DegenerateVariance(String),
}

/// Spatial filters `(n_components, n_channels)` learned from two classes
#[derive(Debug, Clone, PartialEq)]
pub struct CspModel {
    n_components: usize,
    filters: Option<Array2<f64>>,
    classes: Option<[usize; 2]>,
}

impl CspModel {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            filters: None,
            classes: None,
        }
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn is_fitted(&self) -> bool {
        self.filters.is_some()
    }

    /// Filter matrix, `None` before [`CspModel::fit`]
    pub fn filters(&self) -> Option<&Array2<f64>> {
        self.filters.as_ref()
    }

    /// The two labels seen during fitting, in ascending order
    pub fn classes(&self) -> Option<[usize; 2]> {
        self.classes
    }

    /// Fit from trials shaped `(n_trials, n_channels, n_samples)`.
    pub fn fit(&mut self, trials: ArrayView3<f64>, labels: &[usize]) -> Result<(), CspError> {
        let (n_trials, n_channels, n_samples) = trials.dim();
        if labels.len() != n_trials {
            return Err(CspError::Dimension(format!(
                "{} labels for {} trials",
                labels.len(),
                n_trials
            )));
        }
        if n_channels == 0 || n_samples == 0 {
            return Err(CspError::Dimension(format!(
                "empty trials ({n_channels} channels, {n_samples} samples)"
            )));
        }

        let mut classes: Vec<usize> = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() != 2 {
            return Err(CspError::ClassCount(classes.len()));
        }
        if self.n_components == 0 || self.n_components % 2 != 0 || self.n_components > n_channels {
            return Err(CspError::ComponentCount {
                requested: self.n_components,
                channels: n_channels,
            });
        }

        let covariances: Vec<Array2<f64>> = (0..n_trials)
            .into_par_iter()
            .map(|i| normalized_covariance(trials.index_axis(Axis(0), i)))
            .collect::<Result<_, _>>()?;

        let class_mean = |class: usize| {
            let mut sum = Array2::<f64>::zeros((n_channels, n_channels));
            let mut count = 0usize;
            for (cov, _) in covariances.iter().zip(labels).filter(|(_, l)| **l == class) {
                sum += cov;
                count += 1;
            }
            sum / count as f64
        };
        let cov0 = to_matrix(&class_mean(classes[0]));
        let cov1 = to_matrix(&class_mean(classes[1]));
        let combined = &cov0 + &cov1;

        let cholesky = combined.cholesky().ok_or(CspError::Singular)?;
        let l_inv = cholesky
            .l()
            .solve_lower_triangular(&DMatrix::identity(n_channels, n_channels))
            .ok_or(CspError::Singular)?;
        let whitened = &l_inv * &cov0 * l_inv.transpose();
        let symmetric = (&whitened + whitened.transpose()) * 0.5;

        let eigen = SymmetricEigen::new(symmetric);
        let mut order: Vec<usize> = (0..n_channels).collect();
        order.sort_by(|&a, &b| {
            eigen.eigenvalues[b]
                .abs()
                .total_cmp(&eigen.eigenvalues[a].abs())
        });
        let vectors = l_inv.transpose() * &eigen.eigenvectors;

        let m = self.n_components / 2;
        let selected: Vec<usize> = order[..m]
            .iter()
            .chain(order[n_channels - m..].iter())
            .copied()
            .collect();
        let filters = Array2::from_shape_fn((self.n_components, n_channels), |(k, ch)| {
            vectors[(ch, selected[k])]
        });

        debug!(
            trials = n_trials,
            channels = n_channels,
            components = self.n_components,
            top_eigenvalue = eigen.eigenvalues[order[0]],
            "CSP fitted"
        );
        self.filters = Some(filters);
        self.classes = Some([classes[0], classes[1]]);
        Ok(())
    }

    /// Fit from a dynamically shaped array, which must be 3-dimensional.
    pub fn fit_dyn(&mut self, trials: ArrayViewD<f64>, labels: &[usize]) -> Result<(), CspError> {
        let ndim = trials.ndim();
        let trials = trials
            .into_dimensionality::<Ix3>()
            .map_err(|_| CspError::Dimension(format!("expected 3-D trials, got {ndim}-D")))?;
        self.fit(trials, labels)
    }

    /// Log-normalized variance features `(n_trials, n_components)`.
    pub fn transform(&self, trials: ArrayView3<f64>) -> Result<Array2<f64>, CspError> {
        let filters = self.filters.as_ref().ok_or(CspError::NotFitted)?;
        let (n_trials, n_channels, _) = trials.dim();
        if n_channels != filters.ncols() {
            return Err(CspError::Dimension(format!(
                "trials have {} channels, filters expect {}",
                n_channels,
                filters.ncols()
            )));
        }

        let rows: Vec<Array1<f64>> = (0..n_trials)
            .into_par_iter()
            .map(|i| log_variance(filters, trials.index_axis(Axis(0), i)))
            .collect::<Result<_, _>>()?;

        let mut features = Array2::zeros((n_trials, self.n_components));
        for (mut row, values) in features.outer_iter_mut().zip(rows) {
            row.assign(&values);
        }
        Ok(features)
    }

    /// Features of a single `(n_channels, n_samples)` trial, as a one-row batch
    pub fn transform_trial(&self, trial: ArrayView2<f64>) -> Result<Array2<f64>, CspError> {
        self.transform(trial.insert_axis(Axis(0)))
    }

    /// Transform a 2-D (single trial) or 3-D (batch) array
    pub fn transform_dyn(&self, data: ArrayViewD<f64>) -> Result<Array2<f64>, CspError> {
        match data.ndim() {
            2 => {
                let trial = data
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| CspError::Dimension(e.to_string()))?;
                self.transform_trial(trial)
            }
            3 => {
                let trials = data
                    .into_dimensionality::<Ix3>()
                    .map_err(|e| CspError::Dimension(e.to_string()))?;
                self.transform(trials)
            }
            n => Err(CspError::Dimension(format!("expected 2-D or 3-D input, got {n}-D"))),
        }
    }
}

/// Mean-removed channel covariance scaled to unit trace
fn normalized_covariance(trial: ArrayView2<f64>) -> Result<Array2<f64>, CspError> {
    let means = trial.mean_axis(Axis(1)).ok_or_else(|| CspError::Dimension("empty trial".into()))?;
    let centered = &trial - &means.insert_axis(Axis(1));
    let cov = centered.dot(&centered.t());
    let trace = cov.diag().sum();
    if !(trace.is_finite() && trace > 0.0) {
        return Err(CspError::DegenerateVariance(format!("trial covariance trace {trace}")));
    }
    Ok(cov / trace)
}

fn log_variance(filters: &Array2<f64>, trial: ArrayView2<f64>) -> Result<Array1<f64>, CspError> {
    let projected = filters.dot(&trial);
    let variances = projected.var_axis(Axis(1), 0.0);
    let total = variances.sum();
    let features = variances.mapv(|v| (v / total).ln());
    if features.iter().all(|f| f.is_finite()) {
        Ok(features)
    } else {
        Err(CspError::DegenerateVariance("zero-variance component".into()))
    }
}

fn to_matrix(array: &Array2<f64>) -> DMatrix<f64> {
    let (rows, cols) = array.dim();
    DMatrix::from_fn(rows, cols, |i, j| array[[i, j]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    /// Class 0 is loud on channel 0, class 1 on the last channel
    fn two_class_trials(per_class: usize, channels: usize, samples: usize) -> (Array3<f64>, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(42);
        let n = 2 * per_class;
        let mut labels = Vec::with_capacity(n);
        let trials = Array3::from_shape_fn((n, channels, samples), |(t, ch, _)| {
            let class = usize::from(t >= per_class);
            let gain = match (class, ch) {
                (0, 0) => 4.0,
                (1, c) if c == channels - 1 => 4.0,
                _ => 1.0,
            };
            let noise: f64 = rng.sample(StandardNormal);
            gain * noise
        });
        for t in 0..n {
            labels.push(usize::from(t >= per_class));
        }
        (trials, labels)
    }

    #[test]
    fn test_filter_shape_and_feature_length() {
        let (trials, labels) = two_class_trials(10, 6, 200);
        let mut csp = CspModel::new(4);
        csp.fit(trials.view(), &labels).unwrap();
        assert_eq!(csp.filters().unwrap().dim(), (4, 6));
        assert_eq!(csp.classes(), Some([0, 1]));

        let features = csp.transform(trials.view()).unwrap();
        assert_eq!(features.dim(), (20, 4));

        let single = csp.transform_trial(trials.index_axis(Axis(0), 3)).unwrap();
        assert_eq!(single.dim(), (1, 4));
        for (a, b) in single.row(0).iter().zip(features.row(3).iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_features_are_log_proportions() {
        let (trials, labels) = two_class_trials(8, 4, 150);
        let mut csp = CspModel::new(2);
        csp.fit(trials.view(), &labels).unwrap();
        let features = csp.transform(trials.view()).unwrap();
        for row in features.outer_iter() {
            let total: f64 = row.iter().map(|f| f.exp()).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_first_filter_favours_class_zero() {
        let (trials, labels) = two_class_trials(15, 5, 250);
        let mut csp = CspModel::new(2);
        csp.fit(trials.view(), &labels).unwrap();
        let features = csp.transform(trials.view()).unwrap();
        // component 0 carries a larger share of variance for class 0 trials
        let mean = |class: usize| {
            let rows: Vec<f64> = features
                .outer_iter()
                .zip(&labels)
                .filter(|(_, l)| **l == class)
                .map(|(row, _)| row[0] - row[1])
                .collect();
            rows.iter().sum::<f64>() / rows.len() as f64
        };
        assert!(mean(0) > mean(1));
    }

    #[test]
    fn test_wrong_class_count_is_refused() {
        let (trials, _) = two_class_trials(4, 4, 50);
        let mut csp = CspModel::new(2);
        assert_eq!(csp.fit(trials.view(), &[0; 8]), Err(CspError::ClassCount(1)));
        assert_eq!(
            csp.fit(trials.view(), &[0, 1, 2, 0, 1, 2, 0, 1]),
            Err(CspError::ClassCount(3))
        );
        assert!(!csp.is_fitted());
    }

    #[test]
    fn test_non_3d_input_is_refused() {
        let flat = Array2::<f64>::zeros((4, 10)).into_dyn();
        let mut csp = CspModel::new(2);
        assert!(matches!(
            csp.fit_dyn(flat.view(), &[0, 1, 0, 1]),
            Err(CspError::Dimension(_))
        ));
    }

    #[test]
    fn test_transform_before_fit_fails() {
        let csp = CspModel::new(2);
        let trial = Array2::<f64>::zeros((4, 10));
        assert_eq!(csp.transform_trial(trial.view()), Err(CspError::NotFitted));
    }

    #[test]
    fn test_transform_dyn_accepts_2d_and_3d() {
        let (trials, labels) = two_class_trials(5, 4, 100);
        let mut csp = CspModel::new(2);
        csp.fit(trials.view(), &labels).unwrap();
        assert_eq!(csp.transform_dyn(trials.view().into_dyn()).unwrap().dim(), (10, 2));
        let trial = trials.index_axis(Axis(0), 0).to_owned().into_dyn();
        assert_eq!(csp.transform_dyn(trial.view()).unwrap().dim(), (1, 2));
    }

    #[test]
    fn test_component_count_validated() {
        let (trials, labels) = two_class_trials(4, 4, 50);
        let mut odd = CspModel::new(3);
        assert!(matches!(odd.fit(trials.view(), &labels), Err(CspError::ComponentCount { .. })));
        let mut too_many = CspModel::new(6);
        assert!(matches!(too_many.fit(trials.view(), &labels), Err(CspError::ComponentCount { .. })));
    }

    #[test]
    fn test_channel_mismatch_on_transform() {
        let (trials, labels) = two_class_trials(4, 4, 50);
        let mut csp = CspModel::new(2);
        csp.fit(trials.view(), &labels).unwrap();
        let wrong = Array2::<f64>::ones((5, 50));
        assert!(matches!(csp.transform_trial(wrong.view()), Err(CspError::Dimension(_))));
    }
}
