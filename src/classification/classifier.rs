// src/classification/classifier.rs
//! Binary probabilistic classifiers over scaled CSP features
//!
//! Labels are `0`/`1` and probabilities come back as `(n_samples, 2)` rows
//! that sum to one. Fitting and neighbour search are delegated to `linfa`.

use std::fmt;

use linfa::prelude::*;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression as LogisticParams};
use linfa_nn::distance::L2Dist;
use linfa_nn::{CommonNearestNeighbour, NearestNeighbour};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use tracing::debug;

use crate::config::constants::classification::{
    LOGISTIC_C, LOGISTIC_MAX_ITERATIONS, LOGISTIC_TOLERANCE,
};
use crate::config::ClassifierKind;
use crate::error::{BciError, BciResult};

/// Fitted binary classifier with class probability estimates
pub trait ProbabilisticClassifier: Send + Sync + fmt::Debug {
    fn predict_proba(&self, features: ArrayView2<f64>) -> BciResult<Array2<f64>>;

    fn n_features(&self) -> usize;
}

/// Fit the configured classifier family
pub fn fit_classifier(
    kind: ClassifierKind,
    knn_neighbors: usize,
    features: ArrayView2<f64>,
    labels: &[usize],
) -> BciResult<Box<dyn ProbabilisticClassifier>> {
    match kind {
        ClassifierKind::Logistic => Ok(Box::new(LogisticRegression::fit(features, labels, LOGISTIC_C)?)),
        ClassifierKind::Knn => Ok(Box::new(KNearest::fit(features, labels, knn_neighbors)?)),
    }
}

fn check_training_set(features: ArrayView2<f64>, labels: &[usize]) -> BciResult<()> {
    if features.nrows() != labels.len() {
        return Err(BciError::Training(format!(
            "{} feature rows for {} labels",
            features.nrows(),
            labels.len()
        )));
    }
    if labels.iter().any(|l| *l > 1) {
        return Err(BciError::Training("labels must be 0 or 1".into()));
    }
    if !labels.contains(&0) || !labels.contains(&1) {
        return Err(BciError::Training("both classes must be present".into()));
    }
    Ok(())
}

fn check_width(expected: usize, features: ArrayView2<f64>) -> BciResult<()> {
    if features.ncols() != expected {
        return Err(BciError::Classification(format!(
            "classifier expects {expected} features, got {}",
            features.ncols()
        )));
    }
    Ok(())
}

/// Probability of class 1 per row, expanded to `[p0, p1]` rows
fn two_column(p1: ArrayView1<f64>) -> Array2<f64> {
    let mut proba = Array2::zeros((p1.len(), 2));
    for (i, p) in p1.iter().enumerate() {
        proba[[i, 0]] = 1.0 - p;
        proba[[i, 1]] = *p;
    }
    proba
}

/// L2-regularized logistic regression
///
/// The penalty weight is `1 / C`, so `C = 1` matches the usual default.
pub struct LogisticRegression {
    model: FittedLogisticRegression<f64, usize>,
    n_features: usize,
}

impl LogisticRegression {
    pub fn fit(features: ArrayView2<f64>, labels: &[usize], c: f64) -> BciResult<Self> {
        check_training_set(features, labels)?;
        if !(c > 0.0) {
            return Err(BciError::Training(format!("regularization C must be positive, got {c}")));
        }

        let dataset = Dataset::new(features.to_owned(), Array1::from(labels.to_vec()));
        let model = LogisticParams::default()
            .alpha(1.0 / c)
            .max_iterations(LOGISTIC_MAX_ITERATIONS)
            .gradient_tolerance(LOGISTIC_TOLERANCE)
            .fit(&dataset)
            .map_err(|e| BciError::Training(format!("logistic regression: {e}")))?;
        if !model.intercept().is_finite() || model.params().iter().any(|w| !w.is_finite()) {
            return Err(BciError::Training("logistic regression diverged".into()));
        }
        debug!(features = features.ncols(), "logistic regression fitted");

        Ok(Self {
            model,
            n_features: features.ncols(),
        })
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.model.params().view()
    }

    pub fn intercept(&self) -> f64 {
        self.model.intercept()
    }
}

impl fmt::Debug for LogisticRegression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogisticRegression")
            .field("weights", &self.weights())
            .field("intercept", &self.intercept())
            .finish()
    }
}

impl ProbabilisticClassifier for LogisticRegression {
    fn predict_proba(&self, features: ArrayView2<f64>) -> BciResult<Array2<f64>> {
        check_width(self.n_features, features)?;
        // probabilities refer to the larger label, class 1
        let p1 = self.model.predict_probabilities(&features);
        Ok(two_column(p1.view()))
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

/// k-nearest-neighbour vote; the probability is the share of neighbours per class
#[derive(Debug, Clone, PartialEq)]
pub struct KNearest {
    points: Array2<f64>,
    labels: Vec<usize>,
    k: usize,
}

impl KNearest {
    pub fn fit(features: ArrayView2<f64>, labels: &[usize], k: usize) -> BciResult<Self> {
        check_training_set(features, labels)?;
        if k == 0 {
            return Err(BciError::Training("k-NN needs at least one neighbour".into()));
        }
        Ok(Self {
            points: features.to_owned(),
            labels: labels.to_vec(),
            k: k.min(labels.len()),
        })
    }
}

impl ProbabilisticClassifier for KNearest {
    fn predict_proba(&self, features: ArrayView2<f64>) -> BciResult<Array2<f64>> {
        check_width(self.points.ncols(), features)?;
        // the index borrows the training points, so it lives for one call
        let index = CommonNearestNeighbour::KdTree
            .from_batch(&self.points, L2Dist)
            .map_err(|e| BciError::Classification(format!("k-NN index: {e}")))?;

        let mut p1 = Array1::zeros(features.nrows());
        for (i, query) in features.outer_iter().enumerate() {
            let neighbours = index
                .k_nearest(query, self.k)
                .map_err(|e| BciError::Classification(format!("k-NN query: {e}")))?;
            let ones = neighbours.iter().filter(|(_, idx)| self.labels[*idx] == 1).count();
            p1[i] = ones as f64 / neighbours.len().max(1) as f64;
        }
        Ok(two_column(p1.view()))
    }

    fn n_features(&self) -> usize {
        self.points.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn overlapping_set() -> (Array2<f64>, Vec<usize>) {
        let x = array![
            [-2.0, 0.1],
            [-1.5, -0.3],
            [-1.0, 0.2],
            [0.3, 0.0],
            [-0.2, 0.1],
            [1.0, -0.1],
            [1.5, 0.3],
            [2.0, -0.2]
        ];
        (x, vec![0, 0, 0, 0, 1, 1, 1, 1])
    }

    #[test]
    fn test_logistic_orders_probabilities() {
        let (x, y) = overlapping_set();
        let model = LogisticRegression::fit(x.view(), &y, 1.0).unwrap();
        assert!(model.weights()[0] > 0.0);

        let proba = model.predict_proba(array![[-3.0, 0.0], [3.0, 0.0]].view()).unwrap();
        assert!(proba[[0, 0]] > 0.8);
        assert!(proba[[1, 1]] > 0.8);
        for row in proba.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_logistic_separable_data_stays_finite() {
        let x = array![[-2.0], [-1.0], [1.0], [2.0]];
        let model = LogisticRegression::fit(x.view(), &[0, 0, 1, 1], 1.0).unwrap();
        assert!(model.intercept().is_finite());
        assert!(model.weights()[0].is_finite() && model.weights()[0] > 0.0);
        let proba = model.predict_proba(x.view()).unwrap();
        assert!(proba[[0, 1]] < 0.5 && proba[[3, 1]] > 0.5);
    }

    #[test]
    fn test_single_class_is_refused() {
        let x = array![[0.0], [1.0]];
        assert!(LogisticRegression::fit(x.view(), &[1, 1], 1.0).is_err());
        assert!(KNearest::fit(x.view(), &[0, 0], 1).is_err());
    }

    #[test]
    fn test_knn_neighbour_share() {
        let (x, y) = overlapping_set();
        let knn = KNearest::fit(x.view(), &y, 3).unwrap();
        let proba = knn.predict_proba(array![[-1.8, 0.0], [1.8, 0.0]].view()).unwrap();
        assert_eq!(proba[[0, 0]], 1.0);
        assert_eq!(proba[[1, 1]], 1.0);
    }

    #[test]
    fn test_feature_width_checked() {
        let (x, y) = overlapping_set();
        let model = fit_classifier(ClassifierKind::Logistic, 3, x.view(), &y).unwrap();
        assert_eq!(model.n_features(), 2);
        assert!(model.predict_proba(array![[1.0]].view()).is_err());
    }
}
