// src/classification/model.rs
//! Trained CSP + scaler + classifier bundle and the shared preprocessing

use std::sync::Arc;

use ndarray::{s, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::calibration::TrialSets;
use super::classifier::{fit_classifier, ProbabilisticClassifier};
use super::csp::CspModel;
use super::scaler::StandardScaler;
use super::MotorClass;
use crate::config::constants::classification::MIN_TRIALS_PER_CLASS;
use crate::config::{ClassificationSettings, SystemConfig};
use crate::error::{BciError, BciResult};
use crate::processing::filters::{butter_filter, notch_filter};

/// Label and confidence emitted for one classified window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub label: MotorClass,
    /// Probability of `label`, in `[0, 1]`
    pub confidence: f64,
}

/// Notch then band-pass on the leading channels, identical for training and
/// online prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
    pub sample_rate_hz: f64,
    pub feature_channels: usize,
    pub notch_hz: f64,
    pub notch_q: f64,
    pub band_low_hz: f64,
    pub band_high_hz: f64,
    pub filter_order: usize,
}

impl Preprocessor {
    pub fn from_config(config: &SystemConfig, sample_rate_hz: f64, channel_count: usize) -> Self {
        let p = &config.processing;
        Self {
            sample_rate_hz,
            feature_channels: config.classification.feature_channels.min(channel_count).max(1),
            notch_hz: p.notch_hz,
            notch_q: p.notch_q,
            band_low_hz: p.band_low_hz,
            band_high_hz: p.band_high_hz,
            filter_order: p.filter_order,
        }
    }

    /// Filter a `(samples, channels)` window into a `(channels, samples)` trial.
    pub fn window(&self, window: ArrayView2<f32>) -> Array2<f64> {
        let used = self.feature_channels.min(window.ncols());
        let data = window.slice(s![.., ..used]).mapv(f64::from);
        self.filter(data.view()).reversed_axes()
    }

    /// Filter a `(channels, samples)` trial captured during calibration.
    pub fn trial(&self, trial: ArrayView2<f64>) -> Array2<f64> {
        let used = self.feature_channels.min(trial.nrows());
        let data = trial.slice(s![..used, ..]).t().to_owned();
        self.filter(data.view()).reversed_axes()
    }

    fn filter(&self, data: ArrayView2<f64>) -> Array2<f64> {
        let notched = notch_filter(data, self.sample_rate_hz, self.notch_hz, self.notch_q);
        butter_filter(
            notched.view(),
            self.sample_rate_hz,
            Some(self.band_low_hz),
            Some(self.band_high_hz),
            self.filter_order,
        )
    }
}

/// Result of a training request
#[derive(Debug, Clone)]
pub enum TrainingOutcome {
    Trained(Arc<TrainedModel>),
    /// Fewer than the minimum trials were captured for at least one class
    InsufficientSamples { left: usize, right: usize },
    Failed(String),
}

impl TrainingOutcome {
    pub fn is_trained(&self) -> bool {
        matches!(self, TrainingOutcome::Trained(_))
    }

    pub fn model(&self) -> Option<&Arc<TrainedModel>> {
        match self {
            TrainingOutcome::Trained(model) => Some(model),
            _ => None,
        }
    }
}

/// Spatial filters, scaler and classifier fitted together; replaced as a whole
#[derive(Debug)]
pub struct TrainedModel {
    csp: CspModel,
    scaler: StandardScaler,
    classifier: Box<dyn ProbabilisticClassifier>,
    preprocessor: Preprocessor,
    training_accuracy: f64,
}

impl TrainedModel {
    /// Train from captured trials. Unmet preconditions come back as an
    /// outcome, never as a panic.
    pub fn train(
        trials: &TrialSets,
        preprocessor: Preprocessor,
        settings: &ClassificationSettings,
    ) -> TrainingOutcome {
        let (left, right) = (trials.len(MotorClass::Left), trials.len(MotorClass::Right));
        if left < MIN_TRIALS_PER_CLASS || right < MIN_TRIALS_PER_CLASS {
            info!(left, right, "training refused: insufficient samples");
            return TrainingOutcome::InsufficientSamples { left, right };
        }

        match Self::fit(trials, preprocessor, settings) {
            Ok(model) => {
                info!(
                    left,
                    right,
                    accuracy = model.training_accuracy,
                    "motor-imagery model trained"
                );
                TrainingOutcome::Trained(Arc::new(model))
            }
            Err(e) => {
                warn!(error = %e, "model training failed");
                TrainingOutcome::Failed(e.to_string())
            }
        }
    }

    fn fit(
        trials: &TrialSets,
        preprocessor: Preprocessor,
        settings: &ClassificationSettings,
    ) -> BciResult<Self> {
        let (raw, labels) = trials.stacked()?;
        let filtered: Vec<Array2<f64>> = raw
            .outer_iter()
            .map(|trial| preprocessor.trial(trial))
            .collect();
        let views: Vec<_> = filtered.iter().map(|t| t.view()).collect();
        let x = ndarray::stack(Axis(0), &views)
            .map_err(|e| BciError::Training(format!("trial shapes differ: {e}")))?;

        let mut csp = CspModel::new(settings.n_components);
        csp.fit(x.view(), &labels)?;
        let features = csp.transform(x.view())?;
        let scaler = StandardScaler::fit(features.view())?;
        let scaled = scaler.transform(features.view())?;
        let classifier =
            fit_classifier(settings.classifier, settings.knn_neighbors, scaled.view(), &labels)?;

        let proba = classifier.predict_proba(scaled.view())?;
        let correct = proba
            .outer_iter()
            .zip(&labels)
            .filter(|(row, label)| usize::from(row[1] > row[0]) == **label)
            .count();

        Ok(Self {
            csp,
            scaler,
            classifier,
            preprocessor,
            training_accuracy: correct as f64 / labels.len() as f64,
        })
    }

    pub fn csp(&self) -> &CspModel {
        &self.csp
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Share of training trials the fitted pipeline labels correctly
    pub fn training_accuracy(&self) -> f64 {
        self.training_accuracy
    }

    /// Classify a raw `(samples, channels)` window from the ring buffer.
    pub fn predict_window(&self, window: ArrayView2<f32>) -> BciResult<PredictionResult> {
        let trial = self.preprocessor.window(window);
        self.predict_filtered(trial.view())
    }

    /// Classify a raw `(channels, samples)` trial.
    pub fn predict_trial(&self, trial: ArrayView2<f64>) -> BciResult<PredictionResult> {
        let filtered = self.preprocessor.trial(trial);
        self.predict_filtered(filtered.view())
    }

    fn predict_filtered(&self, trial: ArrayView2<f64>) -> BciResult<PredictionResult> {
        let features = self.csp.transform_trial(trial)?;
        let scaled = self.scaler.transform(features.view())?;
        let proba = self.classifier.predict_proba(scaled.view())?;
        let row = proba.row(0);
        let (label, confidence) = if row[1] > row[0] {
            (MotorClass::Right, row[1])
        } else {
            (MotorClass::Left, row[0])
        };
        if !confidence.is_finite() {
            return Err(BciError::Classification("non-finite class probability".into()));
        }
        Ok(PredictionResult { label, confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    /// Left trials are loud on channel 0, right trials on channel 3
    fn trial(rng: &mut StdRng, class: MotorClass, samples: usize) -> Array2<f64> {
        Array2::from_shape_fn((4, samples), |(ch, _)| {
            let gain = match (class, ch) {
                (MotorClass::Left, 0) | (MotorClass::Right, 3) => 5.0,
                _ => 1.0,
            };
            let noise: f64 = rng.sample(StandardNormal);
            gain * noise
        })
    }

    fn settings() -> (Preprocessor, ClassificationSettings) {
        let mut config = SystemConfig::default();
        config.classification.n_components = 2;
        // broadband noise passes the default 8-30 Hz band at 250 Hz
        let preprocessor = Preprocessor::from_config(&config, 250.0, 4);
        (preprocessor, config.classification)
    }

    #[test]
    fn test_insufficient_samples_is_an_outcome() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut sets = TrialSets::default();
        sets.push(MotorClass::Left, trial(&mut rng, MotorClass::Left, 250));
        let (pre, cls) = settings();
        match TrainedModel::train(&sets, pre, &cls) {
            TrainingOutcome::InsufficientSamples { left, right } => {
                assert_eq!((left, right), (1, 0));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_train_and_predict_variance_contrast() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut sets = TrialSets::default();
        for _ in 0..10 {
            for class in MotorClass::ALL {
                sets.push(class, trial(&mut rng, class, 250));
            }
        }
        let (pre, cls) = settings();
        let outcome = TrainedModel::train(&sets, pre, &cls);
        let model = outcome.model().expect("model should train");
        assert!(model.training_accuracy() > 0.9);

        for class in MotorClass::ALL {
            let held_out = trial(&mut rng, class, 250);
            let prediction = model.predict_trial(held_out.view()).unwrap();
            assert_eq!(prediction.label, class);
            assert!((0.5..=1.0).contains(&prediction.confidence));
        }
    }

    #[test]
    fn test_window_layout_matches_trial_layout() {
        let (pre, _) = settings();
        let window = Array2::<f32>::from_shape_fn((300, 6), |(i, c)| ((i * (c + 1)) % 17) as f32);
        let from_window = pre.window(window.view());
        assert_eq!(from_window.dim(), (4, 300));

        let as_trial = window.t().mapv(f64::from);
        let from_trial = pre.trial(as_trial.view());
        assert_eq!(from_window, from_trial);
    }
}
