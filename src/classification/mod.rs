// src/classification/mod.rs
//! Motor-imagery classification: spatial filters, classifiers, calibration
//! capture and the periodic online scheduler

pub mod calibration;
pub mod classifier;
pub mod csp;
pub mod model;
pub mod scaler;
pub mod scheduler;

pub use calibration::{CalibrationController, CalibrationEvent, CalibrationStart, TrialSets};
pub use classifier::{KNearest, LogisticRegression, ProbabilisticClassifier};
pub use csp::{CspError, CspModel};
pub use model::{PredictionResult, Preprocessor, TrainedModel, TrainingOutcome};
pub use scaler::StandardScaler;
pub use scheduler::{ClassificationPipeline, ClassificationScheduler, TrialOutcome, TrialVote};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two imagined movements. The discriminant is the training label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotorClass {
    Left = 0,
    Right = 1,
}

impl MotorClass {
    pub const ALL: [MotorClass; 2] = [MotorClass::Left, MotorClass::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            MotorClass::Left => "left",
            MotorClass::Right => "right",
        }
    }

    pub fn label(&self) -> usize {
        *self as usize
    }

    pub fn from_label(label: usize) -> Option<Self> {
        match label {
            0 => Some(MotorClass::Left),
            1 => Some(MotorClass::Right),
            _ => None,
        }
    }
}

impl fmt::Display for MotorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MotorClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(MotorClass::Left),
            "right" => Ok(MotorClass::Right),
            other => Err(format!("unknown motor class '{other}'")),
        }
    }
}
