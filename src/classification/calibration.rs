// src/classification/calibration.rs
//! Calibration capture: slices the live sample stream into labelled trials

use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::Serialize;
use tracing::{debug, info};

use super::MotorClass;
use crate::error::{BciError, BciResult};

/// Captured training trials per class, each shaped `(channels, samples)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialSets {
    left: Vec<Array2<f64>>,
    right: Vec<Array2<f64>>,
}

impl TrialSets {
    pub fn push(&mut self, class: MotorClass, trial: Array2<f64>) {
        self.class_mut(class).push(trial);
    }

    pub fn len(&self, class: MotorClass) -> usize {
        self.class(class).len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }

    pub fn trials(&self, class: MotorClass) -> &[Array2<f64>] {
        self.class(class)
    }

    pub fn clear_class(&mut self, class: MotorClass) {
        self.class_mut(class).clear();
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    /// All trials stacked as `(n_trials, channels, samples)` with their labels,
    /// left trials first.
    pub fn stacked(&self) -> BciResult<(Array3<f64>, Vec<usize>)> {
        let views: Vec<ArrayView2<f64>> = self
            .left
            .iter()
            .chain(&self.right)
            .map(|t| t.view())
            .collect();
        if views.is_empty() {
            return Err(BciError::Training("no trials captured".into()));
        }
        let stacked = ndarray::stack(Axis(0), &views)
            .map_err(|e| BciError::Training(format!("trial shapes differ: {e}")))?;
        let labels = std::iter::repeat(MotorClass::Left.label())
            .take(self.left.len())
            .chain(std::iter::repeat(MotorClass::Right.label()).take(self.right.len()))
            .collect();
        Ok((stacked, labels))
    }

    fn class(&self, class: MotorClass) -> &Vec<Array2<f64>> {
        match class {
            MotorClass::Left => &self.left,
            MotorClass::Right => &self.right,
        }
    }

    fn class_mut(&mut self, class: MotorClass) -> &mut Vec<Array2<f64>> {
        match class {
            MotorClass::Left => &mut self.left,
            MotorClass::Right => &mut self.right,
        }
    }
}

/// Active capture for one class
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSession {
    target: MotorClass,
    needed: usize,
    collected: usize,
    samples_per_trial: usize,
    channels: usize,
    buffer: Vec<f32>,
}

impl CalibrationSession {
    pub fn new(target: MotorClass, needed: usize, samples_per_trial: usize, channels: usize) -> Self {
        Self {
            target,
            needed,
            collected: 0,
            samples_per_trial,
            channels,
            buffer: Vec::with_capacity(samples_per_trial * channels),
        }
    }

    pub fn target(&self) -> MotorClass {
        self.target
    }

    pub fn collected(&self) -> usize {
        self.collected
    }

    pub fn needed(&self) -> usize {
        self.needed
    }

    pub fn is_complete(&self) -> bool {
        self.collected >= self.needed
    }

    /// Samples held toward the next trial
    pub fn buffered(&self) -> usize {
        self.buffer.len() / self.channels.max(1)
    }

    /// Append rows of `chunk`, returning every trial completed by it.
    /// Rows after the final trial are ignored.
    fn feed(&mut self, chunk: ArrayView2<f32>) -> Vec<Array2<f64>> {
        let mut completed = Vec::new();
        for row in chunk.outer_iter() {
            if self.is_complete() {
                break;
            }
            self.buffer.extend(row.iter().take(self.channels));
            if self.buffered() >= self.samples_per_trial {
                let samples = std::mem::take(&mut self.buffer);
                let trial = Array2::from_shape_fn((self.channels, self.samples_per_trial), |(ch, i)| {
                    f64::from(samples[i * self.channels + ch])
                });
                self.buffer.reserve(self.samples_per_trial * self.channels);
                self.collected += 1;
                completed.push(trial);
            }
        }
        completed
    }
}

/// Response to a calibration start request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CalibrationStart {
    Started {
        target: MotorClass,
        samples_per_trial: usize,
    },
    /// Another class is being captured
    Busy { active: MotorClass },
    /// No acquisition session is streaming
    NotStreaming,
    /// Trial length resolves to zero samples
    InvalidWindow,
}

/// Progress notifications produced while feeding samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CalibrationEvent {
    Progress {
        target: MotorClass,
        collected: usize,
        needed: usize,
    },
    Completed {
        target: MotorClass,
        trials: usize,
    },
    Cancelled {
        target: MotorClass,
    },
}

/// Owns the trial sets and at most one active capture
#[derive(Debug, Default)]
pub struct CalibrationController {
    session: Option<CalibrationSession>,
    trials: TrialSets,
}

impl CalibrationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start capturing `needed` trials for `target`. The class's previous
    /// trials are discarded.
    pub fn begin(
        &mut self,
        target: MotorClass,
        needed: usize,
        samples_per_trial: usize,
        channels: usize,
    ) -> CalibrationStart {
        if let Some(active) = &self.session {
            return CalibrationStart::Busy {
                active: active.target(),
            };
        }
        if samples_per_trial == 0 || channels == 0 || needed == 0 {
            return CalibrationStart::InvalidWindow;
        }
        self.trials.clear_class(target);
        self.session = Some(CalibrationSession::new(target, needed, samples_per_trial, channels));
        info!(%target, needed, samples_per_trial, "calibration capture started");
        CalibrationStart::Started {
            target,
            samples_per_trial,
        }
    }

    pub fn cancel(&mut self) -> Option<CalibrationEvent> {
        self.session.take().map(|session| {
            info!(target = %session.target(), collected = session.collected(), "calibration capture cancelled");
            CalibrationEvent::Cancelled {
                target: session.target(),
            }
        })
    }

    pub fn active(&self) -> Option<&CalibrationSession> {
        self.session.as_ref()
    }

    pub fn is_capturing(&self) -> bool {
        self.session.is_some()
    }

    /// Route a chunk to the active capture, if any.
    pub fn feed(&mut self, chunk: ArrayView2<f32>) -> Vec<CalibrationEvent> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let target = session.target();
        let mut events = Vec::new();
        for trial in session.feed(chunk) {
            self.trials.push(target, trial);
            events.push(CalibrationEvent::Progress {
                target,
                collected: session.collected(),
                needed: session.needed(),
            });
        }
        if session.is_complete() {
            debug!(%target, trials = session.collected(), "calibration capture complete");
            events.push(CalibrationEvent::Completed {
                target,
                trials: session.collected(),
            });
            self.session = None;
        }
        events
    }

    pub fn trials(&self) -> &TrialSets {
        &self.trials
    }

    pub fn trials_mut(&mut self) -> &mut TrialSets {
        &mut self.trials
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rows numbered from `start`, channel `c` holding `row + c / 10`
    fn chunk(start: usize, rows: usize, channels: usize) -> Array2<f32> {
        Array2::from_shape_fn((rows, channels), |(r, c)| (start + r) as f32 + c as f32 / 10.0)
    }

    #[test]
    fn test_returns_to_idle_after_needed_trials() {
        let mut controller = CalibrationController::new();
        let start = controller.begin(MotorClass::Left, 3, 10, 2);
        assert_eq!(
            start,
            CalibrationStart::Started {
                target: MotorClass::Left,
                samples_per_trial: 10
            }
        );

        let mut written = 0;
        let mut completed = false;
        while !completed {
            let events = controller.feed(chunk(written, 7, 2).view());
            written += 7;
            completed = events
                .iter()
                .any(|e| matches!(e, CalibrationEvent::Completed { trials: 3, .. }));
        }
        assert!(!controller.is_capturing());
        assert_eq!(controller.trials().len(MotorClass::Left), 3);
        assert_eq!(controller.trials().len(MotorClass::Right), 0);
        // 30 samples needed, delivered in 7-row chunks
        assert_eq!(written, 35);
    }

    #[test]
    fn test_trials_are_contiguous_and_channel_major() {
        let mut controller = CalibrationController::new();
        controller.begin(MotorClass::Right, 2, 4, 3);
        controller.feed(chunk(0, 3, 3).view());
        controller.feed(chunk(3, 6, 3).view());

        let trials = controller.trials().trials(MotorClass::Right);
        assert_eq!(trials.len(), 2);
        assert_eq!(trials[0].dim(), (3, 4));
        assert!((trials[0][[2, 1]] - 1.2).abs() < 1e-6);
        assert!((trials[1][[0, 0]] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_second_capture_is_refused_while_active() {
        let mut controller = CalibrationController::new();
        controller.begin(MotorClass::Left, 2, 5, 1);
        assert_eq!(
            controller.begin(MotorClass::Right, 2, 5, 1),
            CalibrationStart::Busy {
                active: MotorClass::Left
            }
        );
        assert_eq!(
            controller.cancel(),
            Some(CalibrationEvent::Cancelled {
                target: MotorClass::Left
            })
        );
        assert!(matches!(
            controller.begin(MotorClass::Right, 2, 5, 1),
            CalibrationStart::Started { .. }
        ));
    }

    #[test]
    fn test_restart_discards_previous_trials_of_that_class() {
        let mut controller = CalibrationController::new();
        controller.begin(MotorClass::Left, 1, 2, 1);
        controller.feed(chunk(0, 2, 1).view());
        controller.begin(MotorClass::Right, 1, 2, 1);
        controller.feed(chunk(0, 2, 1).view());
        assert_eq!(controller.trials().len(MotorClass::Left), 1);

        controller.begin(MotorClass::Left, 1, 2, 1);
        assert_eq!(controller.trials().len(MotorClass::Left), 0);
        assert_eq!(controller.trials().len(MotorClass::Right), 1);
    }

    #[test]
    fn test_zero_length_window_rejected() {
        let mut controller = CalibrationController::new();
        assert_eq!(controller.begin(MotorClass::Left, 5, 0, 8), CalibrationStart::InvalidWindow);
        assert!(!controller.is_capturing());
    }

    #[test]
    fn test_stacked_labels() {
        let mut sets = TrialSets::default();
        sets.push(MotorClass::Right, Array2::zeros((2, 3)));
        sets.push(MotorClass::Left, Array2::ones((2, 3)));
        let (x, y) = sets.stacked().unwrap();
        assert_eq!(x.dim(), (2, 2, 3));
        assert_eq!(y, vec![0, 1]);
        assert_eq!(x[[0, 0, 0]], 1.0);
    }
}
