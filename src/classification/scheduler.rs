// src/classification/scheduler.rs
//! Periodic online classification of the most recent ring-buffer window
//!
//! The scheduler thread only reads the ring buffer; the acquisition thread is
//! its sole writer. A failing or panicking tick is logged and skipped, the
//! next tick runs as usual.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::model::{PredictionResult, TrainedModel};
use super::MotorClass;
use crate::acquisition::SampleRingBuffer;
use crate::error::{BciError, BciResult};

struct StreamSlot {
    buffer: Arc<SampleRingBuffer>,
    sample_rate_hz: f64,
}

/// Window read + preprocessing + model, evaluated once per tick
pub struct ClassificationPipeline {
    window_seconds: f64,
    model: RwLock<Option<Arc<TrainedModel>>>,
    stream: RwLock<Option<StreamSlot>>,
}

impl ClassificationPipeline {
    pub fn new(window_seconds: f64) -> Self {
        Self {
            window_seconds,
            model: RwLock::new(None),
            stream: RwLock::new(None),
        }
    }

    /// Replace the model as a whole; `None` clears it.
    pub fn set_model(&self, model: Option<Arc<TrainedModel>>) {
        *self.model.write() = model;
    }

    pub fn model(&self) -> Option<Arc<TrainedModel>> {
        self.model.read().clone()
    }

    pub fn has_model(&self) -> bool {
        self.model.read().is_some()
    }

    pub fn attach(&self, buffer: Arc<SampleRingBuffer>, sample_rate_hz: f64) {
        *self.stream.write() = Some(StreamSlot {
            buffer,
            sample_rate_hz,
        });
    }

    pub fn detach(&self) {
        *self.stream.write() = None;
    }

    /// Samples per classification window at the attached stream's rate
    pub fn window_len(&self) -> Option<usize> {
        self.stream
            .read()
            .as_ref()
            .map(|s| (self.window_seconds * s.sample_rate_hz) as usize)
    }

    /// One evaluation. `Ok(None)` means nothing to do yet: no model, no
    /// stream, or not enough samples buffered.
    pub fn evaluate(&self) -> BciResult<Option<PredictionResult>> {
        let Some(model) = self.model() else {
            return Ok(None);
        };
        let window = {
            let stream = self.stream.read();
            let Some(slot) = stream.as_ref() else {
                return Ok(None);
            };
            let n = (self.window_seconds * slot.sample_rate_hz) as usize;
            if n == 0 {
                return Err(BciError::Classification("classification window is empty".into()));
            }
            match slot.buffer.get_last(n) {
                Some(window) => window,
                None => return Ok(None),
            }
        };
        model.predict_window(window.view()).map(Some)
    }

    /// [`ClassificationPipeline::evaluate`] with errors and panics absorbed
    pub fn tick(&self) -> Option<PredictionResult> {
        #[cfg(feature = "performance_monitoring")]
        let started = std::time::Instant::now();

        let result = match catch_unwind(AssertUnwindSafe(|| self.evaluate())) {
            Ok(Ok(prediction)) => prediction,
            Ok(Err(e)) => {
                debug!(error = %e, "classification tick skipped");
                None
            }
            Err(_) => {
                warn!("classification tick panicked; skipped");
                None
            }
        };

        #[cfg(feature = "performance_monitoring")]
        trace!(elapsed_us = started.elapsed().as_micros() as u64, "classification tick");

        result
    }
}

/// Worker thread calling [`ClassificationPipeline::tick`] at a fixed period
pub struct ClassificationScheduler {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ClassificationScheduler {
    pub fn spawn<F>(
        pipeline: Arc<ClassificationPipeline>,
        period: Duration,
        on_prediction: F,
    ) -> BciResult<Self>
    where
        F: Fn(PredictionResult) + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(period);

        let handle = thread::Builder::new()
            .name("mi-classifier".into())
            .spawn(move || {
                info!(period_ms = period.as_millis() as u64, "online classification started");
                loop {
                    channel::select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if let Some(prediction) = pipeline.tick() {
                                trace!(label = %prediction.label, confidence = prediction.confidence, "prediction");
                                on_prediction(prediction);
                            }
                        }
                    }
                }
                info!("online classification stopped");
            })?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop and join. A tick in progress completes first.
    pub fn stop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("classification thread panicked");
            }
        }
    }
}

impl Drop for ClassificationScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Final decision of a voting trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrialOutcome {
    pub intended: MotorClass,
    pub predicted: Option<MotorClass>,
    pub success: bool,
    pub votes: usize,
}

/// Collects predictions between `begin` and `end` of a paradigm trial
#[derive(Debug, Default)]
pub struct TrialVote {
    intended: Option<MotorClass>,
    votes: Vec<MotorClass>,
    last_prediction: Option<MotorClass>,
}

impl TrialVote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, intended: MotorClass) {
        self.intended = Some(intended);
        self.votes.clear();
    }

    pub fn is_voting(&self) -> bool {
        self.intended.is_some()
    }

    /// Every prediction is remembered; it counts as a vote only while voting.
    pub fn record(&mut self, label: MotorClass) {
        self.last_prediction = Some(label);
        if self.is_voting() {
            self.votes.push(label);
        }
    }

    /// Majority vote with left winning ties, or the last prediction when no
    /// vote was cast. `None` when no trial was started.
    pub fn end(&mut self) -> Option<TrialOutcome> {
        let intended = self.intended.take()?;
        let votes = std::mem::take(&mut self.votes);
        let predicted = if votes.is_empty() {
            self.last_prediction
        } else {
            let left = votes.iter().filter(|v| **v == MotorClass::Left).count();
            let right = votes.len() - left;
            Some(if left >= right {
                MotorClass::Left
            } else {
                MotorClass::Right
            })
        };
        Some(TrialOutcome {
            intended,
            predicted,
            success: predicted == Some(intended),
            votes: votes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_without_model_or_stream_is_quiet() {
        let pipeline = ClassificationPipeline::new(1.0);
        assert!(pipeline.tick().is_none());
        assert!(matches!(pipeline.evaluate(), Ok(None)));

        let buffer = Arc::new(SampleRingBuffer::new(100, 2).unwrap());
        pipeline.attach(buffer, 50.0);
        assert_eq!(pipeline.window_len(), Some(50));
        assert!(pipeline.tick().is_none());
    }

    #[test]
    fn test_scheduler_stops_promptly() {
        let pipeline = Arc::new(ClassificationPipeline::new(1.0));
        let mut scheduler =
            ClassificationScheduler::spawn(pipeline, Duration::from_millis(5), |_| {}).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_vote_majority_and_ties() {
        let mut vote = TrialVote::new();
        vote.begin(MotorClass::Right);
        for label in [MotorClass::Right, MotorClass::Left, MotorClass::Right] {
            vote.record(label);
        }
        let outcome = vote.end().unwrap();
        assert_eq!(outcome.predicted, Some(MotorClass::Right));
        assert!(outcome.success);
        assert_eq!(outcome.votes, 3);

        vote.begin(MotorClass::Right);
        vote.record(MotorClass::Left);
        vote.record(MotorClass::Right);
        let tie = vote.end().unwrap();
        assert_eq!(tie.predicted, Some(MotorClass::Left));
        assert!(!tie.success);
    }

    #[test]
    fn test_vote_falls_back_to_last_prediction() {
        let mut vote = TrialVote::new();
        assert!(vote.end().is_none());

        vote.begin(MotorClass::Left);
        let empty = vote.end().unwrap();
        assert_eq!(empty.predicted, None);
        assert!(!empty.success);

        vote.record(MotorClass::Left);
        vote.begin(MotorClass::Left);
        let outcome = vote.end().unwrap();
        assert_eq!(outcome.predicted, Some(MotorClass::Left));
        assert!(outcome.success);
        assert_eq!(outcome.votes, 0);
    }
}
