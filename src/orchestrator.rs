// src/orchestrator.rs
//! Composition root: owns the acquisition session, ring buffer, calibration
//! capture, online classification and the raw-sample sink
//!
//! External callers drive it through the lifecycle methods and observe it
//! through [`EventBus`] subscriptions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::acquisition::{AcquisitionHandler, AcquisitionLoop, AcquisitionState, SampleRingBuffer};
use crate::classification::{
    CalibrationController, CalibrationStart, ClassificationPipeline, ClassificationScheduler,
    MotorClass, Preprocessor, TrainedModel, TrainingOutcome, TrialOutcome, TrialSets, TrialVote,
};
use crate::config::SystemConfig;
use crate::error::{BciError, BciResult};
use crate::events::{BciEvent, EventBus};
use crate::hal::{
    BluetoothConnector, ConnectionOutcome, SampleChunk, SessionConfig, TransportFactory,
    TransportSource, UnsupportedBluetooth,
};
use crate::recorder::SampleSink;

/// Per-session receiver of acquisition output
struct SessionContext {
    session: SessionConfig,
    buffer: Arc<SampleRingBuffer>,
    sink: Arc<dyn SampleSink>,
    events: Arc<EventBus>,
    calibration: Arc<Mutex<CalibrationController>>,
    streaming: AtomicBool,
    recording: AtomicBool,
}

impl SessionContext {
    fn finish_recording(&self) {
        if self.recording.swap(false, Ordering::AcqRel) {
            self.sink.finish();
        }
    }
}

impl AcquisitionHandler for SessionContext {
    fn on_connection(&self, outcome: ConnectionOutcome) {
        if outcome.success {
            self.streaming.store(true, Ordering::Release);
            match self.sink.begin(self.session.sample_rate_hz, self.session.channel_count) {
                Ok(()) => self.recording.store(true, Ordering::Release),
                Err(e) => {
                    warn!(error = %e, "raw-sample recording unavailable");
                    self.events.status(format!("recording unavailable: {e}"));
                }
            }
        }
        self.events.publish(BciEvent::Connection(outcome));
    }

    fn on_chunk(&self, chunk: SampleChunk) {
        if let Err(e) = self.buffer.append(chunk.view()) {
            debug!(error = %e, "chunk rejected by ring buffer");
            return;
        }
        if self.recording.load(Ordering::Acquire) {
            self.sink.write(&chunk);
        }
        let calibration_events = self.calibration.lock().feed(chunk.view());
        for event in calibration_events {
            self.events.publish(BciEvent::Calibration(event));
        }
        self.events.publish(BciEvent::Samples(chunk));
    }

    /// The recording stays open until the session is stopped or replaced;
    /// closing it joins the writer thread, which must not happen here.
    fn on_runtime_error(&self, error: &BciError) {
        self.streaming.store(false, Ordering::Release);
        self.events.publish(BciEvent::RuntimeError {
            category: error.category(),
            message: error.to_string(),
        });
    }
}

struct ActiveSession {
    acquisition: AcquisitionLoop,
    context: Arc<SessionContext>,
}

/// Lifecycle owner for acquisition, calibration and online prediction
pub struct Orchestrator {
    config: SystemConfig,
    sink: Arc<dyn SampleSink>,
    connector: Arc<dyn BluetoothConnector>,
    events: Arc<EventBus>,
    calibration: Arc<Mutex<CalibrationController>>,
    votes: Arc<Mutex<TrialVote>>,
    pipeline: Arc<ClassificationPipeline>,
    session: Option<ActiveSession>,
    scheduler: Option<ClassificationScheduler>,
}

impl Orchestrator {
    pub fn new(config: SystemConfig, sink: Arc<dyn SampleSink>) -> Self {
        let pipeline = Arc::new(ClassificationPipeline::new(config.classification.window_seconds));
        Self {
            config,
            sink,
            connector: Arc::new(UnsupportedBluetooth),
            events: Arc::new(EventBus::new()),
            calibration: Arc::new(Mutex::new(CalibrationController::new())),
            votes: Arc::new(Mutex::new(TrialVote::new())),
            pipeline,
            session: None,
            scheduler: None,
        }
    }

    /// Use a platform Bluetooth implementation for Bluetooth sessions.
    pub fn with_bluetooth(mut self, connector: Arc<dyn BluetoothConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn subscribe(&self) -> Receiver<BciEvent> {
        self.events.subscribe()
    }

    /// Start the configured transport.
    pub fn start_session(&mut self) -> BciResult<()> {
        let requested = self.config.acquisition.session();
        let session = requested.effective();
        let source = TransportFactory::create(&session, &self.config.acquisition, Arc::clone(&self.connector));
        self.start_with_source(session, source)
    }

    /// Start a session on an already constructed transport. `session` must be
    /// the effective session the transport produces.
    pub fn start_with_source(
        &mut self,
        session: SessionConfig,
        source: Box<dyn TransportSource>,
    ) -> BciResult<()> {
        if let Some(active) = &self.session {
            if active.acquisition.is_active() {
                return Err(BciError::SessionActive {
                    state: active.acquisition.state().to_string(),
                });
            }
        }
        self.release_session();

        if session.sample_rate_hz <= 0.0 || session.channel_count == 0 {
            return Err(BciError::connection(
                session.transport.kind().to_string(),
                format!(
                    "invalid session format ({} Hz, {} channels)",
                    session.sample_rate_hz, session.channel_count
                ),
            ));
        }

        let buffer = Arc::new(SampleRingBuffer::new(
            self.config.buffer_capacity(session.sample_rate_hz),
            session.channel_count,
        )?);
        let context = Arc::new(SessionContext {
            session: session.clone(),
            buffer: Arc::clone(&buffer),
            sink: Arc::clone(&self.sink),
            events: Arc::clone(&self.events),
            calibration: Arc::clone(&self.calibration),
            streaming: AtomicBool::new(false),
            recording: AtomicBool::new(false),
        });

        info!(
            transport = %session.transport.kind(),
            rate = session.sample_rate_hz,
            channels = session.channel_count,
            "starting acquisition session"
        );
        let handler: Arc<dyn AcquisitionHandler> = Arc::clone(&context) as Arc<dyn AcquisitionHandler>;
        let acquisition = AcquisitionLoop::spawn(source, handler)?;
        self.pipeline.attach(buffer, session.sample_rate_hz);
        self.session = Some(ActiveSession { acquisition, context });
        Ok(())
    }

    /// Stop acquisition and online prediction. Returns `false` if the
    /// acquisition thread had to be detached after the join timeout.
    pub fn stop_session(&mut self) -> bool {
        self.stop_scheduler();
        let Some(mut active) = self.session.take() else {
            return true;
        };
        let joined = active.acquisition.stop(self.config.acquisition.stop_join_timeout());
        active.context.streaming.store(false, Ordering::Release);
        active.context.finish_recording();
        if self.calibration.lock().cancel().is_some() {
            self.events.status("calibration cancelled: session stopped");
        }
        self.pipeline.detach();
        let stats = active.acquisition.stats();
        info!(
            bytes = stats.bytes_received,
            chunks = stats.chunks_emitted,
            frames_dropped = stats.frames_dropped,
            lines_dropped = stats.lines_dropped,
            "acquisition session stopped"
        );
        self.events.status("acquisition stopped");
        joined
    }

    fn release_session(&mut self) {
        if let Some(previous) = self.session.take() {
            previous.context.finish_recording();
            self.pipeline.detach();
        }
    }

    pub fn session_state(&self) -> AcquisitionState {
        self.session
            .as_ref()
            .map_or(AcquisitionState::Idle, |s| s.acquisition.state())
    }

    /// The connection succeeded and the session has not ended
    pub fn is_streaming(&self) -> bool {
        self.session.as_ref().is_some_and(|s| {
            s.acquisition.is_active() && s.context.streaming.load(Ordering::Acquire)
        })
    }

    /// Effective parameters of the current session
    pub fn session(&self) -> Option<&SessionConfig> {
        self.session.as_ref().map(|s| &s.context.session)
    }

    /// The current session's ring buffer
    pub fn buffer(&self) -> Option<Arc<SampleRingBuffer>> {
        self.session.as_ref().map(|s| Arc::clone(&s.context.buffer))
    }

    pub fn pause(&self) {
        if let Some(active) = &self.session {
            active.acquisition.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(active) = &self.session {
            active.acquisition.resume();
        }
    }

    pub fn begin_calibration(&self, target: MotorClass) -> CalibrationStart {
        let Some(active) = self.session.as_ref().filter(|_| self.is_streaming()) else {
            return CalibrationStart::NotStreaming;
        };
        let session = &active.context.session;
        let samples_per_trial =
            (self.config.calibration.window_seconds * session.sample_rate_hz) as usize;
        let start = self.calibration.lock().begin(
            target,
            self.config.calibration.trials_per_class,
            samples_per_trial,
            session.channel_count,
        );
        if matches!(start, CalibrationStart::Started { .. }) {
            self.events.status(format!("capturing {target} trials"));
        }
        start
    }

    pub fn cancel_calibration(&self) -> bool {
        match self.calibration.lock().cancel() {
            Some(event) => {
                self.events.publish(BciEvent::Calibration(event));
                true
            }
            None => false,
        }
    }

    /// Trials captured so far
    pub fn trial_sets(&self) -> TrialSets {
        self.calibration.lock().trials().clone()
    }

    /// Train on the captured trials. A trained model replaces the previous one.
    pub fn train(&self) -> TrainingOutcome {
        let trials = self.trial_sets();
        self.train_with(&trials)
    }

    /// Train on caller-supplied trials.
    pub fn train_with(&self, trials: &TrialSets) -> TrainingOutcome {
        let (rate, channels) = match self.session() {
            Some(s) => (s.sample_rate_hz, s.channel_count),
            None => {
                let s = self.config.acquisition.session().effective();
                (s.sample_rate_hz, s.channel_count)
            }
        };
        let preprocessor = Preprocessor::from_config(&self.config, rate, channels);
        let outcome = TrainedModel::train(trials, preprocessor, &self.config.classification);
        match &outcome {
            TrainingOutcome::Trained(model) => {
                self.pipeline.set_model(Some(Arc::clone(model)));
                self.events.status(format!(
                    "model trained (training accuracy {:.0}%)",
                    model.training_accuracy() * 100.0
                ));
            }
            TrainingOutcome::InsufficientSamples { left, right } => {
                self.events.status(format!(
                    "training refused: capture trials for both classes first (left {left}, right {right})"
                ));
            }
            TrainingOutcome::Failed(reason) => {
                self.events.status(format!("training failed: {reason}"));
            }
        }
        outcome
    }

    pub fn has_model(&self) -> bool {
        self.pipeline.has_model()
    }

    /// Toggle periodic classification. Enabling is refused without a model.
    pub fn set_online_prediction(&mut self, enabled: bool) -> BciResult<()> {
        if !enabled {
            if self.stop_scheduler() {
                self.events.status("online prediction disabled");
            }
            return Ok(());
        }
        if !self.pipeline.has_model() {
            return Err(BciError::Classification("no trained model".into()));
        }
        if self.scheduler.is_some() {
            return Ok(());
        }

        let events = Arc::clone(&self.events);
        let votes = Arc::clone(&self.votes);
        let scheduler = ClassificationScheduler::spawn(
            Arc::clone(&self.pipeline),
            Duration::from_millis(self.config.classification.period_ms),
            move |prediction| {
                votes.lock().record(prediction.label);
                events.publish(BciEvent::Prediction(prediction));
            },
        )?;
        self.scheduler = Some(scheduler);
        self.events.status("online prediction enabled");
        Ok(())
    }

    pub fn is_predicting(&self) -> bool {
        self.scheduler.as_ref().is_some_and(|s| s.is_running())
    }

    fn stop_scheduler(&mut self) -> bool {
        match self.scheduler.take() {
            Some(mut scheduler) => {
                scheduler.stop();
                true
            }
            None => false,
        }
    }

    /// Start collecting prediction votes for a paradigm trial.
    pub fn begin_trial(&self, intended: MotorClass) {
        self.votes.lock().begin(intended);
        debug!(%intended, "trial voting started");
    }

    /// Close the trial vote and publish its outcome.
    pub fn end_trial(&self) -> Option<TrialOutcome> {
        let outcome = self.votes.lock().end()?;
        info!(
            intended = %outcome.intended,
            predicted = ?outcome.predicted,
            success = outcome.success,
            votes = outcome.votes,
            "trial finished"
        );
        self.events.publish(BciEvent::TrialResult(outcome));
        Some(outcome)
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if self.session.is_some() || self.scheduler.is_some() {
            self.stop_session();
        }
    }
}
