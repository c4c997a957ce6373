// src/bin/mi_demo.rs
//! Runs the full pipeline against the configured transport: connect,
//! calibrate both classes, train, then classify online for a few seconds.
//!
//! Usage: `mi-demo [config.toml]`. Predictions are printed as JSON lines.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam::channel::Receiver;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mi_core::classification::{CalibrationEvent, CalibrationStart, MotorClass};
use mi_core::processing::compute_psd;
use mi_core::{BciEvent, ConfigLoader, CsvRecorder, NullSink, Orchestrator, SampleSink, TrainingOutcome};

const ONLINE_SECONDS: u64 = 5;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mi_core=info,mi_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let loader = match std::env::args().nth(1) {
        Some(path) => ConfigLoader::with_file(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("loading configuration")?;
    info!(version = mi_core::VERSION, transport = ?config.acquisition.transport, "starting demo");

    let sink: Arc<dyn SampleSink> = if config.recording.enabled {
        Arc::new(CsvRecorder::from_settings(&config.recording))
    } else {
        Arc::new(NullSink)
    };
    let handshake = Duration::from_millis(
        config.acquisition.connect_timeout_ms + config.acquisition.handshake_timeout_ms,
    );
    let trial_budget = Duration::from_secs_f64(
        config.calibration.window_seconds * config.calibration.trials_per_class as f64 + 5.0,
    );

    let mut orchestrator = Orchestrator::new(config, sink);
    let events = orchestrator.subscribe();
    orchestrator.start_session().context("starting acquisition")?;

    match wait_for(&events, handshake + Duration::from_secs(1), |e| {
        matches!(e, BciEvent::Connection(_))
    }) {
        Some(BciEvent::Connection(outcome)) if outcome.success => info!("{}", outcome.message),
        Some(BciEvent::Connection(outcome)) => bail!("connection failed: {}", outcome.message),
        _ => bail!("no connection outcome within {} ms", handshake.as_millis()),
    }

    for class in MotorClass::ALL {
        match orchestrator.begin_calibration(class) {
            CalibrationStart::Started { samples_per_trial, .. } => {
                info!(%class, samples_per_trial, "imagine {class} hand movement")
            }
            other => bail!("calibration did not start: {other:?}"),
        }
        let completed = wait_for(&events, trial_budget, |e| {
            matches!(e, BciEvent::Calibration(CalibrationEvent::Completed { .. }))
        });
        if completed.is_none() {
            orchestrator.cancel_calibration();
            bail!("calibration for {class} timed out");
        }
    }

    report_signal_quality(&orchestrator);

    match orchestrator.train() {
        TrainingOutcome::Trained(model) => {
            info!(accuracy = model.training_accuracy(), "model ready")
        }
        TrainingOutcome::InsufficientSamples { left, right } => {
            bail!("insufficient samples (left {left}, right {right})")
        }
        TrainingOutcome::Failed(reason) => bail!("training failed: {reason}"),
    }

    orchestrator.set_online_prediction(true)?;
    let deadline = Instant::now() + Duration::from_secs(ONLINE_SECONDS);
    orchestrator.begin_trial(MotorClass::Left);
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(BciEvent::Prediction(prediction)) => {
                println!("{}", serde_json::to_string(&prediction)?);
            }
            Ok(BciEvent::RuntimeError { message, .. }) => {
                warn!("{message}");
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    if let Some(outcome) = orchestrator.end_trial() {
        println!("{}", serde_json::to_string(&outcome)?);
    }

    orchestrator.set_online_prediction(false)?;
    if !orchestrator.stop_session() {
        warn!("acquisition thread did not stop within the join timeout");
    }
    Ok(())
}

fn wait_for<F>(events: &Receiver<BciEvent>, timeout: Duration, mut pred: F) -> Option<BciEvent>
where
    F: FnMut(&BciEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(event) if pred(&event) => return Some(event),
            Ok(BciEvent::Status(message)) => info!("{message}"),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
    None
}

/// Alpha/mu and beta band power of the last second, per channel
fn report_signal_quality(orchestrator: &Orchestrator) {
    let (Some(buffer), Some(session)) = (orchestrator.buffer(), orchestrator.session()) else {
        return;
    };
    let rate = session.sample_rate_hz;
    let Some(window) = buffer.get_last(rate as usize) else {
        return;
    };
    let spectrum = compute_psd(
        window.mapv(f64::from).view(),
        rate,
        orchestrator.config().processing.psd_segment_len,
    );
    for channel in 0..window.ncols() {
        info!(
            channel = channel + 1,
            mu = spectrum.band_power(channel, 8.0, 13.0),
            beta = spectrum.band_power(channel, 13.0, 30.0),
            "band power"
        );
    }
}
