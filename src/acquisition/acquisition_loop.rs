// src/acquisition/acquisition_loop.rs
//! Dedicated acquisition thread driving one transport
//!
//! State machine: `Idle -> Connecting -> Streaming -> {Stopped | Failed}`.
//! The thread reports the connection outcome exactly once, then streams
//! chunks to the handler until stopped or until the transport fails. Stopping
//! is cooperative: the running flag is checked every iteration and any
//! blocking read or handshake is released by closing the transport handle.
//! Once `stop` has cleared the running flag the handler receives nothing more,
//! including the outcome of a connect that was still in flight.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::constants::hal::IDLE_SLEEP_MS;
use crate::error::{BciError, BciResult};
use crate::hal::{ConnectionOutcome, InterruptSlot, SampleChunk, TransportKind, TransportSource, TransportStats};

/// Receives everything the acquisition thread produces. Implementations
/// must not block: they run on the acquisition thread.
pub trait AcquisitionHandler: Send + Sync {
    fn on_connection(&self, outcome: ConnectionOutcome);
    fn on_chunk(&self, chunk: SampleChunk);
    fn on_runtime_error(&self, error: &BciError);
}

/// Lifecycle of one acquisition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Connecting,
    Streaming,
    Stopped,
    Failed(String),
}

impl AcquisitionState {
    /// Connecting or streaming
    pub fn is_active(&self) -> bool {
        matches!(self, AcquisitionState::Connecting | AcquisitionState::Streaming)
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionState::Idle => f.write_str("idle"),
            AcquisitionState::Connecting => f.write_str("connecting"),
            AcquisitionState::Streaming => f.write_str("streaming"),
            AcquisitionState::Stopped => f.write_str("stopped"),
            AcquisitionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

struct Shared {
    running: AtomicBool,
    paused: AtomicBool,
    state: RwLock<AcquisitionState>,
    interrupts: InterruptSlot,
    /// Held while a handler callback runs and while `running` is cleared
    delivery: Mutex<()>,
    stats: Mutex<TransportStats>,
}

impl Shared {
    fn set_state(&self, state: AcquisitionState) {
        *self.state.write() = state;
    }

    /// Run `deliver` unless a stop has been requested; false if stopped.
    fn deliver(&self, deliver: impl FnOnce()) -> bool {
        let _gate = self.delivery.lock();
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        deliver();
        true
    }
}

/// Handle to a running acquisition thread
pub struct AcquisitionLoop {
    kind: TransportKind,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl AcquisitionLoop {
    /// Start the thread; it connects immediately.
    pub fn spawn(mut source: Box<dyn TransportSource>, handler: Arc<dyn AcquisitionHandler>) -> BciResult<Self> {
        let kind = source.kind();
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            state: RwLock::new(AcquisitionState::Idle),
            interrupts: InterruptSlot::new(),
            delivery: Mutex::new(()),
            stats: Mutex::new(TransportStats::default()),
        });
        source.attach_interrupt_slot(shared.interrupts.clone());

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("acquisition-{kind}"))
            .spawn(move || run(source, thread_shared, handler))?;

        Ok(Self {
            kind,
            shared,
            handle: Some(handle),
        })
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn state(&self) -> AcquisitionState {
        self.shared.state.read().clone()
    }

    /// True until the thread has stopped or failed
    pub fn is_active(&self) -> bool {
        let finished = self.handle.as_ref().map_or(true, |h| h.is_finished());
        !finished && self.shared.running.load(Ordering::Acquire)
    }

    /// Suspend chunk delivery; the transport stays open.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        debug!(transport = %self.kind, "acquisition paused");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        debug!(transport = %self.kind, "acquisition resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Transport counters as of the end of the session (zero while running)
    pub fn stats(&self) -> TransportStats {
        *self.shared.stats.lock()
    }

    /// Request a cooperative stop and wait up to `join_timeout` for the
    /// thread. Returns `false` if the thread had to be detached.
    pub fn stop(&mut self, join_timeout: Duration) -> bool {
        self.request_stop();

        let Some(handle) = self.handle.take() else {
            return true;
        };
        let deadline = Instant::now() + join_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    transport = %self.kind,
                    timeout_ms = join_timeout.as_millis() as u64,
                    "acquisition thread did not stop in time, detaching"
                );
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        if handle.join().is_err() {
            error!(transport = %self.kind, "acquisition thread panicked");
        }
        true
    }

    fn request_stop(&self) {
        {
            let _gate = self.shared.delivery.lock();
            self.shared.running.store(false, Ordering::Release);
        }
        self.shared.paused.store(false, Ordering::Release);
        self.shared.interrupts.cancel();
    }
}

impl Drop for AcquisitionLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_stop();
        }
    }
}

fn run(mut source: Box<dyn TransportSource>, shared: Arc<Shared>, handler: Arc<dyn AcquisitionHandler>) {
    let kind = source.kind();
    shared.set_state(AcquisitionState::Connecting);
    info!(transport = %kind, "connecting");

    let connected = source.connect();
    if !shared.running.load(Ordering::Acquire) {
        debug!(transport = %kind, "stop requested while connecting");
        finish(source, &shared, None);
        return;
    }

    match connected {
        Ok(message) => {
            if let Some(interrupter) = source.interrupter() {
                shared.interrupts.register(interrupter);
            }
            shared.set_state(AcquisitionState::Streaming);
            info!(transport = %kind, "{message}");
            let outcome = ConnectionOutcome {
                transport: kind,
                success: true,
                message,
            };
            if !shared.deliver(|| handler.on_connection(outcome)) {
                finish(source, &shared, None);
                return;
            }
        }
        Err(err) => {
            warn!(transport = %kind, error = %err, "connection failed");
            let reason = err.to_string();
            let outcome = ConnectionOutcome {
                transport: kind,
                success: false,
                message: reason.clone(),
            };
            if shared.deliver(|| handler.on_connection(outcome)) {
                finish(source, &shared, Some(reason));
            } else {
                finish(source, &shared, None);
            }
            return;
        }
    }

    let idle = Duration::from_millis(IDLE_SLEEP_MS);
    let mut failure = None;
    while shared.running.load(Ordering::Acquire) {
        if shared.paused.load(Ordering::Acquire) {
            thread::sleep(idle);
            continue;
        }
        match source.read_chunk() {
            Ok(Some(chunk)) if !chunk.is_empty() => {
                if !shared.deliver(|| handler.on_chunk(chunk)) {
                    break;
                }
            }
            Ok(_) => {}
            Err(err) => {
                // Errors caused by our own stop request are not reported
                if shared.deliver(|| handler.on_runtime_error(&err)) {
                    error!(transport = %kind, error = %err, "acquisition aborted");
                    failure = Some(err.to_string());
                }
                break;
            }
        }
    }

    finish(source, &shared, failure);
}

fn finish(mut source: Box<dyn TransportSource>, shared: &Shared, failure: Option<String>) {
    let kind = source.kind();
    shared.interrupts.clear();
    *shared.stats.lock() = source.stats();
    source.close();
    shared.running.store(false, Ordering::Release);
    shared.set_state(match failure {
        Some(reason) => AcquisitionState::Failed(reason),
        None => AcquisitionState::Stopped,
    });
    info!(transport = %kind, "acquisition thread finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{DemoSource, Interrupter};
    use crossbeam::channel::{self, Receiver, Sender};
    use ndarray::Array2;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Recorder {
        outcomes: Mutex<Vec<ConnectionOutcome>>,
        chunks: Mutex<Vec<SampleChunk>>,
        errors: Mutex<Vec<String>>,
    }

    impl AcquisitionHandler for Recorder {
        fn on_connection(&self, outcome: ConnectionOutcome) {
            self.outcomes.lock().push(outcome);
        }
        fn on_chunk(&self, chunk: SampleChunk) {
            self.chunks.lock().push(chunk);
        }
        fn on_runtime_error(&self, error: &BciError) {
            self.errors.lock().push(error.to_string());
        }
    }

    /// Transport that replays a fixed script of reads
    struct Scripted {
        connect: Option<BciError>,
        reads: VecDeque<BciResult<Option<SampleChunk>>>,
    }

    impl TransportSource for Scripted {
        fn kind(&self) -> TransportKind {
            TransportKind::Tcp
        }
        fn connect(&mut self) -> BciResult<String> {
            match self.connect.take() {
                Some(err) => Err(err),
                None => Ok("scripted".into()),
            }
        }
        fn read_chunk(&mut self) -> BciResult<Option<SampleChunk>> {
            self.reads.pop_front().unwrap_or_else(|| {
                thread::sleep(Duration::from_millis(1));
                Ok(None)
            })
        }
        fn close(&mut self) {}
    }

    /// Transport whose `connect` blocks until released. With `interruptible`
    /// set it registers a handle that releases the wait, like a socket
    /// shutdown would.
    struct SlowConnect {
        release_tx: Sender<()>,
        release_rx: Receiver<()>,
        interruptible: bool,
        slot: Option<InterruptSlot>,
    }

    impl SlowConnect {
        fn new(interruptible: bool) -> Self {
            let (release_tx, release_rx) = channel::bounded(1);
            Self {
                release_tx,
                release_rx,
                interruptible,
                slot: None,
            }
        }
    }

    impl TransportSource for SlowConnect {
        fn kind(&self) -> TransportKind {
            TransportKind::Tcp
        }
        fn connect(&mut self) -> BciResult<String> {
            if let (true, Some(slot)) = (self.interruptible, &self.slot) {
                let tx = self.release_tx.clone();
                slot.register(Interrupter::new(move || {
                    let _ = tx.try_send(());
                }));
            }
            match self.release_rx.recv_timeout(Duration::from_secs(5)) {
                Ok(()) => Ok("late connect".into()),
                Err(_) => Err(BciError::connection("tcp", "never released")),
            }
        }
        fn read_chunk(&mut self) -> BciResult<Option<SampleChunk>> {
            thread::sleep(Duration::from_millis(1));
            Ok(Some(chunk(2)))
        }
        fn attach_interrupt_slot(&mut self, slot: InterruptSlot) {
            self.slot = Some(slot);
        }
        fn close(&mut self) {}
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn chunk(rows: usize) -> SampleChunk {
        SampleChunk::new(Array2::zeros((rows, 2)))
    }

    #[test]
    fn test_connection_failure_reported_once() {
        let handler = Arc::new(Recorder::default());
        let source = Scripted {
            connect: Some(BciError::connection("tcp", "refused")),
            reads: VecDeque::new(),
        };
        let mut acquisition = AcquisitionLoop::spawn(Box::new(source), handler.clone()).unwrap();
        wait_until(|| !acquisition.is_active());
        assert!(acquisition.stop(Duration::from_secs(1)));

        let outcomes = handler.outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert!(outcomes[0].message.contains("refused"));
        assert!(matches!(acquisition.state(), AcquisitionState::Failed(_)));
        assert!(handler.chunks.lock().is_empty());
    }

    #[test]
    fn test_dropped_frames_do_not_stop_stream() {
        let handler = Arc::new(Recorder::default());
        let reads = VecDeque::from(vec![Ok(Some(chunk(4))), Ok(None), Ok(Some(chunk(0))), Ok(Some(chunk(3)))]);
        let source = Scripted { connect: None, reads };
        let mut acquisition = AcquisitionLoop::spawn(Box::new(source), handler.clone()).unwrap();

        wait_until(|| handler.chunks.lock().len() == 2);
        assert_eq!(acquisition.state(), AcquisitionState::Streaming);
        assert!(acquisition.stop(Duration::from_secs(1)));
        assert_eq!(acquisition.state(), AcquisitionState::Stopped);
        assert!(handler.errors.lock().is_empty());
    }

    #[test]
    fn test_connection_loss_is_fatal() {
        let handler = Arc::new(Recorder::default());
        let reads = VecDeque::from(vec![
            Ok(Some(chunk(2))),
            Err(BciError::connection_lost("tcp", "remote host closed the connection")),
            Ok(Some(chunk(2))),
        ]);
        let source = Scripted { connect: None, reads };
        let acquisition = AcquisitionLoop::spawn(Box::new(source), handler.clone()).unwrap();

        wait_until(|| !acquisition.is_active());
        assert_eq!(handler.chunks.lock().len(), 1);
        assert_eq!(handler.errors.lock().len(), 1);
        assert!(matches!(acquisition.state(), AcquisitionState::Failed(_)));
    }

    #[test]
    fn test_pause_suspends_chunks() {
        let handler = Arc::new(Recorder::default());
        let source = DemoSource::new(250.0, 2, 4).with_seed(1);
        let mut acquisition = AcquisitionLoop::spawn(Box::new(source), handler.clone()).unwrap();
        wait_until(|| !handler.chunks.lock().is_empty());

        acquisition.pause();
        // let an in-flight read finish before sampling the count
        thread::sleep(Duration::from_millis(30));
        let paused_count = handler.chunks.lock().len();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(handler.chunks.lock().len(), paused_count);

        acquisition.resume();
        wait_until(|| handler.chunks.lock().len() > paused_count);
        assert!(acquisition.stop(Duration::from_secs(1)));
        assert_eq!(handler.outcomes.lock().len(), 1);
    }

    #[test]
    fn test_stop_while_connecting_reports_nothing() {
        let handler = Arc::new(Recorder::default());
        let source = SlowConnect::new(false);
        let release = source.release_tx.clone();
        let mut acquisition = AcquisitionLoop::spawn(Box::new(source), handler.clone()).unwrap();
        wait_until(|| acquisition.state() == AcquisitionState::Connecting);

        // connect cannot be interrupted, so the join times out
        assert!(!acquisition.stop(Duration::from_millis(50)));
        release.send(()).unwrap();
        wait_until(|| acquisition.state() == AcquisitionState::Stopped);

        thread::sleep(Duration::from_millis(20));
        assert!(handler.outcomes.lock().is_empty());
        assert!(handler.chunks.lock().is_empty());
        assert!(handler.errors.lock().is_empty());
        assert_eq!(acquisition.state(), AcquisitionState::Stopped);
    }

    #[test]
    fn test_stop_interrupts_blocking_connect() {
        let handler = Arc::new(Recorder::default());
        let mut acquisition = AcquisitionLoop::spawn(Box::new(SlowConnect::new(true)), handler.clone()).unwrap();
        wait_until(|| acquisition.state() == AcquisitionState::Connecting);

        let started = Instant::now();
        assert!(acquisition.stop(Duration::from_secs(2)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(acquisition.state(), AcquisitionState::Stopped);
        assert!(handler.outcomes.lock().is_empty());
        assert!(handler.chunks.lock().is_empty());
    }
}
