// src/events.rs
//! Events delivered to external collaborators
//!
//! Every subscriber owns a bounded receiver and publishing uses `try_send`,
//! so a stalled subscriber never blocks the acquisition or classification
//! threads; it loses events instead. Events from one publisher reach each
//! subscriber in emission order.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::classification::{CalibrationEvent, PredictionResult, TrialOutcome};
use crate::config::constants::events::SUBSCRIBER_QUEUE_EVENTS;
use crate::error::ErrorCategory;
use crate::hal::{ConnectionOutcome, SampleChunk};

#[derive(Debug, Clone)]
pub enum BciEvent {
    /// Reported once per session start
    Connection(ConnectionOutcome),
    /// Raw chunk for display feeds
    Samples(SampleChunk),
    Status(String),
    Prediction(PredictionResult),
    RuntimeError {
        category: ErrorCategory,
        message: String,
    },
    Calibration(CalibrationEvent),
    TrialResult(TrialOutcome),
}

#[derive(Debug)]
struct Subscriber {
    tx: Sender<BciEvent>,
    /// Events lost since this subscriber last kept up
    lagging: u64,
}

/// Fan-out of events to any number of subscribers
#[derive(Debug)]
pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<Subscriber>>,
    dropped: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(SUBSCRIBER_QUEUE_EVENTS)
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus whose subscribers each buffer at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> Receiver<BciEvent> {
        let (tx, rx) = channel::bounded(self.capacity);
        self.subscribers.lock().push(Subscriber { tx, lagging: 0 });
        rx
    }

    /// Deliver to every live subscriber; dropped receivers are pruned and
    /// full queues lose the event.
    pub fn publish(&self, event: BciEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain_mut(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => {
                if sub.lagging > 0 {
                    debug!(lost = sub.lagging, "event subscriber caught up");
                    sub.lagging = 0;
                }
                true
            }
            Err(TrySendError::Full(_)) => {
                if sub.lagging == 0 {
                    warn!(capacity = self.capacity, "event subscriber is not draining; dropping events");
                }
                sub.lagging += 1;
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn status(&self, message: impl Into<String>) {
        self.publish(BciEvent::Status(message.into()));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Events lost to full subscriber queues since the bus was created
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
