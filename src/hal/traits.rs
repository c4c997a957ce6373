// src/hal/traits.rs
//! Core transport traits

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::BciResult;
use crate::hal::types::{SampleChunk, TransportKind, TransportStats};

/// One ingestion mode, driven by the acquisition loop on its own thread.
///
/// `connect` performs the open + handshake phase; `read_chunk` is then called
/// repeatedly. `Ok(None)` means "nothing this time" (timeout, dropped frame or
/// dropped lines) and the loop simply checks its flags and calls again. Any
/// `Err` from `read_chunk` ends the session.
pub trait TransportSource: Send {
    fn kind(&self) -> TransportKind;

    /// Open the transport and confirm data is flowing; returns a status message.
    fn connect(&mut self) -> BciResult<String>;

    /// Read whatever the transport has produced since the last call.
    fn read_chunk(&mut self) -> BciResult<Option<SampleChunk>>;

    /// Handle that unblocks an in-flight read from another thread, if the
    /// transport can block for longer than its polling interval.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }

    /// Slot the transport registers its handle in as soon as one exists,
    /// so a stop can also cut short a blocking handshake inside `connect`.
    fn attach_interrupt_slot(&mut self, _slot: InterruptSlot) {}

    /// Release the underlying handle. Must be idempotent.
    fn close(&mut self);

    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Closes a transport handle from outside the acquisition thread
#[derive(Clone)]
pub struct Interrupter {
    action: Arc<dyn Fn() + Send + Sync>,
}

impl Interrupter {
    pub fn new(action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            action: Arc::new(action),
        }
    }

    pub fn interrupt(&self) {
        (self.action)();
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Interrupter")
    }
}

#[derive(Default)]
struct SlotState {
    cancelled: bool,
    interrupter: Option<Interrupter>,
}

/// Rendezvous between the thread that owns a transport and the one that
/// stops it. After [`cancel`](Self::cancel), a newly registered interrupter
/// fires immediately instead of being stored.
#[derive(Clone, Default)]
pub struct InterruptSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl InterruptSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, interrupter: Interrupter) {
        let mut state = self.inner.lock();
        if state.cancelled {
            drop(state);
            interrupter.interrupt();
        } else {
            state.interrupter = Some(interrupter);
        }
    }

    /// Forget the registered handle without firing it
    pub fn clear(&self) {
        self.inner.lock().interrupter = None;
    }

    /// Fire the registered handle, now or on registration
    pub fn cancel(&self) {
        let pending = {
            let mut state = self.inner.lock();
            state.cancelled = true;
            state.interrupter.take()
        };
        if let Some(interrupter) = pending {
            interrupter.interrupt();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }
}

impl fmt::Debug for InterruptSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptSlot")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
