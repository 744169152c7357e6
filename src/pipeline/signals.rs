//! Synchronization primitives shared by the stream controller and the
//! frame delivery context. Every wait is bounded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::info;

pub const EVENT_START: u32 = 0x08;
pub const EVENT_STOP: u32 = 0x10;

/// Event group: a bitmask with bounded waits on any of a set of bits
#[derive(Debug, Default)]
pub struct SystemEvents {
    bits: Mutex<u32>,
    changed: Condvar,
}

impl SystemEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, mask: u32) {
        let mut bits = self.bits.lock().unwrap_or_else(PoisonError::into_inner);
        *bits |= mask;
        self.changed.notify_all();
    }

    pub fn clear(&self, mask: u32) {
        let mut bits = self.bits.lock().unwrap_or_else(PoisonError::into_inner);
        *bits &= !mask;
    }

    pub fn get(&self) -> u32 {
        *self.bits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout` for any bit of `mask`.
    ///
    /// Returns the matched bits (0 on timeout); with `clear_on_exit` they are
    /// consumed.
    pub fn wait_any(&self, mask: u32, clear_on_exit: bool, timeout: Duration) -> u32 {
        let guard = self.bits.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut bits, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |bits| *bits & mask == 0)
            .unwrap_or_else(PoisonError::into_inner);

        let matched = *bits & mask;
        if clear_on_exit {
            *bits &= !matched;
        }
        matched
    }

    pub fn request_start(&self) {
        info!("Signal inference start");
        self.clear(EVENT_STOP);
        self.set(EVENT_START);
    }

    pub fn request_stop(&self) {
        info!("Signal inference stop");
        self.clear(EVENT_START);
        self.set(EVENT_STOP);
    }
}

/// Single-slot "previous frame consumed" signal.
///
/// Giving an already-given signal is a no-op, like a binary semaphore.
#[derive(Debug, Clone)]
pub struct FrameConsumed {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Default for FrameConsumed {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameConsumed {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(1);
        Self { tx, rx }
    }

    pub fn give(&self) {
        let _ = self.tx.try_send(());
    }

    /// Returns whether the signal was taken before `timeout`
    pub fn take(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }
}

/// External switches on capture triggering
#[derive(Debug)]
pub struct StreamGovernor {
    enabled: AtomicBool,
    hold: AtomicBool,
}

impl StreamGovernor {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            hold: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// While held, no further captures are triggered after the first one
    pub fn set_hold(&self, hold: bool) {
        self.hold.store(hold, Ordering::Release);
    }

    pub fn is_held(&self) -> bool {
        self.hold.load(Ordering::Acquire)
    }
}
