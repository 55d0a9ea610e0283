//! Upload progress reporting.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Sending half of a progress channel.
///
/// Values are fractions of the payload sent, clamped to `[0, 1]`. Within
/// one attempt they never decrease; regressions are dropped. Clones share
/// the attempt, [`ProgressSink::attempt`] starts a new one.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<UnboundedSender<f64>>,
    last: Arc<Mutex<Option<f64>>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, UnboundedReceiver<f64>) {
        let (tx, rx) = unbounded_channel();
        let sink = Self {
            tx: Some(tx),
            last: Arc::new(Mutex::new(None)),
        };
        (sink, rx)
    }

    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A sink on the same channel with its own monotonic state, so a reused
    /// sink starts every upload from zero.
    pub fn attempt(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Report `loaded` of `total` bytes. Nothing is emitted when the total
    /// is unknown (zero).
    pub fn report(&self, loaded: u64, total: u64) {
        if total == 0 {
            return;
        }
        self.emit(loaded as f64 / total as f64);
    }

    pub fn complete(&self) {
        self.emit(1.0);
    }

    fn emit(&self, fraction: f64) {
        let Some(tx) = &self.tx else {
            return;
        };
        let fraction = fraction.clamp(0.0, 1.0);

        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*last, Some(previous) if fraction < previous) {
            return;
        }
        *last = Some(fraction);

        // A dropped receiver only means nobody is listening.
        let _ = tx.send(fraction);
    }
}
