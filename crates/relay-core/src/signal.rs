//! Ephemeral signal bus.
//!
//! Built on `tokio::sync::broadcast`. Signals are keyed by subject and
//! receivers filter with the same wildcard patterns subscriptions use.
//! Nothing is stored; emitting with no receivers drops the signal.

use relay_types::signal::Signal;
use tokio::sync::broadcast;
use tracing::warn;

use crate::subject::SubjectPattern;

/// Default channel capacity.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 256;

/// Multi-consumer signal bus. Cloning shares the underlying channel.
pub struct SignalEmitter {
    sender: broadcast::Sender<(String, Signal)>,
}

impl SignalEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit `signal` on `subject`. Returns the number of live receivers,
    /// counted before any pattern filtering.
    pub fn emit(&self, subject: impl Into<String>, signal: Signal) -> usize {
        self.sender.send((subject.into(), signal)).unwrap_or(0)
    }

    /// Receive signals whose subject matches `pattern`.
    pub fn subscribe(&self, pattern: SubjectPattern) -> SignalReceiver {
        SignalReceiver {
            pattern,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SignalEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNAL_CAPACITY)
    }
}

impl Clone for SignalEmitter {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for SignalEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalEmitter")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

/// A filtered view of the signal bus.
pub struct SignalReceiver {
    pattern: SubjectPattern,
    receiver: broadcast::Receiver<(String, Signal)>,
}

impl SignalReceiver {
    /// Wait for the next matching signal. `None` once the bus is gone.
    ///
    /// A receiver that falls behind skips the signals it missed.
    pub async fn recv(&mut self) -> Option<(String, Signal)> {
        loop {
            match self.receiver.recv().await {
                Ok((subject, signal)) if self.pattern.matches(&subject) => {
                    return Some((subject, signal));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "signal receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching signal if one is already queued.
    pub fn try_recv(&mut self) -> Option<(String, Signal)> {
        loop {
            match self.receiver.try_recv() {
                Ok((subject, signal)) if self.pattern.matches(&subject) => {
                    return Some((subject, signal));
                }
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "signal receiver lagged");
                }
                Err(_) => return None,
            }
        }
    }
}
