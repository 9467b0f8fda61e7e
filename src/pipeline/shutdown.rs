//! Single-shot cancellation signal
//!
//! [`channel`] returns a [`ShutdownTrigger`] and a [`ShutdownToken`]. The
//! trigger owns the only sender of a crossbeam channel that never carries
//! a message; firing it drops that sender, and every clone of the token
//! sees the channel disconnect. Firing twice is a no-op, and dropping
//! every trigger without firing has the same effect as firing.
//!
//! Because waiting on the token is a channel receive, a worker can sleep
//! on it and still wake immediately when shutdown is requested.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Uninhabited message type: the channel is only ever closed, never sent on
#[derive(Debug)]
enum Never {}

/// Create a linked trigger/token pair
pub fn channel() -> (ShutdownTrigger, ShutdownToken) {
    let (tx, rx) = bounded::<Never>(0);
    (
        ShutdownTrigger {
            sender: Arc::new(Mutex::new(Some(tx))),
        },
        ShutdownToken { receiver: rx },
    )
}

/// Fires the shutdown signal
///
/// Cloning shares the same signal, so a Ctrl-C handler and the owning
/// component can both hold one.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    sender: Arc<Mutex<Option<Sender<Never>>>>,
}

impl ShutdownTrigger {
    /// Deliver the signal; returns false if it had already been delivered
    pub fn trigger(&self) -> bool {
        let mut sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        sender.take().is_some()
    }

    /// Whether the signal has been delivered
    pub fn is_triggered(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

/// Observes the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    receiver: Receiver<Never>,
}

impl ShutdownToken {
    /// Whether shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for up to `timeout`, returning early with `true` on shutdown
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Ok(never) => match never {},
        }
    }

    /// Block until shutdown is requested
    pub fn wait(&self) {
        if let Ok(never) = self.receiver.recv() {
            match never {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_token_starts_clear() {
        let (trigger, token) = channel();
        assert!(!token.is_cancelled());
        assert!(!trigger.is_triggered());
        assert!(!token.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_trigger_is_single_shot() {
        let (trigger, token) = channel();
        assert!(trigger.trigger());
        assert!(!trigger.trigger());
        assert!(trigger.is_triggered());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_all_clones_observe_trigger() {
        let (trigger, token) = channel();
        let other = token.clone();
        trigger.clone().trigger();
        assert!(token.is_cancelled());
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_wait_wakes_early_on_trigger() {
        let (trigger, token) = channel();
        let waiter = thread::spawn(move || {
            let start = Instant::now();
            let cancelled = token.wait_timeout(Duration::from_secs(10));
            (cancelled, start.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        trigger.trigger();

        let (cancelled, elapsed) = waiter.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_blocking_wait_returns_after_trigger() {
        let (trigger, token) = channel();
        let waiter = thread::spawn(move || token.wait());
        thread::sleep(Duration::from_millis(10));
        trigger.trigger();
        waiter.join().unwrap();
    }
}
