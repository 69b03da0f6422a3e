//! Interruptible blocking waits
//!
//! An [`InterruptToken`] belongs to one thread. Other threads call
//! [`Interruptible::interrupt`] to set its pending flag; the owner's
//! [`Interruptible::sleep`] aborts early when the flag is set and consumes it.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::error::WaitError;

/// How a sleep ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration elapsed
    Completed,
    /// A pending interrupt aborted the wait (and was cleared)
    Interrupted,
}

/// A thread whose blocking waits can be aborted from elsewhere
pub trait Interruptible: Send + Sync {
    /// Set the pending-interrupt flag and wake any sleep in progress
    fn interrupt(&self);

    /// Read the pending-interrupt flag without clearing it
    fn is_interrupted(&self) -> bool;

    /// Clear the pending-interrupt flag, returning its previous value
    fn clear_interrupt(&self) -> bool;

    /// Block for `duration` unless interrupted
    ///
    /// Returns immediately with `Interrupted` if an interrupt is already
    /// pending. An interrupted sleep leaves the flag cleared.
    fn sleep(&self, duration: Duration) -> Result<SleepOutcome, WaitError>;
}

/// Pending flag plus condition variable
#[derive(Debug, Default)]
pub struct InterruptToken {
    pending: Mutex<bool>,
    wakeup: Condvar,
}

impl InterruptToken {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Interruptible for InterruptToken {
    fn interrupt(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.wakeup.notify_all();
    }

    fn is_interrupted(&self) -> bool {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_interrupt(&self) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *pending, false)
    }

    fn sleep(&self, duration: Duration) -> Result<SleepOutcome, WaitError> {
        let pending = self
            .pending
            .lock()
            .map_err(|_| WaitError::Poisoned("interrupt token"))?;
        let (mut pending, _) = self
            .wakeup
            .wait_timeout_while(pending, duration, |pending| !*pending)
            .map_err(|_| WaitError::Poisoned("interrupt token"))?;

        if *pending {
            *pending = false;
            debug!(?duration, "InterruptToken::sleep: interrupted");
            Ok(SleepOutcome::Interrupted)
        } else {
            Ok(SleepOutcome::Completed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_sleep_completes_without_interrupt() {
        let token = InterruptToken::new();
        let outcome = token.sleep(Duration::from_millis(10)).unwrap();
        assert_eq!(outcome, SleepOutcome::Completed);
        assert!(!token.is_interrupted());
    }

    #[test]
    fn test_pending_interrupt_aborts_immediately() {
        let token = InterruptToken::new();
        token.interrupt();

        let start = Instant::now();
        let outcome = token.sleep(Duration::from_secs(10)).unwrap();
        assert_eq!(outcome, SleepOutcome::Interrupted);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_interrupt_clears_status() {
        let token = InterruptToken::new();
        token.interrupt();
        assert!(token.is_interrupted());

        token.sleep(Duration::from_secs(10)).unwrap();
        assert!(!token.is_interrupted());
    }

    #[test]
    fn test_interrupt_from_other_thread() {
        let token = Arc::new(InterruptToken::new());
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.interrupt();
        });

        let outcome = token.sleep(Duration::from_secs(10)).unwrap();
        assert_eq!(outcome, SleepOutcome::Interrupted);
        handle.join().unwrap();
    }

    #[test]
    fn test_clear_interrupt_returns_previous() {
        let token = InterruptToken::new();
        assert!(!token.clear_interrupt());
        token.interrupt();
        assert!(token.clear_interrupt());
        assert!(!token.is_interrupted());
    }

    #[test]
    fn test_multiple_interrupts_collapse() {
        let token = InterruptToken::new();
        token.interrupt();
        token.interrupt();

        assert_eq!(token.sleep(Duration::from_secs(10)).unwrap(), SleepOutcome::Interrupted);
        assert_eq!(token.sleep(Duration::from_millis(10)).unwrap(), SleepOutcome::Completed);
    }
}
