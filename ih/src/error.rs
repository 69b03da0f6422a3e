//! Error types shared by the worker, generators and controller
//!
//! Three families:
//! - [`ProtocolViolation`]: the coordination primitive is broken. Always fatal.
//! - [`WaitError`]: a blocking wait failed for a reason other than an interrupt.
//! - [`SignalError`]: a remote interrupt could not be delivered. The
//!   `Disconnected` and `IllegalThreadState` variants mean the target is gone
//!   and end a remote generator cleanly.

use thiserror::Error;

use crate::protocol::ThreadId;

/// Broken interrupt-delivery invariants
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("Thread was never interrupted during sleep: {iteration}")]
    NotInterrupted { iteration: u32 },

    #[error("Thread should not have interrupted status set (iteration {iteration})")]
    StatusNotCleared { iteration: u32 },

    #[error("Interrupt accounting mismatch: sent {sent}, expected {}", .observed + 1)]
    AccountingMismatch { sent: u64, observed: u64 },
}

/// Failure of a blocking wait that was not an interrupt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("Lock poisoned: {0}")]
    Poisoned(&'static str),
}

/// Failure to deliver an interrupt through a thread reference
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalError {
    #[error("Target disconnected")]
    Disconnected,

    #[error("Thread {0} is no longer alive")]
    IllegalThreadState(ThreadId),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl SignalError {
    /// True for the conditions that mean the target went away
    pub fn is_target_gone(&self) -> bool {
        matches!(self, SignalError::Disconnected | SignalError::IllegalThreadState(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounting_mismatch_message() {
        let err = ProtocolViolation::AccountingMismatch { sent: 205, observed: 200 };
        let msg = err.to_string();
        assert!(msg.contains("205"));
        assert!(msg.contains("201"));
    }

    #[test]
    fn test_not_interrupted_message() {
        let err = ProtocolViolation::NotInterrupted { iteration: 17 };
        assert!(err.to_string().ends_with("17"));
    }

    #[test]
    fn test_target_gone() {
        assert!(SignalError::Disconnected.is_target_gone());
        assert!(SignalError::IllegalThreadState(ThreadId(1)).is_target_gone());
        assert!(!SignalError::Transport("broken pipe".to_string()).is_target_gone());
    }
}
