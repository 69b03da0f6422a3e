//! Worker/generator hand-off for precise mode
//!
//! Protocol, one cycle per worker iteration:
//!
//! ```text
//! generator (holds lock)          worker
//! ──────────────────────          ──────
//! sent += 1
//! interrupt(worker) ───────────▶  sleep aborts, status cleared
//! wait_for_ack (releases lock)    acknowledge() (takes lock, notifies)
//! ◀─────────────────────────────
//! reacquires lock, next cycle
//! ```
//!
//! The worker stops the generator with [`Rendezvous::interrupt`], which
//! interrupts the generator's own token while holding the lock. When an
//! acknowledgement and a stop are both pending the acknowledgement is taken
//! first, so the generator always sends exactly one interrupt after the
//! worker's last iteration.

use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::debug;

use crate::error::WaitError;
use crate::interrupt::Interruptible;

#[derive(Debug, Default)]
struct Handoff {
    acked: bool,
}

/// Why [`Rendezvous::wait_for_ack`] returned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wakeup {
    /// The worker handled the last interrupt
    Acknowledged,
    /// The waiting thread was itself interrupted
    Interrupted,
}

/// Lock held by the generator across a cycle
pub struct RendezvousGuard<'a>(MutexGuard<'a, Handoff>);

/// Shared mutex + condition pair
#[derive(Debug, Default)]
pub struct Rendezvous {
    state: Mutex<Handoff>,
    cond: Condvar,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the rendezvous lock
    pub fn lock(&self) -> Result<RendezvousGuard<'_>, WaitError> {
        self.state
            .lock()
            .map(RendezvousGuard)
            .map_err(|_| WaitError::Poisoned("rendezvous"))
    }

    /// Release the lock until the worker acknowledges or `waiter` is interrupted
    ///
    /// An interrupt wakeup consumes `waiter`'s pending flag.
    pub fn wait_for_ack<'a>(
        &'a self,
        guard: RendezvousGuard<'a>,
        waiter: &dyn Interruptible,
    ) -> Result<(RendezvousGuard<'a>, Wakeup), WaitError> {
        let mut state = self
            .cond
            .wait_while(guard.0, |h| !h.acked && !waiter.is_interrupted())
            .map_err(|_| WaitError::Poisoned("rendezvous"))?;

        if state.acked {
            state.acked = false;
            return Ok((RendezvousGuard(state), Wakeup::Acknowledged));
        }

        waiter.clear_interrupt();
        debug!("Rendezvous::wait_for_ack: waiter interrupted");
        Ok((RendezvousGuard(state), Wakeup::Interrupted))
    }

    /// Tell the generator the last interrupt has been handled
    pub fn acknowledge(&self) -> Result<(), WaitError> {
        let mut state = self.state.lock().map_err(|_| WaitError::Poisoned("rendezvous"))?;
        state.acked = true;
        self.cond.notify_all();
        Ok(())
    }

    /// Interrupt `target` under the rendezvous lock and wake any waiter
    pub fn interrupt(&self, target: &dyn Interruptible) -> Result<(), WaitError> {
        let _state = self.state.lock().map_err(|_| WaitError::Poisoned("rendezvous"))?;
        target.interrupt();
        self.cond.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::InterruptToken;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_acknowledge_wakes_waiter() {
        let rendezvous = Arc::new(Rendezvous::new());
        let token = InterruptToken::new();

        let worker = {
            let rendezvous = rendezvous.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                rendezvous.acknowledge().unwrap();
            })
        };

        let guard = rendezvous.lock().unwrap();
        let (_guard, wakeup) = rendezvous.wait_for_ack(guard, &token).unwrap();
        assert_eq!(wakeup, Wakeup::Acknowledged);
        worker.join().unwrap();
    }

    #[test]
    fn test_interrupt_wakes_waiter_and_clears_flag() {
        let rendezvous = Arc::new(Rendezvous::new());
        let token = Arc::new(InterruptToken::new());

        let stopper = {
            let rendezvous = rendezvous.clone();
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                rendezvous.interrupt(token.as_ref()).unwrap();
            })
        };

        let guard = rendezvous.lock().unwrap();
        let (_guard, wakeup) = rendezvous.wait_for_ack(guard, token.as_ref()).unwrap();
        assert_eq!(wakeup, Wakeup::Interrupted);
        assert!(!token.is_interrupted());
        stopper.join().unwrap();
    }

    #[test]
    fn test_ack_wins_over_pending_interrupt() {
        let rendezvous = Rendezvous::new();
        let token = InterruptToken::new();

        rendezvous.acknowledge().unwrap();
        rendezvous.interrupt(&token).unwrap();

        let guard = rendezvous.lock().unwrap();
        let (guard, first) = rendezvous.wait_for_ack(guard, &token).unwrap();
        assert_eq!(first, Wakeup::Acknowledged);

        let (_guard, second) = rendezvous.wait_for_ack(guard, &token).unwrap();
        assert_eq!(second, Wakeup::Interrupted);
    }

    #[test]
    fn test_ack_is_consumed() {
        let rendezvous = Rendezvous::new();
        let token = InterruptToken::new();
        rendezvous.acknowledge().unwrap();

        let guard = rendezvous.lock().unwrap();
        let (guard, _) = rendezvous.wait_for_ack(guard, &token).unwrap();
        drop(guard);

        token.interrupt();
        let guard = rendezvous.lock().unwrap();
        let (_guard, wakeup) = rendezvous.wait_for_ack(guard, &token).unwrap();
        assert_eq!(wakeup, Wakeup::Interrupted);
    }
}
