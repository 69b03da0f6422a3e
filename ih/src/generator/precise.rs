//! Precise strategy: exactly one interrupt in flight

use std::sync::Arc;

use tracing::{debug, info};

use super::{GeneratorError, GeneratorReport};
use crate::interrupt::Interruptible;
use crate::mode::Mode;
use crate::rendezvous::{Rendezvous, Wakeup};

/// Sends the next interrupt only after the worker acknowledged the last one
pub struct PreciseGenerator {
    target: Arc<dyn Interruptible>,
    rendezvous: Arc<Rendezvous>,
    sent: u64,
}

impl PreciseGenerator {
    pub fn new(target: Arc<dyn Interruptible>, rendezvous: Arc<Rendezvous>) -> Self {
        Self {
            target,
            rendezvous,
            sent: 0,
        }
    }

    pub fn rendezvous(&self) -> Arc<Rendezvous> {
        self.rendezvous.clone()
    }

    pub fn run(mut self, stop: &dyn Interruptible) -> Result<GeneratorReport, GeneratorError> {
        let rendezvous = self.rendezvous.clone();
        let mut guard = rendezvous.lock()?;
        loop {
            self.sent += 1;
            self.target.interrupt();
            debug!(sent = self.sent, "PreciseGenerator::run: interrupt sent");

            let (next, wakeup) = rendezvous.wait_for_ack(guard, stop)?;
            guard = next;
            if wakeup == Wakeup::Interrupted {
                break;
            }
        }

        info!("Interruptor: finished after {} interrupts", self.sent);
        Ok(GeneratorReport {
            strategy: Mode::Precise,
            interrupts_sent: self.sent,
        })
    }
}
