//! Aggressive strategy: interrupt on a fixed pace, no coordination

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{GeneratorError, GeneratorReport};
use crate::interrupt::{Interruptible, SleepOutcome};
use crate::mode::Mode;

/// Interrupts the worker every `pause` until stopped
pub struct AggressiveGenerator {
    target: Arc<dyn Interruptible>,
    pause: Duration,
    sent: u64,
}

impl AggressiveGenerator {
    pub fn new(target: Arc<dyn Interruptible>, pause: Duration) -> Self {
        Self { target, pause, sent: 0 }
    }

    pub fn run(mut self, stop: &dyn Interruptible) -> Result<GeneratorReport, GeneratorError> {
        loop {
            self.sent += 1;
            self.target.interrupt();
            if stop.sleep(self.pause)? == SleepOutcome::Interrupted {
                break;
            }
        }

        info!("Interruptor: finished after {} interrupts", self.sent);
        Ok(GeneratorReport {
            strategy: Mode::Aggressive,
            interrupts_sent: self.sent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::Generator;
    use crate::interrupt::InterruptToken;

    #[test]
    fn test_keeps_interrupting_until_stopped() {
        let worker = Arc::new(InterruptToken::new());
        let handle = Generator::Aggressive(AggressiveGenerator::new(worker.clone(), Duration::from_millis(1)))
            .spawn()
            .unwrap();

        for _ in 0..5 {
            assert_eq!(worker.sleep(Duration::from_secs(10)).unwrap(), SleepOutcome::Interrupted);
        }

        handle.stop().unwrap();
        let report = handle.join().unwrap();
        assert_eq!(report.strategy, Mode::Aggressive);
        assert!(report.interrupts_sent >= 5);
    }

    #[test]
    fn test_pre_stopped_generator_sends_once() {
        let worker = Arc::new(InterruptToken::new());
        let stop = InterruptToken::new();
        stop.interrupt();

        let report = AggressiveGenerator::new(worker.clone(), Duration::from_secs(10))
            .run(&stop)
            .unwrap();
        assert_eq!(report.interrupts_sent, 1);
        assert!(worker.is_interrupted());
    }
}
