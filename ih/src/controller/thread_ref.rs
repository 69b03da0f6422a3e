//! Controller-side references to target threads

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SignalError;
use crate::generator::RemoteThread;
use crate::protocol::{ControlCommand, ThreadId};
use crate::target::CommandSender;

/// Opaque reference to a thread inside a target
///
/// Holds no access to the thread itself, only the command channel. The
/// controller marks it dead when it sees the thread's `ThreadDeath`.
#[derive(Clone, Debug)]
pub struct ThreadRef {
    id: ThreadId,
    alive: Arc<AtomicBool>,
    commands: CommandSender,
}

impl ThreadRef {
    pub fn new(id: ThreadId, commands: CommandSender) -> Self {
        Self {
            id,
            alive: Arc::new(AtomicBool::new(true)),
            commands,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl RemoteThread for ThreadRef {
    fn id(&self) -> ThreadId {
        self.id
    }

    fn signal(&self) -> Result<(), SignalError> {
        if !self.is_alive() {
            return Err(SignalError::IllegalThreadState(self.id));
        }
        self.commands.send(ControlCommand::Interrupt { thread: self.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_signal_sends_interrupt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let thread = ThreadRef::new(ThreadId(1), CommandSender::new(tx));

        thread.signal().unwrap();
        assert_eq!(rx.try_recv().unwrap(), ControlCommand::Interrupt { thread: ThreadId(1) });
    }

    #[test]
    fn test_dead_thread_is_illegal_state() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let thread = ThreadRef::new(ThreadId(3), CommandSender::new(tx));
        let observer = thread.clone();

        observer.mark_dead();
        assert_eq!(thread.signal(), Err(SignalError::IllegalThreadState(ThreadId(3))));
    }

    #[test]
    fn test_closed_channel_is_disconnected() {
        let (tx, rx) = mpsc::unbounded_channel();
        let thread = ThreadRef::new(ThreadId(1), CommandSender::new(tx));
        drop(rx);

        assert_eq!(thread.signal(), Err(SignalError::Disconnected));
    }
}
