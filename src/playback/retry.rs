//! Cancellable one-shot retry timer

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::transport::{EventSender, SessionEvent};

/// Delivers one event after a delay unless cancelled first.
///
/// Dropping the timer cancels it.
#[derive(Debug)]
pub struct RetryTimer {
    handle: JoinHandle<()>,
    generation: u64,
}

impl RetryTimer {
    /// Returns `None` when called outside a tokio runtime
    pub fn schedule(delay: Duration, event: SessionEvent, tx: EventSender) -> Option<Self> {
        let runtime = Handle::try_current().ok()?;
        let generation = event.generation;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });

        Some(Self { handle, generation })
    }

    /// Generation the retry targets
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
