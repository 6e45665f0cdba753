//! Hooks for watching the engine without changing it
//!
//! The engine calls these synchronously from its task, after the event has
//! been applied and before any caller is woken, so implementations must not
//! block.

use std::sync::Arc;
use std::time::Duration;

use crate::core::Error;
use crate::protocol::RequestId;

/// Receives engine lifecycle events. Every method defaults to doing nothing.
pub trait EngineObserver: Send + Sync {
    /// A request was admitted; `queue_len` includes it
    fn on_submit(&self, _id: RequestId, _code: u16, _queue_len: usize) {}

    /// A submission was refused before it was queued
    fn on_rejected(&self, _code: u16, _error: &Error) {}

    /// A request was written; `attempt` starts at 1
    fn on_transmit(&self, _id: RequestId, _code: u16, _attempt: u32) {}

    fn on_complete(&self, _id: RequestId, _code: u16, _latency: Duration, _attempts: u32) {}

    fn on_failure(&self, _id: RequestId, _code: u16, _error: &Error) {}

    /// A frame arrived that no request was waiting for
    fn on_unmatched(&self, _code: u16) {}

    /// The queue length changed
    fn on_queue_len(&self, _queue_len: usize) {}
}

/// Attachment slot holding at most one observer
#[derive(Default)]
pub(crate) struct ObserverSlot {
    observer: Option<Arc<dyn EngineObserver>>,
}

impl ObserverSlot {
    /// Attaching the observer already present is a no-op
    pub fn attach(&mut self, observer: Arc<dyn EngineObserver>) -> Result<(), Error> {
        match &self.observer {
            Some(current) if same_observer(current, &observer) => Ok(()),
            Some(_) => Err(Error::AlreadyInstrumented),
            None => {
                self.observer = Some(observer);
                Ok(())
            }
        }
    }

    /// Returns true when an observer was removed
    pub fn detach(&mut self) -> bool {
        self.observer.take().is_some()
    }

    pub fn notify(&self, event: impl FnOnce(&dyn EngineObserver)) {
        if let Some(observer) = &self.observer {
            event(observer.as_ref());
        }
    }
}

fn same_observer(a: &Arc<dyn EngineObserver>, b: &Arc<dyn EngineObserver>) -> bool {
    // compare data pointers only, vtables may be duplicated
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
