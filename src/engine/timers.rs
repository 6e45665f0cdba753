//! Per-request retry timers
//!
//! One delay queue holds every live timer, keyed by request. A request owns
//! at most one key at a time; retransmissions re-arm that key instead of
//! stacking a second timer.

use std::time::Duration;

use futures::future::poll_fn;
use tokio_util::time::delay_queue::{DelayQueue, Key};

use crate::protocol::RequestId;

pub struct RetryTimers {
    queue: DelayQueue<RequestId>,
    timeout: Duration,
}

impl RetryTimers {
    pub fn new(timeout: Duration) -> Self {
        RetryTimers {
            queue: DelayQueue::new(),
            timeout,
        }
    }

    /// Starts the timer for `id`, or restarts it when `existing` is still live
    pub fn arm(&mut self, id: RequestId, existing: Option<Key>) -> Key {
        match existing {
            Some(key) => {
                self.queue.reset(&key, self.timeout);
                key
            }
            None => self.queue.insert(id, self.timeout),
        }
    }

    /// Cancels a live timer
    pub fn cancel(&mut self, key: Key) {
        self.queue.remove(&key);
    }

    /// Cancels every timer
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Waits for the next timer to fire. Its key is no longer valid afterwards.
    ///
    /// Resolves to `None` immediately when no timer is armed.
    pub async fn expired(&mut self) -> Option<RequestId> {
        poll_fn(|cx| self.queue.poll_expired(cx))
            .await
            .map(|expired| expired.into_inner())
    }
}
