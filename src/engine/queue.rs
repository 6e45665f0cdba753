//! Bounded queue of outstanding requests
//!
//! The wire carries no request identifier, so responses are matched by code
//! to the oldest outstanding request with that code. Order in the queue is
//! submission order.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::time::delay_queue::Key;

use crate::core::{Error, Result};
use crate::protocol::{Frame, RequestId, RequestInfo, RequestState};
use super::batch::BatchProgress;

/// Where the outcome of a request goes
pub(crate) enum Responder {
    Frame(oneshot::Sender<Result<Frame>>),
    Batch(BatchProgress),
}

impl Responder {
    /// Delivers a failure exactly once
    pub fn fail(self, error: Error) {
        match self {
            Responder::Frame(reply) => {
                let _ = reply.send(Err(error));
            }
            Responder::Batch(progress) => progress.fail(error),
        }
    }
}

pub(crate) struct QueuedRequest {
    pub id: RequestId,
    pub code: u16,
    /// Encoded request, written again on every retry
    pub frame: Frame,
    pub state: RequestState,
    pub submitted_at: Instant,
    /// Live retry timer, if armed
    pub timer: Option<Key>,
    pub responder: Responder,
}

impl QueuedRequest {
    pub fn is_batch(&self) -> bool {
        matches!(self.responder, Responder::Batch(_))
    }

    pub fn info(&self, now: Instant) -> RequestInfo {
        RequestInfo {
            id: self.id,
            code: self.code,
            payload_len: self.frame.payload.len(),
            state: self.state.name(),
            attempts: self.state.attempts(),
            age: now.saturating_duration_since(self.submitted_at),
            batched: self.is_batch(),
        }
    }
}

pub(crate) struct RequestQueue {
    entries: VecDeque<QueuedRequest>,
    capacity: usize,
    next_id: u64,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        RequestQueue {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Checks that a new submission of `frame` may be queued
    pub fn admit(&self, frame: &Frame) -> Result<()> {
        let duplicate = self
            .entries
            .iter()
            .any(|entry| entry.code == frame.code && entry.frame.payload == frame.payload);
        if duplicate {
            return Err(Error::DuplicateRequest { code: frame.code });
        }
        if self.entries.len() >= self.capacity {
            return Err(Error::QueueFull {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Queues an admitted request in the `Pending` state
    pub fn push(&mut self, frame: Frame, responder: Responder, now: Instant) -> RequestId {
        let id = RequestId::new(self.next_id);
        self.next_id += 1;
        self.entries.push_back(QueuedRequest {
            id,
            code: frame.code,
            frame,
            state: RequestState::Pending,
            submitted_at: now,
            timer: None,
            responder,
        });
        id
    }

    /// Puts a request back at the tail, keeping its identity
    pub fn requeue(&mut self, mut request: QueuedRequest, frame: Frame) {
        request.code = frame.code;
        request.frame = frame;
        request.state = RequestState::Pending;
        request.timer = None;
        self.entries.push_back(request);
    }

    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut QueuedRequest> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    /// Oldest outstanding request for `code`
    pub fn oldest_for(&self, code: u16) -> Option<RequestId> {
        self.entries
            .iter()
            .find(|entry| entry.code == code && !entry.state.is_terminal())
            .map(|entry| entry.id)
    }

    pub fn remove(&mut self, id: RequestId) -> Option<QueuedRequest> {
        let position = self.entries.iter().position(|entry| entry.id == id)?;
        self.entries.remove(position)
    }

    /// Empties the queue, oldest first
    pub fn drain(&mut self) -> Vec<QueuedRequest> {
        self.entries.drain(..).collect()
    }

    pub fn snapshot(&self, now: Instant) -> Vec<RequestInfo> {
        self.entries.iter().map(|entry| entry.info(now)).collect()
    }
}
