//! Progress of one batched request across partial replies

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use crate::core::Result;
use crate::messages::batch::{encode_batch_request, parse_batch_response};

/// One answered sub-code of a batch
#[derive(Debug)]
pub struct BatchResult {
    pub code: u16,
    pub payload: Bytes,
    /// Outcome of decoding the sub-payload into the device state
    pub decoded: Result<()>,
}

/// What the engine does with a batch after absorbing a reply
#[derive(Debug, Clone, PartialEq)]
pub enum BatchStep {
    /// Every sub-code has been answered
    Done,
    /// Send this payload for the unanswered tail
    Resubmit(Bytes),
    /// The reply answered nothing
    Stalled { remaining: usize },
}

pub(crate) struct BatchProgress {
    remaining: Vec<u16>,
    results: Vec<BatchResult>,
    rounds: u32,
    reply: oneshot::Sender<Result<Vec<BatchResult>>>,
}

impl BatchProgress {
    pub fn new(codes: Vec<u16>, reply: oneshot::Sender<Result<Vec<BatchResult>>>) -> Self {
        BatchProgress {
            results: Vec::with_capacity(codes.len()),
            remaining: codes,
            rounds: 0,
            reply,
        }
    }

    pub fn remaining(&self) -> &[u16] {
        &self.remaining
    }

    /// Splits a reply, runs each answered sub-payload through `decode` in
    /// order and works out what is left.
    pub fn absorb<F>(&mut self, payload: &Bytes, mut decode: F) -> BatchStep
    where
        F: FnMut(u16, &Bytes) -> Result<()>,
    {
        self.rounds += 1;
        let answered = parse_batch_response(&self.remaining, payload);
        if answered.is_empty() && !self.remaining.is_empty() {
            return BatchStep::Stalled {
                remaining: self.remaining.len(),
            };
        }

        let count = answered.len();
        for (code, payload) in answered {
            let decoded = decode(code, &payload);
            self.results.push(BatchResult { code, payload, decoded });
        }
        self.remaining.drain(..count);

        if self.remaining.is_empty() {
            return BatchStep::Done;
        }
        debug!(
            answered = count,
            remaining = self.remaining.len(),
            round = self.rounds,
            "Partial batch reply"
        );
        // every remaining code already passed validation
        match encode_batch_request(&self.remaining) {
            Ok(payload) => BatchStep::Resubmit(payload),
            Err(_) => BatchStep::Stalled {
                remaining: self.remaining.len(),
            },
        }
    }

    /// Delivers the results collected so far
    pub fn finish(self) {
        let _ = self.reply.send(Ok(self.results));
    }

    pub fn fail(self, error: crate::core::Error) {
        let _ = self.reply.send(Err(error));
    }
}
