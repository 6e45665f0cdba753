use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::core::{Error, Result};

/// Identity of one submission, unique for the life of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(raw: u64) -> Self {
        RequestId(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a request.
///
/// `Pending` is left on the first transmission. `InFlight` re-enters itself
/// on every retransmission. `Completed` and `Failed` are terminal and reject
/// any further transition.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestState {
    /// Encoded, not yet written
    Pending,

    /// Written at least once, timer armed
    InFlight {
        /// Transmissions so far, starting at 1
        attempts: u32,
        /// Time of the latest transmission
        last_sent: Instant,
    },

    /// A matching frame arrived
    Completed {
        attempts: u32,
        /// Time from submission to the matching frame
        latency: Duration,
    },

    /// Gave up or was torn down
    Failed {
        attempts: u32,
        /// Metrics key of the failure
        reason: &'static str,
    },
}

impl RequestState {
    /// Short state name used in snapshots and logs
    pub fn name(&self) -> &'static str {
        match self {
            RequestState::Pending => "pending",
            RequestState::InFlight { .. } => "in_flight",
            RequestState::Completed { .. } => "completed",
            RequestState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed { .. } | RequestState::Failed { .. })
    }

    /// Transmissions made so far
    pub fn attempts(&self) -> u32 {
        match self {
            RequestState::Pending => 0,
            RequestState::InFlight { attempts, .. }
            | RequestState::Completed { attempts, .. }
            | RequestState::Failed { attempts, .. } => *attempts,
        }
    }

    /// Records a transmission and returns the new attempt count
    pub fn transmit(&mut self, now: Instant) -> Result<u32> {
        let attempts = match self {
            RequestState::Pending => 1,
            RequestState::InFlight { attempts, .. } => *attempts + 1,
            _ => return Err(self.invalid("transmit")),
        };
        *self = RequestState::InFlight {
            attempts,
            last_sent: now,
        };
        Ok(attempts)
    }

    /// Moves to `Completed`, measuring latency from `submitted_at`
    pub fn complete(&mut self, submitted_at: Instant, now: Instant) -> Result<Duration> {
        if self.is_terminal() {
            return Err(self.invalid("complete"));
        }
        let latency = now.saturating_duration_since(submitted_at);
        *self = RequestState::Completed {
            attempts: self.attempts(),
            latency,
        };
        Ok(latency)
    }

    /// Moves to `Failed`
    pub fn fail(&mut self, reason: &'static str) -> Result<()> {
        if self.is_terminal() {
            return Err(self.invalid("fail"));
        }
        *self = RequestState::Failed {
            attempts: self.attempts(),
            reason,
        };
        Ok(())
    }

    fn invalid(&self, action: &str) -> Error {
        Error::protocol(format!("cannot {} a request that is {}", action, self.name()))
    }
}

/// Point-in-time view of one outstanding request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestInfo {
    pub id: RequestId,
    pub code: u16,
    pub payload_len: usize,
    pub state: &'static str,
    pub attempts: u32,
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    pub age: Duration,
    /// Part of a batched request
    pub batched: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_request_lifecycle() {
        let submitted = Instant::now();
        let mut state = RequestState::Pending;
        assert_eq!(state.attempts(), 0);

        assert_eq!(state.transmit(Instant::now()).unwrap(), 1);
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(state.transmit(Instant::now()).unwrap(), 2);
        assert_eq!(state.name(), "in_flight");

        tokio::time::advance(Duration::from_millis(200)).await;
        let latency = state.complete(submitted, Instant::now()).unwrap();
        assert_eq!(latency, Duration::from_millis(500));
        assert_eq!(state.attempts(), 2);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut state = RequestState::Pending;
        state.fail("connection_reset").unwrap();
        assert_eq!(state, RequestState::Failed { attempts: 0, reason: "connection_reset" });

        assert!(state.fail("timeout").is_err());
        assert!(state.transmit(Instant::now()).is_err());
        assert!(state.complete(Instant::now(), Instant::now()).is_err());
    }

    #[test]
    fn test_request_id_display() {
        assert_eq!(RequestId::new(42).to_string(), "#42");
        assert!(RequestId::new(1) < RequestId::new(2));
    }
}
