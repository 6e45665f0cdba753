//! MSP engine: client side of the MultiWii Serial Protocol
//!
//! This library frames and parses MSP v1 and v2 traffic, keeps a bounded
//! queue of outstanding requests with retries and duplicate suppression, and
//! decodes controller replies into a version-aware [`DeviceState`].
pub mod core;
pub mod engine;
pub mod messages;
pub mod monitor;
pub mod protocol;
pub mod transport;
pub mod util;

// Re-export commonly used items
pub use crate::core::{ApiVersion, EngineConfig, Error, Result, WireMode};
pub use crate::engine::{Engine, EngineHandle, EngineObserver};
pub use crate::messages::{DeviceState, Registry};
pub use crate::monitor::QueueMonitor;
pub use crate::protocol::{Frame, MspCodec};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
