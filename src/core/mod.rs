//! Core types for the MSP engine
//!
//! This module contains the error type, the negotiated API version and the
//! engine configuration shared by every other module.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{ApiVersion, EngineConfig, WireMode};

/// Default number of outstanding requests before submissions are rejected
pub const MAX_QUEUE_SIZE: usize = 50;

/// Largest payload a frame can announce
pub const MAX_PAYLOAD_SIZE: usize = 65535;

/// Largest code that still fits a generation 1 frame
pub const MAX_V1_CODE: u16 = 254;
