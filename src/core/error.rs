use std::io;
use thiserror::Error;

/// Error types for the MSP engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Checksum mismatch in response to code {code}")]
    ChecksumMismatch { code: u16 },

    #[error("Request for code {code} timed out after {attempts} attempts")]
    Timeout { code: u16, attempts: u32 },

    #[error("Request queue is full ({capacity} outstanding)")]
    QueueFull { capacity: usize },

    #[error("Identical request for code {code} is already outstanding")]
    DuplicateRequest { code: u16 },

    #[error("Device does not support code {code}")]
    UnsupportedMessage { code: u16 },

    #[error("Payload for code {code} too short: needed {needed} more bytes, {remaining} remaining")]
    DecodeLengthMismatch {
        code: u16,
        needed: usize,
        remaining: usize,
    },

    #[error("Compressed block ended early: produced {produced} of {expected} characters")]
    MalformedCompressedBlock { produced: usize, expected: usize },

    #[error("Batched reply answered none of the {remaining} outstanding codes")]
    BatchStalled { remaining: usize },

    #[error("Connection reset")]
    ConnectionReset,

    #[error("Engine is not running")]
    EngineStopped,

    #[error("No encoder registered for code {code}")]
    NotEncodable { code: u16 },

    #[error("No decoder registered for code {code}")]
    NotDecodable { code: u16 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Engine already has an observer attached")]
    AlreadyInstrumented,
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Creates a new invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Whether the failure came from the link rather than the request itself.
    ///
    /// Callers may resubmit on these; the engine never does it for them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ChecksumMismatch { .. }
                | Error::Timeout { .. }
                | Error::MalformedCompressedBlock { .. }
        )
    }

    /// Short stable name used as a metrics key
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Protocol(_) => "protocol",
            Error::ChecksumMismatch { .. } => "checksum_mismatch",
            Error::Timeout { .. } => "timeout",
            Error::QueueFull { .. } => "queue_full",
            Error::DuplicateRequest { .. } => "duplicate_request",
            Error::UnsupportedMessage { .. } => "unsupported_message",
            Error::DecodeLengthMismatch { .. } => "decode_length_mismatch",
            Error::MalformedCompressedBlock { .. } => "malformed_compressed_block",
            Error::BatchStalled { .. } => "batch_stalled",
            Error::ConnectionReset => "connection_reset",
            Error::EngineStopped => "engine_stopped",
            Error::NotEncodable { .. } => "not_encodable",
            Error::NotDecodable { .. } => "not_decodable",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Config(_) => "config",
            Error::Transport(_) => "transport",
            Error::AlreadyInstrumented => "already_instrumented",
        }
    }
}
