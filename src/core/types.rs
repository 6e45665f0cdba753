use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Negotiated API version of the remote flight controller.
///
/// Obtained once per connection from the version handshake and used to gate
/// every version-dependent field in the message codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl ApiVersion {
    /// Version reported before the handshake has completed
    pub const UNKNOWN: ApiVersion = ApiVersion::new(0, 0, 0);

    /// Oldest API the engine accepts for a configuration session
    pub const MIN_SUPPORTED: ApiVersion = ApiVersion::new(1, 2, 1);

    /// Newest API whose layouts the codec knows
    pub const MAX_SUPPORTED: ApiVersion = ApiVersion::new(1, 44, 0);

    /// Creates a new version
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        ApiVersion { major, minor, patch }
    }

    /// Returns true when this version is `major.minor.0` or newer
    pub fn at_least(&self, major: u8, minor: u8) -> bool {
        *self >= ApiVersion::new(major, minor, 0)
    }

    /// Returns true when the handshake has produced a version
    pub fn is_known(&self) -> bool {
        *self != ApiVersion::UNKNOWN
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ApiVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('.');
        let mut next = |name: &str| -> Result<u8> {
            match parts.next() {
                Some(part) => part
                    .parse::<u8>()
                    .map_err(|e| Error::invalid_argument(format!("bad {} in version {:?}: {}", name, s, e))),
                None => Ok(0),
            }
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            return Err(Error::invalid_argument(format!("too many components in version {:?}", s)));
        }
        Ok(ApiVersion::new(major, minor, patch))
    }
}

/// Selects which frame generation outgoing requests use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireMode {
    /// Generation 1 for codes up to 254, generation 2 above
    Auto,
    /// Generation 2 for everything
    V2Only,
}

impl Default for WireMode {
    fn default() -> Self {
        WireMode::Auto
    }
}

/// Configuration for one engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of outstanding requests
    pub max_queue_size: usize,
    /// Time to wait for a response before retransmitting
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub request_timeout: Duration,
    /// Transmissions made before a request fails with a timeout
    pub max_attempts: u32,
    /// Frame generation selection for outgoing requests
    pub wire_mode: WireMode,
    /// Largest payload the frame parser will buffer
    pub max_payload_size: usize,
    /// Depth of the command channel between handles and the engine task
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_queue_size: super::MAX_QUEUE_SIZE,
            request_timeout: Duration::from_secs(1),
            max_attempts: 5,
            wire_mode: WireMode::Auto,
            max_payload_size: super::MAX_PAYLOAD_SIZE,
            command_buffer: 64,
        }
    }
}

impl EngineConfig {
    /// Loads a configuration from a JSON file, filling unset fields with defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes this configuration as pretty-printed JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks that every limit is usable
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(Error::config("max_queue_size must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::config("request_timeout must be positive"));
        }
        if self.command_buffer == 0 {
            return Err(Error::config("command_buffer must be at least 1"));
        }
        if self.max_payload_size == 0 || self.max_payload_size > u16::MAX as usize {
            return Err(Error::config("max_payload_size must be between 1 and 65535"));
        }
        Ok(())
    }
}
