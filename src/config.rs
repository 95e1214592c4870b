//! Router configuration.
//!
//! All limits have defaults suitable for a 127 KiB transport. Durations are
//! written in milliseconds when loaded from JSON:
//!
//! ```
//! use methodwire::RouterConfig;
//!
//! let config = RouterConfig::from_json(r#"{"session_ttl_ms": 5000, "max_sessions": 8}"#).unwrap();
//! assert_eq!(config.max_sessions, 8);
//! assert_eq!(config.session_ttl.as_secs(), 5);
//! assert_eq!(config.max_message_size, 127 * 1024);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MethodwireError, Result};
use crate::protocol::{CHUNK_HEADER_SIZE, DEFAULT_MAX_MESSAGE_SIZE};

/// Default ceiling for a reassembled chunked message (4 MiB).
pub const DEFAULT_MAX_REASSEMBLED_SIZE: usize = 4 * 1024 * 1024;

/// Default idle lifetime of a chunk session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60);

/// Default maximum number of concurrent chunk sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 64;

/// Default maximum number of calls dispatched at once.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 256;

/// Limits and timeouts applied by a [`Router`](crate::Router).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Largest payload accepted or returned by one transport call.
    pub max_message_size: usize,

    /// Largest message that may be rebuilt from chunks, and largest reply
    /// that will be split into chunks.
    pub max_reassembled_size: usize,

    /// Idle time after which a chunk session is dropped.
    #[serde(rename = "session_ttl_ms", with = "millis")]
    pub session_ttl: Duration,

    /// Maximum number of chunk sessions open at once.
    pub max_sessions: usize,

    /// Maximum number of calls dispatched at once. Excess calls are
    /// answered with 429.
    pub max_concurrent_calls: usize,

    /// Per-invocation handler timeout.
    #[serde(rename = "handler_timeout_ms", with = "opt_millis")]
    pub handler_timeout: Option<Duration>,

    /// Interval of the background session reaper, if one is spawned.
    #[serde(rename = "reaper_interval_ms", with = "opt_millis")]
    pub reaper_interval: Option<Duration>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_reassembled_size: DEFAULT_MAX_REASSEMBLED_SIZE,
            session_ttl: DEFAULT_SESSION_TTL,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            handler_timeout: None,
            reaper_interval: None,
        }
    }
}

impl RouterConfig {
    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MethodwireError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the limits are consistent.
    pub fn validate(&self) -> Result<()> {
        if self.max_message_size <= CHUNK_HEADER_SIZE {
            return Err(MethodwireError::Config(format!(
                "max_message_size must exceed the {} byte chunk header",
                CHUNK_HEADER_SIZE
            )));
        }
        if self.max_reassembled_size < self.max_message_size {
            return Err(MethodwireError::Config(format!(
                "max_reassembled_size ({}) is below max_message_size ({})",
                self.max_reassembled_size, self.max_message_size
            )));
        }
        if self.session_ttl.is_zero() {
            return Err(MethodwireError::Config("session_ttl must be positive".into()));
        }
        if self.max_sessions == 0 {
            return Err(MethodwireError::Config("max_sessions must be positive".into()));
        }
        if self.max_concurrent_calls == 0 {
            return Err(MethodwireError::Config(
                "max_concurrent_calls must be positive".into(),
            ));
        }
        if self.handler_timeout.is_some_and(|t| t.is_zero()) {
            return Err(MethodwireError::Config("handler_timeout must be positive".into()));
        }
        if self.reaper_interval.is_some_and(|t| t.is_zero()) {
            return Err(MethodwireError::Config("reaper_interval must be positive".into()));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
