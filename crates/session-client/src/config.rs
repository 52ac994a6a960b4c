//! Session client configuration.
//!
//! Configuration is loaded from environment variables. Numeric values that
//! fail to parse fall back to their defaults; values that parse but make no
//! sense (zero capacities, zero retry interval) are rejected.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default capacity of the session actor mailbox.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 200;

/// Default interval between hold/ready redelivery attempts.
pub const DEFAULT_CONTROL_RETRY_INTERVAL_MS: u64 = 20;

/// Default maximum number of hold/ready redelivery attempts (5s at 20ms).
pub const DEFAULT_CONTROL_RETRY_LIMIT: u32 = 250;

/// Default session client instance ID prefix.
pub const DEFAULT_CLIENT_ID_PREFIX: &str = "sc";

/// Session client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Negotiation-profile identifier sent with subscriptions and relayed
    /// negotiation messages (the server tailors SDP to it).
    pub negotiation_profile: String,

    /// Capacity of the event broadcast channel. Slow subscribers that fall
    /// further behind observe `RecvError::Lagged`.
    pub event_capacity: usize,

    /// Capacity of the session actor mailbox.
    pub mailbox_capacity: usize,

    /// Interval between hold/ready redelivery attempts.
    pub control_retry_interval: Duration,

    /// Maximum redelivery attempts before a hold/ready event is dropped.
    pub control_retry_limit: u32,

    /// Client-side ceiling for published audio bandwidth (kbps), if any.
    pub max_audio_bandwidth: Option<u32>,

    /// Instance identifier used for log correlation.
    pub instance_id: String,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("negotiation_profile", &self.negotiation_profile)
            .field("event_capacity", &self.event_capacity)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("control_retry_interval", &self.control_retry_interval)
            .field("control_retry_limit", &self.control_retry_limit)
            .field("max_audio_bandwidth", &self.max_audio_bandwidth)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl ClientConfig {
    /// Configuration with defaults for the given negotiation profile.
    #[must_use]
    pub fn new(negotiation_profile: impl Into<String>) -> Self {
        Self {
            negotiation_profile: negotiation_profile.into(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            control_retry_interval: Duration::from_millis(DEFAULT_CONTROL_RETRY_INTERVAL_MS),
            control_retry_limit: DEFAULT_CONTROL_RETRY_LIMIT,
            max_audio_bandwidth: None,
            instance_id: generate_instance_id(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let negotiation_profile = vars
            .get("SESSION_CLIENT_NEGOTIATION_PROFILE")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ConfigError::MissingEnvVar("SESSION_CLIENT_NEGOTIATION_PROFILE".to_string())
            })?
            .clone();

        let event_capacity = vars
            .get("SESSION_CLIENT_EVENT_CAPACITY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_EVENT_CAPACITY);

        let mailbox_capacity = vars
            .get("SESSION_CLIENT_MAILBOX_CAPACITY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAILBOX_CAPACITY);

        let control_retry_interval_ms = vars
            .get("SESSION_CLIENT_CONTROL_RETRY_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONTROL_RETRY_INTERVAL_MS);

        let control_retry_limit = vars
            .get("SESSION_CLIENT_CONTROL_RETRY_LIMIT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONTROL_RETRY_LIMIT);

        let max_audio_bandwidth = vars
            .get("SESSION_CLIENT_MAX_AUDIO_BANDWIDTH")
            .and_then(|s| s.parse().ok());

        if event_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "SESSION_CLIENT_EVENT_CAPACITY must be greater than zero".to_string(),
            ));
        }
        if mailbox_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "SESSION_CLIENT_MAILBOX_CAPACITY must be greater than zero".to_string(),
            ));
        }
        if control_retry_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "SESSION_CLIENT_CONTROL_RETRY_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let instance_id = vars
            .get("SESSION_CLIENT_ID")
            .cloned()
            .unwrap_or_else(generate_instance_id);

        Ok(ClientConfig {
            negotiation_profile,
            event_capacity,
            mailbox_capacity,
            control_retry_interval: Duration::from_millis(control_retry_interval_ms),
            control_retry_limit,
            max_audio_bandwidth,
            instance_id,
        })
    }
}

fn generate_instance_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let uuid_suffix = uuid::Uuid::new_v4().to_string();
    let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
    format!("{DEFAULT_CLIENT_ID_PREFIX}-{hostname}-{short_suffix}")
}
