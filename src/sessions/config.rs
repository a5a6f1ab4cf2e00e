//! Tunable configuration for the connection manager and request correlator.
//!
//! Defaults match the production service; presets cover common situations.
//! All configs are validated when the session is built.

use web_time::Duration;

use crate::error::SyncError;

/// Configuration for connection establishment and bounded reconnection.
///
/// # Examples
///
/// ```
/// use mirror_sync::ReconnectConfig;
/// use std::time::Duration;
///
/// let config = ReconnectConfig {
///     retry_delay: Duration::from_secs(1),
///     ..ReconnectConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// How many consecutive connection attempts to make before parking in
    /// the terminal failed state. Default: 5.
    pub max_attempts: u32,
    /// Fixed delay between attempts. Not required to grow, but bounded.
    /// Default: 2 s.
    pub retry_delay: Duration,
    /// How long a single attempt may stay in the opening handshake before it
    /// counts as failed. Default: 4 s.
    pub connect_timeout: Duration,
    /// Interval of the liveness probe that catches silent link deaths where
    /// no close event fired. Default: 5 s.
    pub health_check_interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(4),
            health_check_interval: Duration::from_secs(5),
        }
    }
}

impl ReconnectConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Short delays for LAN or local development servers.
    #[must_use]
    pub fn lan() -> Self {
        Self {
            retry_delay: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(2),
            health_check_interval: Duration::from_secs(2),
            ..Self::default()
        }
    }

    /// Longer delays and a higher cap for flaky mobile networks.
    #[must_use]
    pub fn mobile() -> Self {
        Self {
            max_attempts: 8,
            retry_delay: Duration::from_secs(4),
            connect_timeout: Duration::from_secs(8),
            health_check_interval: Duration::from_secs(10),
        }
    }

    /// Checks the configuration for values that cannot work.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.max_attempts == 0 {
            return Err(SyncError::InvalidRequest {
                info: "max_attempts must be at least 1".to_owned(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(SyncError::InvalidRequest {
                info: "connect_timeout must be non-zero".to_owned(),
            });
        }
        if self.health_check_interval.is_zero() {
            return Err(SyncError::InvalidRequest {
                info: "health_check_interval must be non-zero".to_owned(),
            });
        }
        Ok(())
    }
}

/// Configuration for outbound action tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestConfig {
    /// How long to wait between the defensive re-join publish and the action
    /// publish, giving the server time to recognize the membership before
    /// the action lands. A heuristic; a join acknowledgement round trip
    /// would replace it where the server supports one. Default: 750 ms.
    pub settle_delay: Duration,
    /// How long a confirmation-bearing action (submit, prompt) waits for its
    /// inbound confirmation before rejecting with a timeout. Default: 30 s.
    pub confirm_timeout: Duration,
    /// Whether to publish a best-effort duplicate of each action to the
    /// alternate destination spelling. Off by default; only needed against
    /// servers with inconsistent route registration. Default: false.
    pub fallback_publish: bool,
    /// Delay before the duplicate publish, when enabled. Default: 250 ms.
    pub fallback_delay: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(750),
            confirm_timeout: Duration::from_secs(30),
            fallback_publish: false,
            fallback_delay: Duration::from_millis(250),
        }
    }
}

impl RequestConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Short waits for LAN or local development servers.
    #[must_use]
    pub fn lan() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            confirm_timeout: Duration::from_secs(10),
            ..Self::default()
        }
    }

    /// Enables the duplicate publish against servers whose action routes are
    /// registered under both spellings.
    #[must_use]
    pub fn with_fallback_publish(mut self) -> Self {
        self.fallback_publish = true;
        self
    }

    /// Checks the configuration for values that cannot work.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.confirm_timeout.is_zero() {
            return Err(SyncError::InvalidRequest {
                info: "confirm_timeout must be non-zero".to_owned(),
            });
        }
        if self.confirm_timeout <= self.settle_delay {
            return Err(SyncError::InvalidRequest {
                info: "confirm_timeout must exceed settle_delay".to_owned(),
            });
        }
        Ok(())
    }
}
