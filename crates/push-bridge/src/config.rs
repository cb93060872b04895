//! Bridge configuration
//!
//! All timing knobs of the bridge in one serde-friendly struct. Durations are
//! stored in whole seconds so the struct maps directly onto a TOML table:
//!
//! ```toml
//! ring_timeout_secs = 45
//! tombstone_ttl_secs = 600
//! ```
//!
//! ```rust
//! use std::time::Duration;
//! use voip_push_bridge::BridgeConfig;
//!
//! let config = BridgeConfig::new()
//!     .with_ring_timeout(Duration::from_secs(30))
//!     .with_event_capacity(64);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.ring_timeout(), Duration::from_secs(30));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::call::StoreLimits;
use crate::error::{BridgeError, BridgeResult};

/// Timing and sizing configuration for [`BridgeCoordinator`](crate::BridgeCoordinator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Ringing without user action before the call is marked missed
    pub ring_timeout_secs: u64,

    /// How long a terminal session waits for a deferred teardown acknowledgment
    pub terminal_grace_secs: u64,

    /// Absolute lifetime of a non-terminal session before the sweeper drops it
    pub session_ceiling_secs: u64,

    /// How long finished call ids are remembered
    pub tombstone_ttl_secs: u64,

    /// Period of the background sweeper
    pub sweep_interval_secs: u64,

    /// Time in `Answered` after which missing media is reported
    pub media_overdue_after_secs: u64,

    /// Buffered events per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 60,
            terminal_grace_secs: 30,
            session_ceiling_secs: 7200,
            tombstone_ttl_secs: 300,
            sweep_interval_secs: 15,
            media_overdue_after_secs: 20,
            event_capacity: 256,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(raw: &str) -> BridgeResult<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| BridgeError::invalid_configuration("toml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        let positive = [
            ("ring_timeout_secs", self.ring_timeout_secs),
            ("terminal_grace_secs", self.terminal_grace_secs),
            ("session_ceiling_secs", self.session_ceiling_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("media_overdue_after_secs", self.media_overdue_after_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(BridgeError::invalid_configuration(field, "must be greater than zero"));
            }
        }

        if self.session_ceiling_secs <= self.ring_timeout_secs {
            return Err(BridgeError::invalid_configuration(
                "session_ceiling_secs",
                format!(
                    "must exceed ring_timeout_secs ({}), got {}",
                    self.ring_timeout_secs, self.session_ceiling_secs
                ),
            ));
        }

        if self.event_capacity == 0 {
            return Err(BridgeError::invalid_configuration(
                "event_capacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_terminal_grace(mut self, grace: Duration) -> Self {
        self.terminal_grace_secs = grace.as_secs();
        self
    }

    pub fn with_session_ceiling(mut self, ceiling: Duration) -> Self {
        self.session_ceiling_secs = ceiling.as_secs();
        self
    }

    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_secs = interval.as_secs();
        self
    }

    pub fn with_media_overdue_after(mut self, after: Duration) -> Self {
        self.media_overdue_after_secs = after.as_secs();
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    pub fn terminal_grace(&self) -> Duration {
        Duration::from_secs(self.terminal_grace_secs)
    }

    pub fn session_ceiling(&self) -> Duration {
        Duration::from_secs(self.session_ceiling_secs)
    }

    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_secs(self.tombstone_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn media_overdue_after(&self) -> Duration {
        Duration::from_secs(self.media_overdue_after_secs)
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            terminal_grace: self.terminal_grace(),
            tombstone_ttl: self.tombstone_ttl(),
        }
    }
}
