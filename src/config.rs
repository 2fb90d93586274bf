//! Configuration for the real-time delivery subsystem
//!
//! All fields have defaults so a partial JSON/TOML document (or none at all)
//! yields a working configuration. Loading the document is left to the host.

use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeConfig {
    /// WebSocket hub settings
    pub hub: HubConfig,

    /// Server-Sent Events settings
    pub stream: StreamConfig,
}

impl RealtimeConfig {
    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        self.hub.validate()?;
        self.stream.validate()
    }
}

/// WebSocket hub and per-client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubConfig {
    /// Capacity of the hub's broadcaster subscription
    pub event_buffer: usize,

    /// Capacity of each client's outbound frame queue
    pub client_buffer: usize,

    /// Read deadline, extended on every pong (milliseconds)
    pub pong_wait_millis: u64,

    /// Deadline for a single write (milliseconds)
    pub write_wait_millis: u64,

    /// Maximum inbound message size in bytes
    pub max_message_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            client_buffer: 256,
            pong_wait_millis: 60_000,
            write_wait_millis: 10_000,
            max_message_size: 512,
        }
    }
}

impl HubConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_millis)
    }

    /// Ping period, 9/10 of the pong wait so a ping always precedes expiry
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 || self.client_buffer == 0 {
            return Err(RealtimeError::Config(
                "hub buffers must be greater than zero".to_string(),
            ));
        }
        if self.pong_wait_millis < 10 {
            return Err(RealtimeError::Config(format!(
                "pongWaitMillis must be at least 10, got {}",
                self.pong_wait_millis
            )));
        }
        if self.write_wait_millis == 0 {
            return Err(RealtimeError::Config(
                "writeWaitMillis must be greater than zero".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(RealtimeError::Config(
                "maxMessageSize must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server-Sent Events stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamConfig {
    /// Capacity of each stream's broadcaster subscription
    pub event_buffer: usize,

    /// Interval between heartbeat comments (milliseconds)
    pub heartbeat_millis: u64,

    /// Number of encoded chunks buffered toward the HTTP body
    pub body_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            event_buffer: 100,
            heartbeat_millis: 30_000,
            body_buffer: 16,
        }
    }
}

impl StreamConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 || self.body_buffer == 0 {
            return Err(RealtimeError::Config(
                "stream buffers must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_millis == 0 {
            return Err(RealtimeError::Config(
                "heartbeatMillis must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
