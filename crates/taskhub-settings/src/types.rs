//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file only has
//! to name the keys it changes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use taskhub_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// HTTP listener and CORS.
    pub server: ServerSettings,
    /// Token validation.
    pub auth: AuthSettings,
    /// Hub and per-connection tuning.
    pub websocket: WebSocketSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Settings {
    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(SettingsError::MissingValue("JWT_SECRET"));
        }
        self.websocket.validate()
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` lets the OS pick).
    pub port: u16,
    /// Origins allowed by the CORS layer. `"*"` allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

/// Token validation settings.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Shared HS256 secret.
    pub jwt_secret: String,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = if self.jwt_secret.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &secret)
            .finish()
    }
}

/// Hub and per-connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Outbound frames buffered per client before it is evicted.
    pub mailbox_capacity: usize,
    /// Pending register/unregister/broadcast requests queued for the hub loop.
    pub hub_capacity: usize,
    /// Deadline for writing one frame, in milliseconds.
    pub write_wait_ms: u64,
    /// Read deadline: a connection silent for this long is dead.
    pub pong_wait_ms: u64,
    /// Interval between server pings. Must be shorter than `pong_wait_ms`.
    pub ping_period_ms: u64,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            hub_capacity: 1024,
            write_wait_ms: 10_000,
            pong_wait_ms: 60_000,
            ping_period_ms: 54_000,
            max_message_size: 64 * 1024,
        }
    }
}

impl WebSocketSettings {
    /// Per-frame write deadline.
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Read deadline.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Server ping interval.
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "mailbox capacity must be at least 1".into(),
            ));
        }
        if self.hub_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub capacity must be at least 1".into(),
            ));
        }
        if self.ping_period_ms == 0 || self.ping_period_ms >= self.pong_wait_ms {
            return Err(SettingsError::InvalidValue(format!(
                "ping period ({}ms) must be non-zero and shorter than pong wait ({}ms)",
                self.ping_period_ms, self.pong_wait_ms
            )));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
