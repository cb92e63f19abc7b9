//! Server, hub, and per-client configuration.

use std::time::Duration;

use taskhub_settings::Settings;

/// Per-connection timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Deadline for writing one frame.
    pub write_wait: Duration,
    /// Read deadline, refreshed by every inbound frame.
    pub pong_wait: Duration,
    /// Interval between server pings. Shorter than `pong_wait`.
    pub ping_period: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
        }
    }
}

impl ClientConfig {
    /// Shortest duration a client timer runs with.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    /// Copy with every zero duration raised to [`Self::MIN_INTERVAL`].
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            write_wait: self.write_wait.max(Self::MIN_INTERVAL),
            pong_wait: self.pong_wait.max(Self::MIN_INTERVAL),
            ping_period: self.ping_period.max(Self::MIN_INTERVAL),
        }
    }
}

/// Hub sizing, plus the defaults handed to every client it serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Commands queued for the hub loop before senders wait.
    pub command_capacity: usize,
    /// Frames buffered per client before it is evicted.
    pub mailbox_capacity: usize,
    /// Per-client timing.
    pub client: ClientConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
            mailbox_capacity: 256,
            client: ClientConfig::default(),
        }
    }
}

/// Configuration for the HTTP server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// CORS origins; `"*"` mirrors any origin.
    pub allowed_origins: Vec<String>,
    /// Max inbound `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Hub sizing.
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            allowed_origins: vec!["*".into()],
            max_message_size: 64 * 1024,
            hub: HubConfig::default(),
        }
    }
}

impl From<&Settings> for ServerConfig {
    fn from(settings: &Settings) -> Self {
        let ws = &settings.websocket;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            allowed_origins: settings.server.allowed_origins.clone(),
            max_message_size: ws.max_message_size,
            hub: HubConfig {
                command_capacity: ws.hub_capacity,
                mailbox_capacity: ws.mailbox_capacity,
                client: ClientConfig {
                    write_wait: ws.write_wait(),
                    pong_wait: ws.pong_wait(),
                    ping_period: ws.ping_period(),
                },
            },
        }
    }
}
