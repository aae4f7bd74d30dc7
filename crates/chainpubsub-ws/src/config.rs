//! Client configuration.

use std::time::Duration;

/// Configuration for [`PubSubClient`](crate::PubSubClient).
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    /// Upper bound on one connect handshake.
    pub connect_timeout: Duration,
    /// Send a transport ping this often while connected. `None` disables it.
    pub heartbeat_interval: Option<Duration>,
    /// Buffered notifications per subscription before slow listeners lag.
    pub notification_capacity: usize,
    /// Commitment level passed to subscribe calls, e.g. `"confirmed"`.
    pub commitment: Option<String>,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: None,
            notification_capacity: 256,
            commitment: None,
        }
    }
}

impl PubSubConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable periodic pings while connected.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    pub fn with_commitment(mut self, commitment: impl Into<String>) -> Self {
        self.commitment = Some(commitment.into());
        self
    }
}
