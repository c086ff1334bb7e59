//! Server configuration.

use rand::RngCore;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Absolute lifetime of a snapshot stream, measured from stream start.
    pub stream_deadline: Duration,
    /// Capacity of each per-client notification channel.
    pub notification_capacity: usize,
    /// Outbound frames buffered per stream before the loop waits on the socket.
    pub stream_buffer: usize,
    /// Secret key for token signing.
    pub auth_secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration with a random signing secret.
    ///
    /// Tokens issued under a random secret do not survive a restart; use
    /// [`with_auth_secret`](Self::with_auth_secret) for a stable one.
    pub fn new(bind_addr: SocketAddr) -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);

        Self {
            bind_addr,
            stream_deadline: Duration::from_secs(10 * 60),
            notification_capacity: 1,
            stream_buffer: 4,
            auth_secret: secret,
            token_expiry: Duration::from_secs(24 * 60 * 60), // 24 hours
        }
    }

    /// Sets the stream deadline.
    pub fn with_stream_deadline(mut self, deadline: Duration) -> Self {
        self.stream_deadline = deadline;
        self
    }

    /// Sets the notification channel capacity (minimum 1).
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity.max(1);
        self
    }

    /// Sets the per-stream outbound buffer (minimum 1).
    pub fn with_stream_buffer(mut self, frames: usize) -> Self {
        self.stream_buffer = frames.max(1);
        self
    }

    /// Sets the token signing secret.
    pub fn with_auth_secret(mut self, secret: Vec<u8>) -> Self {
        self.auth_secret = secret;
        self
    }

    /// Sets the token expiration duration.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 7878)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.stream_deadline, Duration::from_secs(600));
        assert_eq!(config.notification_capacity, 1);
        assert_eq!(config.auth_secret.len(), 32);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_stream_deadline(Duration::from_secs(5))
            .with_notification_capacity(0)
            .with_auth_secret(vec![1, 2, 3, 4]);

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.stream_deadline, Duration::from_secs(5));
        assert_eq!(config.notification_capacity, 1);
        assert_eq!(config.auth_secret, vec![1, 2, 3, 4]);
    }

    #[test]
    fn random_secrets_differ() {
        assert_ne!(
            ServerConfig::default().auth_secret,
            ServerConfig::default().auth_secret
        );
    }
}
