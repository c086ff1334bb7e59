//! Configuration for the client.

use lockbox_crypto::Profile;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a client process.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address (`host:port`).
    pub server_addr: String,
    /// Interval between connectivity checks.
    pub connectivity_interval: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Path of the local state file.
    pub state_path: PathBuf,
    /// Key derivation profile for new blocks.
    pub default_profile: Profile,
    /// Capacity of the event bus.
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Creates a configuration for the given server and state file.
    pub fn new(server_addr: impl Into<String>, state_path: impl Into<PathBuf>) -> Self {
        Self {
            server_addr: server_addr.into(),
            connectivity_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            state_path: state_path.into(),
            default_profile: Profile::default(),
            event_capacity: 16,
        }
    }

    /// Sets the connectivity check interval.
    pub fn with_connectivity_interval(mut self, interval: Duration) -> Self {
        self.connectivity_interval = interval;
        self
    }

    /// Sets the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the default profile for new blocks.
    pub fn with_default_profile(mut self, profile: Profile) -> Self {
        self.default_profile = profile;
        self
    }

    /// Sets the event bus capacity (at least 1).
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("127.0.0.1:7878", "lockbox.json")
    }
}
