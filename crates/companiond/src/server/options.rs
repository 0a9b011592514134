//! Tunables for a companion server.

use std::time::Duration;

use companion_config::{
    Config, DEFAULT_BIND_HOST, DEFAULT_BIND_TIMEOUT_MS, DEFAULT_EVENT_BUFFER,
    DEFAULT_GRACE_PERIOD_MS,
};

/// Runtime knobs that do not affect the port layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Address every channel binds on.
    pub bind_host: String,
    /// Upper bound on binding each channel.
    pub bind_timeout: Duration,
    /// Time in-flight dispatches get after draining starts.
    pub grace_period: Duration,
    /// Event sink capacity.
    pub event_buffer: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_owned(),
            bind_timeout: Duration::from_millis(DEFAULT_BIND_TIMEOUT_MS),
            grace_period: Duration::from_millis(DEFAULT_GRACE_PERIOD_MS),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ServerOptions {
    /// Reads the options from daemon configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_host: config.bind_host().to_owned(),
            bind_timeout: config.bind_timeout(),
            grace_period: config.grace_period(),
            event_buffer: config.event_buffer(),
        }
    }

    /// Overrides the drain grace period.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}
