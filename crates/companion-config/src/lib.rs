//! Shared configuration for the companion daemon.
//!
//! Values come from command-line flags with `COMPANION_*` environment
//! fallbacks; flags win over the environment, which wins over the built-in
//! defaults in [`defaults`]. Port numbers are carried unvalidated so the
//! daemon can report range and duplicate problems as configuration errors
//! with full channel context.
//!
//! Configuration files are not supported. The companion is launched by a
//! parent process that passes everything on the command line or through the
//! environment, so there is no file layer beneath the defaults.

mod channels;
mod defaults;
mod logging;

use std::ffi::OsString;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;

pub use channels::{ChannelDeclaration, ChannelParseError, ChannelPort};
pub use defaults::{
    DEBUGSERVER_CHANNEL, DEFAULT_BIND_HOST, DEFAULT_BIND_TIMEOUT_MS, DEFAULT_EVENT_BUFFER,
    DEFAULT_GRACE_PERIOD_MS, DEFAULT_GRPC_PORT, DEFAULT_LOG_FILTER, DEFAULT_UDID, GRPC_CHANNEL,
    default_log_filter, default_log_format, default_required_channels,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved companion configuration.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(
    name = "companiond",
    version,
    about = "Attach to a device or simulator and expose it over network channels"
)]
pub struct Config {
    /// Udid of the target to attach to.
    #[arg(long, env = "COMPANION_UDID", default_value = DEFAULT_UDID)]
    pub udid: String,

    /// Address every channel binds on.
    #[arg(long, env = "COMPANION_BIND_HOST", default_value = DEFAULT_BIND_HOST)]
    pub bind_host: String,

    /// Port for the primary command channel.
    #[arg(long, env = "COMPANION_GRPC_PORT", default_value_t = DEFAULT_GRPC_PORT)]
    pub grpc_port: u32,

    /// Port for the debug channel; the channel is not exposed when unset.
    #[arg(long, env = "COMPANION_DEBUGSERVER_PORT")]
    pub debugserver_port: Option<u32>,

    /// Additional auxiliary channels, as NAME=PORT.
    #[arg(long = "channel", value_name = "NAME=PORT")]
    pub channels: Vec<ChannelDeclaration>,

    /// Channels whose bind failure aborts startup.
    #[arg(
        long,
        env = "COMPANION_REQUIRED_CHANNELS",
        value_delimiter = ',',
        default_value = GRPC_CHANNEL
    )]
    pub required_channels: Vec<String>,

    /// Upper bound on binding a single port, in milliseconds.
    #[arg(long, env = "COMPANION_BIND_TIMEOUT_MS", default_value_t = DEFAULT_BIND_TIMEOUT_MS)]
    pub bind_timeout_ms: u64,

    /// Time in-flight requests get to finish during shutdown, in milliseconds.
    #[arg(long, env = "COMPANION_GRACE_PERIOD_MS", default_value_t = DEFAULT_GRACE_PERIOD_MS)]
    pub grace_period_ms: u64,

    /// Number of lifecycle events buffered for the event reporter.
    #[arg(long, env = "COMPANION_EVENT_BUFFER", default_value_t = DEFAULT_EVENT_BUFFER)]
    pub event_buffer: usize,

    /// Directory under which the scratch directory is created.
    #[arg(long, env = "COMPANION_TEMP_ROOT")]
    pub temp_root: Option<Utf8PathBuf>,

    /// Tracing filter expression.
    #[arg(long, env = "COMPANION_LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,

    /// Log output format.
    #[arg(long, env = "COMPANION_LOG_FORMAT", default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            udid: DEFAULT_UDID.to_owned(),
            bind_host: DEFAULT_BIND_HOST.to_owned(),
            grpc_port: DEFAULT_GRPC_PORT,
            debugserver_port: None,
            channels: Vec::new(),
            required_channels: default_required_channels(),
            bind_timeout_ms: DEFAULT_BIND_TIMEOUT_MS,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            temp_root: None,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns the clap error describing the offending flag; callers usually
    /// hand it to [`clap::Error::exit`] so help and version requests behave.
    pub fn load() -> Result<Self, clap::Error> {
        Self::try_parse()
    }

    /// Loads configuration from an explicit argument list.
    ///
    /// The first item is treated as the binary name.
    ///
    /// # Errors
    ///
    /// Returns the clap error describing the offending flag.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args)
    }

    /// Declared channels in declaration order: primary, debug, then auxiliaries.
    #[must_use]
    pub fn channel_ports(&self) -> Vec<ChannelPort> {
        let mut declared = vec![(GRPC_CHANNEL.to_owned(), self.grpc_port)];
        if let Some(port) = self.debugserver_port {
            declared.push((DEBUGSERVER_CHANNEL.to_owned(), port));
        }
        declared.extend(
            self.channels
                .iter()
                .map(|channel| (channel.name().to_owned(), channel.port())),
        );
        declared
            .into_iter()
            .map(|(name, port)| ChannelPort {
                required: self.is_required(&name),
                name,
                port,
            })
            .collect()
    }

    /// Channel names configured as mandatory.
    #[must_use]
    pub fn required_channels(&self) -> &[String] {
        &self.required_channels
    }

    fn is_required(&self, channel: &str) -> bool {
        self.required_channels
            .iter()
            .any(|required| required.trim() == channel)
    }

    /// Address every channel binds on.
    #[must_use]
    pub fn bind_host(&self) -> &str {
        &self.bind_host
    }

    /// Udid of the attached target.
    #[must_use]
    pub fn udid(&self) -> &str {
        &self.udid
    }

    /// Upper bound on binding a single port.
    #[must_use]
    pub fn bind_timeout(&self) -> Duration {
        Duration::from_millis(self.bind_timeout_ms)
    }

    /// Drain grace period.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Event sink buffer capacity.
    #[must_use]
    pub fn event_buffer(&self) -> usize {
        self.event_buffer
    }

    /// Parent directory for the scratch directory, when configured.
    #[must_use]
    pub fn temp_root(&self) -> Option<&Utf8Path> {
        self.temp_root.as_deref()
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
