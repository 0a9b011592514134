use crate::logging::LogFormat;

/// Name of the primary command channel.
pub const GRPC_CHANNEL: &str = "grpc";

/// Name of the debug channel.
pub const DEBUGSERVER_CHANNEL: &str = "debugserver";

/// Port the primary command channel binds when none is configured.
pub const DEFAULT_GRPC_PORT: u32 = 10882;

/// Udid reported when the companion attaches to the local host.
pub const DEFAULT_UDID: &str = "host";

/// Address every channel binds on by default.
pub const DEFAULT_BIND_HOST: &str = "127.0.0.1";

/// Upper bound on a single port bind, in milliseconds.
pub const DEFAULT_BIND_TIMEOUT_MS: u64 = 5_000;

/// Time in-flight dispatches get to finish once draining begins, in milliseconds.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 10_000;

/// Number of lifecycle events buffered before the oldest are dropped.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Channels treated as mandatory unless configured otherwise.
pub fn default_required_channels() -> Vec<String> {
    vec![GRPC_CHANNEL.to_owned()]
}
