//! Defines the unified error surface for companion launch.

use std::io;

use thiserror::Error;

use crate::ports::ConfigurationError;
use crate::server::StartError;
use crate::telemetry::TelemetryError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the companion process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Telemetry could not be installed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The channel layout or collaborators were rejected.
    #[error("invalid companion configuration: {source}")]
    Configuration {
        /// Underlying validation error.
        #[source]
        source: ConfigurationError,
    },
    /// The scratch directory could not be created.
    #[error("failed to create scratch directory: {source}")]
    Scratch {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The server did not reach `Running`.
    #[error("companion failed to start: {source}")]
    Start {
        /// Underlying start error.
        #[source]
        source: StartError,
    },
    /// Writing the port report failed.
    #[error("failed to write port report: {source}")]
    Report {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Serialising the port report failed.
    #[error("failed to serialise port report: {source}")]
    ReportSerialise {
        /// Underlying serialisation error.
        #[from]
        source: serde_json::Error,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<ConfigurationError> for LaunchError {
    fn from(source: ConfigurationError) -> Self {
        Self::Configuration { source }
    }
}

impl From<StartError> for LaunchError {
    fn from(source: StartError) -> Self {
        Self::Start { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
