//! Channel-to-port mapping validated before any socket is touched.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use companion_config::{Config, GRPC_CHANNEL};

/// Logical name of a network channel, such as `grpc` or `debugserver`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    /// Builds a channel name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The primary command channel.
    #[must_use]
    pub fn primary() -> Self {
        Self::new(GRPC_CHANNEL)
    }

    /// Borrowed name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for ChannelName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Port assignment for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelSpec {
    /// Port the channel binds.
    pub port: u16,
    /// Whether failing to bind this channel aborts startup.
    pub required: bool,
}

/// Errors raised while validating construction inputs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A channel was declared with a blank name.
    #[error("channel names must not be empty")]
    EmptyChannelName,
    /// A channel was declared twice.
    #[error("channel '{channel}' is declared more than once")]
    DuplicateChannel { channel: ChannelName },
    /// A port fell outside 1-65535.
    #[error("port {port} for channel '{channel}' is outside the range 1-65535")]
    PortOutOfRange { channel: ChannelName, port: u32 },
    /// Two channels asked for the same port.
    #[error("port {port} is assigned to both '{first}' and '{second}'")]
    DuplicatePort {
        port: u16,
        first: ChannelName,
        second: ChannelName,
    },
    /// No channel is marked as mandatory.
    #[error("at least one channel must be required")]
    NoRequiredChannel,
    /// A required channel name does not match any declared channel.
    #[error("required channel '{channel}' is not declared")]
    UnknownRequiredChannel { channel: ChannelName },
    /// A collaborator the server cannot run without was not supplied.
    #[error("missing collaborator: {collaborator}")]
    MissingCollaborator { collaborator: &'static str },
}

impl ConfigurationError {
    pub(crate) const fn missing(collaborator: &'static str) -> Self {
        Self::MissingCollaborator { collaborator }
    }
}

/// Immutable, validated mapping from channel name to port.
///
/// Every port is in 1-65535, no two channels share a port, and at least one
/// channel is required. Looking up an undeclared channel yields `None`: the
/// channel is simply not exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSet {
    channels: BTreeMap<ChannelName, ChannelSpec>,
}

impl PortSet {
    /// Starts declaring channels.
    #[must_use]
    pub fn builder() -> PortSetBuilder {
        PortSetBuilder::default()
    }

    /// Builds the port set declared by the daemon configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when a port is out of range or
    /// duplicated, or when a required channel is not declared.
    pub fn from_config(config: &Config) -> Result<Self, ConfigurationError> {
        let declared = config.channel_ports();
        for required in config.required_channels() {
            let required = required.trim();
            if !declared.iter().any(|channel| channel.name == required) {
                return Err(ConfigurationError::UnknownRequiredChannel {
                    channel: ChannelName::new(required),
                });
            }
        }
        declared
            .into_iter()
            .fold(Self::builder(), |builder, channel| {
                builder.channel(channel.name, channel.port, channel.required)
            })
            .build()
    }

    /// Looks up a channel's assignment.
    #[must_use]
    pub fn get(&self, channel: &str) -> Option<ChannelSpec> {
        self.channels.get(&ChannelName::new(channel)).copied()
    }

    /// Port for a channel, when the channel is exposed.
    #[must_use]
    pub fn port(&self, channel: &str) -> Option<u16> {
        self.get(channel).map(|spec| spec.port)
    }

    /// Iterates over every channel in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&ChannelName, ChannelSpec)> {
        self.channels.iter().map(|(name, spec)| (name, *spec))
    }

    /// Number of declared channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is declared. Always false for a built set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Collects channel declarations before validation.
#[derive(Debug, Default)]
pub struct PortSetBuilder {
    declared: Vec<(String, u32, bool)>,
}

impl PortSetBuilder {
    /// Declares a channel whose bind failure aborts startup.
    #[must_use]
    pub fn required(self, name: impl Into<String>, port: u32) -> Self {
        self.channel(name, port, true)
    }

    /// Declares a channel whose bind failure is logged and skipped.
    #[must_use]
    pub fn optional(self, name: impl Into<String>, port: u32) -> Self {
        self.channel(name, port, false)
    }

    /// Declares a channel.
    #[must_use]
    pub fn channel(mut self, name: impl Into<String>, port: u32, required: bool) -> Self {
        self.declared.push((name.into(), port, required));
        self
    }

    /// Validates the declarations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] describing the first invalid declaration.
    pub fn build(self) -> Result<PortSet, ConfigurationError> {
        let mut channels = BTreeMap::new();
        let mut owners: BTreeMap<u16, ChannelName> = BTreeMap::new();
        for (name, port, required) in self.declared {
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigurationError::EmptyChannelName);
            }
            let channel = ChannelName::new(name);
            let port = match u16::try_from(port) {
                Ok(port) if port != 0 => port,
                _ => {
                    return Err(ConfigurationError::PortOutOfRange { channel, port });
                }
            };
            if channels.contains_key(&channel) {
                return Err(ConfigurationError::DuplicateChannel { channel });
            }
            if let Some(first) = owners.get(&port) {
                return Err(ConfigurationError::DuplicatePort {
                    port,
                    first: first.clone(),
                    second: channel,
                });
            }
            owners.insert(port, channel.clone());
            channels.insert(channel, ChannelSpec { port, required });
        }

        if !channels.values().any(|spec| spec.required) {
            return Err(ConfigurationError::NoRequiredChannel);
        }
        Ok(PortSet { channels })
    }
}

/// Names of the channels that must bind, for log context.
pub(crate) fn required_names(ports: &PortSet) -> BTreeSet<ChannelName> {
    ports
        .iter()
        .filter(|(_, spec)| spec.required)
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn builds_primary_and_debug_channels() {
        let ports = PortSet::builder()
            .required("grpc", 10880)
            .optional("debugserver", 10881)
            .build()
            .expect("valid port set");

        assert_eq!(ports.len(), 2);
        assert_eq!(ports.port("grpc"), Some(10880));
        assert_eq!(
            ports.get("debugserver"),
            Some(ChannelSpec {
                port: 10881,
                required: false
            })
        );
    }

    #[test]
    fn unconfigured_channel_is_not_exposed() {
        let ports = PortSet::builder()
            .required("grpc", 10880)
            .build()
            .expect("valid port set");
        assert_eq!(ports.get("debugserver"), None);
    }

    #[rstest]
    #[case(0)]
    #[case(65_536)]
    #[case(u32::MAX)]
    fn rejects_ports_outside_range(#[case] port: u32) {
        let error = PortSet::builder()
            .required("grpc", port)
            .build()
            .expect_err("port must be rejected");
        assert_eq!(
            error,
            ConfigurationError::PortOutOfRange {
                channel: ChannelName::primary(),
                port
            }
        );
    }

    #[test]
    fn rejects_duplicate_ports() {
        let error = PortSet::builder()
            .required("grpc", 10880)
            .optional("debugserver", 10880)
            .build()
            .expect_err("duplicate port must be rejected");
        assert!(matches!(
            error,
            ConfigurationError::DuplicatePort { port: 10880, .. }
        ));
    }

    #[test]
    fn rejects_duplicate_channels() {
        let error = PortSet::builder()
            .required("grpc", 10880)
            .optional("grpc", 10881)
            .build()
            .expect_err("duplicate channel must be rejected");
        assert!(matches!(error, ConfigurationError::DuplicateChannel { .. }));
    }

    #[test]
    fn requires_a_mandatory_channel() {
        let error = PortSet::builder()
            .optional("debugserver", 10881)
            .build()
            .expect_err("optional-only set must be rejected");
        assert_eq!(error, ConfigurationError::NoRequiredChannel);
    }

    #[test]
    fn from_config_rejects_undeclared_required_channel() {
        let config = Config {
            required_channels: vec!["grpc".to_owned(), "debugserver".to_owned()],
            ..Config::default()
        };
        let error = PortSet::from_config(&config).expect_err("undeclared channel");
        assert_eq!(
            error,
            ConfigurationError::UnknownRequiredChannel {
                channel: ChannelName::new("debugserver")
            }
        );
    }

    #[test]
    fn from_config_carries_out_of_range_ports_to_validation() {
        let config = Config {
            grpc_port: 70_000,
            ..Config::default()
        };
        assert!(matches!(
            PortSet::from_config(&config),
            Err(ConfigurationError::PortOutOfRange { port: 70_000, .. })
        ));
    }
}
