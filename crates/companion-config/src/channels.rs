//! Channel declarations accepted on the command line.
//!
//! Auxiliary channels are declared as `NAME=PORT`. Ports stay as `u32` at
//! this layer so range checking happens in one place, when the daemon builds
//! its port set.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A logical channel declared through `--channel NAME=PORT`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChannelDeclaration {
    name: String,
    port: u32,
}

impl ChannelDeclaration {
    /// Builds a declaration from its parts.
    #[must_use]
    pub fn new(name: impl Into<String>, port: u32) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    /// Logical channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requested port, not yet range checked.
    #[must_use]
    pub fn port(&self) -> u32 {
        self.port
    }
}

impl fmt::Display for ChannelDeclaration {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}={}", self.name, self.port)
    }
}

impl FromStr for ChannelDeclaration {
    type Err = ChannelParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (name, port) = input
            .split_once('=')
            .ok_or_else(|| ChannelParseError::MissingSeparator(input.to_owned()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ChannelParseError::EmptyName(input.to_owned()));
        }
        if !name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(ChannelParseError::InvalidName(name.to_owned()));
        }
        let port = port
            .trim()
            .parse::<u32>()
            .map_err(|source| ChannelParseError::InvalidPort {
                input: input.to_owned(),
                source,
            })?;
        Ok(Self::new(name, port))
    }
}

/// Errors encountered while parsing a [`ChannelDeclaration`].
#[derive(Debug, Error)]
pub enum ChannelParseError {
    /// The `=` separator was absent.
    #[error("expected NAME=PORT, got '{0}'")]
    MissingSeparator(String),
    /// The channel name was blank.
    #[error("channel name is empty in '{0}'")]
    EmptyName(String),
    /// The channel name contained unsupported characters.
    #[error("channel name '{0}' may only contain ASCII letters, digits, '-' and '_'")]
    InvalidName(String),
    /// The port was not a number.
    #[error("invalid port in '{input}': {source}")]
    InvalidPort {
        input: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// A declared channel together with whether it must bind for startup to succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelPort {
    /// Logical channel name.
    pub name: String,
    /// Requested port, not yet range checked.
    pub port: u32,
    /// Whether a bind failure on this channel aborts startup.
    pub required: bool,
}
