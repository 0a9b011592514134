//! Log output selection for the companion's stderr stream.
//!
//! Stdout carries the port report, so every format here is written to
//! stderr.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// How diagnostic lines are rendered.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, Display, EnumIter, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per line with span fields flattened in.
    #[default]
    Json,
    /// Terse single-line text for interactive use.
    Compact,
}

impl LogFormat {
    /// Whether lines are meant for machines rather than a terminal.
    #[must_use]
    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }

    /// Accepted spellings, for help and error text.
    #[must_use]
    pub fn names() -> Vec<String> {
        Self::iter().map(|format| format.to_string()).collect()
    }
}

/// Error returned when a log format name is not recognised.
pub type LogFormatParseError = strum::ParseError;
