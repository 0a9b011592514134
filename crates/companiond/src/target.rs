//! The device or simulator a companion is attached to.

use async_trait::async_trait;
use serde::Serialize;

/// Broad class of attached target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Physical device.
    Device,
    /// Simulator instance.
    Simulator,
    /// The machine the companion runs on.
    Host,
}

/// Static description reported by the `describe` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetDescription {
    /// Target identifier.
    pub udid: String,
    /// Human-readable name.
    pub name: String,
    /// Target class.
    pub kind: TargetKind,
    /// Operating system version, when known.
    pub os_version: Option<String>,
}

/// Why a target stopped being reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLoss {
    reason: String,
}

impl TargetLoss {
    /// Records a loss with a human-readable reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Handle on the attached device or simulator.
///
/// Owned by the embedding code; the server only observes it.
#[async_trait]
pub trait Target: Send + Sync + 'static {
    /// Stable identifier of the target.
    fn udid(&self) -> &str;

    /// Describes the target.
    fn description(&self) -> TargetDescription;

    /// Resolves once the target becomes unreachable.
    ///
    /// Must be cancel-safe. Targets that cannot be lost never resolve.
    async fn lost(&self) -> TargetLoss;
}
