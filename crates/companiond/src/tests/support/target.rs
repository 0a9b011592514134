//! Target double whose loss is triggered by the test.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::target::{Target, TargetDescription, TargetKind, TargetLoss};

pub const CONTROLLED_UDID: &str = "controlled-target";

/// Target that stays reachable until [`ControlledTarget::lose`] is called.
#[derive(Debug, Default)]
pub struct ControlledTarget {
    lost: CancellationToken,
}

impl ControlledTarget {
    /// Simulates the device disappearing.
    pub fn lose(&self) {
        self.lost.cancel();
    }
}

#[async_trait]
impl Target for ControlledTarget {
    fn udid(&self) -> &str {
        CONTROLLED_UDID
    }

    fn description(&self) -> TargetDescription {
        TargetDescription {
            udid: CONTROLLED_UDID.to_owned(),
            name: "Controlled Simulator".to_owned(),
            kind: TargetKind::Simulator,
            os_version: None,
        }
    }

    async fn lost(&self) -> TargetLoss {
        self.lost.cancelled().await;
        TargetLoss::new("device disconnected")
    }
}
