use serde::{Deserialize, Serialize};

use super::CameraDevice;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CameraState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl Default for CameraState {
    fn default() -> Self {
        CameraState::Idle
    }
}

impl CameraState {
    /// Transitions allowed by the capture lifecycle.
    pub fn can_transition_to(self, next: CameraState) -> bool {
        matches!(
            (self, next),
            (CameraState::Idle, CameraState::Starting)
                | (CameraState::Starting, CameraState::Active)
                | (CameraState::Starting, CameraState::Idle)
                | (CameraState::Active, CameraState::Stopping)
                | (CameraState::Stopping, CameraState::Idle)
        )
    }
}

/// What a camera picker renders: the options plus the device in use.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CameraSnapshot {
    pub state: CameraState,
    pub devices: Vec<CameraDevice>,
    pub active_device_id: Option<String>,
    pub selected_device_id: Option<String>,
}
