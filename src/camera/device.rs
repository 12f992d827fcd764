use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// A capture device as reported by the host platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CameraDevice {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl CameraDevice {
    pub fn new(id: impl Into<String>, label: Option<&str>) -> Self {
        Self {
            id: id.into(),
            label: label.map(str::to_string),
        }
    }

    /// Label for pickers, falling back to the raw id.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Frame rate and scan-box size handed to the decoder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrameSizeHint {
    pub fps: u32,
    pub qrbox: u32,
}

impl Default for FrameSizeHint {
    fn default() -> Self {
        Self { fps: 10, qrbox: 250 }
    }
}

/// One processed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Decoded(String),
    /// Non-fatal per-frame failure, e.g. no code in view.
    FrameError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    Scanning,
}

/// Opaque handle for a running decode started through [`VideoDecoder::start_decoding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderHandle {
    pub id: Uuid,
    pub device_id: String,
}

impl DecoderHandle {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
        }
    }
}

/// Camera + QR decoding capability provided by the platform.
///
/// Implementations push one [`FrameEvent`] per processed frame into the
/// sender passed to `start_decoding` until `stop` is called for the handle.
#[async_trait]
pub trait VideoDecoder: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<CameraDevice>>;

    async fn start_decoding(
        &self,
        device_id: &str,
        hint: FrameSizeHint,
        frames: mpsc::Sender<FrameEvent>,
    ) -> Result<DecoderHandle>;

    async fn stop(&self, handle: &DecoderHandle) -> Result<()>;

    fn state(&self, handle: &DecoderHandle) -> DecoderState;
}

/// Pick the device at `preferred_index`, or the last one when the list is
/// shorter than that.
pub fn select_default(devices: &[CameraDevice], preferred_index: usize) -> Option<&CameraDevice> {
    devices.get(preferred_index).or_else(|| devices.last())
}
