//! Keyboard-wedge decoder.
//!
//! Handheld QR scanners commonly present themselves as keyboards and type
//! each decoded code followed by Enter. `LineDecoder` exposes such an input
//! as a single capture device and turns every fed line into a frame.

use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CameraDevice, DecoderHandle, DecoderState, FrameEvent, FrameSizeHint, VideoDecoder};

pub const WEDGE_DEVICE_ID: &str = "keyboard-wedge";

pub struct LineDecoder {
    device: CameraDevice,
    current: Mutex<Option<(DecoderHandle, mpsc::Sender<FrameEvent>)>>,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            device: CameraDevice::new(WEDGE_DEVICE_ID, Some("Keyboard wedge scanner")),
            current: Mutex::new(None),
        }
    }

    /// Feeds one scanned line. Returns false when no capture is running,
    /// in which case the line is dropped like a frame from a closed camera.
    pub async fn feed(&self, line: &str) -> bool {
        let sender = match self.current.lock() {
            Ok(guard) => guard.as_ref().map(|(_, tx)| tx.clone()),
            Err(_) => None,
        };
        let Some(sender) = sender else {
            return false;
        };

        let event = if line.trim().is_empty() {
            FrameEvent::FrameError("no code found in frame".to_string())
        } else {
            FrameEvent::Decoded(line.to_string())
        };
        sender.send(event).await.is_ok()
    }
}

#[async_trait]
impl VideoDecoder for LineDecoder {
    async fn list_devices(&self) -> Result<Vec<CameraDevice>> {
        Ok(vec![self.device.clone()])
    }

    async fn start_decoding(
        &self,
        device_id: &str,
        _hint: FrameSizeHint,
        frames: mpsc::Sender<FrameEvent>,
    ) -> Result<DecoderHandle> {
        if device_id != self.device.id {
            bail!("no such input device: {device_id}");
        }
        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow!("line decoder state poisoned"))?;
        if current.is_some() {
            bail!("input device {device_id} is busy");
        }
        let handle = DecoderHandle::new(device_id);
        *current = Some((handle.clone(), frames));
        Ok(handle)
    }

    async fn stop(&self, handle: &DecoderHandle) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow!("line decoder state poisoned"))?;
        match current.as_ref() {
            Some((active, _)) if active.id == handle.id => {
                *current = None;
                Ok(())
            }
            _ => bail!("scanner is not running"),
        }
    }

    fn state(&self, handle: &DecoderHandle) -> DecoderState {
        match self.current.lock() {
            Ok(guard) if guard.as_ref().is_some_and(|(active, _)| active.id == handle.id) => {
                DecoderState::Scanning
            }
            _ => DecoderState::Idle,
        }
    }
}
