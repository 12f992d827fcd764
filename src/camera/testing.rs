//! In-process decoder double for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{CameraDevice, DecoderHandle, DecoderState, FrameEvent, FrameSizeHint, VideoDecoder};

#[derive(Default)]
pub(crate) struct FakeDecoder {
    devices: Vec<CameraDevice>,
    scanning: Mutex<HashMap<Uuid, (String, mpsc::Sender<FrameEvent>)>>,
    started: Mutex<Vec<String>>,
    failing_starts: Mutex<HashSet<String>>,
    start_delay: Mutex<Duration>,
    deny_enumeration: AtomicBool,
    fail_stops: AtomicBool,
    stop_calls: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl FakeDecoder {
    pub(crate) fn with_devices(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            devices: ids
                .iter()
                .map(|id| CameraDevice::new(*id, Some(format!("Camera {id}").as_str())))
                .collect(),
            ..Self::default()
        })
    }

    pub(crate) fn deny_enumeration(&self) {
        self.deny_enumeration.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_start_on(&self, device_id: &str) {
        self.failing_starts.lock().unwrap().insert(device_id.to_string());
    }

    pub(crate) fn fail_stops(&self) {
        self.fail_stops.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock().unwrap() = delay;
    }

    pub(crate) fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub(crate) fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn scanning_count(&self) -> usize {
        self.scanning.lock().unwrap().len()
    }

    pub(crate) fn scanning_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self
            .scanning
            .lock()
            .unwrap()
            .values()
            .map(|(device, _)| device.clone())
            .collect();
        devices.sort();
        devices
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Pushes a frame to the capture running on `device_id`; false if none is.
    pub(crate) async fn emit(&self, device_id: &str, event: FrameEvent) -> bool {
        let sender = self
            .scanning
            .lock()
            .unwrap()
            .values()
            .find(|(device, _)| device == device_id)
            .map(|(_, tx)| tx.clone());
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl VideoDecoder for FakeDecoder {
    async fn list_devices(&self) -> Result<Vec<CameraDevice>> {
        if self.deny_enumeration.load(Ordering::SeqCst) {
            bail!("permission denied");
        }
        Ok(self.devices.clone())
    }

    async fn start_decoding(
        &self,
        device_id: &str,
        _hint: FrameSizeHint,
        frames: mpsc::Sender<FrameEvent>,
    ) -> Result<DecoderHandle> {
        let delay = *self.start_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing_starts.lock().unwrap().contains(device_id) {
            bail!("NotReadableError: could not start video source");
        }

        let mut scanning = self.scanning.lock().unwrap();
        if !scanning.is_empty() {
            return Err(anyhow!("camera busy"));
        }
        let handle = DecoderHandle::new(device_id);
        scanning.insert(handle.id, (device_id.to_string(), frames));
        self.max_concurrent.fetch_max(scanning.len(), Ordering::SeqCst);
        self.started.lock().unwrap().push(device_id.to_string());
        Ok(handle)
    }

    async fn stop(&self, handle: &DecoderHandle) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.scanning.lock().unwrap().remove(&handle.id);
        if self.fail_stops.load(Ordering::SeqCst) {
            bail!("failed to clear scanner element");
        }
        Ok(())
    }

    fn state(&self, handle: &DecoderHandle) -> DecoderState {
        if self.scanning.lock().unwrap().contains_key(&handle.id) {
            DecoderState::Scanning
        } else {
            DecoderState::Idle
        }
    }
}
