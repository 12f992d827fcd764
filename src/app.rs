//! Scanner desk: wires the camera to the attendance controller.
//!
//! A decoded code pauses the camera while the confirmation is pending;
//! dismissing or saving re-arms it on the selected device.

use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    attendance::{AttendanceController, AttendanceEntry, ScanEvent, ScanSession},
    camera::{CameraSession, CameraSnapshot, DecodeHandlers, SwitchOutcome},
    error::{Result, ScanError},
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub struct ScannerDesk {
    camera: CameraSession,
    controller: AttendanceController,
    preferred_camera_index: usize,
    decodes: mpsc::UnboundedSender<String>,
    worker: JoinHandle<()>,
}

impl ScannerDesk {
    pub fn new(
        camera: CameraSession,
        controller: AttendanceController,
        preferred_camera_index: usize,
    ) -> Self {
        let (decodes, decode_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(scan_loop(decode_rx, camera.clone(), controller.clone()));
        Self {
            camera,
            controller,
            preferred_camera_index,
            decodes,
            worker,
        }
    }

    /// Enumerates cameras and starts the preferred one.
    pub async fn bootstrap(&self) -> Result<CameraSnapshot> {
        self.camera.list_devices().await?;
        let device = self
            .camera
            .default_device(self.preferred_camera_index)
            .await
            .ok_or(ScanError::NoDevices)?;

        log_info!("starting default camera {}", device.display_name());
        self.camera.start(&device.id, self.handlers()).await?;
        Ok(self.camera.snapshot())
    }

    /// Switches cameras. While a scan awaits confirmation the choice is only
    /// remembered and takes effect when scanning resumes.
    pub async fn select_camera(&self, device_id: &str) -> Result<SwitchOutcome> {
        if self.controller.current().await.is_some() {
            self.camera.select_device(device_id).await?;
            return Ok(SwitchOutcome::Deferred(device_id.to_string()));
        }
        self.camera.switch_device(device_id).await
    }

    pub async fn pending_scan(&self) -> Option<ScanSession> {
        self.controller.current().await
    }

    /// Saves the pending scan. A successful save re-arms the camera; a
    /// duplicate or failed save leaves the scan open.
    pub async fn save(&self) -> Result<AttendanceEntry> {
        let session = self
            .controller
            .current()
            .await
            .ok_or(ScanError::NoPendingScan)?;

        let entry = self.controller.save(&session).await?;
        if let Err(err) = self.camera.resume().await {
            log_warn!("could not re-arm camera after save: {err}");
        }
        Ok(entry)
    }

    /// Drops the pending scan, if any, and re-arms the camera.
    pub async fn dismiss(&self) -> Result<()> {
        if let Some(session) = self.controller.current().await {
            self.controller.dismiss(&session).await;
        }
        self.camera.resume().await.map(|_| ())
    }

    pub fn camera_updates(&self) -> tokio::sync::watch::Receiver<CameraSnapshot> {
        self.camera.subscribe()
    }

    pub fn scan_events(&self) -> tokio::sync::broadcast::Receiver<ScanEvent> {
        self.controller.subscribe()
    }

    pub fn camera(&self) -> &CameraSession {
        &self.camera
    }

    /// Releases the camera and stops the scan loop. Dropping the desk does
    /// the same in the background.
    pub async fn shutdown(self) {
        self.worker.abort();
        self.camera.stop().await;
    }

    fn handlers(&self) -> DecodeHandlers {
        let decodes = self.decodes.clone();
        DecodeHandlers::new(
            move |payload| {
                let _ = decodes.send(payload);
            },
            |reason| log::trace!("QR decode error: {reason}"),
        )
    }
}

impl Drop for ScannerDesk {
    fn drop(&mut self) {
        self.worker.abort();
        // The camera's handlers keep the decode channel open, so the device
        // must be released explicitly.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let camera = self.camera.clone();
            runtime.spawn(async move { camera.stop().await });
        }
    }
}

async fn scan_loop(
    mut decodes: mpsc::UnboundedReceiver<String>,
    camera: CameraSession,
    controller: AttendanceController,
) {
    while let Some(payload) = decodes.recv().await {
        // Frames already queued when the camera paused.
        if controller.current().await.is_some() {
            continue;
        }

        camera.stop().await;
        if let Err(err) = controller.on_scan(&payload).await {
            log_warn!("ignoring scan: {err}");
            if let Err(err) = camera.resume().await {
                log_warn!("could not re-arm camera: {err}");
            }
        }
    }
}
