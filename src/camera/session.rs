use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ScanError};

use super::{
    decode_loop, select_default, CameraDevice, CameraSnapshot, CameraState, DecodeHandlers,
    DecoderHandle, DecoderState, FrameSizeHint, VideoDecoder,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const FRAME_QUEUE_DEPTH: usize = 32;

/// Result of a device switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    Started(String),
    /// A later switch or stop took over before this one finished.
    Superseded,
    /// Remembered as the selection; takes effect on the next resume.
    Deferred(String),
}

struct ActiveCapture {
    handle: DecoderHandle,
    cancel_token: CancellationToken,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct SessionInner {
    state: CameraState,
    devices: Vec<CameraDevice>,
    selected: Option<String>,
    handlers: Option<DecodeHandlers>,
    active: Option<ActiveCapture>,
}

/// Owns the single capture session bound to one camera at a time.
///
/// All lifecycle changes run under one async mutex, so a previous device is
/// always fully released before the next one starts. Switch requests carry a
/// generation number; the newest request wins.
#[derive(Clone)]
pub struct CameraSession {
    decoder: Arc<dyn VideoDecoder>,
    hint: FrameSizeHint,
    inner: Arc<Mutex<SessionInner>>,
    generation: Arc<AtomicU64>,
    snapshot_tx: Arc<watch::Sender<CameraSnapshot>>,
}

impl CameraSession {
    pub fn new(decoder: Arc<dyn VideoDecoder>, hint: FrameSizeHint) -> Self {
        let (snapshot_tx, _) = watch::channel(CameraSnapshot::default());
        Self {
            decoder,
            hint,
            inner: Arc::new(Mutex::new(SessionInner::default())),
            generation: Arc::new(AtomicU64::new(0)),
            snapshot_tx: Arc::new(snapshot_tx),
        }
    }

    /// Enumerates capture devices and remembers them as the only valid start targets.
    pub async fn list_devices(&self) -> Result<Vec<CameraDevice>> {
        let devices = self
            .decoder
            .list_devices()
            .await
            .map_err(|err| ScanError::DeviceEnumeration(err.to_string()))?;

        let mut inner = self.inner.lock().await;
        inner.devices = devices.clone();
        self.publish(&inner);

        if devices.is_empty() {
            return Err(ScanError::NoDevices);
        }
        log_info!("found {} camera(s)", devices.len());
        Ok(devices)
    }

    /// Default pick from the last enumeration.
    pub async fn default_device(&self, preferred_index: usize) -> Option<CameraDevice> {
        let inner = self.inner.lock().await;
        select_default(&inner.devices, preferred_index).cloned()
    }

    /// Starts decoding on `device_id`, stopping whatever was running first.
    pub async fn start(&self, device_id: &str, handlers: DecodeHandlers) -> Result<()> {
        self.inner.lock().await.handlers = Some(handlers);
        self.switch_device(device_id).await.map(|_| ())
    }

    /// Halts the decode loop and releases the device. No-op when idle.
    pub async fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;
    }

    /// `stop` followed by `start` on `device_id` with the registered handlers.
    pub async fn switch_device(&self, device_id: &str) -> Result<SwitchOutcome> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut inner = self.inner.lock().await;

        if self.is_superseded(generation) {
            return Ok(SwitchOutcome::Superseded);
        }

        let handlers = inner.handlers.clone().ok_or(ScanError::NoHandlers)?;
        if !inner.devices.iter().any(|device| device.id == device_id) {
            return Err(ScanError::UnknownDevice(device_id.to_string()));
        }

        inner.selected = Some(device_id.to_string());
        self.stop_locked(&mut inner).await;
        self.start_locked(&mut inner, device_id, handlers).await?;

        if self.is_superseded(generation) {
            log_info!("switch to {} superseded while starting; releasing it", device_id);
            self.stop_locked(&mut inner).await;
            return Ok(SwitchOutcome::Superseded);
        }

        Ok(SwitchOutcome::Started(device_id.to_string()))
    }

    /// Records `device_id` as the device to use on the next `resume` without
    /// touching the running capture.
    pub async fn select_device(&self, device_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.devices.iter().any(|device| device.id == device_id) {
            return Err(ScanError::UnknownDevice(device_id.to_string()));
        }
        inner.selected = Some(device_id.to_string());
        self.publish(&inner);
        Ok(())
    }

    /// Restarts the most recently selected device.
    pub async fn resume(&self) -> Result<SwitchOutcome> {
        let selected = self.inner.lock().await.selected.clone();
        match selected {
            Some(device_id) => self.switch_device(&device_id).await,
            None => Err(ScanError::NoDevices),
        }
    }

    pub async fn is_active(&self) -> bool {
        let inner = self.inner.lock().await;
        match &inner.active {
            Some(active) => {
                inner.state == CameraState::Active
                    && self.decoder.state(&active.handle) == DecoderState::Scanning
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> CameraSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CameraSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn is_superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    async fn start_locked(
        &self,
        inner: &mut SessionInner,
        device_id: &str,
        handlers: DecodeHandlers,
    ) -> Result<()> {
        self.transition(inner, CameraState::Starting);

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let handle = match self
            .decoder
            .start_decoding(device_id, self.hint, frames_tx)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                log_warn!("cannot start camera {}: {err:#}", device_id);
                self.transition(inner, CameraState::Idle);
                return Err(ScanError::start(device_id, format!("{err:#}")));
            }
        };

        let cancel_token = CancellationToken::new();
        let worker = tokio::spawn(decode_loop(
            device_id.to_string(),
            frames_rx,
            handlers,
            cancel_token.clone(),
        ));

        inner.active = Some(ActiveCapture {
            handle,
            cancel_token,
            worker,
        });
        self.transition(inner, CameraState::Active);
        log_info!("camera {} active", device_id);
        Ok(())
    }

    /// Failures here are logged and swallowed so the next start is never blocked.
    async fn stop_locked(&self, inner: &mut SessionInner) {
        let Some(active) = inner.active.take() else {
            return;
        };

        active.cancel_token.cancel();
        self.transition(inner, CameraState::Stopping);

        if let Err(err) = active.worker.await {
            log_warn!("decode loop for {} failed to join: {err}", active.handle.device_id);
        }
        if let Err(err) = self.decoder.stop(&active.handle).await {
            let err = ScanError::Stop(format!("{}: {err:#}", active.handle.device_id));
            log_warn!("{err}");
        }

        self.transition(inner, CameraState::Idle);
        log_info!("camera {} released", active.handle.device_id);
    }

    fn transition(&self, inner: &mut SessionInner, next: CameraState) {
        debug_assert!(
            inner.state.can_transition_to(next),
            "invalid camera transition {:?} -> {:?}",
            inner.state,
            next
        );
        inner.state = next;
        self.publish(inner);
    }

    fn publish(&self, inner: &SessionInner) {
        self.snapshot_tx.send_replace(CameraSnapshot {
            state: inner.state,
            devices: inner.devices.clone(),
            active_device_id: inner
                .active
                .as_ref()
                .map(|active| active.handle.device_id.clone()),
            selected_device_id: inner.selected.clone(),
        });
    }
}
