use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::FrameEvent;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub type DecodeCallback = Arc<dyn Fn(String) + Send + Sync>;
pub type FrameErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Callbacks invoked by the decode loop of the active capture.
#[derive(Clone)]
pub struct DecodeHandlers {
    pub on_decode: DecodeCallback,
    pub on_frame_error: FrameErrorCallback,
}

impl DecodeHandlers {
    pub fn new(
        on_decode: impl Fn(String) + Send + Sync + 'static,
        on_frame_error: impl Fn(String) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_decode: Arc::new(on_decode),
            on_frame_error: Arc::new(on_frame_error),
        }
    }
}

/// Forwards decoder frames to the handlers, in order, until cancelled or the
/// decoder drops its sender.
pub async fn decode_loop(
    device_id: String,
    mut frames: mpsc::Receiver<FrameEvent>,
    handlers: DecodeHandlers,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("decode loop for {} shutting down", device_id);
                break;
            }
            event = frames.recv() => match event {
                Some(FrameEvent::Decoded(payload)) => (handlers.on_decode)(payload),
                Some(FrameEvent::FrameError(reason)) => (handlers.on_frame_error)(reason),
                None => {
                    log_warn!("decoder for {} closed its frame stream", device_id);
                    break;
                }
            }
        }
    }
}
