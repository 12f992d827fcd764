pub mod device;
pub mod line_decoder;
pub mod loop_worker;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use device::{
    select_default, CameraDevice, DecoderHandle, DecoderState, FrameEvent, FrameSizeHint,
    VideoDecoder,
};
pub use line_decoder::{LineDecoder, WEDGE_DEVICE_ID};
pub use loop_worker::{decode_loop, DecodeHandlers};
pub use session::{CameraSession, SwitchOutcome};
pub use state::{CameraSnapshot, CameraState};
