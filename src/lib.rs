//! QR attendance scanning.
//!
//! A [`camera::CameraSession`] owns the single active capture device and
//! forwards decoded payloads; an [`attendance::AttendanceController`] turns
//! them into per-day attendance entries in a [`store::DocumentStore`].
//! [`app::ScannerDesk`] wires the two together for a presentation layer.

pub mod app;
pub mod attendance;
pub mod audio;
pub mod camera;
pub mod console;
pub mod error;
pub mod settings;
pub mod store;
pub mod utils;

use std::path::PathBuf;

pub use error::{Result, ScanError};

use settings::SettingsStore;

pub fn run() -> anyhow::Result<()> {
    // Reads RUST_LOG; QR_ATTENDANCE_DEBUG raises the default level.
    let level = if utils::debug_requested() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    log::info!("QR attendance starting up...");

    let settings_path = std::env::var_os("QR_ATTENDANCE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("qr-attendance.json"));
    let settings = SettingsStore::new(settings_path)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(console::run_console(settings))
}
