//! Line-oriented front end for keyboard-wedge scanners.

use std::sync::Arc;

use anyhow::Result;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
};

use crate::{
    app::ScannerDesk,
    attendance::{AttendanceController, ScanEvent},
    audio::{BeepCue, ScanCue, SilentCue},
    camera::{CameraDevice, CameraSession, CameraSnapshot, LineDecoder, SwitchOutcome},
    settings::SettingsStore,
    store::{DocumentStore, MemoryStore, SqliteStore},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Save,
    Dismiss,
    Cameras,
    Camera(String),
    Quit,
    Help,
    /// Anything not starting with `:` is scanner input.
    Scan(String),
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let Some(command) = trimmed.strip_prefix(':') else {
            return Command::Scan(line.trim_end_matches(['\r', '\n']).to_string());
        };

        let mut parts = command.splitn(2, char::is_whitespace);
        match (parts.next().unwrap_or_default(), parts.next().map(str::trim)) {
            ("save" | "s", None) => Command::Save,
            ("dismiss" | "d", None) => Command::Dismiss,
            ("cameras", None) => Command::Cameras,
            ("camera", Some(id)) if !id.is_empty() => Command::Camera(id.to_string()),
            ("quit" | "q", None) => Command::Quit,
            ("help" | "h", None) => Command::Help,
            _ => Command::Unknown(trimmed.to_string()),
        }
    }
}

const HELP: &str = "scan a code, then :save or :dismiss | :cameras | :camera <id> | :quit";

pub async fn run_console(settings_store: SettingsStore) -> Result<()> {
    let settings = settings_store.scanner().apply_env();
    let store: Arc<dyn DocumentStore> = match &settings.database_path {
        Some(path) => Arc::new(SqliteStore::new(path.clone())?),
        None => {
            log::warn!("no database configured; attendance is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let cue: Arc<dyn ScanCue> = if settings.sound_enabled {
        Arc::new(BeepCue::new())
    } else {
        Arc::new(SilentCue)
    };

    let decoder = Arc::new(LineDecoder::new());
    let camera = CameraSession::new(decoder.clone(), settings.frame_hint());
    let controller =
        AttendanceController::new(store, cue).with_collection(settings.students_collection.clone());
    let desk = ScannerDesk::new(camera, controller, settings.preferred_camera_index);

    let printer = tokio::spawn(print_scans(desk.scan_events()));
    let camera_printer = tokio::spawn(print_camera_changes(desk.camera_updates()));

    desk.bootstrap().await?;
    println!("QR Attendance Scanner ready. {HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Scan(code) => {
                if !decoder.feed(&code).await {
                    println!("Scanner paused: :save or :dismiss the pending scan first.");
                }
            }
            Command::Save => match desk.save().await {
                Ok(_) => println!("Attendance saved successfully!"),
                Err(err) => println!("{err}"),
            },
            Command::Dismiss => {
                if let Err(err) = desk.dismiss().await {
                    println!("{err}");
                }
            }
            Command::Cameras => {
                let snapshot = desk.camera().snapshot();
                for device in &snapshot.devices {
                    let marker = if snapshot.active_device_id.as_deref() == Some(device.id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{marker} {} ({})", device.display_name(), device.id);
                }
            }
            Command::Camera(id) => {
                match desk.select_camera(&id).await {
                    Ok(SwitchOutcome::Deferred(id)) => {
                        println!("Camera {id} will be used once the pending scan is closed.")
                    }
                    Ok(_) => {}
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                }
                let devices = desk.camera().snapshot().devices;
                if let Err(err) = remember_camera(&settings_store, &devices, &id) {
                    log::warn!("could not save camera choice: {err:#}");
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
            Command::Unknown(raw) => println!("Unknown command {raw}. {HELP}"),
        }
    }

    printer.abort();
    camera_printer.abort();
    desk.shutdown().await;
    Ok(())
}

/// Stores the position of `device_id` as the camera to open on next launch.
fn remember_camera(
    settings_store: &SettingsStore,
    devices: &[CameraDevice],
    device_id: &str,
) -> Result<bool> {
    let Some(index) = devices.iter().position(|device| device.id == device_id) else {
        return Ok(false);
    };
    let mut settings = settings_store.scanner();
    if settings.preferred_camera_index == index {
        return Ok(false);
    }
    settings.preferred_camera_index = index;
    settings_store.update_scanner(settings)?;
    Ok(true)
}

async fn print_camera_changes(mut updates: watch::Receiver<CameraSnapshot>) {
    let mut shown = updates.borrow_and_update().active_device_id.clone();
    while updates.changed().await.is_ok() {
        let active = updates.borrow_and_update().active_device_id.clone();
        // Pauses clear the active device; only announce a different camera.
        if let Some(id) = active {
            if shown.as_deref() != Some(id.as_str()) {
                println!("Scanning with camera {id}.");
                shown = Some(id);
            }
        }
    }
}

async fn print_scans(mut events: tokio::sync::broadcast::Receiver<ScanEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok(ScanEvent::NameResolved { session }) => {
                println!("Student ID: {}", session.decoded_id);
                println!("Name: {}", session.student_name.display());
                println!("Date: {}", session.date_key);
                println!("Time: {}", session.time_label);
                println!("Status: {}", session.status.as_str());
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}
