use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

use crate::camera::FrameSizeHint;
use crate::store::STUDENTS_COLLECTION;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerSettings {
    /// Index into the enumerated camera list picked on startup.
    pub preferred_camera_index: usize,
    pub fps: u32,
    pub qrbox: u32,
    pub sound_enabled: bool,
    pub students_collection: String,
    /// SQLite document store; in-memory when unset.
    pub database_path: Option<PathBuf>,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        let hint = FrameSizeHint::default();
        Self {
            preferred_camera_index: 1,
            fps: hint.fps,
            qrbox: hint.qrbox,
            sound_enabled: true,
            students_collection: STUDENTS_COLLECTION.into(),
            database_path: None,
        }
    }
}

impl ScannerSettings {
    pub fn frame_hint(&self) -> FrameSizeHint {
        FrameSizeHint {
            fps: self.fps,
            qrbox: self.qrbox,
        }
    }

    /// `QR_ATTENDANCE_DB` overrides the configured database path.
    pub fn apply_env(mut self) -> Self {
        if let Some(path) = std::env::var_os("QR_ATTENDANCE_DB") {
            if !path.is_empty() {
                self.database_path = Some(PathBuf::from(path));
            }
        }
        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ScannerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            ScannerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn scanner(&self) -> ScannerSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update_scanner(&self, settings: ScannerSettings) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &ScannerSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
