//! Error types for the scanning and attendance pipeline

use thiserror::Error;

/// Result type alias using ScanError
pub type Result<T> = std::result::Result<T, ScanError>;

/// Errors surfaced to the presentation layer.
///
/// None of these are fatal: every variant leaves the camera and the
/// controller in a state from which scanning can resume.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    /// The platform refused to enumerate capture devices
    #[error("Failed to list cameras: {0}")]
    DeviceEnumeration(String),

    /// Enumeration succeeded but returned nothing
    #[error("No cameras available")]
    NoDevices,

    /// The capture device could not be started
    #[error("Cannot start camera {device_id}: {reason}")]
    Start { device_id: String, reason: String },

    /// Start was requested for an id missing from the last enumeration
    #[error("Unknown camera: {0}")]
    UnknownDevice(String),

    /// A device switch was requested before any decode handlers were registered
    #[error("No decode handlers registered")]
    NoHandlers,

    /// Stopping the capture device failed
    #[error("Failed to stop camera: {0}")]
    Stop(String),

    /// Student record lookup failed
    #[error("Failed to load student: {0}")]
    Lookup(String),

    /// Attendance already exists for the date
    #[error("Attendance already recorded for {date_key}.")]
    DuplicateForDate { date_key: String },

    /// Store write (or the read preceding it) failed
    #[error("Failed to save attendance: {0}")]
    Persistence(String),

    /// The stored document cannot be read as a student record
    #[error("Student record {key} is incompatible: {reason}")]
    IncompatibleRecord { key: String, reason: String },

    /// Save was requested with no scan awaiting confirmation
    #[error("Please scan a QR code first.")]
    NoPendingScan,

    /// The scan session was dismissed before the operation finished
    #[error("Scan was dismissed")]
    Dismissed,
}

impl ScanError {
    /// Create a Start error
    pub fn start(device_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Start {
            device_id: device_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a Lookup error
    pub fn lookup(err: impl ToString) -> Self {
        Self::Lookup(err.to_string())
    }

    /// Create a Persistence error
    pub fn persistence(err: impl ToString) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Business-rule rejections are expected outcomes, everything else is a fault.
    pub fn is_fault(&self) -> bool {
        !matches!(
            self,
            ScanError::DuplicateForDate { .. } | ScanError::Dismissed | ScanError::NoPendingScan
        )
    }
}
