use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::AttendanceStatus;

pub const UNKNOWN_STUDENT: &str = "Unknown Student";
pub const LOOKUP_FAILED: &str = "Error loading name";
/// Name written when a scan creates a brand new record without a known name.
pub const NEW_RECORD_NAME: &str = "Unknown";

/// Progress of the student-name lookup started by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameLookup {
    Pending,
    Found(String),
    Unknown,
    Failed,
}

impl NameLookup {
    pub fn display(&self) -> &str {
        match self {
            NameLookup::Pending => "",
            NameLookup::Found(name) => name,
            NameLookup::Unknown => UNKNOWN_STUDENT,
            NameLookup::Failed => LOOKUP_FAILED,
        }
    }

    /// Name to persist when the save creates the record.
    pub fn name_for_new_record(&self) -> &str {
        match self {
            NameLookup::Found(name) => name,
            _ => NEW_RECORD_NAME,
        }
    }
}

impl Serialize for NameLookup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.display())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScanPhase {
    Pending,
    Ready,
    Saved,
    Rejected,
    Failed,
}

/// A decoded scan awaiting confirmation. Never persisted itself.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSession {
    pub id: Uuid,
    pub decoded_id: String,
    pub student_name: NameLookup,
    pub date_key: String,
    pub time_label: String,
    pub status: AttendanceStatus,
    pub phase: ScanPhase,
    #[serde(skip)]
    pub(crate) cancel_token: CancellationToken,
}

impl ScanSession {
    pub(crate) fn new(decoded_id: String, date_key: String, time_label: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            decoded_id,
            student_name: NameLookup::Pending,
            date_key,
            time_label,
            status: AttendanceStatus::Present,
            phase: ScanPhase::Pending,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn is_dismissed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}
