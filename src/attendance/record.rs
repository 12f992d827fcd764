//! Student record document shape.
//!
//! ```json
//! { "name": "Ana", "attendance": { "January 5, 2025": [{ "time": "09:05 AM", "status": "Present" }] } }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ScanError};
use crate::store::Document;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttendanceEntry {
    pub time: String,
    pub status: AttendanceStatus,
}

/// Per-day attendance, keyed by date label. Each day's list is append-only.
pub type AttendanceLog = BTreeMap<String, Vec<AttendanceEntry>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRecord {
    pub id: String,
    pub name: String,
    pub attendance: AttendanceLog,
}

impl StudentRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            attendance: AttendanceLog::new(),
        }
    }

    /// Reads a stored document, migrating the older single-entry layouts
    /// (`attendance: { date, time, status }` and a bare entry per day) on
    /// the way.
    pub fn from_document(id: &str, document: &Document) -> Result<Self> {
        let name = document
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let attendance = match document.get("attendance") {
            None | Some(Value::Null) => AttendanceLog::new(),
            Some(Value::Object(fields)) if is_legacy_entry(fields) => migrate_legacy(id, fields)?,
            Some(value) => serde_json::from_value::<BTreeMap<String, StoredDay>>(value.clone())
                .map_err(|err| incompatible(id, format!("unreadable attendance: {err}")))?
                .into_iter()
                .map(|(date, day)| (date, day.into_entries()))
                .collect(),
        };

        Ok(Self {
            id: id.to_string(),
            name,
            attendance,
        })
    }

    pub fn has_attendance_on(&self, date_key: &str) -> bool {
        self.attendance
            .get(date_key)
            .is_some_and(|entries| !entries.is_empty())
    }

    /// Appends `entry` under `date_key` unless that day already has one.
    pub fn record(&mut self, date_key: &str, entry: AttendanceEntry) -> Result<()> {
        if self.has_attendance_on(date_key) {
            return Err(ScanError::DuplicateForDate {
                date_key: date_key.to_string(),
            });
        }
        self.attendance
            .entry(date_key.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    pub fn attendance_value(&self) -> Value {
        serde_json::to_value(&self.attendance).unwrap_or_else(|_| Value::Object(Document::new()))
    }

    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        document.insert("name".into(), Value::String(self.name.clone()));
        document.insert("attendance".into(), self.attendance_value());
        document
    }
}

/// One day as stored. Older records overwrote a single entry per day.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredDay {
    Entries(Vec<AttendanceEntry>),
    Single(AttendanceEntry),
}

impl StoredDay {
    fn into_entries(self) -> Vec<AttendanceEntry> {
        match self {
            StoredDay::Entries(entries) => entries,
            StoredDay::Single(entry) => vec![entry],
        }
    }
}

fn is_legacy_entry(fields: &Document) -> bool {
    fields.contains_key("status") && fields.values().all(|value| !value.is_array())
}

fn migrate_legacy(id: &str, fields: &Document) -> Result<AttendanceLog> {
    let text = |field: &str| fields.get(field).and_then(Value::as_str);

    let date = text("date").ok_or_else(|| incompatible(id, "single attendance entry has no date"))?;
    let time = text("time").unwrap_or_default().to_string();
    let status = match text("status") {
        Some("Present") => AttendanceStatus::Present,
        other => {
            return Err(incompatible(
                id,
                format!("unsupported attendance status {other:?}"),
            ))
        }
    };

    let mut log = AttendanceLog::new();
    log.insert(date.to_string(), vec![AttendanceEntry { time, status }]);
    Ok(log)
}

fn incompatible(id: &str, reason: impl Into<String>) -> ScanError {
    ScanError::IncompatibleRecord {
        key: id.to_string(),
        reason: reason.into(),
    }
}
