pub mod controller;
pub mod labels;
pub mod record;
pub mod session;

pub use controller::{AttendanceController, ScanEvent};
pub use labels::{date_label, time_label, Clock, FixedClock, SystemClock};
pub use record::{AttendanceEntry, AttendanceLog, AttendanceStatus, StudentRecord};
pub use session::{NameLookup, ScanPhase, ScanSession, LOOKUP_FAILED, UNKNOWN_STUDENT};
