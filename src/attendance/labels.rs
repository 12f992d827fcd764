use chrono::{Local, NaiveDateTime};

/// Source of the wall-clock time stamped on scans.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// `January 5, 2025`
pub fn date_label(at: NaiveDateTime) -> String {
    at.format("%B %-d, %Y").to_string()
}

/// `09:05 AM`
pub fn time_label(at: NaiveDateTime) -> String {
    at.format("%I:%M %p").to_string()
}
