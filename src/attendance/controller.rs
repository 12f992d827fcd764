use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::{
    audio::ScanCue,
    error::{Result, ScanError},
    store::{Document, DocumentStore, STUDENTS_COLLECTION},
};

use super::{
    date_label, time_label, AttendanceEntry, Clock, NameLookup, ScanPhase, ScanSession,
    StudentRecord, SystemClock,
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const EVENT_CAPACITY: usize = 64;

/// Notifications for the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScanEvent {
    Scanned { session: ScanSession },
    NameResolved { session: ScanSession },
    Saved { session: ScanSession },
    Rejected { session: ScanSession, date_key: String },
    Failed { session: ScanSession, error: String },
    Dismissed { session_id: Uuid },
}

/// Turns decoded payloads into confirmed attendance entries.
///
/// At most one scan is current at a time. Late lookup and save completions
/// only touch shared state when their session is still the current one and
/// has not been dismissed.
#[derive(Clone)]
pub struct AttendanceController {
    store: Arc<dyn DocumentStore>,
    cue: Arc<dyn ScanCue>,
    clock: Arc<dyn Clock>,
    collection: String,
    current: Arc<Mutex<Option<ScanSession>>>,
    events: broadcast::Sender<ScanEvent>,
}

impl AttendanceController {
    pub fn new(store: Arc<dyn DocumentStore>, cue: Arc<dyn ScanCue>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            cue,
            clock: Arc::new(SystemClock),
            collection: STUDENTS_COLLECTION.to_string(),
            current: Arc::new(Mutex::new(None)),
            events,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    pub async fn current(&self) -> Option<ScanSession> {
        self.current.lock().await.clone()
    }

    /// Opens a pending scan for `payload` and starts the name lookup in the
    /// background. Any previous scan is dismissed.
    pub async fn on_scan(&self, payload: &str) -> Result<ScanSession> {
        // Every decode beeps, even one that is rejected below.
        self.cue.play();

        let decoded_id = payload.trim();
        if decoded_id.is_empty() {
            return Err(ScanError::lookup("scanned code is empty"));
        }

        let now = self.clock.now();
        let session = ScanSession::new(decoded_id.to_string(), date_label(now), time_label(now));

        let previous = self.current.lock().await.replace(session.clone());
        if let Some(previous) = previous {
            previous.cancel_token.cancel();
            self.emit(ScanEvent::Dismissed {
                session_id: previous.id,
            });
        }

        log_info!("scanned {} at {} {}", session.decoded_id, session.date_key, session.time_label);
        self.emit(ScanEvent::Scanned {
            session: session.clone(),
        });

        tokio::spawn(self.clone().resolve_name(session.clone()));

        Ok(session)
    }

    /// Appends today's entry to the student's record, creating the record
    /// when it does not exist yet.
    pub async fn save(&self, session: &ScanSession) -> Result<AttendanceEntry> {
        let result = self.merge_entry(session).await;

        match &result {
            Ok(_) => log_info!("attendance saved for {} on {}", session.decoded_id, session.date_key),
            Err(err) if err.is_fault() => {
                log_warn!("saving attendance for {} failed: {err}", session.decoded_id)
            }
            Err(_) => {}
        }

        self.settle(session, &result).await;
        result
    }

    /// Closes the scan without writing. Returns whether it was the current one.
    pub async fn dismiss(&self, session: &ScanSession) -> bool {
        session.cancel_token.cancel();

        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|active| active.id == session.id) {
            *current = None;
            drop(current);
            self.emit(ScanEvent::Dismissed {
                session_id: session.id,
            });
            true
        } else {
            false
        }
    }

    async fn resolve_name(self, session: ScanSession) {
        let lookup = match self.store.get(&self.collection, &session.decoded_id).await {
            Ok(Some(document)) => match document.get("name").and_then(Value::as_str) {
                Some(name) if !name.is_empty() => NameLookup::Found(name.to_string()),
                _ => NameLookup::Unknown,
            },
            Ok(None) => {
                log_info!("no student record for {}", session.decoded_id);
                NameLookup::Unknown
            }
            Err(err) => {
                log_warn!("student lookup for {} failed: {err:#}", session.decoded_id);
                NameLookup::Failed
            }
        };

        let resolved = {
            let mut current = self.current.lock().await;
            match current.as_mut() {
                Some(active) if active.id == session.id && !session.is_dismissed() => {
                    active.student_name = lookup;
                    if active.phase == ScanPhase::Pending {
                        active.phase = ScanPhase::Ready;
                    }
                    Some(active.clone())
                }
                _ => None,
            }
        };

        if let Some(session) = resolved {
            self.emit(ScanEvent::NameResolved { session });
        }
    }

    async fn merge_entry(&self, session: &ScanSession) -> Result<AttendanceEntry> {
        let key = session.decoded_id.as_str();
        let entry = AttendanceEntry {
            time: session.time_label.clone(),
            status: session.status,
        };

        let existing = self
            .store
            .get(&self.collection, key)
            .await
            .map_err(|err| ScanError::persistence(format!("{err:#}")))?;

        match existing {
            Some(document) => {
                let mut record = StudentRecord::from_document(key, &document)?;
                record.record(&session.date_key, entry.clone())?;
                ensure_not_dismissed(session)?;

                // Only attendance is sent so the stored name is left alone.
                let mut partial = Document::new();
                partial.insert("attendance".into(), record.attendance_value());
                self.store
                    .update(&self.collection, key, partial)
                    .await
                    .map_err(|err| ScanError::persistence(format!("{err:#}")))?;
            }
            None => {
                let mut record =
                    StudentRecord::new(key, session.student_name.name_for_new_record());
                record.record(&session.date_key, entry.clone())?;
                ensure_not_dismissed(session)?;

                self.store
                    .set(&self.collection, key, record.to_document())
                    .await
                    .map_err(|err| ScanError::persistence(format!("{err:#}")))?;
            }
        }

        Ok(entry)
    }

    async fn settle(&self, session: &ScanSession, result: &Result<AttendanceEntry>) {
        let mut current = self.current.lock().await;
        let Some(active) = current
            .as_mut()
            .filter(|active| active.id == session.id && !session.is_dismissed())
        else {
            return;
        };

        let event = match result {
            Ok(_) => {
                active.phase = ScanPhase::Saved;
                let saved = active.clone();
                *current = None;
                ScanEvent::Saved { session: saved }
            }
            Err(ScanError::DuplicateForDate { date_key }) => {
                active.phase = ScanPhase::Rejected;
                ScanEvent::Rejected {
                    session: active.clone(),
                    date_key: date_key.clone(),
                }
            }
            Err(ScanError::Dismissed) => return,
            Err(err) => {
                active.phase = ScanPhase::Failed;
                ScanEvent::Failed {
                    session: active.clone(),
                    error: err.to_string(),
                }
            }
        };
        drop(current);
        self.emit(event);
    }

    fn emit(&self, event: ScanEvent) {
        let _ = self.events.send(event);
    }
}

fn ensure_not_dismissed(session: &ScanSession) -> Result<()> {
    if session.is_dismissed() {
        Err(ScanError::Dismissed)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SilentCue;
    use crate::attendance::FixedClock;
    use crate::store::MemoryStore;
    use anyhow::bail;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// MemoryStore with switchable failures and latency.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing_gets: AtomicUsize,
        fail_writes: AtomicBool,
        get_delay_ms: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn get(&self, collection: &str, key: &str) -> anyhow::Result<Option<Document>> {
            let delay = self.get_delay_ms.load(Ordering::SeqCst) as u64;
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self
                .failing_gets
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                bail!("UNAVAILABLE: transient backend error");
            }
            self.inner.get(collection, key).await
        }

        async fn set(&self, collection: &str, key: &str, document: Document) -> anyhow::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                bail!("PERMISSION_DENIED");
            }
            self.inner.set(collection, key, document).await
        }

        async fn update(&self, collection: &str, key: &str, partial: Document) -> anyhow::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                bail!("PERMISSION_DENIED");
            }
            self.inner.update(collection, key, partial).await
        }
    }

    fn on(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn controller(store: Arc<dyn DocumentStore>, at: NaiveDateTime) -> AttendanceController {
        AttendanceController::new(store, Arc::new(SilentCue)).with_clock(Arc::new(FixedClock(at)))
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    async fn next_resolved(rx: &mut broadcast::Receiver<ScanEvent>) -> ScanSession {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(ScanEvent::NameResolved { session }) = rx.recv().await {
                    return session;
                }
            }
        })
        .await
        .expect("name lookup did not resolve")
    }

    #[tokio::test]
    async fn test_unknown_student_creates_record() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(store.clone(), on(5, 9, 5));
        let mut events = controller.subscribe();

        let session = controller.on_scan(" S001\n").await.unwrap();
        assert_eq!(session.decoded_id, "S001");
        assert_eq!(session.student_name, NameLookup::Pending);
        assert_eq!(session.date_key, "January 5, 2025");
        assert_eq!(session.time_label, "09:05 AM");

        let resolved = next_resolved(&mut events).await;
        assert_eq!(resolved.student_name.display(), "Unknown Student");
        assert_eq!(resolved.phase, ScanPhase::Ready);

        controller.save(&resolved).await.unwrap();

        let stored = store.get("students", "S001").await.unwrap().unwrap();
        assert_eq!(
            Value::Object(stored),
            json!({
                "name": "Unknown",
                "attendance": {"January 5, 2025": [{"time": "09:05 AM", "status": "Present"}]}
            })
        );
        assert!(controller.current().await.is_none());
    }

    #[tokio::test]
    async fn test_lookup_finds_name() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("students", "S002", doc(json!({"name": "Ana Cruz"})))
            .await;
        let controller = controller(store, on(5, 9, 5));
        let mut events = controller.subscribe();

        controller.on_scan("S002").await.unwrap();
        let resolved = next_resolved(&mut events).await;
        assert_eq!(resolved.student_name, NameLookup::Found("Ana Cruz".into()));
        assert_eq!(controller.current().await.unwrap().student_name.display(), "Ana Cruz");
    }

    #[tokio::test]
    async fn test_dismiss_produces_no_write() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(store.clone(), on(5, 9, 5));

        let session = controller.on_scan("S001").await.unwrap();
        assert!(controller.dismiss(&session).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.write_count(), 0);
        assert!(controller.current().await.is_none());
        assert!(!controller.dismiss(&session).await);
    }

    #[tokio::test]
    async fn test_second_save_same_day_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("students", "S003", doc(json!({"name": "Bo"})))
            .await;
        let controller = controller(store.clone(), on(5, 9, 5));

        let session = controller.on_scan("S003").await.unwrap();
        controller.save(&session).await.unwrap();

        let err = controller.save(&session).await.unwrap_err();
        assert_eq!(
            err,
            ScanError::DuplicateForDate {
                date_key: "January 5, 2025".into()
            }
        );

        let stored = store.get("students", "S003").await.unwrap().unwrap();
        assert_eq!(stored["attendance"]["January 5, 2025"].as_array().unwrap().len(), 1);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_keeps_session_open() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(
                "students",
                "S003",
                doc(json!({
                    "name": "Bo",
                    "attendance": {"January 5, 2025": [{"time": "08:00 AM", "status": "Present"}]}
                })),
            )
            .await;
        let controller = controller(store.clone(), on(5, 9, 5));
        let mut events = controller.subscribe();

        let session = controller.on_scan("S003").await.unwrap();
        let resolved = next_resolved(&mut events).await;
        assert!(matches!(
            controller.save(&resolved).await,
            Err(ScanError::DuplicateForDate { .. })
        ));

        let current = controller.current().await.unwrap();
        assert_eq!(current.id, session.id);
        assert_eq!(current.phase, ScanPhase::Rejected);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_new_day_adds_key_without_touching_previous() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("students", "S004", doc(json!({"name": "Cy"})))
            .await;

        let day_one = controller(store.clone(), on(5, 8, 0));
        let session = day_one.on_scan("S004").await.unwrap();
        day_one.save(&session).await.unwrap();

        let day_two = controller(store.clone(), on(6, 8, 30));
        let session = day_two.on_scan("S004").await.unwrap();
        day_two.save(&session).await.unwrap();

        let stored = store.get("students", "S004").await.unwrap().unwrap();
        assert_eq!(
            stored["attendance"],
            json!({
                "January 5, 2025": [{"time": "08:00 AM", "status": "Present"}],
                "January 6, 2025": [{"time": "08:30 AM", "status": "Present"}]
            })
        );
        assert_eq!(stored["name"], "Cy");
    }

    #[tokio::test]
    async fn test_failed_lookup_does_not_clobber_existing_name() {
        let store = Arc::new(FlakyStore::default());
        store
            .inner
            .insert("students", "S005", doc(json!({"name": "Dee"})))
            .await;
        store.failing_gets.store(1, Ordering::SeqCst);
        let controller = controller(store.clone(), on(5, 9, 5));
        let mut events = controller.subscribe();

        controller.on_scan("S005").await.unwrap();
        let resolved = next_resolved(&mut events).await;
        assert_eq!(resolved.student_name.display(), "Error loading name");

        controller.save(&resolved).await.unwrap();
        let stored = store.inner.get("students", "S005").await.unwrap().unwrap();
        assert_eq!(stored["name"], "Dee");
        assert_eq!(stored["attendance"]["January 5, 2025"][0]["status"], "Present");
    }

    #[tokio::test]
    async fn test_failed_lookup_new_record_uses_generic_name() {
        let store = Arc::new(FlakyStore::default());
        store.failing_gets.store(1, Ordering::SeqCst);
        let controller = controller(store.clone(), on(5, 9, 5));
        let mut events = controller.subscribe();

        controller.on_scan("S006").await.unwrap();
        let resolved = next_resolved(&mut events).await;
        controller.save(&resolved).await.unwrap();

        let stored = store.inner.get("students", "S006").await.unwrap().unwrap();
        assert_eq!(stored["name"], "Unknown");
    }

    #[tokio::test]
    async fn test_write_failure_is_surfaced_and_retryable() {
        let store = Arc::new(FlakyStore::default());
        store.fail_writes.store(true, Ordering::SeqCst);
        let controller = controller(store.clone(), on(5, 9, 5));

        let session = controller.on_scan("S007").await.unwrap();
        let err = controller.save(&session).await.unwrap_err();
        assert!(matches!(err, ScanError::Persistence(_)));
        assert_eq!(controller.current().await.unwrap().phase, ScanPhase::Failed);

        store.fail_writes.store(false, Ordering::SeqCst);
        controller.save(&session).await.unwrap();
        assert!(controller.current().await.is_none());
        assert_eq!(store.inner.write_count(), 1);
    }

    #[tokio::test]
    async fn test_dismiss_during_save_skips_write() {
        let store = Arc::new(FlakyStore::default());
        store.get_delay_ms.store(30, Ordering::SeqCst);
        let controller = controller(store.clone(), on(5, 9, 5));

        let session = controller.on_scan("S008").await.unwrap();
        let save = tokio::spawn({
            let controller = controller.clone();
            let session = session.clone();
            async move { controller.save(&session).await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        controller.dismiss(&session).await;

        assert_eq!(save.await.unwrap().unwrap_err(), ScanError::Dismissed);
        assert_eq!(store.inner.write_count(), 0);
    }

    #[tokio::test]
    async fn test_late_lookup_ignored_after_new_scan() {
        let store = Arc::new(FlakyStore::default());
        store
            .inner
            .insert("students", "OLD", doc(json!({"name": "Old"})))
            .await;
        store.get_delay_ms.store(20, Ordering::SeqCst);
        let controller = controller(store.clone(), on(5, 9, 5));
        let mut events = controller.subscribe();

        let first = controller.on_scan("OLD").await.unwrap();
        let second = controller.on_scan("NEW").await.unwrap();
        assert!(first.is_dismissed());

        let resolved = next_resolved(&mut events).await;
        assert_eq!(resolved.id, second.id);
        assert_eq!(resolved.student_name, NameLookup::Unknown);
        assert_eq!(controller.current().await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_legacy_record_is_migrated_on_save() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(
                "students",
                "S009",
                doc(json!({
                    "name": "Eve",
                    "attendance": {"date": "January 4, 2025", "time": "10:00 AM", "status": "Present"}
                })),
            )
            .await;
        let controller = controller(store.clone(), on(5, 9, 5));

        let session = controller.on_scan("S009").await.unwrap();
        controller.save(&session).await.unwrap();

        let stored = store.get("students", "S009").await.unwrap().unwrap();
        assert_eq!(
            stored["attendance"],
            json!({
                "January 4, 2025": [{"time": "10:00 AM", "status": "Present"}],
                "January 5, 2025": [{"time": "09:05 AM", "status": "Present"}]
            })
        );
    }

    #[derive(Default)]
    struct CountingCue(AtomicUsize);

    impl ScanCue for CountingCue {
        fn play(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_every_decode_plays_the_cue() {
        let cue = Arc::new(CountingCue::default());
        let controller = AttendanceController::new(Arc::new(MemoryStore::new()), cue.clone())
            .with_clock(Arc::new(FixedClock(on(5, 9, 5))));

        controller.on_scan("S001").await.unwrap();
        assert_eq!(cue.0.load(Ordering::SeqCst), 1);

        controller.on_scan("S002").await.unwrap();
        assert_eq!(cue.0.load(Ordering::SeqCst), 2);

        assert!(controller.on_scan("").await.is_err());
        assert_eq!(cue.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_payload_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(store, on(5, 9, 5));
        assert!(matches!(
            controller.on_scan("   ").await,
            Err(ScanError::Lookup(_))
        ));
        assert!(controller.current().await.is_none());
    }
}
