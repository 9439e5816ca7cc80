//! In-memory fakes for the store and channels, shared by the unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use taskmind_core::error::{Result, TaskMindError};
use taskmind_core::traits::{ChatSender, EmailSender, ReminderStore};
use taskmind_core::types::{
    Candidate, DeliveryEntry, OwnerContact, Priority, ReminderKind, ScanWindow, StoreTime, Task, TaskId,
};

pub fn fixed_now() -> StoreTime {
    StoreTime::from_store(Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap())
}

pub fn task_due(id: TaskId, deadline: DateTime<Utc>) -> Task {
    Task {
        id,
        user_id: 1,
        title: format!("Task {id}"),
        subject: Some("Physics".into()),
        description: Some("Read chapter 2".into()),
        deadline: Some(deadline),
        priority: Priority::Schedule,
        is_completed: false,
        notified_24h: false,
        notified_1h: false,
        created_at: None,
        updated_at: None,
    }
}

pub fn owner_with(telegram: bool, email: bool) -> OwnerContact {
    OwnerContact {
        user_id: 1,
        name: Some("Sari".into()),
        email: Some("sari@example.com".into()),
        telegram_chat_id: Some("1001".into()),
        telegram_enabled: telegram,
        email_enabled: email,
    }
}

/// Store with a frozen clock. Filters like the SQL query does and applies
/// flag writes to its own rows.
pub struct MemoryStore {
    now: StoreTime,
    rows: Mutex<Vec<Candidate>>,
    marks: Mutex<Vec<(TaskId, ReminderKind)>>,
    deliveries: Mutex<Vec<DeliveryEntry>>,
    now_calls: AtomicUsize,
    pub fail_fetch: AtomicBool,
    pub fail_mark: AtomicBool,
}

impl MemoryStore {
    pub fn new(now: StoreTime, rows: Vec<Candidate>) -> Self {
        Self {
            now,
            rows: Mutex::new(rows),
            marks: Mutex::new(Vec::new()),
            deliveries: Mutex::new(Vec::new()),
            now_calls: AtomicUsize::new(0),
            fail_fetch: AtomicBool::new(false),
            fail_mark: AtomicBool::new(false),
        }
    }

    /// How many times the clock was read.
    pub fn now_calls(&self) -> usize {
        self.now_calls.load(Ordering::SeqCst)
    }

    pub fn marks(&self) -> Vec<(TaskId, ReminderKind)> {
        self.marks.lock().unwrap().clone()
    }

    pub fn deliveries(&self) -> Vec<DeliveryEntry> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn task(&self, id: TaskId) -> Task {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.task.id == id)
            .map(|c| c.task.clone())
            .unwrap()
    }
}

#[async_trait]
impl ReminderStore for MemoryStore {
    async fn now(&self) -> Result<StoreTime> {
        self.now_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.now)
    }

    async fn fetch_candidates(&self, now: StoreTime, window: &ScanWindow) -> Result<Vec<Candidate>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(TaskMindError::Store("connection refused".into()));
        }
        let (from, to) = window.bounds(now);
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.task.is_completed)
            .filter(|c| c.task.deadline.is_some_and(|d| d >= from && d <= to))
            .cloned()
            .collect())
    }

    async fn mark_notified(&self, task_id: TaskId, kind: ReminderKind) -> Result<()> {
        if self.fail_mark.load(Ordering::SeqCst) {
            return Err(TaskMindError::Store("database is locked".into()));
        }
        self.marks.lock().unwrap().push((task_id, kind));
        if let Some(c) = self.rows.lock().unwrap().iter_mut().find(|c| c.task.id == task_id) {
            match kind {
                ReminderKind::TwentyFourHour => c.task.notified_24h = true,
                ReminderKind::OneHour => c.task.notified_1h = true,
            }
        }
        Ok(())
    }

    async fn record_delivery(&self, entry: &DeliveryEntry) -> Result<()> {
        self.deliveries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingChat {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatSender for RecordingChat {
    fn name(&self) -> &str {
        "recording-chat"
    }

    async fn send_chat_message(&self, chat_id: &str, text: &str) -> Result<()> {
        if self.fail {
            return Err(TaskMindError::Channel("Bad Request: chat not found".into()));
        }
        self.sent.lock().unwrap().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEmail {
    sent: Mutex<Vec<(String, String, String)>>,
    fail: bool,
}

impl RecordingEmail {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmail {
    fn name(&self) -> &str {
        "recording-email"
    }

    async fn send_email(&self, address: &str, subject: &str, html_body: &str) -> Result<()> {
        if self.fail {
            return Err(TaskMindError::Channel("550 mailbox unavailable".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), subject.to_string(), html_body.to_string()));
        Ok(())
    }
}

/// Chat sender that never answers within the test's timeout.
pub struct SlowChat {
    delay: Duration,
}

impl SlowChat {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ChatSender for SlowChat {
    fn name(&self) -> &str {
        "slow-chat"
    }

    async fn send_chat_message(&self, _chat_id: &str, _text: &str) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Chat sender that parks until the test releases it.
#[derive(Default)]
pub struct GatedChat {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl ChatSender for GatedChat {
    fn name(&self) -> &str {
        "gated-chat"
    }

    async fn send_chat_message(&self, _chat_id: &str, _text: &str) -> Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}
