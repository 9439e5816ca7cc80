//! SQLite-backed reminder store, shared with the TaskMind web app.
//!
//! The web app owns `users` and `tasks`; this store only reads them and sets
//! the two sent-flags. Deadlines are compared with SQLite's own date
//! functions, and `now()` reads SQLite's clock, so classification never mixes
//! clocks. Offsets in stored deadlines (`+07:00`, `Z`) are normalized by
//! SQLite; naive values are taken as UTC.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use taskmind_core::error::{Result, TaskMindError};
use taskmind_core::traits::ReminderStore;
use taskmind_core::types::{
    Candidate, DeliveryEntry, OwnerContact, Priority, ReminderKind, ScanWindow, StoreTime, Task, TaskId,
};

const ISO_UTC: &str = "%Y-%m-%dT%H:%M:%fZ";

const SELECT_CANDIDATE: &str = "
    SELECT t.id, t.user_id, t.title, t.subject, t.description,
           strftime('%Y-%m-%dT%H:%M:%fZ', t.deadline),
           t.priority_level, COALESCE(t.is_completed, 0),
           COALESCE(t.notified_24h, 0), COALESCE(t.notified_1h, 0),
           strftime('%Y-%m-%dT%H:%M:%fZ', t.created_at),
           strftime('%Y-%m-%dT%H:%M:%fZ', t.updated_at),
           u.username, u.email, CAST(u.telegram_chat_id AS TEXT),
           COALESCE(u.telegram_enabled, 0), COALESCE(u.email_enabled, 0)
    FROM tasks t
    JOIN users u ON t.user_id = u.id";

/// Reminder store over the shared SQLite database.
pub struct ReminderDb {
    conn: Mutex<Connection>,
}

/// A row of the delivery log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLogRow {
    pub id: i64,
    pub task_id: TaskId,
    pub kind: String,
    pub channel: Option<String>,
    pub status: String,
    pub detail: Option<String>,
    pub created_at: String,
}

impl ReminderDb {
    /// Open or create the database and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| store_err("DB open", e))?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|e| store_err("WAL", e))?;
        tracing::debug!("SQLite journal mode: {mode}");
        Self::init(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| store_err("DB open", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| store_err("foreign_keys", e))?;
        // The web app writes to the same file.
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| store_err("busy_timeout", e))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| TaskMindError::Store(format!("DB lock poisoned: {e}")))?;
        f(&conn)
    }

    /// Create tables and add reminder columns to older databases.
    fn migrate(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT,
                email TEXT,
                password_hash TEXT,
                telegram_chat_id TEXT,
                telegram_enabled INTEGER NOT NULL DEFAULT 1,
                email_enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                subject TEXT,
                description TEXT,
                deadline TEXT,                   -- ISO-8601, optional offset
                priority_level TEXT NOT NULL DEFAULT 'schedule',
                is_completed INTEGER NOT NULL DEFAULT 0,
                notified_24h INTEGER NOT NULL DEFAULT 0,
                notified_1h INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_open ON tasks(is_completed, deadline);

            -- One row per channel attempt
            CREATE TABLE IF NOT EXISTS notification_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                kind TEXT NOT NULL,              -- '24h', '1h'
                channel TEXT,                    -- 'telegram', 'email', NULL = no channel
                status TEXT NOT NULL,            -- 'sent', 'failed', 'skipped'
                detail TEXT,
                created_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| store_err("Migration", e))?;

            // Columns added after the first release (safe to fail if present)
            let _ = conn.execute("ALTER TABLE tasks ADD COLUMN notified_24h INTEGER NOT NULL DEFAULT 0", []);
            let _ = conn.execute("ALTER TABLE tasks ADD COLUMN notified_1h INTEGER NOT NULL DEFAULT 0", []);
            let _ = conn.execute("ALTER TABLE users ADD COLUMN telegram_enabled INTEGER NOT NULL DEFAULT 1", []);
            let _ = conn.execute("ALTER TABLE users ADD COLUMN email_enabled INTEGER NOT NULL DEFAULT 1", []);
            Ok(())
        })
    }

    /// One task joined with its owner, regardless of deadline or flags.
    pub fn load_candidate(&self, task_id: TaskId) -> Result<Option<Candidate>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{SELECT_CANDIDATE} WHERE t.id = ?1"), [task_id], candidate_from_row)
                .optional()
                .map_err(|e| store_err("Load task", e))
        })
    }

    /// Most recent delivery log rows, newest first.
    pub fn recent_deliveries(&self, limit: usize) -> Result<Vec<DeliveryLogRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, task_id, kind, channel, status, detail, created_at
                     FROM notification_log ORDER BY id DESC LIMIT ?1",
                )
                .map_err(|e| store_err("Prepare deliveries", e))?;
            let rows = stmt
                .query_map([limit as i64], |row| {
                    Ok(DeliveryLogRow {
                        id: row.get(0)?,
                        task_id: row.get(1)?,
                        kind: row.get(2)?,
                        channel: row.get(3)?,
                        status: row.get(4)?,
                        detail: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })
                .map_err(|e| store_err("Query deliveries", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| store_err("Read deliveries", e))
        })
    }
}

#[async_trait]
impl ReminderStore for ReminderDb {
    async fn now(&self) -> Result<StoreTime> {
        let raw: String = self.with_conn(|conn| {
            conn.query_row(&format!("SELECT strftime('{ISO_UTC}', 'now')"), [], |row| row.get(0))
                .map_err(|e| store_err("Read clock", e))
        })?;
        parse_utc(&raw)
            .map(StoreTime::from_store)
            .ok_or_else(|| TaskMindError::Store(format!("Unparsable store time: {raw}")))
    }

    async fn fetch_candidates(&self, now: StoreTime, window: &ScanWindow) -> Result<Vec<Candidate>> {
        let (from, to) = window.bounds(now);
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{SELECT_CANDIDATE}
                     WHERE COALESCE(t.is_completed, 0) = 0
                       AND t.deadline IS NOT NULL
                       AND (COALESCE(t.notified_24h, 0) = 0 OR COALESCE(t.notified_1h, 0) = 0)
                       AND (COALESCE(u.telegram_enabled, 0) = 1 OR COALESCE(u.email_enabled, 0) = 1)
                       AND julianday(t.deadline) BETWEEN julianday(?1) AND julianday(?2)
                     ORDER BY julianday(t.deadline)"
                ))
                .map_err(|e| store_err("Prepare scan", e))?;
            let rows = stmt
                .query_map(params![sql_time(from), sql_time(to)], candidate_from_row)
                .map_err(|e| store_err("Scan", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| store_err("Read scan row", e))
        })
    }

    async fn mark_notified(&self, task_id: TaskId, kind: ReminderKind) -> Result<()> {
        let sql = match kind {
            ReminderKind::TwentyFourHour => "UPDATE tasks SET notified_24h = 1 WHERE id = ?1",
            ReminderKind::OneHour => "UPDATE tasks SET notified_1h = 1 WHERE id = ?1",
        };
        let changed = self.with_conn(|conn| {
            conn.execute(sql, [task_id])
                .map_err(|e| store_err("Mark notified", e))
        })?;
        if changed == 0 {
            tracing::debug!("Task {task_id} vanished before its {kind} flag was set");
        }
        Ok(())
    }

    async fn record_delivery(&self, entry: &DeliveryEntry) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO notification_log (task_id, kind, channel, status, detail, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, strftime('{ISO_UTC}', 'now'))"
                ),
                params![
                    entry.task_id,
                    entry.kind.as_str(),
                    entry.channel.map(|c| c.as_str()),
                    entry.status.as_str(),
                    entry.detail,
                ],
            )
            .map_err(|e| store_err("Record delivery", e))?;
            Ok(())
        })
    }
}

fn candidate_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candidate> {
    let deadline: Option<String> = row.get(5)?;
    let priority: Option<String> = row.get(6)?;
    let created_at: Option<String> = row.get(10)?;
    let updated_at: Option<String> = row.get(11)?;

    let task = Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        subject: row.get(3)?,
        description: row.get(4)?,
        deadline: deadline.as_deref().and_then(parse_utc),
        priority: Priority::parse(priority.as_deref().unwrap_or("schedule")),
        is_completed: row.get::<_, i64>(7)? != 0,
        notified_24h: row.get::<_, i64>(8)? != 0,
        notified_1h: row.get::<_, i64>(9)? != 0,
        created_at: created_at.as_deref().and_then(parse_utc),
        updated_at: updated_at.as_deref().and_then(parse_utc),
    };
    let owner = OwnerContact {
        user_id: task.user_id,
        name: row.get(12)?,
        email: row.get(13)?,
        telegram_chat_id: row.get(14)?,
        telegram_enabled: row.get::<_, i64>(15)? != 0,
        email_enabled: row.get::<_, i64>(16)? != 0,
    };
    Ok(Candidate { task, owner })
}

fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn sql_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn store_err(context: &str, e: rusqlite::Error) -> TaskMindError {
    TaskMindError::Store(format!("{context}: {e}"))
}

#[cfg(test)]
impl ReminderDb {
    pub(crate) fn insert_user(&self, email: Option<&str>, chat_id: Option<&str>, telegram: bool, mail: bool) -> i64 {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, telegram_chat_id, telegram_enabled, email_enabled)
                 VALUES ('Sari', ?1, ?2, ?3, ?4)",
                params![email, chat_id, telegram as i32, mail as i32],
            )
            .unwrap();
            Ok(conn.last_insert_rowid())
        })
        .unwrap()
    }

    pub(crate) fn insert_task(&self, user_id: i64, title: &str, deadline: Option<&str>, completed: bool) -> TaskId {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (user_id, title, subject, description, deadline, priority_level, is_completed)
                 VALUES (?1, ?2, 'Biology', 'Draw the cell diagram', ?3, 'do_first', ?4)",
                params![user_id, title, deadline, completed as i32],
            )
            .unwrap();
            Ok(conn.last_insert_rowid())
        })
        .unwrap()
    }

    pub(crate) fn flags(&self, task_id: TaskId) -> (bool, bool) {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT notified_24h, notified_1h FROM tasks WHERE id = ?1",
                    [task_id],
                    |row| Ok((row.get::<_, i64>(0)? != 0, row.get::<_, i64>(1)? != 0)),
                )
                .unwrap())
        })
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use taskmind_core::types::{ChannelKind, DeliveryStatus};

    fn iso(ts: DateTime<Utc>) -> String {
        sql_time(ts)
    }

    #[tokio::test]
    async fn test_open_and_migrate() {
        let db = ReminderDb::open_in_memory().unwrap();
        // running migrations twice is harmless
        db.migrate().unwrap();
        assert!(db.recent_deliveries(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_clock_is_close_to_utc() {
        let db = ReminderDb::open_in_memory().unwrap();
        let now = db.now().await.unwrap();
        let drift = (now.get() - Utc::now()).num_seconds().abs();
        assert!(drift < 5);
    }

    #[tokio::test]
    async fn test_scan_window_filters() {
        let db = ReminderDb::open_in_memory().unwrap();
        let now = db.now().await.unwrap();
        let user = db.insert_user(Some("sari@example.com"), Some("1001"), true, true);

        let in_24h = db.insert_task(user, "due tomorrow", Some(&iso(now.get() + Duration::hours(25))), false);
        let overdue = db.insert_task(user, "just passed", Some(&iso(now.get() - Duration::minutes(10))), false);
        db.insert_task(user, "too far", Some(&iso(now.get() + Duration::hours(40))), false);
        db.insert_task(user, "long gone", Some(&iso(now.get() - Duration::hours(3))), false);
        db.insert_task(user, "done", Some(&iso(now.get() + Duration::hours(2))), true);
        db.insert_task(user, "no deadline", None, false);

        let found = db.fetch_candidates(now, &ScanWindow::default()).await.unwrap();
        let ids: Vec<TaskId> = found.iter().map(|c| c.task.id).collect();
        assert_eq!(ids, vec![overdue, in_24h]);

        let c = &found[1];
        assert_eq!(c.task.priority, Priority::DoFirst);
        assert_eq!(c.owner.name.as_deref(), Some("Sari"));
        assert_eq!(c.owner.email.as_deref(), Some("sari@example.com"));
        assert_eq!(c.owner.telegram_chat_id.as_deref(), Some("1001"));
        assert!(c.task.hours_remaining(now).unwrap() > 24.9);
    }

    #[tokio::test]
    async fn test_offset_deadlines_are_normalized() {
        let db = ReminderDb::open_in_memory().unwrap();
        let now = db.now().await.unwrap();
        let user = db.insert_user(Some("a@b.c"), None, false, true);

        // 2h from now, written in UTC+07:00
        let local = (now.get() + Duration::hours(2))
            .with_timezone(&chrono::FixedOffset::east_opt(7 * 3600).unwrap())
            .to_rfc3339();
        let id = db.insert_task(user, "jakarta time", Some(&local), false);

        let found = db.fetch_candidates(now, &ScanWindow::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].task.id, id);
        let h = found[0].task.hours_remaining(now).unwrap();
        assert!((h - 2.0).abs() < 0.01, "got {h}");
    }

    #[tokio::test]
    async fn test_users_without_channels_and_fully_notified_tasks_are_skipped() {
        let db = ReminderDb::open_in_memory().unwrap();
        let now = db.now().await.unwrap();
        let silent = db.insert_user(Some("a@b.c"), Some("1"), false, false);
        db.insert_task(silent, "muted", Some(&iso(now.get() + Duration::hours(2))), false);

        let user = db.insert_user(Some("a@b.c"), None, false, true);
        let done = db.insert_task(user, "both sent", Some(&iso(now.get() + Duration::hours(2))), false);
        db.mark_notified(done, ReminderKind::TwentyFourHour).await.unwrap();
        db.mark_notified(done, ReminderKind::OneHour).await.unwrap();

        assert!(db.fetch_candidates(now, &ScanWindow::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_notified_is_idempotent_and_independent() {
        let db = ReminderDb::open_in_memory().unwrap();
        let user = db.insert_user(Some("a@b.c"), None, false, true);
        let id = db.insert_task(user, "essay", Some("2030-01-01T00:00:00Z"), false);

        db.mark_notified(id, ReminderKind::OneHour).await.unwrap();
        db.mark_notified(id, ReminderKind::OneHour).await.unwrap();
        assert_eq!(db.flags(id), (false, true));

        db.mark_notified(id, ReminderKind::TwentyFourHour).await.unwrap();
        assert_eq!(db.flags(id), (true, true));

        // missing rows are not an error
        db.mark_notified(9999, ReminderKind::OneHour).await.unwrap();
    }

    #[tokio::test]
    async fn test_record_and_list_deliveries() {
        let db = ReminderDb::open_in_memory().unwrap();
        for (channel, status) in [
            (Some(ChannelKind::Telegram), DeliveryStatus::Sent),
            (Some(ChannelKind::Email), DeliveryStatus::Failed),
            (None, DeliveryStatus::Skipped),
        ] {
            db.record_delivery(&DeliveryEntry {
                task_id: 5,
                kind: ReminderKind::TwentyFourHour,
                channel,
                status,
                detail: None,
            })
            .await
            .unwrap();
        }

        let rows = db.recent_deliveries(2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, "skipped");
        assert_eq!(rows[0].channel, None);
        assert_eq!(rows[1].channel.as_deref(), Some("email"));
        assert_eq!(rows[1].kind, "24h");
    }

    #[tokio::test]
    async fn test_null_columns_from_web_app_do_not_abort_scan() {
        // Tables created by an older web app, without NOT NULL constraints
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT, username TEXT, email TEXT, password_hash TEXT,
                telegram_chat_id TEXT, telegram_enabled INTEGER, email_enabled INTEGER
             );
             CREATE TABLE tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER NOT NULL, title TEXT NOT NULL,
                subject TEXT, description TEXT, deadline TEXT, priority_level TEXT NOT NULL DEFAULT 'schedule',
                is_completed INTEGER, notified_24h INTEGER, notified_1h INTEGER, created_at TEXT, updated_at TEXT
             );",
        )
        .unwrap();
        let db = ReminderDb::init(conn).unwrap();
        let now = db.now().await.unwrap();
        let due = iso(now.get() + Duration::hours(25));

        let legacy = db.insert_user(Some("old@example.com"), Some("7"), true, true);
        let healthy = db.insert_user(Some("sari@example.com"), None, false, true);
        let legacy_task = db.insert_task(legacy, "legacy", Some(&due), false);
        let healthy_task = db.insert_task(healthy, "healthy", Some(&due), false);
        db.with_conn(|conn| {
            conn.execute("UPDATE users SET email_enabled = NULL WHERE id = ?1", [legacy])
                .unwrap();
            conn.execute(
                "UPDATE tasks SET is_completed = NULL, notified_1h = NULL WHERE id = ?1",
                [legacy_task],
            )
            .unwrap();
            Ok(())
        })
        .unwrap();

        let found = db.fetch_candidates(now, &ScanWindow::default()).await.unwrap();
        let mut ids: Vec<TaskId> = found.iter().map(|c| c.task.id).collect();
        ids.sort();
        assert_eq!(ids, vec![legacy_task, healthy_task]);

        let old = found.iter().find(|c| c.task.id == legacy_task).unwrap();
        assert!(!old.task.is_completed);
        assert!(!old.task.notified_1h);
        assert!(!old.owner.email_enabled);
        assert!(old.owner.wants_telegram());
        assert!(old.task.created_at.is_none());
    }

    #[tokio::test]
    async fn test_load_candidate() {
        let db = ReminderDb::open_in_memory().unwrap();
        let user = db.insert_user(None, Some("77"), true, false);
        let id = db.insert_task(user, "thesis", Some("2030-06-01 10:00:00"), false);

        let c = db.load_candidate(id).unwrap().unwrap();
        assert_eq!(c.task.title, "thesis");
        assert_eq!(c.task.deadline.unwrap().to_rfc3339(), "2030-06-01T10:00:00+00:00");
        assert!(c.owner.wants_telegram());
        assert!(db.load_candidate(id + 1).unwrap().is_none());
    }
}
