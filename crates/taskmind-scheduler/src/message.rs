//! Reminder templating: Telegram HTML text, email subject and HTML body.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use taskmind_core::config::ReminderConfig;
use taskmind_core::types::{Priority, ReminderKind, Task};

/// Rendered reminder for every channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderMessage {
    pub kind: ReminderKind,
    pub chat_text: String,
    pub email_subject: String,
    pub email_html: String,
}

#[derive(Debug, Clone)]
pub struct MessageRenderer {
    app_name: String,
    offset: FixedOffset,
    description_limit: usize,
}

impl MessageRenderer {
    pub fn new(app_name: &str, offset: FixedOffset, description_limit: usize) -> Self {
        Self {
            app_name: app_name.to_string(),
            offset,
            description_limit,
        }
    }

    /// Falls back to UTC when the configured offset doesn't parse.
    pub fn from_config(config: &ReminderConfig) -> Self {
        let offset = config.offset().unwrap_or_else(utc);
        Self::new(&config.app_name, offset, config.description_limit)
    }

    pub fn render(&self, task: &Task, kind: ReminderKind, hours_remaining: f64) -> ReminderMessage {
        let phrase = time_remaining_phrase(hours_remaining);
        let deadline = task
            .deadline
            .map(|d| format_deadline(d, self.offset))
            .unwrap_or_else(|| "-".into());
        let priority = priority_label(&task.priority);
        let subject = non_blank(task.subject.as_deref());
        let detail = non_blank(task.description.as_deref())
            .map(|d| truncate_description(d, self.description_limit));

        // Telegram HTML parse mode: every interpolated value is escaped.
        let mut lines = vec![
            "🔔 <b>DEADLINE REMINDER</b>".to_string(),
            String::new(),
            format!("📝 <b>{}</b>", escape_html(&task.title)),
        ];
        if let Some(s) = subject {
            lines.push(format!("📚 Subject: {}", escape_html(s)));
        }
        lines.push(format!("📆 Deadline: {}", escape_html(&deadline)));
        lines.push(escape_html(&priority));
        lines.push(String::new());
        lines.push(format!("⏳ <b>{}</b>", escape_html(&phrase)));
        if let Some(d) = &detail {
            lines.push(String::new());
            lines.push(format!("📋 Detail: {}", escape_html(d)));
        }
        lines.push(String::new());
        lines.push("<i>Don't forget to finish your task! 💪</i>".to_string());
        let chat_text = lines.join("\n");

        let email_subject = format!("⏰ Reminder: {} - {}", task.title, phrase);

        let (box_bg, box_fg) = urgency_colors(hours_remaining);
        let subject_html = subject
            .map(|s| {
                format!(
                    r#"<p style="color: #94a3b8; margin: 5px 0;">📚 Subject: <strong>{}</strong></p>"#,
                    escape_html(s)
                )
            })
            .unwrap_or_default();
        let detail_html = detail
            .map(|d| {
                format!(
                    r#"<div style="background-color: #334155; padding: 15px; border-radius: 8px; margin-bottom: 20px;">
        <p style="color: #94a3b8; margin: 0;">📋 <strong>Detail:</strong></p>
        <p style="color: #cbd5e1; margin: 10px 0 0 0;">{}</p>
    </div>"#,
                    escape_html(&d)
                )
            })
            .unwrap_or_default();

        let email_html = format!(
            r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px; background-color: #1e293b; color: #f1f5f9; border-radius: 12px;">
    <div style="text-align: center; margin-bottom: 20px;">
        <h1 style="color: #8b5cf6; margin: 0;">🔔 Deadline Reminder</h1>
    </div>
    <div style="background-color: #334155; padding: 20px; border-radius: 8px; margin-bottom: 20px;">
        <h2 style="color: #f1f5f9; margin: 0 0 10px 0;">📝 {title}</h2>
        {subject_html}
        <p style="color: #94a3b8; margin: 5px 0;">📆 Deadline: <strong>{deadline}</strong></p>
        <p style="color: #94a3b8; margin: 5px 0;">{priority}</p>
    </div>
    <div style="background-color: {box_bg}; padding: 15px; border-radius: 8px; text-align: center; margin-bottom: 20px;">
        <p style="font-size: 18px; font-weight: bold; margin: 0; color: {box_fg};">⏳ {phrase}</p>
    </div>
    {detail_html}
    <div style="text-align: center; color: #64748b; font-size: 12px;">
        <p>Don't forget to finish your task! 💪</p>
        <p>{app}</p>
    </div>
</div>"#,
            title = escape_html(&task.title),
            deadline = escape_html(&deadline),
            priority = escape_html(&priority),
            phrase = escape_html(&phrase),
            app = escape_html(&self.app_name),
        );

        ReminderMessage {
            kind,
            chat_text,
            email_subject,
            email_html,
        }
    }
}

impl Default for MessageRenderer {
    fn default() -> Self {
        Self::new("TaskMind", utc(), 100)
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Coarse, human-readable time left: minutes under an hour, hours up to a
/// day, days and hours beyond that.
pub fn time_remaining_phrase(hours_remaining: f64) -> String {
    if hours_remaining < 0.0 {
        let mins = ((-hours_remaining) * 60.0).round().max(1.0) as i64;
        return if mins < 60 {
            format!("⌛ Deadline passed {} ago", plural(mins, "minute"))
        } else {
            format!("⌛ Deadline passed {} ago", plural(mins / 60, "hour"))
        };
    }
    if hours_remaining < 1.0 {
        let mins = (hours_remaining * 60.0).round().min(59.0) as i64;
        return format!("⚠️ LESS THAN 1 HOUR LEFT! ({})", plural(mins, "minute"));
    }
    if hours_remaining <= 24.0 {
        let hours = hours_remaining.round() as i64;
        return format!("⏰ {} left", plural(hours, "hour"));
    }
    let total = hours_remaining.round() as i64;
    let (days, hours) = (total / 24, total % 24);
    if hours == 0 {
        format!("📅 {} left", plural(days, "day"))
    } else {
        format!("📅 {} {} left", plural(days, "day"), plural(hours, "hour"))
    }
}

/// Cut `description` to `limit` characters, marking the cut with `...`.
pub fn truncate_description(description: &str, limit: usize) -> String {
    if description.chars().count() <= limit {
        return description.to_string();
    }
    let cut: String = description.chars().take(limit).collect();
    format!("{}...", cut.trim_end())
}

pub fn priority_label(priority: &Priority) -> String {
    match priority {
        Priority::DoFirst => "🔴 Do First (Urgent)".into(),
        Priority::Schedule => "🟡 Schedule".into(),
        Priority::Delegate => "🔵 Delegate".into(),
        Priority::Eliminate => "⚪ Eliminate".into(),
        Priority::Other(s) => s.clone(),
    }
}

/// e.g. `Monday, 04 May 2026 16:00 (UTC+07:00)`.
pub fn format_deadline(deadline: DateTime<Utc>, offset: FixedOffset) -> String {
    deadline
        .with_timezone(&offset)
        .format("%A, %d %B %Y %H:%M (UTC%:z)")
        .to_string()
}

/// (background, text) colors for the time-left box.
fn urgency_colors(hours_remaining: f64) -> (&'static str, &'static str) {
    if hours_remaining <= 1.0 {
        ("#7f1d1d", "#fca5a5")
    } else if hours_remaining <= 24.0 {
        ("#78350f", "#fcd34d")
    } else {
        ("#1e3a5f", "#93c5fd")
    }
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
