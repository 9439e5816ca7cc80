//! TaskMind configuration system.
//!
//! Loaded from `~/.taskmind/config.toml` (or an explicit path), then overlaid
//! with environment variables so deployments can inject secrets without
//! touching the file.

use chrono::{Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TaskMindError};
use crate::types::ScanWindow;

/// Upper edge of the 24-hour reminder band, in hours. The scan lookahead
/// must reach at least this far.
pub const TWENTY_FOUR_HOUR_BAND_END: f64 = 27.0;
/// Upper edge of the final reminder band, in hours.
pub const ONE_HOUR_BAND_END: f64 = 4.0;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMindConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
}

impl TaskMindConfig {
    /// Load config from the default path (~/.taskmind/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TaskMindError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TaskMindError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TaskMindError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the TaskMind home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskmind")
    }

    /// Overlay values from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from `lookup`. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TASKMIND_DB_PATH") {
            self.database.path = v;
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.channel.telegram.bot_token = v;
        }
        if let Some(v) = get("EMAIL_USER") {
            if self.channel.email.from_address.is_empty() {
                self.channel.email.from_address = v.clone();
            }
            self.channel.email.username = v;
        }
        if let Some(v) = get("EMAIL_PASS") {
            self.channel.email.password = v;
        }
        if let Some(v) = get("SMTP_HOST") {
            self.channel.email.smtp_host = v;
        }
        if let Some(v) = get("BREVO_API_KEY") {
            self.channel.email.brevo_api_key = v;
            // An API key without an explicit provider choice means Brevo.
            if lookup("EMAIL_PROVIDER").is_none() {
                self.channel.email.provider = EmailProvider::Brevo;
            }
        }
        if let Some(v) = get("EMAIL_PROVIDER") {
            match v.to_lowercase().as_str() {
                "smtp" => self.channel.email.provider = EmailProvider::Smtp,
                "brevo" => self.channel.email.provider = EmailProvider::Brevo,
                other => tracing::warn!("⚠️ Unknown EMAIL_PROVIDER '{other}', keeping config value"),
            }
        }
    }

    /// Reject settings that would let a task slip past a reminder band.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.check_interval_secs == 0 {
            return Err(TaskMindError::Config("check_interval_secs must be > 0".into()));
        }
        if (s.lookahead_hours as f64) < TWENTY_FOUR_HOUR_BAND_END {
            return Err(TaskMindError::Config(format!(
                "lookahead_hours ({}) must cover the 24h band (>= {TWENTY_FOUR_HOUR_BAND_END})",
                s.lookahead_hours
            )));
        }
        if s.overdue_grace_mins > (ONE_HOUR_BAND_END * 60.0) as u64 {
            return Err(TaskMindError::Config(format!(
                "overdue_grace_mins ({}) must not exceed {} minutes",
                s.overdue_grace_mins,
                ONE_HOUR_BAND_END * 60.0
            )));
        }
        if s.grace_window_mins < s.overdue_grace_mins {
            return Err(TaskMindError::Config(format!(
                "grace_window_mins ({}) must be >= overdue_grace_mins ({})",
                s.grace_window_mins, s.overdue_grace_mins
            )));
        }
        if s.max_concurrent_dispatches == 0 {
            return Err(TaskMindError::Config("max_concurrent_dispatches must be > 0".into()));
        }
        if self.reminders.offset().is_none() {
            return Err(TaskMindError::Config(format!(
                "Invalid utc_offset '{}', expected e.g. +07:00",
                self.reminders.utc_offset
            )));
        }
        Ok(())
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.taskmind/taskmind.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Scan loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_grace_window")]
    pub grace_window_mins: u64,
    #[serde(default = "default_lookahead")]
    pub lookahead_hours: u64,
    #[serde(default = "default_overdue_grace")]
    pub overdue_grace_mins: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_dispatches: usize,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_check_interval() -> u64 { 300 }
fn default_grace_window() -> u64 { 60 }
fn default_lookahead() -> u64 { 30 }
fn default_overdue_grace() -> u64 { 60 }
fn default_max_concurrent() -> usize { 4 }
fn default_send_timeout() -> u64 { 15 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            grace_window_mins: default_grace_window(),
            lookahead_hours: default_lookahead(),
            overdue_grace_mins: default_overdue_grace(),
            max_concurrent_dispatches: default_max_concurrent(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl SchedulerConfig {
    pub fn scan_window(&self) -> ScanWindow {
        ScanWindow::new(
            Duration::minutes(self.grace_window_mins as i64),
            Duration::hours(self.lookahead_hours as i64),
        )
    }

    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_interval_secs)
    }

    pub fn send_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.send_timeout_secs)
    }

    pub fn overdue_grace_hours(&self) -> f64 {
        self.overdue_grace_mins as f64 / 60.0
    }
}

/// Message rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Offset used to display deadlines, e.g. `+07:00`.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    #[serde(default = "default_description_limit")]
    pub description_limit: usize,
}

fn default_app_name() -> String { "TaskMind".into() }
fn default_utc_offset() -> String { "+00:00".into() }
fn default_description_limit() -> usize { 100 }

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            utc_offset: default_utc_offset(),
            description_limit: default_description_limit(),
        }
    }
}

impl ReminderConfig {
    pub fn offset(&self) -> Option<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
    }
}

/// Parse `+HH:MM`, `-HH:MM`, `+HH` or `Z`.
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match s.chars().next()? {
        '+' => (1, &s[1..]),
        '-' => (-1, &s[1..]),
        _ => return None,
    };
    let (h, m) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None => (rest, "0"),
    };
    // u32 parsing still takes a leading '+', so require bare digits.
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    if !digits(h) || !digits(m) {
        return None;
    }
    let hours: u32 = h.parse().ok()?;
    let mins: u32 = m.parse().ok()?;
    if hours > 14 || mins >= 60 {
        return None;
    }
    let secs = i32::try_from(hours * 3600 + mins * 60).ok()?;
    FixedOffset::east_opt(sign * secs)
}

/// Channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
    #[serde(default)]
    pub email: EmailChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChannelConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    /// Answer `/start` with the user's chat id.
    #[serde(default = "bool_true")]
    pub onboarding: bool,
}

fn bool_true() -> bool { true }

impl Default for TelegramChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: String::new(),
            onboarding: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmailProvider {
    #[default]
    Smtp,
    Brevo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailChannelConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub provider: EmailProvider,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default = "default_app_name")]
    pub from_name: String,
    #[serde(default)]
    pub brevo_api_key: String,
}

fn default_smtp_host() -> String { "smtp.gmail.com".into() }
fn default_smtp_port() -> u16 { 587 }

impl Default for EmailChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: EmailProvider::default(),
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            from_name: default_app_name(),
            brevo_api_key: String::new(),
        }
    }
}
