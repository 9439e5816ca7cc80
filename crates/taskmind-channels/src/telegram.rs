//! Telegram Bot channel: reminder delivery via `sendMessage`, plus a
//! long-polling onboarding loop that tells users their chat id.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use taskmind_core::config::TelegramChannelConfig;
use taskmind_core::error::{Result, TaskMindError};
use taskmind_core::traits::ChatSender;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const API_BASE: &str = "https://api.telegram.org";

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+:[A-Za-z0-9_-]+$").expect("valid token regex"))
}

/// Check the `<bot id>:<secret>` shape of a BotFather token.
pub fn is_valid_token(token: &str) -> bool {
    token_pattern().is_match(token.trim())
}

/// Telegram Bot channel.
pub struct TelegramChannel {
    bot_token: String,
    client: reqwest::Client,
    send_timeout: Duration,
    last_update_id: i64,
}

impl TelegramChannel {
    pub fn new(bot_token: &str, send_timeout: Duration) -> Self {
        Self {
            bot_token: bot_token.trim().to_string(),
            client: reqwest::Client::new(),
            send_timeout,
            last_update_id: 0,
        }
    }

    /// Build from config. Empty or malformed tokens are rejected so the
    /// channel stays off instead of failing on every send.
    pub fn from_config(config: &TelegramChannelConfig, send_timeout: Duration) -> Result<Self> {
        if config.bot_token.trim().is_empty() {
            return Err(TaskMindError::Config("TELEGRAM_BOT_TOKEN is not configured".into()));
        }
        if !is_valid_token(&config.bot_token) {
            return Err(TaskMindError::Config("Invalid TELEGRAM_BOT_TOKEN format".into()));
        }
        Ok(Self::new(&config.bot_token, send_timeout))
    }

    fn api_url(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{}", self.bot_token, method)
    }

    /// Send a text message with the given parse mode.
    pub async fn send_message(&self, chat_id: &str, text: &str, parse_mode: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": parse_mode,
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .timeout(self.send_timeout)
            .send()
            .await
            .map_err(|e| TaskMindError::Channel(format!("sendMessage failed: {}", e.without_url())))?;

        let result: TelegramApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| TaskMindError::Channel(format!("Invalid send response: {}", e.without_url())))?;

        if !result.ok {
            return Err(TaskMindError::Channel(format!(
                "Telegram API error {}: {}",
                result.error_code.unwrap_or_default(),
                result.description.unwrap_or_default()
            )));
        }
        Ok(())
    }

    /// Get bot info.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .timeout(self.send_timeout)
            .send()
            .await
            .map_err(|e| TaskMindError::Channel(format!("getMe failed: {}", e.without_url())))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| TaskMindError::Channel(format!("Invalid getMe response: {}", e.without_url())))?;
        body.result
            .ok_or_else(|| TaskMindError::Channel("No bot info".into()))
    }

    /// Get updates using long polling.
    async fn get_updates(&mut self) -> std::result::Result<Vec<TelegramUpdate>, PollError> {
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", (self.last_update_id + 1).to_string()),
                ("timeout", "30".into()),
                ("allowed_updates", "[\"message\"]".into()),
            ])
            .timeout(Duration::from_secs(40))
            .send()
            .await
            .map_err(|e| PollError::Transient(format!("getUpdates failed: {}", e.without_url())))?;

        let body: TelegramApiResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .map_err(|e| PollError::Transient(format!("Invalid Telegram response: {}", e.without_url())))?;

        if !body.ok {
            return Err(PollError::from_api(
                body.error_code.unwrap_or_default(),
                body.description.unwrap_or_default(),
            ));
        }

        let updates = body.result.unwrap_or_default();
        if let Some(last) = updates.last() {
            self.last_update_id = last.update_id;
        }
        Ok(updates)
    }

    /// Start the onboarding loop: every `/start` gets the sender's chat id back.
    /// Runs until `shutdown` flips to `true` or the token is rejected.
    pub fn start_onboarding(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut channel = self;
            match channel.get_me().await {
                Ok(me) => tracing::info!(
                    "🤖 Telegram onboarding started as @{}",
                    me.username.as_deref().unwrap_or("unknown")
                ),
                Err(e) => tracing::warn!("⚠️ Telegram getMe failed: {e}"),
            }

            loop {
                let polled = tokio::select! {
                    _ = shutdown.changed() => break,
                    polled = channel.get_updates() => polled,
                };

                match polled {
                    Ok(updates) => {
                        for update in updates {
                            if let Some(start) = update.start_request() {
                                let reply = onboarding_reply(&start.first_name, start.chat_id);
                                let chat_id = start.chat_id.to_string();
                                if let Err(e) = channel.send_message(&chat_id, &reply, "HTML").await {
                                    tracing::error!("Error sending onboarding message: {e}");
                                }
                            }
                        }
                    }
                    Err(PollError::Fatal(reason)) => {
                        tracing::error!("❌ Telegram onboarding stopped: {reason}");
                        break;
                    }
                    Err(PollError::Transient(reason)) => {
                        tracing::error!("Telegram polling error: {reason}");
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        }
                    }
                }

                if *shutdown.borrow() {
                    break;
                }
            }
            tracing::info!("Telegram onboarding loop stopped");
        })
    }
}

#[async_trait]
impl ChatSender for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_chat_message(&self, chat_id: &str, text: &str) -> Result<()> {
        self.send_message(chat_id, text, "HTML").await
    }
}

/// Polling failure, split by whether retrying can help.
#[derive(Debug)]
enum PollError {
    Transient(String),
    /// Bad token (401/404) or another instance already polling (409).
    Fatal(String),
}

impl PollError {
    fn from_api(code: i64, description: String) -> Self {
        match code {
            401 | 404 => PollError::Fatal(format!("invalid bot token ({code}): {description}")),
            409 => PollError::Fatal(format!("bot is already polling elsewhere: {description}")),
            _ => PollError::Transient(format!("Telegram API error {code}: {description}")),
        }
    }
}

/// Reply sent to `/start`.
pub fn onboarding_reply(first_name: &str, chat_id: i64) -> String {
    let name = if first_name.trim().is_empty() {
        "there".to_string()
    } else {
        escape_html(first_name)
    };
    format!(
        "👋 Welcome {name}!\n\n\
         ✅ Your Telegram notifications are now active!\n\n\
         Your Chat ID is:\n<code>{chat_id}</code>\n\n\
         You can use this Chat ID in TaskMind settings to receive task notifications."
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
    pub date: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

/// A `/start` command from a human user.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub chat_id: i64,
    pub first_name: String,
}

impl TelegramUpdate {
    pub fn start_request(&self) -> Option<StartRequest> {
        let msg = self.message.as_ref()?;
        let text = msg.text.as_deref()?.trim();
        let from = msg.from.as_ref()?;

        if from.is_bot {
            return None;
        }
        let command = text.split_whitespace().next()?;
        let command = command.split('@').next().unwrap_or(command);
        if command != "/start" {
            return None;
        }

        Some(StartRequest {
            chat_id: msg.chat.id,
            first_name: from.first_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(text: &str, is_bot: bool) -> TelegramUpdate {
        serde_json::from_value(serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 1,
                "from": {"id": 42, "is_bot": is_bot, "first_name": "Sari"},
                "chat": {"id": 42, "type": "private"},
                "text": text,
                "date": 1700000000
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_token_validation() {
        assert!(is_valid_token("123456:ABC-DEF1234ghIkl-zyx57W2v1u123ew11"));
        assert!(is_valid_token(" 42:a_b "));
        assert!(!is_valid_token(""));
        assert!(!is_valid_token("not-a-token"));
        assert!(!is_valid_token("abc:123"));
        assert!(!is_valid_token("123:abc def"));
    }

    #[test]
    fn test_from_config_fails_closed() {
        let mut cfg = TelegramChannelConfig::default();
        assert!(TelegramChannel::from_config(&cfg, Duration::from_secs(1)).is_err());
        cfg.bot_token = "bogus".into();
        assert!(TelegramChannel::from_config(&cfg, Duration::from_secs(1)).is_err());
        cfg.bot_token = "123:abc".into();
        assert!(TelegramChannel::from_config(&cfg, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_start_request_detection() {
        let req = update("/start", false).start_request().unwrap();
        assert_eq!(req.chat_id, 42);
        assert_eq!(req.first_name, "Sari");

        assert!(update("/start@taskmind_bot", false).start_request().is_some());
        assert!(update("/start", true).start_request().is_none());
        assert!(update("hello", false).start_request().is_none());
        assert!(update("/starting", false).start_request().is_none());
    }

    #[test]
    fn test_onboarding_reply() {
        let reply = onboarding_reply("<Budi>", -100123);
        assert!(reply.contains("Welcome &lt;Budi&gt;!"));
        assert!(reply.contains("<code>-100123</code>"));
        assert!(onboarding_reply("", 1).contains("Welcome there!"));
    }

    #[test]
    fn test_poll_error_classification() {
        assert!(matches!(PollError::from_api(404, "Not Found".into()), PollError::Fatal(_)));
        assert!(matches!(PollError::from_api(409, "Conflict".into()), PollError::Fatal(_)));
        assert!(matches!(PollError::from_api(429, "Too Many".into()), PollError::Transient(_)));
    }

    #[test]
    fn test_api_error_response() {
        let body: TelegramApiResponse<serde_json::Value> = serde_json::from_str(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .unwrap();
        assert!(!body.ok);
        assert_eq!(body.error_code, Some(400));
    }
}
