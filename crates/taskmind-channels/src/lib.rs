//! # TaskMind Channels
//! Delivery adapters for deadline reminders.
//!
//! Each adapter fails closed: missing or malformed credentials disable the
//! channel for every task instead of stopping the scheduler.

pub mod email;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use taskmind_core::config::ChannelConfig;
use taskmind_core::traits::{ChatSender, EmailSender};

pub use email::EmailChannel;
pub use telegram::TelegramChannel;

/// Build the configured senders. A channel that is disabled or missing
/// credentials comes back as `None`.
pub fn senders_from_config(
    config: &ChannelConfig,
    send_timeout: Duration,
) -> (Option<Arc<dyn ChatSender>>, Option<Arc<dyn EmailSender>>) {
    let chat: Option<Arc<dyn ChatSender>> = if config.telegram.enabled {
        match TelegramChannel::from_config(&config.telegram, send_timeout) {
            Ok(ch) => Some(Arc::new(ch)),
            Err(e) => {
                tracing::warn!("⚠️ Telegram reminders disabled: {e}");
                None
            }
        }
    } else {
        tracing::info!("Telegram reminders disabled by config");
        None
    };

    let email: Option<Arc<dyn EmailSender>> = if config.email.enabled {
        match EmailChannel::from_config(&config.email, send_timeout) {
            Ok(ch) => Some(Arc::new(ch)),
            Err(e) => {
                tracing::warn!("⚠️ Email reminders disabled: {e}");
                None
            }
        }
    } else {
        tracing::info!("Email reminders disabled by config");
        None
    };

    (chat, email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_fail_closed() {
        let config = ChannelConfig::default();
        let (chat, email) = senders_from_config(&config, Duration::from_secs(5));
        assert!(chat.is_none());
        assert!(email.is_none());
    }

    #[test]
    fn test_configured_channels_are_built() {
        let mut config = ChannelConfig::default();
        config.telegram.bot_token = "123456:ABC-DEF1234ghIkl".into();
        config.email.username = "bot@example.com".into();
        config.email.password = "app-password".into();
        let (chat, email) = senders_from_config(&config, Duration::from_secs(5));
        assert_eq!(chat.unwrap().name(), "telegram");
        assert_eq!(email.unwrap().name(), "email-smtp");
    }

    #[test]
    fn test_disabled_channel_is_skipped() {
        let mut config = ChannelConfig::default();
        config.telegram.enabled = false;
        config.telegram.bot_token = "123456:ABC".into();
        let (chat, _) = senders_from_config(&config, Duration::from_secs(5));
        assert!(chat.is_none());
    }
}
