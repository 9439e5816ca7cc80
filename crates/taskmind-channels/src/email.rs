//! Email channel: HTML reminders via SMTP (lettre) or the Brevo HTTP API.
//!
//! SMTP suits a Gmail app password; Brevo lets a free account send to any
//! recipient once the sender address is verified.

use async_trait::async_trait;
use scraper::Html;
use serde::Serialize;
use std::time::Duration;
use taskmind_core::config::{EmailChannelConfig, EmailProvider};
use taskmind_core::error::{Result, TaskMindError};
use taskmind_core::traits::EmailSender;

const BREVO_ENDPOINT: &str = "https://api.brevo.com/v3/smtp/email";

struct SmtpSettings {
    host: String,
    port: u16,
    username: String,
    password: String,
}

enum Backend {
    Smtp(SmtpSettings),
    Brevo {
        client: reqwest::Client,
        api_key: String,
    },
}

/// Email channel.
pub struct EmailChannel {
    backend: Backend,
    from_address: String,
    from_name: String,
    send_timeout: Duration,
}

impl EmailChannel {
    /// Build from config, rejecting a backend whose credentials are missing.
    pub fn from_config(config: &EmailChannelConfig, send_timeout: Duration) -> Result<Self> {
        let from_address = if config.from_address.trim().is_empty() {
            config.username.trim().to_string()
        } else {
            config.from_address.trim().to_string()
        };
        if from_address.is_empty() {
            return Err(TaskMindError::Config("EMAIL_USER is not configured".into()));
        }

        let backend = match config.provider {
            EmailProvider::Smtp => {
                if config.username.trim().is_empty() || config.password.is_empty() {
                    return Err(TaskMindError::Config(
                        "SMTP credentials (EMAIL_USER / EMAIL_PASS) are not configured".into(),
                    ));
                }
                if config.smtp_host.trim().is_empty() {
                    return Err(TaskMindError::Config("smtp_host is not configured".into()));
                }
                Backend::Smtp(SmtpSettings {
                    host: config.smtp_host.trim().to_string(),
                    port: config.smtp_port,
                    username: config.username.trim().to_string(),
                    password: config.password.clone(),
                })
            }
            EmailProvider::Brevo => {
                if config.brevo_api_key.trim().is_empty() {
                    return Err(TaskMindError::Config("BREVO_API_KEY is not configured".into()));
                }
                Backend::Brevo {
                    client: reqwest::Client::new(),
                    api_key: config.brevo_api_key.trim().to_string(),
                }
            }
        };

        Ok(Self {
            backend,
            from_address,
            from_name: config.from_name.clone(),
            send_timeout,
        })
    }

    /// Send via SMTP (async, STARTTLS).
    async fn send_smtp(&self, smtp: &SmtpSettings, to: &str, subject: &str, html: &str) -> Result<()> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, message::Mailbox,
            message::header::ContentType, transport::smtp::authentication::Credentials,
        };

        let from_mailbox: Mailbox = format!("{} <{}>", self.from_name, self.from_address)
            .parse()
            .map_err(|e| TaskMindError::Channel(format!("Invalid from: {e}")))?;

        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| TaskMindError::Channel(format!("Invalid to: {e}")))?;

        let email = LettreMessage::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| TaskMindError::Channel(format!("Build email: {e}")))?;

        let creds = Credentials::new(smtp.username.clone(), smtp.password.clone());

        let mailer = AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&smtp.host)
            .map_err(|e| TaskMindError::Channel(format!("SMTP relay: {e}")))?
            .port(smtp.port)
            .credentials(creds)
            .timeout(Some(self.send_timeout))
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| TaskMindError::Channel(format!("SMTP send: {e}")))?;
        Ok(())
    }

    /// Send via the Brevo transactional email API.
    async fn send_brevo(
        &self,
        client: &reqwest::Client,
        api_key: &str,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<()> {
        let payload = BrevoPayload::new(&self.from_name, &self.from_address, to, subject, html);

        let resp = client
            .post(BREVO_ENDPOINT)
            .header("api-key", api_key)
            .header("accept", "application/json")
            .json(&payload)
            .timeout(self.send_timeout)
            .send()
            .await
            .map_err(|e| TaskMindError::Channel(format!("Brevo request failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        if !status.is_success() {
            let message = body["message"].as_str().unwrap_or("Failed to send email via Brevo");
            return Err(TaskMindError::Channel(format!("Brevo API error {status}: {message}")));
        }

        tracing::debug!(
            "Brevo accepted email, messageId={}",
            body["messageId"].as_str().unwrap_or("?")
        );
        Ok(())
    }
}

#[async_trait]
impl EmailSender for EmailChannel {
    fn name(&self) -> &str {
        match self.backend {
            Backend::Smtp(_) => "email-smtp",
            Backend::Brevo { .. } => "email-brevo",
        }
    }

    async fn send_email(&self, address: &str, subject: &str, html_body: &str) -> Result<()> {
        match &self.backend {
            Backend::Smtp(smtp) => self.send_smtp(smtp, address, subject, html_body).await,
            Backend::Brevo { client, api_key } => {
                self.send_brevo(client, api_key, address, subject, html_body)
                    .await
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct BrevoContact<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    email: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoPayload<'a> {
    sender: BrevoContact<'a>,
    to: Vec<BrevoContact<'a>>,
    subject: &'a str,
    html_content: &'a str,
    text_content: String,
}

impl<'a> BrevoPayload<'a> {
    fn new(from_name: &'a str, from: &'a str, to: &'a str, subject: &'a str, html: &'a str) -> Self {
        Self {
            sender: BrevoContact {
                name: Some(from_name),
                email: from,
            },
            to: vec![BrevoContact { name: None, email: to }],
            subject,
            html_content: html,
            text_content: html_to_text(html),
        }
    }
}

/// Plain-text fallback for clients that don't render HTML. One line per
/// non-empty text line, entities decoded.
fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let raw: String = fragment.root_element().text().collect();
    raw.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp_config() -> EmailChannelConfig {
        EmailChannelConfig {
            username: "bot@example.com".into(),
            password: "secret".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_smtp_requires_credentials() {
        let mut cfg = smtp_config();
        cfg.password.clear();
        let err = EmailChannel::from_config(&cfg, Duration::from_secs(5)).err().unwrap();
        assert!(err.to_string().contains("EMAIL_PASS"));
    }

    #[test]
    fn test_from_address_falls_back_to_username() {
        let ch = EmailChannel::from_config(&smtp_config(), Duration::from_secs(5)).unwrap();
        assert_eq!(ch.from_address, "bot@example.com");
        assert_eq!(ch.name(), "email-smtp");
    }

    #[test]
    fn test_brevo_requires_api_key() {
        let mut cfg = smtp_config();
        cfg.provider = EmailProvider::Brevo;
        assert!(EmailChannel::from_config(&cfg, Duration::from_secs(5)).is_err());
        cfg.brevo_api_key = "xkeysib-abc".into();
        let ch = EmailChannel::from_config(&cfg, Duration::from_secs(5)).unwrap();
        assert_eq!(ch.name(), "email-brevo");
    }

    #[test]
    fn test_missing_sender_rejected() {
        let cfg = EmailChannelConfig {
            provider: EmailProvider::Brevo,
            brevo_api_key: "xkeysib-abc".into(),
            ..Default::default()
        };
        let err = EmailChannel::from_config(&cfg, Duration::from_secs(5)).err().unwrap();
        assert!(err.to_string().contains("EMAIL_USER"));
    }

    #[test]
    fn test_brevo_payload_shape() {
        let payload = BrevoPayload::new(
            "TaskMind",
            "bot@example.com",
            "student@example.com",
            "Reminder",
            "<div><h2>Essay</h2>\n<p>Due soon</p></div>",
        );
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["sender"]["name"], "TaskMind");
        assert_eq!(json["to"][0]["email"], "student@example.com");
        assert!(json["to"][0].get("name").is_none());
        assert_eq!(json["htmlContent"], "<div><h2>Essay</h2>\n<p>Due soon</p></div>");
        assert_eq!(json["textContent"], "Essay\nDue soon");
    }

    #[test]
    fn test_text_content_decodes_entities() {
        let payload = BrevoPayload::new(
            "TaskMind",
            "bot@example.com",
            "student@example.com",
            "Reminder",
            "<h2>Tom &amp; Jerry &lt;lab&gt;</h2>\n    <p>  due   <strong>today</strong> </p>",
        );
        assert_eq!(payload.text_content, "Tom & Jerry <lab>\ndue today");
    }
}
