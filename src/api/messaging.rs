//! Outbound text messages
//!
//! `TwilioMessagingClient` talks to the provider's Messages API.
//! `NotificationDispatcher` sits in front of it: it fits every body to the
//! transport limit with the compliance footer present exactly once, and turns
//! any failure into a logged `Dispatch { ok: false }` instead of an error.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::check_response;
use crate::config::Config;

/// Mandatory opt-out footer on every outbound text.
pub const COMPLIANCE_FOOTER: &str = "Msg&data rates may apply. Reply STOP to opt out.";

/// Longest body the messaging transport accepts, in characters.
pub const MAX_BODY_CHARS: usize = 1600;

const FOOTER_SEPARATOR: &str = "\n\n";
const ELLIPSIS: &str = "...";

/// Strip any embedded footer, truncate the content with an ellipsis if the
/// footer would not fit, then append the footer.
pub fn fit_body(message: &str, max_chars: usize) -> String {
    let stripped = message.replace(COMPLIANCE_FOOTER, "");
    let content = stripped.trim_end();

    let suffix = format!("{}{}", FOOTER_SEPARATOR, COMPLIANCE_FOOTER);
    let budget = max_chars.saturating_sub(suffix.chars().count());

    if content.chars().count() <= budget {
        return format!("{}{}", content, suffix);
    }

    let keep = budget.saturating_sub(ELLIPSIS.len());
    let truncated: String = content.chars().take(keep).collect();
    format!("{}{}{}", truncated.trim_end(), ELLIPSIS, suffix)
}

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send one text. Returns the provider's message id when it reports one.
    async fn send_message(&self, to: &str, from: &str, body: &str) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: Option<String>,
}

/// Provider Messages API client (basic auth, form-encoded POST).
pub struct TwilioMessagingClient {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

impl TwilioMessagingClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http: super::http_client(config.messaging_timeout())?,
            api_base: config.twilio.api_base.trim_end_matches('/').to_string(),
            account_sid: config.twilio.account_sid.clone(),
            auth_token: config.twilio.auth_token.clone(),
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        )
    }
}

#[async_trait]
impl MessagingGateway for TwilioMessagingClient {
    async fn send_message(&self, to: &str, from: &str, body: &str) -> Result<Option<String>> {
        let url = self.messages_url();
        tracing::debug!("Messages POST {}", url);

        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", from), ("Body", body)])
            .send()
            .await
            .context("Messages request failed")?;

        let resp = check_response(resp, "Send message").await?;
        let parsed: MessageResponse = resp
            .json()
            .await
            .context("Failed to parse message response")?;
        Ok(parsed.sid)
    }
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub ok: bool,
    pub message_id: Option<String>,
}

impl Dispatch {
    fn failed() -> Self {
        Self::default()
    }
}

/// Sends notification texts; never propagates a failure.
#[derive(Clone)]
pub struct NotificationDispatcher {
    gateway: Arc<dyn MessagingGateway>,
    max_chars: usize,
}

impl NotificationDispatcher {
    pub fn new(gateway: Arc<dyn MessagingGateway>) -> Self {
        Self {
            gateway,
            max_chars: MAX_BODY_CHARS,
        }
    }

    pub async fn send(&self, recipient: &str, sender: &str, body: &str) -> Dispatch {
        if recipient.trim().is_empty() || sender.trim().is_empty() {
            tracing::error!(
                to = %crate::calling::mask_phone(recipient),
                "Message skipped: missing recipient or sender"
            );
            return Dispatch::failed();
        }

        let body = fit_body(body, self.max_chars);
        match self.gateway.send_message(recipient, sender, &body).await {
            Ok(message_id) => {
                tracing::info!(
                    to = %crate::calling::mask_phone(recipient),
                    sid = message_id.as_deref().unwrap_or("unknown"),
                    "Message sent"
                );
                Dispatch {
                    ok: true,
                    message_id,
                }
            }
            Err(e) => {
                tracing::error!(
                    to = %crate::calling::mask_phone(recipient),
                    "Message send failed: {:#}",
                    e
                );
                Dispatch::failed()
            }
        }
    }
}
