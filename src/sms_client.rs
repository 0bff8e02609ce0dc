use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use std::time;

use crate::domain::phone_number::PhoneNumber;

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// Provider identifier of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageId(pub String);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(thiserror::Error)]
pub enum SendError {
    #[error("Failed to reach the messaging provider.")]
    Transport(#[from] reqwest::Error),
    #[error("The messaging provider rejected the message with status {status}.")]
    Rejected { status: StatusCode, body: String },
}

impl std::fmt::Debug for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Transport(err) => write!(f, "{}\nCaused by:\n\t{}", self, err),
            SendError::Rejected { body, .. } => write!(f, "{}\nResponse body:\n\t{}", self, body),
        }
    }
}

/// Anything that can deliver a text message to a phone number.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn send(&self, recipient: &PhoneNumber, body: &str) -> Result<MessageId, SendError>;
}

pub struct TwilioClient {
    http_client: Client,
    base_url: String,
    account_sid: String,
    auth_token: Secret<String>,
    sender: PhoneNumber,
}

#[derive(serde::Serialize)]
struct SendMessageForm<'a> {
    #[serde(rename = "To")]
    to: &'a str,
    #[serde(rename = "From")]
    from: &'a str,
    #[serde(rename = "Body")]
    body: &'a str,
}

#[derive(serde::Deserialize)]
struct SendMessageResponse {
    sid: String,
}

impl TwilioClient {
    pub fn new(
        base_url: String,
        account_sid: String,
        sender: PhoneNumber,
        auth_token: Secret<String>,
        timeout: Option<time::Duration>,
    ) -> Result<TwilioClient, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()?;

        Ok(TwilioClient {
            http_client,
            base_url,
            account_sid,
            auth_token,
            sender,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        )
    }
}

#[async_trait]
impl OutboundChannel for TwilioClient {
    #[tracing::instrument(name = "Sending a text message", skip(self, body))]
    async fn send(&self, recipient: &PhoneNumber, body: &str) -> Result<MessageId, SendError> {
        let form = SendMessageForm {
            to: recipient.as_ref(),
            from: self.sender.as_ref(),
            body,
        };

        let response = self
            .http_client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Rejected { status, body });
        }

        let message: SendMessageResponse = response.json().await?;
        tracing::info!(message_sid = %message.sid, "Message delivered to the provider");

        Ok(MessageId(message.sid))
    }
}

/// TwiML document replying to an inbound message with `message`.
pub fn twiml_message(message: &str) -> String {
    let escaped = message
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Message><Body>{}</Body></Message></Response>"#,
        escaped
    )
}
