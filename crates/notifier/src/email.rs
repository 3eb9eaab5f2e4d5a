//! Transactional email: the sender contract, a Resend client and the queue processor.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use herald_common::types::EmailMessage;
use herald_queue::{Job, Processor};

use crate::error::{NotifierError, NotifierResult};

const RESEND_API_URL: &str = "https://api.resend.com";

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver one message. Returns the provider's message id when it gives one.
    async fn send(&self, email: &EmailMessage) -> NotifierResult<Option<String>>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct ResendConfig {
    pub api_key: String,
    pub from: String,
    pub api_url: String,
}

impl ResendConfig {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            from: from.into(),
            api_url: RESEND_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
}

/// Resend HTTP API client.
pub struct ResendSender {
    config: ResendConfig,
    client: Client,
}

impl ResendSender {
    pub fn new(config: ResendConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl EmailSender for ResendSender {
    async fn send(&self, email: &EmailMessage) -> NotifierResult<Option<String>> {
        let request = ResendRequest {
            from: &self.config.from,
            to: [email.to.as_str()],
            subject: &email.subject,
            html: &email.html,
            text: email.text.as_deref(),
            reply_to: email.reply_to.as_deref(),
        };

        debug!(to = %email.to, subject = %email.subject, "Sending email via Resend");

        let response = self
            .client
            .post(format!("{}/emails", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: ResendResponse = response.json().await?;
            info!(to = %email.to, message_id = ?body.id, "Email sent via Resend");
            Ok(body.id)
        } else {
            let body = response.text().await.unwrap_or_default();
            error!(to = %email.to, status = %status, error = %body, "Resend rejected email");
            Err(NotifierError::Email(format!("Resend error ({}): {}", status, body)))
        }
    }

    fn name(&self) -> &'static str {
        "Resend"
    }
}

/// Used when no provider is configured; every send fails so jobs land in the failed set.
pub struct UnconfiguredSender;

#[async_trait]
impl EmailSender for UnconfiguredSender {
    async fn send(&self, _email: &EmailMessage) -> NotifierResult<Option<String>> {
        Err(NotifierError::Email(
            "no email provider configured (set RESEND_API_KEY and EMAIL_FROM)".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "Unconfigured"
    }
}

/// Build the sender for the given credentials.
pub fn sender_from_config(api_key: Option<&str>, from: Option<&str>) -> Arc<dyn EmailSender> {
    match (api_key, from) {
        (Some(key), Some(from)) if !key.is_empty() && !from.is_empty() => {
            Arc::new(ResendSender::new(ResendConfig::new(key, from)))
        }
        _ => Arc::new(UnconfiguredSender),
    }
}

/// Email worker: one send per job. Errors propagate so the queue retries.
pub struct EmailProcessor {
    sender: Arc<dyn EmailSender>,
}

impl EmailProcessor {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Processor for EmailProcessor {
    type Data = EmailMessage;
    type Error = NotifierError;

    async fn process(&self, job: &Job<Self::Data>) -> Result<(), Self::Error> {
        let message_id = self.sender.send(&job.data).await?;
        debug!(
            job_id = %job.id,
            provider = self.sender.name(),
            message_id = ?message_id,
            "Email job processed"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "EmailProcessor"
    }
}
