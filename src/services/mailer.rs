use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::MailConfig;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailRequest {
    sender: Address,
    to: Vec<Address>,
    subject: String,
    html_content: String,
}

/// Transactional mail over Brevo's `/v3/smtp/email` endpoint.
pub struct BrevoMailer {
    client: Client,
    api_url: String,
    api_key: String,
    sender_name: String,
    sender_email: String,
}

impl BrevoMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Config("mail.api_key is not set".to_string()))?;
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            sender_name: config.sender_name.clone(),
            sender_email: config.sender_email.clone(),
        })
    }
}

#[async_trait]
impl Mailer for BrevoMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let request = SendEmailRequest {
            sender: Address {
                name: Some(self.sender_name.clone()),
                email: self.sender_email.clone(),
            },
            to: vec![Address {
                name: None,
                email: mail.to.clone(),
            }],
            subject: mail.subject.clone(),
            html_content: mail.html.clone(),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("api-key", &self.api_key)
            .header("accept", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Mail(format!("HTTP {}: {}", status, error_text)));
        }

        tracing::info!("Sent \"{}\" to {}", mail.subject, mail.to);
        Ok(())
    }
}
