//! Tenant notifications over WhatsApp template messages.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::config::MessagingConfig;
use crate::models::{Lease, Transaction};

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Provider not enabled: {0}")]
    NotEnabled(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}

#[derive(Debug, Clone)]
pub struct TemplateMessage {
    /// Canonical `+E.164` phone number.
    pub to: String,
    pub template: String,
    pub language: String,
    pub parameters: Vec<String>,
}

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send_template(&self, message: &TemplateMessage) -> Result<Option<String>, MessagingError>;
    fn is_enabled(&self) -> bool;
}

pub struct WhatsAppProvider {
    config: MessagingConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CloudApiRequest {
    messaging_product: &'static str,
    to: String,
    #[serde(rename = "type")]
    message_type: &'static str,
    template: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CloudApiResponse {
    #[serde(default)]
    messages: Vec<CloudApiMessage>,
}

#[derive(Debug, Deserialize)]
struct CloudApiMessage {
    id: String,
}

impl WhatsAppProvider {
    pub fn new(config: MessagingConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl MessagingProvider for WhatsAppProvider {
    async fn send_template(&self, message: &TemplateMessage) -> Result<Option<String>, MessagingError> {
        if !self.config.enabled {
            return Err(MessagingError::NotEnabled(
                "WhatsApp provider is not enabled".to_string(),
            ));
        }

        let to: String = message.to.chars().filter(|c| c.is_ascii_digit()).collect();
        if to.is_empty() {
            return Err(MessagingError::InvalidRecipient(
                "Phone number is empty".to_string(),
            ));
        }

        let parameters: Vec<_> = message
            .parameters
            .iter()
            .map(|text| json!({ "type": "text", "text": text }))
            .collect();
        let request = CloudApiRequest {
            messaging_product: "whatsapp",
            to,
            message_type: "template",
            template: json!({
                "name": message.template,
                "language": { "code": message.language },
                "components": [{ "type": "body", "parameters": parameters }],
            }),
        };

        let url = format!(
            "{}/{}/messages",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.phone_number_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| MessagingError::Connection(format!("Failed to reach WhatsApp: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MessagingError::SendFailed(format!(
                "WhatsApp API returned error status {}: {}",
                status, body
            )));
        }

        let parsed: CloudApiResponse = response.json().await.map_err(|e| {
            MessagingError::SendFailed(format!("Failed to parse WhatsApp response: {}", e))
        })?;

        tracing::info!(template = %message.template, "WhatsApp template sent");
        Ok(parsed.messages.into_iter().next().map(|m| m.id))
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Mock provider for tests and local runs.
#[derive(Default)]
pub struct MockMessagingProvider {
    send_count: AtomicU64,
}

impl MockMessagingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingProvider for MockMessagingProvider {
    async fn send_template(&self, message: &TemplateMessage) -> Result<Option<String>, MessagingError> {
        let n = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            to = %message.to,
            template = %message.template,
            "[MOCK] WhatsApp template would be sent"
        );
        Ok(Some(format!("mock-wamid-{}", n)))
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Sends payment receipts without blocking or failing the caller.
#[derive(Clone)]
pub struct ReceiptNotifier {
    provider: Arc<dyn MessagingProvider>,
    template: String,
    language: String,
}

impl ReceiptNotifier {
    pub fn new(provider: Arc<dyn MessagingProvider>, config: &MessagingConfig) -> Self {
        Self {
            provider,
            template: config.receipt_template.clone(),
            language: config.template_language.clone(),
        }
    }

    pub fn receipt_message(&self, lease: &Lease, transaction: &Transaction) -> Option<TemplateMessage> {
        let to = transaction
            .payment_method
            .phone
            .clone()
            .or_else(|| lease.tenant_phone.clone())?;
        Some(TemplateMessage {
            to,
            template: self.template.clone(),
            language: self.language.clone(),
            parameters: vec![
                transaction.amount.value.normalize().to_string(),
                transaction.amount.currency.to_string(),
                transaction.receipt_number().to_string(),
            ],
        })
    }

    pub fn send_receipt(&self, lease: &Lease, transaction: &Transaction) {
        if !self.provider.is_enabled() {
            return;
        }
        let Some(message) = self.receipt_message(lease, transaction) else {
            tracing::debug!(lease_id = %lease.id, "No tenant phone; receipt not sent");
            return;
        };

        let provider = Arc::clone(&self.provider);
        let transaction_id = transaction.id;
        tokio::spawn(async move {
            if let Err(e) = provider.send_template(&message).await {
                tracing::warn!(
                    transaction_id = %transaction_id,
                    error = %e,
                    "Failed to send payment receipt"
                );
            }
        });
    }
}
