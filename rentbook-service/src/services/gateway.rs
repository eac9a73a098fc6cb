//! Mobile-money payment gateway client.
//!
//! The provider is asynchronous and delivers results at least once: an
//! accepted `initiate` only means the push to the payer's phone was sent.
//! The final result arrives through the callback or through `check`.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::config::GatewayConfig;
use crate::models::Currency;

/// Mobile money channel in the provider's `type` field.
const MOBILE_MONEY_TYPE: &str = "1";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment gateway is not configured")]
    NotConfigured,

    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Payment gateway rejected the request: {message}")]
    Rejected { message: String, raw: Value },

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else {
            GatewayError::Unavailable(err.to_string())
        }
    }
}

/// Provider result code. Delivered either as a JSON string or number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GatewayCode {
    Number(i64),
    Text(String),
}

impl GatewayCode {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            GatewayCode::Number(n) => Some(*n),
            GatewayCode::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.as_i64() == Some(0)
    }
}

impl std::fmt::Display for GatewayCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayCode::Number(n) => write!(f, "{}", n),
            GatewayCode::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    Success,
    Failure,
    Pending,
}

impl GatewayOutcome {
    pub fn from_code(code: &GatewayCode) -> Self {
        if code.is_success() {
            GatewayOutcome::Success
        } else {
            GatewayOutcome::Failure
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayOutcome::Success => "success",
            GatewayOutcome::Failure => "failure",
            GatewayOutcome::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitiatePayment {
    /// E.164 digits without the leading `+`.
    pub phone: String,
    pub reference: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub callback_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentServiceRequest<'a> {
    merchant: &'a str,
    #[serde(rename = "type")]
    payment_type: &'static str,
    phone: &'a str,
    reference: &'a str,
    amount: String,
    currency: &'static str,
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentServiceResponse {
    code: GatewayCode,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    order_number: Option<String>,
    #[serde(default)]
    reference: Option<String>,
}

/// An initiation the provider accepted.
#[derive(Debug, Clone)]
pub struct InitiateAccepted {
    pub order_number: Option<String>,
    /// Provider-echoed reference; supersedes the one we generated.
    pub reference: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckResponse {
    code: GatewayCode,
    #[serde(default)]
    transaction: Option<CheckTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckTransaction {
    status: GatewayCode,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub outcome: GatewayOutcome,
    pub raw: Value,
}

/// Interpret a check response: transaction status 0 is success, 1 failure,
/// anything else still processing. Without a transaction object only an
/// explicit success code is conclusive.
pub fn outcome_from_check(raw: &Value) -> Result<GatewayOutcome, GatewayError> {
    let response: CheckResponse = serde_json::from_value(raw.clone())
        .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
    let outcome = match response.transaction {
        Some(transaction) => match transaction.status.as_i64() {
            Some(0) => GatewayOutcome::Success,
            Some(1) => GatewayOutcome::Failure,
            _ => GatewayOutcome::Pending,
        },
        None if response.code.is_success() => GatewayOutcome::Success,
        None => GatewayOutcome::Pending,
    };
    Ok(outcome)
}

/// Asynchronous result pushed by the provider to our callback URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub code: GatewayCode,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub amount_customer: Option<Value>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, request: &InitiatePayment) -> Result<InitiateAccepted, GatewayError>;

    async fn check(&self, order_number: &str) -> Result<CheckResult, GatewayError>;
}

/// HTTP client for the provider's `paymentService` and `check` endpoints.
#[derive(Clone)]
pub struct MobileMoneyClient {
    client: Client,
    config: GatewayConfig,
}

impl MobileMoneyClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Check if the merchant credentials are set.
    pub fn is_configured(&self) -> bool {
        !self.config.base_url.is_empty()
            && !self.config.merchant.is_empty()
            && !self.config.token.expose_secret().is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn read_json(response: reqwest::Response) -> Result<(StatusCode, Value), GatewayError> {
        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(status = %status, body = %body, "Gateway response");

        if status.is_server_error() {
            return Err(GatewayError::Unavailable(format!(
                "gateway returned {}",
                status
            )));
        }
        let raw: Value = serde_json::from_str(&body).map_err(|e| {
            GatewayError::InvalidResponse(format!("status {}: {}", status, e))
        })?;
        Ok((status, raw))
    }
}

#[async_trait]
impl PaymentGateway for MobileMoneyClient {
    async fn initiate(&self, request: &InitiatePayment) -> Result<InitiateAccepted, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let body = PaymentServiceRequest {
            merchant: &self.config.merchant,
            payment_type: MOBILE_MONEY_TYPE,
            phone: &request.phone,
            reference: &request.reference,
            amount: request.amount.normalize().to_string(),
            currency: request.currency.as_str(),
            callback_url: &request.callback_url,
        };

        let response = self
            .client
            .post(self.url("paymentService"))
            .bearer_auth(self.config.token.expose_secret())
            .json(&body)
            .send()
            .await?;
        let (status, raw) = Self::read_json(response).await?;

        let parsed: PaymentServiceResponse = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        if !status.is_success() || !parsed.code.is_success() {
            let message = parsed
                .message
                .unwrap_or_else(|| format!("code {} (HTTP {})", parsed.code, status));
            tracing::warn!(
                reference = %request.reference,
                code = %parsed.code,
                message = %message,
                "Gateway rejected payment initiation"
            );
            return Err(GatewayError::Rejected { message, raw });
        }

        tracing::info!(
            reference = %request.reference,
            order_number = ?parsed.order_number,
            "Gateway accepted payment initiation"
        );
        Ok(InitiateAccepted {
            order_number: parsed.order_number,
            reference: parsed.reference,
            raw,
        })
    }

    async fn check(&self, order_number: &str) -> Result<CheckResult, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let response = self
            .client
            .get(self.url(&format!("check/{}", order_number)))
            .bearer_auth(self.config.token.expose_secret())
            .send()
            .await?;
        let (_, raw) = Self::read_json(response).await?;
        let outcome = outcome_from_check(&raw)?;

        tracing::info!(
            order_number = %order_number,
            outcome = outcome.as_str(),
            "Gateway check completed"
        );
        Ok(CheckResult { outcome, raw })
    }
}

/// How [`MockGateway::initiate`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MockInitiateMode {
    Accept = 0,
    Reject = 1,
    Unavailable = 2,
}

/// In-process gateway for tests and local runs.
///
/// Accepted initiations get order numbers `ORD-<n>`; `check` answers with
/// whatever outcome was set for the order, `Pending` by default.
#[derive(Default)]
pub struct MockGateway {
    mode: AtomicU8,
    orders: AtomicU64,
    checks: AtomicU64,
    outcomes: DashMap<String, GatewayOutcome>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_initiate_mode(&self, mode: MockInitiateMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    pub fn set_check_outcome(&self, order_number: &str, outcome: GatewayOutcome) {
        self.outcomes.insert(order_number.to_string(), outcome);
    }

    pub fn initiate_count(&self) -> u64 {
        self.orders.load(Ordering::SeqCst)
    }

    pub fn check_count(&self) -> u64 {
        self.checks.load(Ordering::SeqCst)
    }

    fn mode(&self) -> MockInitiateMode {
        match self.mode.load(Ordering::SeqCst) {
            1 => MockInitiateMode::Reject,
            2 => MockInitiateMode::Unavailable,
            _ => MockInitiateMode::Accept,
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initiate(&self, request: &InitiatePayment) -> Result<InitiateAccepted, GatewayError> {
        let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
        match self.mode() {
            MockInitiateMode::Accept => {
                let order_number = format!("ORD-{}", n);
                let raw = serde_json::json!({
                    "code": "0",
                    "message": "Transaction envoyée",
                    "orderNumber": order_number,
                    "reference": request.reference,
                });
                Ok(InitiateAccepted {
                    order_number: Some(order_number),
                    reference: Some(request.reference.clone()),
                    raw,
                })
            }
            MockInitiateMode::Reject => Err(GatewayError::Rejected {
                message: "Numéro invalide".to_string(),
                raw: serde_json::json!({ "code": "1", "message": "Numéro invalide" }),
            }),
            MockInitiateMode::Unavailable => {
                Err(GatewayError::Unavailable("connection refused".to_string()))
            }
        }
    }

    async fn check(&self, order_number: &str) -> Result<CheckResult, GatewayError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcomes
            .get(order_number)
            .map(|entry| *entry.value())
            .unwrap_or(GatewayOutcome::Pending);
        let status = match outcome {
            GatewayOutcome::Success => "0",
            GatewayOutcome::Failure => "1",
            GatewayOutcome::Pending => "2",
        };
        Ok(CheckResult {
            outcome,
            raw: serde_json::json!({
                "code": "0",
                "transaction": { "orderNumber": order_number, "status": status },
            }),
        })
    }
}
