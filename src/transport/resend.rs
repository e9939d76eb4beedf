//! Resend HTTP transport.

use super::{EmailTransport, OutboundEmail, SendReceipt};
use crate::errors::TransportError;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, error, instrument};

const RESEND_API_URL: &str = "https://api.resend.com/emails";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ResendTransport {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
}

impl ResendTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_url: RESEND_API_URL.to_string(),
        }
    }

    /// Point the transport at a different endpoint (testing against a stub
    /// server).
    pub fn with_api_url(api_key: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_url: api_url.into(),
        }
    }

    fn build_payload(email: &OutboundEmail) -> Value {
        let headers: Value = email
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<serde_json::Map<String, Value>>()
            .into();

        let tags: Vec<Value> = email
            .tags
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect();

        let mut payload = json!({
            "from": email.from,
            "to": [email.to],
            "subject": email.subject,
            "html": email.html,
            "headers": headers,
            "tags": tags,
        });

        if let Some(text) = &email.text {
            payload["text"] = Value::String(text.clone());
        }

        payload
    }
}

#[async_trait]
impl EmailTransport for ResendTransport {
    #[instrument(skip(self, email), fields(to = %email.to, subject = %email.subject))]
    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TransportError> {
        let payload = Self::build_payload(email);

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = ?e, "Email send request failed");
                TransportError::HttpRequestFailed { source: e }
            })?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), details = %details, "Provider rejected send");
            return Err(TransportError::ProviderRejected {
                status: status.as_u16(),
                details,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TransportError::HttpRequestFailed { source: e })?;

        let message_id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or(TransportError::MissingMessageId)?
            .to_string();

        debug!(message_id = %message_id, "Email accepted by provider");
        Ok(SendReceipt { message_id })
    }
}
