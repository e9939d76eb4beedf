//! In-memory transport that records every send.
//!
//! Used by tests and by deployments that have no provider key configured;
//! each accepted send gets a synthetic message id.

use super::{EmailTransport, OutboundEmail, SendReceipt};
use crate::errors::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub struct CaptureTransport {
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
    /// When set, every send fails with this message. Lets tests exercise the
    /// transport-failure paths.
    fail_with: Option<String>,
}

impl CaptureTransport {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_with: Some(message.into()),
        }
    }

    /// Snapshot of everything sent so far.
    pub async fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

impl Default for CaptureTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailTransport for CaptureTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TransportError> {
        if let Some(message) = &self.fail_with {
            return Err(TransportError::ProviderRejected {
                status: 500,
                details: message.clone(),
            });
        }

        let mut sent = self.sent.lock().await;
        sent.push(email.clone());
        let message_id = format!("msg_{}", Uuid::new_v4());
        debug!(to = %email.to, subject = %email.subject, message_id = %message_id, "Captured outbound email");
        Ok(SendReceipt { message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::collections::HashMap;

    fn email(to: &str) -> OutboundEmail {
        OutboundEmail {
            from: "Mailflow <noreply@example.com>".to_string(),
            to: to.to_string(),
            subject: "subject".to_string(),
            html: "<p>body</p>".to_string(),
            text: None,
            headers: HashMap::new(),
            tags: Vec::new(),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn records_sends_in_order() {
        let transport = CaptureTransport::new();
        transport.send(&email("a@example.com")).await.unwrap();
        transport.send(&email("b@example.com")).await.unwrap();

        let sent = transport.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "a@example.com");
        assert_eq!(sent[1].to, "b@example.com");
    }

    #[tokio::test]
    async fn failing_transport_rejects_everything() {
        let transport = CaptureTransport::failing("provider down");
        let result = transport.send(&email("a@example.com")).await;
        assert!(result.is_err());
        assert_eq!(transport.sent_count().await, 0);
    }
}
