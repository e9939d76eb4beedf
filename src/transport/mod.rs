//! Outbound email transport abstraction.
//!
//! The engine only knows one capability: send a rendered email and get back
//! a provider message id or a typed failure. The Resend HTTP implementation
//! is the production transport; the capturing implementation backs tests.

use crate::errors::TransportError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

mod capture;
mod resend;

pub use capture::CaptureTransport;
pub use resend::ResendTransport;

/// A fully rendered email ready for delivery.
#[derive(Clone, Debug)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    pub headers: HashMap<String, String>,
    /// Provider-visible name/value tags (template name, organization).
    pub tags: Vec<(String, String)>,
    /// Caller metadata carried for logging only.
    pub metadata: Map<String, Value>,
}

/// Provider acknowledgement of an accepted send.
#[derive(Clone, Debug)]
pub struct SendReceipt {
    pub message_id: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TransportError>;
}
