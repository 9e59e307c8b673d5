//! Relay between a page context and the background
//!
//! The relay never interprets a page payload. It wraps it with the origin
//! the host attributed to the page and forwards it upstream, then hands the
//! background's answer back under the page's own `reqId`.

use crate::error::ProtocolError;
use crate::gateway::{Channel, Envelope, ErrorPayload, GatewayClient};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// A page payload as the background receives it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedRequest {
    pub origin: String,
    pub payload: Value,
}

pub struct Relay {
    origin: String,
    upstream: Arc<GatewayClient>,
}

impl Relay {
    pub fn new(origin: impl Into<String>, upstream: Arc<GatewayClient>) -> Self {
        Self {
            origin: origin.into(),
            upstream,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Upstream request for a page payload
    ///
    /// Tagged so it deserializes as the background's page-request variant.
    pub fn wrap(&self, payload: Value) -> Value {
        serde_json::json!({
            "type": "PageRequest",
            "origin": self.origin,
            "payload": payload,
        })
    }

    /// Forward page requests until the page goes away
    pub async fn run(self: Arc<Self>, page: Arc<dyn Channel>) {
        info!(origin = %self.origin, "Relay attached");
        while let Some(envelope) = page.recv().await {
            let Envelope::Request { req_id, payload } = envelope else {
                debug!(origin = %self.origin, "Ignoring non-request from page");
                continue;
            };

            let relay = self.clone();
            let page = page.clone();
            tokio::spawn(async move {
                let reply = match relay.upstream.request(relay.wrap(payload)).await {
                    Ok(payload) => Envelope::Response { req_id, payload },
                    Err(e) => Envelope::Error {
                        req_id,
                        payload: page_error(e),
                    },
                };
                let _ = page.send(reply).await;
            });
        }
        info!(origin = %self.origin, "Relay detached");
    }
}

fn page_error(err: ProtocolError) -> ErrorPayload {
    match err {
        // Already shaped for pages by the background
        ProtocolError::Remote { message, code } => ErrorPayload { message, code },
        ProtocolError::Timeout => ErrorPayload::new("Request timed out", Some("TIMEOUT")),
        _ => ErrorPayload::new("Wallet unavailable", Some("CHANNEL_CLOSED")),
    }
}
