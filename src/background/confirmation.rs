//! Explicit user approval for high-risk requests
//!
//! The background opens a dedicated confirmation surface, sends it one
//! correlated request describing the action and waits for the user's
//! approve/decline as the response.

use crate::dispatch::{Estimate, FeeOverrides, OperationParams};
use crate::gateway::{Channel, GatewayClient};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// What the user is asked to approve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ConfirmationRequest {
    Operations {
        origin: String,
        source: String,
        operations: Vec<OperationParams>,
        estimates: Option<Vec<Estimate>>,
        /// Fee settings proposed by the requester
        overrides: FeeOverrides,
    },
    SignPayload {
        origin: String,
        source: String,
        /// Hex-encoded bytes to be signed
        payload: String,
    },
    RevealMnemonic,
    RemoveAccount {
        address: String,
    },
}

impl ConfirmationRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfirmationRequest::Operations { .. } => "Operations",
            ConfirmationRequest::SignPayload { .. } => "SignPayload",
            ConfirmationRequest::RevealMnemonic => "RevealMnemonic",
            ConfirmationRequest::RemoveAccount { .. } => "RemoveAccount",
        }
    }
}

/// The surface's answer
///
/// For operation prompts, `overrides` are the fee settings the user accepted.
/// Whatever the requester proposed only applies if the surface sends it back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationDecision {
    pub approved: bool,
    #[serde(default)]
    pub overrides: FeeOverrides,
}

impl ConfirmationDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            overrides: FeeOverrides::default(),
        }
    }

    pub fn decline() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait Confirmer: Send + Sync {
    /// `approved` is set only on explicit approval
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<ConfirmationDecision>;
}

/// Opens a fresh confirmation surface and returns the channel to it
#[async_trait]
pub trait SurfaceLauncher: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn Channel>>;
}

/// Asks a dedicated surface over the gateway
pub struct SurfaceConfirmer {
    launcher: Arc<dyn SurfaceLauncher>,
    timeout: Duration,
}

impl SurfaceConfirmer {
    pub fn new(launcher: Arc<dyn SurfaceLauncher>, timeout: Duration) -> Self {
        Self { launcher, timeout }
    }
}

#[async_trait]
impl Confirmer for SurfaceConfirmer {
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<ConfirmationDecision> {
        let channel = self.launcher.open().await?;
        let client = GatewayClient::connect(channel, self.timeout);
        let decision: ConfirmationDecision = client.call(request).await?;
        info!(kind = request.kind(), approved = decision.approved, "Confirmation answered");
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::gateway::{Envelope, MemoryChannel};
    use crate::Error;
    use serde_json::{json, Value};

    /// Launches a surface that answers every prompt with `reply`
    struct ScriptedSurface {
        reply: Option<Value>,
    }

    #[async_trait]
    impl SurfaceLauncher for ScriptedSurface {
        async fn open(&self) -> Result<Arc<dyn Channel>> {
            let (background, surface) = MemoryChannel::pair();
            let reply = self.reply.clone();
            tokio::spawn(async move {
                while let Some(Envelope::Request { req_id, payload }) = surface.recv().await {
                    assert!(payload.get("type").is_some());
                    if let Some(payload) = reply.clone() {
                        let _ = surface.send(Envelope::Response { req_id, payload }).await;
                    }
                }
            });
            Ok(Arc::new(background))
        }
    }

    fn confirmer(reply: Option<Value>) -> SurfaceConfirmer {
        SurfaceConfirmer::new(Arc::new(ScriptedSurface { reply }), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn approval_and_decline_are_reported() {
        assert_eq!(
            confirmer(Some(json!({"approved": true})))
                .confirm(&ConfirmationRequest::RevealMnemonic)
                .await
                .unwrap(),
            ConfirmationDecision::approve()
        );
        assert_eq!(
            confirmer(Some(json!({"approved": false})))
                .confirm(&ConfirmationRequest::RemoveAccount {
                    address: "tz1abc".into()
                })
                .await
                .unwrap(),
            ConfirmationDecision::decline()
        );
    }

    #[tokio::test]
    async fn accepted_fees_come_back_with_the_decision() {
        let decision = confirmer(Some(json!({"approved": true, "overrides": {"fee": 2500}})))
            .confirm(&ConfirmationRequest::Operations {
                origin: "https://dapp.example".into(),
                source: "tz1abc".into(),
                operations: vec![OperationParams::transfer("tz1dest", "1")],
                estimates: None,
                overrides: FeeOverrides {
                    fee: Some(9_000_000),
                    storage_limit: None,
                },
            })
            .await
            .unwrap();
        assert!(decision.approved);
        assert_eq!(decision.overrides.fee, Some(2500));
    }

    #[tokio::test]
    async fn silent_surface_times_out() {
        let err = confirmer(None)
            .confirm(&ConfirmationRequest::RevealMnemonic)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::Timeout)));
    }

    #[test]
    fn prompt_wire_shape() {
        let prompt = ConfirmationRequest::SignPayload {
            origin: "https://dapp.example".into(),
            source: "tz1abc".into(),
            payload: "0a0b".into(),
        };
        assert_eq!(
            serde_json::to_value(&prompt).unwrap(),
            json!({"type": "SignPayload", "origin": "https://dapp.example", "source": "tz1abc", "payload": "0a0b"})
        );
    }
}
