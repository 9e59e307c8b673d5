//! Serving side of a gateway channel
//!
//! Each request runs in its own task. Whatever the handler does, the caller
//! gets exactly one terminal envelope and the channel keeps serving.

use crate::error::ProtocolError;
use crate::gateway::{Channel, Envelope, ErrorPayload, Exposure};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Value) -> Result<Value>;
}

pub struct GatewayServer {
    handler: Arc<dyn RequestHandler>,
    exposure: Exposure,
}

impl GatewayServer {
    pub fn new(handler: Arc<dyn RequestHandler>, exposure: Exposure) -> Self {
        Self { handler, exposure }
    }

    /// Serve requests until the peer goes away
    pub async fn serve(&self, channel: Arc<dyn Channel>) {
        let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let mut tasks = Vec::new();

        while let Some(envelope) = channel.recv().await {
            let (req_id, payload) = match envelope {
                Envelope::Request { req_id, payload } => (req_id, payload),
                other => {
                    debug!(kind = ?other.req_id(), "Ignoring non-request envelope");
                    continue;
                }
            };
            if !in_flight.lock().insert(req_id.clone()) {
                warn!(req_id = %req_id, "Duplicate reqId while in flight; ignored");
                continue;
            }

            let handler = self.handler.clone();
            let channel = channel.clone();
            let in_flight = in_flight.clone();
            let exposure = self.exposure;
            tasks.push(tokio::spawn(async move {
                let reply = run_handler(handler, req_id.clone(), payload, exposure).await;
                in_flight.lock().remove(&req_id);
                if let Err(e) = channel.send(reply).await {
                    debug!(req_id = %req_id, error = %e, "Could not deliver reply");
                }
            }));
            tasks.retain(|t: &JoinHandle<()>| !t.is_finished());
        }

        // Let running handlers deliver (or fail to deliver) their replies
        for task in tasks {
            let _ = task.await;
        }
        info!("Gateway channel closed");
    }
}

async fn run_handler(
    handler: Arc<dyn RequestHandler>,
    req_id: String,
    payload: Value,
    exposure: Exposure,
) -> Envelope {
    // Spawned separately so a panicking handler is contained to its request
    let outcome = tokio::spawn(async move { handler.handle(payload).await }).await;
    match outcome {
        Ok(Ok(payload)) => Envelope::Response { req_id, payload },
        Ok(Err(e)) => {
            debug!(req_id = %req_id, code = e.code(), "Request failed");
            Envelope::Error {
                req_id,
                payload: ErrorPayload::from_error(&e, exposure),
            }
        }
        Err(join) => {
            error!(req_id = %req_id, error = %join, "Request handler threw");
            let err = crate::Error::from(ProtocolError::HandlerThrew(join.to_string()));
            Envelope::Error {
                req_id,
                payload: ErrorPayload::from_error(&err, exposure),
            }
        }
    }
}

/// Push every broadcast value to `channel` as a notification
pub fn forward_notifications(channel: Arc<dyn Channel>, mut rx: broadcast::Receiver<Value>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(payload) => {
                    if channel.send(Envelope::Notification { payload }).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
