//! Requesting side of a gateway channel

use crate::error::ProtocolError;
use crate::gateway::{Channel, Envelope};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, ProtocolError>>>>>;

const NOTIFICATION_BUFFER: usize = 64;

/// Correlates requests with their terminal responses over one channel
///
/// Every request gets a fresh `reqId`, and resolves exactly once: with the
/// matching response, the matching error, or a timeout.
pub struct GatewayClient {
    channel: Arc<dyn Channel>,
    pending: Pending,
    notifications: broadcast::Sender<Value>,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl GatewayClient {
    /// Start reading `channel`; must be called within a tokio runtime
    pub fn connect(channel: Arc<dyn Channel>, timeout: Duration) -> Self {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let reader = tokio::spawn(read_loop(channel.clone(), pending.clone(), notifications.clone()));
        Self {
            channel,
            pending,
            notifications,
            timeout,
            reader,
        }
    }

    pub async fn request(&self, payload: Value) -> Result<Value, ProtocolError> {
        let req_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(req_id.clone(), tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            req_id: &req_id,
        };

        self.channel
            .send(Envelope::Request {
                req_id: req_id.clone(),
                payload,
            })
            .await?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::ChannelClosed),
            Err(_) => {
                debug!(req_id = %req_id, "Request timed out");
                Err(ProtocolError::Timeout)
            }
        }
    }

    /// Typed convenience over `request`
    pub async fn call<Req, Resp>(&self, request: &Req) -> crate::Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)?;
        let response = self.request(payload).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Receive notifications pushed by the other side
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.notifications.subscribe()
    }

    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Forgets a request's pending entry however `request` ends, cancellation included
struct PendingSlot<'a> {
    pending: &'a Pending,
    req_id: &'a str,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.req_id);
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("timeout", &self.timeout)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

async fn read_loop(channel: Arc<dyn Channel>, pending: Pending, notifications: broadcast::Sender<Value>) {
    while let Some(envelope) = channel.recv().await {
        match envelope {
            Envelope::Response { req_id, payload } => resolve(&pending, &req_id, Ok(payload)),
            Envelope::Error { req_id, payload } => resolve(
                &pending,
                &req_id,
                Err(ProtocolError::Remote {
                    message: payload.message,
                    code: payload.code,
                }),
            ),
            Envelope::Notification { payload } => {
                // No subscribers is fine
                let _ = notifications.send(payload);
            }
            Envelope::Request { req_id, .. } => {
                warn!(req_id = %req_id, "Unexpected request on client channel")
            }
        }
    }

    // Peer is gone: fail everything still waiting
    for (_, tx) in pending.lock().drain() {
        let _ = tx.send(Err(ProtocolError::ChannelClosed));
    }
}

fn resolve(pending: &Pending, req_id: &str, result: Result<Value, ProtocolError>) {
    match pending.lock().remove(req_id) {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => debug!(req_id, "Dropping response with unknown reqId"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ErrorPayload, MemoryChannel};
    use serde_json::json;

    fn client_and_peer(timeout_ms: u64) -> (GatewayClient, Arc<MemoryChannel>) {
        let (ours, theirs) = MemoryChannel::pair();
        let client = GatewayClient::connect(Arc::new(ours), Duration::from_millis(timeout_ms));
        (client, Arc::new(theirs))
    }

    async fn next_request(peer: &MemoryChannel) -> (String, Value) {
        match peer.recv().await {
            Some(Envelope::Request { req_id, payload }) => (req_id, payload),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn responses_resolve_their_own_request() {
        let (client, peer) = client_and_peer(1_000);
        let client = Arc::new(client);

        let c = client.clone();
        let first = tokio::spawn(async move { c.request(json!("one")).await });
        let (id_one, _) = next_request(&peer).await;
        let c = client.clone();
        let second = tokio::spawn(async move { c.request(json!("two")).await });
        let (id_two, _) = next_request(&peer).await;
        assert_ne!(id_one, id_two);

        // Answer out of order
        peer.send(Envelope::Response {
            req_id: id_two,
            payload: json!(2),
        })
        .await
        .unwrap();
        peer.send(Envelope::Response {
            req_id: id_one,
            payload: json!(1),
        })
        .await
        .unwrap();

        assert_eq!(first.await.unwrap().unwrap(), json!(1));
        assert_eq!(second.await.unwrap().unwrap(), json!(2));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn error_response_becomes_remote_error() {
        let (client, peer) = client_and_peer(1_000);
        let responder = tokio::spawn(async move {
            let (req_id, _) = next_request(&peer).await;
            peer.send(Envelope::Error {
                req_id,
                payload: ErrorPayload::new("locked", Some("LOCKED")),
            })
            .await
            .unwrap();
            peer
        });

        let err = client.request(json!({})).await.unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Remote {
                message: "locked".into(),
                code: Some("LOCKED".into()),
            }
        );
        drop(responder.await.unwrap());
    }

    #[tokio::test]
    async fn unanswered_request_times_out_and_is_forgotten() {
        let (client, peer) = client_and_peer(30);
        let err = client.request(json!({})).await.unwrap_err();
        assert_eq!(err, ProtocolError::Timeout);
        assert_eq!(client.in_flight(), 0);

        // A late answer is dropped quietly
        let (req_id, _) = next_request(&peer).await;
        peer.send(Envelope::Response {
            req_id,
            payload: json!("late"),
        })
        .await
        .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn notifications_are_broadcast() {
        let (client, peer) = client_and_peer(1_000);
        let mut rx = client.subscribe();
        peer.send(Envelope::Notification {
            payload: json!({"type": "Locked"}),
        })
        .await
        .unwrap();
        assert_eq!(rx.recv().await.unwrap(), json!({"type": "Locked"}));
    }

    #[tokio::test]
    async fn closed_channel_fails_pending_requests() {
        let (client, peer) = client_and_peer(5_000);
        let closer = tokio::spawn(async move {
            next_request(&peer).await;
            drop(peer);
        });
        let err = client.request(json!({})).await.unwrap_err();
        assert_eq!(err, ProtocolError::ChannelClosed);
        closer.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_request_is_forgotten() {
        let (client, peer) = client_and_peer(5_000);
        let client = Arc::new(client);

        let c = client.clone();
        let waiting = tokio::spawn(async move { c.request(json!("never answered")).await });
        next_request(&peer).await;
        assert_eq!(client.in_flight(), 1);

        waiting.abort();
        assert!(waiting.await.unwrap_err().is_cancelled());
        assert_eq!(client.in_flight(), 0);
    }
}
