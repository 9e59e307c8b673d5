//! Transport adapters
//!
//! Correlation lives above this layer; a channel only moves envelopes.

use crate::error::ProtocolError;
use crate::gateway::Envelope;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Bidirectional envelope transport
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), ProtocolError>;

    /// Next inbound envelope; `None` once the peer is gone
    async fn recv(&self) -> Option<Envelope>;
}

/// In-process channel end
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl MemoryChannel {
    /// Two connected ends
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
        )
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&self, envelope: Envelope) -> Result<(), ProtocolError> {
        self.tx.send(envelope).map_err(|_| ProtocolError::ChannelClosed)
    }

    async fn recv(&self) -> Option<Envelope> {
        self.rx.lock().await.recv().await
    }
}

/// Newline-delimited JSON over any byte stream
pub struct JsonLinesChannel<R, W> {
    lines: Mutex<Lines<BufReader<R>>>,
    writer: Mutex<W>,
}

impl<R, W> JsonLinesChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(reader).lines()),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<R, W> Channel for JsonLinesChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, envelope: Envelope) -> Result<(), ProtocolError> {
        let mut line =
            serde_json::to_string(&envelope).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|_| ProtocolError::ChannelClosed)?;
        writer.flush().await.map_err(|_| ProtocolError::ChannelClosed)
    }

    async fn recv(&self) -> Option<Envelope> {
        let mut lines = self.lines.lock().await;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "Channel read failed");
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(envelope) => return Some(envelope),
                Err(e) => warn!(error = %e, "Dropping malformed message"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_pair_is_bidirectional() {
        let (a, b) = MemoryChannel::pair();
        a.send(Envelope::Notification { payload: json!(1) }).await.unwrap();
        b.send(Envelope::Notification { payload: json!(2) }).await.unwrap();
        assert_eq!(b.recv().await, Some(Envelope::Notification { payload: json!(1) }));
        assert_eq!(a.recv().await, Some(Envelope::Notification { payload: json!(2) }));
    }

    #[tokio::test]
    async fn memory_send_fails_once_peer_dropped() {
        let (a, b) = MemoryChannel::pair();
        drop(b);
        assert_eq!(
            a.send(Envelope::Notification { payload: json!(null) }).await,
            Err(ProtocolError::ChannelClosed)
        );
        assert_eq!(a.recv().await, None);
    }

    #[tokio::test]
    async fn json_lines_skip_garbage() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);
        let channel = JsonLinesChannel::new(server_read, server_write);

        client_write
            .write_all(b"not json\n\n{\"type\":\"Request\",\"reqId\":\"r1\",\"payload\":{}}\n")
            .await
            .unwrap();
        assert_eq!(
            channel.recv().await,
            Some(Envelope::Request {
                req_id: "r1".into(),
                payload: json!({}),
            })
        );

        channel
            .send(Envelope::Response {
                req_id: "r1".into(),
                payload: json!(true),
            })
            .await
            .unwrap();
        let mut lines = BufReader::new(client_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&line).unwrap(),
            json!({"type": "Response", "reqId": "r1", "payload": true})
        );
    }
}
