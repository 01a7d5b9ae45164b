//! WebSocket transport to the signaling relay

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::session::ClientEvent;
use crate::signaling::{OutboundSignal, SignalingEvent, SignalingTransport};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use url::Url;

// ============================================================================
// WebSocket Signaling
// ============================================================================

pub struct WebSocketSignaling {
    sender: mpsc::UnboundedSender<WsMessage>,
    connected: Arc<AtomicBool>,
}

impl WebSocketSignaling {
    /// Connect to the relay and start the reader and writer tasks.
    ///
    /// Decoded frames are posted to `events` as [`ClientEvent::Signal`]; when
    /// the socket closes a single `Disconnected` event follows.
    pub async fn connect(
        config: &ClientConfig,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Self> {
        let url = Url::parse(&config.ws_url())?;
        info!("Connecting to signaling relay at {}", url);

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let connected = Arc::new(AtomicBool::new(true));
        let connected_clone = connected.clone();

        // Receive task
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if let Some(event) = SignalingEvent::decode(&text) {
                            if events.send(ClientEvent::Signal(event)).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Err(e) => {
                        warn!("Signaling socket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            connected_clone.store(false, Ordering::SeqCst);
            let _ = events.send(ClientEvent::Signal(SignalingEvent::Disconnected));
        });

        // Send task
        let connected_writer = connected.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if msg.is_close() {
                    break;
                }
                if let Err(e) = write.send(msg).await {
                    warn!("Signaling send failed: {}", e);
                    connected_writer.store(false, Ordering::SeqCst);
                    break;
                }
            }
            if let Err(e) = write.close().await {
                debug!("Closing signaling socket: {}", e);
            }
        });

        Ok(Self {
            sender: tx,
            connected,
        })
    }

    /// Close the socket. The reader task posts `Disconnected` once the
    /// relay acknowledges the close.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Disconnecting from signaling relay");
            let _ = self.sender.send(WsMessage::Close(None));
        }
    }
}

#[async_trait]
impl SignalingTransport for WebSocketSignaling {
    async fn send(&self, message: OutboundSignal) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        debug!("Sending {}", message.event_name());
        self.sender
            .send(WsMessage::Text(message.encode()?))
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionType, PeerId};
    use serde_json::Value;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_round_trip_with_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let relay = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(WsMessage::Text(
                r#"{"type":"connect","payload":{"id":"socket-1"}}"#.to_string(),
            ))
            .await
            .unwrap();

            let frame = loop {
                match ws.next().await.unwrap().unwrap() {
                    WsMessage::Text(text) => break text,
                    _ => continue,
                }
            };
            ws.close(None).await.unwrap();
            frame
        });

        let config = ClientConfig::new("127.0.0.1", port, false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let signaling = WebSocketSignaling::connect(&config, tx).await.unwrap();

        match rx.recv().await {
            Some(ClientEvent::Signal(SignalingEvent::Connected { peer_id })) => {
                assert_eq!(peer_id, PeerId::from("socket-1"));
            }
            other => panic!("Expected connect event, got {:?}", other),
        }

        signaling
            .send(OutboundSignal::PreOffer {
                connection_type: ConnectionType::Chat,
                target: PeerId::from("callee"),
            })
            .await
            .unwrap();

        let frame: Value = serde_json::from_str(&relay.await.unwrap()).unwrap();
        assert_eq!(frame["type"], "preOffer");
        assert_eq!(frame["payload"]["personal_code"], "callee");
        assert_eq!(frame["payload"]["connection_type"], "personal_code_chat");

        loop {
            match rx.recv().await {
                Some(ClientEvent::Signal(SignalingEvent::Disconnected)) => break,
                Some(_) => continue,
                None => panic!("Event channel closed before disconnect"),
            }
        }
        assert!(!signaling.is_connected());
        assert!(matches!(
            signaling.send(OutboundSignal::RegisterCode { code: "x".into() }).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_closes_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let relay = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut saw_close = false;
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    saw_close = true;
                }
            }
            saw_close
        });

        let config = ClientConfig::new("127.0.0.1", port, false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let signaling = WebSocketSignaling::connect(&config, tx).await.unwrap();
        assert!(signaling.is_connected());

        signaling.disconnect();
        assert!(!signaling.is_connected());
        assert!(relay.await.unwrap());

        loop {
            match rx.recv().await {
                Some(ClientEvent::Signal(SignalingEvent::Disconnected)) => break,
                Some(_) => continue,
                None => panic!("Event channel closed before disconnect"),
            }
        }
    }
}
