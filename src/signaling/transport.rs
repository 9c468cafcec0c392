//! Transport-Schicht des Signaling-Kanals
//!
//! Der [`ConnectionManager`](super::ConnectionManager) kennt nur den
//! [`Connector`]: ein Handshake liefert einen [`ChannelLink`] aus zwei
//! mpsc-Kanälen. Die WebSocket-Implementierung überbrückt Socket und Kanäle
//! mit je einem Read- und Write-Task. In Tests wird ein In-Memory-Connector
//! eingesetzt.

use super::SignalingError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Puffergröße der Link-Kanäle
const LINK_BUFFER: usize = 100;

/// Ping-Intervall, damit Idle-Timeouts der Gegenstelle nicht greifen
const PING_INTERVAL: Duration = Duration::from_secs(25);

/// Eine aufgebaute Verbindung
///
/// Endet `inbound` (liefert `None`), ist die Verbindung weg. Droppen von
/// `outbound` schließt die Verbindung von unserer Seite.
#[derive(Debug)]
pub struct ChannelLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

/// Baut die physische Verbindung auf
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, endpoint: &Url, credential: &str) -> Result<ChannelLink, SignalingError>;
}

// ============================================================================
// WEBSOCKET CONNECTOR
// ============================================================================

/// WebSocket-Connector auf Basis von tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Url, credential: &str) -> Result<ChannelLink, SignalingError> {
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        tracing::info!("Opening signaling socket: {}", endpoint);

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<String>(LINK_BUFFER);

        // Read-Task: Textframes weiterreichen bis Close oder Fehler
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!("WebSocket closed by server: {:?}", frame);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        // Write-Task: ausgehende Frames plus Ping
        tokio::spawn(async move {
            let mut ping = tokio::time::interval_at(
                tokio::time::Instant::now() + PING_INTERVAL,
                PING_INTERVAL,
            );
            loop {
                tokio::select! {
                    next = out_rx.recv() => match next {
                        Some(text) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                tracing::warn!("Failed to send WebSocket message: {}", e);
                                break;
                            }
                        }
                        None => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    _ = ping.tick() => {
                        if write.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(ChannelLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

// ============================================================================
// IN-MEMORY CONNECTOR (TESTS)
// ============================================================================

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serverseite eines In-Memory-Links
    pub(crate) struct RemoteEnd {
        /// Was der Client gesendet hat
        pub(crate) from_client: mpsc::Receiver<String>,
        /// Frames an den Client; droppen trennt die Verbindung
        pub(crate) to_client: mpsc::Sender<String>,
    }

    impl RemoteEnd {
        pub(crate) async fn push(&self, frame: serde_json::Value) {
            self.to_client
                .send(frame.to_string())
                .await
                .expect("client link dropped");
        }

        /// Alle bisher gesendeten Client-Frames als JSON
        pub(crate) fn drain(&mut self) -> Vec<serde_json::Value> {
            let mut frames = Vec::new();
            while let Ok(text) = self.from_client.try_recv() {
                frames.push(serde_json::from_str(&text).expect("client sent invalid json"));
            }
            frames
        }
    }

    /// Verhalten eines einzelnen Handshakes
    pub(crate) enum Handshake {
        Accept,
        Refuse(String),
        /// Hängt bis zum Timeout des Aufrufers
        Stall,
    }

    #[derive(Clone, Default)]
    pub(crate) struct MemoryConnector {
        pub(crate) opens: Arc<AtomicUsize>,
        script: Arc<Mutex<VecDeque<Handshake>>>,
        remotes: Arc<Mutex<VecDeque<RemoteEnd>>>,
        handshake_delay: Arc<Mutex<Option<Duration>>>,
    }

    impl MemoryConnector {
        /// Legt das Verhalten der nächsten Handshakes fest; danach: Accept
        pub(crate) fn script(&self, steps: impl IntoIterator<Item = Handshake>) {
            self.script.lock().extend(steps);
        }

        pub(crate) fn set_handshake_delay(&self, delay: Duration) {
            *self.handshake_delay.lock() = Some(delay);
        }

        pub(crate) fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        /// Serverseite des ältesten noch nicht abgeholten Links
        pub(crate) fn take_remote(&self) -> RemoteEnd {
            self.remotes.lock().pop_front().expect("no link opened")
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn open(&self, _endpoint: &Url, _credential: &str) -> Result<ChannelLink, SignalingError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let delay = *self.handshake_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let step = self.script.lock().pop_front().unwrap_or(Handshake::Accept);
            match step {
                Handshake::Accept => {}
                Handshake::Refuse(reason) => return Err(SignalingError::ConnectionFailed(reason)),
                Handshake::Stall => futures::future::pending::<()>().await,
            }

            let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
            let (in_tx, in_rx) = mpsc::channel(LINK_BUFFER);
            self.remotes.lock().push_back(RemoteEnd {
                from_client: out_rx,
                to_client: in_tx,
            });
            Ok(ChannelLink {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }
}
