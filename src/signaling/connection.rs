//! Connection Manager für den Signaling-Kanal
//!
//! Verwaltet den Lebenszyklus des persistenten Kanals:
//! - Verbindungsaufbau über einen austauschbaren [`Connector`]
//! - Automatische Reconnection mit begrenzter Anzahl Versuchen
//! - `connect_and_wait` mit genau einem Handshake pro laufendem Versuch
//! - Event-basierte Kommunikation ([`ConnectionEvent`], [`ServerMessage`])
//!
//! Nur der Besitzer (die Anwendung) ruft `disconnect()`. Calls und Chat
//! senden lediglich über den Kanal.

use super::messages::{ClientMessage, ServerMessage};
use super::transport::{ChannelLink, Connector, WebSocketConnector};
use crate::config::{CoreConfig, ReconnectPolicy};
use crate::observer::{Emitter, Subscription};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalingError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Server error: {code} - {message}")]
    ServerError { code: i32, message: String },

    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed by client")]
    Closed,

    #[error("Gave up after {0} reconnect attempts")]
    ReconnectExhausted(u32),
}

// ============================================================================
// CONNECTION STATE & EVENTS
// ============================================================================

/// Zustand des Signaling-Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Warum der Kanal getrennt wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` wurde aufgerufen
    ClientRequested,
    /// Gegenstelle oder Netzwerk hat die Verbindung beendet
    TransportClosed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientRequested => f.write_str("client disconnect"),
            Self::TransportClosed => f.write_str("transport close"),
        }
    }
}

/// Events die vom ConnectionManager ausgelöst werden
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Verbunden (auch nach erfolgreichem Reconnect)
    Connected,

    /// Verbindung getrennt
    Disconnected { reason: DisconnectReason },

    /// Handshake fehlgeschlagen; Reconnection läuft weiter
    ConnectError { error: SignalingError, attempt: u32 },

    /// Reconnect-Versuche aufgebraucht, Manager bleibt `Disconnected`
    ReconnectFailed { attempts: u32 },
}

/// Gemeinsames Future aller `connect_and_wait`-Aufrufer
pub type ConnectFuture = Shared<BoxFuture<'static, Result<(), SignalingError>>>;

// ============================================================================
// CONNECTION MANAGER
// ============================================================================

/// Alles, was nur zusammen mit der Generation geändert werden darf
struct Lifecycle {
    /// Wird bei jedem `connect()`/`disconnect()` erhöht; alte Driver-Tasks
    /// erkennen daran, dass sie nichts mehr ändern dürfen
    generation: u64,
    driver: Option<JoinHandle<()>>,
    outbound: Option<mpsc::Sender<String>>,
}

struct Inner {
    endpoint: Url,
    credential: String,
    policy: ReconnectPolicy,
    /// Obergrenze für einen einzelnen Handshake
    handshake_timeout: Duration,
    connector: Arc<dyn Connector>,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<ConnectionState>,
    outcome_tx: broadcast::Sender<Result<(), SignalingError>>,
    pending: Mutex<Option<(u64, ConnectFuture)>>,
    next_wait_id: AtomicU64,
    reconnect_attempts: AtomicU32,
    events: Emitter<ConnectionEvent>,
    messages: Emitter<ServerMessage>,
}

/// Besitzer des Signaling-Kanals
///
/// Günstig klonbar; alle Klone teilen denselben Kanal.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Erstellt einen Manager mit WebSocket-Transport
    pub fn new(config: &CoreConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Erstellt einen Manager mit eigenem Transport (z.B. Fake in Tests)
    pub fn with_connector(config: &CoreConfig, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (outcome_tx, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(Inner {
                endpoint: config.endpoint.clone(),
                credential: config.credential.clone(),
                policy: config.reconnect.clone(),
                handshake_timeout: config.connect_timeout,
                connector,
                lifecycle: Mutex::new(Lifecycle {
                    generation: 0,
                    driver: None,
                    outbound: None,
                }),
                state_tx,
                outcome_tx,
                pending: Mutex::new(None),
                next_wait_id: AtomicU64::new(1),
                reconnect_attempts: AtomicU32::new(0),
                events: Emitter::new(),
                messages: Emitter::new(),
            }),
        }
    }

    /// Aktueller Verbindungsstatus
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Beobachtbarer Verbindungsstatus
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Anzahl fehlgeschlagener Versuche seit der letzten erfolgreichen Verbindung
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Registriert einen Handler für Lifecycle-Events
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    /// Registriert einen Handler für eingehende Server-Nachrichten
    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        self.inner.messages.subscribe(handler)
    }

    /// Startet den Verbindungsaufbau
    ///
    /// Ohne Wirkung, solange der Kanal verbunden ist oder ein Driver bereits
    /// (re)connected.
    pub fn connect(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        if self.state() != ConnectionState::Disconnected {
            tracing::debug!("connect() ignored, state is {:?}", self.state());
            return;
        }

        if let Some(old) = lifecycle.driver.take() {
            old.abort();
        }
        lifecycle.generation += 1;
        let generation = lifecycle.generation;

        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        self.inner.state_tx.send_replace(ConnectionState::Connecting);
        lifecycle.driver = Some(tokio::spawn(run_driver(Arc::clone(&self.inner), generation)));
    }

    /// Verbindet und wartet auf das Ergebnis
    ///
    /// Gleichzeitige Aufrufer erhalten dasselbe Future. Es löst sich beim
    /// ersten Connect oder Connect-Fehler auf, spätestens nach `timeout`
    /// (gemessen ab dem ersten Poll). Danach beginnt ein neuer Aufruf frisch.
    pub fn connect_and_wait(&self, timeout: Duration) -> ConnectFuture {
        let mut pending = self.inner.pending.lock();
        if let Some((_, future)) = pending.as_ref() {
            return future.clone();
        }

        // Vor connect() abonnieren, sonst kann das Ergebnis verloren gehen
        let mut outcomes = self.inner.outcome_tx.subscribe();
        if self.is_connected() {
            return futures::future::ready(Ok(())).boxed().shared();
        }

        let wait_id = self.inner.next_wait_id.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let future = async move {
            let waited = tokio::time::timeout(timeout, async {
                loop {
                    match outcomes.recv().await {
                        Ok(outcome) => return outcome,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(SignalingError::Closed)
                        }
                    }
                }
            })
            .await;

            let result = waited.unwrap_or(Err(SignalingError::Timeout(timeout)));

            if let Some(inner) = weak.upgrade() {
                let mut pending = inner.pending.lock();
                if matches!(pending.as_ref(), Some((id, _)) if *id == wait_id) {
                    *pending = None;
                }
            }

            result
        }
        .boxed()
        .shared();

        *pending = Some((wait_id, future.clone()));
        drop(pending);

        self.connect();
        future
    }

    /// Trennt den Kanal, ohne danach erneut zu verbinden
    pub fn disconnect(&self) {
        let previous = {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.generation += 1;
            if let Some(driver) = lifecycle.driver.take() {
                driver.abort();
            }
            lifecycle.outbound = None;
            self.inner.state_tx.send_replace(ConnectionState::Disconnected)
        };

        if previous == ConnectionState::Disconnected {
            return;
        }

        tracing::info!("Disconnected from signaling server (client request)");
        let _ = self.inner.outcome_tx.send(Err(SignalingError::Closed));
        self.inner.events.emit(&ConnectionEvent::Disconnected {
            reason: DisconnectReason::ClientRequested,
        });
    }

    /// Sendet eine Nachricht, ohne auf Zustellung zu warten (non-blocking)
    pub fn send(&self, message: &ClientMessage) -> Result<(), SignalingError> {
        let tx = self
            .inner
            .lifecycle
            .lock()
            .outbound
            .clone()
            .ok_or(SignalingError::NotConnected)?;

        let text = serde_json::to_string(message)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tx.try_send(text)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tracing::debug!(kind = message.kind(), "Sent signaling message");
        Ok(())
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.endpoint.as_str())
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// DRIVER
// ============================================================================

impl Inner {
    /// Führt `f` nur aus, wenn `generation` noch aktuell ist
    fn with_current<R>(&self, generation: u64, f: impl FnOnce(&mut Lifecycle) -> R) -> Option<R> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.generation != generation {
            return None;
        }
        Some(f(&mut lifecycle))
    }

    /// Verarbeitet eingehende Frames
    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::Pong) => {}
            Ok(message) => {
                if let ServerMessage::Error { code, message } = &message {
                    tracing::warn!("Server error {}: {}", code, message);
                }
                self.messages.emit(&message);
            }
            Err(e) => {
                tracing::debug!(error = %e, text = %text, "Unrecognized signaling frame");
            }
        }
    }
}

/// Hintergrund-Task: verbindet, pumpt eingehende Frames, reconnected
async fn run_driver(inner: Arc<Inner>, generation: u64) {
    let mut attempts: u32 = 0;

    loop {
        let opened = tokio::time::timeout(
            inner.handshake_timeout,
            inner.connector.open(&inner.endpoint, &inner.credential),
        )
        .await
        .unwrap_or_else(|_| Err(SignalingError::Timeout(inner.handshake_timeout)));

        match opened {
            Ok(ChannelLink {
                outbound,
                mut inbound,
            }) => {
                let installed = inner.with_current(generation, |lifecycle| {
                    lifecycle.outbound = Some(outbound);
                    inner.state_tx.send_replace(ConnectionState::Connected);
                });
                if installed.is_none() {
                    return;
                }

                attempts = 0;
                inner.reconnect_attempts.store(0, Ordering::SeqCst);
                tracing::info!("Connected to signaling server");
                let _ = inner.outcome_tx.send(Ok(()));
                inner.events.emit(&ConnectionEvent::Connected);

                while let Some(text) = inbound.recv().await {
                    inner.dispatch(&text);
                }

                let dropped = inner.with_current(generation, |lifecycle| {
                    lifecycle.outbound = None;
                    inner.state_tx.send_replace(ConnectionState::Reconnecting);
                });
                if dropped.is_none() {
                    return;
                }

                tracing::warn!("Signaling channel dropped");
                inner.events.emit(&ConnectionEvent::Disconnected {
                    reason: DisconnectReason::TransportClosed,
                });
            }
            Err(error) => {
                if inner.with_current(generation, |_| ()).is_none() {
                    return;
                }

                tracing::warn!(attempt = attempts, "Failed to connect: {}", error);
                let _ = inner.outcome_tx.send(Err(error.clone()));
                inner.events.emit(&ConnectionEvent::ConnectError {
                    error,
                    attempt: attempts,
                });
            }
        }

        attempts += 1;
        inner.reconnect_attempts.store(attempts, Ordering::SeqCst);

        if attempts > inner.policy.max_attempts {
            let gave_up = inner.with_current(generation, |lifecycle| {
                lifecycle.outbound = None;
                inner.state_tx.send_replace(ConnectionState::Disconnected);
            });
            if gave_up.is_some() {
                tracing::error!(
                    "Giving up on signaling server after {} reconnect attempts",
                    inner.policy.max_attempts
                );
                inner.events.emit(&ConnectionEvent::ReconnectFailed {
                    attempts: inner.policy.max_attempts,
                });
            }
            return;
        }

        let delay = inner.policy.delay_for(attempts);
        tracing::info!(attempt = attempts, ?delay, "Reconnecting in {:?}", delay);

        let waiting = inner.with_current(generation, |_| {
            inner.state_tx.send_replace(ConnectionState::Reconnecting);
        });
        if waiting.is_none() {
            return;
        }
        tokio::time::sleep(delay).await;
    }
}

// ============================================================================
// TESTS
// ============================================================================
