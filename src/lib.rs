//! callcore - Signaling- und Call-Session-Kern
//!
//! Client-seitiger Kern für Echtzeit-Kommunikation:
//! - Persistenter Signaling-Kanal mit Reconnect und Backoff
//! - Conversation/Presence: Räume, Nachrichten, Typing
//! - Call Sessions mit Ring-Timeout und einmaligem Cleanup
//! - Anbindung einer externen Media-Engine über einen Adapter-Trait

pub mod call;
pub mod config;
pub mod conversation;
pub mod identity;
pub mod observer;
pub mod signaling;

use call::{CallController, CallState, MediaTokenIssuer, MediaTransport};
use config::CoreConfig;
use conversation::ConversationChannel;
use identity::Identity;
use parking_lot::Mutex;
use signaling::{
    ClientMessage, ConnectFuture, ConnectionManager, Connector, HeartbeatPayload,
    WebSocketConnector,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Intervall der Heartbeat-Frames; Idle-Timeouts der Gegenstelle greifen sonst
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

// ============================================================================
// LOGGING
// ============================================================================

/// Installiert den tracing-Subscriber (`RUST_LOG`, sonst `callcore=debug`)
///
/// Mehrfache Aufrufe sind erlaubt; nur der erste installiert.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("callcore=debug"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// CALL CORE
// ============================================================================

/// Wurzelobjekt: verbindet Kanal, Conversation Channel und Call Controller
///
/// Kein Singleton; die Anwendung hält eine Instanz pro Identität. Nur
/// [`CallCore::shutdown`] trennt den Kanal.
pub struct CallCore {
    config: CoreConfig,
    identity: Identity,
    connection: ConnectionManager,
    conversations: ConversationChannel,
    calls: CallController,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl CallCore {
    /// Erstellt den Kern mit WebSocket-Transport
    pub fn new(
        config: CoreConfig,
        identity: Identity,
        media: Arc<dyn MediaTransport>,
        issuer: Arc<dyn MediaTokenIssuer>,
    ) -> Self {
        Self::with_connector(config, identity, Arc::new(WebSocketConnector), media, issuer)
    }

    pub fn with_connector(
        config: CoreConfig,
        identity: Identity,
        connector: Arc<dyn Connector>,
        media: Arc<dyn MediaTransport>,
        issuer: Arc<dyn MediaTokenIssuer>,
    ) -> Self {
        let connection = ConnectionManager::with_connector(&config, connector);
        let conversations = ConversationChannel::new(identity.clone(), connection.clone());
        let calls = CallController::new(
            identity.clone(),
            connection.clone(),
            media,
            issuer,
            config.call.clone(),
        );

        tracing::info!(actor = %identity.actor_id, endpoint = %config.endpoint, "Call core initialized");

        Self {
            config,
            identity,
            connection,
            conversations,
            calls,
            heartbeat: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn conversations(&self) -> &ConversationChannel {
        &self.conversations
    }

    pub fn calls(&self) -> &CallController {
        &self.calls
    }

    /// Startet Verbindungsaufbau und Heartbeat, ohne zu warten
    pub fn start(&self) {
        self.connection.connect();
        self.spawn_heartbeat();
    }

    /// Wie [`start`](Self::start), liefert aber das gemeinsame Connect-Future
    pub fn connect_and_wait(&self) -> ConnectFuture {
        let future = self.connection.connect_and_wait(self.config.connect_timeout);
        self.spawn_heartbeat();
        future
    }

    /// Beendet einen laufenden Anruf und trennt den Kanal
    pub fn shutdown(&self) {
        if let Some(session) = self.calls.active_session() {
            let result = match session.state {
                CallState::Accepted | CallState::Connected => {
                    self.calls.end_call(&session.id, "shutdown")
                }
                CallState::Ringing if session.is_inbound() => {
                    self.calls.reject_call(&session.id, "shutdown")
                }
                _ => self.calls.cancel_call(&session.id),
            };
            if let Err(e) = result {
                tracing::warn!(call_id = %session.id, "Failed to end call on shutdown: {}", e);
            }
        }

        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.abort();
        }
        self.connection.disconnect();
        tracing::info!("Call core shut down");
    }

    fn spawn_heartbeat(&self) {
        let mut heartbeat = self.heartbeat.lock();
        if heartbeat.is_some() {
            return;
        }

        let connection = self.connection.clone();
        let message = ClientMessage::Heartbeat(HeartbeatPayload {
            actor_id: self.identity.actor_id.clone(),
        });
        *heartbeat = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
                HEARTBEAT_INTERVAL,
            );
            loop {
                interval.tick().await;
                // Während eines Reconnects ausfallen lassen
                if connection.is_connected() {
                    if let Err(e) = connection.send(&message) {
                        tracing::debug!("Heartbeat not sent: {}", e);
                    }
                }
            }
        }));
    }
}

impl Drop for CallCore {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.get_mut().take() {
            heartbeat.abort();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::fake::{media, StaticIssuer};
    use crate::identity::CallId;
    use crate::signaling::memory::MemoryConnector;
    use crate::signaling::ConnectionState;
    use serde_json::json;

    fn core() -> (CallCore, MemoryConnector) {
        let connector = MemoryConnector::default();
        let config = CoreConfig::new("ws://signal.test/ws", "secret").unwrap();
        let core = CallCore::with_connector(
            config,
            Identity::new("alice", "user"),
            Arc::new(connector.clone()),
            media(),
            Arc::new(StaticIssuer),
        );
        (core, connector)
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_while_connected() {
        let (core, connector) = core();
        core.connect_and_wait().await.unwrap();
        let mut remote = connector.take_remote();

        tokio::time::sleep(Duration::from_secs(51)).await;
        let frames = remote.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["type"], "heartbeat");
        assert_eq!(frames[0]["actorId"], "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_connect_future() {
        let (core, connector) = core();
        let first = core.connect_and_wait();
        let second = core.connect_and_wait();

        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Ok(()));
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_ringing_call_and_disconnects() {
        let (core, connector) = core();
        core.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut remote = connector.take_remote();

        remote
            .push(json!({
                "type": "call:incoming",
                "callId": "c-1",
                "from": "bob",
                "fromKind": "user",
                "callType": "voice"
            }))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            core.calls().active_session().map(|s| s.id),
            Some(CallId::new("c-1"))
        );

        core.shutdown();
        let frames = remote.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "call:reject");
        assert_eq!(frames[0]["reason"], "shutdown");
        assert!(core.calls().active_session().is_none());
        assert_eq!(core.connection().state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(remote.drain().is_empty());
        assert_eq!(connector.open_count(), 1);
    }
}
