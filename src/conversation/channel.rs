//! Conversation Channel
//!
//! Räume betreten/verlassen, Nachrichten senden und Typing-Indikatoren über
//! den gemeinsamen Signaling-Kanal. Die Mitgliedschaft wird lokal gehalten
//! und nach jedem (Re)Connect erneut beim Server angemeldet.

use super::{ConversationError, ConversationEvent, MessageStatus};
use crate::identity::{ActorId, ConversationId, Identity, MessageId};
use crate::observer::{Emitter, Subscription};
use crate::signaling::{
    ClientMessage, ConnectionEvent, ConnectionManager, ConversationPayload, MarkReadPayload,
    MessageAck, MessageStatusUpdate, SendMessagePayload, ServerMessage, SignalingError,
    TypingNotice,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};

/// Wie viele eigene Nachrichten ihren Zustellstatus behalten
const OUTBOX_LIMIT: usize = 256;

#[derive(Default)]
struct ChannelState {
    joined: BTreeSet<ConversationId>,
    /// Status eigener Nachrichten, Key: Client-ID
    outbox: HashMap<MessageId, MessageStatus>,
    /// Client-IDs in Sende-Reihenfolge, älteste zuerst
    sent_order: VecDeque<MessageId>,
    /// Server-ID → Client-ID
    server_ids: HashMap<MessageId, MessageId>,
    /// Last-write-wins pro (Conversation, Actor)
    typing: HashMap<(ConversationId, ActorId), bool>,
}

impl ChannelState {
    /// Nimmt eine Nachricht auf; verdrängt die älteste über dem Limit
    fn track(&mut self, client_id: MessageId) {
        self.outbox.insert(client_id.clone(), MessageStatus::Pending);
        self.sent_order.push_back(client_id);
        while self.sent_order.len() > OUTBOX_LIMIT {
            if let Some(oldest) = self.sent_order.pop_front() {
                self.forget(&oldest);
            }
        }
    }

    fn forget(&mut self, client_id: &MessageId) {
        self.outbox.remove(client_id);
        self.server_ids.retain(|_, tracked| tracked != client_id);
        self.sent_order.retain(|tracked| tracked != client_id);
    }
}

struct Inner {
    identity: Identity,
    connection: ConnectionManager,
    state: Mutex<ChannelState>,
    events: Emitter<ConversationEvent>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Chat- und Presence-Kanal
#[derive(Clone)]
pub struct ConversationChannel {
    inner: Arc<Inner>,
}

impl ConversationChannel {
    /// Erstellt den Kanal und hängt ihn an die Events des ConnectionManagers
    pub fn new(identity: Identity, connection: ConnectionManager) -> Self {
        let inner = Arc::new(Inner {
            identity,
            connection: connection.clone(),
            state: Mutex::new(ChannelState::default()),
            events: Emitter::new(),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let on_message = connection.on_message(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_server_message(message);
            }
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let on_event = connection.on_event(move |event| {
            if let (ConnectionEvent::Connected, Some(inner)) = (event, weak.upgrade()) {
                inner.rejoin_all();
            }
        });

        inner.subscriptions.lock().extend([on_message, on_event]);
        Self { inner }
    }

    /// Registriert einen Handler für Chat-Events
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConversationEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    /// Tritt einem Raum bei; wiederholte Aufrufe sind ohne Wirkung
    ///
    /// Ohne Verbindung wird nur die Mitgliedschaft gemerkt und beim nächsten
    /// Connect gesendet.
    pub fn join_conversation(&self, id: ConversationId) {
        let newly_joined = self.inner.state.lock().joined.insert(id.clone());
        if !newly_joined {
            return;
        }

        tracing::debug!(conversation = %id, "Joining conversation");
        self.inner
            .send_best_effort(ClientMessage::JoinConversation(ConversationPayload::new(
                &self.inner.identity,
                id,
            )));
    }

    /// Verlässt einen Raum; wiederholte Aufrufe sind ohne Wirkung
    pub fn leave_conversation(&self, id: ConversationId) {
        let was_joined = {
            let mut state = self.inner.state.lock();
            state.typing.retain(|(conversation, _), _| conversation != &id);
            state.joined.remove(&id)
        };
        if !was_joined {
            return;
        }

        tracing::debug!(conversation = %id, "Leaving conversation");
        self.inner
            .send_best_effort(ClientMessage::LeaveConversation(ConversationPayload::new(
                &self.inner.identity,
                id,
            )));
    }

    pub fn is_joined(&self, id: &ConversationId) -> bool {
        self.inner.state.lock().joined.contains(id)
    }

    /// Sendet eine Nachricht und gibt sofort die Client-ID zurück
    ///
    /// Der Zustellstatus kommt asynchron über [`ConversationEvent::StatusChanged`].
    pub fn send_message(
        &self,
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> Result<MessageId, ConversationError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(ConversationError::EmptyMessage);
        }

        let client_id = MessageId::generate();
        let message = ClientMessage::SendMessage(SendMessagePayload {
            actor_id: self.inner.identity.actor_id.clone(),
            conversation_id,
            client_id: client_id.clone(),
            content,
        });
        // Vor dem Senden eintragen, das Ack kann sofort kommen
        self.inner.state.lock().track(client_id.clone());
        if let Err(e) = self.inner.connection.send(&message) {
            self.inner.state.lock().forget(&client_id);
            return Err(e.into());
        }
        Ok(client_id)
    }

    /// Status einer eigenen Nachricht (Client- oder Server-ID)
    pub fn message_status(&self, id: &MessageId) -> Option<MessageStatus> {
        let state = self.inner.state.lock();
        let client_id = state.server_ids.get(id).unwrap_or(id);
        state.outbox.get(client_id).copied()
    }

    /// Markiert eine empfangene Nachricht als gelesen
    pub fn mark_read(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<(), SignalingError> {
        self.inner
            .connection
            .send(&ClientMessage::MarkRead(MarkReadPayload {
                actor_id: self.inner.identity.actor_id.clone(),
                conversation_id,
                message_id,
            }))
    }

    pub fn start_typing(&self, id: ConversationId) {
        self.set_own_typing(id, true);
    }

    pub fn stop_typing(&self, id: ConversationId) {
        self.set_own_typing(id, false);
    }

    /// Aktuell tippende Teilnehmer eines Raums (ohne uns selbst)
    pub fn typing_actors(&self, id: &ConversationId) -> Vec<ActorId> {
        let own = &self.inner.identity.actor_id;
        let mut actors: Vec<ActorId> = self
            .inner
            .state
            .lock()
            .typing
            .iter()
            .filter(|((conversation, actor), typing)| **typing && conversation == id && actor != own)
            .map(|((_, actor), _)| actor.clone())
            .collect();
        actors.sort();
        actors
    }

    fn set_own_typing(&self, id: ConversationId, typing: bool) {
        self.inner
            .state
            .lock()
            .typing
            .insert((id.clone(), self.inner.identity.actor_id.clone()), typing);

        let payload = ConversationPayload::new(&self.inner.identity, id);
        let message = if typing {
            ClientMessage::TypingStart(payload)
        } else {
            ClientMessage::TypingStop(payload)
        };
        self.inner.send_best_effort(message);
    }
}

impl Inner {
    /// Senden ohne Fehler an den Aufrufer; Typing und Membership sind flüchtig
    fn send_best_effort(&self, message: ClientMessage) {
        match self.connection.send(&message) {
            Ok(()) => {}
            Err(SignalingError::NotConnected) => {
                tracing::debug!(kind = message.kind(), "Not connected, message deferred or dropped");
            }
            Err(e) => tracing::warn!(kind = message.kind(), "Failed to send: {}", e),
        }
    }

    fn rejoin_all(&self) {
        let joined: Vec<ConversationId> = self.state.lock().joined.iter().cloned().collect();
        if !joined.is_empty() {
            tracing::info!("Rejoining {} conversation(s)", joined.len());
        }
        for id in joined {
            self.send_best_effort(ClientMessage::JoinConversation(ConversationPayload::new(
                &self.identity,
                id,
            )));
        }
    }

    fn handle_server_message(&self, message: &ServerMessage) {
        match message {
            ServerMessage::MessageReceived(incoming) => {
                self.events
                    .emit(&ConversationEvent::MessageReceived(incoming.clone()));
            }
            ServerMessage::MessageSent(ack) => self.handle_ack(ack),
            ServerMessage::MessageStatus(update) => self.handle_status(update),
            ServerMessage::TypingStarted(notice) => self.handle_typing(notice, true),
            ServerMessage::TypingStopped(notice) => self.handle_typing(notice, false),
            _ => {}
        }
    }

    fn handle_ack(&self, ack: &MessageAck) {
        {
            let mut state = self.state.lock();
            let ChannelState {
                outbox, server_ids, ..
            } = &mut *state;
            let Some(status) = outbox.get_mut(&ack.client_id) else {
                tracing::debug!(client_id = %ack.client_id, "Ack for unknown message");
                return;
            };
            server_ids.insert(ack.message_id.clone(), ack.client_id.clone());
            if !advance(status, MessageStatus::Sent) {
                return;
            }
        }

        self.events.emit(&ConversationEvent::StatusChanged {
            conversation_id: ack.conversation_id.clone(),
            client_id: ack.client_id.clone(),
            message_id: Some(ack.message_id.clone()),
            status: MessageStatus::Sent,
        });
    }

    fn handle_status(&self, update: &MessageStatusUpdate) {
        let client_id = {
            let mut state = self.state.lock();
            let client_id = state
                .server_ids
                .get(&update.message_id)
                .cloned()
                .unwrap_or_else(|| update.message_id.clone());
            let Some(status) = state.outbox.get_mut(&client_id) else {
                tracing::debug!(message_id = %update.message_id, "Status for unknown message");
                return;
            };
            if !advance(status, update.status) {
                return;
            }
            client_id
        };

        self.events.emit(&ConversationEvent::StatusChanged {
            conversation_id: update.conversation_id.clone(),
            client_id,
            message_id: Some(update.message_id.clone()),
            status: update.status,
        });
    }

    fn handle_typing(&self, notice: &TypingNotice, typing: bool) {
        self.state.lock().typing.insert(
            (notice.conversation_id.clone(), notice.actor_id.clone()),
            typing,
        );
        self.events.emit(&ConversationEvent::Typing {
            conversation_id: notice.conversation_id.clone(),
            actor_id: notice.actor_id.clone(),
            typing,
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for subscription in self.subscriptions.get_mut().drain(..) {
            subscription.unsubscribe();
        }
    }
}

/// Status nur vorwärts bewegen; `true` wenn sich etwas geändert hat
fn advance(current: &mut MessageStatus, next: MessageStatus) -> bool {
    if next > *current {
        *current = next;
        true
    } else {
        false
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::signaling::memory::{MemoryConnector, RemoteEnd};
    use std::time::Duration;

    async fn connected_channel() -> (ConversationChannel, ConnectionManager, MemoryConnector, RemoteEnd)
    {
        let connector = MemoryConnector::default();
        let config = CoreConfig::new("ws://signal.test/ws", "secret").unwrap();
        let connection = ConnectionManager::with_connector(&config, Arc::new(connector.clone()));
        let channel = ConversationChannel::new(Identity::new("alice", "user"), connection.clone());
        connection
            .connect_and_wait(Duration::from_secs(5))
            .await
            .unwrap();
        let remote = connector.take_remote();
        (channel, connection, connector, remote)
    }

    fn record(channel: &ConversationChannel) -> Arc<Mutex<Vec<ConversationEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = channel.on_event(move |e| sink.lock().push(e.clone()));
        events
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_and_leave_are_idempotent() {
        let (channel, _conn, _connector, mut remote) = connected_channel().await;
        let room = ConversationId::new("room-1");

        channel.join_conversation(room.clone());
        channel.join_conversation(room.clone());
        channel.leave_conversation(room.clone());
        channel.leave_conversation(room.clone());

        let types: Vec<String> = remote
            .drain()
            .iter()
            .map(|f| f["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(types, vec!["conversation:join", "conversation:leave"]);
        assert!(!channel.is_joined(&room));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoins_after_reconnect() {
        let (channel, _conn, connector, remote) = connected_channel().await;
        channel.join_conversation(ConversationId::new("room-1"));
        drop(remote);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let mut second = connector.take_remote();
        let frames = second.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "conversation:join");
        assert_eq!(frames[0]["conversationId"], "room-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_status_moves_forward_only() {
        let (channel, _conn, _connector, mut remote) = connected_channel().await;
        let events = record(&channel);
        let room = ConversationId::new("room-1");

        let client_id = channel.send_message(room.clone(), "hello").unwrap();
        assert_eq!(channel.message_status(&client_id), Some(MessageStatus::Pending));

        let sent = remote.drain();
        assert_eq!(sent[0]["type"], "message:send");
        assert_eq!(sent[0]["clientId"], client_id.as_str());

        remote
            .push(serde_json::json!({
                "type": "message:sent",
                "clientId": client_id.as_str(),
                "messageId": "srv-1",
                "conversationId": "room-1"
            }))
            .await;
        remote
            .push(serde_json::json!({
                "type": "message:status",
                "messageId": "srv-1",
                "conversationId": "room-1",
                "status": "read"
            }))
            .await;
        // Verspätetes "delivered" darf "read" nicht überschreiben
        remote
            .push(serde_json::json!({
                "type": "message:status",
                "messageId": "srv-1",
                "conversationId": "room-1",
                "status": "delivered"
            }))
            .await;
        settle().await;

        assert_eq!(channel.message_status(&client_id), Some(MessageStatus::Read));
        assert_eq!(
            channel.message_status(&MessageId::new("srv-1")),
            Some(MessageStatus::Read)
        );
        let statuses: Vec<MessageStatus> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ConversationEvent::StatusChanged { status, .. } => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![MessageStatus::Sent, MessageStatus::Read]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_requires_connection() {
        let (channel, connection, _connector, _remote) = connected_channel().await;
        connection.disconnect();

        let err = channel
            .send_message(ConversationId::new("room-1"), "hi")
            .unwrap_err();
        assert!(matches!(
            err,
            ConversationError::Signaling(SignalingError::NotConnected)
        ));
        assert!(matches!(
            channel.send_message(ConversationId::new("room-1"), "   "),
            Err(ConversationError::EmptyMessage)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_is_not_tracked() {
        let (channel, connection, _connector, mut remote) = connected_channel().await;
        let kept = channel
            .send_message(ConversationId::new("room-1"), "hello")
            .unwrap();
        let sent = remote.drain();
        connection.disconnect();

        assert!(channel
            .send_message(ConversationId::new("room-1"), "lost")
            .is_err());
        assert_eq!(channel.inner.state.lock().outbox.len(), 1);
        assert_eq!(channel.message_status(&kept), Some(MessageStatus::Pending));
        assert_eq!(sent[0]["clientId"], kept.as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbox_is_bounded() {
        let (channel, _conn, _connector, mut remote) = connected_channel().await;
        let room = ConversationId::new("room-1");

        let mut ids = Vec::new();
        for i in 0..=OUTBOX_LIMIT {
            ids.push(channel.send_message(room.clone(), format!("msg {i}")).unwrap());
            remote.drain();
        }

        remote
            .push(serde_json::json!({
                "type": "message:sent",
                "clientId": ids[1].as_str(),
                "messageId": "srv-1",
                "conversationId": "room-1"
            }))
            .await;
        settle().await;

        assert_eq!(channel.message_status(&ids[0]), None);
        assert_eq!(
            channel.message_status(&MessageId::new("srv-1")),
            Some(MessageStatus::Sent)
        );
        let state = channel.inner.state.lock();
        assert_eq!(state.outbox.len(), OUTBOX_LIMIT);
        assert_eq!(state.sent_order.len(), OUTBOX_LIMIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_read_sends_receipt() {
        let (channel, connection, _connector, mut remote) = connected_channel().await;

        channel
            .mark_read(ConversationId::new("room-1"), MessageId::new("m-7"))
            .unwrap();
        let frames = remote.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "message:read");
        assert_eq!(frames[0]["actorId"], "alice");
        assert_eq!(frames[0]["conversationId"], "room-1");
        assert_eq!(frames[0]["messageId"], "m-7");

        connection.disconnect();
        assert_eq!(
            channel.mark_read(ConversationId::new("room-1"), MessageId::new("m-8")),
            Err(SignalingError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_last_write_wins() {
        let (channel, _conn, _connector, remote) = connected_channel().await;
        let room = ConversationId::new("room-1");

        for (kind, actor) in [
            ("typing:start", "bob"),
            ("typing:start", "carol"),
            ("typing:stop", "bob"),
            ("typing:start", "bob"),
            ("typing:stop", "carol"),
        ] {
            remote
                .push(serde_json::json!({
                    "type": kind,
                    "conversationId": "room-1",
                    "actorId": actor
                }))
                .await;
        }
        settle().await;

        channel.start_typing(room.clone());
        assert_eq!(channel.typing_actors(&room), vec![ActorId::new("bob")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incoming_message_forwarded() {
        let (channel, _conn, _connector, remote) = connected_channel().await;
        let events = record(&channel);

        remote
            .push(serde_json::json!({
                "type": "message:received",
                "messageId": "m-7",
                "conversationId": "room-1",
                "senderId": "bob",
                "content": "hey"
            }))
            .await;
        settle().await;

        let events = events.lock();
        assert!(matches!(
            events.as_slice(),
            [ConversationEvent::MessageReceived(m)] if m.content == "hey"
        ));
    }
}
