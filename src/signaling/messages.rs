//! Message Types für das Signaling-Protokoll
//!
//! JSON-Textframes, intern über das Feld `type` getaggt. Die Typnamen folgen
//! dem Schema `bereich:verb` (`call:initiate`, `message:status`, ...).

use crate::call::CallType;
use crate::conversation::MessageStatus;
use crate::identity::{ActorId, CallId, ConversationId, Identity, MessageId, PeerKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Alle Nachrichten, die der Client über den Kanal sendet
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "conversation:join")]
    JoinConversation(ConversationPayload),
    #[serde(rename = "conversation:leave")]
    LeaveConversation(ConversationPayload),
    #[serde(rename = "message:send")]
    SendMessage(SendMessagePayload),
    #[serde(rename = "message:read")]
    MarkRead(MarkReadPayload),
    #[serde(rename = "typing:start")]
    TypingStart(ConversationPayload),
    #[serde(rename = "typing:stop")]
    TypingStop(ConversationPayload),
    #[serde(rename = "call:initiate")]
    CallInitiate(CallInitiatePayload),
    #[serde(rename = "call:accept")]
    CallAccept(CallPayload),
    #[serde(rename = "call:reject")]
    CallReject(CallPayload),
    #[serde(rename = "call:end")]
    CallEnd(CallPayload),
    #[serde(rename = "call:connected")]
    CallConnected(CallPayload),
    #[serde(rename = "heartbeat")]
    Heartbeat(HeartbeatPayload),
}

impl ClientMessage {
    /// Typname auf dem Draht, für Logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinConversation(_) => "conversation:join",
            Self::LeaveConversation(_) => "conversation:leave",
            Self::SendMessage(_) => "message:send",
            Self::MarkRead(_) => "message:read",
            Self::TypingStart(_) => "typing:start",
            Self::TypingStop(_) => "typing:stop",
            Self::CallInitiate(_) => "call:initiate",
            Self::CallAccept(_) => "call:accept",
            Self::CallReject(_) => "call:reject",
            Self::CallEnd(_) => "call:end",
            Self::CallConnected(_) => "call:connected",
            Self::Heartbeat(_) => "heartbeat",
        }
    }
}

/// Join/Leave und Typing-Indikatoren
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayload {
    pub actor_id: ActorId,
    pub conversation_id: ConversationId,
}

impl ConversationPayload {
    pub fn new(identity: &Identity, conversation_id: ConversationId) -> Self {
        Self {
            actor_id: identity.actor_id.clone(),
            conversation_id,
        }
    }
}

/// Nachricht senden
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub actor_id: ActorId,
    pub conversation_id: ConversationId,
    /// Client-seitige ID, wird vom Server in `message:sent` zurückgegeben
    pub client_id: MessageId,
    pub content: String,
}

/// Nachricht als gelesen markieren
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    pub actor_id: ActorId,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
}

/// Anruf starten
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInitiatePayload {
    pub call_id: CallId,
    pub from: ActorId,
    pub from_kind: PeerKind,
    pub to: ActorId,
    pub to_kind: PeerKind,
    pub call_type: CallType,
}

/// Accept, Reject, End und Connected teilen sich dieselbe Form
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPayload {
    pub call_id: CallId,
    pub from: ActorId,
    pub to: ActorId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CallPayload {
    pub fn new(identity: &Identity, call_id: CallId, to: ActorId) -> Self {
        Self {
            call_id,
            from: identity.actor_id.clone(),
            to,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Heartbeat
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub actor_id: ActorId,
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Alle möglichen Server-Nachrichten
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "message:received")]
    MessageReceived(IncomingMessage),
    #[serde(rename = "message:sent")]
    MessageSent(MessageAck),
    #[serde(rename = "message:status")]
    MessageStatus(MessageStatusUpdate),
    #[serde(rename = "typing:start")]
    TypingStarted(TypingNotice),
    #[serde(rename = "typing:stop")]
    TypingStopped(TypingNotice),
    #[serde(rename = "call:incoming")]
    IncomingCall(IncomingCall),
    #[serde(rename = "call:accepted")]
    CallAccepted(CallNotice),
    #[serde(rename = "call:rejected")]
    CallRejected(CallNotice),
    #[serde(rename = "call:ended")]
    CallEnded(CallNotice),
    #[serde(rename = "call:missed")]
    CallMissed(CallNotice),
    #[serde(rename = "call:peer-left")]
    PeerLeft(PeerLeft),
    #[serde(rename = "error")]
    Error { code: i32, message: String },
    #[serde(rename = "pong")]
    Pong,
}

/// Eingehende Chat-Nachricht
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: ActorId,
    pub content: String,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

/// Bestätigung einer gesendeten Nachricht
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAck {
    pub client_id: MessageId,
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
}

/// Zustellstatus (delivered/read)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusUpdate {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub conversation_id: ConversationId,
    pub actor_id: ActorId,
}

/// Eingehender Anruf
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub call_id: CallId,
    pub from: ActorId,
    pub from_kind: PeerKind,
    pub call_type: CallType,
}

/// Accepted/Rejected/Ended/Missed
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallNotice {
    pub call_id: CallId,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Gegenüber hat den Raum verlassen
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLeft {
    #[serde(default)]
    pub call_id: Option<CallId>,
    pub peer_id: ActorId,
}

// ============================================================================
// TESTS
// ============================================================================
