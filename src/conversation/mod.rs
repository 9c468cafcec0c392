//! Conversation Module - Chat und Presence
//!
//! Dieses Modul verwaltet:
//! - Mitgliedschaft in Räumen (join/leave, Rejoin nach Reconnect)
//! - Nachrichten senden und Zustellstatus verfolgen
//! - Typing-Indikatoren

mod channel;

pub use channel::ConversationChannel;

use crate::identity::{ActorId, ConversationId, MessageId};
use crate::signaling::{IncomingMessage, SignalingError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("Message content is empty")]
    EmptyMessage,

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

// ============================================================================
// TYPES
// ============================================================================

/// Zustellstatus einer Nachricht; bewegt sich nur vorwärts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
}

/// Events für die UI
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    MessageReceived(IncomingMessage),
    StatusChanged {
        conversation_id: ConversationId,
        client_id: MessageId,
        message_id: Option<MessageId>,
        status: MessageStatus,
    },
    Typing {
        conversation_id: ConversationId,
        actor_id: ActorId,
        typing: bool,
    },
}
