//! Call Session Datenmodell
//!
//! Eine [`CallSession`] ist ein einzelner Anrufversuch von der Initiierung
//! bis zu genau einem terminalen Zustand.

use crate::identity::{ActorId, CallId, PeerKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CALL STATE
// ============================================================================

/// Status eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// Kein aktiver Anruf
    Idle,
    /// Ausgehender Anruf angelegt, Gegenüber noch nicht benachrichtigt
    Initiated,
    /// Klingelt (ausgehend: beim Gegenüber, eingehend: lokal)
    Ringing,
    /// Angenommen, Medien werden aufgebaut
    Accepted,
    /// Medien laufen
    Connected,
    Ended,
    Rejected,
    Missed,
    Cancelled,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Ended | Self::Rejected | Self::Missed | Self::Cancelled
        )
    }

    /// Angenommen oder verbunden
    pub fn is_established(self) -> bool {
        matches!(self, Self::Accepted | Self::Connected)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initiated => "initiated",
            Self::Ringing => "ringing",
            Self::Accepted => "accepted",
            Self::Connected => "connected",
            Self::Ended => "ended",
            Self::Rejected => "rejected",
            Self::Missed => "missed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
}

// ============================================================================
// END REASON
// ============================================================================

/// Grund für einen terminalen Übergang
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum EndReason {
    /// Lokal aufgelegt, abgelehnt oder abgebrochen
    Local(String),
    /// Vom Gegenüber beendet oder abgelehnt
    Remote(Option<String>),
    /// Ring-Timeout abgelaufen
    Timeout,
    /// Gegenüber hat den Raum verlassen
    PeerLeft,
    /// Media Transport Adapter ist fehlgeschlagen
    Media(String),
    /// Signaling-Kanal endgültig verloren
    ConnectionLost,
}

impl EndReason {
    /// Kurzform für das `reason`-Feld auf dem Draht
    pub fn wire_reason(&self) -> String {
        match self {
            Self::Local(reason) => reason.clone(),
            Self::Remote(reason) => reason.clone().unwrap_or_else(|| "remote".to_string()),
            Self::Timeout => "timeout".to_string(),
            Self::PeerLeft => "peer-left".to_string(),
            Self::Media(_) => "media-error".to_string(),
            Self::ConnectionLost => "connection-lost".to_string(),
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Media(detail) => write!(f, "media-error: {detail}"),
            other => f.write_str(&other.wire_reason()),
        }
    }
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Ein einzelner Anruf
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub id: CallId,
    pub direction: CallDirection,
    pub peer_id: ActorId,
    pub peer_kind: PeerKind,
    pub call_type: CallType,
    pub state: CallState,
    pub started_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

impl CallSession {
    pub fn new_outbound(peer_id: ActorId, peer_kind: PeerKind, call_type: CallType) -> Self {
        Self::new(
            CallId::generate(),
            CallDirection::Outbound,
            peer_id,
            peer_kind,
            call_type,
            CallState::Initiated,
        )
    }

    pub fn new_inbound(
        id: CallId,
        peer_id: ActorId,
        peer_kind: PeerKind,
        call_type: CallType,
    ) -> Self {
        Self::new(
            id,
            CallDirection::Inbound,
            peer_id,
            peer_kind,
            call_type,
            CallState::Ringing,
        )
    }

    fn new(
        id: CallId,
        direction: CallDirection,
        peer_id: ActorId,
        peer_kind: PeerKind,
        call_type: CallType,
        state: CallState,
    ) -> Self {
        Self {
            id,
            direction,
            peer_id,
            peer_kind,
            call_type,
            state,
            started_at: Utc::now(),
            accepted_at: None,
            connected_at: None,
            ended_at: None,
            end_reason: None,
        }
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == CallDirection::Inbound
    }

    /// Übergang in einen nicht-terminalen Zustand
    ///
    /// Gibt `false` zurück, wenn der Übergang vom aktuellen Zustand aus nicht
    /// erlaubt ist; die Session bleibt dann unverändert.
    pub(crate) fn advance(&mut self, next: CallState) -> bool {
        use CallState::*;
        let allowed = matches!(
            (self.state, next),
            (Initiated, Ringing)
                | (Initiated, Accepted)
                | (Ringing, Accepted)
                | (Accepted, Connected)
        );
        if !allowed {
            return false;
        }

        self.state = next;
        match next {
            Accepted => self.accepted_at = Some(Utc::now()),
            Connected => self.connected_at = Some(Utc::now()),
            _ => {}
        }
        true
    }

    /// Übergang in einen terminalen Zustand; nur einmal möglich
    pub(crate) fn terminate(&mut self, terminal: CallState, reason: EndReason) -> bool {
        if self.state.is_terminal() || !terminal.is_terminal() {
            return false;
        }

        self.state = terminal;
        self.ended_at = Some(Utc::now());
        self.end_reason = Some(reason);
        true
    }
}

// ============================================================================
// TESTS
// ============================================================================
