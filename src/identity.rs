//! Identitäten und IDs
//!
//! Die lokale Identität wird von der Anwendung übergeben und explizit in
//! jede ausgehende Nachricht eingesetzt. Es gibt keine globale Identität.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// ID eines Teilnehmers (lokal oder remote)
    ActorId
);
string_id!(
    /// Art des Gegenübers, z.B. `user` oder `creator`; wird nur durchgereicht
    PeerKind
);
string_id!(
    /// ID einer Call Session
    CallId
);
string_id!(ConversationId);
string_id!(
    /// Client-generierte oder Server-vergebene Nachrichten-ID
    MessageId
);

impl CallId {
    /// Neue zufällige Call-ID (UUID v4)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl MessageId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Lokale Identität, mit der alle ausgehenden Operationen signiert sind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub actor_id: ActorId,
    pub kind: PeerKind,
}

impl Identity {
    pub fn new(actor_id: impl Into<ActorId>, kind: impl Into<PeerKind>) -> Self {
        Self {
            actor_id: actor_id.into(),
            kind: kind.into(),
        }
    }
}
