//! Media Transport Adapter
//!
//! Die eigentliche Audio/Video-Engine ist extern. Der Controller spricht sie
//! nur über [`MediaTransport`] an, sobald ein Anruf angenommen wurde. Raum
//! und Access-Token kommen von einem externen Token-Aussteller
//! ([`MediaTokenIssuer`]).

use super::session::CallSession;
use crate::identity::ActorId;
use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MediaError {
    #[error("Failed to obtain media token: {0}")]
    Token(String),

    #[error("Failed to create local {0:?} track: {1}")]
    TrackCreation(MediaKind, String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Unknown track: {0}")]
    UnknownTrack(String),
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Referenz auf einen lokalen Track beim Adapter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackRef {
    pub id: String,
    pub kind: MediaKind,
}

/// Zugangsdaten für den Media-Raum eines Anrufs
#[derive(Clone, PartialEq, Eq)]
pub struct MediaGrant {
    pub room: String,
    pub access_token: String,
}

impl std::fmt::Debug for MediaGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaGrant")
            .field("room", &self.room)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Stellt Raum und Access-Token für einen Anruf aus
#[async_trait]
pub trait MediaTokenIssuer: Send + Sync {
    async fn issue(&self, session: &CallSession) -> Result<MediaGrant, MediaError>;
}

/// Vertrag mit der externen Media-Engine
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_local_audio_track(&self) -> Result<TrackRef, MediaError>;

    async fn create_local_video_track(&self) -> Result<TrackRef, MediaError>;

    async fn publish(&self, grant: &MediaGrant, tracks: &[TrackRef]) -> Result<(), MediaError>;

    async fn subscribe(
        &self,
        grant: &MediaGrant,
        remote_peer: &ActorId,
        kind: MediaKind,
    ) -> Result<(), MediaError>;

    fn set_track_enabled(&self, track: &TrackRef, enabled: bool) -> Result<(), MediaError>;

    /// Gibt alle Tracks und die Verbindung frei
    ///
    /// Wird pro Anruf höchstens einmal aufgerufen; darf nicht blockieren.
    fn close(&self);
}

// ============================================================================
// TEST FAKES
// ============================================================================
