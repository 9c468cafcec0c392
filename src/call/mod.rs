//! Call Module - Call Sessions und Media-Anbindung
//!
//! Dieses Modul verwaltet:
//! - Zustandsmaschine einer Call Session (eine aktive Session pro Actor)
//! - Ring-Timeout und Anzeige-Ticks
//! - Media-Aufbau über den externen Media Transport Adapter

mod controller;
mod media;
mod session;
mod timer;

pub use controller::{CallClock, CallController, CallError, CallEvent};
pub use media::{MediaError, MediaGrant, MediaKind, MediaTokenIssuer, MediaTransport, TrackRef};
pub use session::{CallDirection, CallSession, CallState, CallType, EndReason};
pub use timer::{Timer, TimerPurpose};

#[cfg(test)]
pub(crate) use media::fake;
