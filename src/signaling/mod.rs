//! Signaling Module - persistenter Kanal zum Signaling-Server
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Signaling-Server:
//! - Kanal aufbauen, halten und bei Abbruch neu verbinden
//! - Nachrichten serialisieren und senden
//! - Eingehende Nachrichten parsen und an Abonnenten verteilen
//!

mod connection;
mod messages;
mod transport;

pub use connection::{
    ConnectFuture, ConnectionEvent, ConnectionManager, ConnectionState, DisconnectReason,
    SignalingError,
};
pub use messages::*;
pub use transport::{ChannelLink, Connector, WebSocketConnector};

#[cfg(test)]
pub(crate) use transport::memory;
