//! Call Session Controller
//!
//! Zustandsmaschine für genau eine aktive Call Session pro lokalem Actor.
//! Alle Übergänge prüfen den aktuellen Zustand unter dem Slot-Lock
//! (compare-and-transition), damit doppelte oder verspätete Events keine
//! Wirkung haben. Jeder terminale Übergang läuft durch [`Inner::terminate`],
//! die einzige Stelle, an der Timer, Media und der aktive Slot freigegeben
//! werden.

use super::media::{MediaError, MediaKind, MediaTokenIssuer, MediaTransport, TrackRef};
use super::session::{CallSession, CallState, CallType, EndReason};
use super::timer::{Timer, TimerPurpose};
use crate::config::CallConfig;
use crate::identity::{ActorId, CallId, Identity, PeerKind};
use crate::observer::{Emitter, Subscription};
use crate::signaling::{
    CallInitiatePayload, CallNotice, CallPayload, ClientMessage, ConnectionEvent,
    ConnectionManager, DisconnectReason, IncomingCall, PeerLeft, ServerMessage, SignalingError,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Wie viele beendete Call-IDs für Duplikat-Erkennung gemerkt werden
const FINISHED_HISTORY: usize = 32;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    #[error("Already in a call")]
    SessionBusy,

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("No active call")]
    NoActiveCall,

    #[error("Unknown call: {0}")]
    UnknownCall(CallId),

    #[error("Cannot {action} call {call_id} in state {from}")]
    InvalidTransition {
        call_id: CallId,
        from: CallState,
        action: &'static str,
    },

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

// ============================================================================
// CALL EVENTS
// ============================================================================

/// Anzeigewert eines Tick-Events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallClock {
    /// Eingehend, klingelt: verbleibende Sekunden bis zum Timeout
    Countdown { remaining_secs: u64 },
    /// Ausgehend, klingelt: Sekunden seit Initiierung
    Elapsed { secs: u64 },
    /// Verbunden: Gesprächsdauer in Sekunden
    Duration { secs: u64 },
}

/// Events für die Call-Prompt-Consumer
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// Neuer eingehender Anruf (Ringing)
    Incoming(CallSession),
    /// Nicht-terminaler Zustandswechsel
    StateChanged(CallSession),
    /// Terminaler Zustand erreicht; Prompts schließen
    Ended(CallSession),
    Tick { call_id: CallId, clock: CallClock },
}

// ============================================================================
// ACTIVE CALL
// ============================================================================

struct ActiveCall {
    session: CallSession,
    started: Instant,
    connected: Option<Instant>,
    ring_timer: Option<Timer>,
    ticker: Option<Timer>,
    media_task: Option<JoinHandle<()>>,
    media_engaged: bool,
    tracks: Vec<TrackRef>,
}

impl ActiveCall {
    fn new(session: CallSession) -> Self {
        Self {
            session,
            started: Instant::now(),
            connected: None,
            ring_timer: None,
            ticker: None,
            media_task: None,
            media_engaged: false,
            tracks: Vec::new(),
        }
    }

    fn clock(&self) -> Option<CallClock> {
        match self.session.state {
            CallState::Ringing if self.session.is_inbound() => {
                let remaining = self.ring_timer.as_ref()?.remaining()?;
                Some(CallClock::Countdown {
                    remaining_secs: remaining.as_secs(),
                })
            }
            CallState::Initiated | CallState::Ringing => Some(CallClock::Elapsed {
                secs: self.started.elapsed().as_secs(),
            }),
            CallState::Connected => Some(CallClock::Duration {
                secs: self.connected?.elapsed().as_secs(),
            }),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Slot {
    active: Option<ActiveCall>,
    /// Zuletzt beendete Sessions mit ihrem terminalen Zustand
    finished: VecDeque<(CallId, CallState)>,
}

impl Slot {
    fn active_for(&mut self, id: &CallId) -> Option<&mut ActiveCall> {
        self.active.as_mut().filter(|a| &a.session.id == id)
    }

    fn finished_state(&self, id: &CallId) -> Option<CallState> {
        self.finished
            .iter()
            .find(|(finished, _)| finished == id)
            .map(|(_, state)| *state)
    }

    fn remember(&mut self, id: CallId, state: CallState) {
        if self.finished.len() == FINISHED_HISTORY {
            self.finished.pop_front();
        }
        self.finished.push_back((id, state));
    }
}

// ============================================================================
// CALL CONTROLLER
// ============================================================================

struct Inner {
    identity: Identity,
    connection: ConnectionManager,
    media: Arc<dyn MediaTransport>,
    issuer: Arc<dyn MediaTokenIssuer>,
    config: CallConfig,
    slot: Mutex<Slot>,
    events: Emitter<CallEvent>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Call Session Controller
#[derive(Clone)]
pub struct CallController {
    inner: Arc<Inner>,
}

impl CallController {
    /// Erstellt den Controller und abonniert die Signaling-Events
    pub fn new(
        identity: Identity,
        connection: ConnectionManager,
        media: Arc<dyn MediaTransport>,
        issuer: Arc<dyn MediaTokenIssuer>,
        config: CallConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            identity,
            connection: connection.clone(),
            media,
            issuer,
            config,
            slot: Mutex::new(Slot::default()),
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
            if let Some(inner) = weak.upgrade() {
                inner.handle_connection_event(event);
            }
        });

        inner.subscriptions.lock().extend([on_message, on_event]);
        Self { inner }
    }

    /// Registriert einen Handler für Call-Events
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CallEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    /// Die aktuell aktive (nicht-terminale) Session
    pub fn active_session(&self) -> Option<CallSession> {
        self.inner
            .slot
            .lock()
            .active
            .as_ref()
            .map(|a| a.session.clone())
    }

    /// Restzeit bis zum Ring-Timeout eines eingehenden Anrufs
    pub fn ring_remaining(&self, id: &CallId) -> Option<Duration> {
        self.inner
            .slot
            .lock()
            .active_for(id)?
            .ring_timer
            .as_ref()?
            .remaining()
    }

    /// Gesprächsdauer (verbunden) bzw. Zeit seit Initiierung
    pub fn elapsed(&self, id: &CallId) -> Option<Duration> {
        let mut slot = self.inner.slot.lock();
        let active = slot.active_for(id)?;
        Some(active.connected.unwrap_or(active.started).elapsed())
    }

    /// Startet einen ausgehenden Anruf
    ///
    /// Anlegen, Senden der Einladung und der Übergang nach `Ringing`
    /// passieren unter einem Lock; Antworten des Gegenübers sehen die
    /// Session daher frühestens in `Ringing`. Lokal läuft nur ein
    /// Anzeige-Zähler, kein Timeout.
    pub fn initiate_call(
        &self,
        peer_id: ActorId,
        peer_kind: PeerKind,
        call_type: CallType,
    ) -> Result<CallSession, CallError> {
        let inner = &self.inner;
        let ringing = {
            let mut slot = inner.slot.lock();
            if slot.active.is_some() {
                return Err(CallError::SessionBusy);
            }
            if !inner.connection.is_connected() {
                return Err(CallError::NotConnected);
            }

            let mut session = CallSession::new_outbound(peer_id, peer_kind, call_type);
            inner
                .connection
                .send(&ClientMessage::CallInitiate(CallInitiatePayload {
                    call_id: session.id.clone(),
                    from: inner.identity.actor_id.clone(),
                    from_kind: inner.identity.kind.clone(),
                    to: session.peer_id.clone(),
                    to_kind: session.peer_kind.clone(),
                    call_type,
                }))?;

            session.advance(CallState::Ringing);
            let mut active = ActiveCall::new(session.clone());
            active.ticker = Some(inner.ticker(&session.id));
            slot.active = Some(active);
            session
        };

        tracing::info!(
            call_id = %ringing.id,
            peer = %ringing.peer_id,
            "Calling peer ({:?})",
            call_type
        );
        inner.events.emit(&CallEvent::StateChanged(ringing.clone()));
        Ok(ringing)
    }

    /// Nimmt einen eingehenden, klingelnden Anruf an
    ///
    /// Stoppt den Ring-Timeout sofort; `Connected` folgt, sobald der Media
    /// Transport Adapter Publish und Subscribe bestätigt hat.
    pub fn accept_call(&self, id: &CallId) -> Result<(), CallError> {
        let inner = &self.inner;
        let session = {
            let mut slot = inner.slot.lock();
            let finished = slot.finished_state(id);
            let Some(active) = slot.active_for(id) else {
                return Err(match finished {
                    Some(from) => CallError::InvalidTransition {
                        call_id: id.clone(),
                        from,
                        action: "accept",
                    },
                    None => CallError::UnknownCall(id.clone()),
                });
            };

            let from = active.session.state;
            if !active.session.is_inbound() || from != CallState::Ringing {
                return Err(CallError::InvalidTransition {
                    call_id: id.clone(),
                    from,
                    action: "accept",
                });
            }

            inner.connection.send(&ClientMessage::CallAccept(CallPayload::new(
                &inner.identity,
                id.clone(),
                active.session.peer_id.clone(),
            )))?;

            if let Some(ring_timer) = active.ring_timer.take() {
                ring_timer.cancel();
            }
            active.ticker = None;
            active.session.advance(CallState::Accepted);
            active.media_engaged = true;
            active.session.clone()
        };

        tracing::info!(call_id = %id, "Call accepted locally");
        inner.events.emit(&CallEvent::StateChanged(session.clone()));
        Inner::start_media(inner, session);
        Ok(())
    }

    /// Lehnt einen klingelnden Anruf ab; ohne Wirkung wenn bereits beendet
    pub fn reject_call(&self, id: &CallId, reason: impl Into<String>) -> Result<(), CallError> {
        let reason = reason.into();
        let ended = self.inner.terminate(id, |session| {
            if session.state != CallState::Ringing {
                return Err(CallError::InvalidTransition {
                    call_id: id.clone(),
                    from: session.state,
                    action: "reject",
                });
            }
            Ok((CallState::Rejected, EndReason::Local(reason.clone())))
        })?;

        if let Some(session) = ended {
            self.inner
                .notify_peer(ClientMessage::CallReject, &session, Some(reason));
        }
        Ok(())
    }

    /// Bricht einen eigenen, noch nicht angenommenen Anruf ab
    pub fn cancel_call(&self, id: &CallId) -> Result<(), CallError> {
        let ended = self.inner.terminate(id, |session| {
            let cancellable = !session.is_inbound()
                && matches!(session.state, CallState::Initiated | CallState::Ringing);
            if !cancellable {
                return Err(CallError::InvalidTransition {
                    call_id: id.clone(),
                    from: session.state,
                    action: "cancel",
                });
            }
            Ok((CallState::Cancelled, EndReason::Local("cancelled".into())))
        })?;

        if let Some(session) = ended {
            self.inner
                .notify_peer(ClientMessage::CallEnd, &session, Some("cancelled".into()));
        }
        Ok(())
    }

    /// Beendet einen angenommenen oder verbundenen Anruf
    pub fn end_call(&self, id: &CallId, reason: impl Into<String>) -> Result<(), CallError> {
        let reason = reason.into();
        let ended = self.inner.terminate(id, |session| {
            if !session.state.is_established() {
                return Err(CallError::InvalidTransition {
                    call_id: id.clone(),
                    from: session.state,
                    action: "end",
                });
            }
            Ok((CallState::Ended, EndReason::Local(reason.clone())))
        })?;

        if let Some(session) = ended {
            self.inner
                .notify_peer(ClientMessage::CallEnd, &session, Some(reason));
        }
        Ok(())
    }

    /// Mikrofon des aktiven Anrufs an/aus
    pub fn set_microphone_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.set_track_enabled(MediaKind::Audio, enabled)
    }

    /// Kamera des aktiven Anrufs an/aus
    pub fn set_camera_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.set_track_enabled(MediaKind::Video, enabled)
    }

    fn set_track_enabled(&self, kind: MediaKind, enabled: bool) -> Result<(), CallError> {
        let track = {
            let slot = self.inner.slot.lock();
            let active = slot
                .active
                .as_ref()
                .filter(|a| a.session.state == CallState::Connected)
                .ok_or(CallError::NoActiveCall)?;
            active
                .tracks
                .iter()
                .find(|t| t.kind == kind)
                .cloned()
                .ok_or_else(|| MediaError::UnknownTrack(format!("{kind:?}")))?
        };

        self.inner.media.set_track_enabled(&track, enabled)?;
        Ok(())
    }
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController")
            .field("actor", &self.inner.identity.actor_id)
            .field("active", &self.active_session().map(|s| (s.id, s.state)))
            .finish()
    }
}

// ============================================================================
// PRIVATE METHODS
// ============================================================================

impl Inner {
    /// Nicht-terminaler Übergang mit Zustandsprüfung
    ///
    /// `on_advanced` läuft noch unter dem Lock (z.B. um Timer zu tauschen).
    fn advance(
        self: &Arc<Self>,
        id: &CallId,
        next: CallState,
        on_advanced: impl FnOnce(&Arc<Self>, &mut ActiveCall),
    ) -> Option<CallSession> {
        let session = {
            let mut slot = self.slot.lock();
            let active = slot.active_for(id)?;
            let from = active.session.state;
            if !active.session.advance(next) {
                tracing::debug!(call_id = %id, %from, to = %next, "Ignoring stale transition");
                return None;
            }
            on_advanced(self, active);
            tracing::info!(call_id = %id, %from, to = %next, "Call state changed");
            active.session.clone()
        };

        self.events.emit(&CallEvent::StateChanged(session.clone()));
        Some(session)
    }

    /// Einziger Weg in einen terminalen Zustand
    ///
    /// `decide` prüft unter dem Lock, ob und wohin die Session endet. Bereits
    /// beendete Sessions ergeben `Ok(None)`. Timer, Media-Setup und Media
    /// werden hier genau einmal freigegeben.
    fn terminate(
        &self,
        id: &CallId,
        decide: impl FnOnce(&CallSession) -> Result<(CallState, EndReason), CallError>,
    ) -> Result<Option<CallSession>, CallError> {
        let mut active = {
            let mut slot = self.slot.lock();
            let finished = slot.finished_state(id);
            let Some(active) = slot.active_for(id) else {
                return match finished {
                    Some(_) => Ok(None),
                    None => Err(CallError::UnknownCall(id.clone())),
                };
            };

            let (terminal, reason) = decide(&active.session)?;
            let from = active.session.state;
            if !active.session.terminate(terminal, reason) {
                return Ok(None);
            }
            tracing::info!(call_id = %id, %from, to = %terminal, "Call state changed");

            slot.remember(id.clone(), terminal);
            match slot.active.take() {
                Some(active) => active,
                None => return Ok(None),
            }
        };

        // Cleanup außerhalb des Locks
        if let Some(timer) = active.ring_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = active.ticker.take() {
            timer.cancel();
        }
        if let Some(task) = active.media_task.take() {
            task.abort();
        }
        if active.media_engaged {
            self.media.close();
        }

        tracing::info!(
            call_id = %id,
            reason = ?active.session.end_reason,
            "Call finished as {}",
            active.session.state
        );
        self.events.emit(&CallEvent::Ended(active.session.clone()));
        Ok(Some(active.session))
    }

    /// Remote-Events: unbekannte oder beendete IDs still ignorieren
    fn terminate_remote(
        &self,
        id: &CallId,
        decide: impl FnOnce(&CallSession) -> (CallState, EndReason),
    ) {
        match self.terminate(id, |session| Ok(decide(session))) {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => {
                tracing::debug!(call_id = %id, "Ignoring event for inactive call");
            }
        }
    }

    fn notify_peer(
        &self,
        build: fn(CallPayload) -> ClientMessage,
        session: &CallSession,
        reason: Option<String>,
    ) {
        let mut payload =
            CallPayload::new(&self.identity, session.id.clone(), session.peer_id.clone());
        if let Some(reason) = reason {
            payload = payload.with_reason(reason);
        }
        let message = build(payload);
        if let Err(e) = self.connection.send(&message) {
            tracing::warn!(call_id = %session.id, kind = message.kind(), "Failed to notify peer: {}", e);
        }
    }

    fn ticker(self: &Arc<Self>, id: &CallId) -> Timer {
        let weak = Arc::downgrade(self);
        let id = id.clone();
        Timer::every(TimerPurpose::DurationTick, self.config.tick_interval, move || {
            match weak.upgrade() {
                Some(inner) => inner.tick(&id),
                None => false,
            }
        })
    }

    /// Liefert `false`, sobald die Session nicht mehr aktiv ist
    fn tick(&self, id: &CallId) -> bool {
        let clock = {
            let mut slot = self.slot.lock();
            let Some(active) = slot.active_for(id) else {
                return false;
            };
            active.clock()
        };

        if let Some(clock) = clock {
            self.events.emit(&CallEvent::Tick {
                call_id: id.clone(),
                clock,
            });
        }
        true
    }

    fn on_ring_timeout(&self, id: &CallId) {
        let ended = self.terminate(id, |session| {
            if session.state != CallState::Ringing || !session.is_inbound() {
                return Err(CallError::InvalidTransition {
                    call_id: id.clone(),
                    from: session.state,
                    action: "time out",
                });
            }
            Ok((CallState::Missed, EndReason::Timeout))
        });

        if let Ok(Some(session)) = ended {
            tracing::info!(call_id = %id, "Ring timeout expired");
            self.notify_peer(ClientMessage::CallReject, &session, Some("timeout".into()));
        }
    }

    // ------------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------------

    fn start_media(self: &Arc<Self>, session: CallSession) {
        let id = session.id.clone();
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match inner.setup_media(&session).await {
                Ok(tracks) => inner.media_ready(&session.id, tracks),
                Err(e) => {
                    tracing::warn!(call_id = %session.id, "Media setup failed: {}", e);
                    let ended = inner.terminate(&session.id, |_| {
                        Ok((CallState::Ended, EndReason::Media(e.to_string())))
                    });
                    if let Ok(Some(ended)) = ended {
                        inner.notify_peer(ClientMessage::CallEnd, &ended, Some("media-error".into()));
                    }
                }
            }
        });

        let mut slot = self.slot.lock();
        match slot.active_for(&id) {
            Some(active) if !task.is_finished() => active.media_task = Some(task),
            _ => task.abort(),
        }
    }

    async fn setup_media(&self, session: &CallSession) -> Result<Vec<TrackRef>, MediaError> {
        let grant = self.issuer.issue(session).await?;

        let mut tracks = vec![self.media.create_local_audio_track().await?];
        if session.call_type == CallType::Video {
            tracks.push(self.media.create_local_video_track().await?);
        }

        self.media.publish(&grant, &tracks).await?;
        self.media
            .subscribe(&grant, &session.peer_id, MediaKind::Audio)
            .await?;
        if session.call_type == CallType::Video {
            self.media
                .subscribe(&grant, &session.peer_id, MediaKind::Video)
                .await?;
        }
        Ok(tracks)
    }

    fn media_ready(self: &Arc<Self>, id: &CallId, tracks: Vec<TrackRef>) {
        let connected = self.advance(id, CallState::Connected, |inner, active| {
            active.tracks = tracks;
            active.connected = Some(Instant::now());
            active.media_task = None;
            active.ticker = Some(inner.ticker(id));
        });

        if let Some(session) = connected {
            self.notify_peer(ClientMessage::CallConnected, &session, None);
        }
    }

    // ------------------------------------------------------------------------
    // Eingehende Events
    // ------------------------------------------------------------------------

    fn handle_server_message(self: &Arc<Self>, message: &ServerMessage) {
        match message {
            ServerMessage::IncomingCall(incoming) => self.on_incoming(incoming),
            ServerMessage::CallAccepted(notice) => self.on_remote_accepted(notice),
            ServerMessage::CallRejected(notice) => self.terminate_remote(&notice.call_id, |_| {
                (CallState::Rejected, EndReason::Remote(notice.reason.clone()))
            }),
            ServerMessage::CallEnded(notice) => self.terminate_remote(&notice.call_id, |s| {
                (
                    remote_end_state(s),
                    EndReason::Remote(notice.reason.clone()),
                )
            }),
            ServerMessage::CallMissed(notice) => self.terminate_remote(&notice.call_id, |_| {
                (CallState::Missed, EndReason::Timeout)
            }),
            ServerMessage::PeerLeft(left) => self.on_peer_left(left),
            _ => {}
        }
    }

    fn on_incoming(self: &Arc<Self>, incoming: &IncomingCall) {
        let id = &incoming.call_id;
        let session = {
            let mut slot = self.slot.lock();
            let duplicate = slot.finished_state(id).is_some()
                || slot.active.as_ref().is_some_and(|a| &a.session.id == id);
            if duplicate {
                tracing::debug!(call_id = %id, "Ignoring duplicate incoming call");
                return;
            }

            if slot.active.is_some() {
                drop(slot);
                tracing::info!(call_id = %id, from = %incoming.from, "Busy, rejecting incoming call");
                let payload = CallPayload::new(&self.identity, id.clone(), incoming.from.clone())
                    .with_reason("busy");
                if let Err(e) = self.connection.send(&ClientMessage::CallReject(payload)) {
                    tracing::warn!(call_id = %id, "Failed to send busy reject: {}", e);
                }
                return;
            }

            let session = CallSession::new_inbound(
                id.clone(),
                incoming.from.clone(),
                incoming.from_kind.clone(),
                incoming.call_type,
            );
            let mut active = ActiveCall::new(session.clone());

            let weak = Arc::downgrade(self);
            let timer_id = id.clone();
            active.ring_timer = Some(Timer::once(
                TimerPurpose::RingTimeout,
                self.config.ring_timeout,
                move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_ring_timeout(&timer_id);
                    }
                },
            ));
            active.ticker = Some(self.ticker(id));
            slot.active = Some(active);
            session
        };

        tracing::info!(call_id = %id, from = %incoming.from, "Incoming {:?} call", incoming.call_type);
        self.events.emit(&CallEvent::Incoming(session));
    }

    fn on_remote_accepted(self: &Arc<Self>, notice: &CallNotice) {
        let accepted = {
            let mut slot = self.slot.lock();
            let Some(active) = slot.active_for(&notice.call_id) else {
                tracing::debug!(call_id = %notice.call_id, "Ignoring accept for inactive call");
                return;
            };
            if active.session.is_inbound() || !active.session.advance(CallState::Accepted) {
                tracing::debug!(call_id = %notice.call_id, state = %active.session.state, "Ignoring stale accept");
                return;
            }
            active.ticker = None;
            active.media_engaged = true;
            active.session.clone()
        };

        tracing::info!(call_id = %notice.call_id, "Call accepted by peer");
        self.events.emit(&CallEvent::StateChanged(accepted.clone()));
        self.start_media(accepted);
    }

    fn on_peer_left(&self, left: &PeerLeft) {
        let id = {
            let slot = self.slot.lock();
            let Some(active) = slot.active.as_ref() else {
                return;
            };
            let same_call = left.call_id.as_ref().map_or(true, |id| id == &active.session.id);
            if !same_call || active.session.peer_id != left.peer_id {
                return;
            }
            active.session.id.clone()
        };

        self.terminate_remote(&id, |s| (remote_end_state(s), EndReason::PeerLeft));
    }

    fn handle_connection_event(&self, event: &ConnectionEvent) {
        let lost = matches!(
            event,
            ConnectionEvent::ReconnectFailed { .. }
                | ConnectionEvent::Disconnected {
                    reason: DisconnectReason::ClientRequested
                }
        );
        if !lost {
            return;
        }

        let Some(id) = self.slot.lock().active.as_ref().map(|a| a.session.id.clone()) else {
            return;
        };
        tracing::warn!(call_id = %id, "Signaling channel lost, ending call");
        self.terminate_remote(&id, |s| (remote_end_state(s), EndReason::ConnectionLost));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for subscription in self.subscriptions.get_mut().drain(..) {
            subscription.unsubscribe();
        }
    }
}

/// Ende durch das Gegenüber: vor der Annahme Cancelled, danach Ended
fn remote_end_state(session: &CallSession) -> CallState {
    if session.state.is_established() {
        CallState::Ended
    } else {
        CallState::Cancelled
    }
}

// ============================================================================
// TESTS
// ============================================================================
