// src/client/session.rs
// The call session state machine.
//
// One `CallClient` owns at most one live call. Every transition goes through the
// session lock; slow work (media capture, SDP negotiation, sending) runs outside it and
// re-checks the call epoch when it comes back, so a hangup that lands mid-transition
// wins and the late work releases whatever it acquired.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use tokio::{
    sync::{mpsc, Mutex},
    task::{AbortHandle, JoinHandle},
};
use tracing::{debug, info, warn};

use super::{
    media::{MediaConstraints, MediaDevices, PeerConnectionFactory, PeerEvent, PeerRef, StreamRef},
    queue::{PendingSignal, SignalQueue},
    storage::{FilePendingCallStore, PendingCallStore},
    telephony::{NativeTelephony, NoTelephony, UNKNOWN_CALLER},
    transport::{SignalingTransport, TransportEvent},
    AppLifecycle, CallUi,
};
use crate::{
    config::ClientConfig,
    error::CallError,
    types::{
        AnswerCallPayload, CallAnsweredPayload, CallEndedPayload, CallPayload, ClientEvent,
        new_room_id, EndCallPayload, IceCandidate, IceCandidatePayload, IceServer, InviteMessage,
        NewCallPayload, RemoteCandidatePayload, RoomId, ServerEvent, SessionDescription, UserId,
    },
};

/// Candidates held while no call exists yet; the caller's trickle can outrun its `newCall`.
const EARLY_CANDIDATE_LIMIT: usize = 64;

/// Finished rooms remembered so a late second copy of their invite does not ring.
const RECENT_ROOM_LIMIT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Outgoing offer sent, waiting for the callee.
    Calling,
    /// Incoming invite shown, not yet accepted.
    Ringing,
    Active,
    /// Teardown in progress.
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// Who asked for the teardown. Only a local hangup notifies the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Local,
    Remote,
    /// Outgoing setup failed before the other side heard of it.
    Aborted,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub state:                  CallState,
    pub caller_id:              Option<UserId>,
    pub callee_id:              Option<UserId>,
    pub room_id:                Option<RoomId>,
    pub remote_description_set: bool,
    pub call_active:            bool,
    pub leave_in_flight:        bool,
    pub queued_signals:         usize,
    pub has_local_stream:       bool,
    pub has_remote_stream:      bool,
}

// ── Session state ─────────────────────────────────────────────────────────────

struct CallSession {
    state:                  CallState,
    direction:              Option<CallDirection>,
    other_user_id:          Option<UserId>,
    room_id:                Option<RoomId>,
    peer:                   Option<PeerRef>,
    local_stream:           Option<StreamRef>,
    remote_stream:          Option<StreamRef>,
    queue:                  SignalQueue,
    remote_description_set: bool,
    call_active:            bool,
    leave_in_flight:        bool,
    /// The current invite was already answered (native UI may report twice).
    answered:               bool,
    /// Bumped on every call start and teardown; in-flight work compares against it.
    epoch:                  u64,
    ring_timer:             Option<AbortHandle>,
    lifecycle:              AppLifecycle,
    recent_rooms:           VecDeque<RoomId>,
}

/// Everything a teardown takes out of the session.
struct Released {
    peer:          Option<PeerRef>,
    local_stream:  Option<StreamRef>,
    remote_stream: Option<StreamRef>,
    other_user_id: Option<UserId>,
    room_id:       Option<RoomId>,
}

impl CallSession {
    fn new() -> Self {
        Self {
            state:                  CallState::Idle,
            direction:              None,
            other_user_id:          None,
            room_id:                None,
            peer:                   None,
            local_stream:           None,
            remote_stream:          None,
            queue:                  SignalQueue::new(),
            remote_description_set: false,
            call_active:            false,
            leave_in_flight:        false,
            answered:               false,
            epoch:                  0,
            ring_timer:             None,
            lifecycle:              AppLifecycle::Foreground,
            recent_rooms:           VecDeque::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.state == CallState::Idle && !self.leave_in_flight
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.call_active && !self.leave_in_flight
    }

    fn begin(&mut self, state: CallState, direction: CallDirection, other: &str, room_id: &str) -> u64 {
        self.epoch += 1;
        self.state = state;
        self.direction = Some(direction);
        self.other_user_id = Some(other.to_owned());
        self.room_id = Some(room_id.to_owned());
        self.queue.clear();
        self.remote_description_set = false;
        self.call_active = true;
        self.answered = false;
        self.epoch
    }

    fn cancel_ring_timer(&mut self) {
        if let Some(timer) = self.ring_timer.take() {
            timer.abort();
        }
    }

    fn release(&mut self) -> Released {
        self.leave_in_flight = true;
        self.call_active = false;
        self.state = CallState::Ended;
        self.epoch += 1;
        self.cancel_ring_timer();
        self.queue.clear();
        self.remote_description_set = false;
        self.direction = None;
        if let Some(room) = &self.room_id {
            self.remember_room(room.clone());
        }
        Released {
            peer:          self.peer.take(),
            local_stream:  self.local_stream.take(),
            remote_stream: self.remote_stream.take(),
            other_user_id: self.other_user_id.take(),
            room_id:       self.room_id.take(),
        }
    }

    fn remember_room(&mut self, room_id: RoomId) {
        if self.recent_rooms.contains(&room_id) {
            return;
        }
        if self.recent_rooms.len() == RECENT_ROOM_LIMIT {
            self.recent_rooms.pop_front();
        }
        self.recent_rooms.push_back(room_id);
    }

    fn is_finished_room(&self, room_id: &str) -> bool {
        self.recent_rooms.iter().any(|r| r == room_id)
    }

    fn snapshot(&self, own_id: &str) -> CallSnapshot {
        let (caller_id, callee_id) = match self.direction {
            Some(CallDirection::Outgoing) => (Some(own_id.to_owned()), self.other_user_id.clone()),
            Some(CallDirection::Incoming) => (self.other_user_id.clone(), Some(own_id.to_owned())),
            None => (None, None),
        };
        CallSnapshot {
            state: self.state,
            caller_id,
            callee_id,
            room_id:                self.room_id.clone(),
            remote_description_set: self.remote_description_set,
            call_active:            self.call_active,
            leave_in_flight:        self.leave_in_flight,
            queued_signals:         self.queue.len(),
            has_local_stream:       self.local_stream.is_some(),
            has_remote_stream:      self.remote_stream.is_some(),
        }
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

pub struct CallClientBuilder {
    config:    ClientConfig,
    transport: Option<Arc<dyn SignalingTransport>>,
    media:     Option<Arc<dyn MediaDevices>>,
    peers:     Option<Arc<dyn PeerConnectionFactory>>,
    telephony: Option<Arc<dyn NativeTelephony>>,
    store:     Option<Arc<dyn PendingCallStore>>,
    ui:        Option<Arc<dyn CallUi>>,
}

impl CallClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn SignalingTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn media_devices(mut self, media: Arc<dyn MediaDevices>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn peer_factory(mut self, peers: Arc<dyn PeerConnectionFactory>) -> Self {
        self.peers = Some(peers);
        self
    }

    /// Defaults to [`NoTelephony`].
    pub fn telephony(mut self, telephony: Arc<dyn NativeTelephony>) -> Self {
        self.telephony = Some(telephony);
        self
    }

    /// Defaults to a file store under `config.storage_dir`.
    pub fn pending_store(mut self, store: Arc<dyn PendingCallStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn ui(mut self, ui: Arc<dyn CallUi>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn build(self) -> Result<CallClient, CallError> {
        let transport = self.transport.ok_or(CallError::Incomplete("a signaling transport"))?;
        let media = self.media.ok_or(CallError::Incomplete("media devices"))?;
        let peers = self.peers.ok_or(CallError::Incomplete("a peer connection factory"))?;
        let ui = self.ui.ok_or(CallError::Incomplete("a call ui"))?;
        let telephony = self.telephony.unwrap_or_else(|| Arc::new(NoTelephony));
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(FilePendingCallStore::new(&self.config.storage_dir)),
        };

        Ok(CallClient {
            inner: Arc::new(ClientInner {
                user_id:      self.config.user_id,
                ice_servers:  self.config.ice_servers,
                ring_timeout: self.config.ring_timeout,
                session:      Mutex::new(CallSession::new()),
                transport,
                media,
                peers,
                telephony,
                store,
                ui,
            }),
        })
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

struct ClientInner {
    user_id:      UserId,
    ice_servers:  Vec<IceServer>,
    ring_timeout: Option<Duration>,
    session:      Mutex<CallSession>,
    transport:    Arc<dyn SignalingTransport>,
    media:        Arc<dyn MediaDevices>,
    peers:        Arc<dyn PeerConnectionFactory>,
    telephony:    Arc<dyn NativeTelephony>,
    store:        Arc<dyn PendingCallStore>,
    ui:           Arc<dyn CallUi>,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct CallClient {
    inner: Arc<ClientInner>,
}

impl CallClient {
    pub fn builder(config: ClientConfig) -> CallClientBuilder {
        CallClientBuilder {
            config,
            transport: None,
            media:     None,
            peers:     None,
            telephony: None,
            store:     None,
            ui:        None,
        }
    }

    pub fn user_id(&self) -> &str { &self.inner.user_id }

    pub async fn snapshot(&self) -> CallSnapshot {
        self.inner.session.lock().await.snapshot(&self.inner.user_id)
    }

    pub async fn local_stream(&self) -> Option<StreamRef> {
        self.inner.session.lock().await.local_stream.clone()
    }

    pub async fn remote_stream(&self) -> Option<StreamRef> {
        self.inner.session.lock().await.remote_stream.clone()
    }

    pub async fn set_app_lifecycle(&self, lifecycle: AppLifecycle) {
        self.inner.session.lock().await.lifecycle = lifecycle;
    }

    // ── Outgoing ──────────────────────────────────────────────────────────────

    /// Starts a call to `callee_id` in a fresh room and returns the room id.
    pub async fn start_call(&self, callee_id: &str) -> Result<RoomId, CallError> {
        let room_id = new_room_id();
        self.place_call(callee_id, &room_id).await?;
        Ok(room_id)
    }

    /// Starts a call to `callee_id` in `room_id`.
    pub async fn place_call(&self, callee_id: &str, room_id: &str) -> Result<(), CallError> {
        let epoch = {
            let mut s = self.inner.session.lock().await;
            if !s.is_idle() {
                warn!("[call] cannot call '{callee_id}': a call is already in progress");
                return Err(CallError::Busy);
            }
            s.begin(CallState::Calling, CallDirection::Outgoing, callee_id, room_id)
        };
        info!("[call] calling '{callee_id}' (room {room_id})");

        match self.send_offer(epoch, callee_id, room_id).await {
            Ok(()) => {
                let mut s = self.inner.session.lock().await;
                if s.is_current(epoch) && s.state == CallState::Calling {
                    self.arm_ring_timer(&mut s, epoch);
                }
                Ok(())
            }
            Err(CallError::Cancelled) => Err(CallError::Cancelled),
            Err(e) => {
                warn!("[call] call to '{callee_id}' failed: {e}");
                self.inner.ui.call_failed(&e);
                self.teardown_if_current(epoch, Origin::Aborted).await;
                Err(e)
            }
        }
    }

    async fn send_offer(&self, epoch: u64, callee_id: &str, room_id: &str) -> Result<(), CallError> {
        let pc = self.start_peer(epoch).await?;
        self.acquire_media(epoch, &pc).await?;

        let offer = pc.create_offer().await?;
        pc.set_local_description(&offer).await?;
        self.ensure_current(epoch).await?;

        self.inner.transport.send(ClientEvent::Call(CallPayload {
            callee_id:   callee_id.to_owned(),
            rtc_message: serde_json::to_value(&offer)?,
            room_id:     room_id.to_owned(),
        })).await
    }

    // ── Incoming ──────────────────────────────────────────────────────────────

    /// Accepts the ringing invite for `room_id`.
    pub async fn accept_call(&self, room_id: &str) -> Result<(), CallError> {
        let (epoch, caller_id) = {
            let mut s = self.inner.session.lock().await;
            if s.state != CallState::Ringing || !s.call_active || s.leave_in_flight {
                return Err(CallError::NoPendingCall);
            }
            let pending = s.room_id.clone().unwrap_or_default();
            if pending != room_id {
                return Err(CallError::RoomMismatch { expected: pending, got: room_id.to_owned() });
            }
            let Some(caller_id) = s.other_user_id.clone() else {
                return Err(CallError::NoPendingCall);
            };
            s.state = CallState::Active;
            s.answered = true;
            s.cancel_ring_timer();
            (s.epoch, caller_id)
        };
        info!("[call] accepting call from '{caller_id}' (room {room_id})");

        match self.send_answer(epoch, &caller_id, room_id).await {
            Ok(()) => {
                if let Err(e) = self.inner.store.clear().await {
                    warn!("[call] could not clear pending call: {e}");
                }
                self.inner.ui.show_in_call(&caller_id, room_id);
                Ok(())
            }
            Err(CallError::Cancelled) => Err(CallError::Cancelled),
            Err(e) => {
                warn!("[call] accepting {room_id} failed: {e}");
                self.inner.ui.call_failed(&e);
                self.teardown_if_current(epoch, Origin::Local).await;
                Err(e)
            }
        }
    }

    async fn send_answer(&self, epoch: u64, caller_id: &str, room_id: &str) -> Result<(), CallError> {
        let pc = self.start_peer(epoch).await?;
        self.acquire_media(epoch, &pc).await?;
        // the stored offer sits at the head of the queue
        self.apply_remote_description(epoch, None).await?;

        let answer = pc.create_answer().await?;
        pc.set_local_description(&answer).await?;
        self.ensure_current(epoch).await?;

        self.inner.transport.send(ClientEvent::AnswerCall(AnswerCallPayload {
            caller_id:   caller_id.to_owned(),
            rtc_message: serde_json::to_value(&answer)?,
            room_id:     room_id.to_owned(),
        })).await
    }

    /// Hangs up whatever call is in progress.
    pub async fn end_call(&self) {
        self.teardown(Origin::Local).await;
    }

    // ── Signaling input ───────────────────────────────────────────────────────

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => info!("[call] signaling connected as '{}'", self.inner.user_id),
            TransportEvent::Event(event) => self.handle_server_event(event).await,
            TransportEvent::Disconnected => {
                info!("[call] signaling disconnected");
                self.teardown(Origin::Remote).await;
            }
        }
    }

    /// Processes transport events one by one until the channel closes.
    pub fn spawn_event_loop(&self, mut events: mpsc::Receiver<TransportEvent>) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                client.handle_transport_event(event).await;
            }
        })
    }

    pub async fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewCall(p)      => self.on_new_call(p).await,
            ServerEvent::CallAnswered(p) => self.on_call_answered(p).await,
            ServerEvent::IceCandidate(p) => self.on_remote_candidate(p).await,
            ServerEvent::CallEnded(p)    => self.on_call_ended(p).await,
        }
    }

    /// Handles a push notification's data. Returns `false` when it is not a call invite.
    pub async fn handle_push(&self, data: &HashMap<String, String>) -> bool {
        match InviteMessage::from_push_data(data) {
            Some(invite) => {
                self.on_invite(invite).await;
                true
            }
            None => {
                debug!("[push] ignoring non-call message");
                false
            }
        }
    }

    async fn on_new_call(&self, payload: NewCallPayload) {
        self.on_invite(InviteMessage {
            caller_id: payload.caller_id,
            room_id:   payload.room_id,
            offer:     payload.rtc_message,
        }).await;
    }

    /// Common path for `newCall` and push invites; the same room arriving both ways rings once.
    async fn on_invite(&self, invite: InviteMessage) {
        let offer: SessionDescription = match serde_json::from_value(invite.offer) {
            Ok(offer) => offer,
            Err(e) => {
                warn!("[call] invite for {} has an unreadable offer: {e}", invite.room_id);
                return;
            }
        };
        let InviteMessage { caller_id, room_id, .. } = invite;

        let (epoch, lifecycle) = {
            let mut s = self.inner.session.lock().await;
            if s.is_finished_room(&room_id) {
                debug!("[call] invite for finished room {room_id} ignored");
                return;
            }
            if !s.is_idle() {
                if s.room_id.as_deref() == Some(room_id.as_str()) {
                    debug!("[call] duplicate invite for {room_id}");
                } else {
                    warn!("[call] busy, ignoring call from '{caller_id}' (room {room_id})");
                }
                return;
            }
            let early = s.queue.drain();
            let epoch = s.begin(CallState::Ringing, CallDirection::Incoming, &caller_id, &room_id);
            s.queue.push(PendingSignal::Offer(offer));
            for signal in early {
                if let PendingSignal::IceCandidate(c) = signal {
                    s.queue.push(PendingSignal::IceCandidate(c));
                }
            }
            self.arm_ring_timer(&mut s, epoch);
            (epoch, s.lifecycle)
        };
        info!("[call] incoming call from '{caller_id}' (room {room_id})");

        if let Err(e) = self.inner.store.save(&room_id).await {
            warn!("[call] could not persist pending call: {e}");
        }
        if !self.inner.session.lock().await.is_current(epoch) {
            // torn down while the marker was being written
            if let Err(e) = self.inner.store.clear().await {
                warn!("[call] could not clear pending call: {e}");
            }
            return;
        }

        match lifecycle {
            AppLifecycle::Foreground => self.inner.ui.show_incoming_call(&caller_id, &room_id),
            AppLifecycle::Background => {
                let label = if caller_id.is_empty() { UNKNOWN_CALLER } else { caller_id.as_str() };
                self.inner.telephony.display_incoming_call(&room_id, label);
            }
        }
    }

    async fn on_call_answered(&self, payload: CallAnsweredPayload) {
        let answer: SessionDescription = match serde_json::from_value(payload.rtc_message) {
            Ok(answer) => answer,
            Err(e) => {
                warn!("[call] unreadable answer for {}: {e}", payload.room_id);
                return;
            }
        };

        let epoch = {
            let s = self.inner.session.lock().await;
            if s.state != CallState::Calling || !s.call_active || s.leave_in_flight {
                debug!("[call] answer for {} arrived with no outgoing call", payload.room_id);
                return;
            }
            if s.room_id.as_deref() != Some(payload.room_id.as_str()) {
                warn!("[call] answer for stale room {} ignored", payload.room_id);
                return;
            }
            s.epoch
        };

        match self.apply_remote_description(epoch, Some(&answer)).await {
            Ok(()) => {
                let (other, room) = {
                    let mut s = self.inner.session.lock().await;
                    if !s.is_current(epoch) {
                        return;
                    }
                    s.state = CallState::Active;
                    s.cancel_ring_timer();
                    (s.other_user_id.clone().unwrap_or_default(), s.room_id.clone().unwrap_or_default())
                };
                info!("[call] '{other}' answered (room {room})");
                self.inner.ui.show_in_call(&other, &room);
            }
            Err(CallError::Cancelled) => {}
            Err(e) => {
                warn!("[call] applying answer failed: {e}");
                self.inner.ui.call_failed(&e);
                self.teardown_if_current(epoch, Origin::Local).await;
            }
        }
    }

    async fn on_remote_candidate(&self, payload: RemoteCandidatePayload) {
        let candidate: IceCandidate = match serde_json::from_value(payload.rtc_message) {
            Ok(c) => c,
            Err(e) => {
                warn!("[ice] unreadable candidate: {e}");
                return;
            }
        };

        let mut s = self.inner.session.lock().await;
        if s.leave_in_flight {
            debug!("[ice] call is ending, candidate dropped");
            return;
        }
        let ready = if s.call_active && s.remote_description_set { s.peer.clone() } else { None };
        match ready {
            Some(pc) => {
                if let Err(e) = pc.add_ice_candidate(&candidate).await {
                    warn!("[ice] candidate rejected: {e}");
                }
            }
            None if !s.call_active && s.queue.len() >= EARLY_CANDIDATE_LIMIT => {
                warn!("[ice] {EARLY_CANDIDATE_LIMIT} candidates held with no call, dropping");
            }
            None => {
                s.queue.push(PendingSignal::IceCandidate(candidate));
                debug!("[ice] queued candidate ({} pending)", s.queue.len());
            }
        }
    }

    async fn on_call_ended(&self, payload: CallEndedPayload) {
        {
            let s = self.inner.session.lock().await;
            if let (Some(ended), Some(current)) = (&payload.room_id, &s.room_id) {
                if ended != current {
                    debug!("[call] callEnded for stale room {ended} ignored");
                    return;
                }
            }
        }
        self.teardown(Origin::Remote).await;
    }

    // ── Native call UI ────────────────────────────────────────────────────────

    /// The user answered from the system call UI. Only the first answer per invite counts.
    pub async fn on_native_answer(&self, room_id: &str) -> Result<(), CallError> {
        {
            let mut s = self.inner.session.lock().await;
            if s.answered {
                debug!("[telephony] {room_id} already answered");
                return Ok(());
            }
            s.answered = true;
        }

        let pending = match self.inner.store.load().await {
            Ok(pending) => pending,
            Err(e) => {
                self.inner.session.lock().await.answered = false;
                return Err(e);
            }
        };
        if pending.as_deref() != Some(room_id) {
            self.inner.session.lock().await.answered = false;
            return Err(CallError::RoomMismatch {
                expected: pending.unwrap_or_default(),
                got:      room_id.to_owned(),
            });
        }

        self.accept_call(room_id).await?;
        self.inner.telephony.back_to_foreground();
        Ok(())
    }

    /// The user declined or hung up from the system call UI.
    pub async fn on_native_end(&self, room_id: &str) {
        {
            let s = self.inner.session.lock().await;
            if s.room_id.as_deref().is_some_and(|current| current != room_id) {
                debug!("[telephony] end for stale room {room_id} ignored");
                return;
            }
        }
        self.teardown(Origin::Local).await;
    }

    // ── Negotiation helpers ───────────────────────────────────────────────────

    async fn ensure_current(&self, epoch: u64) -> Result<(), CallError> {
        if self.inner.session.lock().await.is_current(epoch) {
            Ok(())
        } else {
            Err(CallError::Cancelled)
        }
    }

    async fn start_peer(&self, epoch: u64) -> Result<PeerRef, CallError> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let pc = self.inner.peers.create(&self.inner.ice_servers, events_tx).await?;
        {
            let mut s = self.inner.session.lock().await;
            if !s.is_current(epoch) {
                drop(s);
                pc.close();
                return Err(CallError::Cancelled);
            }
            if let Some(old) = s.peer.replace(pc.clone()) {
                old.close();
            }
        }

        let client = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                client.on_peer_event(epoch, event).await;
            }
        });
        Ok(pc)
    }

    async fn acquire_media(&self, epoch: u64, pc: &PeerRef) -> Result<(), CallError> {
        let stream = self.inner.media.user_media(MediaConstraints::default()).await?;
        {
            let mut s = self.inner.session.lock().await;
            if !s.is_current(epoch) {
                drop(s);
                stream.stop();
                return Err(CallError::Cancelled);
            }
            if let Some(old) = s.local_stream.replace(stream.clone()) {
                old.stop();
            }
        }
        pc.add_stream(&stream)
    }

    /// Sets the remote description and then applies queued candidates in arrival order.
    /// With `remote == None` the queued offer is used.
    async fn apply_remote_description(
        &self,
        epoch: u64,
        remote: Option<&SessionDescription>,
    ) -> Result<(), CallError> {
        let mut s = self.inner.session.lock().await;
        if !s.is_current(epoch) {
            return Err(CallError::Cancelled);
        }
        let pc = s.peer.clone().ok_or_else(|| CallError::Negotiation("no peer connection".into()))?;

        let mut description = remote.cloned();
        let mut candidates = Vec::new();
        for signal in s.queue.drain() {
            match signal {
                PendingSignal::Offer(offer) if description.is_none() => description = Some(offer),
                PendingSignal::Offer(_) => debug!("[rtc] superseded offer skipped"),
                PendingSignal::IceCandidate(c) => candidates.push(c),
            }
        }
        let description = description
            .ok_or_else(|| CallError::Negotiation("no remote description".into()))?;

        pc.set_remote_description(&description).await?;
        s.remote_description_set = true;

        if !candidates.is_empty() {
            debug!("[ice] applying {} queued candidates", candidates.len());
        }
        for candidate in &candidates {
            if let Err(e) = pc.add_ice_candidate(candidate).await {
                warn!("[ice] queued candidate rejected: {e}");
            }
        }
        Ok(())
    }

    async fn on_peer_event(&self, epoch: u64, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let target = {
                    let s = self.inner.session.lock().await;
                    if s.epoch == epoch { s.other_user_id.clone() } else { None }
                };
                let Some(callee_id) = target else {
                    debug!("[ice] local candidate after teardown dropped");
                    return;
                };
                let rtc_message = match serde_json::to_value(&candidate) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("[ice] could not encode candidate: {e}");
                        return;
                    }
                };
                let sent = self.inner.transport
                    .send(ClientEvent::IceCandidate(IceCandidatePayload { callee_id, rtc_message }))
                    .await;
                if let Err(e) = sent {
                    warn!("[ice] sending candidate failed: {e}");
                }
            }
            PeerEvent::RemoteStream(stream) => {
                let mut s = self.inner.session.lock().await;
                if s.is_current(epoch) {
                    debug!("[rtc] remote stream {}", stream.id());
                    s.remote_stream = Some(stream);
                }
            }
        }
    }

    // ── Ring timeout ──────────────────────────────────────────────────────────

    fn arm_ring_timer(&self, s: &mut CallSession, epoch: u64) {
        let Some(timeout) = self.inner.ring_timeout else { return };
        s.cancel_ring_timer();
        let client = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            client.on_ring_timeout(epoch).await;
        });
        s.ring_timer = Some(handle.abort_handle());
    }

    async fn on_ring_timeout(&self, epoch: u64) {
        {
            let mut s = self.inner.session.lock().await;
            if !s.is_current(epoch) || !matches!(s.state, CallState::Calling | CallState::Ringing) {
                return;
            }
            // this task is the timer; dropping the handle does not abort it
            s.ring_timer = None;
            info!("[call] no answer in room {}, hanging up", s.room_id.as_deref().unwrap_or("?"));
        }
        self.teardown_if_current(epoch, Origin::Local).await;
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    async fn teardown(&self, origin: Origin) -> bool {
        self.teardown_matching(None, origin).await
    }

    async fn teardown_if_current(&self, epoch: u64, origin: Origin) -> bool {
        self.teardown_matching(Some(epoch), origin).await
    }

    /// Runs at most once per call; later or concurrent requests are no-ops.
    async fn teardown_matching(&self, epoch: Option<u64>, origin: Origin) -> bool {
        let released = {
            let mut s = self.inner.session.lock().await;
            if !s.call_active || s.leave_in_flight {
                return false;
            }
            if epoch.is_some_and(|e| e != s.epoch) {
                return false;
            }
            s.release()
        };

        if let Some(stream) = &released.local_stream {
            stream.stop();
        }
        if let Some(pc) = &released.peer {
            pc.stop_transceivers();
            pc.close();
        }
        self.inner.telephony.end_all_calls();
        drop(released.remote_stream);

        if let Err(e) = self.inner.store.clear().await {
            warn!("[call] could not clear pending call: {e}");
        }

        if origin == Origin::Local {
            if let Some(other) = &released.other_user_id {
                let sent = self.inner.transport.send(ClientEvent::EndCall(EndCallPayload {
                    callee_id: other.clone(),
                    room_id:   released.room_id.clone(),
                })).await;
                if let Err(e) = sent {
                    warn!("[call] could not notify '{other}' of hangup: {e}");
                }
            }
        }

        self.inner.ui.show_idle();

        {
            let mut s = self.inner.session.lock().await;
            s.state = CallState::Idle;
            s.leave_in_flight = false;
        }
        info!(
            "[call] call ended ({origin:?}) room {}",
            released.room_id.as_deref().unwrap_or("?"),
        );
        true
    }
}
