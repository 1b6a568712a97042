// tests/common/mod.rs
// Recording fakes shared by the integration tests.
#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Notify;

use consult_call::{
    client::{
        media::{
            MediaConstraints, MediaDevices, MediaStream, PeerConnection, PeerConnectionFactory,
            PeerEvent, PeerEventSender, PeerRef, StreamRef,
        },
        storage::MemoryPendingCallStore,
        telephony::NativeTelephony,
        transport::SignalingTransport,
        CallClient, CallUi,
    },
    config::ClientConfig,
    error::{CallError, PushError},
    fcm::PushNotifier,
    relay::Outbound,
    types::{ClientEvent, IceCandidate, IceServer, SdpKind, ServerEvent, SessionDescription, TransportId},
};

pub fn offer(sdp: &str) -> SessionDescription { SessionDescription::offer(sdp) }
pub fn answer(sdp: &str) -> SessionDescription { SessionDescription::answer(sdp) }

pub fn candidate(n: u16) -> IceCandidate {
    IceCandidate {
        candidate:        format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid:          Some("0".into()),
        sdp_m_line_index: Some(0),
    }
}

/// Polls `check` until it holds, yielding to other tasks in between.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

// ── Media ─────────────────────────────────────────────────────────────────────

pub struct FakeStream {
    id:    String,
    stops: AtomicUsize,
}

impl FakeStream {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { id: id.into(), stops: AtomicUsize::new(0) })
    }
    pub fn stops(&self) -> usize { self.stops.load(Ordering::SeqCst) }
}

impl MediaStream for FakeStream {
    fn id(&self) -> &str { &self.id }
    fn stop(&self) { self.stops.fetch_add(1, Ordering::SeqCst); }
}

#[derive(Default)]
pub struct FakeDevices {
    pub fail:    AtomicBool,
    /// When set, capture blocks until `release` is notified.
    pub gated:   AtomicBool,
    pub entered: Notify,
    pub release: Notify,
    streams:     Mutex<Vec<Arc<FakeStream>>>,
}

impl FakeDevices {
    pub fn streams(&self) -> Vec<Arc<FakeStream>> { self.streams.lock().unwrap().clone() }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn user_media(&self, _constraints: MediaConstraints) -> Result<StreamRef, CallError> {
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallError::Media("permission denied".into()));
        }
        let mut streams = self.streams.lock().unwrap();
        let stream = FakeStream::new(format!("local-{}", streams.len()));
        streams.push(stream.clone());
        Ok(stream)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerOp {
    AddStream(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SessionDescription),
    AddCandidate(String),
    StopTransceivers,
    Close,
}

pub struct FakePeer {
    pub events:  PeerEventSender,
    ops:         Mutex<Vec<PeerOp>>,
    remote_set:  AtomicBool,
    fail_remote: bool,
}

impl FakePeer {
    pub fn ops(&self) -> Vec<PeerOp> { self.ops.lock().unwrap().clone() }

    pub fn count(&self, op: &PeerOp) -> usize {
        self.ops.lock().unwrap().iter().filter(|o| *o == op).count()
    }

    pub fn candidates(&self) -> Vec<String> {
        self.ops.lock().unwrap().iter().filter_map(|o| match o {
            PeerOp::AddCandidate(c) => Some(c.clone()),
            _ => None,
        }).collect()
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, op: PeerOp) { self.ops.lock().unwrap().push(op); }
}

#[async_trait]
impl PeerConnection for FakePeer {
    fn add_stream(&self, stream: &StreamRef) -> Result<(), CallError> {
        self.record(PeerOp::AddStream(stream.id().to_owned()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        self.record(PeerOp::CreateOffer);
        Ok(offer("v=0 offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        self.record(PeerOp::CreateAnswer);
        Ok(answer("v=0 answer"))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        self.record(PeerOp::SetLocal(desc.kind));
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), CallError> {
        if self.fail_remote {
            return Err(CallError::Negotiation("bad sdp".into()));
        }
        self.record(PeerOp::SetRemote(desc.clone()));
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), CallError> {
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(CallError::Negotiation("candidate before remote description".into()));
        }
        self.record(PeerOp::AddCandidate(candidate.candidate.clone()));
        Ok(())
    }

    fn stop_transceivers(&self) { self.record(PeerOp::StopTransceivers); }

    fn close(&self) { self.record(PeerOp::Close); }
}

#[derive(Default)]
pub struct FakePeerFactory {
    pub fail_remote: AtomicBool,
    peers:           Mutex<Vec<Arc<FakePeer>>>,
    ice_servers:     Mutex<Vec<IceServer>>,
}

impl FakePeerFactory {
    pub fn peers(&self) -> Vec<Arc<FakePeer>> { self.peers.lock().unwrap().clone() }

    pub fn last(&self) -> Arc<FakePeer> {
        self.peers.lock().unwrap().last().cloned().expect("no peer connection created")
    }

    pub fn ice_servers(&self) -> Vec<IceServer> { self.ice_servers.lock().unwrap().clone() }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(&self, ice_servers: &[IceServer], events: PeerEventSender) -> Result<PeerRef, CallError> {
        *self.ice_servers.lock().unwrap() = ice_servers.to_vec();
        let peer = Arc::new(FakePeer {
            events,
            ops:         Mutex::new(Vec::new()),
            remote_set:  AtomicBool::new(false),
            fail_remote: self.fail_remote.load(Ordering::SeqCst),
        });
        self.peers.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

// ── Signaling ─────────────────────────────────────────────────────────────────

/// Records every outgoing event, optionally forwarding it to a real transport.
#[derive(Default)]
pub struct RecordingTransport {
    pub fail: AtomicBool,
    sent:     Mutex<Vec<ClientEvent>>,
    forward:  Option<Arc<dyn SignalingTransport>>,
}

impl RecordingTransport {
    pub fn forwarding(inner: Arc<dyn SignalingTransport>) -> Self {
        Self { forward: Some(inner), ..Self::default() }
    }

    pub fn sent(&self) -> Vec<ClientEvent> { self.sent.lock().unwrap().clone() }

    pub fn sent_named(&self, name: &str) -> Vec<ClientEvent> {
        self.sent().into_iter().filter(|e| e.name() == name).collect()
    }
}

#[async_trait]
impl SignalingTransport for RecordingTransport {
    async fn send(&self, event: ClientEvent) -> Result<(), CallError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallError::NotConnected);
        }
        self.sent.lock().unwrap().push(event.clone());
        if let Some(inner) = &self.forward {
            inner.send(event).await?;
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(inner) = &self.forward {
            inner.disconnect().await;
        }
    }
}

// ── Platform ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingTelephony {
    pub displayed:  Mutex<Vec<(String, String)>>,
    pub end_all:    AtomicUsize,
    pub foreground: AtomicUsize,
}

impl NativeTelephony for RecordingTelephony {
    fn display_incoming_call(&self, room_id: &str, caller_label: &str) {
        self.displayed.lock().unwrap().push((room_id.to_owned(), caller_label.to_owned()));
    }
    fn end_all_calls(&self) { self.end_all.fetch_add(1, Ordering::SeqCst); }
    fn back_to_foreground(&self) { self.foreground.fetch_add(1, Ordering::SeqCst); }
}

#[derive(Default)]
pub struct RecordingUi {
    pub incoming: Mutex<Vec<(String, String)>>,
    pub in_call:  Mutex<Vec<(String, String)>>,
    pub idle:     AtomicUsize,
    pub failures: Mutex<Vec<String>>,
}

impl CallUi for RecordingUi {
    fn show_incoming_call(&self, caller_id: &str, room_id: &str) {
        self.incoming.lock().unwrap().push((caller_id.to_owned(), room_id.to_owned()));
    }
    fn show_in_call(&self, other_user_id: &str, room_id: &str) {
        self.in_call.lock().unwrap().push((other_user_id.to_owned(), room_id.to_owned()));
    }
    fn show_idle(&self) { self.idle.fetch_add(1, Ordering::SeqCst); }
    fn call_failed(&self, error: &CallError) {
        self.failures.lock().unwrap().push(error.to_string());
    }
}

// ── Client harness ────────────────────────────────────────────────────────────

pub struct Harness {
    pub client:    CallClient,
    pub transport: Arc<RecordingTransport>,
    pub devices:   Arc<FakeDevices>,
    pub peers:     Arc<FakePeerFactory>,
    pub telephony: Arc<RecordingTelephony>,
    pub ui:        Arc<RecordingUi>,
    pub store:     Arc<MemoryPendingCallStore>,
}

pub fn config(user_id: &str) -> ClientConfig {
    ClientConfig::new("http://127.0.0.1:8000", user_id).with_ring_timeout(None)
}

pub fn harness(user_id: &str) -> Harness {
    harness_with(config(user_id), RecordingTransport::default())
}

pub fn harness_with(config: ClientConfig, transport: RecordingTransport) -> Harness {
    let transport = Arc::new(transport);
    let devices = Arc::new(FakeDevices::default());
    let peers = Arc::new(FakePeerFactory::default());
    let telephony = Arc::new(RecordingTelephony::default());
    let ui = Arc::new(RecordingUi::default());
    let store = Arc::new(MemoryPendingCallStore::new());

    let client = CallClient::builder(config)
        .transport(transport.clone())
        .media_devices(devices.clone())
        .peer_factory(peers.clone())
        .telephony(telephony.clone())
        .pending_store(store.clone())
        .ui(ui.clone())
        .build()
        .expect("complete client");

    Harness { client, transport, devices, peers, telephony, ui, store }
}

// ── Relay side ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingOutbound {
    delivered: Mutex<Vec<(TransportId, ServerEvent)>>,
    closed:    Mutex<HashSet<TransportId>>,
}

impl RecordingOutbound {
    pub fn delivered(&self) -> Vec<(TransportId, ServerEvent)> { self.delivered.lock().unwrap().clone() }

    pub fn to(&self, transport: &str) -> Vec<ServerEvent> {
        self.delivered().into_iter()
            .filter(|(t, _)| t.as_str() == transport)
            .map(|(_, e)| e)
            .collect()
    }

    pub fn close(&self, transport: &str) {
        self.closed.lock().unwrap().insert(TransportId::new(transport));
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn deliver(&self, transport: &TransportId, event: &ServerEvent) -> bool {
        if self.closed.lock().unwrap().contains(transport) {
            return false;
        }
        self.delivered.lock().unwrap().push((transport.clone(), event.clone()));
        true
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub reject_tokens: AtomicBool,
    pub fail:          AtomicBool,
    sent:              Mutex<Vec<(String, Map<String, Value>)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, Map<String, Value>)> { self.sent.lock().unwrap().clone() }
}

#[async_trait]
impl PushNotifier for RecordingNotifier {
    async fn notify(&self, push_token: &str, data: &Map<String, Value>) -> Result<(), PushError> {
        self.sent.lock().unwrap().push((push_token.to_owned(), data.clone()));
        if self.reject_tokens.load(Ordering::SeqCst) {
            return Err(PushError::TokenRejected { status: 404 });
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PushError::Rejected { status: 500, body: "backend error".into() });
        }
        Ok(())
    }
}
