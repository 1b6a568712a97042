// src/client/media.rs
// Media and peer-connection seams.
//
// The session drives negotiation only through these traits; the platform's WebRTC
// stack implements them.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    error::CallError,
    types::{IceCandidate, IceServer, SessionDescription},
};

/// A captured or received audio/video stream.
pub trait MediaStream: Send + Sync {
    fn id(&self) -> &str;
    /// Stops every track of the stream.
    fn stop(&self);
}

pub type StreamRef = Arc<dyn MediaStream>;

impl fmt::Debug for dyn MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream").field("id", &self.id()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self { audio: true, video: true }
    }
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Camera/microphone capture. Fails with [`CallError::Media`] when unavailable.
    async fn user_media(&self, constraints: MediaConstraints) -> Result<StreamRef, CallError>;
}

/// Raised by a peer connection while it runs.
#[derive(Debug)]
pub enum PeerEvent {
    /// Locally gathered candidate, to be sent to the other side right away.
    LocalCandidate(IceCandidate),
    RemoteStream(StreamRef),
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn add_stream(&self, stream: &StreamRef) -> Result<(), CallError>;
    async fn create_offer(&self) -> Result<SessionDescription, CallError>;
    async fn create_answer(&self) -> Result<SessionDescription, CallError>;
    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), CallError>;
    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), CallError>;
    /// Only valid once a remote description is set.
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), CallError>;
    fn stop_transceivers(&self);
    fn close(&self);
}

pub type PeerRef = Arc<dyn PeerConnection>;

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, ice_servers: &[IceServer], events: PeerEventSender) -> Result<PeerRef, CallError>;
}
