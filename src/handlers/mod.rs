// src/handlers/mod.rs
// socket.io edge of the relay.

pub mod connect;    // Handshake: identity check, registration, event wiring
pub mod signal;     // call / answerCall / ICEcandidate / endCall, one dispatcher per socket
pub mod disconnect; // Presence cleanup

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use socketioxide::{extract::SocketRef, SocketIo};
use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::{
    relay::{Outbound, Relay},
    types::{ServerEvent, TransportId, UserId},
};

/// Cloneable application state injected into every socket.io handler.
#[derive(Clone)]
pub struct AppState {
    pub relay:   Arc<Relay>,
    pub sockets: Arc<SocketRegistry>,
}

/// Mounts the signaling namespace.
pub fn mount(io: &SocketIo) {
    io.ns("/", connect::on_connect);
}

pub(crate) fn transport_of(socket: &SocketRef) -> TransportId {
    TransportId::new(socket.id.to_string())
}

// ── Live sockets ──────────────────────────────────────────────────────────────

/// The emitting half of an open connection.
pub trait EventSink: Clone + Send + Sync + 'static {
    fn emit_event(&self, name: &'static str, payload: &Value) -> Result<(), String>;
}

impl EventSink for SocketRef {
    fn emit_event(&self, name: &'static str, payload: &Value) -> Result<(), String> {
        self.emit(name, payload).map_err(|e| e.to_string())
    }
}

struct Connection<S> {
    user_id: UserId,
    sink:    S,
}

/// Open sockets by transport id, with the identity each one presented at connect.
/// Also the relay's [`Outbound`] sink.
pub struct SocketRegistry<S = SocketRef> {
    sockets: RwLock<HashMap<TransportId, Connection<S>>>,
}

impl<S: EventSink> Default for SocketRegistry<S> {
    fn default() -> Self {
        Self { sockets: RwLock::new(HashMap::new()) }
    }
}

impl<S: EventSink> SocketRegistry<S> {
    pub fn new() -> Self { Self::default() }

    pub async fn attach(&self, transport: TransportId, user_id: UserId, sink: S) {
        self.sockets.write().await.insert(transport, Connection { user_id, sink });
    }

    pub async fn detach(&self, transport: &TransportId) -> Option<UserId> {
        self.sockets.write().await.remove(transport).map(|c| c.user_id)
    }

    pub async fn len(&self) -> usize { self.sockets.read().await.len() }

    pub async fn is_empty(&self) -> bool { self.sockets.read().await.is_empty() }
}

#[async_trait]
impl<S: EventSink> Outbound for SocketRegistry<S> {
    async fn deliver(&self, transport: &TransportId, event: &ServerEvent) -> bool {
        let sink = {
            let map = self.sockets.read().await;
            match map.get(transport) {
                Some(c) => c.sink.clone(),
                None => return false,
            }
        };

        let payload = match event.payload() {
            Ok(p) => p,
            Err(e) => {
                error!("[!] cannot encode {}: {e}", event.name());
                return false;
            }
        };

        match sink.emit_event(event.name(), &payload) {
            Ok(()) => true,
            Err(e) => {
                warn!("[!] emit {} to {transport} failed: {e}", event.name());
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records what would have been emitted on the socket.
    #[derive(Clone, Default)]
    pub(crate) struct CapturedSink {
        pub(crate) emitted: Arc<Mutex<Vec<(String, Value)>>>,
        pub(crate) closed:  bool,
    }

    impl EventSink for CapturedSink {
        fn emit_event(&self, name: &'static str, payload: &Value) -> Result<(), String> {
            if self.closed {
                return Err("socket closed".into());
            }
            self.emitted.lock().unwrap().push((name.to_owned(), payload.clone()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_to_attached_sockets_only() {
        let sockets = SocketRegistry::<CapturedSink>::new();
        let sink = CapturedSink::default();
        sockets.attach(TransportId::new("s1"), "u1".into(), sink.clone()).await;
        sockets.attach(TransportId::new("s2"), "u2".into(), CapturedSink { closed: true, ..Default::default() }).await;
        let ended = ServerEvent::CallEnded(crate::types::CallEndedPayload { room_id: Some("r1".into()) });

        assert!(sockets.deliver(&TransportId::new("s1"), &ended).await);
        assert!(!sockets.deliver(&TransportId::new("s2"), &ended).await);
        assert!(!sockets.deliver(&TransportId::new("s9"), &ended).await);
        assert_eq!(sink.emitted.lock().unwrap().clone(), vec![
            ("callEnded".to_owned(), serde_json::json!({ "roomId": "r1" })),
        ]);

        assert_eq!(sockets.detach(&TransportId::new("s1")).await.as_deref(), Some("u1"));
        assert!(!sockets.deliver(&TransportId::new("s1"), &ended).await);
        assert_eq!(sockets.len().await, 1);
    }
}
