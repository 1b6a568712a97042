// src/relay/mod.rs
// Signaling relay: routes call-control events between two registered peers.
//
// The relay never touches media. It resolves the target through the
// `PresenceRegistry`, delivers through an `Outbound` sink and, for the initial
// invite only, also wakes the callee through the `PushNotifier`.
//
// Delivery is best effort. A target that is not registered is a silent drop for
// answers, candidates and hangups; for `call` it only suppresses the real-time path.

mod answer;
mod call;
mod end_call;
mod ice;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    error::RelayError,
    fcm::PushNotifier,
    registry::PresenceRegistry,
    types::{ClientEvent, ConnectQuery, ServerEvent, TransportId, UserId},
};

/// Where the relay hands events for a specific connection.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Returns `false` when the transport is gone.
    async fn deliver(&self, transport: &TransportId, event: &ServerEvent) -> bool;
}

pub struct Relay {
    registry: Arc<PresenceRegistry>,
    notifier: Arc<dyn PushNotifier>,
    outbound: Arc<dyn Outbound>,
}

impl Relay {
    pub fn new(
        registry: Arc<PresenceRegistry>,
        notifier: Arc<dyn PushNotifier>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self { registry, notifier, outbound }
    }

    pub fn registry(&self) -> &Arc<PresenceRegistry> { &self.registry }

    /// Registers a freshly opened transport. Refused without a `callerId`.
    pub async fn connect(&self, transport: TransportId, query: &ConnectQuery) -> Result<UserId, RelayError> {
        let Some(user_id) = query.caller_id.clone() else {
            warn!("[!] connection {transport} without callerId refused");
            return Err(RelayError::MissingIdentity);
        };
        self.registry.register(&user_id, transport.clone(), query.fcm_token.clone()).await;
        info!("[+] '{user_id}' connected (transport {transport})");
        Ok(user_id)
    }

    /// Drops the presence entry owned by this transport. No hangup is synthesized.
    pub async fn disconnect(&self, transport: &TransportId, user_id: &str) {
        if self.registry.remove(user_id, transport).await {
            info!("[-] '{user_id}' disconnected (transport {transport})");
        } else {
            debug!("[-] '{user_id}' closed superseded transport {transport}");
        }
    }

    /// Handles one event from `sender`, who is connected on `transport`.
    /// Events of one connection are handled in arrival order by the caller.
    pub async fn handle(&self, transport: &TransportId, sender: &str, event: ClientEvent) {
        debug!("[~] {} from '{sender}' ({transport})", event.name());
        match event {
            ClientEvent::Call(p)         => self.on_call(sender, p).await,
            ClientEvent::AnswerCall(p)   => self.on_answer_call(sender, p).await,
            ClientEvent::IceCandidate(p) => self.on_ice_candidate(sender, p).await,
            ClientEvent::EndCall(p)      => self.on_end_call(sender, p).await,
        }
    }

    /// Delivers to the registered transport of `user_id`, if any.
    async fn deliver_to_user(&self, user_id: &str, event: &ServerEvent) -> bool {
        let Some(entry) = self.registry.lookup(user_id).await else {
            return false;
        };
        self.outbound.deliver(&entry.transport, event).await
    }
}
