// src/relay/ice.rs
// Trickle ICE, forwarded best effort.

use tracing::debug;

use super::Relay;
use crate::types::{IceCandidatePayload, RemoteCandidatePayload, ServerEvent};

impl Relay {
    pub(super) async fn on_ice_candidate(&self, sender: &str, payload: IceCandidatePayload) {
        let IceCandidatePayload { callee_id, rtc_message } = payload;

        let candidate = ServerEvent::IceCandidate(RemoteCandidatePayload { rtc_message });
        if !self.deliver_to_user(&callee_id, &candidate).await {
            debug!("[ice] candidate '{sender}' → '{callee_id}' dropped");
        }
    }
}
