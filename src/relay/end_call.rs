// src/relay/end_call.rs
// Either side hangs up; both ends are told.

use tracing::info;

use super::Relay;
use crate::types::{CallEndedPayload, EndCallPayload, ServerEvent};

impl Relay {
    pub(super) async fn on_end_call(&self, sender: &str, payload: EndCallPayload) {
        let EndCallPayload { callee_id, room_id } = payload;
        let room = room_id.clone().unwrap_or_else(|| "?".into());
        info!("[☎] ending call between '{sender}' and '{callee_id}' (room {room})");

        let ended = ServerEvent::CallEnded(CallEndedPayload { room_id });

        // Resolve both ends first, then broadcast to whichever is still connected.
        let callee = self.registry.lookup(&callee_id).await;
        let caller = self.registry.lookup(sender).await;

        let mut targets: Vec<_> = [callee, caller].into_iter().flatten().map(|e| e.transport).collect();
        targets.dedup();
        for transport in &targets {
            self.outbound.deliver(transport, &ended).await;
        }
    }
}
