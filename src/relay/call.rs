// src/relay/call.rs
// Initial invite: real-time `newCall` plus push wake-up.

use tracing::{error, info, warn};

use super::Relay;
use crate::{
    error::PushError,
    types::{CallPayload, InviteMessage, NewCallPayload, ServerEvent},
};

impl Relay {
    pub(super) async fn on_call(&self, caller_id: &str, payload: CallPayload) {
        let CallPayload { callee_id, rtc_message, room_id } = payload;

        if callee_id == caller_id {
            warn!("[!] '{caller_id}' tried to call itself, ignored");
            return;
        }
        info!("[~] '{caller_id}' is calling '{callee_id}' (room {room_id})");

        // Real-time path. The callee de-duplicates by room id if the push lands too.
        let new_call = ServerEvent::NewCall(NewCallPayload {
            caller_id:   caller_id.to_owned(),
            rtc_message: rtc_message.clone(),
            room_id:     room_id.clone(),
        });
        if self.deliver_to_user(&callee_id, &new_call).await {
            info!("[→] newCall delivered to '{callee_id}'");
        }

        // Wake-up path, attempted whenever a token is on file.
        let Some(token) = self.registry.push_token(&callee_id).await else {
            return;
        };
        let invite = InviteMessage { caller_id: caller_id.to_owned(), room_id, offer: rtc_message };

        match self.notifier.notify(&token, &invite.to_push_data()).await {
            Ok(()) => info!("[fcm] invite pushed to '{callee_id}'"),
            Err(PushError::TokenRejected { status }) => {
                warn!("[fcm] token of '{callee_id}' rejected (HTTP {status}), forgetting it");
                self.registry.forget_push_token(&callee_id, &token).await;
            }
            Err(e) => error!("[fcm] push to '{callee_id}' failed: {e}"),
        }
    }
}
