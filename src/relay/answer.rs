// src/relay/answer.rs
// Callee accepted: hand the answer back to the caller.

use tracing::{debug, info};

use super::Relay;
use crate::types::{AnswerCallPayload, CallAnsweredPayload, ServerEvent};

impl Relay {
    pub(super) async fn on_answer_call(&self, callee_id: &str, payload: AnswerCallPayload) {
        let AnswerCallPayload { caller_id, rtc_message, room_id } = payload;

        let answered = ServerEvent::CallAnswered(CallAnsweredPayload { rtc_message, room_id });
        if self.deliver_to_user(&caller_id, &answered).await {
            info!("[✓] '{callee_id}' answered '{caller_id}'");
        } else {
            // Caller is gone; it times out on its own.
            debug!("[✓] answer from '{callee_id}' dropped, '{caller_id}' not connected");
        }
    }
}
