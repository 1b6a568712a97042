// src/client/telephony.rs
// Native telephony bridge: the system incoming-call UI.
//
// Outbound, the session issues three commands. Inbound, the platform reports the
// user's answer/decline as `TelephonyEvent`s which `spawn_bridge` funnels back into
// the session (see `CallClient::on_native_answer` / `on_native_end`).

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use super::session::CallClient;
use crate::types::RoomId;

pub const UNKNOWN_CALLER: &str = "Unknown Caller";

/// Commands the session issues to the platform call UI.
pub trait NativeTelephony: Send + Sync {
    fn display_incoming_call(&self, room_id: &str, caller_label: &str);
    fn end_all_calls(&self);
    fn back_to_foreground(&self);
}

/// What the platform reports back. Frameworks may deliver `Answer` more than once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyEvent {
    Answer(RoomId),
    End(RoomId),
}

/// For hosts without a system call UI.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTelephony;

impl NativeTelephony for NoTelephony {
    fn display_incoming_call(&self, room_id: &str, caller_label: &str) {
        debug!("[telephony] no native UI for {room_id} from {caller_label}");
    }
    fn end_all_calls(&self) {}
    fn back_to_foreground(&self) {}
}

/// Feeds platform events into the session one at a time.
pub fn spawn_bridge(client: CallClient, mut events: mpsc::UnboundedReceiver<TelephonyEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TelephonyEvent::Answer(room_id) => {
                    if let Err(e) = client.on_native_answer(&room_id).await {
                        debug!("[telephony] answer for {room_id} not taken: {e}");
                    }
                }
                TelephonyEvent::End(room_id) => client.on_native_end(&room_id).await,
            }
        }
    })
}
