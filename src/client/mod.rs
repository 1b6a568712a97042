// src/client/mod.rs
// Client-side call session: one live call per device, driven by signaling events,
// user actions and the native call UI.

pub mod media;
pub mod queue;
pub mod session;
pub mod storage;
pub mod telephony;
pub mod transport;

pub use session::{CallClient, CallClientBuilder, CallDirection, CallSnapshot, CallState};

use crate::error::CallError;

/// Whether the app can show its own screens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AppLifecycle {
    #[default]
    Foreground,
    /// Backgrounded or not running: incoming calls go through the native call UI.
    Background,
}

/// Screens the session navigates between.
pub trait CallUi: Send + Sync {
    fn show_incoming_call(&self, caller_id: &str, room_id: &str);
    fn show_in_call(&self, other_user_id: &str, room_id: &str);
    fn show_idle(&self);
    /// A transition was aborted. Never a structured error for the end user.
    fn call_failed(&self, error: &CallError);
}
