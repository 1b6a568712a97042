// src/lib.rs
// Call signaling: a socket.io relay that routes offers, answers, ICE candidates and
// hangups between connected users (with push fallback), and the client-side call
// session that drives one peer-to-peer call at a time.

pub mod client;
pub mod config;
pub mod error;
pub mod fcm;
pub mod handlers;
pub mod registry;
pub mod relay;
pub mod types;
