// src/types.rs
// Wire payloads and event definitions shared by the relay and the client.

use std::collections::HashMap;

use axum::{extract::Query, http::Uri};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ProtocolError;

// ── Identifiers ───────────────────────────────────────────────────────────────

pub type UserId = String;
pub type RoomId = String;

/// Opaque id of one live signaling connection (the socket id on the server).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportId(String);

impl TransportId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for TransportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fresh correlation id for a new call.
pub fn new_room_id() -> RoomId {
    uuid::Uuid::new_v4().to_string()
}

// ── Negotiation payloads ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind { Offer, Answer, Pranswer, Rollback }

/// Session description as exchanged in `rtcMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp:  String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self  { Self { kind: SdpKind::Offer,  sdp: sdp.into() } }
    pub fn answer(sdp: impl Into<String>) -> Self { Self { kind: SdpKind::Answer, sdp: sdp.into() } }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate:        String,
    #[serde(default)]
    pub sdp_mid:          Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

/// STUN/TURN server handed to the peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls:       Vec<String>,
    #[serde(default)]
    pub username:   Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self { urls: vec![url.into()], username: None, credential: None }
    }

    /// Public Google STUN servers.
    pub fn default_stun() -> Vec<Self> {
        vec![
            Self::stun("stun:stun.l.google.com:19302"),
            Self::stun("stun:stun1.l.google.com:19302"),
            Self::stun("stun:stun2.l.google.com:19302"),
        ]
    }
}

// ── Inbound payloads (client → server) ───────────────────────────────────────
//
// `rtcMessage` stays an opaque JSON value on the relay; it is forwarded verbatim.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPayload {
    pub callee_id:   UserId,
    pub rtc_message: Value,
    pub room_id:     RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerCallPayload {
    pub caller_id:   UserId,
    pub rtc_message: Value,
    pub room_id:     RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub callee_id:   UserId,
    pub rtc_message: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCallPayload {
    pub callee_id: UserId,
    #[serde(default)]
    pub room_id:   Option<RoomId>,
}

// ── Outbound payloads (server → client) ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCallPayload {
    pub caller_id:   UserId,
    pub rtc_message: Value,
    pub room_id:     RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAnsweredPayload {
    pub rtc_message: Value,
    pub room_id:     RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCandidatePayload {
    pub rtc_message: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEndedPayload {
    #[serde(default)]
    pub room_id: Option<RoomId>,
}

// ── Event name constants ──────────────────────────────────────────────────────

pub mod event {
    // client → server
    pub const CALL:          &str = "call";
    pub const ANSWER_CALL:   &str = "answerCall";
    pub const ICE_CANDIDATE: &str = "ICEcandidate";
    pub const END_CALL:      &str = "endCall";

    // server → client
    pub const NEW_CALL:      &str = "newCall";
    pub const CALL_ANSWERED: &str = "callAnswered";
    pub const CALL_ENDED:    &str = "callEnded";
}

// ── Typed events ──────────────────────────────────────────────────────────────

/// Everything a client may send on its signaling connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Call(CallPayload),
    AnswerCall(AnswerCallPayload),
    IceCandidate(IceCandidatePayload),
    EndCall(EndCallPayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Call(_)         => event::CALL,
            ClientEvent::AnswerCall(_)   => event::ANSWER_CALL,
            ClientEvent::IceCandidate(_) => event::ICE_CANDIDATE,
            ClientEvent::EndCall(_)      => event::END_CALL,
        }
    }

    pub fn payload(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            ClientEvent::Call(p)         => serde_json::to_value(p)?,
            ClientEvent::AnswerCall(p)   => serde_json::to_value(p)?,
            ClientEvent::IceCandidate(p) => serde_json::to_value(p)?,
            ClientEvent::EndCall(p)      => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    pub fn from_parts(name: &str, data: Value) -> Result<Self, ProtocolError> {
        Ok(match name {
            event::CALL          => ClientEvent::Call(serde_json::from_value(data)?),
            event::ANSWER_CALL   => ClientEvent::AnswerCall(serde_json::from_value(data)?),
            event::ICE_CANDIDATE => ClientEvent::IceCandidate(serde_json::from_value(data)?),
            event::END_CALL      => ClientEvent::EndCall(serde_json::from_value(data)?),
            other => return Err(ProtocolError::UnknownEvent(other.to_owned())),
        })
    }
}

/// Everything the relay may deliver to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    NewCall(NewCallPayload),
    CallAnswered(CallAnsweredPayload),
    IceCandidate(RemoteCandidatePayload),
    CallEnded(CallEndedPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewCall(_)      => event::NEW_CALL,
            ServerEvent::CallAnswered(_) => event::CALL_ANSWERED,
            ServerEvent::IceCandidate(_) => event::ICE_CANDIDATE,
            ServerEvent::CallEnded(_)    => event::CALL_ENDED,
        }
    }

    pub fn payload(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            ServerEvent::NewCall(p)      => serde_json::to_value(p)?,
            ServerEvent::CallAnswered(p) => serde_json::to_value(p)?,
            ServerEvent::IceCandidate(p) => serde_json::to_value(p)?,
            ServerEvent::CallEnded(p)    => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    pub fn from_parts(name: &str, data: Value) -> Result<Self, ProtocolError> {
        Ok(match name {
            event::NEW_CALL      => ServerEvent::NewCall(serde_json::from_value(data)?),
            event::CALL_ANSWERED => ServerEvent::CallAnswered(serde_json::from_value(data)?),
            event::ICE_CANDIDATE => ServerEvent::IceCandidate(serde_json::from_value(data)?),
            event::CALL_ENDED    => ServerEvent::CallEnded(serde_json::from_value(data)?),
            other => return Err(ProtocolError::UnknownEvent(other.to_owned())),
        })
    }
}

// ── Connect query ─────────────────────────────────────────────────────────────

/// Query parameters a client presents when opening its signaling connection.
/// Handshake query. Empty values count as absent; unrelated keys (`EIO`, `transport`) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    #[serde(default, deserialize_with = "non_empty")]
    pub caller_id: Option<UserId>,
    #[serde(default, deserialize_with = "non_empty")]
    pub fcm_token: Option<String>,
}

fn non_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

impl ConnectQuery {
    pub fn new(caller_id: impl Into<UserId>, fcm_token: Option<String>) -> Self {
        Self { caller_id: Some(caller_id.into()), fcm_token }
    }

    /// Reads the handshake query of a connect request. A malformed query yields no identity.
    pub fn from_uri(uri: &Uri) -> Self {
        match Query::<Self>::try_from_uri(uri) {
            Ok(Query(query)) => query,
            Err(e) => {
                debug!("[!] unreadable connect query: {e}");
                Self::default()
            }
        }
    }

    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(id) = &self.caller_id {
            parts.push(format!("callerId={}", urlencoding::encode(id)));
        }
        if let Some(token) = &self.fcm_token {
            parts.push(format!("fcmToken={}", urlencoding::encode(token)));
        }
        parts.join("&")
    }
}

// ── Push invite ───────────────────────────────────────────────────────────────

pub const INVITE_TYPE_CALL: &str = "call";

/// The invite carried by the push fallback. Not persisted beyond delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteMessage {
    pub caller_id: UserId,
    pub room_id:   RoomId,
    pub offer:     Value,
}

impl InviteMessage {
    /// Push data map as sent to the notifier; values are coerced to strings on send.
    pub fn to_push_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("title".into(), Value::from("Incoming Call"));
        data.insert("body".into(), Value::from(format!("You have a call from {}", self.caller_id)));
        data.insert("callerId".into(), Value::from(self.caller_id.clone()));
        data.insert("roomId".into(), Value::from(self.room_id.clone()));
        data.insert("type".into(), Value::from(INVITE_TYPE_CALL));
        data.insert("rtcMessage".into(), Value::from(self.offer.to_string()));
        data
    }

    /// Reverse of [`to_push_data`](Self::to_push_data) on the receiving device.
    /// Returns `None` for anything that is not a call invite.
    pub fn from_push_data(data: &HashMap<String, String>) -> Option<Self> {
        if data.get("type").map(String::as_str) != Some(INVITE_TYPE_CALL) {
            return None;
        }
        let caller_id = data.get("callerId").filter(|v| !v.is_empty())?.clone();
        let room_id   = data.get("roomId").filter(|v| !v.is_empty())?.clone();
        let offer     = serde_json::from_str(data.get("rtcMessage")?).ok()?;
        Some(Self { caller_id, room_id, offer })
    }
}
