// src/config.rs
// Environment-driven configuration for the server and the client session.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::{error::ConfigError, types::{ConnectQuery, IceServer, UserId}};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
/// Seconds before an unanswered invite is hung up locally.
pub const RING_TIMEOUT_SEC: u64 = 30;

// ── Server ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr:       SocketAddr,
    /// Service-account JSON for FCM. Push is disabled without it.
    pub service_account: Option<PathBuf>,
    pub fcm_project_id:  Option<String>,
}

impl ServerConfig {
    /// Reads `BIND_ADDR`, `GOOGLE_APPLICATION_CREDENTIALS` and `FCM_PROJECT_ID`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_addr = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned());
        let bind_addr = raw_addr.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            key:    "BIND_ADDR",
            reason: format!("{raw_addr}: {e}"),
        })?;

        Ok(Self {
            bind_addr,
            service_account: get("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            fcm_project_id:  get("FCM_PROJECT_ID"),
        })
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Signaling server base URL, e.g. `http://10.0.2.2:8000`.
    pub server_url:   String,
    pub user_id:      UserId,
    pub fcm_token:    Option<String>,
    pub ice_servers:  Vec<IceServer>,
    /// `None` lets an invite ring until someone hangs up.
    pub ring_timeout: Option<Duration>,
    /// Directory holding the pending-call marker.
    pub storage_dir:  PathBuf,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, user_id: impl Into<UserId>) -> Self {
        Self {
            server_url:   server_url.into(),
            user_id:      user_id.into(),
            fcm_token:    None,
            ice_servers:  IceServer::default_stun(),
            ring_timeout: Some(Duration::from_secs(RING_TIMEOUT_SEC)),
            storage_dir:  std::env::temp_dir(),
        }
    }

    pub fn with_fcm_token(mut self, token: impl Into<String>) -> Self {
        self.fcm_token = Some(token.into());
        self
    }

    pub fn with_ring_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ring_timeout = timeout;
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Identity presented when opening the signaling connection.
    pub fn connect_query(&self) -> ConnectQuery {
        ConnectQuery::new(self.user_id.clone(), self.fcm_token.clone())
    }
}
