// src/fcm.rs
// Push fallback: wake an unreachable callee through FCM.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::error::{ConfigError, PushError};

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// Fire-and-forget push delivery. Callers log failures and never retry.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn notify(&self, push_token: &str, data: &Map<String, Value>) -> Result<(), PushError>;
}

/// The push transport only accepts string values: strings pass through, everything else
/// is rendered as JSON text.
pub fn stringify_data(data: &Map<String, Value>) -> BTreeMap<String, String> {
    data.iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), s)
        })
        .collect()
}

// ── FCM HTTP v1 ───────────────────────────────────────────────────────────────

pub struct FcmNotifier {
    project_id: String,
    auth:       Arc<dyn TokenProvider>,
    http:       reqwest::Client,
}

impl FcmNotifier {
    pub fn new(project_id: impl Into<String>, auth: Arc<dyn TokenProvider>, http: reqwest::Client) -> Self {
        Self { project_id: project_id.into(), auth, http }
    }

    /// Loads a service-account key file. `project_id` overrides the id stored in the key.
    pub fn from_service_account(path: &Path, project_id: Option<String>) -> Result<Self, ConfigError> {
        let account = CustomServiceAccount::from_file(path)
            .map_err(|e| ConfigError::ServiceAccount(e.to_string()))?;
        let project_id = project_id
            .or_else(|| account.project_id().map(str::to_owned))
            .ok_or_else(|| ConfigError::ServiceAccount("no project id in service account".into()))?;

        Ok(Self::new(project_id, Arc::new(account), reqwest::Client::new()))
    }

    /// Startup probe: fetch one token so bad credentials show up in the log early.
    pub async fn check_credentials(&self) {
        match self.auth.token(&[FCM_SCOPE]).await {
            Ok(_)  => info!("[fcm] credentials OK for project '{}'", self.project_id),
            Err(e) => warn!("[fcm] startup credential check failed: {e}"),
        }
    }

    fn endpoint(&self) -> String {
        format!("https://fcm.googleapis.com/v1/projects/{}/messages:send", self.project_id)
    }

    async fn bearer(&self) -> Result<String, PushError> {
        self.auth.token(&[FCM_SCOPE]).await
            .map(|t| t.as_str().to_owned())
            .map_err(|e| PushError::Auth(e.to_string()))
    }
}

/// Data-only message at high priority so the device's call UI is woken promptly.
pub fn fcm_message(push_token: &str, data: &Map<String, Value>) -> Value {
    serde_json::json!({
        "message": {
            "token": push_token,
            "data":  stringify_data(data),
            "android": { "priority": "high" },
            "apns":    { "headers": { "apns-priority": "10" } },
        }
    })
}

#[async_trait]
impl PushNotifier for FcmNotifier {
    async fn notify(&self, push_token: &str, data: &Map<String, Value>) -> Result<(), PushError> {
        let bearer = self.bearer().await?;
        let body   = fcm_message(push_token, data);
        let suffix = push_token.get(push_token.len().saturating_sub(12)..).unwrap_or(push_token);

        let resp = self.http.post(self.endpoint()).bearer_auth(bearer).json(&body).send().await?;
        let status = resp.status();
        if status.is_success() {
            info!("[fcm] ✓ push sent to …{suffix}");
            return Ok(());
        }

        let status = status.as_u16();
        let text   = resp.text().await.unwrap_or_default();

        // 404 / UNREGISTERED: app uninstalled or storage cleared.
        // 403 + SENDER_ID_MISMATCH: token belongs to another Firebase project.
        if status == 404 || text.contains("UNREGISTERED")
            || (status == 403 && text.contains("SENDER_ID_MISMATCH"))
        {
            warn!("[fcm] ✗ dead token …{suffix} (HTTP {status})");
            return Err(PushError::TokenRejected { status });
        }

        error!("[fcm] ✗ HTTP {status}: {text}");
        Err(PushError::Rejected { status, body: text })
    }
}

// ── Disabled ──────────────────────────────────────────────────────────────────

/// Used when no service account is configured. Every send fails with `NotConfigured`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledNotifier;

#[async_trait]
impl PushNotifier for DisabledNotifier {
    async fn notify(&self, _push_token: &str, _data: &Map<String, Value>) -> Result<(), PushError> {
        Err(PushError::NotConfigured)
    }
}
