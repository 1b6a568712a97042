// src/registry.rs
// Presence registry: who is connected, on which transport, with which push token.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{TransportId, UserId};

/// One connected user. Replaced on reconnect, deleted on disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id:    UserId,
    pub transport:  TransportId,
    pub push_token: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    entries:     HashMap<UserId, PresenceEntry>,
    /// Push tokens outlive the transport so an offline user can still be woken up.
    push_tokens: HashMap<UserId, String>,
}

/// Ephemeral user → transport map. Nothing is persisted; clients re-register on reconnect.
/// Every mutation goes through one write lock.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    inner: RwLock<Inner>,
}

impl PresenceRegistry {
    pub fn new() -> Self { Self::default() }

    /// Upsert. Overwrites whatever transport was previously registered for `user_id`.
    pub async fn register(&self, user_id: &str, transport: TransportId, push_token: Option<String>) {
        let mut inner = self.inner.write().await;
        if let Some(token) = &push_token {
            inner.push_tokens.insert(user_id.to_owned(), token.clone());
        }
        let entry = PresenceEntry { user_id: user_id.to_owned(), transport, push_token };
        if let Some(prev) = inner.entries.insert(user_id.to_owned(), entry) {
            debug!("[registry] '{user_id}' replaced transport {}", prev.transport);
        }
    }

    pub async fn lookup(&self, user_id: &str) -> Option<PresenceEntry> {
        self.inner.read().await.entries.get(user_id).cloned()
    }

    /// Removes the entry only if it still belongs to `transport`.
    /// A late disconnect from a superseded transport leaves the newer entry alone.
    pub async fn remove(&self, user_id: &str, transport: &TransportId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.entries.get(user_id) {
            Some(entry) if &entry.transport == transport => {
                inner.entries.remove(user_id);
                true
            }
            Some(_) => {
                debug!("[registry] stale disconnect for '{user_id}' from {transport} ignored");
                false
            }
            None => false,
        }
    }

    /// Token of the live entry, falling back to the last token seen for this user.
    pub async fn push_token(&self, user_id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.entries.get(user_id)
            .and_then(|e| e.push_token.clone())
            .or_else(|| inner.push_tokens.get(user_id).cloned())
    }

    /// Drops a token the push service rejected permanently. Only that exact token is dropped.
    pub async fn forget_push_token(&self, user_id: &str, token: &str) {
        let mut inner = self.inner.write().await;
        if inner.push_tokens.get(user_id).map(String::as_str) == Some(token) {
            inner.push_tokens.remove(user_id);
        }
        if let Some(entry) = inner.entries.get_mut(user_id) {
            if entry.push_token.as_deref() == Some(token) {
                entry.push_token = None;
            }
        }
    }

    pub async fn online_count(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: &str) -> TransportId { TransportId::new(id) }

    #[tokio::test]
    async fn register_overwrites_previous_transport() {
        let reg = PresenceRegistry::new();
        reg.register("u1", t("s1"), None).await;
        reg.register("u1", t("s2"), Some("tok".into())).await;

        let entry = reg.lookup("u1").await.unwrap();
        assert_eq!(entry.transport, t("s2"));
        assert_eq!(entry.push_token.as_deref(), Some("tok"));
        assert_eq!(reg.online_count().await, 1);
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_evict_newer_entry() {
        let reg = PresenceRegistry::new();
        reg.register("u1", t("s1"), None).await;
        reg.register("u1", t("s2"), None).await;

        assert!(!reg.remove("u1", &t("s1")).await);
        assert_eq!(reg.lookup("u1").await.unwrap().transport, t("s2"));

        assert!(reg.remove("u1", &t("s2")).await);
        assert!(reg.lookup("u1").await.is_none());
    }

    #[tokio::test]
    async fn removed_entry_is_not_resurrected() {
        let reg = PresenceRegistry::new();
        reg.register("u1", t("s1"), None).await;
        reg.register("u1", t("s2"), None).await;
        reg.remove("u1", &t("s2")).await;
        reg.remove("u1", &t("s1")).await;

        assert!(reg.lookup("u1").await.is_none());
    }

    #[tokio::test]
    async fn push_token_survives_disconnect() {
        let reg = PresenceRegistry::new();
        reg.register("u2", t("s1"), Some("t2".into())).await;
        reg.remove("u2", &t("s1")).await;

        assert!(reg.lookup("u2").await.is_none());
        assert_eq!(reg.push_token("u2").await.as_deref(), Some("t2"));

        // reconnect without a token keeps the remembered one
        reg.register("u2", t("s2"), None).await;
        assert_eq!(reg.push_token("u2").await.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn forget_only_drops_matching_token() {
        let reg = PresenceRegistry::new();
        reg.register("u2", t("s1"), Some("new".into())).await;

        reg.forget_push_token("u2", "old").await;
        assert_eq!(reg.push_token("u2").await.as_deref(), Some("new"));

        reg.forget_push_token("u2", "new").await;
        assert_eq!(reg.push_token("u2").await, None);
    }

    #[tokio::test]
    async fn concurrent_registers_leave_one_entry() {
        let reg = std::sync::Arc::new(PresenceRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let reg = reg.clone();
            tasks.push(tokio::spawn(async move {
                reg.register("u1", TransportId::new(format!("s{i}")), None).await;
            }));
        }
        for task in tasks { task.await.unwrap(); }

        assert_eq!(reg.online_count().await, 1);
        assert!(reg.lookup("u1").await.is_some());
    }
}
