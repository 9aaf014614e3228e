use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::{AuthSession, RoleReconciler, SessionLifetimes};
use crate::identity::IdentityProvider;

/// Live sessions keyed by session id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<AuthSession>>>,
    provider: Arc<dyn IdentityProvider>,
    reconciler: Arc<RoleReconciler>,
    lifetimes: SessionLifetimes,
}

impl SessionRegistry {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        reconciler: Arc<RoleReconciler>,
        lifetimes: SessionLifetimes,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            provider,
            reconciler,
            lifetimes,
        }
    }

    /// Build a session that is not tracked by the registry.
    pub fn transient(&self) -> AuthSession {
        AuthSession::new(self.provider.clone(), self.reconciler.clone(), self.lifetimes)
    }

    /// Create and register a new session.
    pub async fn create(&self) -> Arc<AuthSession> {
        let session = Arc::new(self.transient());
        self.insert(session.clone()).await;
        session
    }

    /// Track a session built by [`SessionRegistry::transient`]. Inserting a
    /// session that is already tracked is a no-op.
    pub async fn insert(&self, session: Arc<AuthSession>) {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(session.id()) {
            tracing::debug!(session = %session.id(), "Session created");
            sessions.insert(session.id().to_string(), session);
        }
    }

    /// Look up a live session and mark it used. Expired sessions are
    /// dropped and reported as missing.
    pub async fn get(&self, id: &str) -> Option<Arc<AuthSession>> {
        let session = self.sessions.read().await.get(id).cloned()?;
        if session.is_expired(Utc::now()).await {
            self.remove(id).await;
            return None;
        }
        session.touch().await;
        Some(session)
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<AuthSession>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop expired sessions, returning their ids.
    pub async fn cleanup_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let snapshot: Vec<Arc<AuthSession>> = self.sessions.read().await.values().cloned().collect();

        let mut expired = vec![];
        for session in snapshot {
            if session.is_expired(now).await {
                expired.push(session.id().to_string());
            }
        }

        if !expired.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &expired {
                sessions.remove(id);
            }
            tracing::info!("Removed {} expired sessions", expired.len());
        }

        expired
    }

    /// Periodically sweep expired sessions.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.cleanup_expired().await;
            }
        })
    }
}
