//! Process-local session store

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::traits::SessionStore;
use super::types::{
    ResolvedSession, Session, SessionOrigin, SessionStoreBackend, SessionStoreError,
};

struct SessionEntry {
    session: Session,
    /// Connections currently driving this session
    live_handles: usize,
}

/// Session store kept in process memory.
///
/// Sessions live as long as the process; nothing is persisted.
pub struct MemorySessionStore {
    sessions: DashMap<String, SessionEntry>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Live connection count for a session (0 if unknown)
    pub fn live_handles(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map(|e| e.live_handles)
            .unwrap_or(0)
    }

    fn create_generated(&self) -> Session {
        loop {
            let id = Uuid::new_v4().to_string();
            if let Entry::Vacant(vacant) = self.sessions.entry(id.clone()) {
                let session = Session::new(id);
                vacant.insert(SessionEntry {
                    session: session.clone(),
                    live_handles: 1,
                });
                return session;
            }
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn backend_type(&self) -> SessionStoreBackend {
        SessionStoreBackend::Memory
    }

    async fn get_or_create(
        &self,
        session_id: Option<&str>,
    ) -> Result<ResolvedSession, SessionStoreError> {
        let Some(id) = session_id.filter(|id| !id.is_empty()) else {
            return Ok(ResolvedSession {
                session: self.create_generated(),
                origin: SessionOrigin::Generated,
            });
        };

        let (session, origin, live_handles) = match self.sessions.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.live_handles += 1;
                (entry.session.clone(), SessionOrigin::Resumed, entry.live_handles)
            }
            Entry::Vacant(vacant) => {
                let session = Session::new(id);
                vacant.insert(SessionEntry {
                    session: session.clone(),
                    live_handles: 1,
                });
                (session, SessionOrigin::Provided, 1)
            }
        };

        if live_handles > 1 {
            tracing::warn!(
                session_id = %id,
                live_connections = live_handles,
                "Session attached to more than one live connection"
            );
        }

        Ok(ResolvedSession { session, origin })
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError> {
        Ok(self.sessions.get(session_id).map(|e| e.session.clone()))
    }

    async fn update_count(&self, session_id: &str, count: u64) -> Result<(), SessionStoreError> {
        let live_handles = match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                entry.session.message_count = count;
                entry.live_handles
            }
            None => return Err(SessionStoreError::NotFound(session_id.to_string())),
        };

        if live_handles > 1 {
            tracing::warn!(
                session_id = %session_id,
                live_connections = live_handles,
                count = count,
                "Concurrent writes to the same session, last write wins"
            );
        }

        Ok(())
    }

    async fn release(&self, session_id: &str) -> Result<(), SessionStoreError> {
        match self.sessions.get_mut(session_id) {
            Some(mut entry) => {
                entry.live_handles = entry.live_handles.saturating_sub(1);
                Ok(())
            }
            None => Err(SessionStoreError::NotFound(session_id.to_string())),
        }
    }

    async fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_generates_id_when_absent() {
        let store = MemorySessionStore::new();

        let a = store.get_or_create(None).await.unwrap();
        let b = store.get_or_create(None).await.unwrap();

        assert_eq!(a.origin, SessionOrigin::Generated);
        assert_eq!(a.session.message_count, 0);
        assert_ne!(a.session.id, b.session.id);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_empty_id_counts_as_absent() {
        let store = MemorySessionStore::new();

        let resolved = store.get_or_create(Some("")).await.unwrap();

        assert_eq!(resolved.origin, SessionOrigin::Generated);
        assert!(!resolved.session.id.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_seeded_at_zero() {
        let store = MemorySessionStore::new();

        let resolved = store.get_or_create(Some("unknown-123")).await.unwrap();

        assert_eq!(resolved.origin, SessionOrigin::Provided);
        assert_eq!(resolved.session.id, "unknown-123");
        assert_eq!(resolved.session.message_count, 0);
    }

    #[tokio::test]
    async fn test_known_id_resumes_stored_count() {
        let store = MemorySessionStore::new();
        let first = assert_ok!(store.get_or_create(Some("abc")).await);
        assert_ok!(store.update_count("abc", 7).await);
        assert_ok!(store.release("abc").await);

        let resumed = store.get_or_create(Some("abc")).await.unwrap();

        assert_eq!(resumed.origin, SessionOrigin::Resumed);
        assert_eq!(resumed.session.message_count, 7);
        assert_eq!(resumed.session.created_at, first.session.created_at);
    }

    #[tokio::test]
    async fn test_update_unknown_session_fails() {
        let store = MemorySessionStore::new();
        let err = assert_err!(store.update_count("missing", 1).await);
        assert!(matches!(err, SessionStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_live_handle_tracking() {
        let store = MemorySessionStore::new();
        store.get_or_create(Some("shared")).await.unwrap();
        store.get_or_create(Some("shared")).await.unwrap();
        assert_eq!(store.live_handles("shared"), 2);

        assert_ok!(store.release("shared").await);
        assert_ok!(store.release("shared").await);
        // Releasing past zero is harmless
        assert_ok!(store.release("shared").await);
        assert_eq!(store.live_handles("shared"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_same_id_writes_do_not_corrupt() {
        let store = Arc::new(MemorySessionStore::new());
        store.get_or_create(Some("race")).await.unwrap();
        store.get_or_create(Some("race")).await.unwrap();

        let mut handles = Vec::new();
        for i in 1..=50u64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.update_count("race", i).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let session = store.get("race").await.unwrap().unwrap();
        assert!((1..=50).contains(&session.message_count));
        assert_eq!(store.len().await, 1);
    }
}
