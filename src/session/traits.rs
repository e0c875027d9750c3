//! Session store trait definition

use async_trait::async_trait;

use super::types::{ResolvedSession, Session, SessionStoreBackend, SessionStoreError};

/// Storage for per-session message counts.
///
/// Every method must be safe to call concurrently from unrelated connection
/// tasks. Writes to one id are last-write-wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get the backend type
    fn backend_type(&self) -> SessionStoreBackend;

    /// Resolve the session for a new connection.
    ///
    /// `None` (or an empty id) generates a fresh id at count 0, a known id is
    /// returned unmodified, an unknown id is created at count 0. Marks the
    /// session as referenced by one more live connection.
    async fn get_or_create(
        &self,
        session_id: Option<&str>,
    ) -> Result<ResolvedSession, SessionStoreError>;

    /// Look up a session without touching it
    async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError>;

    /// Overwrite the stored message count
    async fn update_count(&self, session_id: &str, count: u64) -> Result<(), SessionStoreError>;

    /// Drop one live-connection reference taken by `get_or_create`
    async fn release(&self, session_id: &str) -> Result<(), SessionStoreError>;

    /// Number of sessions held
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
