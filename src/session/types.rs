//! Session types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Logical client identity, surviving reconnects within one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// How `get_or_create` resolved the requested id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// No id supplied, a fresh one was generated
    Generated,
    /// Unknown id supplied by the client, seeded at zero
    Provided,
    /// Known id, stored count carried over
    Resumed,
}

impl SessionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOrigin::Generated => "generated",
            SessionOrigin::Provided => "provided",
            SessionOrigin::Resumed => "resumed",
        }
    }
}

/// Result of resolving a session for a new connection
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub session: Session,
    pub origin: SessionOrigin,
}

/// Backend type for session store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStoreBackend {
    /// Process-local map
    Memory,
}

/// Error type for session store operations
#[derive(Debug, Clone, Error)]
pub enum SessionStoreError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session store unavailable: {0}")]
    Unavailable(String),
}
