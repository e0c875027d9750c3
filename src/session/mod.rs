//! Session tracking
//!
//! Maps a session id to its message count so a client reconnecting with the
//! same id resumes counting where it left off. Sessions are process-local.

mod factory;
mod memory;
mod traits;
mod types;

pub use factory::create_session_store;
pub use memory::MemorySessionStore;
pub use traits::SessionStore;
pub use types::{ResolvedSession, Session, SessionOrigin, SessionStoreBackend, SessionStoreError};
