//! Factory function for creating session stores

use std::sync::Arc;

use crate::config::SessionConfig;

use super::memory::MemorySessionStore;
use super::traits::SessionStore;

/// Create a session store based on configuration
pub fn create_session_store(config: &SessionConfig) -> Arc<dyn SessionStore> {
    match config.backend.as_str() {
        "memory" => {
            tracing::info!("Using in-memory session store");
        }
        other => {
            tracing::warn!(
                backend = %other,
                "Unknown session store backend, falling back to in-memory store"
            );
        }
    }
    Arc::new(MemorySessionStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStoreBackend;

    #[test]
    fn test_create_memory_session_store() {
        let store = create_session_store(&SessionConfig::default());
        assert_eq!(store.backend_type(), SessionStoreBackend::Memory);
    }

    #[test]
    fn test_unknown_backend_falls_back_to_memory() {
        let config = SessionConfig {
            backend: "etcd".to_string(),
        };
        let store = create_session_store(&config);
        assert_eq!(store.backend_type(), SessionStoreBackend::Memory);
    }
}
