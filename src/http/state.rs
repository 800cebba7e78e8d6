use crate::session::SessionManager;
use crate::store::KnowledgeStore;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Session lifecycle coordinator
    pub manager: Arc<SessionManager>,

    /// Durable session and knowledge storage
    pub store: Arc<KnowledgeStore>,

    /// Service name reported by the health endpoint
    pub service_name: String,
}

impl AppState {
    pub fn new(
        manager: Arc<SessionManager>,
        store: Arc<KnowledgeStore>,
        service_name: String,
    ) -> Self {
        Self {
            manager,
            store,
            service_name,
        }
    }
}
