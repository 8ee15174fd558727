use std::sync::Arc;
use std::time::Instant;

use courier_store::Database;

use crate::auth::AuthService;
use crate::config::ServerConfig;
use crate::directory::Directory;
use crate::error::ServiceError;
use crate::rate_limit::RateLimiter;
use crate::registry::Registry;
use crate::router::MessageRouter;
use crate::store::Store;

/// Services shared by every connection task and the HTTP API.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub auth: Arc<AuthService>,
    pub directory: Directory,
    pub router: MessageRouter,
    pub registry: Registry,
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, db: Database) -> Result<Self, ServiceError> {
        let store = Store::new(db);
        let directory = Directory::new(store.clone());
        Ok(Self {
            auth: Arc::new(AuthService::new(store.clone(), &config)?),
            router: MessageRouter::new(store, directory.clone()),
            directory,
            registry: Registry::new(),
            rate_limiter: RateLimiter::from_config(&config),
            started_at: Instant::now(),
            config: Arc::new(config),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use courier_store::Database;

    use super::AppState;
    use crate::config::ServerConfig;

    /// Application state over a throwaway database. Keep the guard alive.
    pub fn temp_state(config: ServerConfig) -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("server.db")).unwrap();
        (dir, AppState::new(config, db).unwrap())
    }
}
