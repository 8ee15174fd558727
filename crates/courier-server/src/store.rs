//! Async handle over the synchronous [`Database`].
//!
//! `rusqlite` is blocking, so every call runs on tokio's blocking pool while
//! holding the connection mutex. Connection tasks never touch SQLite on the
//! async workers.

use std::sync::{Arc, Mutex};

use courier_store::{Database, StoreError};

use crate::error::ServiceError;

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the database on the blocking pool.
    pub async fn call<F, T>(&self, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&mut Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|_| ServiceError::Internal("database mutex poisoned".into()))?;
            f(&mut guard).map_err(ServiceError::from)
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("store task failed: {e}")))?
    }
}

/// Run CPU-heavy work (password hashing) off the async workers.
pub async fn blocking<F, T>(f: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::Internal(format!("blocking task failed: {e}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Store;
    use courier_store::Database;

    /// A [`Store`] over a throwaway database. Keep the guard alive.
    pub fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("server.db")).unwrap();
        (dir, Store::new(db))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::temp_store;
    use super::*;

    #[tokio::test]
    async fn errors_are_mapped() {
        let (_dir, store) = temp_store();
        let user = store.call(|db| db.create_user("alice")).await.unwrap();

        let err = store
            .call(move |db| db.get_user(courier_shared::types::UserId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let found = store.call(move |db| db.get_user(user.id)).await.unwrap();
        assert_eq!(found.username, "alice");
    }
}
