//! Registration, login and session validation.
//!
//! Passwords are stored as Argon2id PHC strings. Login against an unknown
//! username still runs a full verification against a throwaway hash so both
//! failure paths cost the same.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::Utc;
use rand::RngCore;
use tracing::{debug, info};

use courier_shared::constants::{MAX_USERNAME_LEN, MIN_USERNAME_LEN};
use courier_shared::types::UserId;
use courier_store::Session;

use crate::config::ServerConfig;
use crate::error::{AuthError, ServiceError};
use crate::store::{blocking, Store};

pub struct AuthService {
    store: Store,
    params: Params,
    dummy_hash: String,
    session_ttl: Option<chrono::Duration>,
}

impl AuthService {
    pub fn new(store: Store, config: &ServerConfig) -> Result<Self, ServiceError> {
        let params = Params::new(config.argon2_memory_kib, config.argon2_iterations, 1, None)
            .map_err(|e| ServiceError::Internal(format!("invalid argon2 parameters: {e}")))?;

        let mut throwaway = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut throwaway);
        let dummy_hash = hash_password(&params, &hex::encode(throwaway))?;

        let session_ttl = config
            .session_ttl
            .map(chrono::Duration::from_std)
            .transpose()
            .map_err(|e| ServiceError::Internal(format!("session ttl out of range: {e}")))?;

        Ok(Self {
            store,
            params,
            dummy_hash,
            session_ttl,
        })
    }

    /// Create a user with a hashed credential.
    pub async fn register(&self, username: &str, password: &str) -> Result<UserId, ServiceError> {
        let username = validate_username(username)?;
        if password.is_empty() {
            return Err(ServiceError::Validation("password must not be empty".into()));
        }

        let params = self.params.clone();
        let password = password.to_owned();
        let hash = blocking(move || hash_password(&params, &password)).await??;

        let user = self
            .store
            .call(move |db| db.register_user(&username, &hash))
            .await
            .map_err(|e| match e {
                ServiceError::Conflict(_) => AuthError::DuplicateUsername.into(),
                other => other,
            })?;

        info!(user = %user.id, username = %user.username, "User registered");
        Ok(user.id)
    }

    /// Check a username/password pair and issue a new session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ServiceError> {
        let name = username.trim().to_owned();
        let credential = self.store.call(move |db| db.get_credential(&name)).await?;

        let (user, hash) = match credential {
            Some((user, hash)) => (Some(user), hash),
            None => (None, self.dummy_hash.clone()),
        };

        let password = password.to_owned();
        let verified = blocking(move || verify_password(&hash, &password)).await?;

        let user = match user {
            Some(user) if verified => user,
            _ => {
                debug!(username = %username.trim(), "Login rejected");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        let session = self
            .store
            .call(move |db| {
                db.touch_user(user.id)?;
                db.create_session(user.id, &user.username)
            })
            .await?;

        info!(user = %session.user_id, username = %session.username, "User logged in");
        Ok(session)
    }

    /// `true` only for an existing, unexpired session bound to `user_id`.
    /// A session past its TTL is marked expired here. A valid session has its
    /// `last_seen` refreshed.
    pub async fn validate_session(
        &self,
        session_id: &str,
        user_id: UserId,
    ) -> Result<bool, ServiceError> {
        let ttl = self.session_ttl;
        let session_id = session_id.to_owned();

        self.store
            .call(move |db| {
                let Some(session) = db.get_session(&session_id, user_id)? else {
                    return Ok(false);
                };
                if session.is_expired {
                    return Ok(false);
                }
                if let Some(ttl) = ttl {
                    if Utc::now() - session.created_at > ttl {
                        db.expire_session(&session_id)?;
                        return Ok(false);
                    }
                }
                db.touch_session(&session_id)?;
                Ok(true)
            })
            .await
    }

    pub async fn logout(&self, session_id: &str) -> Result<bool, ServiceError> {
        let session_id = session_id.to_owned();
        self.store
            .call(move |db| db.expire_session(&session_id))
            .await
    }

    /// Expire every session older than the configured TTL.
    pub async fn expire_stale(&self) -> Result<usize, ServiceError> {
        let Some(ttl) = self.session_ttl else {
            return Ok(0);
        };
        let cutoff = Utc::now() - ttl;
        self.store
            .call(move |db| db.expire_stale_sessions(cutoff))
            .await
    }
}

/// Trim and check a username: 1-32 characters of `[A-Za-z0-9_.-]`.
pub fn validate_username(raw: &str) -> Result<String, ServiceError> {
    let name = raw.trim();
    let len = name.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(ServiceError::Validation(format!(
            "username must be {MIN_USERNAME_LEN}-{MAX_USERNAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(ServiceError::Validation(
            "username may only contain letters, digits, '_', '.' and '-'".into(),
        ));
    }
    Ok(name.to_string())
}

fn hash_password(params: &Params, password: &str) -> Result<String, ServiceError> {
    let mut salt_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| ServiceError::Internal(format!("salt encoding failed: {e}")))?;

    Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone())
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::Internal(format!("password hashing failed: {e}")))
}

/// Constant-time comparison happens inside Argon2. Cost parameters are taken
/// from the stored hash.
fn verify_password(hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::store::test_support::temp_store;

    use super::*;

    fn service(store: Store) -> AuthService {
        AuthService::new(store, &ServerConfig::for_tests()).unwrap()
    }

    async fn session_count(store: &Store) -> i64 {
        store
            .call(|db| {
                Ok(db
                    .conn()
                    .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_then_login() {
        let (_dir, store) = temp_store();
        let auth = service(store.clone());

        let user_id = auth.register("alice", "pw1").await.unwrap();
        let session = auth.login("alice", "pw1").await.unwrap();
        assert_eq!(session.user_id, user_id);
        assert_eq!(session.username, "alice");
        assert!(auth.validate_session(&session.session_id, user_id).await.unwrap());

        let (_, hash) = store
            .call(|db| db.get_credential("alice"))
            .await
            .unwrap()
            .unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("pw1"));
    }

    #[tokio::test]
    async fn bad_login_issues_no_session() {
        let (_dir, store) = temp_store();
        let auth = service(store.clone());
        auth.register("alice", "pw1").await.unwrap();

        let err = auth.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(AuthError::InvalidCredentials)));
        let err = auth.login("nobody", "pw1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(AuthError::InvalidCredentials)));

        assert_eq!(session_count(&store).await, 0);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (_dir, store) = temp_store();
        let auth = service(store);
        auth.register("alice", "pw1").await.unwrap();
        let err = auth.register(" alice ", "pw2").await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(AuthError::DuplicateUsername)));
    }

    #[tokio::test]
    async fn registration_input_is_validated() {
        let (_dir, store) = temp_store();
        let auth = service(store);
        let too_long = "x".repeat(33);
        for bad in ["", "   ", "has space", "semi;colon", too_long.as_str()] {
            assert!(
                matches!(auth.register(bad, "pw").await, Err(ServiceError::Validation(_))),
                "accepted {bad:?}"
            );
        }
        assert!(matches!(
            auth.register("alice", "").await,
            Err(ServiceError::Validation(_))
        ));
        assert!(auth.register("a.b-c_9", "pw").await.is_ok());
    }

    #[tokio::test]
    async fn logout_invalidates_session() {
        let (_dir, store) = temp_store();
        let auth = service(store);
        let user_id = auth.register("alice", "pw").await.unwrap();
        let session = auth.login("alice", "pw").await.unwrap();

        assert!(auth.logout(&session.session_id).await.unwrap());
        assert!(!auth.validate_session(&session.session_id, user_id).await.unwrap());
        assert!(!auth.validate_session("no-such-session", user_id).await.unwrap());
    }

    #[tokio::test]
    async fn session_past_ttl_is_expired() {
        let (_dir, store) = temp_store();
        let config = ServerConfig {
            session_ttl: Some(Duration::from_millis(1)),
            ..ServerConfig::for_tests()
        };
        let auth = AuthService::new(store, &config).unwrap();
        let user_id = auth.register("alice", "pw").await.unwrap();
        let session = auth.login("alice", "pw").await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!auth.validate_session(&session.session_id, user_id).await.unwrap());
        assert_eq!(auth.expire_stale().await.unwrap(), 0);
    }
}
