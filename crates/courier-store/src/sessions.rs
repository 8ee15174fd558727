//! Login sessions.
//!
//! A session id is 32 random bytes from the OS RNG, hex-encoded. Sessions are
//! never deleted by the server; logging out or ageing past the TTL only sets
//! `is_expired`.

use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::{params, OptionalExtension};

use courier_shared::constants::SESSION_TOKEN_BYTES;
use courier_shared::types::UserId;

use crate::database::{decode_col, decode_ts, encode_ts, now, Database};
use crate::error::Result;
use crate::models::Session;

pub fn generate_session_id() -> String {
    let mut token = [0u8; SESSION_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut token);
    hex::encode(token)
}

impl Database {
    /// Issue and persist a fresh session for the given user.
    pub fn create_session(&self, user_id: UserId, username: &str) -> Result<Session> {
        let ts = now();
        let session = Session {
            session_id: generate_session_id(),
            user_id,
            username: username.to_string(),
            created_at: ts,
            last_seen: ts,
            is_expired: false,
        };

        self.conn().execute(
            "INSERT INTO sessions (session_id, user_id, username, created_at, last_seen, is_expired)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                session.session_id,
                user_id.to_string(),
                session.username,
                encode_ts(&session.created_at),
                encode_ts(&session.last_seen),
            ],
        )?;

        Ok(session)
    }

    /// Fetch a session bound to `user_id`, expired or not.
    pub fn get_session(&self, session_id: &str, user_id: UserId) -> Result<Option<Session>> {
        let session = self
            .conn()
            .query_row(
                "SELECT session_id, user_id, username, created_at, last_seen, is_expired
                 FROM sessions
                 WHERE session_id = ?1 AND user_id = ?2",
                params![session_id, user_id.to_string()],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    pub fn touch_session(&self, session_id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE sessions SET last_seen = ?1 WHERE session_id = ?2",
            params![encode_ts(&now()), session_id],
        )?;
        Ok(())
    }

    /// Mark a session unusable. Returns `true` if it was live before.
    pub fn expire_session(&self, session_id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE sessions SET is_expired = 1 WHERE session_id = ?1 AND is_expired = 0",
            params![session_id],
        )?;
        Ok(affected > 0)
    }

    /// Expire every live session created before `cutoff`. Returns the number
    /// of sessions expired.
    pub fn expire_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE sessions SET is_expired = 1 WHERE is_expired = 0 AND created_at < ?1",
            params![encode_ts(&cutoff)],
        )?;
        Ok(affected)
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let session_id: String = row.get(0)?;
    let user_id_str: String = row.get(1)?;
    let username: String = row.get(2)?;
    let created_str: String = row.get(3)?;
    let last_seen_str: String = row.get(4)?;
    let is_expired: bool = row.get(5)?;

    Ok(Session {
        session_id,
        user_id: decode_col(1, &user_id_str)?,
        username,
        created_at: decode_ts(3, &created_str)?,
        last_seen: decode_ts(4, &last_seen_str)?,
        is_expired,
    })
}
