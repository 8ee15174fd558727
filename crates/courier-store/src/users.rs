//! CRUD operations for [`User`] records and their credentials.

use rusqlite::{params, OptionalExtension};

use courier_shared::types::UserId;

use crate::database::{decode_col, decode_ts, encode_ts, now, Database};
use crate::error::{not_found, Result, StoreError};
use crate::models::User;

const USER_COLUMNS: &str = "id, username, last_seen";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user without a credential.
    pub fn create_user(&self, username: &str) -> Result<User> {
        let user = User {
            id: UserId::new(),
            username: username.to_string(),
            last_seen: now(),
        };
        insert_user(self.conn(), &user)?;
        Ok(user)
    }

    /// Create a user and its credential atomically. A taken username is
    /// reported as [`StoreError::Conflict`].
    pub fn register_user(&mut self, username: &str, password_hash: &str) -> Result<User> {
        let user = User {
            id: UserId::new(),
            username: username.to_string(),
            last_seen: now(),
        };

        let tx = self.conn_mut().transaction()?;
        insert_user(&tx, &user)?;
        tx.execute(
            "INSERT INTO auth (user_id, password_hash) VALUES (?1, ?2)",
            params![user.id.to_string(), password_hash],
        )?;
        tx.commit()?;

        Ok(user)
    }

    /// Attach a credential to an existing user.
    pub fn create_credential(&self, user_id: UserId, password_hash: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO auth (user_id, password_hash) VALUES (?1, ?2)",
            params![user_id.to_string(), password_hash],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found("user"))
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Look up a user together with the stored password hash.
    pub fn get_credential(&self, username: &str) -> Result<Option<(User, String)>> {
        let found = self
            .conn()
            .query_row(
                "SELECT u.id, u.username, u.last_seen, a.password_hash
                 FROM users u
                 JOIN auth a ON a.user_id = u.id
                 WHERE u.username = ?1",
                params![username],
                |row| Ok((row_to_user(row)?, row.get::<_, String>(3)?)),
            )
            .optional()?;
        Ok(found)
    }

    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Case-insensitive substring search on usernames, ordered by name.
    pub fn search_users(
        &self,
        query: &str,
        exclude: Option<UserId>,
        limit: u32,
    ) -> Result<Vec<User>> {
        let pattern = format!("%{}%", escape_like(query.trim()));

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE username LIKE ?1 ESCAPE '\\'
               AND (?2 IS NULL OR id != ?2)
             ORDER BY username COLLATE NOCASE ASC
             LIMIT ?3"
        ))?;

        let rows = stmt.query_map(
            params![pattern, exclude.map(|id| id.to_string()), limit],
            row_to_user,
        )?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Refresh a user's `last_seen` timestamp.
    pub fn touch_user(&self, id: UserId) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET last_seen = ?1 WHERE id = ?2",
            params![encode_ts(&now()), id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("user"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Administrative removal of a user. Credential, sessions, memberships
    /// and participations cascade. Returns `true` if a row was deleted.
    pub fn delete_user(&self, id: UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn insert_user(conn: &rusqlite::Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, username, last_seen) VALUES (?1, ?2, ?3)",
        params![
            user.id.to_string(),
            user.username,
            encode_ts(&user.last_seen)
        ],
    )
    .map_err(|e| match StoreError::from(e) {
        StoreError::Conflict(_) => {
            StoreError::Conflict(format!("username '{}' is taken", user.username))
        }
        other => other,
    })?;
    Ok(())
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Map a `rusqlite::Row` (`id, username, last_seen`) to a [`User`].
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let last_seen_str: String = row.get(2)?;

    Ok(User {
        id: decode_col(0, &id_str)?,
        username,
        last_seen: decode_ts(2, &last_seen_str)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::database::test_support::temp_db;

    use super::*;

    #[test]
    fn register_and_lookup() {
        let (_dir, mut db) = temp_db();
        let user = db.register_user("alice", "$argon2id$hash").unwrap();

        assert_eq!(db.get_user(user.id).unwrap().username, "alice");
        assert_eq!(
            db.find_user_by_username("alice").unwrap().map(|u| u.id),
            Some(user.id)
        );

        let (found, hash) = db.get_credential("alice").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(hash, "$argon2id$hash");
    }

    #[test]
    fn duplicate_username_is_conflict() {
        let (_dir, mut db) = temp_db();
        db.register_user("alice", "h1").unwrap();
        let err = db.register_user("alice", "h2").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // The losing registration left no orphaned user behind.
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn unknown_user_is_not_found() {
        let (_dir, db) = temp_db();
        assert!(matches!(db.get_user(UserId::new()), Err(StoreError::NotFound("user"))));
        assert!(db.find_user_by_username("ghost").unwrap().is_none());
        assert!(db.get_credential("ghost").unwrap().is_none());
    }

    #[test]
    fn user_without_credential_has_no_login() {
        let (_dir, db) = temp_db();
        let user = db.create_user("bare").unwrap();
        assert!(db.get_credential("bare").unwrap().is_none());

        db.create_credential(user.id, "h").unwrap();
        assert!(db.get_credential("bare").unwrap().is_some());
    }

    #[test]
    fn search_is_case_insensitive_and_escapes_wildcards() {
        let (_dir, db) = temp_db();
        let alice = db.create_user("Alice").unwrap();
        db.create_user("malik").unwrap();
        db.create_user("bob").unwrap();
        db.create_user("under_score").unwrap();

        let names: Vec<_> = db
            .search_users("ali", None, 10)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["Alice", "malik"]);

        let names: Vec<_> = db
            .search_users("ali", Some(alice.id), 10)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["malik"]);

        assert_eq!(db.search_users("_", None, 10).unwrap().len(), 1);
    }

    #[test]
    fn delete_user_cascades_credential() {
        let (_dir, mut db) = temp_db();
        let user = db.register_user("carol", "h").unwrap();
        assert!(db.delete_user(user.id).unwrap());
        assert!(db.get_credential("carol").unwrap().is_none());
        assert!(!db.delete_user(user.id).unwrap());
    }
}
