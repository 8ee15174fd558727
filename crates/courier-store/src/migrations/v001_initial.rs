//! v001 -- Initial schema creation.
//!
//! Creates the eight core tables: `users`, `auth`, `sessions`, `groups`,
//! `user_groups`, `chat_sessions`, `chat_participants` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users and credentials
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id        TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    username  TEXT NOT NULL UNIQUE,
    last_seen TEXT NOT NULL                   -- RFC-3339
);

CREATE TABLE IF NOT EXISTS auth (
    user_id       TEXT PRIMARY KEY NOT NULL,  -- FK -> users(id)
    password_hash TEXT NOT NULL,              -- Argon2id PHC string

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Login sessions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY NOT NULL,     -- hex-encoded random token
    user_id    TEXT NOT NULL,
    username   TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_seen  TEXT NOT NULL,
    is_expired INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);

-- ----------------------------------------------------------------
-- Groups and memberships
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    name       TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    creator_id TEXT NOT NULL,

    FOREIGN KEY (creator_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS user_groups (
    user_id   TEXT NOT NULL,
    group_id  TEXT NOT NULL,
    role      TEXT NOT NULL DEFAULT 'member'
              CHECK (role IN ('member', 'admin', 'owner')),
    joined_at TEXT NOT NULL,

    PRIMARY KEY (user_id, group_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_user_groups_group_id ON user_groups(group_id);

-- ----------------------------------------------------------------
-- Chat sessions and participants
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_sessions (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    type       TEXT NOT NULL CHECK (type IN ('dm', 'group')),
    started_at TEXT NOT NULL,
    group_id   TEXT UNIQUE,                   -- set iff type = 'group'

    CHECK ((type = 'group') = (group_id IS NOT NULL)),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS chat_participants (
    chat_session_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,

    PRIMARY KEY (chat_session_id, user_id),
    FOREIGN KEY (chat_session_id) REFERENCES chat_sessions(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_participants_user_id
    ON chat_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL, -- UUID v4
    chat_session_id TEXT NOT NULL,
    sender_id       TEXT NOT NULL,
    group_id        TEXT,
    content         TEXT NOT NULL,
    timestamp       TEXT NOT NULL,             -- RFC-3339, microsecond precision

    FOREIGN KEY (chat_session_id) REFERENCES chat_sessions(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_session_id, timestamp);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
