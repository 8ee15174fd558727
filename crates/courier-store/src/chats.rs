//! Chat sessions and their participants.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use courier_shared::types::{ChatId, ChatKind, GroupId, UserId};

use crate::database::{decode_col, decode_ts, encode_ts, now, Database};
use crate::error::{not_found, Result, StoreError};
use crate::models::{ChatOverview, ChatSession, Participant};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a bare chat session with no participants.
    pub fn create_chat_session(
        &self,
        kind: ChatKind,
        group_id: Option<GroupId>,
    ) -> Result<ChatSession> {
        if (kind == ChatKind::Group) != group_id.is_some() {
            return Err(StoreError::Invalid(
                "a group id is required for group chats and forbidden for DMs".into(),
            ));
        }
        insert_chat(self.conn(), kind, group_id)
    }

    /// Return the group's chat session, creating it on first use.
    ///
    /// A new session is seeded with every current member of the group.
    pub fn get_or_create_group_chat(&mut self, group_id: GroupId) -> Result<ChatSession> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.query_row(
            "SELECT 1 FROM groups WHERE id = ?1",
            params![group_id.to_string()],
            |_| Ok(()),
        )
        .map_err(not_found("group"))?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM chat_sessions WHERE group_id = ?1",
                params![group_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let chat_id = match existing {
            Some(id) => decode_col::<ChatId>(0, &id)?,
            None => {
                let chat = insert_chat(&tx, ChatKind::Group, Some(group_id))?;
                tx.execute(
                    "INSERT INTO chat_participants (chat_session_id, user_id)
                     SELECT ?1, user_id FROM user_groups WHERE group_id = ?2",
                    params![chat.id.to_string(), group_id.to_string()],
                )?;
                tracing::debug!(chat = %chat.id, group = %group_id, "created group chat");
                chat.id
            }
        };

        let chat = load_chat(&tx, chat_id)?;
        tx.commit()?;
        Ok(chat)
    }

    /// Return the DM session linking `a` and `b`, creating it (with both
    /// participant rows) if none exists. Idempotent over the unordered pair.
    pub fn get_or_create_dm_chat_session(&mut self, a: UserId, b: UserId) -> Result<ChatSession> {
        if a == b {
            return Err(StoreError::Invalid("cannot open a direct chat with yourself".into()));
        }

        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        for user in [a, b] {
            tx.query_row(
                "SELECT 1 FROM users WHERE id = ?1",
                params![user.to_string()],
                |_| Ok(()),
            )
            .map_err(not_found("user"))?;
        }

        let existing: Option<String> = tx
            .query_row(
                "SELECT cs.id
                 FROM chat_sessions cs
                 JOIN chat_participants p1 ON p1.chat_session_id = cs.id AND p1.user_id = ?1
                 JOIN chat_participants p2 ON p2.chat_session_id = cs.id AND p2.user_id = ?2
                 WHERE cs.type = 'dm'
                 ORDER BY cs.started_at ASC
                 LIMIT 1",
                params![a.to_string(), b.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        let chat_id = match existing {
            Some(id) => decode_col::<ChatId>(0, &id)?,
            None => {
                let chat = insert_chat(&tx, ChatKind::Dm, None)?;
                for user in [a, b] {
                    tx.execute(
                        "INSERT INTO chat_participants (chat_session_id, user_id) VALUES (?1, ?2)",
                        params![chat.id.to_string(), user.to_string()],
                    )?;
                }
                tracing::debug!(chat = %chat.id, "created direct chat");
                chat.id
            }
        };

        let chat = load_chat(&tx, chat_id)?;
        tx.commit()?;
        Ok(chat)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a chat session with its participant list.
    pub fn get_chat_session(&self, id: ChatId) -> Result<ChatSession> {
        load_chat(self.conn(), id)
    }

    pub fn is_participant(&self, user_id: UserId, chat_id: ChatId) -> Result<bool> {
        is_participant(self.conn(), user_id, chat_id)
    }

    /// Every chat the user takes part in, most recently active first; chats
    /// without messages come last.
    pub fn list_user_chats(&self, user_id: UserId) -> Result<Vec<ChatOverview>> {
        let mut stmt = self.conn().prepare(
            "SELECT cs.id, cs.type, cs.group_id, g.name,
                    (SELECT u.username
                     FROM chat_participants op
                     JOIN users u ON u.id = op.user_id
                     WHERE op.chat_session_id = cs.id AND op.user_id != ?1
                     LIMIT 1) AS peer_name,
                    lm.content, lm.timestamp, lu.username
             FROM chat_sessions cs
             JOIN chat_participants cp ON cp.chat_session_id = cs.id AND cp.user_id = ?1
             LEFT JOIN groups g ON g.id = cs.group_id
             LEFT JOIN messages lm ON lm.id = (
                 SELECT m.id FROM messages m
                 WHERE m.chat_session_id = cs.id
                 ORDER BY m.timestamp DESC, m.rowid DESC
                 LIMIT 1
             )
             LEFT JOIN users lu ON lu.id = lm.sender_id
             ORDER BY lm.timestamp IS NULL, lm.timestamp DESC, cs.started_at DESC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let kind_str: String = row.get(1)?;
            let group_str: Option<String> = row.get(2)?;
            let group_name: Option<String> = row.get(3)?;
            let peer_name: Option<String> = row.get(4)?;
            let last_message: Option<String> = row.get(5)?;
            let last_ts: Option<String> = row.get(6)?;
            let last_sender: Option<String> = row.get(7)?;

            let kind: ChatKind = decode_col(1, &kind_str)?;
            let name = match kind {
                ChatKind::Group => group_name.unwrap_or_else(|| "group".to_string()),
                ChatKind::Dm => peer_name.unwrap_or_else(|| "direct chat".to_string()),
            };

            Ok(ChatOverview {
                id: decode_col(0, &id_str)?,
                kind,
                group_id: group_str.map(|s| decode_col(2, &s)).transpose()?,
                name,
                last_message,
                last_message_time: last_ts.map(|s| decode_ts(6, &s)).transpose()?,
                last_sender,
            })
        })?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn insert_chat(conn: &Connection, kind: ChatKind, group_id: Option<GroupId>) -> Result<ChatSession> {
    let chat = ChatSession {
        id: ChatId::new(),
        kind,
        started_at: now(),
        group_id,
        participants: Vec::new(),
    };
    conn.execute(
        "INSERT INTO chat_sessions (id, type, started_at, group_id) VALUES (?1, ?2, ?3, ?4)",
        params![
            chat.id.to_string(),
            kind.as_str(),
            encode_ts(&chat.started_at),
            group_id.map(|g| g.to_string()),
        ],
    )?;
    Ok(chat)
}

pub(crate) fn is_participant(conn: &Connection, user_id: UserId, chat_id: ChatId) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM chat_participants
             WHERE chat_session_id = ?1 AND user_id = ?2
             LIMIT 1",
            params![chat_id.to_string(), user_id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn load_chat(conn: &Connection, id: ChatId) -> Result<ChatSession> {
    let (kind, started_at, group_id) = conn
        .query_row(
            "SELECT type, started_at, group_id FROM chat_sessions WHERE id = ?1",
            params![id.to_string()],
            |row| {
                let kind_str: String = row.get(0)?;
                let started_str: String = row.get(1)?;
                let group_str: Option<String> = row.get(2)?;
                Ok((
                    decode_col::<ChatKind>(0, &kind_str)?,
                    decode_ts(1, &started_str)?,
                    group_str
                        .map(|s| decode_col::<GroupId>(2, &s))
                        .transpose()?,
                ))
            },
        )
        .map_err(not_found("chat"))?;

    let mut stmt = conn.prepare(
        "SELECT u.id, u.username
         FROM chat_participants cp
         JOIN users u ON u.id = cp.user_id
         WHERE cp.chat_session_id = ?1
         ORDER BY u.username ASC",
    )?;
    let rows = stmt.query_map(params![id.to_string()], |row| {
        let user_str: String = row.get(0)?;
        Ok(Participant {
            user_id: decode_col(0, &user_str)?,
            username: row.get(1)?,
        })
    })?;

    let mut participants = Vec::new();
    for row in rows {
        participants.push(row?);
    }

    Ok(ChatSession {
        id,
        kind,
        started_at,
        group_id,
        participants,
    })
}
