use rusqlite::params;

use courier_shared::types::{ChatId, MessageId, UserId};

use crate::chats::is_participant;
use crate::database::{decode_col, decode_ts, encode_ts, Database};
use crate::error::{not_found, Result, StoreError};
use crate::models::{Message, MessageRecord};

impl Database {
    /// Persist a message. A duplicate id is a [`StoreError::Conflict`].
    pub fn save_message(&self, message: &Message) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO messages (id, chat_session_id, sender_id, group_id, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id.to_string(),
                    message.chat_id.to_string(),
                    message.sender_id.to_string(),
                    message.group_id.map(|g| g.to_string()),
                    message.content,
                    encode_ts(&message.timestamp),
                ],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("message {} already exists", message.id))
                }
                other => other,
            })?;
        Ok(())
    }

    /// History of a chat, oldest first.
    ///
    /// With `limit`, only the most recent `limit` messages are returned (still
    /// oldest first). Only participants may read a chat.
    pub fn list_messages(
        &self,
        chat_id: ChatId,
        requester: UserId,
        limit: Option<u32>,
    ) -> Result<Vec<MessageRecord>> {
        self.conn()
            .query_row(
                "SELECT 1 FROM chat_sessions WHERE id = ?1",
                params![chat_id.to_string()],
                |_| Ok(()),
            )
            .map_err(not_found("chat"))?;

        if !is_participant(self.conn(), requester, chat_id)? {
            return Err(StoreError::Forbidden(
                "not a participant of this chat".into(),
            ));
        }

        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(i64::from).unwrap_or(-1);

        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, sender_username, content, timestamp, group_id
             FROM (
                 SELECT m.id, m.sender_id, u.username AS sender_username, m.content,
                        m.timestamp, m.group_id, m.rowid AS seq
                 FROM messages m
                 JOIN users u ON u.id = m.sender_id
                 WHERE m.chat_session_id = ?1
                 ORDER BY m.timestamp DESC, m.rowid DESC
                 LIMIT ?2
             )
             ORDER BY timestamp ASC, seq ASC",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string(), limit], row_to_record)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, chat_session_id, sender_id, group_id, content, timestamp
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found("message"))
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let chat_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let group_str: Option<String> = row.get(3)?;
    let content: String = row.get(4)?;
    let ts_str: String = row.get(5)?;

    Ok(Message {
        id: decode_col(0, &id_str)?,
        chat_id: decode_col(1, &chat_str)?,
        sender_id: decode_col(2, &sender_str)?,
        group_id: group_str.map(|s| decode_col(3, &s)).transpose()?,
        content,
        timestamp: decode_ts(5, &ts_str)?,
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let sender_username: String = row.get(2)?;
    let content: String = row.get(3)?;
    let ts_str: String = row.get(4)?;
    let group_str: Option<String> = row.get(5)?;

    Ok(MessageRecord {
        id: decode_col(0, &id_str)?,
        sender_id: decode_col(1, &sender_str)?,
        sender_username,
        content,
        timestamp: decode_ts(4, &ts_str)?,
        group_id: group_str.map(|s| decode_col(5, &s)).transpose()?,
    })
}
