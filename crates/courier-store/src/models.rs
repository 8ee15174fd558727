//! Domain model structs persisted in the server database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_shared::protocol::{ChatSummary, GroupEntry, MessageEntry, UserEntry};
use courier_shared::types::{ChatId, ChatKind, GroupId, MessageId, Role, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user. The password hash lives in the `auth` table and is
/// never loaded alongside the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Globally unique login name.
    pub username: String,
    /// Last login (or activity) time.
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A login session. The `session_id` is the bearer token handed to the
/// client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub user_id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_expired: bool,
}

// ---------------------------------------------------------------------------
// Group / Membership
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    /// Globally unique display name.
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// The creator holds the owner role and is the only user allowed to
    /// delete the group.
    pub creator_id: UserId,
}

/// A user's role-qualified association with a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Membership {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub user_id: UserId,
    pub username: String,
}

/// The unit of message routing: a DM between two users or a group's
/// conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSession {
    pub id: ChatId,
    pub kind: ChatKind,
    pub started_at: DateTime<Utc>,
    /// Present iff `kind == ChatKind::Group`.
    pub group_id: Option<GroupId>,
    pub participants: Vec<Participant>,
}

impl ChatSession {
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }
}

/// One row of a user's conversation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatOverview {
    pub id: ChatId,
    pub kind: ChatKind,
    pub group_id: Option<GroupId>,
    /// Group name, or the other party's username for a DM.
    pub name: String,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_sender: Option<String>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message. Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub group_id: Option<GroupId>,
    pub content: String,
    /// Server time at persist.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// A new message stamped with the current server time.
    pub fn new(
        chat_id: ChatId,
        sender_id: UserId,
        group_id: Option<GroupId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            chat_id,
            sender_id,
            group_id,
            content: content.into(),
            timestamp: crate::database::now(),
        }
    }
}

/// A message as listed in a chat history, joined with its sender's name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub group_id: Option<GroupId>,
}

// ---------------------------------------------------------------------------
// Wire conversions
// ---------------------------------------------------------------------------

impl From<User> for UserEntry {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            last_seen: user.last_seen,
        }
    }
}

impl Group {
    /// Wire form, optionally annotated with the caller's role.
    pub fn into_entry(self, role: Option<Role>) -> GroupEntry {
        GroupEntry {
            id: self.id,
            name: self.name,
            creator_id: self.creator_id,
            created_at: self.created_at,
            role,
        }
    }
}

impl From<ChatOverview> for ChatSummary {
    fn from(chat: ChatOverview) -> Self {
        Self {
            id: chat.id,
            name: chat.name,
            kind: chat.kind,
            group_id: chat.group_id,
            last_message: chat.last_message,
            last_message_time: chat.last_message_time,
            last_sender: chat.last_sender,
        }
    }
}

impl From<MessageRecord> for MessageEntry {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            sender_id: record.sender_id,
            sender_username: record.sender_username,
            content: record.content,
            timestamp: record.timestamp,
            group_id: record.group_id,
        }
    }
}
