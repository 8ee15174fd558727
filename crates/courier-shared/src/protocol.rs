use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{ChatId, ChatKind, GroupId, MessageId, Role, UserId};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Every request a client may send, discriminated by the `type` field.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    Logout {},
    /// Send a chat message. Target resolution order is
    /// `group_id` > `recipient_id` > `chat_id`.
    Message {
        content: String,
        #[serde(default, deserialize_with = "optional_id")]
        chat_id: Option<ChatId>,
        #[serde(default, deserialize_with = "optional_id")]
        group_id: Option<GroupId>,
        #[serde(default, deserialize_with = "optional_id")]
        recipient_id: Option<UserId>,
    },
    GetUserChats {
        #[serde(default)]
        session: Option<SessionClaim>,
    },
    GetMessages {
        chat_id: ChatId,
        #[serde(default)]
        session: Option<SessionClaim>,
        #[serde(default)]
        limit: Option<u32>,
    },
    SearchUsers {
        query: String,
    },
    CreateGroup {
        name: String,
        #[serde(default)]
        member_ids: Vec<UserId>,
    },
    AddMember {
        group_id: GroupId,
        user_id: UserId,
        #[serde(default)]
        role: Option<Role>,
    },
    RemoveMember {
        group_id: GroupId,
        user_id: UserId,
    },
    DeleteGroup {
        group_id: GroupId,
    },
    ListGroups {},
}

impl Request {
    /// The wire `type` of this request, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Register { .. } => "register",
            Request::Login { .. } => "login",
            Request::Logout {} => "logout",
            Request::Message { .. } => "message",
            Request::GetUserChats { .. } => "get_user_chats",
            Request::GetMessages { .. } => "get_messages",
            Request::SearchUsers { .. } => "search_users",
            Request::CreateGroup { .. } => "create_group",
            Request::AddMember { .. } => "add_member",
            Request::RemoveMember { .. } => "remove_member",
            Request::DeleteGroup { .. } => "delete_group",
            Request::ListGroups {} => "list_groups",
        }
    }
}

/// Session credentials carried inside read requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaim {
    pub user_id: UserId,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// A decoded request together with the optional correlation id the client
/// attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub request_id: Option<Value>,
    pub request: Request,
}

impl Inbound {
    /// Decode one frame. Required fields are validated here once, so the
    /// dispatcher only ever sees well-formed requests.
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(frame).map_err(|_| ProtocolError::InvalidUtf8)?;
        let mut value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson(e.to_string()))?;

        let object = value
            .as_object_mut()
            .ok_or_else(|| ProtocolError::InvalidRequest("expected a JSON object".into()))?;
        let request_id = object.remove("request_id").filter(|v| !v.is_null());

        let request = Request::deserialize(value)
            .map_err(|e| ProtocolError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            request_id,
            request,
        })
    }
}

/// Treats a missing, null or empty-string identifier as absent.
fn optional_id<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Reply to a single request. Serialized with a `status` discriminator.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Registered { user_id: UserId },
    Ok(Reply),
    Error { message: String },
}

/// Payload of a successful (`status: "ok"`) response.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Reply {
    LoggedIn {
        user_id: UserId,
        username: String,
        session_id: String,
    },
    MessageSent {
        message_id: MessageId,
        chat_id: ChatId,
        timestamp: DateTime<Utc>,
    },
    Chats {
        chats: Vec<ChatSummary>,
    },
    Messages {
        chat_id: ChatId,
        messages: Vec<MessageEntry>,
    },
    Users {
        users: Vec<UserEntry>,
    },
    Group {
        group: GroupEntry,
    },
    Groups {
        groups: Vec<GroupEntry>,
    },
    Done {},
}

impl Response {
    pub fn ok(reply: Reply) -> Self {
        Response::Ok(reply)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }

    /// Render the response as a JSON object, echoing the request's
    /// correlation id when one was supplied.
    pub fn to_value(&self, request_id: Option<&Value>) -> Result<Value, ProtocolError> {
        let mut value =
            serde_json::to_value(self).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if let (Some(id), Some(object)) = (request_id, value.as_object_mut()) {
            object.insert("request_id".to_string(), id.clone());
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSummary {
    pub id: ChatId,
    pub name: String,
    pub kind: ChatKind,
    pub group_id: Option<GroupId>,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_sender: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEntry {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub group_id: Option<GroupId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserEntry {
    pub id: UserId,
    pub username: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupEntry {
    pub id: GroupId,
    pub name: String,
    pub creator_id: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

/// Unsolicited delivery of a new message to an online participant.
///
/// Carries no `status` field, which is how clients tell it apart from a
/// response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Push {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_message_request_with_empty_ids() {
        let recipient = UserId::new();
        let frame = json!({
            "type": "message",
            "content": "hi",
            "chat_id": "",
            "group_id": null,
            "recipient_id": recipient.to_string(),
            "request_id": "req-7",
        })
        .to_string();

        let inbound = Inbound::from_frame(frame.as_bytes()).unwrap();
        assert_eq!(inbound.request_id, Some(json!("req-7")));
        assert_eq!(
            inbound.request,
            Request::Message {
                content: "hi".into(),
                chat_id: None,
                group_id: None,
                recipient_id: Some(recipient),
            }
        );
    }

    #[test]
    fn missing_required_field_is_invalid_request() {
        let err = Inbound::from_frame(br#"{"type":"login","username":"alice"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest(_)));
    }

    #[test]
    fn unknown_type_is_invalid_request() {
        let err = Inbound::from_frame(br#"{"type":"teleport"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest(_)));
    }

    #[test]
    fn garbage_is_malformed_json() {
        let err = Inbound::from_frame(b"{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedJson(_)));
    }

    #[test]
    fn fieldless_requests_accept_extra_keys() {
        let inbound = Inbound::from_frame(br#"{"type":"logout","session":{}}"#).unwrap();
        assert_eq!(inbound.request, Request::Logout {});
    }

    #[test]
    fn login_response_shape() {
        let user_id = UserId::new();
        let response = Response::ok(Reply::LoggedIn {
            user_id,
            username: "alice".into(),
            session_id: "abc".into(),
        });
        let value = response.to_value(Some(&json!(3))).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "ok",
                "user_id": user_id.to_string(),
                "username": "alice",
                "session_id": "abc",
                "request_id": 3,
            })
        );
    }

    #[test]
    fn error_and_done_shapes() {
        let value = Response::error("invalid credentials").to_value(None).unwrap();
        assert_eq!(value, json!({"status": "error", "message": "invalid credentials"}));

        let value = Response::ok(Reply::Done {}).to_value(None).unwrap();
        assert_eq!(value, json!({"status": "ok"}));
    }

    #[test]
    fn push_has_no_status_field() {
        let push = Push {
            chat_id: ChatId::new(),
            message_id: MessageId::new(),
            sender_id: UserId::new(),
            sender_username: "alice".into(),
            content: "hi".into(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&push).unwrap();
        assert!(value.get("status").is_none());
        assert_eq!(value["content"], "hi");
    }
}
