//! Message router: resolves where a message goes, checks the sender may post
//! there, persists it and reports who should receive it.

use tracing::debug;

use courier_shared::constants::MAX_CONTENT_LEN;
use courier_shared::protocol::Push;
use courier_shared::types::{ChatId, GroupId, UserId};
use courier_store::{ChatOverview, Message, MessageRecord, StoreError};

use crate::directory::Directory;
use crate::error::ServiceError;
use crate::store::Store;

/// Where a `message` request is addressed. When a request names several
/// targets the group wins over the recipient, and the recipient over the
/// chat id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Group(GroupId),
    Recipient(UserId),
    Chat(ChatId),
}

impl Destination {
    pub fn resolve(
        chat_id: Option<ChatId>,
        group_id: Option<GroupId>,
        recipient_id: Option<UserId>,
    ) -> Result<Self, ServiceError> {
        let destination = match (group_id, recipient_id, chat_id) {
            (Some(group), _, _) => Destination::Group(group),
            (None, Some(recipient), _) => Destination::Recipient(recipient),
            (None, None, Some(chat)) => Destination::Chat(chat),
            (None, None, None) => {
                return Err(ServiceError::Validation(
                    "one of chat_id, group_id or recipient_id is required".into(),
                ))
            }
        };

        let supplied = [chat_id.is_some(), group_id.is_some(), recipient_id.is_some()]
            .iter()
            .filter(|s| **s)
            .count();
        if supplied > 1 {
            debug!(?destination, "Several targets supplied, lower-precedence ids ignored");
        }

        Ok(destination)
    }
}

/// A persisted message plus everything needed to fan it out.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub sender_username: String,
    /// Every participant of the chat, the sender included.
    pub participants: Vec<UserId>,
}

impl Delivery {
    /// The notification sent to online participants.
    pub fn push(&self) -> Push {
        Push {
            chat_id: self.message.chat_id,
            message_id: self.message.id,
            sender_id: self.message.sender_id,
            sender_username: self.sender_username.clone(),
            content: self.message.content.clone(),
            timestamp: self.message.timestamp,
        }
    }
}

#[derive(Clone)]
pub struct MessageRouter {
    store: Store,
    directory: Directory,
}

impl MessageRouter {
    pub fn new(store: Store, directory: Directory) -> Self {
        Self { store, directory }
    }

    /// Persist a message from `sender` to `destination`. Nothing is written
    /// when the sender is not a participant of the target chat.
    pub async fn send_message(
        &self,
        sender: UserId,
        content: String,
        destination: Destination,
    ) -> Result<Delivery, ServiceError> {
        validate_content(&content)?;

        let direct = match destination {
            Destination::Recipient(recipient) => {
                Some(self.directory.resolve_or_create_dm(sender, recipient).await?)
            }
            Destination::Group(_) | Destination::Chat(_) => None,
        };

        self.store
            .call(move |db| {
                let chat = match (destination, direct) {
                    (_, Some(chat)) => chat,
                    (Destination::Group(group_id), None) => {
                        db.get_group(group_id)?;
                        if db.get_membership(sender, group_id)?.is_none() {
                            return Err(StoreError::Forbidden(
                                "not a member of this group".into(),
                            ));
                        }
                        db.get_or_create_group_chat(group_id)?
                    }
                    (Destination::Chat(chat_id), None) => db.get_chat_session(chat_id)?,
                    (Destination::Recipient(recipient), None) => {
                        db.get_or_create_dm_chat_session(sender, recipient)?
                    }
                };

                if !chat.has_participant(sender) {
                    return Err(StoreError::Forbidden(
                        "not a participant of this chat".into(),
                    ));
                }

                let sender_username = db.get_user(sender)?.username;
                let message = Message::new(chat.id, sender, chat.group_id, content);
                db.save_message(&message)?;

                Ok(Delivery {
                    message,
                    sender_username,
                    participants: chat.participants.iter().map(|p| p.user_id).collect(),
                })
            })
            .await
    }

    pub async fn get_chat_messages(
        &self,
        user: UserId,
        chat: ChatId,
        limit: Option<u32>,
    ) -> Result<Vec<MessageRecord>, ServiceError> {
        self.store
            .call(move |db| db.list_messages(chat, user, limit))
            .await
    }

    pub async fn get_user_chats(&self, user: UserId) -> Result<Vec<ChatOverview>, ServiceError> {
        self.store.call(move |db| db.list_user_chats(user)).await
    }
}

fn validate_content(content: &str) -> Result<(), ServiceError> {
    if content.trim().is_empty() {
        return Err(ServiceError::Validation("message content must not be empty".into()));
    }
    if content.len() > MAX_CONTENT_LEN {
        return Err(ServiceError::Validation(format!(
            "message content exceeds {MAX_CONTENT_LEN} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use courier_shared::types::Role;

    use crate::store::test_support::temp_store;

    use super::*;

    async fn user(store: &Store, name: &'static str) -> UserId {
        store.call(move |db| db.create_user(name)).await.unwrap().id
    }

    async fn message_count(store: &Store) -> i64 {
        store
            .call(|db| {
                Ok(db
                    .conn()
                    .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?)
            })
            .await
            .unwrap()
    }

    #[test]
    fn destination_precedence() {
        let chat = ChatId::new();
        let group = GroupId::new();
        let user = UserId::new();

        assert_eq!(
            Destination::resolve(Some(chat), Some(group), Some(user)).unwrap(),
            Destination::Group(group)
        );
        assert_eq!(
            Destination::resolve(Some(chat), None, Some(user)).unwrap(),
            Destination::Recipient(user)
        );
        assert_eq!(
            Destination::resolve(Some(chat), None, None).unwrap(),
            Destination::Chat(chat)
        );
        assert!(matches!(
            Destination::resolve(None, None, None),
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn dm_send_creates_chat_once() {
        let (_dir, store) = temp_store();
        let router = MessageRouter::new(store.clone(), Directory::new(store.clone()));
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;

        let first = router
            .send_message(alice, "hello".into(), Destination::Recipient(bob))
            .await
            .unwrap();
        let reply = router
            .send_message(bob, "hi".into(), Destination::Chat(first.message.chat_id))
            .await
            .unwrap();

        assert_eq!(first.message.chat_id, reply.message.chat_id);
        assert_eq!(first.sender_username, "alice");
        assert_eq!(first.participants.len(), 2);
        assert_eq!(first.message.group_id, None);

        let history = router
            .get_chat_messages(bob, first.message.chat_id, None)
            .await
            .unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "hi"]);
    }

    #[tokio::test]
    async fn non_participant_cannot_send() {
        let (_dir, store) = temp_store();
        let router = MessageRouter::new(store.clone(), Directory::new(store.clone()));
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let eve = user(&store, "eve").await;

        let delivery = router
            .send_message(alice, "private".into(), Destination::Recipient(bob))
            .await
            .unwrap();

        let err = router
            .send_message(eve, "sneaky".into(), Destination::Chat(delivery.message.chat_id))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
        assert_eq!(message_count(&store).await, 1);
    }

    #[tokio::test]
    async fn group_send_requires_membership() {
        let (_dir, store) = temp_store();
        let router = MessageRouter::new(store.clone(), Directory::new(store.clone()));
        let owner = user(&store, "owner").await;
        let member = user(&store, "member").await;
        let outsider = user(&store, "outsider").await;

        let group = store
            .call(move |db| {
                let group = db.create_group("team", owner)?;
                db.add_membership(owner, member, group.id, Role::Member)?;
                Ok(group)
            })
            .await
            .unwrap();

        let delivery = router
            .send_message(member, "hi all".into(), Destination::Group(group.id))
            .await
            .unwrap();
        assert_eq!(delivery.message.group_id, Some(group.id));
        assert_eq!(delivery.participants.len(), 2);

        let err = router
            .send_message(outsider, "let me in".into(), Destination::Group(group.id))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = router
            .send_message(owner, "x".into(), Destination::Group(GroupId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn unknown_targets_and_bad_content() {
        let (_dir, store) = temp_store();
        let router = MessageRouter::new(store.clone(), Directory::new(store.clone()));
        let alice = user(&store, "alice").await;

        assert!(matches!(
            router
                .send_message(alice, "hi".into(), Destination::Recipient(UserId::new()))
                .await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            router
                .send_message(alice, "hi".into(), Destination::Chat(ChatId::new()))
                .await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            router
                .send_message(alice, "   ".into(), Destination::Chat(ChatId::new()))
                .await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            router
                .send_message(
                    alice,
                    "x".repeat(MAX_CONTENT_LEN + 1),
                    Destination::Chat(ChatId::new())
                )
                .await,
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(message_count(&store).await, 0);
    }
}
