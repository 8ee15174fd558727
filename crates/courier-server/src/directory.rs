//! Group directory: group lifecycle, membership changes and DM resolution.

use std::collections::BTreeSet;

use tracing::info;

use courier_shared::constants::{MAX_GROUP_NAME_LEN, MAX_SEARCH_RESULTS};
use courier_shared::types::{GroupId, Role, UserId};
use courier_store::{ChatSession, Group, StoreError, User};

use crate::error::ServiceError;
use crate::store::Store;

#[derive(Clone)]
pub struct Directory {
    store: Store,
}

impl Directory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Create a group owned by `creator_id` and add `member_ids` as plain
    /// members. Every listed user must exist before anything is written.
    pub async fn create_group(
        &self,
        name: &str,
        creator_id: UserId,
        member_ids: Vec<UserId>,
    ) -> Result<Group, ServiceError> {
        let name = name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_GROUP_NAME_LEN {
            return Err(ServiceError::Validation(format!(
                "group name must be 1-{MAX_GROUP_NAME_LEN} characters"
            )));
        }

        let members: BTreeSet<UserId> = member_ids
            .into_iter()
            .filter(|id| *id != creator_id)
            .collect();

        let group = self
            .store
            .call(move |db| {
                for id in &members {
                    if !db.user_exists(*id)? {
                        return Err(StoreError::NotFound("user"));
                    }
                }
                let group = db.create_group(&name, creator_id)?;
                for id in members {
                    db.add_membership(creator_id, id, group.id, Role::Member)?;
                }
                Ok(group)
            })
            .await?;

        info!(group = %group.id, name = %group.name, creator = %creator_id, "Group created");
        Ok(group)
    }

    pub async fn add_member(
        &self,
        actor: UserId,
        target: UserId,
        group: GroupId,
        role: Option<Role>,
    ) -> Result<(), ServiceError> {
        let role = role.unwrap_or(Role::Member);
        self.store
            .call(move |db| db.add_membership(actor, target, group, role))
            .await?;
        info!(group = %group, actor = %actor, target = %target, %role, "Member added");
        Ok(())
    }

    pub async fn remove_member(
        &self,
        actor: UserId,
        target: UserId,
        group: GroupId,
    ) -> Result<(), ServiceError> {
        self.store
            .call(move |db| db.remove_membership(actor, target, group))
            .await?;
        info!(group = %group, actor = %actor, target = %target, "Member removed");
        Ok(())
    }

    pub async fn delete_group(&self, group: GroupId, actor: UserId) -> Result<(), ServiceError> {
        self.store
            .call(move |db| db.delete_group(group, actor))
            .await?;
        info!(group = %group, actor = %actor, "Group deleted");
        Ok(())
    }

    /// The direct chat between `a` and `b`, created on first use.
    pub async fn resolve_or_create_dm(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<ChatSession, ServiceError> {
        self.store
            .call(move |db| db.get_or_create_dm_chat_session(a, b))
            .await
    }

    /// The user's groups with the role held in each.
    pub async fn list_groups(&self, user: UserId) -> Result<Vec<(Group, Role)>, ServiceError> {
        self.store.call(move |db| db.list_user_groups(user)).await
    }

    /// Username search on behalf of `requester`, who is left out of the
    /// results.
    pub async fn search_users(
        &self,
        query: &str,
        requester: UserId,
    ) -> Result<Vec<User>, ServiceError> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Err(ServiceError::Validation("query required".into()));
        }
        self.store
            .call(move |db| db.search_users(&query, Some(requester), MAX_SEARCH_RESULTS))
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::store::test_support::temp_store;

    use super::*;

    async fn user(store: &Store, name: &'static str) -> UserId {
        store.call(move |db| db.create_user(name)).await.unwrap().id
    }

    #[tokio::test]
    async fn create_group_with_initial_members() {
        let (_dir, store) = temp_store();
        let directory = Directory::new(store.clone());
        let owner = user(&store, "owner").await;
        let bob = user(&store, "bob").await;
        let carol = user(&store, "carol").await;

        let group = directory
            .create_group("  team  ", owner, vec![bob, carol, owner, bob])
            .await
            .unwrap();
        assert_eq!(group.name, "team");

        let members = store
            .call(move |db| db.list_members(group.id))
            .await
            .unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(members[0].user_id, owner);
        assert_eq!(members[0].role, Role::Owner);
        assert!(members[1..].iter().all(|m| m.role == Role::Member));
    }

    #[tokio::test]
    async fn unknown_initial_member_creates_nothing() {
        let (_dir, store) = temp_store();
        let directory = Directory::new(store.clone());
        let owner = user(&store, "owner").await;

        let err = directory
            .create_group("team", owner, vec![UserId::new()])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(directory.list_groups(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_rules_surface_as_service_errors() {
        let (_dir, store) = temp_store();
        let directory = Directory::new(store.clone());
        let owner = user(&store, "owner").await;
        let member = user(&store, "member").await;
        let other = user(&store, "other").await;

        assert!(matches!(
            directory.create_group("", owner, vec![]).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            directory.create_group("team", UserId::new(), vec![]).await,
            Err(ServiceError::NotFound(_))
        ));

        let group = directory.create_group("team", owner, vec![member]).await.unwrap();
        assert!(matches!(
            directory.create_group("team", other, vec![]).await,
            Err(ServiceError::Conflict(_))
        ));

        assert!(matches!(
            directory.add_member(member, other, group.id, None).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            directory.add_member(owner, member, group.id, None).await,
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(
            directory.remove_member(owner, owner, group.id).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            directory.delete_group(group.id, member).await,
            Err(ServiceError::Forbidden(_))
        ));

        directory
            .add_member(owner, other, group.id, Some(Role::Admin))
            .await
            .unwrap();
        directory.remove_member(other, member, group.id).await.unwrap();
        directory.delete_group(group.id, owner).await.unwrap();
        assert!(directory.list_groups(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_excludes_requester() {
        let (_dir, store) = temp_store();
        let directory = Directory::new(store.clone());
        let bob = user(&store, "bob").await;
        user(&store, "bobby").await;

        let found = directory.search_users("BOB", bob).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].username, "bobby");

        assert!(matches!(
            directory.search_users("  ", bob).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn dm_resolution_is_idempotent() {
        let (_dir, store) = temp_store();
        let directory = Directory::new(store.clone());
        let a = user(&store, "a").await;
        let b = user(&store, "b").await;

        let first = directory.resolve_or_create_dm(a, b).await.unwrap();
        let second = directory.resolve_or_create_dm(b, a).await.unwrap();
        assert_eq!(first.id, second.id);
    }
}
