//! Groups and role-qualified memberships.
//!
//! Membership changes evaluate the role rules inside the same transaction
//! that performs the write, so concurrent changes cannot slip past a check.
//! When the group's chat session already exists its participant rows are
//! kept in step with the membership table.

use rusqlite::{params, Connection, OptionalExtension};

use courier_shared::types::{GroupId, Role, UserId};

use crate::database::{decode_col, decode_ts, encode_ts, now, Database};
use crate::error::{not_found, Result, StoreError};
use crate::models::{Group, Membership};

const GROUP_COLUMNS: &str = "id, name, created_at, creator_id";

// ---------------------------------------------------------------------------
// Role rules
// ---------------------------------------------------------------------------

/// May `actor_role` grant `requested` to a new member?
///
/// Only owners and admins add members, the owner role is never granted, and
/// nobody grants a role equal to or above their own unless they own the
/// group.
pub fn check_add(actor_role: Option<Role>, requested: Role) -> Result<()> {
    let actor_role = match actor_role {
        Some(role) if role.can_manage() => role,
        _ => {
            return Err(StoreError::Forbidden(
                "only owners and admins can add members".into(),
            ))
        }
    };

    if requested == Role::Owner {
        return Err(StoreError::Forbidden("the owner role cannot be granted".into()));
    }
    if requested >= actor_role {
        return Err(StoreError::Forbidden(format!(
            "{actor_role} cannot grant the {requested} role"
        )));
    }
    Ok(())
}

/// May an actor holding `actor_role` remove a member holding `target_role`?
pub fn check_remove(
    actor_id: UserId,
    actor_role: Option<Role>,
    target_id: UserId,
    target_role: Option<Role>,
) -> Result<()> {
    let actor_role = match actor_role {
        Some(role) if role.can_manage() => role,
        _ => {
            return Err(StoreError::Forbidden(
                "only owners and admins can remove members".into(),
            ))
        }
    };

    if actor_id == target_id {
        return Err(StoreError::Forbidden(
            "cannot remove yourself; delete the group instead".into(),
        ));
    }

    let target_role = target_role.ok_or(StoreError::NotFound("membership"))?;

    if target_role >= actor_role {
        return Err(StoreError::Forbidden(format!(
            "{actor_role} cannot remove a member with the {target_role} role"
        )));
    }
    Ok(())
}

impl Database {
    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Create a group and make its creator the owner.
    pub fn create_group(&mut self, name: &str, creator_id: UserId) -> Result<Group> {
        let group = Group {
            id: GroupId::new(),
            name: name.to_string(),
            created_at: now(),
            creator_id,
        };

        let tx = self.conn_mut().transaction()?;
        require_user(&tx, creator_id, "creator")?;

        tx.execute(
            "INSERT INTO groups (id, name, created_at, creator_id) VALUES (?1, ?2, ?3, ?4)",
            params![
                group.id.to_string(),
                group.name,
                encode_ts(&group.created_at),
                creator_id.to_string(),
            ],
        )
        .map_err(|e| match StoreError::from(e) {
            StoreError::Conflict(_) => {
                StoreError::Conflict(format!("group name '{name}' is taken"))
            }
            other => other,
        })?;

        insert_membership(&tx, creator_id, group.id, Role::Owner)?;
        tx.commit()?;

        Ok(group)
    }

    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        self.conn()
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?1"),
                params![id.to_string()],
                row_to_group,
            )
            .map_err(not_found("group"))
    }

    /// Groups the user belongs to, with the user's role in each, by name.
    pub fn list_user_groups(&self, user_id: UserId) -> Result<Vec<(Group, Role)>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name, g.created_at, g.creator_id, ug.role
             FROM groups g
             JOIN user_groups ug ON ug.group_id = g.id
             WHERE ug.user_id = ?1
             ORDER BY g.name ASC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            let role_str: String = row.get(4)?;
            Ok((row_to_group(row)?, decode_col::<Role>(4, &role_str)?))
        })?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    /// Delete a group. Only its creator may do so; memberships, the group
    /// chat, its participants and messages cascade.
    pub fn delete_group(&mut self, group_id: GroupId, requesting_user_id: UserId) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        let group = tx
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?1"),
                params![group_id.to_string()],
                row_to_group,
            )
            .map_err(not_found("group"))?;

        if group.creator_id != requesting_user_id {
            return Err(StoreError::Forbidden(
                "only the group creator can delete the group".into(),
            ));
        }

        tx.execute("DELETE FROM groups WHERE id = ?1", params![group_id.to_string()])?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Memberships
    // ------------------------------------------------------------------

    pub fn get_membership(&self, user_id: UserId, group_id: GroupId) -> Result<Option<Membership>> {
        let membership = self
            .conn()
            .query_row(
                "SELECT user_id, group_id, role, joined_at
                 FROM user_groups
                 WHERE user_id = ?1 AND group_id = ?2",
                params![user_id.to_string(), group_id.to_string()],
                row_to_membership,
            )
            .optional()?;
        Ok(membership)
    }

    /// Members of a group in join order.
    pub fn list_members(&self, group_id: GroupId) -> Result<Vec<Membership>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, group_id, role, joined_at
             FROM user_groups
             WHERE group_id = ?1
             ORDER BY joined_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![group_id.to_string()], row_to_membership)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// `actor_id` adds `target_id` to the group with `role`.
    pub fn add_membership(
        &mut self,
        actor_id: UserId,
        target_id: UserId,
        group_id: GroupId,
        role: Role,
    ) -> Result<Membership> {
        let tx = self.conn_mut().transaction()?;

        require_user(&tx, actor_id, "user")?;
        require_user(&tx, target_id, "user")?;
        require_group(&tx, group_id)?;

        check_add(role_of(&tx, actor_id, group_id)?, role)?;

        if role_of(&tx, target_id, group_id)?.is_some() {
            return Err(StoreError::Conflict("user is already a member of the group".into()));
        }

        let membership = insert_membership(&tx, target_id, group_id, role)?;

        tx.execute(
            "INSERT OR IGNORE INTO chat_participants (chat_session_id, user_id)
             SELECT id, ?2 FROM chat_sessions WHERE group_id = ?1",
            params![group_id.to_string(), target_id.to_string()],
        )?;

        tx.commit()?;
        Ok(membership)
    }

    /// `actor_id` removes `target_id` from the group.
    pub fn remove_membership(
        &mut self,
        actor_id: UserId,
        target_id: UserId,
        group_id: GroupId,
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        require_user(&tx, actor_id, "user")?;
        require_user(&tx, target_id, "user")?;
        require_group(&tx, group_id)?;

        check_remove(
            actor_id,
            role_of(&tx, actor_id, group_id)?,
            target_id,
            role_of(&tx, target_id, group_id)?,
        )?;

        tx.execute(
            "DELETE FROM user_groups WHERE user_id = ?1 AND group_id = ?2",
            params![target_id.to_string(), group_id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM chat_participants
             WHERE user_id = ?2
               AND chat_session_id IN (SELECT id FROM chat_sessions WHERE group_id = ?1)",
            params![group_id.to_string(), target_id.to_string()],
        )?;

        tx.commit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn require_user(conn: &Connection, user_id: UserId, what: &'static str) -> Result<()> {
    conn.query_row(
        "SELECT 1 FROM users WHERE id = ?1",
        params![user_id.to_string()],
        |_| Ok(()),
    )
    .map_err(not_found(what))
}

fn require_group(conn: &Connection, group_id: GroupId) -> Result<()> {
    conn.query_row(
        "SELECT 1 FROM groups WHERE id = ?1",
        params![group_id.to_string()],
        |_| Ok(()),
    )
    .map_err(not_found("group"))
}

fn role_of(conn: &Connection, user_id: UserId, group_id: GroupId) -> Result<Option<Role>> {
    let role = conn
        .query_row(
            "SELECT role FROM user_groups WHERE user_id = ?1 AND group_id = ?2",
            params![user_id.to_string(), group_id.to_string()],
            |row| {
                let raw: String = row.get(0)?;
                decode_col::<Role>(0, &raw)
            },
        )
        .optional()?;
    Ok(role)
}

fn insert_membership(
    conn: &Connection,
    user_id: UserId,
    group_id: GroupId,
    role: Role,
) -> Result<Membership> {
    let membership = Membership {
        user_id,
        group_id,
        role,
        joined_at: now(),
    };
    conn.execute(
        "INSERT INTO user_groups (user_id, group_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            user_id.to_string(),
            group_id.to_string(),
            role.as_str(),
            encode_ts(&membership.joined_at),
        ],
    )?;
    Ok(membership)
}

/// Map a `rusqlite::Row` (`id, name, created_at, creator_id`) to a [`Group`].
pub(crate) fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let created_str: String = row.get(2)?;
    let creator_str: String = row.get(3)?;

    Ok(Group {
        id: decode_col(0, &id_str)?,
        name,
        created_at: decode_ts(2, &created_str)?,
        creator_id: decode_col(3, &creator_str)?,
    })
}

fn row_to_membership(row: &rusqlite::Row<'_>) -> rusqlite::Result<Membership> {
    let user_str: String = row.get(0)?;
    let group_str: String = row.get(1)?;
    let role_str: String = row.get(2)?;
    let joined_str: String = row.get(3)?;

    Ok(Membership {
        user_id: decode_col(0, &user_str)?,
        group_id: decode_col(1, &group_str)?,
        role: decode_col(2, &role_str)?,
        joined_at: decode_ts(3, &joined_str)?,
    })
}
