//! Group manager: creates groups and tracks which session is in which.

use std::collections::HashMap;

use earshot_protocol::{GroupId, GroupInfo, SessionId};
use parking_lot::Mutex;

use crate::{GroupConfig, GroupError};

/// One group's internal record.
#[derive(Debug)]
struct Group {
    id: GroupId,
    name: String,
    is_permanent: bool,
    /// Join order.
    members: Vec<SessionId>,
}

impl Group {
    fn info(&self) -> GroupInfo {
        GroupInfo {
            group_id: self.id,
            name: self.name.clone(),
            is_permanent: self.is_permanent,
            members: self.members.clone(),
        }
    }
}

/// What a session's departure from a group did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeftGroup {
    pub group_id: GroupId,
    /// The group was temporary and is gone now.
    pub disbanded: bool,
    /// Who is still in the group (empty if disbanded).
    pub remaining: Vec<SessionId>,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The group joined, membership included.
    pub joined: GroupInfo,
    /// The group implicitly left on the way, if any.
    pub left: Option<LeftGroup>,
}

#[derive(Debug, Default)]
struct Inner {
    groups: HashMap<GroupId, Group>,
    /// Which group each session is in. At most one (key invariant).
    membership: HashMap<SessionId, GroupId>,
}

impl Inner {
    /// Removes `session_id` from its group, disbanding an emptied
    /// temporary group.
    fn leave(&mut self, session_id: SessionId) -> Option<LeftGroup> {
        let group_id = self.membership.remove(&session_id)?;
        let Some(group) = self.groups.get_mut(&group_id) else {
            return Some(LeftGroup {
                group_id,
                disbanded: true,
                remaining: Vec::new(),
            });
        };
        group.members.retain(|m| *m != session_id);

        if group.members.is_empty() && !group.is_permanent {
            self.groups.remove(&group_id);
            tracing::info!(%group_id, "empty group disbanded");
            return Some(LeftGroup {
                group_id,
                disbanded: true,
                remaining: Vec::new(),
            });
        }
        Some(LeftGroup {
            group_id,
            disbanded: false,
            remaining: group.members.clone(),
        })
    }

    fn join(&mut self, session_id: SessionId, group_id: GroupId) -> Result<JoinOutcome, GroupError> {
        // Check the target before touching the current membership, so a
        // failed join leaves the session where it was.
        if !self.groups.contains_key(&group_id) {
            return Err(GroupError::NotFound(group_id));
        }
        if self.membership.get(&session_id) == Some(&group_id) {
            return Err(GroupError::AlreadyMember(group_id));
        }

        let left = self.leave(session_id);

        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or(GroupError::NotFound(group_id))?;
        group.members.push(session_id);
        self.membership.insert(session_id, group_id);
        tracing::info!(%session_id, %group_id, "joined group");

        Ok(JoinOutcome {
            joined: group.info(),
            left,
        })
    }

    fn create(&mut self, config: &GroupConfig, name: &str, is_permanent: bool) -> Result<GroupId, GroupError> {
        let name = name.trim();
        config.validate_name(name)?;
        let lower = name.to_lowercase();
        if self.groups.values().any(|g| g.name.to_lowercase() == lower) {
            return Err(GroupError::NameTaken(name.to_string()));
        }

        let id = GroupId::random();
        self.groups.insert(
            id,
            Group {
                id,
                name: name.to_string(),
                is_permanent,
                members: Vec::new(),
            },
        );
        tracing::info!(group_id = %id, name, is_permanent, "group created");
        Ok(id)
    }
}

/// Owns every group and the session → group index.
///
/// One mutex guards both maps, so every public method is a single atomic
/// step: no two operations interleave on the same group or session. The
/// lock is never held across an await or a network call.
#[derive(Debug, Default)]
pub struct GroupManager {
    inner: Mutex<Inner>,
    config: GroupConfig,
}

impl GroupManager {
    pub fn new(config: GroupConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    /// Creates an empty group.
    ///
    /// # Errors
    /// - [`GroupError::InvalidName`]: bad length or characters
    /// - [`GroupError::NameTaken`]: case-insensitive collision
    pub fn create_group(&self, name: &str, is_permanent: bool) -> Result<GroupInfo, GroupError> {
        let mut inner = self.inner.lock();
        let id = inner.create(&self.config, name, is_permanent)?;
        inner
            .groups
            .get(&id)
            .map(Group::info)
            .ok_or(GroupError::NotFound(id))
    }

    /// Creates a group and moves `creator` into it, in one step.
    pub fn create_and_join(
        &self,
        creator: SessionId,
        name: &str,
        is_permanent: bool,
    ) -> Result<JoinOutcome, GroupError> {
        let mut inner = self.inner.lock();
        let id = inner.create(&self.config, name, is_permanent)?;
        inner.join(creator, id)
    }

    /// Moves `session_id` into `group_id`, leaving any current group first.
    ///
    /// # Errors
    /// - [`GroupError::NotFound`]: target doesn't exist (or was disbanded)
    /// - [`GroupError::AlreadyMember`]: already in that group
    pub fn join_group(&self, session_id: SessionId, group_id: GroupId) -> Result<JoinOutcome, GroupError> {
        self.inner.lock().join(session_id, group_id)
    }

    /// Removes `session_id` from its group. `None` if it wasn't in one.
    pub fn leave_group(&self, session_id: SessionId) -> Option<LeftGroup> {
        self.inner.lock().leave(session_id)
    }

    /// Session teardown hook. Same as [`leave_group`](Self::leave_group).
    pub fn handle_disconnect(&self, session_id: SessionId) -> Option<LeftGroup> {
        self.leave_group(session_id)
    }

    /// The group `session_id` belongs to.
    pub fn group_of(&self, session_id: SessionId) -> Option<GroupInfo> {
        let inner = self.inner.lock();
        let group_id = inner.membership.get(&session_id)?;
        inner.groups.get(group_id).map(Group::info)
    }

    pub fn get_group(&self, group_id: GroupId) -> Option<GroupInfo> {
        self.inner.lock().groups.get(&group_id).map(Group::info)
    }

    /// Every group, sorted by name.
    pub fn list_groups(&self) -> Vec<GroupInfo> {
        let inner = self.inner.lock();
        let mut groups: Vec<GroupInfo> = inner.groups.values().map(Group::info).collect();
        groups.sort_by_key(|g| g.name.to_lowercase());
        groups
    }

    /// The other members of `session_id`'s group. Empty if ungrouped.
    pub fn peers_of(&self, session_id: SessionId) -> Vec<SessionId> {
        let inner = self.inner.lock();
        let Some(group_id) = inner.membership.get(&session_id) else {
            return Vec::new();
        };
        inner
            .groups
            .get(group_id)
            .map(|g| g.members.iter().copied().filter(|m| *m != session_id).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().groups.is_empty()
    }

    /// Forgets every group and membership.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.groups.clear();
        inner.membership.clear();
    }
}
