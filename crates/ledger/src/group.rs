use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use splitledger_core::{Aggregate, AggregateRoot, DomainError, GroupId, MemberId};
use splitledger_events::Event;

/// Role a member holds inside one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }
}

impl core::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MemberRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(MemberRole::Admin),
            "member" => Ok(MemberRole::Member),
            other => Err(DomainError::validation(format!(
                "invalid role '{other}': must be 'member' or 'admin'"
            ))),
        }
    }
}

/// One member's seat in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub member_id: MemberId,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    pub fn is_admin(&self) -> bool {
        self.role == MemberRole::Admin
    }
}

/// Aggregate root: Group (the membership roster).
///
/// Expenses and settlements reference a group but are stored beside it, not
/// inside it; the roster is what admission and the settlement state machine
/// consult for membership and role checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    id: GroupId,
    name: String,
    description: Option<String>,
    created_by: Option<MemberId>,
    created_at: Option<DateTime<Utc>>,
    memberships: Vec<Membership>,
    version: u64,
    created: bool,
}

impl Group {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: GroupId) -> Self {
        Self {
            id,
            name: String::new(),
            description: None,
            created_by: None,
            created_at: None,
            memberships: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn created_by(&self) -> Option<MemberId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn memberships(&self) -> &[Membership] {
        &self.memberships
    }

    pub fn membership(&self, member_id: MemberId) -> Option<&Membership> {
        self.memberships.iter().find(|m| m.member_id == member_id)
    }

    pub fn is_member(&self, member_id: MemberId) -> bool {
        self.membership(member_id).is_some()
    }

    pub fn is_admin(&self, member_id: MemberId) -> bool {
        self.membership(member_id).is_some_and(Membership::is_admin)
    }

    fn admin_count(&self) -> usize {
        self.memberships.iter().filter(|m| m.is_admin()).count()
    }
}

impl AggregateRoot for Group {
    type Id = GroupId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateGroup. The creator joins as the first admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGroup {
    pub group_id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub creator: MemberId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddMember.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddMember {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub role: MemberRole,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveMember.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveMember {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeMemberRole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMemberRole {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub role: MemberRole,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupCommand {
    CreateGroup(CreateGroup),
    AddMember(AddMember),
    RemoveMember(RemoveMember),
    ChangeMemberRole(ChangeMemberRole),
}

/// Event: GroupCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCreated {
    pub group_id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub creator: MemberId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MemberAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAdded {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub role: MemberRole,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MemberRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRemoved {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MemberRoleChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRoleChanged {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub role: MemberRole,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupEvent {
    GroupCreated(GroupCreated),
    MemberAdded(MemberAdded),
    MemberRemoved(MemberRemoved),
    MemberRoleChanged(MemberRoleChanged),
}

impl Event for GroupEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GroupEvent::GroupCreated(_) => "ledger.group.created",
            GroupEvent::MemberAdded(_) => "ledger.group.member_added",
            GroupEvent::MemberRemoved(_) => "ledger.group.member_removed",
            GroupEvent::MemberRoleChanged(_) => "ledger.group.member_role_changed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            GroupEvent::GroupCreated(e) => e.occurred_at,
            GroupEvent::MemberAdded(e) => e.occurred_at,
            GroupEvent::MemberRemoved(e) => e.occurred_at,
            GroupEvent::MemberRoleChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Group {
    type Command = GroupCommand;
    type Event = GroupEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            GroupEvent::GroupCreated(e) => {
                self.id = e.group_id;
                self.name = e.name.trim().to_string();
                self.description = e.description.clone();
                self.created_by = Some(e.creator);
                self.created_at = Some(e.occurred_at);
                self.memberships = vec![Membership {
                    member_id: e.creator,
                    role: MemberRole::Admin,
                    joined_at: e.occurred_at,
                }];
                self.created = true;
            }
            GroupEvent::MemberAdded(e) => {
                self.memberships.push(Membership {
                    member_id: e.member_id,
                    role: e.role,
                    joined_at: e.occurred_at,
                });
            }
            GroupEvent::MemberRemoved(e) => {
                self.memberships.retain(|m| m.member_id != e.member_id);
            }
            GroupEvent::MemberRoleChanged(e) => {
                if let Some(m) = self
                    .memberships
                    .iter_mut()
                    .find(|m| m.member_id == e.member_id)
                {
                    m.role = e.role;
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            GroupCommand::CreateGroup(cmd) => self.handle_create(cmd),
            GroupCommand::AddMember(cmd) => self.handle_add_member(cmd),
            GroupCommand::RemoveMember(cmd) => self.handle_remove_member(cmd),
            GroupCommand::ChangeMemberRole(cmd) => self.handle_change_role(cmd),
        }
    }
}

impl Group {
    fn ensure_exists(&self, group_id: GroupId) -> Result<(), DomainError> {
        if !self.created || self.id != group_id {
            return Err(DomainError::not_found(format!("group {group_id}")));
        }
        Ok(())
    }

    fn existing_membership(&self, member_id: MemberId) -> Result<&Membership, DomainError> {
        self.membership(member_id).ok_or_else(|| {
            DomainError::not_found(format!("member {member_id} is not in group {}", self.id))
        })
    }

    fn handle_create(&self, cmd: &CreateGroup) -> Result<Vec<GroupEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("group already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("group name cannot be empty"));
        }

        Ok(vec![GroupEvent::GroupCreated(GroupCreated {
            group_id: cmd.group_id,
            name: cmd.name.clone(),
            description: cmd.description.clone(),
            creator: cmd.creator,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_member(&self, cmd: &AddMember) -> Result<Vec<GroupEvent>, DomainError> {
        self.ensure_exists(cmd.group_id)?;

        if self.is_member(cmd.member_id) {
            return Err(DomainError::validation(format!(
                "member {} is already a member of the group",
                cmd.member_id
            )));
        }

        Ok(vec![GroupEvent::MemberAdded(MemberAdded {
            group_id: cmd.group_id,
            member_id: cmd.member_id,
            role: cmd.role,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_member(&self, cmd: &RemoveMember) -> Result<Vec<GroupEvent>, DomainError> {
        self.ensure_exists(cmd.group_id)?;
        let membership = self.existing_membership(cmd.member_id)?;

        if membership.is_admin() && self.admin_count() == 1 {
            return Err(DomainError::validation(
                "cannot remove the last admin from the group",
            ));
        }

        Ok(vec![GroupEvent::MemberRemoved(MemberRemoved {
            group_id: cmd.group_id,
            member_id: cmd.member_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_role(&self, cmd: &ChangeMemberRole) -> Result<Vec<GroupEvent>, DomainError> {
        self.ensure_exists(cmd.group_id)?;
        let membership = self.existing_membership(cmd.member_id)?;

        if membership.role == cmd.role {
            return Err(DomainError::validation(format!(
                "member {} already has role '{}'",
                cmd.member_id, cmd.role
            )));
        }
        if membership.is_admin() && self.admin_count() == 1 {
            return Err(DomainError::validation(
                "cannot demote the last admin in the group",
            ));
        }

        Ok(vec![GroupEvent::MemberRoleChanged(MemberRoleChanged {
            group_id: cmd.group_id,
            member_id: cmd.member_id,
            role: cmd.role,
            occurred_at: cmd.occurred_at,
        })])
    }
}
