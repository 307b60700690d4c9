//! Access-control storage backends.
//!
//! The storage seam covers the relations the engine reads and writes:
//! the directory (users, groups, organisations, cases), the membership
//! stores, the three grant stores and the effective-access cache.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::snapshot::{
    AccessSnapshot, EffectiveAccessRow, GroupMembershipRow, OrganisationMembershipRow,
};
use super::{
    AccessDiff, AccessMap, Case, CaseAccessLevel, CaseGrant, CaseId, GrantSubject, Group, GroupId,
    Organisation, OrganisationId, OrganisationMembership, User, UserId,
};
use crate::error::{Result, StorageError};

/// Trait for access-control storage backends.
#[async_trait]
pub trait AccessStorage: Send + Sync {
    // -- directory --

    /// Get a user.
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>>;

    /// Insert a new user.
    async fn insert_user(&self, user: User) -> Result<()>;

    /// Delete a user record. Memberships, grants and cache rows must already be gone.
    async fn delete_user(&self, user_id: UserId) -> Result<()>;

    /// List all user IDs.
    async fn list_users(&self) -> Result<Vec<UserId>>;

    /// Get a group.
    async fn get_group(&self, group_id: GroupId) -> Result<Option<Group>>;

    /// Insert or replace a group.
    async fn put_group(&self, group: Group) -> Result<()>;

    /// Delete a group with its memberships and group grants.
    async fn delete_group(&self, group_id: GroupId) -> Result<()>;

    /// List all groups.
    async fn list_groups(&self) -> Result<Vec<Group>>;

    /// Get an organisation.
    async fn get_organisation(
        &self,
        organisation_id: OrganisationId,
    ) -> Result<Option<Organisation>>;

    /// Insert or replace an organisation.
    async fn put_organisation(&self, organisation: Organisation) -> Result<()>;

    /// Delete an organisation with its memberships and organisation grants.
    async fn delete_organisation(&self, organisation_id: OrganisationId) -> Result<()>;

    /// Get a case.
    async fn get_case(&self, case_id: CaseId) -> Result<Option<Case>>;

    /// Insert or replace a case.
    async fn put_case(&self, case: Case) -> Result<()>;

    /// Delete a case with every grant on it. Cache rows are left to synchronization.
    async fn delete_case(&self, case_id: CaseId) -> Result<()>;

    /// List all case IDs.
    async fn list_cases(&self) -> Result<Vec<CaseId>>;

    // -- memberships --

    /// Groups a user belongs to.
    async fn groups_of(&self, user_id: UserId) -> Result<Vec<GroupId>>;

    /// Members of a group.
    async fn group_members(&self, group_id: GroupId) -> Result<Vec<UserId>>;

    /// Add a user to a group. Returns false if already a member.
    async fn add_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool>;

    /// Remove a user from a group. Returns false if not a member.
    async fn remove_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool>;

    /// Organisations a user belongs to.
    async fn organisations_of(&self, user_id: UserId) -> Result<Vec<OrganisationMembership>>;

    /// Members of an organisation.
    async fn organisation_members(&self, organisation_id: OrganisationId) -> Result<Vec<UserId>>;

    /// Add a user to an organisation. Returns false if already a member.
    async fn add_organisation_member(
        &self,
        organisation_id: OrganisationId,
        user_id: UserId,
        is_primary: bool,
    ) -> Result<bool>;

    /// Remove a user from an organisation. Returns false if not a member.
    async fn remove_organisation_member(
        &self,
        organisation_id: OrganisationId,
        user_id: UserId,
    ) -> Result<bool>;

    /// Make an existing membership the user's only primary one.
    async fn set_primary_organisation(
        &self,
        user_id: UserId,
        organisation_id: OrganisationId,
    ) -> Result<()>;

    // -- grants --

    /// User grants held directly by a user.
    async fn user_case_grants(&self, user_id: UserId) -> Result<Vec<CaseGrant>>;

    /// Group grants held by any of the given groups.
    async fn group_case_grants(&self, group_ids: &[GroupId]) -> Result<Vec<CaseGrant>>;

    /// Organisation grants held by any of the given organisations.
    async fn organisation_case_grants(
        &self,
        organisation_ids: &[OrganisationId],
    ) -> Result<Vec<CaseGrant>>;

    /// Every grant on a case, from all three stores.
    async fn case_grants(&self, case_id: CaseId) -> Result<Vec<CaseGrant>>;

    /// Get the grant of a subject on a case.
    async fn get_grant(&self, subject: GrantSubject, case_id: CaseId) -> Result<Option<CaseGrant>>;

    /// Insert or replace a grant. Returns the previous level, if any.
    async fn put_grant(&self, grant: CaseGrant) -> Result<Option<CaseAccessLevel>>;

    /// Remove a grant. Returns the removed grant, if any.
    async fn remove_grant(
        &self,
        subject: GrantSubject,
        case_id: CaseId,
    ) -> Result<Option<CaseGrant>>;

    // -- effective-access cache --

    /// Cached effective access of a user on a case.
    async fn effective_access(&self, user_id: UserId, case_id: CaseId)
        -> Result<Option<CaseAccessLevel>>;

    /// All cached effective access rows of a user.
    async fn effective_access_for_user(&self, user_id: UserId) -> Result<AccessMap>;

    /// Users holding a cached row for a case.
    async fn users_with_access_to(&self, case_id: CaseId) -> Result<Vec<UserId>>;

    /// Apply a diff to one user's cached rows: deletes first, then inserts and updates.
    ///
    /// All or nothing: on error no row of the diff has been written.
    async fn apply_access_diff(&self, user_id: UserId, diff: &AccessDiff) -> Result<()>;

    /// Drop every cached row. Returns the number of rows removed.
    async fn clear_effective_access(&self) -> Result<usize>;
}

#[derive(Debug, Default, Clone)]
struct MemoryState {
    users: BTreeMap<UserId, User>,
    groups: BTreeMap<GroupId, Group>,
    organisations: BTreeMap<OrganisationId, Organisation>,
    cases: BTreeMap<CaseId, Case>,
    group_members: BTreeSet<(GroupId, UserId)>,
    /// Value is the `is_primary` flag.
    organisation_members: BTreeMap<(OrganisationId, UserId), bool>,
    user_grants: BTreeMap<(UserId, CaseId), CaseGrant>,
    group_grants: BTreeMap<(GroupId, CaseId), CaseGrant>,
    organisation_grants: BTreeMap<(OrganisationId, CaseId), CaseGrant>,
    effective: BTreeMap<(UserId, CaseId), CaseAccessLevel>,
}

impl MemoryState {
    fn subject_exists(&self, subject: GrantSubject) -> bool {
        match subject {
            GrantSubject::User(id) => self.users.contains_key(&id),
            GrantSubject::Group(id) => self.groups.contains_key(&id),
            GrantSubject::Organisation(id) => self.organisations.contains_key(&id),
        }
    }
}

/// In-memory access storage for tests, the CLI and single-process deployments.
///
/// Every relation lives behind one lock, so a single write guard makes a
/// multi-row change atomic for readers.
pub struct MemoryAccessStorage {
    state: RwLock<MemoryState>,
}

impl MemoryAccessStorage {
    /// Create a new, empty in-memory storage.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Build a storage from a snapshot, checking referential integrity.
    pub fn from_snapshot(snapshot: AccessSnapshot) -> Result<Self> {
        let mut state = MemoryState::default();

        for user in snapshot.users {
            state.users.insert(user.id, user);
        }
        for group in snapshot.groups {
            state.groups.insert(group.id, group);
        }
        for organisation in snapshot.organisations {
            state.organisations.insert(organisation.id, organisation);
        }
        for case in snapshot.cases {
            state.cases.insert(case.id, case);
        }

        for row in snapshot.group_memberships {
            if !state.groups.contains_key(&row.group_id) || !state.users.contains_key(&row.user_id)
            {
                return Err(StorageError::Conflict(format!(
                    "group membership {}/{} references a missing entity",
                    row.group_id, row.user_id
                ))
                .into());
            }
            state.group_members.insert((row.group_id, row.user_id));
        }
        for row in snapshot.organisation_memberships {
            if !state.organisations.contains_key(&row.organisation_id)
                || !state.users.contains_key(&row.user_id)
            {
                return Err(StorageError::Conflict(format!(
                    "organisation membership {}/{} references a missing entity",
                    row.organisation_id, row.user_id
                ))
                .into());
            }
            state
                .organisation_members
                .insert((row.organisation_id, row.user_id), row.is_primary);
        }

        for grant in snapshot.grants {
            if !state.subject_exists(grant.subject) || !state.cases.contains_key(&grant.case_id) {
                return Err(StorageError::Conflict(format!(
                    "grant {} on case {} references a missing entity",
                    grant.subject, grant.case_id
                ))
                .into());
            }
            insert_grant(&mut state, grant);
        }

        for row in snapshot.effective_access {
            state.effective.insert((row.user_id, row.case_id), row.access_level);
        }

        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Export the full storage state.
    pub fn snapshot(&self) -> AccessSnapshot {
        let state = self.state.read();

        let grants = state
            .user_grants
            .values()
            .chain(state.group_grants.values())
            .chain(state.organisation_grants.values())
            .cloned()
            .collect();

        AccessSnapshot {
            users: state.users.values().cloned().collect(),
            groups: state.groups.values().cloned().collect(),
            organisations: state.organisations.values().cloned().collect(),
            cases: state.cases.values().cloned().collect(),
            group_memberships: state
                .group_members
                .iter()
                .map(|(group_id, user_id)| GroupMembershipRow {
                    group_id: *group_id,
                    user_id: *user_id,
                })
                .collect(),
            organisation_memberships: state
                .organisation_members
                .iter()
                .map(|((organisation_id, user_id), is_primary)| OrganisationMembershipRow {
                    organisation_id: *organisation_id,
                    user_id: *user_id,
                    is_primary: *is_primary,
                })
                .collect(),
            grants,
            effective_access: state
                .effective
                .iter()
                .map(|((user_id, case_id), access_level)| EffectiveAccessRow {
                    user_id: *user_id,
                    case_id: *case_id,
                    access_level: *access_level,
                })
                .collect(),
            ..AccessSnapshot::default()
        }
    }
}

impl Default for MemoryAccessStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_grant(state: &mut MemoryState, grant: CaseGrant) -> Option<CaseAccessLevel> {
    let case_id = grant.case_id;
    let previous = match grant.subject {
        GrantSubject::User(id) => state.user_grants.insert((id, case_id), grant),
        GrantSubject::Group(id) => state.group_grants.insert((id, case_id), grant),
        GrantSubject::Organisation(id) => state.organisation_grants.insert((id, case_id), grant),
    };
    previous.map(|g| g.access_level)
}

#[async_trait]
impl AccessStorage for MemoryAccessStorage {
    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.state.read().users.get(&user_id).cloned())
    }

    async fn insert_user(&self, user: User) -> Result<()> {
        let mut state = self.state.write();
        if state.users.contains_key(&user.id) {
            return Err(StorageError::Conflict(format!("user {} already exists", user.id)).into());
        }
        state.users.insert(user.id, user);
        Ok(())
    }

    async fn delete_user(&self, user_id: UserId) -> Result<()> {
        let mut state = self.state.write();
        if state.users.remove(&user_id).is_none() {
            return Err(StorageError::NotFound(format!("user {}", user_id)).into());
        }
        state.group_members.retain(|(_, u)| *u != user_id);
        state.organisation_members.retain(|(_, u), _| *u != user_id);
        state.user_grants.retain(|(u, _), _| *u != user_id);
        state.effective.retain(|(u, _), _| *u != user_id);
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserId>> {
        Ok(self.state.read().users.keys().copied().collect())
    }

    async fn get_group(&self, group_id: GroupId) -> Result<Option<Group>> {
        Ok(self.state.read().groups.get(&group_id).cloned())
    }

    async fn put_group(&self, group: Group) -> Result<()> {
        self.state.write().groups.insert(group.id, group);
        Ok(())
    }

    async fn delete_group(&self, group_id: GroupId) -> Result<()> {
        let mut state = self.state.write();
        if state.groups.remove(&group_id).is_none() {
            return Err(StorageError::NotFound(format!("group {}", group_id)).into());
        }
        state.group_members.retain(|(g, _)| *g != group_id);
        state.group_grants.retain(|(g, _), _| *g != group_id);
        Ok(())
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        Ok(self.state.read().groups.values().cloned().collect())
    }

    async fn get_organisation(
        &self,
        organisation_id: OrganisationId,
    ) -> Result<Option<Organisation>> {
        Ok(self.state.read().organisations.get(&organisation_id).cloned())
    }

    async fn put_organisation(&self, organisation: Organisation) -> Result<()> {
        self.state
            .write()
            .organisations
            .insert(organisation.id, organisation);
        Ok(())
    }

    async fn delete_organisation(&self, organisation_id: OrganisationId) -> Result<()> {
        let mut state = self.state.write();
        if state.organisations.remove(&organisation_id).is_none() {
            return Err(StorageError::NotFound(format!("organisation {}", organisation_id)).into());
        }
        state.organisation_members.retain(|(o, _), _| *o != organisation_id);
        state.organisation_grants.retain(|(o, _), _| *o != organisation_id);
        for case in state.cases.values_mut() {
            if case.organisation_id == Some(organisation_id) {
                case.organisation_id = None;
            }
        }
        Ok(())
    }

    async fn get_case(&self, case_id: CaseId) -> Result<Option<Case>> {
        Ok(self.state.read().cases.get(&case_id).cloned())
    }

    async fn put_case(&self, case: Case) -> Result<()> {
        self.state.write().cases.insert(case.id, case);
        Ok(())
    }

    async fn delete_case(&self, case_id: CaseId) -> Result<()> {
        let mut state = self.state.write();
        if state.cases.remove(&case_id).is_none() {
            return Err(StorageError::NotFound(format!("case {}", case_id)).into());
        }
        state.user_grants.retain(|(_, c), _| *c != case_id);
        state.group_grants.retain(|(_, c), _| *c != case_id);
        state.organisation_grants.retain(|(_, c), _| *c != case_id);
        Ok(())
    }

    async fn list_cases(&self) -> Result<Vec<CaseId>> {
        Ok(self.state.read().cases.keys().copied().collect())
    }

    async fn groups_of(&self, user_id: UserId) -> Result<Vec<GroupId>> {
        let state = self.state.read();
        Ok(state
            .group_members
            .iter()
            .filter(|(_, u)| *u == user_id)
            .map(|(g, _)| *g)
            .collect())
    }

    async fn group_members(&self, group_id: GroupId) -> Result<Vec<UserId>> {
        let state = self.state.read();
        Ok(state
            .group_members
            .range((group_id, UserId(i64::MIN))..=(group_id, UserId(i64::MAX)))
            .map(|(_, u)| *u)
            .collect())
    }

    async fn add_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        Ok(self.state.write().group_members.insert((group_id, user_id)))
    }

    async fn remove_group_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        Ok(self.state.write().group_members.remove(&(group_id, user_id)))
    }

    async fn organisations_of(&self, user_id: UserId) -> Result<Vec<OrganisationMembership>> {
        let state = self.state.read();
        Ok(state
            .organisation_members
            .iter()
            .filter(|((_, u), _)| *u == user_id)
            .map(|((o, _), is_primary)| OrganisationMembership {
                organisation_id: *o,
                is_primary: *is_primary,
            })
            .collect())
    }

    async fn organisation_members(&self, organisation_id: OrganisationId) -> Result<Vec<UserId>> {
        let state = self.state.read();
        Ok(state
            .organisation_members
            .range((organisation_id, UserId(i64::MIN))..=(organisation_id, UserId(i64::MAX)))
            .map(|((_, u), _)| *u)
            .collect())
    }

    async fn add_organisation_member(
        &self,
        organisation_id: OrganisationId,
        user_id: UserId,
        is_primary: bool,
    ) -> Result<bool> {
        let mut state = self.state.write();
        if state
            .organisation_members
            .contains_key(&(organisation_id, user_id))
        {
            return Ok(false);
        }
        if is_primary {
            for ((_, u), primary) in state.organisation_members.iter_mut() {
                if *u == user_id {
                    *primary = false;
                }
            }
        }
        state
            .organisation_members
            .insert((organisation_id, user_id), is_primary);
        Ok(true)
    }

    async fn remove_organisation_member(
        &self,
        organisation_id: OrganisationId,
        user_id: UserId,
    ) -> Result<bool> {
        Ok(self
            .state
            .write()
            .organisation_members
            .remove(&(organisation_id, user_id))
            .is_some())
    }

    async fn set_primary_organisation(
        &self,
        user_id: UserId,
        organisation_id: OrganisationId,
    ) -> Result<()> {
        let mut state = self.state.write();
        if !state
            .organisation_members
            .contains_key(&(organisation_id, user_id))
        {
            return Err(StorageError::NotFound(format!(
                "membership of user {} in organisation {}",
                user_id, organisation_id
            ))
            .into());
        }
        for ((o, u), primary) in state.organisation_members.iter_mut() {
            if *u == user_id {
                *primary = *o == organisation_id;
            }
        }
        Ok(())
    }

    async fn user_case_grants(&self, user_id: UserId) -> Result<Vec<CaseGrant>> {
        let state = self.state.read();
        Ok(state
            .user_grants
            .range((user_id, CaseId(i64::MIN))..=(user_id, CaseId(i64::MAX)))
            .map(|(_, grant)| grant.clone())
            .collect())
    }

    async fn group_case_grants(&self, group_ids: &[GroupId]) -> Result<Vec<CaseGrant>> {
        let state = self.state.read();
        let mut grants = Vec::new();
        for group_id in group_ids {
            grants.extend(
                state
                    .group_grants
                    .range((*group_id, CaseId(i64::MIN))..=(*group_id, CaseId(i64::MAX)))
                    .map(|(_, grant)| grant.clone()),
            );
        }
        Ok(grants)
    }

    async fn organisation_case_grants(
        &self,
        organisation_ids: &[OrganisationId],
    ) -> Result<Vec<CaseGrant>> {
        let state = self.state.read();
        let mut grants = Vec::new();
        for organisation_id in organisation_ids {
            grants.extend(
                state
                    .organisation_grants
                    .range(
                        (*organisation_id, CaseId(i64::MIN))..=(*organisation_id, CaseId(i64::MAX)),
                    )
                    .map(|(_, grant)| grant.clone()),
            );
        }
        Ok(grants)
    }

    async fn case_grants(&self, case_id: CaseId) -> Result<Vec<CaseGrant>> {
        let state = self.state.read();
        Ok(state
            .user_grants
            .values()
            .chain(state.group_grants.values())
            .chain(state.organisation_grants.values())
            .filter(|grant| grant.case_id == case_id)
            .cloned()
            .collect())
    }

    async fn get_grant(&self, subject: GrantSubject, case_id: CaseId) -> Result<Option<CaseGrant>> {
        let state = self.state.read();
        let grant = match subject {
            GrantSubject::User(id) => state.user_grants.get(&(id, case_id)),
            GrantSubject::Group(id) => state.group_grants.get(&(id, case_id)),
            GrantSubject::Organisation(id) => state.organisation_grants.get(&(id, case_id)),
        };
        Ok(grant.cloned())
    }

    async fn put_grant(&self, grant: CaseGrant) -> Result<Option<CaseAccessLevel>> {
        let mut state = self.state.write();
        if !state.subject_exists(grant.subject) {
            return Err(StorageError::NotFound(grant.subject.to_string()).into());
        }
        if !state.cases.contains_key(&grant.case_id) {
            return Err(StorageError::NotFound(format!("case {}", grant.case_id)).into());
        }
        Ok(insert_grant(&mut state, grant))
    }

    async fn remove_grant(
        &self,
        subject: GrantSubject,
        case_id: CaseId,
    ) -> Result<Option<CaseGrant>> {
        let mut state = self.state.write();
        let removed = match subject {
            GrantSubject::User(id) => state.user_grants.remove(&(id, case_id)),
            GrantSubject::Group(id) => state.group_grants.remove(&(id, case_id)),
            GrantSubject::Organisation(id) => state.organisation_grants.remove(&(id, case_id)),
        };
        Ok(removed)
    }

    async fn effective_access(
        &self,
        user_id: UserId,
        case_id: CaseId,
    ) -> Result<Option<CaseAccessLevel>> {
        Ok(self.state.read().effective.get(&(user_id, case_id)).copied())
    }

    async fn effective_access_for_user(&self, user_id: UserId) -> Result<AccessMap> {
        let state = self.state.read();
        Ok(state
            .effective
            .range((user_id, CaseId(i64::MIN))..=(user_id, CaseId(i64::MAX)))
            .map(|((_, case_id), level)| (*case_id, *level))
            .collect())
    }

    async fn users_with_access_to(&self, case_id: CaseId) -> Result<Vec<UserId>> {
        let state = self.state.read();
        Ok(state
            .effective
            .keys()
            .filter(|(_, c)| *c == case_id)
            .map(|(u, _)| *u)
            .collect())
    }

    async fn apply_access_diff(&self, user_id: UserId, diff: &AccessDiff) -> Result<()> {
        let mut state = self.state.write();

        // Validate before the first write so a rejected diff leaves nothing behind.
        let writes_rows = !diff.inserts.is_empty() || !diff.updates.is_empty();
        if writes_rows && !state.users.contains_key(&user_id) {
            return Err(StorageError::NotFound(format!("user {}", user_id)).into());
        }
        for (case_id, _) in diff.inserts.iter().chain(diff.updates.iter()) {
            if !state.cases.contains_key(case_id) {
                return Err(StorageError::NotFound(format!("case {}", case_id)).into());
            }
        }

        for case_id in &diff.deletes {
            state.effective.remove(&(user_id, *case_id));
        }
        for (case_id, level) in diff.inserts.iter().chain(diff.updates.iter()) {
            state.effective.insert((user_id, *case_id), *level);
        }
        Ok(())
    }

    async fn clear_effective_access(&self) -> Result<usize> {
        let mut state = self.state.write();
        let removed = state.effective.len();
        state.effective.clear();
        Ok(removed)
    }
}
