//! Access-control mutations and the synchronization they trigger.
//!
//! Every operation that can change a user's effective access goes through
//! [`AccessManager`]. Each one validates its targets, applies the change,
//! then synchronizes every user the change could reach. A single writer
//! lock is held across the change and its synchronization, so two
//! mutations never interleave.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    AccessChecker, AccessGuard, AccessResolver, AccessStorage, Case, CaseAccessLevel, CaseGrant,
    CaseId, EffectiveAccessMaterializer, GrantSubject, Group, GroupId, Organisation,
    OrganisationId, Permission, RequestContext, SyncReport, SyncSummary, User, UserId,
};
use crate::config::AccessConfig;
use crate::error::{AccessError, Result, StorageError};

/// Outcome of [`AccessManager::bootstrap`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapReport {
    /// Default groups created during this bootstrap.
    pub created_groups: Vec<String>,
    /// Cache rebuild totals, when a rebuild ran.
    pub rebuild: Option<SyncSummary>,
}

/// A change that could strip the acting user of server administration.
#[derive(Debug, Clone, Copy)]
enum MembershipChange {
    LeaveGroup(GroupId),
    DeleteGroup(GroupId),
    SetGroupPermissions(GroupId, Permission),
}

/// Mutation surface of the access-control engine.
pub struct AccessManager {
    storage: Arc<dyn AccessStorage>,
    materializer: EffectiveAccessMaterializer,
    checker: Arc<AccessChecker>,
    config: AccessConfig,
    write_lock: Mutex<()>,
}

impl AccessManager {
    /// Create a new access manager.
    pub fn new(storage: Arc<dyn AccessStorage>, config: AccessConfig) -> Self {
        Self {
            materializer: EffectiveAccessMaterializer::new(storage.clone()),
            checker: Arc::new(AccessChecker::new(storage.clone())),
            storage,
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// The underlying storage.
    pub fn storage(&self) -> &Arc<dyn AccessStorage> {
        &self.storage
    }

    /// The fast-path checker.
    pub fn checker(&self) -> &Arc<AccessChecker> {
        &self.checker
    }

    /// The resolver.
    pub fn resolver(&self) -> &AccessResolver {
        self.materializer.resolver()
    }

    /// The materializer.
    pub fn materializer(&self) -> &EffectiveAccessMaterializer {
        &self.materializer
    }

    /// Create default groups and optionally rebuild the cache.
    pub async fn bootstrap(&self) -> Result<BootstrapReport> {
        let _guard = self.write_lock.lock().await;
        let mut report = BootstrapReport::default();

        let existing = self.storage.list_groups().await?;
        let mut next_id = existing.iter().map(|g| g.id.0).max().unwrap_or(0) + 1;

        for default in &self.config.default_groups {
            if existing.iter().any(|g| g.name == default.name) {
                continue;
            }
            let mut group = Group::new(next_id, default.name.clone(), default.permission_mask()?);
            if default.auto_follow {
                group = group.with_auto_follow(default.auto_follow_level()?);
            }
            next_id += 1;

            info!(group_id = %group.id, name = %group.name, "Creating default group");
            let level = group.auto_follow_level();
            let group_id = group.id;
            self.storage.put_group(group).await?;
            if let Some(level) = level {
                self.seed_auto_follow(group_id, level, None).await?;
            }
            report.created_groups.push(default.name.clone());
        }

        if self.config.sync_on_startup {
            report.rebuild = Some(self.materializer.rebuild_all().await?);
        }

        Ok(report)
    }

    // -- request context --

    /// Effective permission mask of a user: the union of their groups' masks.
    pub async fn effective_permissions(&self, user_id: UserId) -> Result<Permission> {
        self.permissions_after(user_id, None).await
    }

    /// Build the per-request context for an authenticated user.
    pub async fn request_context(&self, user_id: UserId) -> Result<RequestContext> {
        self.ensure_user(user_id).await?;
        let permissions = self.effective_permissions(user_id).await?;
        Ok(RequestContext::new(user_id, permissions))
    }

    /// Guard enforcing case access for one request.
    pub fn guard(&self, context: RequestContext) -> AccessGuard {
        AccessGuard::new(self.checker.clone(), context)
    }

    /// Fast-path case access check.
    pub async fn check_case_access(
        &self,
        user_id: UserId,
        case_id: CaseId,
        required: CaseAccessLevel,
    ) -> Result<Option<CaseAccessLevel>> {
        self.checker.check_case_access(user_id, case_id, required).await
    }

    // -- explicit synchronization --

    /// Recompute one user's effective access.
    pub async fn synchronize(&self, user_id: UserId) -> Result<SyncReport> {
        let _guard = self.write_lock.lock().await;
        self.materializer.synchronize(user_id).await
    }

    /// Recompute every user's effective access.
    pub async fn synchronize_all(&self) -> Result<SyncSummary> {
        let _guard = self.write_lock.lock().await;
        self.materializer.synchronize_all().await
    }

    /// Clear and rebuild the whole cache.
    pub async fn rebuild_all(&self) -> Result<SyncSummary> {
        let _guard = self.write_lock.lock().await;
        self.materializer.rebuild_all().await
    }

    // -- grants --

    /// Grant a subject a level on a case, replacing any previous grant.
    pub async fn grant_case_access(
        &self,
        subject: GrantSubject,
        case_id: CaseId,
        level: CaseAccessLevel,
    ) -> Result<Vec<SyncReport>> {
        let _guard = self.write_lock.lock().await;

        self.ensure_subject(subject).await?;
        self.ensure_case(case_id).await?;
        if level.is_empty() {
            return Err(AccessError::EmptyAccessLevel(format!(
                "grant for {} on case {}",
                subject, case_id
            ))
            .into());
        }

        let previous = self
            .storage
            .put_grant(CaseGrant::new(subject, case_id, level))
            .await?;
        info!(
            subject = %subject,
            case_id = %case_id,
            level = %level,
            previous = ?previous.map(|l| l.to_string()),
            "Granted case access"
        );

        let users = self.users_reached_by(subject).await?;
        self.materializer.synchronize_users(&users).await
    }

    /// Remove a subject's grant on a case.
    pub async fn revoke_case_access(
        &self,
        subject: GrantSubject,
        case_id: CaseId,
    ) -> Result<Vec<SyncReport>> {
        let _guard = self.write_lock.lock().await;

        self.ensure_subject(subject).await?;
        self.ensure_case(case_id).await?;

        if self.storage.remove_grant(subject, case_id).await?.is_none() {
            debug!(subject = %subject, case_id = %case_id, "No grant to revoke");
            return Ok(Vec::new());
        }
        info!(subject = %subject, case_id = %case_id, "Revoked case access");

        let users = self.users_reached_by(subject).await?;
        self.materializer.synchronize_users(&users).await
    }

    // -- cases --

    /// Register a new case and seed its default grants.
    ///
    /// Every target is validated before the case is written, so a rejected
    /// call leaves no case behind.
    pub async fn create_case(&self, case: Case, owner: Option<UserId>) -> Result<Vec<SyncReport>> {
        let _guard = self.write_lock.lock().await;
        let organisation_id = case.organisation_id;
        let case_id = case.id;

        if self.storage.get_case(case_id).await?.is_some() {
            return Err(StorageError::Conflict(format!("case {} already exists", case_id)).into());
        }
        let grants = self.new_case_grants(owner, case_id, organisation_id).await?;

        self.storage.put_case(case).await?;
        self.write_seed_grants(case_id, grants).await
    }

    /// Seed the grants of a freshly created case.
    ///
    /// The owner receives the creator level, the organisation receives the
    /// organisation level, and every auto-follow group receives its own level.
    pub async fn set_new_case_access(
        &self,
        owner: Option<UserId>,
        case_id: CaseId,
        organisation_id: Option<OrganisationId>,
    ) -> Result<Vec<SyncReport>> {
        let _guard = self.write_lock.lock().await;
        self.ensure_case(case_id).await?;
        let grants = self.new_case_grants(owner, case_id, organisation_id).await?;
        self.write_seed_grants(case_id, grants).await
    }

    /// Delete a case and drop it from every cache row.
    pub async fn delete_case(&self, case_id: CaseId) -> Result<Vec<SyncReport>> {
        let _guard = self.write_lock.lock().await;
        self.ensure_case(case_id).await?;

        let mut users = self.storage.users_with_access_to(case_id).await?;
        for grant in self.storage.case_grants(case_id).await? {
            users.extend(self.users_reached_by(grant.subject).await?);
        }

        self.storage.delete_case(case_id).await?;
        info!(case_id = %case_id, "Deleted case");
        self.materializer.synchronize_users(&users).await
    }

    // -- users --

    /// Register a user with a primary organisation.
    pub async fn create_user(
        &self,
        user: User,
        primary_organisation: OrganisationId,
    ) -> Result<SyncReport> {
        let _guard = self.write_lock.lock().await;
        self.ensure_organisation(primary_organisation).await?;

        let user_id = user.id;
        self.storage.insert_user(user).await?;
        self.storage
            .add_organisation_member(primary_organisation, user_id, true)
            .await?;
        self.materializer.synchronize(user_id).await
    }

    /// Remove a user and everything that references them.
    pub async fn delete_user(&self, actor: &RequestContext, user_id: UserId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_user(user_id).await?;
        if actor.user_id == user_id {
            return Err(AccessError::SelfLockoutRejected(format!(
                "user {} cannot delete their own account",
                user_id
            ))
            .into());
        }

        for group_id in self.storage.groups_of(user_id).await? {
            self.storage.remove_group_member(group_id, user_id).await?;
        }
        for membership in self.storage.organisations_of(user_id).await? {
            self.storage
                .remove_organisation_member(membership.organisation_id, user_id)
                .await?;
        }
        for grant in self.storage.user_case_grants(user_id).await? {
            self.storage.remove_grant(grant.subject, grant.case_id).await?;
        }

        // Empties the user's cache rows before the record goes away.
        self.materializer.synchronize(user_id).await?;
        self.storage.delete_user(user_id).await?;
        info!(user_id = %user_id, "Deleted user");
        Ok(())
    }

    // -- groups --

    /// Register a group. An auto-follow group is seeded on every existing case.
    pub async fn create_group(&self, group: Group) -> Result<Vec<SyncReport>> {
        let _guard = self.write_lock.lock().await;
        if self.storage.get_group(group.id).await?.is_some() {
            return Err(StorageError::Conflict(format!("group {} already exists", group.id)).into());
        }

        if group.auto_follow && group.auto_follow_level().is_none() {
            return Err(AccessError::EmptyAccessLevel(format!(
                "auto-follow level of group {}",
                group.id
            ))
            .into());
        }

        let group_id = group.id;
        let level = group.auto_follow_level();
        self.storage.put_group(group).await?;
        if let Some(level) = level {
            self.seed_auto_follow(group_id, level, None).await?;
        }
        // A new group has no members yet.
        Ok(Vec::new())
    }

    /// Delete a group, its memberships and its grants.
    pub async fn delete_group(
        &self,
        actor: &RequestContext,
        group_id: GroupId,
    ) -> Result<Vec<SyncReport>> {
        let _guard = self.write_lock.lock().await;
        self.ensure_group(group_id).await?;
        self.ensure_no_self_lockout(actor, MembershipChange::DeleteGroup(group_id))
            .await?;

        let members = self.storage.group_members(group_id).await?;
        self.storage.delete_group(group_id).await?;
        info!(group_id = %group_id, members = members.len(), "Deleted group");
        self.materializer.synchronize_users(&members).await
    }

    /// Add a user to a group.
    pub async fn add_user_to_group(
        &self,
        user_id: UserId,
        group_id: GroupId,
    ) -> Result<SyncReport> {
        let _guard = self.write_lock.lock().await;
        self.ensure_user(user_id).await?;
        self.ensure_group(group_id).await?;

        if self.storage.add_group_member(group_id, user_id).await? {
            info!(user_id = %user_id, group_id = %group_id, "Added user to group");
        }
        self.materializer.synchronize(user_id).await
    }

    /// Remove a user from a group.
    pub async fn remove_user_from_group(
        &self,
        actor: &RequestContext,
        user_id: UserId,
        group_id: GroupId,
    ) -> Result<SyncReport> {
        let _guard = self.write_lock.lock().await;
        self.ensure_user(user_id).await?;
        self.ensure_group(group_id).await?;
        if actor.user_id == user_id {
            self.ensure_no_self_lockout(actor, MembershipChange::LeaveGroup(group_id))
                .await?;
        }

        if self.storage.remove_group_member(group_id, user_id).await? {
            info!(user_id = %user_id, group_id = %group_id, "Removed user from group");
        }
        self.materializer.synchronize(user_id).await
    }

    /// Replace a group's permission mask.
    pub async fn set_group_permissions(
        &self,
        actor: &RequestContext,
        group_id: GroupId,
        permissions: Permission,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut group = self.ensure_group(group_id).await?;
        self.ensure_no_self_lockout(
            actor,
            MembershipChange::SetGroupPermissions(group_id, permissions),
        )
        .await?;

        info!(
            group_id = %group_id,
            from = %group.permissions,
            to = %permissions,
            "Updated group permissions"
        );
        group.permissions = permissions;
        self.storage.put_group(group).await
    }

    /// Turn a group's auto-follow policy on or off.
    ///
    /// Enabling or changing the level persists a group grant at `level` on
    /// every existing case, except where the group holds an explicit grant.
    /// Disabling keeps the grants already written.
    pub async fn set_group_auto_follow(
        &self,
        group_id: GroupId,
        enabled: bool,
        level: CaseAccessLevel,
    ) -> Result<Vec<SyncReport>> {
        let _guard = self.write_lock.lock().await;
        let mut group = self.ensure_group(group_id).await?;

        if enabled && level.is_empty() {
            return Err(AccessError::EmptyAccessLevel(format!(
                "auto-follow level of group {}",
                group_id
            ))
            .into());
        }

        let previous = group.auto_follow_level();
        group.auto_follow = enabled;
        group.auto_follow_access_level = enabled.then_some(level);
        self.storage.put_group(group).await?;

        if !enabled {
            info!(group_id = %group_id, "Disabled auto-follow");
            return Ok(Vec::new());
        }

        self.seed_auto_follow(group_id, level, previous).await?;
        let members = self.storage.group_members(group_id).await?;
        self.materializer.synchronize_users(&members).await
    }

    // -- organisations --

    /// Register an organisation.
    pub async fn create_organisation(&self, organisation: Organisation) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.storage.get_organisation(organisation.id).await?.is_some() {
            return Err(StorageError::Conflict(format!(
                "organisation {} already exists",
                organisation.id
            ))
            .into());
        }
        self.storage.put_organisation(organisation).await
    }

    /// Delete an organisation. Rejected while it is any user's primary organisation.
    pub async fn delete_organisation(
        &self,
        organisation_id: OrganisationId,
    ) -> Result<Vec<SyncReport>> {
        let _guard = self.write_lock.lock().await;
        self.ensure_organisation(organisation_id).await?;

        let members = self.storage.organisation_members(organisation_id).await?;
        for user_id in &members {
            self.ensure_not_primary(*user_id, organisation_id).await?;
        }

        self.storage.delete_organisation(organisation_id).await?;
        info!(organisation_id = %organisation_id, "Deleted organisation");
        self.materializer.synchronize_users(&members).await
    }

    /// Add a user to an organisation. The first membership becomes primary.
    pub async fn add_user_to_organisation(
        &self,
        user_id: UserId,
        organisation_id: OrganisationId,
    ) -> Result<SyncReport> {
        let _guard = self.write_lock.lock().await;
        self.ensure_user(user_id).await?;
        self.ensure_organisation(organisation_id).await?;

        let is_primary = self.storage.organisations_of(user_id).await?.is_empty();
        if self
            .storage
            .add_organisation_member(organisation_id, user_id, is_primary)
            .await?
        {
            info!(
                user_id = %user_id,
                organisation_id = %organisation_id,
                is_primary,
                "Added user to organisation"
            );
        }
        self.materializer.synchronize(user_id).await
    }

    /// Remove a user from a non-primary organisation.
    pub async fn remove_user_from_organisation(
        &self,
        user_id: UserId,
        organisation_id: OrganisationId,
    ) -> Result<SyncReport> {
        let _guard = self.write_lock.lock().await;
        self.ensure_user(user_id).await?;
        self.ensure_organisation(organisation_id).await?;
        self.ensure_not_primary(user_id, organisation_id).await?;

        if !self
            .storage
            .remove_organisation_member(organisation_id, user_id)
            .await?
        {
            return Err(StorageError::NotFound(format!(
                "membership of user {} in organisation {}",
                user_id, organisation_id
            ))
            .into());
        }
        info!(
            user_id = %user_id,
            organisation_id = %organisation_id,
            "Removed user from organisation"
        );
        self.materializer.synchronize(user_id).await
    }

    /// Designate one of a user's organisations as primary.
    pub async fn set_primary_organisation(
        &self,
        user_id: UserId,
        organisation_id: OrganisationId,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_user(user_id).await?;
        self.ensure_organisation(organisation_id).await?;
        self.storage
            .set_primary_organisation(user_id, organisation_id)
            .await
    }

    // -- helpers (caller holds the write lock) --

    /// Persist the auto-follow grant on every existing case.
    ///
    /// Cases without a group grant get one at `level`. Grants still at the
    /// `previous` auto-follow level move to `level`. Any other grant was set
    /// explicitly and is kept.
    async fn seed_auto_follow(
        &self,
        group_id: GroupId,
        level: CaseAccessLevel,
        previous: Option<CaseAccessLevel>,
    ) -> Result<usize> {
        let subject = GrantSubject::Group(group_id);
        let mut seeded = 0;
        for case_id in self.storage.list_cases().await? {
            let stale = match self.storage.get_grant(subject, case_id).await? {
                None => true,
                Some(grant) => {
                    previous == Some(grant.access_level) && grant.access_level != level
                }
            };
            if stale {
                self.storage
                    .put_grant(CaseGrant::new(subject, case_id, level))
                    .await?;
                seeded += 1;
            }
        }
        info!(group_id = %group_id, seeded, level = %level, "Seeded auto-follow grants");
        Ok(seeded)
    }

    /// Validate the targets of a new case and list the grants it receives.
    async fn new_case_grants(
        &self,
        owner: Option<UserId>,
        case_id: CaseId,
        organisation_id: Option<OrganisationId>,
    ) -> Result<Vec<CaseGrant>> {
        let mut grants = Vec::new();

        if let Some(owner) = owner {
            self.ensure_user(owner).await?;
            let level = self.config.creator_level()?;
            grants.push(CaseGrant::new(GrantSubject::User(owner), case_id, level));
        }

        if let Some(organisation_id) = organisation_id {
            self.ensure_organisation(organisation_id).await?;
            let level = self.config.organisation_level()?;
            if !level.is_empty() {
                let subject = GrantSubject::Organisation(organisation_id);
                grants.push(CaseGrant::new(subject, case_id, level));
            }
        }

        for group in self.storage.list_groups().await? {
            if let Some(level) = group.auto_follow_level() {
                grants.push(CaseGrant::new(GrantSubject::Group(group.id), case_id, level));
            }
        }

        Ok(grants)
    }

    /// Write validated seed grants and synchronize the users they reach.
    ///
    /// If a write fails, the users reached by the grants already written are
    /// still synchronized before the error is returned.
    async fn write_seed_grants(
        &self,
        case_id: CaseId,
        grants: Vec<CaseGrant>,
    ) -> Result<Vec<SyncReport>> {
        let mut users = Vec::new();
        for grant in grants {
            let subject = grant.subject;
            if let Err(err) = self.storage.put_grant(grant).await {
                warn!(case_id = %case_id, subject = %subject, "Seeding case access failed");
                self.materializer.synchronize_users(&users).await?;
                return Err(err);
            }
            users.extend(self.users_reached_by(subject).await?);
        }

        info!(case_id = %case_id, users = users.len(), "Seeded new case access");
        self.materializer.synchronize_users(&users).await
    }

    async fn users_reached_by(&self, subject: GrantSubject) -> Result<Vec<UserId>> {
        match subject {
            GrantSubject::User(user_id) => Ok(vec![user_id]),
            GrantSubject::Group(group_id) => self.storage.group_members(group_id).await,
            GrantSubject::Organisation(organisation_id) => {
                self.storage.organisation_members(organisation_id).await
            }
        }
    }

    async fn permissions_after(
        &self,
        user_id: UserId,
        change: Option<MembershipChange>,
    ) -> Result<Permission> {
        let mut masks = Vec::new();
        for group_id in self.storage.groups_of(user_id).await? {
            let mask = match change {
                Some(MembershipChange::LeaveGroup(id)) | Some(MembershipChange::DeleteGroup(id))
                    if id == group_id =>
                {
                    continue
                }
                Some(MembershipChange::SetGroupPermissions(id, permissions)) if id == group_id => {
                    permissions
                }
                _ => match self.storage.get_group(group_id).await? {
                    Some(group) => group.permissions,
                    None => continue,
                },
            };
            masks.push(mask);
        }
        Ok(Permission::effective(masks))
    }

    async fn ensure_no_self_lockout(
        &self,
        actor: &RequestContext,
        change: MembershipChange,
    ) -> Result<()> {
        let before = self.permissions_after(actor.user_id, None).await?;
        if !before.contains(Permission::SERVER_ADMINISTRATOR) {
            return Ok(());
        }
        let after = self.permissions_after(actor.user_id, Some(change)).await?;
        if after.contains(Permission::SERVER_ADMINISTRATOR) {
            return Ok(());
        }

        warn!(
            user_id = %actor.user_id,
            correlation_id = %actor.correlation_id,
            change = ?change,
            "Rejected change that would remove the actor's own administration rights"
        );
        Err(AccessError::SelfLockoutRejected(format!(
            "user {} would lose server administration",
            actor.user_id
        ))
        .into())
    }

    async fn ensure_not_primary(
        &self,
        user_id: UserId,
        organisation_id: OrganisationId,
    ) -> Result<()> {
        let is_primary = self
            .storage
            .organisations_of(user_id)
            .await?
            .iter()
            .any(|m| m.organisation_id == organisation_id && m.is_primary);
        if is_primary {
            return Err(AccessError::PrimaryOrganisation {
                user_id,
                organisation_id,
            }
            .into());
        }
        Ok(())
    }

    async fn ensure_user(&self, user_id: UserId) -> Result<User> {
        self.storage
            .get_user(user_id)
            .await?
            .ok_or_else(|| {
                AccessError::InvalidGrantTarget(format!("user {} does not exist", user_id)).into()
            })
    }

    async fn ensure_group(&self, group_id: GroupId) -> Result<Group> {
        self.storage
            .get_group(group_id)
            .await?
            .ok_or_else(|| {
                AccessError::InvalidGrantTarget(format!("group {} does not exist", group_id)).into()
            })
    }

    async fn ensure_organisation(&self, organisation_id: OrganisationId) -> Result<Organisation> {
        self.storage
            .get_organisation(organisation_id)
            .await?
            .ok_or_else(|| {
                AccessError::InvalidGrantTarget(format!(
                    "organisation {} does not exist",
                    organisation_id
                ))
                .into()
            })
    }

    async fn ensure_case(&self, case_id: CaseId) -> Result<Case> {
        self.storage
            .get_case(case_id)
            .await?
            .ok_or_else(|| {
                AccessError::InvalidGrantTarget(format!("case {} does not exist", case_id)).into()
            })
    }

    async fn ensure_subject(&self, subject: GrantSubject) -> Result<()> {
        match subject {
            GrantSubject::User(id) => self.ensure_user(id).await.map(|_| ()),
            GrantSubject::Group(id) => self.ensure_group(id).await.map(|_| ()),
            GrantSubject::Organisation(id) => self.ensure_organisation(id).await.map(|_| ()),
        }
    }
}
