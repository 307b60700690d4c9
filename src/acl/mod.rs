//! Case access-control engine.
//!
//! Decides whether a user may read or write a case, and maintains the
//! materialized effective-access view that makes that decision a single
//! lookup. Three grant sources feed the view:
//!
//! - user grants (highest precedence)
//! - group grants, including auto-follow group policies
//! - organisation grants (lowest precedence)
//!
//! The [`AccessResolver`] computes the target view for one user, the
//! [`EffectiveAccessMaterializer`] reconciles the stored view with it, and
//! the [`AccessChecker`] reads the stored view on every request.
//! [`AccessManager`] is the mutation surface that keeps the view in sync.

mod checker;
mod guard;
mod levels;
mod manager;
mod materializer;
mod permissions;
mod resolver;
mod snapshot;
mod storage;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use checker::AccessChecker;
pub use guard::{AccessGuard, RequestContext};
pub use levels::CaseAccessLevel;
pub use manager::{AccessManager, BootstrapReport};
pub use materializer::{Drift, EffectiveAccessMaterializer, SyncSummary};
pub use permissions::Permission;
pub use resolver::{resolve_from_sources, AccessResolver, GrantSource, Resolution, SourceGrants};
pub use snapshot::{
    AccessSnapshot, EffectiveAccessRow, GroupMembershipRow, OrganisationMembershipRow,
};
pub use storage::{AccessStorage, MemoryAccessStorage};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

entity_id!(
    /// User identifier.
    UserId
);
entity_id!(
    /// Group identifier.
    GroupId
);
entity_id!(
    /// Organisation identifier.
    OrganisationId
);
entity_id!(
    /// Case identifier.
    CaseId
);

/// Effective access per case, as produced by the resolver and stored in the cache.
pub type AccessMap = BTreeMap<CaseId, CaseAccessLevel>;

/// A user account, as far as access control is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
}

impl User {
    pub fn new(id: impl Into<UserId>, login: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            login: login.into(),
        }
    }
}

/// A group of users sharing application permissions and case grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Application permissions granted to every member.
    pub permissions: Permission,
    /// Whether the group follows every case automatically.
    #[serde(default)]
    pub auto_follow: bool,
    /// Level granted on each followed case.
    #[serde(default)]
    pub auto_follow_access_level: Option<CaseAccessLevel>,
}

impl Group {
    /// Create a group without auto-follow.
    pub fn new(id: impl Into<GroupId>, name: impl Into<String>, permissions: Permission) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            permissions,
            auto_follow: false,
            auto_follow_access_level: None,
        }
    }

    /// Enable auto-follow at the given level.
    pub fn with_auto_follow(mut self, level: CaseAccessLevel) -> Self {
        self.auto_follow = true;
        self.auto_follow_access_level = Some(level);
        self
    }

    /// The level this group receives on new cases, if it auto-follows.
    pub fn auto_follow_level(&self) -> Option<CaseAccessLevel> {
        if self.auto_follow {
            self.auto_follow_access_level.filter(|level| !level.is_empty())
        } else {
            None
        }
    }
}

/// An organisation (customer tenant) users belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organisation {
    pub id: OrganisationId,
    pub name: String,
}

impl Organisation {
    pub fn new(id: impl Into<OrganisationId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A user's membership in an organisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganisationMembership {
    pub organisation_id: OrganisationId,
    pub is_primary: bool,
}

/// A case, as far as access control is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub name: String,
    /// Organisation the case was opened for.
    #[serde(default)]
    pub organisation_id: Option<OrganisationId>,
    pub created_at: DateTime<Utc>,
}

impl Case {
    pub fn new(id: impl Into<CaseId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            organisation_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_organisation(mut self, organisation_id: impl Into<OrganisationId>) -> Self {
        self.organisation_id = Some(organisation_id.into());
        self
    }
}

/// Kind of subject a grant applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Group,
    Organisation,
}

impl SubjectKind {
    /// Parse a subject kind from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(SubjectKind::User),
            "group" => Some(SubjectKind::Group),
            "organisation" | "organization" | "org" => Some(SubjectKind::Organisation),
            _ => None,
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKind::User => write!(f, "user"),
            SubjectKind::Group => write!(f, "group"),
            SubjectKind::Organisation => write!(f, "organisation"),
        }
    }
}

/// Who a case grant applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id")]
#[serde(rename_all = "lowercase")]
pub enum GrantSubject {
    User(UserId),
    Group(GroupId),
    Organisation(OrganisationId),
}

impl GrantSubject {
    /// Build a subject from a kind and a raw id.
    pub fn from_kind(kind: SubjectKind, id: i64) -> Self {
        match kind {
            SubjectKind::User => GrantSubject::User(UserId(id)),
            SubjectKind::Group => GrantSubject::Group(GroupId(id)),
            SubjectKind::Organisation => GrantSubject::Organisation(OrganisationId(id)),
        }
    }

    pub fn kind(&self) -> SubjectKind {
        match self {
            GrantSubject::User(_) => SubjectKind::User,
            GrantSubject::Group(_) => SubjectKind::Group,
            GrantSubject::Organisation(_) => SubjectKind::Organisation,
        }
    }
}

impl fmt::Display for GrantSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantSubject::User(id) => write!(f, "user:{}", id),
            GrantSubject::Group(id) => write!(f, "group:{}", id),
            GrantSubject::Organisation(id) => write!(f, "organisation:{}", id),
        }
    }
}

/// An explicit grant of a case access level to a subject.
///
/// Unique per `(subject, case_id)`. A grant holding only `DENY_ALL` is an
/// explicit revocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseGrant {
    pub subject: GrantSubject,
    pub case_id: CaseId,
    pub access_level: CaseAccessLevel,
    pub granted_at: DateTime<Utc>,
}

impl CaseGrant {
    pub fn new(
        subject: GrantSubject,
        case_id: impl Into<CaseId>,
        access_level: CaseAccessLevel,
    ) -> Self {
        Self {
            subject,
            case_id: case_id.into(),
            access_level,
            granted_at: Utc::now(),
        }
    }
}

/// Writes needed to bring one user's cached effective access to its target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessDiff {
    /// Cases the user no longer has any access to.
    pub deletes: Vec<CaseId>,
    /// Cases the user gained access to.
    pub inserts: Vec<(CaseId, CaseAccessLevel)>,
    /// Cases whose level changed.
    pub updates: Vec<(CaseId, CaseAccessLevel)>,
}

impl AccessDiff {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty() && self.updates.is_empty()
    }
}

/// Outcome of synchronizing one user's effective access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub user_id: UserId,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SyncReport {
    /// Total number of rows written.
    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    pub fn is_noop(&self) -> bool {
        self.writes() == 0
    }
}
