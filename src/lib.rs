//! casegate: case access control for an incident-response platform
//!
//! Resolves user, group and organisation grants into a materialized
//! per-user, per-case effective-access view, and answers request-time
//! access checks with a single lookup against that view.

pub mod acl;
pub mod config;
pub mod error;

pub use acl::{
    AccessChecker, AccessGuard, AccessManager, AccessResolver, AccessSnapshot, AccessStorage,
    CaseAccessLevel, CaseGrant, CaseId, EffectiveAccessMaterializer, GrantSubject, GroupId,
    MemoryAccessStorage, OrganisationId, Permission, RequestContext, UserId,
};
pub use config::Config;
pub use error::{AccessError, CasegateError, ConfigError, Result, StorageError};
