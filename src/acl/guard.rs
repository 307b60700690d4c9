//! Request-level enforcement.
//!
//! A [`RequestContext`] is built once when a request is authenticated and
//! carries the user's effective permission mask for the lifetime of that
//! request. [`AccessGuard`] turns checker results into hard denials that
//! carry the request's correlation id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::{AccessChecker, CaseAccessLevel, CaseId, Permission, UserId};
use crate::error::{AccessError, CasegateError, Result};

/// Per-request authorization context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: UserId,
    /// Union of the permission masks of the user's groups.
    pub permissions: Permission,
    /// Identifier echoed in denial responses and audit logs.
    pub correlation_id: String,
}

impl RequestContext {
    /// Create a context with a fresh correlation id.
    pub fn new(user_id: UserId, permissions: Permission) -> Self {
        Self {
            user_id,
            permissions,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// Check if the request holds a permission.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }

    /// Check if the request comes from a server administrator.
    pub fn is_administrator(&self) -> bool {
        self.has_permission(Permission::SERVER_ADMINISTRATOR)
    }
}

/// Access guard for checking case access before operations.
#[derive(Clone)]
pub struct AccessGuard {
    checker: Arc<AccessChecker>,
    context: RequestContext,
}

impl AccessGuard {
    /// Create a new access guard.
    pub fn new(checker: Arc<AccessChecker>, context: RequestContext) -> Self {
        Self { checker, context }
    }

    /// The request context this guard enforces for.
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Check case access with any of the required levels.
    pub async fn check(
        &self,
        case_id: CaseId,
        required: CaseAccessLevel,
    ) -> Result<Option<CaseAccessLevel>> {
        self.checker
            .check_case_access(self.context.user_id, case_id, required)
            .await
    }

    /// Check read access.
    pub async fn can_read_case(&self, case_id: CaseId) -> Result<bool> {
        Ok(self.check(case_id, CaseAccessLevel::ANY_READ).await?.is_some())
    }

    /// Check write access.
    pub async fn can_write_case(&self, case_id: CaseId) -> Result<bool> {
        Ok(self
            .check(case_id, CaseAccessLevel::FULL_ACCESS)
            .await?
            .is_some())
    }

    /// Require case access or return a denial.
    pub async fn require_case_access(
        &self,
        case_id: CaseId,
        required: CaseAccessLevel,
    ) -> Result<CaseAccessLevel> {
        match self.check(case_id, required).await? {
            Some(level) => Ok(level),
            None => Err(self.deny(format!(
                "user {} lacks {} on case {}",
                self.context.user_id, required, case_id
            ))),
        }
    }

    /// Require read access or return a denial.
    pub async fn require_read(&self, case_id: CaseId) -> Result<CaseAccessLevel> {
        self.require_case_access(case_id, CaseAccessLevel::ANY_READ)
            .await
    }

    /// Require write access or return a denial.
    pub async fn require_write(&self, case_id: CaseId) -> Result<CaseAccessLevel> {
        self.require_case_access(case_id, CaseAccessLevel::FULL_ACCESS)
            .await
    }

    /// Require an application permission or return a denial.
    pub fn require_permission(&self, permission: Permission) -> Result<()> {
        if AccessChecker::check_permission(&self.context, permission) {
            Ok(())
        } else {
            Err(self.deny(format!(
                "user {} lacks permission {}",
                self.context.user_id, permission
            )))
        }
    }

    /// Filter case IDs down to those the user can read.
    pub async fn filter_readable(&self, case_ids: Vec<CaseId>) -> Result<Vec<CaseId>> {
        let mut readable = Vec::new();
        for case_id in case_ids {
            if self.can_read_case(case_id).await? {
                readable.push(case_id);
            }
        }
        Ok(readable)
    }

    fn deny(&self, reason: String) -> CasegateError {
        warn!(
            user_id = %self.context.user_id,
            correlation_id = %self.context.correlation_id,
            reason = %reason,
            "Access denied"
        );
        AccessError::Denied {
            correlation_id: self.context.correlation_id.clone(),
            reason,
        }
        .into()
    }
}
