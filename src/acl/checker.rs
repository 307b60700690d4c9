//! Request-time access checks against the effective-access cache.

use std::sync::Arc;

use super::{AccessStorage, CaseAccessLevel, CaseId, Permission, RequestContext, UserId};
use crate::error::Result;

/// Single-row lookups used to gate every case-scoped request.
///
/// "No access" is a `None` result, never an error; errors are storage failures.
#[derive(Clone)]
pub struct AccessChecker {
    storage: Arc<dyn AccessStorage>,
}

impl AccessChecker {
    /// Create a new checker.
    pub fn new(storage: Arc<dyn AccessStorage>) -> Self {
        Self { storage }
    }

    /// Check a user's access to a case.
    ///
    /// `required` is a set of acceptable levels: any one of them is enough.
    /// An empty set accepts any non-denied row. Returns the stored level on
    /// success.
    pub async fn check_case_access(
        &self,
        user_id: UserId,
        case_id: CaseId,
        required: CaseAccessLevel,
    ) -> Result<Option<CaseAccessLevel>> {
        let level = match self.storage.effective_access(user_id, case_id).await? {
            Some(level) => level,
            None => return Ok(None),
        };
        Ok(Self::evaluate(level, required))
    }

    /// Decision on a cached level.
    pub fn evaluate(level: CaseAccessLevel, required: CaseAccessLevel) -> Option<CaseAccessLevel> {
        if level.is_denied() {
            return None;
        }
        if required.is_empty() || level.intersects(required) {
            Some(level)
        } else {
            None
        }
    }

    /// Permission gate, using the mask computed once for the request.
    pub fn check_permission(context: &RequestContext, permission: Permission) -> bool {
        context.permissions.contains(permission)
    }

    /// Cases a user can access with any of the required levels.
    pub async fn accessible_cases(
        &self,
        user_id: UserId,
        required: CaseAccessLevel,
    ) -> Result<Vec<CaseId>> {
        let rows = self.storage.effective_access_for_user(user_id).await?;
        Ok(rows
            .into_iter()
            .filter(|(_, level)| Self::evaluate(*level, required).is_some())
            .map(|(case_id, _)| case_id)
            .collect())
    }
}
