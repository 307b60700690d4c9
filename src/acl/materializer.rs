//! Effective-access materialization.
//!
//! The effective-access cache is a derived view: it holds nothing that the
//! grant and membership stores don't already imply. Each synchronization
//! recomputes a user's full target through the resolver and writes only
//! the rows that differ.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    AccessDiff, AccessMap, AccessResolver, AccessStorage, CaseAccessLevel, CaseId, SyncReport,
    UserId,
};
use crate::error::Result;

/// A per-case difference between the cache and the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drift {
    pub case_id: CaseId,
    pub cached: Option<CaseAccessLevel>,
    pub expected: Option<CaseAccessLevel>,
}

/// Totals of a multi-user synchronization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub users: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SyncSummary {
    fn record(&mut self, report: &SyncReport) {
        self.users += 1;
        self.inserted += report.inserted;
        self.updated += report.updated;
        self.deleted += report.deleted;
    }

    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Compute the writes that turn `current` into `target`.
///
/// A row is rewritten whenever its stored level differs from the target,
/// so a shrinking target never leaves stale bits behind.
pub fn compute_diff(current: &AccessMap, target: &AccessMap) -> AccessDiff {
    let mut diff = AccessDiff::default();

    for (case_id, level) in target {
        match current.get(case_id) {
            None => diff.inserts.push((*case_id, *level)),
            Some(existing) if existing != level => diff.updates.push((*case_id, *level)),
            Some(_) => {}
        }
    }

    diff.deletes = current
        .keys()
        .filter(|case_id| !target.contains_key(case_id))
        .copied()
        .collect();

    diff
}

/// Keeps the stored effective-access rows equal to the resolver's output.
#[derive(Clone)]
pub struct EffectiveAccessMaterializer {
    storage: Arc<dyn AccessStorage>,
    resolver: AccessResolver,
}

impl EffectiveAccessMaterializer {
    /// Create a new materializer.
    pub fn new(storage: Arc<dyn AccessStorage>) -> Self {
        let resolver = AccessResolver::new(storage.clone());
        Self { storage, resolver }
    }

    /// The resolver used to compute targets.
    pub fn resolver(&self) -> &AccessResolver {
        &self.resolver
    }

    /// Bring one user's cached rows in line with the resolver.
    ///
    /// Idempotent: a second call with no grant change in between writes nothing.
    /// The diff is applied as one unit, so on error the cache keeps its
    /// previous rows and the call can simply be retried.
    pub async fn synchronize(&self, user_id: UserId) -> Result<SyncReport> {
        let current = self.storage.effective_access_for_user(user_id).await?;
        let target = self.resolver.resolve(user_id).await?;
        let diff = compute_diff(&current, &target);

        let report = SyncReport {
            user_id,
            inserted: diff.inserts.len(),
            updated: diff.updates.len(),
            deleted: diff.deletes.len(),
        };

        if !diff.is_empty() {
            self.storage.apply_access_diff(user_id, &diff).await?;
        }

        debug!(
            user_id = %user_id,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "Synchronized effective access"
        );

        Ok(report)
    }

    /// Synchronize several users, in order. Duplicates are synchronized once.
    pub async fn synchronize_users(&self, user_ids: &[UserId]) -> Result<Vec<SyncReport>> {
        let mut seen = BTreeSet::new();
        let mut reports = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            if seen.insert(*user_id) {
                reports.push(self.synchronize(*user_id).await?);
            }
        }
        Ok(reports)
    }

    /// Synchronize every known user.
    pub async fn synchronize_all(&self) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();
        for user_id in self.storage.list_users().await? {
            summary.record(&self.synchronize(user_id).await?);
        }
        info!(
            users = summary.users,
            writes = summary.writes(),
            "Synchronized effective access for all users"
        );
        Ok(summary)
    }

    /// Drop the whole cache and recompute it from the grant stores.
    pub async fn rebuild_all(&self) -> Result<SyncSummary> {
        let cleared = self.storage.clear_effective_access().await?;
        info!(cleared, "Cleared effective access cache");
        self.synchronize_all().await
    }

    /// Compare one user's cached rows against the resolver without writing.
    pub async fn verify(&self, user_id: UserId) -> Result<Vec<Drift>> {
        let current = self.storage.effective_access_for_user(user_id).await?;
        let target = self.resolver.resolve(user_id).await?;

        let mut case_ids: Vec<CaseId> = current.keys().chain(target.keys()).copied().collect();
        case_ids.sort();
        case_ids.dedup();

        Ok(case_ids
            .into_iter()
            .filter_map(|case_id| {
                let cached = current.get(&case_id).copied();
                let expected = target.get(&case_id).copied();
                (cached != expected).then_some(Drift {
                    case_id,
                    cached,
                    expected,
                })
            })
            .collect())
    }

    /// Drift of every user whose cache disagrees with the resolver.
    pub async fn verify_all(&self) -> Result<BTreeMap<UserId, Vec<Drift>>> {
        let mut drifting = BTreeMap::new();
        for user_id in self.storage.list_users().await? {
            let drift = self.verify(user_id).await?;
            if !drift.is_empty() {
                drifting.insert(user_id, drift);
            }
        }
        Ok(drifting)
    }
}
