//! Effective case-access resolution.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{AccessMap, AccessStorage, CaseAccessLevel, CaseGrant, CaseId, OrganisationId, UserId};
use crate::error::Result;

/// Where a grant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantSource {
    User,
    Group,
    Organisation,
}

impl GrantSource {
    /// Sources in precedence order. The first source holding a grant for a
    /// case decides that case; later sources are not consulted.
    pub const PRECEDENCE: [GrantSource; 3] =
        [GrantSource::User, GrantSource::Group, GrantSource::Organisation];
}

/// Grants reachable by one user, keyed by case, per source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceGrants {
    pub user: AccessMap,
    pub group: AccessMap,
    pub organisation: AccessMap,
}

impl SourceGrants {
    /// Grants of one source.
    pub fn get(&self, source: GrantSource) -> &AccessMap {
        match source {
            GrantSource::User => &self.user,
            GrantSource::Group => &self.group,
            GrantSource::Organisation => &self.organisation,
        }
    }

    /// Record a grant. Several grants from the same source on the same case
    /// (two groups, two organisations) are merged bitwise, so a deny from
    /// any of them survives normalisation.
    pub fn add(&mut self, source: GrantSource, grant: &CaseGrant) {
        let map = match source {
            GrantSource::User => &mut self.user,
            GrantSource::Group => &mut self.group,
            GrantSource::Organisation => &mut self.organisation,
        };
        *map.entry(grant.case_id).or_default() |= grant.access_level;
    }

    /// Every case touched by any source.
    pub fn cases(&self) -> BTreeSet<CaseId> {
        self.user
            .keys()
            .chain(self.group.keys())
            .chain(self.organisation.keys())
            .copied()
            .collect()
    }

    /// Winning source and raw level for a case.
    pub fn winner(&self, case_id: CaseId) -> Option<(GrantSource, CaseAccessLevel)> {
        GrantSource::PRECEDENCE
            .iter()
            .find_map(|source| self.get(*source).get(&case_id).map(|level| (*source, *level)))
    }
}

/// How a single case was resolved for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub case_id: CaseId,
    pub source: GrantSource,
    /// Level of the winning grant as stored.
    pub granted: CaseAccessLevel,
    /// Level after deny normalisation.
    pub effective: CaseAccessLevel,
}

/// Compute the target effective access from collected grants.
///
/// Precedence override, not union: the user grant wins over the group
/// grant, which wins over the organisation grant. A winning mask with
/// `DENY_ALL` set becomes exactly `DENY_ALL`. Cases whose winning mask is
/// empty are left out, so every returned level is nonzero.
pub fn resolve_from_sources(sources: &SourceGrants) -> AccessMap {
    sources
        .cases()
        .into_iter()
        .filter_map(|case_id| {
            let (_, granted) = sources.winner(case_id)?;
            let effective = granted.effective();
            (!effective.is_empty()).then_some((case_id, effective))
        })
        .collect()
}

/// Resolves a user's target effective access from the grant and membership stores.
#[derive(Clone)]
pub struct AccessResolver {
    storage: Arc<dyn AccessStorage>,
}

impl AccessResolver {
    /// Create a new resolver.
    pub fn new(storage: Arc<dyn AccessStorage>) -> Self {
        Self { storage }
    }

    /// Collect every grant reachable by the user, per source.
    pub async fn collect(&self, user_id: UserId) -> Result<SourceGrants> {
        let mut sources = SourceGrants::default();

        let organisation_ids: Vec<OrganisationId> = self
            .storage
            .organisations_of(user_id)
            .await?
            .into_iter()
            .map(|m| m.organisation_id)
            .collect();
        for grant in self
            .storage
            .organisation_case_grants(&organisation_ids)
            .await?
        {
            sources.add(GrantSource::Organisation, &grant);
        }

        let group_ids = self.storage.groups_of(user_id).await?;
        for grant in self.storage.group_case_grants(&group_ids).await? {
            sources.add(GrantSource::Group, &grant);
        }

        for grant in self.storage.user_case_grants(user_id).await? {
            sources.add(GrantSource::User, &grant);
        }

        Ok(sources)
    }

    /// Target effective access of a user. Reads only.
    pub async fn resolve(&self, user_id: UserId) -> Result<AccessMap> {
        let sources = self.collect(user_id).await?;
        Ok(resolve_from_sources(&sources))
    }

    /// Explain how a case resolves for a user, if any grant reaches it.
    pub async fn explain(&self, user_id: UserId, case_id: CaseId) -> Result<Option<Resolution>> {
        let sources = self.collect(user_id).await?;
        Ok(sources.winner(case_id).map(|(source, granted)| Resolution {
            case_id,
            source,
            granted,
            effective: granted.effective(),
        }))
    }
}
