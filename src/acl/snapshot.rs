//! Portable snapshot of the access-control state.
//!
//! Used by the CLI to load and persist the in-memory store, and as a
//! fixture format for tests.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    Case, CaseAccessLevel, CaseGrant, CaseId, Group, GroupId, Organisation, OrganisationId, User,
    UserId,
};
use crate::error::Result;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Group membership row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembershipRow {
    pub group_id: GroupId,
    pub user_id: UserId,
}

/// Organisation membership row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganisationMembershipRow {
    pub organisation_id: OrganisationId,
    pub user_id: UserId,
    #[serde(default)]
    pub is_primary: bool,
}

/// Effective-access cache row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveAccessRow {
    pub user_id: UserId,
    pub case_id: CaseId,
    pub access_level: CaseAccessLevel,
}

/// Full access-control state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessSnapshot {
    /// Snapshot format version.
    pub version: u32,
    /// When the snapshot was written.
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub organisations: Vec<Organisation>,
    #[serde(default)]
    pub cases: Vec<Case>,
    #[serde(default)]
    pub group_memberships: Vec<GroupMembershipRow>,
    #[serde(default)]
    pub organisation_memberships: Vec<OrganisationMembershipRow>,
    #[serde(default)]
    pub grants: Vec<CaseGrant>,
    /// Cached rows. Rebuildable from the rest of the snapshot.
    #[serde(default)]
    pub effective_access: Vec<EffectiveAccessRow>,
}

impl Default for AccessSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            exported_at: Utc::now(),
            users: Vec::new(),
            groups: Vec::new(),
            organisations: Vec::new(),
            cases: Vec::new(),
            group_memberships: Vec::new(),
            organisation_memberships: Vec::new(),
            grants: Vec::new(),
            effective_access: Vec::new(),
        }
    }
}

impl AccessSnapshot {
    /// Read a snapshot from a JSON file.
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let snapshot = serde_json::from_reader(BufReader::new(file))?;
        Ok(snapshot)
    }

    /// Write the snapshot as pretty JSON.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{GrantSubject, Permission};
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("access.json");

        let mut snapshot = AccessSnapshot::default();
        snapshot.users.push(User::new(1, "alice"));
        snapshot.groups.push(Group::new(2, "analysts", Permission::ANALYSTS));
        snapshot.cases.push(Case::new(3, "intrusion"));
        snapshot.grants.push(CaseGrant::new(
            GrantSubject::Group(GroupId(2)),
            3,
            CaseAccessLevel::READ_ONLY,
        ));
        snapshot.write_to(&path).unwrap();

        let loaded = AccessSnapshot::read_from(&path).unwrap();
        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert_eq!(loaded.users, snapshot.users);
        assert_eq!(loaded.grants.len(), 1);
        assert_eq!(loaded.grants[0].access_level, CaseAccessLevel::READ_ONLY);
    }

    #[test]
    fn test_sparse_snapshot_parses() {
        let json = r#"{
            "version": 1,
            "exported_at": "2024-05-01T10:00:00Z",
            "users": [{"id": 1, "login": "alice"}]
        }"#;
        let snapshot: AccessSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.users.len(), 1);
        assert!(snapshot.grants.is_empty());
        assert!(snapshot.effective_access.is_empty());
    }
}
