//! Snapshot persistence of the access-control store.

use std::sync::Arc;

use tempfile::TempDir;

use casegate::acl::{
    AccessManager, AccessSnapshot, AccessStorage, Case, CaseAccessLevel, CaseId, GrantSubject,
    GroupId, MemoryAccessStorage, Organisation, OrganisationId, User, UserId,
};
use casegate::config::{AccessConfig, Config};

#[tokio::test]
async fn test_snapshot_survives_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("casegate.json");

    let storage = Arc::new(MemoryAccessStorage::new());
    let manager = AccessManager::new(storage.clone(), AccessConfig::default());
    manager.bootstrap().await.unwrap();
    manager
        .create_organisation(Organisation::new(1, "acme"))
        .await
        .unwrap();
    manager
        .create_user(User::new(1, "ursula"), OrganisationId(1))
        .await
        .unwrap();
    manager.add_user_to_group(UserId(1), GroupId(2)).await.unwrap();
    manager.create_case(Case::new(5, "phishing"), None).await.unwrap();
    manager
        .grant_case_access(GrantSubject::Group(GroupId(2)), CaseId(5), CaseAccessLevel::READ_ONLY)
        .await
        .unwrap();

    storage.snapshot().write_to(&path).unwrap();

    let snapshot = AccessSnapshot::read_from(&path).unwrap();
    let reloaded = Arc::new(MemoryAccessStorage::from_snapshot(snapshot).unwrap());
    assert_eq!(
        reloaded.effective_access(UserId(1), CaseId(5)).await.unwrap(),
        Some(CaseAccessLevel::READ_ONLY)
    );
    assert_eq!(reloaded.list_groups().await.unwrap().len(), 2);

    let manager = AccessManager::new(reloaded, AccessConfig::default());
    assert!(manager.materializer().verify_all().await.unwrap().is_empty());
    assert!(manager.bootstrap().await.unwrap().created_groups.is_empty());
}

#[tokio::test]
async fn test_bootstrap_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("casegate.toml");
    std::fs::write(
        &path,
        r#"
        [access]
        sync_on_startup = false

        [[access.default_groups]]
        name = "Responders"
        permissions = ["standard", "alerts_read"]
        auto_follow = true
        auto_follow_access_level = ["read_only"]
        "#,
    )
    .unwrap();
    let config = Config::from_file(&path).unwrap();

    let storage = Arc::new(MemoryAccessStorage::new());
    let manager = AccessManager::new(storage, config.access);
    let report = manager.bootstrap().await.unwrap();
    assert_eq!(report.created_groups, vec!["Responders"]);
    assert!(report.rebuild.is_none());

    let groups = manager.storage().list_groups().await.unwrap();
    assert_eq!(groups[0].auto_follow_level(), Some(CaseAccessLevel::READ_ONLY));
}
