//! End-to-end access scenarios.

use std::collections::BTreeMap;
use std::sync::Arc;

use casegate::acl::{
    AccessManager, AccessStorage, Case, CaseAccessLevel, CaseId, GrantSource, GrantSubject, Group,
    GroupId, MemoryAccessStorage, Organisation, OrganisationId, Permission, RequestContext, User,
    UserId,
};
use casegate::config::AccessConfig;
use casegate::{AccessError, CasegateError};

/// An organisation, one analyst, and one group the analyst belongs to.
async fn setup() -> AccessManager {
    let storage = Arc::new(MemoryAccessStorage::new());
    let manager = AccessManager::new(storage, AccessConfig::default());

    manager
        .create_organisation(Organisation::new(1, "acme"))
        .await
        .unwrap();
    manager
        .create_user(User::new(1, "ursula"), OrganisationId(1))
        .await
        .unwrap();
    manager
        .create_group(Group::new(1, "responders", Permission::ANALYSTS))
        .await
        .unwrap();
    manager
        .add_user_to_group(UserId(1), GroupId(1))
        .await
        .unwrap();
    manager
}

fn admin() -> RequestContext {
    RequestContext::new(UserId(1000), Permission::ADMINISTRATORS)
}

#[tokio::test]
async fn test_group_read_only_grant() {
    let manager = setup().await;
    manager.create_case(Case::new(5, "phishing"), None).await.unwrap();
    manager
        .grant_case_access(GrantSubject::Group(GroupId(1)), CaseId(5), CaseAccessLevel::READ_ONLY)
        .await
        .unwrap();

    let resolved = manager.resolver().resolve(UserId(1)).await.unwrap();
    assert_eq!(
        resolved,
        BTreeMap::from([(CaseId(5), CaseAccessLevel::READ_ONLY)])
    );

    let either = manager
        .check_case_access(UserId(1), CaseId(5), CaseAccessLevel::ANY_READ)
        .await
        .unwrap();
    assert_eq!(either, Some(CaseAccessLevel::READ_ONLY));

    let full_only = manager
        .check_case_access(UserId(1), CaseId(5), CaseAccessLevel::FULL_ACCESS)
        .await
        .unwrap();
    assert_eq!(full_only, None);
}

#[tokio::test]
async fn test_user_deny_overrides_group_grant() {
    let manager = setup().await;
    manager.create_case(Case::new(5, "phishing"), None).await.unwrap();
    manager
        .grant_case_access(GrantSubject::Group(GroupId(1)), CaseId(5), CaseAccessLevel::READ_ONLY)
        .await
        .unwrap();
    manager
        .grant_case_access(GrantSubject::User(UserId(1)), CaseId(5), CaseAccessLevel::DENY_ALL)
        .await
        .unwrap();

    let resolved = manager.resolver().resolve(UserId(1)).await.unwrap();
    assert_eq!(
        resolved,
        BTreeMap::from([(CaseId(5), CaseAccessLevel::DENY_ALL)])
    );
    assert_eq!(
        manager
            .check_case_access(UserId(1), CaseId(5), CaseAccessLevel::READ_ONLY)
            .await
            .unwrap(),
        None
    );

    let context = manager.request_context(UserId(1)).await.unwrap();
    let err = manager
        .guard(context.clone())
        .require_read(CaseId(5))
        .await
        .unwrap_err();
    match err {
        CasegateError::Access(AccessError::Denied { correlation_id, .. }) => {
            assert_eq!(correlation_id, context.correlation_id)
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_auto_follow_seeds_new_cases() {
    let manager = setup().await;
    manager
        .create_user(User::new(2, "felix"), OrganisationId(1))
        .await
        .unwrap();
    manager
        .create_group(
            Group::new(2, "followers", Permission::ANALYSTS)
                .with_auto_follow(CaseAccessLevel::FULL_ACCESS),
        )
        .await
        .unwrap();
    manager
        .add_user_to_group(UserId(2), GroupId(2))
        .await
        .unwrap();

    manager.create_case(Case::new(7, "ransomware"), None).await.unwrap();
    manager.create_case(Case::new(8, "insider"), None).await.unwrap();

    for case in [7, 8] {
        assert_eq!(
            manager
                .check_case_access(UserId(2), CaseId(case), CaseAccessLevel::FULL_ACCESS)
                .await
                .unwrap(),
            Some(CaseAccessLevel::FULL_ACCESS)
        );
        let grant = manager
            .storage()
            .get_grant(GrantSubject::Group(GroupId(2)), CaseId(case))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grant.access_level, CaseAccessLevel::FULL_ACCESS);
    }

    // Not a member of the auto-follow group.
    assert_eq!(
        manager
            .check_case_access(UserId(1), CaseId(8), CaseAccessLevel::empty())
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_enabling_auto_follow_covers_existing_cases() {
    let manager = setup().await;
    for case in [11, 12] {
        manager.create_case(Case::new(case, "case"), None).await.unwrap();
    }
    // An explicit deny survives the bulk seeding.
    manager
        .grant_case_access(GrantSubject::Group(GroupId(1)), CaseId(12), CaseAccessLevel::DENY_ALL)
        .await
        .unwrap();

    manager
        .set_group_auto_follow(GroupId(1), true, CaseAccessLevel::READ_ONLY)
        .await
        .unwrap();

    let cached = manager
        .storage()
        .effective_access_for_user(UserId(1))
        .await
        .unwrap();
    assert_eq!(
        cached,
        BTreeMap::from([
            (CaseId(11), CaseAccessLevel::READ_ONLY),
            (CaseId(12), CaseAccessLevel::DENY_ALL),
        ])
    );

    // Disabling stops seeding but keeps what was written.
    manager
        .set_group_auto_follow(GroupId(1), false, CaseAccessLevel::empty())
        .await
        .unwrap();
    manager.create_case(Case::new(13, "case"), None).await.unwrap();
    let cached = manager
        .storage()
        .effective_access_for_user(UserId(1))
        .await
        .unwrap();
    assert_eq!(cached.len(), 2);
    assert!(!cached.contains_key(&CaseId(13)));
}

#[tokio::test]
async fn test_leaving_only_group_drops_its_cases() {
    let manager = setup().await;
    for case in [1, 2, 3] {
        manager.create_case(Case::new(case, "case"), None).await.unwrap();
        manager
            .grant_case_access(
                GrantSubject::Group(GroupId(1)),
                CaseId(case),
                CaseAccessLevel::READ_ONLY,
            )
            .await
            .unwrap();
    }
    assert_eq!(manager.resolver().resolve(UserId(1)).await.unwrap().len(), 3);

    let report = manager
        .remove_user_from_group(&admin(), UserId(1), GroupId(1))
        .await
        .unwrap();
    assert_eq!(report.deleted, 3);
    assert!(manager.resolver().resolve(UserId(1)).await.unwrap().is_empty());
    assert!(manager
        .storage()
        .effective_access_for_user(UserId(1))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_user_grant_overrides_organisation_grant() {
    let manager = setup().await;
    manager.create_case(Case::new(9, "fraud"), None).await.unwrap();
    manager
        .grant_case_access(
            GrantSubject::Organisation(OrganisationId(1)),
            CaseId(9),
            CaseAccessLevel::READ_ONLY,
        )
        .await
        .unwrap();
    manager
        .grant_case_access(GrantSubject::User(UserId(1)), CaseId(9), CaseAccessLevel::FULL_ACCESS)
        .await
        .unwrap();

    let resolved = manager.resolver().resolve(UserId(1)).await.unwrap();
    assert_eq!(resolved[&CaseId(9)], CaseAccessLevel::FULL_ACCESS);

    let resolution = manager
        .resolver()
        .explain(UserId(1), CaseId(9))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolution.source, GrantSource::User);
}

#[tokio::test]
async fn test_synchronize_without_grants_is_noop() {
    let manager = setup().await;
    manager
        .create_user(User::new(3, "nadia"), OrganisationId(1))
        .await
        .unwrap();

    let report = manager.synchronize(UserId(3)).await.unwrap();
    assert!(report.is_noop());
    assert!(manager
        .storage()
        .effective_access_for_user(UserId(3))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_new_case_for_organisation() {
    let manager = setup().await;
    manager
        .create_user(User::new(2, "felix"), OrganisationId(1))
        .await
        .unwrap();

    manager
        .create_case(Case::new(20, "breach").for_organisation(1), Some(UserId(2)))
        .await
        .unwrap();

    // Creator and organisation members both get the configured levels.
    for user in [1, 2] {
        assert_eq!(
            manager
                .check_case_access(UserId(user), CaseId(20), CaseAccessLevel::FULL_ACCESS)
                .await
                .unwrap(),
            Some(CaseAccessLevel::FULL_ACCESS)
        );
    }
}

#[tokio::test]
async fn test_delete_case_clears_cache_rows() {
    let manager = setup().await;
    manager
        .create_case(Case::new(21, "malware"), Some(UserId(1)))
        .await
        .unwrap();
    assert!(manager
        .storage()
        .effective_access(UserId(1), CaseId(21))
        .await
        .unwrap()
        .is_some());

    manager.delete_case(CaseId(21)).await.unwrap();
    assert!(manager
        .storage()
        .effective_access(UserId(1), CaseId(21))
        .await
        .unwrap()
        .is_none());
    assert!(manager.storage().case_grants(CaseId(21)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_group_resyncs_members() {
    let manager = setup().await;
    manager.create_case(Case::new(5, "phishing"), None).await.unwrap();
    manager
        .grant_case_access(GrantSubject::Group(GroupId(1)), CaseId(5), CaseAccessLevel::READ_ONLY)
        .await
        .unwrap();

    let reports = manager.delete_group(&admin(), GroupId(1)).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].deleted, 1);
    assert!(manager.storage().get_group(GroupId(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_secondary_organisation_resyncs_members() {
    let manager = setup().await;
    manager
        .create_organisation(Organisation::new(2, "partner"))
        .await
        .unwrap();
    manager
        .add_user_to_organisation(UserId(1), OrganisationId(2))
        .await
        .unwrap();
    manager.create_case(Case::new(30, "shared"), None).await.unwrap();
    manager
        .grant_case_access(
            GrantSubject::Organisation(OrganisationId(2)),
            CaseId(30),
            CaseAccessLevel::READ_ONLY,
        )
        .await
        .unwrap();
    assert!(manager
        .check_case_access(UserId(1), CaseId(30), CaseAccessLevel::ANY_READ)
        .await
        .unwrap()
        .is_some());

    manager
        .delete_organisation(OrganisationId(2))
        .await
        .unwrap();
    assert!(manager
        .check_case_access(UserId(1), CaseId(30), CaseAccessLevel::ANY_READ)
        .await
        .unwrap()
        .is_none());
}
