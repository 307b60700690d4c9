//! Resolver and cache invariants across the whole engine.

use std::sync::Arc;

use casegate::acl::{
    AccessManager, AccessStorage, Case, CaseAccessLevel, CaseGrant, CaseId, GrantSubject, Group,
    GroupId, MemoryAccessStorage, Organisation, OrganisationId, Permission, RequestContext, User,
    UserId,
};
use casegate::config::AccessConfig;
use casegate::{AccessError, CasegateError};

async fn manager_with_cases(cases: &[i64]) -> (Arc<MemoryAccessStorage>, AccessManager) {
    let storage = Arc::new(MemoryAccessStorage::new());
    let manager = AccessManager::new(storage.clone(), AccessConfig::default());

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
    for case in cases {
        manager.create_case(Case::new(*case, "case"), None).await.unwrap();
    }
    (storage, manager)
}

async fn grant(manager: &AccessManager, subject: GrantSubject, case: i64, level: CaseAccessLevel) {
    manager
        .grant_case_access(subject, CaseId(case), level)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_user_grant_takes_precedence() {
    let (_, manager) = manager_with_cases(&[1, 2]).await;
    let user = GrantSubject::User(UserId(1));
    let group = GrantSubject::Group(GroupId(1));
    let org = GrantSubject::Organisation(OrganisationId(1));

    // Case 1: all three sources.
    grant(&manager, org, 1, CaseAccessLevel::FULL_ACCESS).await;
    grant(&manager, group, 1, CaseAccessLevel::FULL_ACCESS).await;
    grant(&manager, user, 1, CaseAccessLevel::READ_ONLY).await;
    // Case 2: group beats organisation.
    grant(&manager, org, 2, CaseAccessLevel::FULL_ACCESS).await;
    grant(&manager, group, 2, CaseAccessLevel::READ_ONLY).await;

    let resolved = manager.resolver().resolve(UserId(1)).await.unwrap();
    assert_eq!(resolved[&CaseId(1)], CaseAccessLevel::READ_ONLY);
    assert_eq!(resolved[&CaseId(2)], CaseAccessLevel::READ_ONLY);
}

#[tokio::test]
async fn test_deny_is_absolute() {
    let (_, manager) = manager_with_cases(&[1]).await;
    grant(
        &manager,
        GrantSubject::User(UserId(1)),
        1,
        CaseAccessLevel::DENY_ALL | CaseAccessLevel::FULL_ACCESS,
    )
    .await;

    let resolved = manager.resolver().resolve(UserId(1)).await.unwrap();
    assert_eq!(resolved[&CaseId(1)], CaseAccessLevel::DENY_ALL);
    assert_eq!(
        manager
            .storage()
            .effective_access(UserId(1), CaseId(1))
            .await
            .unwrap(),
        Some(CaseAccessLevel::DENY_ALL)
    );
    assert_eq!(
        manager
            .check_case_access(UserId(1), CaseId(1), CaseAccessLevel::FULL_ACCESS)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_absence_means_no_access() {
    let (_, manager) = manager_with_cases(&[1, 2]).await;
    grant(&manager, GrantSubject::Group(GroupId(1)), 1, CaseAccessLevel::READ_ONLY).await;

    let resolved = manager.resolver().resolve(UserId(1)).await.unwrap();
    assert!(!resolved.contains_key(&CaseId(2)));
    assert_eq!(
        manager
            .check_case_access(UserId(1), CaseId(2), CaseAccessLevel::empty())
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_second_synchronize_writes_nothing() {
    let (_, manager) = manager_with_cases(&[1, 2, 3]).await;
    grant(&manager, GrantSubject::Group(GroupId(1)), 1, CaseAccessLevel::READ_ONLY).await;
    grant(&manager, GrantSubject::User(UserId(1)), 2, CaseAccessLevel::FULL_ACCESS).await;
    grant(
        &manager,
        GrantSubject::Organisation(OrganisationId(1)),
        3,
        CaseAccessLevel::DENY_ALL,
    )
    .await;

    let before = manager
        .storage()
        .effective_access_for_user(UserId(1))
        .await
        .unwrap();
    let first = manager.synchronize(UserId(1)).await.unwrap();
    let second = manager.synchronize(UserId(1)).await.unwrap();
    assert!(first.is_noop());
    assert!(second.is_noop());
    assert_eq!(
        manager
            .storage()
            .effective_access_for_user(UserId(1))
            .await
            .unwrap(),
        before
    );
}

#[tokio::test]
async fn test_cache_converges_after_out_of_band_changes() {
    let (storage, manager) = manager_with_cases(&[1, 2, 3, 4]).await;
    grant(&manager, GrantSubject::Group(GroupId(1)), 1, CaseAccessLevel::READ_ONLY).await;
    grant(&manager, GrantSubject::Group(GroupId(1)), 2, CaseAccessLevel::FULL_ACCESS).await;

    // Writes that bypass the manager leave the cache stale.
    storage
        .put_grant(CaseGrant::new(
            GrantSubject::Group(GroupId(1)),
            2,
            CaseAccessLevel::READ_ONLY,
        ))
        .await
        .unwrap();
    storage
        .remove_grant(GrantSubject::Group(GroupId(1)), CaseId(1))
        .await
        .unwrap();
    storage
        .put_grant(CaseGrant::new(
            GrantSubject::User(UserId(1)),
            4,
            CaseAccessLevel::FULL_ACCESS,
        ))
        .await
        .unwrap();
    assert!(!manager
        .materializer()
        .verify(UserId(1))
        .await
        .unwrap()
        .is_empty());

    let report = manager.synchronize(UserId(1)).await.unwrap();
    assert_eq!((report.inserted, report.updated, report.deleted), (1, 1, 1));

    let cached = storage.effective_access_for_user(UserId(1)).await.unwrap();
    let resolved = manager.resolver().resolve(UserId(1)).await.unwrap();
    assert_eq!(cached, resolved);
    assert!(manager.materializer().verify_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_permissions_are_additive() {
    let (_, manager) = manager_with_cases(&[]).await;
    let low = Permission::from_bits_retain(0b01);
    let high = Permission::from_bits_retain(0b10);

    manager
        .create_user(User::new(2, "felix"), OrganisationId(1))
        .await
        .unwrap();
    manager
        .create_group(Group::new(10, "low", low))
        .await
        .unwrap();
    manager
        .create_group(Group::new(11, "high", high))
        .await
        .unwrap();
    manager.add_user_to_group(UserId(2), GroupId(10)).await.unwrap();
    manager.add_user_to_group(UserId(2), GroupId(11)).await.unwrap();

    assert_eq!(
        manager.effective_permissions(UserId(2)).await.unwrap().bits(),
        0b11
    );

    let actor = RequestContext::new(UserId(1000), Permission::ADMINISTRATORS);
    manager
        .remove_user_from_group(&actor, UserId(2), GroupId(11))
        .await
        .unwrap();
    assert_eq!(
        manager.effective_permissions(UserId(2)).await.unwrap().bits(),
        0b01
    );
}

#[tokio::test]
async fn test_primary_organisation_cannot_be_left() {
    let (_, manager) = manager_with_cases(&[]).await;
    manager
        .create_organisation(Organisation::new(2, "partner"))
        .await
        .unwrap();
    manager
        .add_user_to_organisation(UserId(1), OrganisationId(2))
        .await
        .unwrap();

    let err = manager
        .remove_user_from_organisation(UserId(1), OrganisationId(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CasegateError::Access(AccessError::PrimaryOrganisation { .. })
    ));

    manager
        .set_primary_organisation(UserId(1), OrganisationId(2))
        .await
        .unwrap();
    manager
        .remove_user_from_organisation(UserId(1), OrganisationId(1))
        .await
        .unwrap();

    let memberships = manager.storage().organisations_of(UserId(1)).await.unwrap();
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].organisation_id, OrganisationId(2));
    assert!(memberships[0].is_primary);
}

#[tokio::test]
async fn test_last_admin_cannot_lock_themselves_out() {
    let (_, manager) = manager_with_cases(&[]).await;
    manager
        .create_group(Group::new(5, "Administrators", Permission::ADMINISTRATORS))
        .await
        .unwrap();
    manager.add_user_to_group(UserId(1), GroupId(5)).await.unwrap();
    let actor = manager.request_context(UserId(1)).await.unwrap();
    assert!(actor.is_administrator());

    let err = manager
        .set_group_permissions(&actor, GroupId(5), Permission::ANALYSTS)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CasegateError::Access(AccessError::SelfLockoutRejected(_))
    ));

    // A second admin group makes the change safe.
    manager
        .set_group_permissions(
            &actor,
            GroupId(1),
            Permission::ANALYSTS | Permission::SERVER_ADMINISTRATOR,
        )
        .await
        .unwrap();
    manager
        .set_group_permissions(&actor, GroupId(5), Permission::ANALYSTS)
        .await
        .unwrap();
    assert!(manager
        .request_context(UserId(1))
        .await
        .unwrap()
        .is_administrator());
}
