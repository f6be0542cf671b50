//! User cases.

use fleet_persistence::core::{MembershipInvitationStore, NamespaceStore, UserStore};
use fleet_persistence::models::{User, UserChanges, UserStatus};
use fleet_persistence::query::{
    Filter, NamespaceResolver, Order, Paginator, QueryOption, Sorter, UserConflicts, UserResolver,
};
use fleet_persistence::tenant::RequestContext;

use crate::fixtures::{MEMBERSHIP_INVITATIONS, NAMESPACES, USERS};
use crate::{Provider, TENANT_DEV, TENANT_STAGING, USER_ALEX, USER_BOB, USER_JANE, USER_JOHN};

/// Listing with filters and every resolver key.
pub async fn list_and_resolve<P: Provider>(p: &P) {
    p.load_fixtures(&[USERS]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    let (users, total) = store
        .user_list(
            &ctx,
            &[
                QueryOption::Sort(Sorter::new("created_at", Order::Desc)),
                QueryOption::Paginate(Paginator::new(2, 2)),
            ],
        )
        .await
        .unwrap();
    assert_eq!(total, 4);
    let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec![USER_JANE, USER_JOHN]);

    let (confirmed, total) = store
        .user_list(
            &ctx,
            &[QueryOption::Match(vec![Filter::property(
                "status",
                "eq",
                "not-confirmed",
            )])],
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(confirmed[0].id, USER_BOB);

    let by_email = store
        .user_resolve(&ctx, UserResolver::Email, "JOHN.DOE@test.com")
        .await
        .unwrap();
    assert_eq!(by_email.id, USER_JOHN);
    let by_username = store
        .user_resolve(&ctx, UserResolver::Username, "Jane_Smith")
        .await
        .unwrap();
    assert_eq!(by_username.id, USER_JANE);
    assert_eq!(by_username.preferences.preferred_namespace, TENANT_DEV);

    let err = store
        .user_resolve(&ctx, UserResolver::Id, "unknown")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Email and username are stored lowercase and unique.
pub async fn create_normalizes_and_rejects_duplicates<P: Provider>(p: &P) {
    p.load_fixtures(&[USERS]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    let created = store
        .user_create(
            &ctx,
            User::new("New User", "New_User", "New.User@Test.com", "digest"),
        )
        .await
        .unwrap();
    assert!(!created.id.is_empty());
    assert_eq!(created.username, "new_user");
    assert_eq!(created.email, "new.user@test.com");
    let resolved = store
        .user_resolve(&ctx, UserResolver::Id, &created.id)
        .await
        .unwrap();
    assert_eq!(resolved.name, "New User");
    assert_eq!(resolved.status, UserStatus::Confirmed);

    let err = store
        .user_create(
            &ctx,
            User::new("Copy", "JOHN_DOE", "someone@test.com", "digest"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.conflicting_fields(), Some(&["username".to_string()][..]));

    let err = store
        .user_create(&ctx, User::new("Copy", "copy", "Jane.Smith@test.com", "digest"))
        .await
        .unwrap_err();
    assert_eq!(err.conflicting_fields(), Some(&["email".to_string()][..]));

    let (_, total) = store.user_list(&ctx, &[]).await.unwrap();
    assert_eq!(total, 5);
}

/// Invited users have no username and may coexist.
pub async fn create_invited<P: Provider>(p: &P) {
    let store = p.store();
    let ctx = RequestContext::new();

    let first = store
        .user_create_invited(&ctx, "Invitee@Test.com")
        .await
        .unwrap();
    let second = store
        .user_create_invited(&ctx, "other@test.com")
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(first.status, UserStatus::Invited);
    assert!(first.username.is_empty());

    let resolved = store
        .user_resolve(&ctx, UserResolver::Email, "invitee@test.com")
        .await
        .unwrap();
    assert_eq!(resolved.id, first.id);

    let err = store
        .user_create_invited(&ctx, "INVITEE@test.com")
        .await
        .unwrap_err();
    assert!(err.is_duplicate());
}

/// Every colliding field is reported, case-insensitively.
pub async fn conflicts<P: Provider>(p: &P) {
    p.load_fixtures(&[USERS]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    let both = store
        .user_conflicts(
            &ctx,
            &UserConflicts {
                email: "JOHN.DOE@test.com".into(),
                username: "jane_smith".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let (fields, has) = both.into_parts();
    assert!(has);
    assert_eq!(fields, vec!["email", "username"]);

    let itself = store
        .user_conflicts(
            &ctx,
            &UserConflicts {
                id: Some(USER_JOHN.into()),
                email: "john.doe@test.com".into(),
                username: "john_doe".into(),
            },
        )
        .await
        .unwrap();
    assert!(!itself.has_conflicts());

    let none = store
        .user_conflicts(&ctx, &UserConflicts::default())
        .await
        .unwrap();
    assert!(!none.has_conflicts());
}

/// Partial updates normalize and touch only the given fields.
pub async fn update<P: Provider>(p: &P) {
    p.load_fixtures(&[USERS]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    store
        .user_update(
            &ctx,
            USER_BOB,
            &UserChanges {
                email: Some("Robert@Test.com".into()),
                status: Some(UserStatus::Confirmed),
                preferred_namespace: Some(TENANT_STAGING.into()),
                max_namespaces: Some(-1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let bob = store
        .user_resolve(&ctx, UserResolver::Id, USER_BOB)
        .await
        .unwrap();
    assert_eq!(bob.email, "robert@test.com");
    assert_eq!(bob.status, UserStatus::Confirmed);
    assert_eq!(bob.preferences.preferred_namespace, TENANT_STAGING);
    assert_eq!(bob.max_namespaces, -1);
    assert_eq!(bob.username, "bob_johnson");

    let err = store
        .user_update(
            &ctx,
            USER_BOB,
            &UserChanges {
                username: Some("John_Doe".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_duplicate());

    let err = store
        .user_update(
            &ctx,
            "unknown",
            &UserChanges {
                name: Some("ghost".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Owned and associated namespaces are disjoint.
pub async fn get_info<P: Provider>(p: &P) {
    p.load_fixtures(&[USERS, NAMESPACES]).await.unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    let jane = store.user_get_info(&ctx, USER_JANE).await.unwrap();
    assert_eq!(jane.owned_namespaces.len(), 1);
    assert_eq!(jane.owned_namespaces[0].tenant_id.as_str(), TENANT_STAGING);
    assert_eq!(jane.associated_namespaces.len(), 1);
    assert_eq!(jane.associated_namespaces[0].tenant_id.as_str(), TENANT_DEV);

    let alex = store.user_get_info(&ctx, USER_ALEX).await.unwrap();
    assert!(alex.owned_namespaces.is_empty());
    assert!(alex.associated_namespaces.is_empty());

    let err = store.user_get_info(&ctx, "unknown").await.unwrap_err();
    assert!(err.is_not_found());
}

/// Deleting a user drops their memberships and invitations.
pub async fn delete_drops_memberships<P: Provider>(p: &P) {
    p.load_fixtures(&[USERS, NAMESPACES, MEMBERSHIP_INVITATIONS])
        .await
        .unwrap();
    let store = p.store();
    let ctx = RequestContext::new();

    store.user_delete(&ctx, USER_JANE).await.unwrap();
    let dev = store
        .namespace_resolve(&ctx, NamespaceResolver::TenantId, TENANT_DEV, &[])
        .await
        .unwrap();
    assert!(dev.member(USER_JANE).is_none());
    assert!(dev.member(USER_JOHN).is_some());

    store.user_delete(&ctx, USER_ALEX).await.unwrap();
    let err = store
        .membership_invitation_resolve(&ctx, TENANT_DEV, USER_ALEX)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = store.user_delete(&ctx, USER_JANE).await.unwrap_err();
    assert!(err.is_not_found());
}
