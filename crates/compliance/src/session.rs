//! Session, session event and active session cases.

use chrono::{DateTime, Duration, TimeZone, Utc};
use fleet_persistence::core::SessionStore;
use fleet_persistence::models::{Session, SessionChanges, SessionEvent};
use fleet_persistence::query::{Enrichment, Order, Paginator, QueryOption, SessionResolver, Sorter};
use fleet_persistence::tenant::{RequestContext, TenantId};
use serde_json::json;

use crate::device::{DEVICE_1, DEVICE_2, DEVICE_3};
use crate::fixtures::{ACTIVE_SESSIONS, DEVICES, SESSIONS};
use crate::{Provider, TENANT_DEV, TENANT_STAGING};

/// Open, recorded shell on `device-1`, with an active record.
pub const SESSION_1: &str = "a3b0431f5df6a7827945d2e34872a5c781452bc36de42f8b1297fd9ecb012f68";
/// Closed exec on `device-1`.
pub const SESSION_2: &str = "e7f3a56d8b9e1dc4c285c98c8ea9c33032a17bda5e6c6eb1a2d7c8ac0d9d61d1";
/// Unauthenticated shell on `device-2`, no events yet.
pub const SESSION_3: &str = "fc2e1493d8b55a1d2e8c3b9e6f5d7a0c4b8e1f2a3c5d7e9b0a1c2d3e4f5a6b7c";

fn event(session: &str, kind: &str, seat: i64, timestamp: DateTime<Utc>) -> SessionEvent {
    SessionEvent {
        session: session.to_string(),
        tenant_id: TenantId::new(""),
        kind: kind.to_string(),
        timestamp,
        data: json!({"seq": seat}),
        seat,
    }
}

/// Activity and device enrichments decorate the listed page.
pub async fn list_with_enrichments<P: Provider>(p: &P) {
    p.load_fixtures(&[DEVICES, SESSIONS, ACTIVE_SESSIONS])
        .await
        .unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);

    let (sessions, total) = store
        .session_list(
            &dev,
            &[
                QueryOption::Sort(Sorter::new("started_at", Order::Asc)),
                QueryOption::Enrich(Enrichment::SessionActivity),
                QueryOption::Enrich(Enrichment::SessionDevice),
            ],
        )
        .await
        .unwrap();
    assert_eq!(total, 3);
    let uids: Vec<&str> = sessions.iter().map(|s| s.uid.as_str()).collect();
    assert_eq!(uids, vec![SESSION_1, SESSION_2, SESSION_3]);
    assert!(sessions[0].active);
    assert!(!sessions[1].active);
    assert!(!sessions[2].active);
    assert_eq!(sessions[0].device.as_ref().unwrap().uid, DEVICE_1);
    assert_eq!(sessions[2].device.as_ref().unwrap().uid, DEVICE_2);

    let (plain, _) = store.session_list(&dev, &[]).await.unwrap();
    assert!(plain.iter().all(|s| !s.active && s.device.is_none()));

    let staging = RequestContext::for_tenant(TENANT_STAGING);
    let (_, total) = store.session_list(&staging, &[]).await.unwrap();
    assert_eq!(total, 0);
}

/// Resolution by uid, including out-of-scope sessions.
pub async fn resolve_missing<P: Provider>(p: &P) {
    p.load_fixtures(&[SESSIONS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);

    let session = store
        .session_resolve(&dev, SessionResolver::Uid, SESSION_1, &[])
        .await
        .unwrap();
    assert_eq!(session.username, "root");
    assert_eq!(session.kind, "shell");
    assert_eq!(session.events.types, vec!["pty-req"]);
    assert_eq!(session.events.seats, vec![0]);

    let err = store
        .session_resolve(&dev, SessionResolver::Uid, "unknown", &[])
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let staging = RequestContext::for_tenant(TENANT_STAGING);
    let err = store
        .session_resolve(&staging, SessionResolver::Uid, SESSION_1, &[])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Creating a session opens an active record that closing removes.
pub async fn update_closes_active_record<P: Provider>(p: &P) {
    p.load_fixtures(&[SESSIONS, ACTIVE_SESSIONS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);

    store
        .session_create(
            &dev,
            Session::new("new-session", TenantId::new(TENANT_DEV), DEVICE_3, "root"),
        )
        .await
        .unwrap();
    store.active_session_resolve(&dev, "new-session").await.unwrap();

    let seen = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    store
        .session_update(
            &dev,
            "new-session",
            &SessionChanges {
                authenticated: Some(true),
                last_seen: Some(seen),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let active = store.active_session_resolve(&dev, "new-session").await.unwrap();
    assert_eq!(active.last_seen, seen);

    store
        .session_update(
            &dev,
            "new-session",
            &SessionChanges {
                closed: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let err = store
        .active_session_resolve(&dev, "new-session")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    let closed = store
        .session_resolve(&dev, SessionResolver::Uid, "new-session", &[])
        .await
        .unwrap();
    assert!(closed.closed);
    assert!(closed.authenticated);

    let err = store
        .session_update(
            &dev,
            "unknown",
            &SessionChanges {
                recorded: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    store.active_session_delete(&dev, SESSION_1).await.unwrap();
    let err = store
        .active_session_delete(&dev, SESSION_1)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Events feed the session's type and seat sets, which shrink on delete.
pub async fn events_track_types_and_seats<P: Provider>(p: &P) {
    p.load_fixtures(&[SESSIONS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);
    let start = Utc.with_ymd_and_hms(2023, 1, 3, 12, 0, 0).unwrap();

    for (kind, seat, offset) in [
        ("window-change", 0, 2),
        ("pty-req", 0, 0),
        ("pty-req", 1, 1),
    ] {
        store
            .session_events_create(
                &dev,
                event(SESSION_3, kind, seat, start + Duration::seconds(offset)),
            )
            .await
            .unwrap();
    }

    let session = store
        .session_resolve(&dev, SessionResolver::Uid, SESSION_3, &[])
        .await
        .unwrap();
    assert_eq!(session.events.types, vec!["window-change", "pty-req"]);
    assert_eq!(session.events.seats, vec![0, 1]);

    let (page, total) = store
        .session_events_list(&dev, SESSION_3, None, None, &Paginator::new(1, 2))
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].timestamp, start);
    assert_eq!(page[0].tenant_id.as_str(), TENANT_DEV);
    assert_eq!(page[1].seat, 1);

    let (_, seat_one) = store
        .session_events_list(&dev, SESSION_3, Some(1), None, &Paginator::new(1, 10))
        .await
        .unwrap();
    assert_eq!(seat_one, 1);
    let (pty, _) = store
        .session_events_list(&dev, SESSION_3, None, Some("pty-req"), &Paginator::new(1, 10))
        .await
        .unwrap();
    assert_eq!(pty.len(), 2);

    let deleted = store
        .session_events_delete(&dev, SESSION_3, Some(0), None)
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    let session = store
        .session_resolve(&dev, SessionResolver::Uid, SESSION_3, &[])
        .await
        .unwrap();
    assert_eq!(session.events.types, vec!["pty-req"]);
    assert_eq!(session.events.seats, vec![1]);

    let err = store
        .session_events_create(&dev, event("unknown", "pty-req", 0, start))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

/// Pruning by start time and the explicit delete paths.
pub async fn delete_before<P: Provider>(p: &P) {
    p.load_fixtures(&[SESSIONS, ACTIVE_SESSIONS]).await.unwrap();
    let store = p.store();
    let dev = RequestContext::for_tenant(TENANT_DEV);

    let cutoff = Utc.with_ymd_and_hms(2023, 1, 2, 12, 0, 0).unwrap();
    assert_eq!(store.session_delete_before(&dev, cutoff).await.unwrap(), 1);
    let (_, total) = store.session_list(&dev, &[]).await.unwrap();
    assert_eq!(total, 2);
    let err = store.active_session_resolve(&dev, SESSION_1).await.unwrap_err();
    assert!(err.is_not_found());

    store.session_delete(&dev, SESSION_2).await.unwrap();
    let err = store.session_delete(&dev, SESSION_2).await.unwrap_err();
    assert!(err.is_not_found());

    let deleted = store
        .session_delete_many(&dev, &[SESSION_3.to_string(), "unknown".to_string()])
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    let (_, total) = store.session_list(&dev, &[]).await.unwrap();
    assert_eq!(total, 0);
}
