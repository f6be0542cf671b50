use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{DocumentStore, StoreHandle};
use crate::core::{Collection, Engine, SessionStore, Update};
use crate::error::{OperationContext, StorageError, StorageResult};
use crate::models::{ActiveSession, Device, Session, SessionChanges, SessionEvent};
use crate::query::{
    Condition, Enrichment, Order, Paginator, QueryOption, SessionResolver, Stage, compile_paginator,
};
use crate::tenant::RequestContext;

impl StoreHandle<'_> {
    /// Lists sessions.
    pub fn session_list(&mut self, opts: &[QueryOption]) -> StorageResult<(Vec<Session>, u64)> {
        let plan = self.plan(Collection::Sessions, opts)?;
        let (mut sessions, total) = self.list_plan::<Session>(&plan)?;
        self.enrich_sessions(&mut sessions, plan.enrichments())?;
        Ok((sessions, total))
    }

    /// Resolves exactly one session.
    pub fn session_resolve(
        &mut self,
        resolver: SessionResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<Session> {
        let (session, plan) = self.resolve_plan::<Session>(resolver, value, opts)?;
        let mut sessions = vec![session];
        self.enrich_sessions(&mut sessions, plan.enrichments())?;
        sessions
            .pop()
            .ok_or_else(|| StorageError::not_found("session", value))
    }

    /// Creates a session and its active-session record.
    pub fn session_create(&mut self, session: Session) -> StorageResult<Session> {
        self.insert(&session)?;
        self.insert(&ActiveSession {
            uid: session.uid.clone(),
            tenant_id: session.tenant_id.clone(),
            last_seen: session.last_seen,
        })?;
        Ok(session)
    }

    /// Applies changes to a session.
    ///
    /// Closing a session drops its active record; a new `last_seen` is
    /// mirrored onto the active record.
    pub fn session_update(&mut self, uid: &str, changes: &SessionChanges) -> StorageResult<()> {
        let condition = self.scoped(Collection::Sessions, Condition::eq("uid", uid));
        let last_seen = changes.last_seen.map(|at| at.timestamp_millis());
        let update = Update::new()
            .set_opt("authenticated", changes.authenticated)
            .set_opt("recorded", changes.recorded)
            .set_opt("closed", changes.closed)
            .set_opt("last_seen", last_seen)
            .set_opt("term", changes.term.clone());

        if update.is_empty() {
            self.get::<Session>(condition, uid)?;
            return Ok(());
        }
        self.update_one(Collection::Sessions, &condition, &update, uid)?;

        let active = self.scoped(Collection::ActiveSessions, Condition::eq("uid", uid));
        if changes.closed == Some(true) {
            self.exec.delete(Collection::ActiveSessions, &active, false)?;
        } else if let Some(last_seen) = last_seen {
            self.exec.update(
                Collection::ActiveSessions,
                &active,
                &Update::new().set("last_seen", last_seen),
                false,
            )?;
        }
        Ok(())
    }

    /// Rewrites the device uid of every session of `old_uid`.
    pub fn session_update_device_uid(&mut self, old_uid: &str, new_uid: &str) -> StorageResult<u64> {
        let condition = self.scoped(Collection::Sessions, Condition::eq("device_uid", old_uid));
        let result = self.exec.update(
            Collection::Sessions,
            &condition,
            &Update::new().set("device_uid", new_uid),
            true,
        )?;
        Ok(result.matched)
    }

    /// Deletes a session with its events and active record.
    pub fn session_delete(&mut self, uid: &str) -> StorageResult<()> {
        if self.delete_sessions(&[uid])? == 0 {
            return Err(StorageError::not_found("session", uid));
        }
        Ok(())
    }

    /// Deletes several sessions, ignoring unknown uids.
    pub fn session_delete_many(&mut self, uids: &[String]) -> StorageResult<u64> {
        let uids: Vec<&str> = uids.iter().map(String::as_str).collect();
        self.delete_sessions(&uids)
    }

    /// Deletes sessions started before `before`.
    pub fn session_delete_before(&mut self, before: DateTime<Utc>) -> StorageResult<u64> {
        let condition = self.scoped(
            Collection::Sessions,
            Condition::lt("started_at", before.timestamp_millis()),
        );
        let uids: Vec<String> = self
            .exec
            .find(Collection::Sessions, &[Stage::Match(condition)])?
            .iter()
            .filter_map(|doc| doc.get("uid").and_then(Value::as_str).map(str::to_string))
            .collect();
        let uids: Vec<&str> = uids.iter().map(String::as_str).collect();
        let deleted = self.delete_sessions(&uids)?;
        tracing::info!(deleted, before = %before, "Pruned sessions");
        Ok(deleted)
    }

    fn delete_sessions(&mut self, uids: &[&str]) -> StorageResult<u64> {
        if uids.is_empty() {
            return Ok(0);
        }
        let sessions = self.scoped(
            Collection::Sessions,
            Condition::is_in("uid", uids.iter().copied()),
        );
        let found: Vec<String> = self
            .exec
            .find(Collection::Sessions, &[Stage::Match(sessions.clone())])?
            .iter()
            .filter_map(|doc| doc.get("uid").and_then(Value::as_str).map(str::to_string))
            .collect();
        if found.is_empty() {
            return Ok(0);
        }

        let found_uids = || found.iter().map(String::as_str);
        self.exec.delete(
            Collection::SessionsEvents,
            &Condition::is_in("session", found_uids()),
            true,
        )?;
        self.exec
            .delete(Collection::ActiveSessions, &Condition::is_in("uid", found_uids()), true)?;
        self.exec.delete(Collection::Sessions, &sessions, true)
    }

    /// Records an event and adds its type and seat to the session's sets.
    pub fn session_events_create(&mut self, mut event: SessionEvent) -> StorageResult<()> {
        let condition = self.scoped(Collection::Sessions, Condition::eq("uid", event.session.as_str()));
        let session = self.get::<Session>(condition.clone(), &event.session)?;
        if event.tenant_id.is_empty() {
            event.tenant_id = session.tenant_id;
        }

        self.insert(&event)?;
        self.exec.update(
            Collection::Sessions,
            &condition,
            &Update::new()
                .add_to_set("events.types", event.kind.as_str())
                .add_to_set("events.seats", event.seat),
            false,
        )?;
        Ok(())
    }

    fn events_condition(&self, uid: &str, seat: Option<i64>, kind: Option<&str>) -> Condition {
        let mut parts = vec![Condition::eq("session", uid)];
        if let Some(seat) = seat {
            parts.push(Condition::eq("seat", seat));
        }
        if let Some(kind) = kind {
            parts.push(Condition::eq("type", kind));
        }
        self.scoped(Collection::SessionsEvents, Condition::all(parts))
    }

    /// Lists a session's events in timestamp order.
    pub fn session_events_list(
        &mut self,
        uid: &str,
        seat: Option<i64>,
        kind: Option<&str>,
        paginator: &Paginator,
    ) -> StorageResult<(Vec<SessionEvent>, u64)> {
        let condition = self.events_condition(uid, seat, kind);
        let mut stages = vec![
            Stage::Match(condition.clone()),
            Stage::Sort {
                field: "timestamp".to_string(),
                order: Order::Asc,
            },
        ];
        stages.extend(compile_paginator(paginator));

        let events = self.find_all::<SessionEvent>(&stages)?;
        let total = self.exec.count(Collection::SessionsEvents, &condition)?;
        Ok((events, total))
    }

    /// Deletes a session's events and recomputes its type and seat sets.
    pub fn session_events_delete(
        &mut self,
        uid: &str,
        seat: Option<i64>,
        kind: Option<&str>,
    ) -> StorageResult<u64> {
        let condition = self.events_condition(uid, seat, kind);
        let deleted = self.exec.delete(Collection::SessionsEvents, &condition, true)?;
        if deleted == 0 {
            return Ok(0);
        }

        let all_events = self.events_condition(uid, None, None);
        let remaining = self.find_all::<SessionEvent>(&[Stage::Match(all_events)])?;
        let types: BTreeSet<&str> = remaining.iter().map(|e| e.kind.as_str()).collect();
        let seats: BTreeSet<i64> = remaining.iter().map(|e| e.seat).collect();

        let session = self.scoped(Collection::Sessions, Condition::eq("uid", uid));
        self.exec.update(
            Collection::Sessions,
            &session,
            &Update::new()
                .set("events.types", types.into_iter().collect::<Vec<_>>())
                .set("events.seats", seats.into_iter().collect::<Vec<_>>()),
            false,
        )?;
        Ok(deleted)
    }

    /// Resolves a session's active record.
    pub fn active_session_resolve(&mut self, uid: &str) -> StorageResult<ActiveSession> {
        let condition = self.scoped(Collection::ActiveSessions, Condition::eq("uid", uid));
        self.get::<ActiveSession>(condition, uid)
    }

    /// Deletes a session's active record.
    pub fn active_session_delete(&mut self, uid: &str) -> StorageResult<()> {
        let condition = self.scoped(Collection::ActiveSessions, Condition::eq("uid", uid));
        self.delete_one(Collection::ActiveSessions, &condition, uid)
    }

    fn enrich_sessions(&mut self, sessions: &mut [Session], enrichments: &[Enrichment]) -> StorageResult<()> {
        if sessions.is_empty() {
            return Ok(());
        }
        for enrichment in enrichments {
            match enrichment {
                Enrichment::SessionActivity => {
                    let uids = sessions.iter().map(|s| s.uid.as_str());
                    let active: BTreeSet<String> = self
                        .find_all::<ActiveSession>(&[Stage::Match(Condition::is_in("uid", uids))])?
                        .into_iter()
                        .map(|a| a.uid)
                        .collect();
                    for session in sessions.iter_mut() {
                        session.active = active.contains(&session.uid);
                    }
                }
                Enrichment::SessionDevice => {
                    let uids = sessions.iter().map(|s| s.device_uid.as_str());
                    let devices: HashMap<String, Device> = self
                        .find_all::<Device>(&[Stage::Match(Condition::is_in("uid", uids))])?
                        .into_iter()
                        .map(|d| (d.uid.clone(), d))
                        .collect();
                    for session in sessions.iter_mut() {
                        session.device = devices.get(&session.device_uid).cloned();
                    }
                }
                Enrichment::MembersData | Enrichment::AcceptedDeviceCount => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<E: Engine> SessionStore for DocumentStore<E> {
    async fn session_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<Session>, u64)> {
        self.run(ctx, |h| h.session_list(opts))
            .await
            .in_operation("session", "list")
    }

    async fn session_resolve(
        &self,
        ctx: &RequestContext,
        resolver: SessionResolver,
        value: &str,
        opts: &[QueryOption],
    ) -> StorageResult<Session> {
        self.run(ctx, |h| h.session_resolve(resolver, value, opts))
            .await
            .in_operation("session", "resolve")
    }

    async fn session_create(&self, ctx: &RequestContext, session: Session) -> StorageResult<Session> {
        self.run_in_transaction(ctx, move |h| h.session_create(session))
            .await
            .in_operation("session", "create")
    }

    async fn session_update(
        &self,
        ctx: &RequestContext,
        uid: &str,
        changes: &SessionChanges,
    ) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| h.session_update(uid, changes))
            .await
            .in_operation("session", "update")
    }

    async fn session_update_device_uid(
        &self,
        ctx: &RequestContext,
        old_uid: &str,
        new_uid: &str,
    ) -> StorageResult<u64> {
        self.run(ctx, |h| h.session_update_device_uid(old_uid, new_uid))
            .await
            .in_operation("session", "update device uid")
    }

    async fn session_delete(&self, ctx: &RequestContext, uid: &str) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| h.session_delete(uid))
            .await
            .in_operation("session", "delete")
    }

    async fn session_delete_many(&self, ctx: &RequestContext, uids: &[String]) -> StorageResult<u64> {
        self.run_in_transaction(ctx, |h| h.session_delete_many(uids))
            .await
            .in_operation("session", "delete many")
    }

    async fn session_delete_before(
        &self,
        ctx: &RequestContext,
        before: DateTime<Utc>,
    ) -> StorageResult<u64> {
        self.run_in_transaction(ctx, |h| h.session_delete_before(before))
            .await
            .in_operation("session", "delete before")
    }

    async fn session_events_create(&self, ctx: &RequestContext, event: SessionEvent) -> StorageResult<()> {
        self.run_in_transaction(ctx, move |h| h.session_events_create(event))
            .await
            .in_operation("session event", "create")
    }

    async fn session_events_list(
        &self,
        ctx: &RequestContext,
        uid: &str,
        seat: Option<i64>,
        kind: Option<&str>,
        paginator: &Paginator,
    ) -> StorageResult<(Vec<SessionEvent>, u64)> {
        self.run(ctx, |h| h.session_events_list(uid, seat, kind, paginator))
            .await
            .in_operation("session event", "list")
    }

    async fn session_events_delete(
        &self,
        ctx: &RequestContext,
        uid: &str,
        seat: Option<i64>,
        kind: Option<&str>,
    ) -> StorageResult<u64> {
        self.run_in_transaction(ctx, |h| h.session_events_delete(uid, seat, kind))
            .await
            .in_operation("session event", "delete")
    }

    async fn active_session_resolve(&self, ctx: &RequestContext, uid: &str) -> StorageResult<ActiveSession> {
        self.run(ctx, |h| h.active_session_resolve(uid))
            .await
            .in_operation("active session", "resolve")
    }

    async fn active_session_delete(&self, ctx: &RequestContext, uid: &str) -> StorageResult<()> {
        self.run(ctx, |h| h.active_session_delete(uid))
            .await
            .in_operation("active session", "delete")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryEngine;
    use crate::core::DeviceStore;
    use crate::tenant::TenantId;
    use serde_json::json;

    fn event(session: &str, kind: &str, seat: i64, offset_ms: i64) -> SessionEvent {
        SessionEvent {
            session: session.to_string(),
            tenant_id: TenantId::default(),
            kind: kind.to_string(),
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000 + offset_ms).unwrap(),
            data: json!({"n": offset_ms}),
            seat,
        }
    }

    async fn with_session() -> (DocumentStore<MemoryEngine>, RequestContext) {
        let store = DocumentStore::new(MemoryEngine::new());
        let ctx = RequestContext::for_tenant("t1");
        store
            .session_create(&ctx, Session::new("s1", TenantId::new("t1"), "d1", "root"))
            .await
            .unwrap();
        (store, ctx)
    }

    #[tokio::test]
    async fn test_events_update_sets_and_paginate() {
        let (store, ctx) = with_session().await;
        store.session_events_create(&ctx, event("s1", "pty-req", 0, 2)).await.unwrap();
        store.session_events_create(&ctx, event("s1", "exit", 1, 1)).await.unwrap();
        store.session_events_create(&ctx, event("s1", "pty-req", 1, 3)).await.unwrap();

        let session = store
            .session_resolve(&ctx, SessionResolver::Uid, "s1", &[])
            .await
            .unwrap();
        assert_eq!(session.events.types, vec!["pty-req", "exit"]);
        assert_eq!(session.events.seats, vec![0, 1]);

        let (events, total) = store
            .session_events_list(&ctx, "s1", None, None, &Paginator::new(1, 2))
            .await
            .unwrap();
        assert_eq!(total, 3);
        let kinds: Vec<&str> = events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["exit", "pty-req"]);
        assert_eq!(events[0].tenant_id, TenantId::new("t1"));

        let deleted = store
            .session_events_delete(&ctx, "s1", Some(1), None)
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        let session = store
            .session_resolve(&ctx, SessionResolver::Uid, "s1", &[])
            .await
            .unwrap();
        assert_eq!(session.events.types, vec!["pty-req"]);
        assert_eq!(session.events.seats, vec![0]);
    }

    #[tokio::test]
    async fn test_event_for_missing_session_fails() {
        let (store, ctx) = with_session().await;
        let err = store
            .session_events_create(&ctx, event("nope", "exit", 0, 0))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_close_drops_active_record_and_enrichment() {
        let (store, ctx) = with_session().await;
        let opts = [QueryOption::Enrich(Enrichment::SessionActivity)];
        let (sessions, _) = store.session_list(&ctx, &opts).await.unwrap();
        assert!(sessions[0].active);

        store
            .session_update(
                &ctx,
                "s1",
                &SessionChanges {
                    closed: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let (sessions, _) = store.session_list(&ctx, &opts).await.unwrap();
        assert!(sessions[0].closed);
        assert!(!sessions[0].active);
        assert!(store.active_session_resolve(&ctx, "s1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_device_enrichment_and_uid_migration() {
        let (store, ctx) = with_session().await;
        let mut device = Device::new(TenantId::new("t1"), "web", "aa");
        device.uid = "d2".to_string();
        store.device_create(&ctx, device).await.unwrap();

        store.device_migrate_uid(&ctx, "d1", "d2").await.unwrap();
        let session = store
            .session_resolve(
                &ctx,
                SessionResolver::Uid,
                "s1",
                &[QueryOption::Enrich(Enrichment::SessionDevice)],
            )
            .await
            .unwrap();
        assert_eq!(session.device_uid, "d2");
        assert_eq!(session.device.map(|d| d.name), Some("web".to_string()));
    }

    #[tokio::test]
    async fn test_delete_before() {
        let (store, ctx) = with_session().await;
        let mut old = Session::new("s0", TenantId::new("t1"), "d1", "root");
        old.started_at = Utc::now() - chrono::Duration::days(30);
        store.session_create(&ctx, old).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(1);
        assert_eq!(store.session_delete_before(&ctx, cutoff).await.unwrap(), 1);
        let (sessions, _) = store.session_list(&ctx, &[]).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].uid, "s1");
        assert!(store.session_delete(&ctx, "s0").await.unwrap_err().is_not_found());
    }
}
