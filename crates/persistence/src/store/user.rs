use async_trait::async_trait;

use super::{DocumentStore, StoreHandle, generate_id};
use crate::core::{Collection, Engine, Update, UserStore};
use crate::error::{OperationContext, StorageError, StorageResult};
use crate::models::{Namespace, User, UserChanges, UserInfo, UserStatus, normalize};
use crate::query::{Condition, Conflicts, QueryOption, Stage, UserConflicts, UserResolver, detect_conflicts};
use crate::tenant::RequestContext;

impl StoreHandle<'_> {
    /// Lists users.
    pub fn user_list(&mut self, opts: &[QueryOption]) -> StorageResult<(Vec<User>, u64)> {
        let plan = self.plan(Collection::Users, opts)?;
        self.list_plan::<User>(&plan)
    }

    /// Creates a user; email and username are lowercased.
    pub fn user_create(&mut self, mut user: User) -> StorageResult<User> {
        generate_id(&mut user.id);
        user.email = normalize(&user.email);
        user.username = normalize(&user.username);
        self.insert(&user)?;
        Ok(user)
    }

    /// Creates a placeholder user in the invited state.
    pub fn user_create_invited(&mut self, email: &str) -> StorageResult<User> {
        let mut user = User::new("", "", email, "");
        user.status = UserStatus::Invited;
        self.user_create(user)
    }

    /// Resolves exactly one user.
    pub fn user_resolve(&mut self, resolver: UserResolver, value: &str) -> StorageResult<User> {
        let (user, _) = self.resolve_plan::<User>(resolver, value, &[])?;
        Ok(user)
    }

    /// Reports which probe fields collide with other users.
    pub fn user_conflicts(&mut self, probe: &UserConflicts) -> StorageResult<Conflicts> {
        detect_conflicts(&mut *self.exec, None, probe)
    }

    /// Applies changes to a user.
    pub fn user_update(&mut self, id: &str, changes: &UserChanges) -> StorageResult<()> {
        let mut update = Update::new()
            .set_opt("name", changes.name.clone())
            .set_opt("username", changes.username.as_deref().map(normalize))
            .set_opt("email", changes.email.as_deref().map(normalize))
            .set_opt("password_digest", changes.password_digest.clone())
            .set_opt("last_login", changes.last_login.map(|at| at.timestamp_millis()))
            .set_opt("preferences.preferred_namespace", changes.preferred_namespace.clone())
            .set_opt("max_namespaces", changes.max_namespaces);
        if let Some(status) = changes.status {
            update = update.set("status", serde_json::to_value(status)?);
        }

        let condition = Condition::eq("id", id);
        if update.is_empty() {
            self.get::<User>(condition, id)?;
            return Ok(());
        }
        self.update_one(Collection::Users, &condition, &update, id)?;
        Ok(())
    }

    /// Namespaces the user owns and those they are only a member of.
    pub fn user_get_info(&mut self, id: &str) -> StorageResult<UserInfo> {
        self.get::<User>(Condition::eq("id", id), id)?;

        let owned_namespaces = self.find_all::<Namespace>(&[Stage::Match(Condition::eq("owner", id))])?;
        let associated_namespaces = self.find_all::<Namespace>(&[Stage::Match(Condition::all([
            Condition::elem_match("members", Condition::eq("id", id)),
            Condition::ne("owner", id),
        ]))])?;

        Ok(UserInfo {
            owned_namespaces,
            associated_namespaces,
        })
    }

    /// Deletes a user, their memberships and their invitations.
    pub fn user_delete(&mut self, id: &str) -> StorageResult<()> {
        let user = Condition::eq("id", id);
        if self.exec.delete(Collection::Users, &user, false)? == 0 {
            return Err(StorageError::not_found("user", id));
        }

        let memberships = self.exec.update(
            Collection::Namespaces,
            &Condition::elem_match("members", Condition::eq("id", id)),
            &Update::new().pull_matching("members", Condition::eq("id", id)),
            true,
        )?;
        let invitations = self.exec.delete(
            Collection::MembershipInvitations,
            &Condition::eq("user_id", id),
            true,
        )?;
        tracing::debug!(
            user = id,
            memberships = memberships.modified,
            invitations,
            "Deleted user"
        );
        Ok(())
    }
}

#[async_trait]
impl<E: Engine> UserStore for DocumentStore<E> {
    async fn user_list(
        &self,
        ctx: &RequestContext,
        opts: &[QueryOption],
    ) -> StorageResult<(Vec<User>, u64)> {
        self.run(ctx, |h| h.user_list(opts))
            .await
            .in_operation("user", "list")
    }

    async fn user_create(&self, ctx: &RequestContext, user: User) -> StorageResult<User> {
        self.run(ctx, move |h| h.user_create(user))
            .await
            .in_operation("user", "create")
    }

    async fn user_create_invited(&self, ctx: &RequestContext, email: &str) -> StorageResult<User> {
        self.run(ctx, |h| h.user_create_invited(email))
            .await
            .in_operation("user", "create invited")
    }

    async fn user_resolve(
        &self,
        ctx: &RequestContext,
        resolver: UserResolver,
        value: &str,
    ) -> StorageResult<User> {
        self.run(ctx, |h| h.user_resolve(resolver, value))
            .await
            .in_operation("user", "resolve")
    }

    async fn user_conflicts(
        &self,
        ctx: &RequestContext,
        probe: &UserConflicts,
    ) -> StorageResult<Conflicts> {
        self.run(ctx, |h| h.user_conflicts(probe))
            .await
            .in_operation("user", "check conflicts")
    }

    async fn user_update(
        &self,
        ctx: &RequestContext,
        id: &str,
        changes: &UserChanges,
    ) -> StorageResult<()> {
        self.run(ctx, |h| h.user_update(id, changes))
            .await
            .in_operation("user", "update")
    }

    async fn user_get_info(&self, ctx: &RequestContext, id: &str) -> StorageResult<UserInfo> {
        self.run(ctx, |h| h.user_get_info(id))
            .await
            .in_operation("user", "get info")
    }

    async fn user_delete(&self, ctx: &RequestContext, id: &str) -> StorageResult<()> {
        self.run_in_transaction(ctx, |h| h.user_delete(id))
            .await
            .in_operation("user", "delete")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryEngine;
    use crate::core::{MemberStore, NamespaceStore};
    use crate::models::{Member, Role};

    #[tokio::test]
    async fn test_create_lowercases_and_rejects_duplicates() {
        let store = DocumentStore::new(MemoryEngine::new());
        let ctx = RequestContext::new();
        let user = store
            .user_create(&ctx, User::new("John", "John.Doe", "John@Example.com", "x"))
            .await
            .unwrap();
        assert_eq!(user.username, "john.doe");
        assert_eq!(user.email, "john@example.com");

        let found = store
            .user_resolve(&ctx, UserResolver::Email, "JOHN@example.COM")
            .await
            .unwrap();
        assert_eq!(found.id, user.id);

        let err = store
            .user_create(&ctx, User::new("Other", "other", "john@example.com", "y"))
            .await
            .unwrap_err();
        assert_eq!(err.conflicting_fields(), Some(&["email".to_string()][..]));

        let conflicts = store
            .user_conflicts(
                &ctx,
                &UserConflicts {
                    id: None,
                    email: "nobody@example.com".into(),
                    username: "JOHN.DOE".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(conflicts.fields, vec!["username"]);
    }

    #[tokio::test]
    async fn test_invited_users_do_not_collide_on_empty_username() {
        let store = DocumentStore::new(MemoryEngine::new());
        let ctx = RequestContext::new();
        let a = store.user_create_invited(&ctx, "a@example.com").await.unwrap();
        let b = store.user_create_invited(&ctx, "b@example.com").await.unwrap();
        assert_eq!(a.status, UserStatus::Invited);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_info_and_delete() {
        let store = DocumentStore::new(MemoryEngine::new());
        let ctx = RequestContext::new();
        let owner = store
            .user_create(&ctx, User::new("O", "owner", "o@example.com", "x"))
            .await
            .unwrap();
        let guest = store
            .user_create(&ctx, User::new("G", "guest", "g@example.com", "x"))
            .await
            .unwrap();
        let ns = store
            .namespace_create(&ctx, Namespace::new("ns", owner.id.clone()))
            .await
            .unwrap();
        store
            .namespace_create_membership(&ctx, ns.tenant_id.as_str(), Member::new(guest.id.clone(), Role::Observer))
            .await
            .unwrap();

        let info = store.user_get_info(&ctx, &owner.id).await.unwrap();
        assert_eq!(info.owned_namespaces.len(), 1);
        assert!(info.associated_namespaces.is_empty());
        let info = store.user_get_info(&ctx, &guest.id).await.unwrap();
        assert!(info.owned_namespaces.is_empty());
        assert_eq!(info.associated_namespaces.len(), 1);

        store.user_delete(&ctx, &guest.id).await.unwrap();
        let info = store.user_get_info(&ctx, &owner.id).await.unwrap();
        assert_eq!(info.owned_namespaces[0].members.len(), 1);
        assert!(store.user_delete(&ctx, &guest.id).await.unwrap_err().is_not_found());
    }
}
