//! Request context for storage operations.
//!
//! Every store call receives a [`RequestContext`]. It carries the tenant the
//! caller is acting for (used to scope tenant-owned collections automatically),
//! a correlation id for tracing, and the cooperative cancellation state that
//! long-running operations poll.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::id::TenantId;
use crate::error::{StorageError, StorageResult};

/// A cloneable cancellation flag shared between a caller and the store.
///
/// Cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cancellation state that can be moved into engine callbacks.
#[derive(Debug, Clone)]
pub struct Interrupt {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Interrupt {
    /// Returns `true` when the work should stop.
    pub fn should_stop(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Per-call context for store operations.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fleet_persistence::tenant::{RequestContext, TenantId};
///
/// let ctx = RequestContext::new()
///     .with_tenant(TenantId::new("acme"))
///     .with_timeout(Duration::from_secs(5))
///     .with_correlation_id("req-42");
///
/// assert_eq!(ctx.tenant().map(|t| t.as_str()), Some("acme"));
/// assert!(ctx.check().is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    tenant: Option<TenantId>,
    correlation_id: Option<String>,
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Creates an unscoped context (all tenants visible).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context scoped to the given tenant.
    pub fn for_tenant(tenant: impl Into<TenantId>) -> Self {
        Self::new().with_tenant(tenant.into())
    }

    /// Scopes the context to a tenant.
    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    /// Attaches a correlation ID for tracing.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Shares an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Sets a deadline relative to now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The tenant this call is scoped to, if any.
    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    /// The correlation ID, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// The cancellation token shared with the caller.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns a detached handle to the cancellation state.
    pub fn interrupt(&self) -> Interrupt {
        Interrupt {
            token: self.token.clone(),
            deadline: self.deadline,
        }
    }

    /// Returns `true` if cancelled or past the deadline.
    pub fn is_done(&self) -> bool {
        self.interrupt().should_stop()
    }

    /// Fails with [`StorageError::Cancelled`] when the context is done.
    pub fn check(&self) -> StorageResult<()> {
        if self.is_done() {
            Err(StorageError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unscoped_and_live() {
        let ctx = RequestContext::new();
        assert!(ctx.tenant().is_none());
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn test_cancel_through_shared_token() {
        let token = CancellationToken::new();
        let ctx = RequestContext::for_tenant("acme").with_cancellation(token.clone());
        assert!(ctx.check().is_ok());
        token.cancel();
        assert!(matches!(ctx.check(), Err(StorageError::Cancelled)));
        assert!(ctx.interrupt().should_stop());
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = RequestContext::new().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(ctx.is_done());
    }

    #[test]
    fn test_clone_shares_cancellation() {
        let ctx = RequestContext::new();
        let clone = ctx.clone();
        ctx.cancellation().cancel();
        assert!(clone.is_done());
    }
}
