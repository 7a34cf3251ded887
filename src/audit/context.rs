//! Ambient attribution for tracked mutations.
//!
//! The active [`AuditContext`] lives in tokio task-local storage and is only
//! ever installed through [`with_audit_context`], which scopes it to a single
//! future. The previous value becomes visible again as soon as that future
//! completes, whether it returned `Ok`, returned `Err` or unwound, so a task
//! that goes on to do unrelated work never inherits a connector's identity.

use std::future::Future;

use tokio::task_local;
use uuid::Uuid;

/// Source recorded for changes made outside any sync run.
pub const USER_SOURCE: &str = "user";

/// Who is currently making changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditContext {
    source: String,
    sync_run_id: Option<Uuid>,
}

task_local! {
    static ACTIVE_AUDIT_CONTEXT: AuditContext;
}

impl AuditContext {
    /// Attribution used when no context is active.
    pub fn user() -> Self {
        Self {
            source: USER_SOURCE.to_string(),
            sync_run_id: None,
        }
    }

    /// Attribution for changes made by a connector during a sync run.
    pub fn for_run(connector_name: impl Into<String>, sync_run_id: Uuid) -> Self {
        Self {
            source: connector_name.into(),
            sync_run_id: Some(sync_run_id),
        }
    }

    /// Arbitrary attribution, e.g. an administrative script.
    pub fn new(source: impl Into<String>, sync_run_id: Option<Uuid>) -> Self {
        Self {
            source: source.into(),
            sync_run_id,
        }
    }

    /// The context active on the current task, or [`AuditContext::user`].
    pub fn current() -> Self {
        ACTIVE_AUDIT_CONTEXT
            .try_with(Clone::clone)
            .unwrap_or_else(|_| Self::user())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn sync_run_id(&self) -> Option<Uuid> {
        self.sync_run_id
    }
}

impl Default for AuditContext {
    fn default() -> Self {
        Self::user()
    }
}

/// Run `future` with `context` installed as the active audit context.
///
/// Scopes nest: an inner call shadows the outer context and the outer one is
/// visible again once the inner future finishes.
pub async fn with_audit_context<Fut, R>(context: AuditContext, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    ACTIVE_AUDIT_CONTEXT.scope(context, future).await
}
