//! Attribution and the append-only audit trail.
//!
//! [`context`] names who is making changes; [`store`] writes and queries the
//! resulting [`crate::models::audit_log_entry`] rows.

pub mod context;
pub mod store;

pub use context::{AuditContext, USER_SOURCE, with_audit_context};
pub use store::{AuditError, AuditLog, AuditStats, ChangeSet, FieldChange};
