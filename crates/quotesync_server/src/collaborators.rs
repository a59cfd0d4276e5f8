//! Default audit and notification sinks for the server.
//!
//! Both write structured `tracing` events; a deployment that needs a durable
//! audit table or push delivery plugs in its own implementations through
//! [`SyncServer::with_collaborators`](crate::SyncServer::with_collaborators).

use async_trait::async_trait;
use quotesync_engine::{AuditEntry, AuditSink, Notifier, SyncResult};

/// Writes audit entries as `tracing` events under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record_audit(&self, entry: AuditEntry) -> SyncResult<()> {
        tracing::info!(
            target: "audit",
            action = %entry.action,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            actor_id = %entry.actor_id,
            actor_name = %entry.actor_name,
            details = %entry.details,
            "audit"
        );
        Ok(())
    }
}

/// Logs one event per notified staff member.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier {
    staff: Vec<String>,
}

impl LogNotifier {
    /// Creates a notifier for the given staff user ids.
    pub fn new(staff: Vec<String>) -> Self {
        Self { staff }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn staff_recipients(&self) -> SyncResult<Vec<String>> {
        Ok(self.staff.clone())
    }

    async fn notify(&self, user_id: &str, title: &str, body: &str) -> SyncResult<()> {
        tracing::info!(target: "notification", user_id, title, body, "notify");
        Ok(())
    }
}
