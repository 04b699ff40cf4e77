use crate::error::Result;
use crate::store::Store;
use authcore_models::{AuditEvent, AuditQuery, NewAuditEvent};
use std::sync::Arc;
use uuid::Uuid;

/// Append-only audit sink shared by every service.
///
/// Persistence is best-effort: a failed write is logged at error level and
/// never changes the outcome of the operation being audited.
#[derive(Clone)]
pub struct AuditEmitter {
    store: Arc<dyn Store>,
}

impl AuditEmitter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record an event and wait for the write.
    pub async fn emit(&self, event: NewAuditEvent) {
        log_event(&event);
        if let Err(e) = self.store.append_audit_event(event).await {
            tracing::error!(error = %e, "Failed to persist audit event");
        }
    }

    /// Record an event on a background task so it survives caller cancellation.
    pub fn emit_detached(&self, event: NewAuditEvent) {
        let emitter = self.clone();
        tokio::spawn(async move {
            emitter.emit(event).await;
        });
    }

    pub async fn query(&self, tenant_id: Uuid, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        self.store.list_audit_events(tenant_id, query).await
    }
}

fn log_event(event: &NewAuditEvent) {
    tracing::info!(
        target: "audit",
        tenant_id = ?event.tenant_id,
        event_type = %event.event_type,
        outcome = %event.outcome,
        reason = event.reason.map(|r| r.as_str()),
        actor_id = event.actor_id.as_deref(),
        detail = event.detail.as_deref(),
        "audit"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use authcore_models::{events, AuditCategory, AuditEventBuilder, AuditOutcome, ErrorKind};

    #[tokio::test]
    async fn events_are_tenant_scoped_and_newest_first() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let emitter = AuditEmitter::new(store);
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();

        emitter
            .emit(AuditEventBuilder::new(Some(tenant_a), events::LOGIN_SUCCEEDED, AuditCategory::Authentication).build())
            .await;
        emitter
            .emit(
                AuditEventBuilder::new(Some(tenant_a), events::ACCESS_DECISION, AuditCategory::Authorization)
                    .deny(ErrorKind::Forbidden)
                    .build(),
            )
            .await;
        emitter
            .emit(AuditEventBuilder::new(Some(tenant_b), events::LOGIN_FAILED, AuditCategory::Authentication).build())
            .await;

        let listed = emitter.query(tenant_a, &AuditQuery::default()).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].event_type, events::ACCESS_DECISION);
        assert_eq!(listed[0].outcome, AuditOutcome::Deny);

        let denials = emitter
            .query(
                tenant_a,
                &AuditQuery {
                    outcome: Some(AuditOutcome::Deny),
                    ..AuditQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(denials.len(), 1);
    }
}
