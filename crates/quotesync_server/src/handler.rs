//! Request handlers for the quotation endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use quotesync_engine::{Actor, QuotationStateMachine, QuotationStore, SyncEventBus, SyncResult};
use quotesync_protocol::{
    CreateQuotationRequest, Quotation, QuotationId, QuotationPatch, StateChangeRequest, SyncEvent,
};
use std::future::Future;
use std::sync::Arc;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Authoritative store.
    pub store: Arc<dyn QuotationStore>,
    /// Lifecycle state machine over `store`.
    pub machine: QuotationStateMachine,
    /// Bus receiving every change made through the server.
    pub bus: SyncEventBus,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn QuotationStore>,
        machine: QuotationStateMachine,
        bus: SyncEventBus,
    ) -> Self {
        Self {
            config,
            store,
            machine,
            bus,
        }
    }
}

/// Handles quotation requests.
#[derive(Clone)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Returns the handler context.
    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    /// Checks that the store answers. Any failure reads as unavailable.
    pub async fn handle_health(&self) -> ServerResult<()> {
        self.bounded(self.context.store.ping())
            .await
            .map_err(|e| match e {
                ServerError::Unavailable(_) => e,
                other => ServerError::Unavailable(other.to_string()),
            })
    }

    /// Lists a client's quotations.
    pub async fn handle_list(&self, client_email: &str) -> ServerResult<Vec<Quotation>> {
        let client_email = client_email.trim();
        if client_email.is_empty() {
            return Err(ServerError::InvalidRequest(
                "client query parameter is required".into(),
            ));
        }
        self.bounded(self.context.store.find_by_client(client_email))
            .await
    }

    /// Creates a quotation in the initial state.
    pub async fn handle_create(&self, request: CreateQuotationRequest) -> ServerResult<Quotation> {
        if request.client_email.trim().is_empty() {
            return Err(ServerError::InvalidRequest("clientEmail is required".into()));
        }
        let record = self.bounded(self.context.store.create(request)).await?;
        tracing::info!(record_id = %record.id, client = %record.client_email, "quotation created");
        self.context.bus.emit(SyncEvent::created(&record));
        Ok(record)
    }

    /// Fetches one quotation.
    pub async fn handle_get(&self, id: QuotationId) -> ServerResult<Quotation> {
        self.bounded(self.context.store.get(id)).await
    }

    /// Applies a content patch.
    ///
    /// Lifecycle changes are refused here; they go through
    /// [`handle_state_change`](Self::handle_state_change) so the table and
    /// the cascade apply.
    pub async fn handle_patch(
        &self,
        id: QuotationId,
        patch: QuotationPatch,
    ) -> ServerResult<Quotation> {
        if patch.state.is_some() {
            return Err(ServerError::InvalidRequest(
                "state changes go through POST /quotations/{id}/state".into(),
            ));
        }
        if patch.is_empty() {
            return Err(ServerError::InvalidRequest("empty patch".into()));
        }
        let record = self.bounded(self.context.store.update(id, patch)).await?;
        tracing::debug!(record_id = %id, version = record.version, "quotation patched");
        self.context.bus.emit(SyncEvent::updated(&record));
        Ok(record)
    }

    /// Moves a quotation to another lifecycle state.
    ///
    /// The transition runs on its own task and only the wait for it is
    /// bounded. A request that times out answers 503 while the write, the
    /// cascade and the audit entry still complete.
    pub async fn handle_state_change(
        &self,
        id: QuotationId,
        request: StateChangeRequest,
        actor: &Actor,
    ) -> ServerResult<Quotation> {
        let machine = self.context.machine.clone();
        let task_actor = actor.clone();
        let task =
            tokio::spawn(async move { machine.transition(id, request, &task_actor).await });

        let timeout = self.context.config.request_timeout;
        let outcome = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => {
                return Err(ServerError::Internal(format!("state change task failed: {e}")));
            }
            Err(_) => {
                tracing::warn!(
                    record_id = %id,
                    ?timeout,
                    "state change still running at request timeout"
                );
                return Err(ServerError::Unavailable(format!(
                    "state change for {id} exceeded {timeout:?} and is still running"
                )));
            }
        };
        tracing::info!(
            record_id = %id,
            from = %outcome.previous,
            to = %outcome.record.state,
            superseded = outcome.superseded.len(),
            actor = %actor.id,
            "state changed"
        );
        Ok(outcome.record)
    }

    async fn bounded<T>(&self, work: impl Future<Output = SyncResult<T>>) -> ServerResult<T> {
        match tokio::time::timeout(self.context.config.request_timeout, work).await {
            Ok(result) => result.map_err(ServerError::from),
            Err(_) => Err(ServerError::Unavailable(format!(
                "request exceeded {:?}",
                self.context.config.request_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{LogNotifier, TracingAuditSink};
    use quotesync_engine::{
        AuditSink, MemoryQuotationStore, RecordingAuditSink, STATE_CHANGE_ACTION,
        SUPERSEDED_ACTION,
    };
    use quotesync_protocol::{Fields, QuotationState, SyncEventKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn setup() -> (Arc<MemoryQuotationStore>, RequestHandler) {
        setup_with(ServerConfig::default(), Arc::new(TracingAuditSink))
    }

    fn setup_with(
        config: ServerConfig,
        audit: Arc<dyn AuditSink>,
    ) -> (Arc<MemoryQuotationStore>, RequestHandler) {
        let store = Arc::new(MemoryQuotationStore::new());
        let bus = SyncEventBus::new();
        let machine = QuotationStateMachine::new(
            store.clone(),
            audit,
            Arc::new(LogNotifier::default()),
            bus.clone(),
        );
        let context = Arc::new(HandlerContext::new(config, store.clone(), machine, bus));
        (store, RequestHandler::new(context))
    }

    fn create_request(client: &str) -> CreateQuotationRequest {
        CreateQuotationRequest {
            id: None,
            client_email: client.into(),
            fields: [("empresa".to_string(), json!("Norte"))].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn create_emits_created() {
        let (_, handler) = setup();
        let created = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&created);
        let _sub = handler
            .context()
            .bus
            .subscribe(SyncEventKind::Created, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });

        let record = handler
            .handle_create(create_request("a@example.com"))
            .await
            .unwrap();

        assert_eq!(record.state, QuotationState::Cargada);
        assert_eq!(record.version, 1);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn create_requires_client() {
        let (_, handler) = setup();
        let result = handler.handle_create(create_request("  ")).await;
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn patch_refuses_state_changes() {
        let (_, handler) = setup();
        let record = handler
            .handle_create(create_request("a@example.com"))
            .await
            .unwrap();

        let result = handler
            .handle_patch(record.id, QuotationPatch::state(QuotationState::Activa))
            .await;
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));

        let result = handler
            .handle_patch(record.id, QuotationPatch::default())
            .await;
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn patch_bumps_version() {
        let (_, handler) = setup();
        let record = handler
            .handle_create(create_request("a@example.com"))
            .await
            .unwrap();

        let mut fields = record.fields.clone();
        fields.insert("notas".into(), json!("urgente"));
        let patched = handler
            .handle_patch(record.id, QuotationPatch::fields(fields))
            .await
            .unwrap();

        assert_eq!(patched.version, 2);
        assert_eq!(patched.field("notas"), Some(&json!("urgente")));
    }

    #[tokio::test]
    async fn guarded_patch_on_moved_record_conflicts() {
        let (store, handler) = setup();
        let record = handler
            .handle_create(create_request("a@example.com"))
            .await
            .unwrap();
        handler
            .handle_patch(record.id, QuotationPatch::fields(record.fields.clone()))
            .await
            .unwrap();

        let result = handler
            .handle_patch(
                record.id,
                QuotationPatch::fields(Fields::new()).expecting(record.version),
            )
            .await;
        assert_eq!(
            result,
            Err(ServerError::StaleWrite {
                id: record.id,
                expected: 1,
                actual: 2,
            })
        );
        assert_eq!(result.unwrap_err().status(), axum::http::StatusCode::CONFLICT);
        assert_eq!(store.snapshot(record.id).unwrap().version, 2);
    }

    #[tokio::test]
    async fn unavailable_store_fails_health() {
        let (store, handler) = setup();
        store.set_available(false);
        assert!(matches!(
            handler.handle_health().await,
            Err(ServerError::Unavailable(_))
        ));
        assert!(matches!(
            handler.handle_get(QuotationId::new()).await,
            Err(ServerError::Database(_))
        ));
    }

    #[tokio::test]
    async fn state_change_applies_table() {
        let (_, handler) = setup();
        let record = handler
            .handle_create(create_request("a@example.com"))
            .await
            .unwrap();

        let active = handler
            .handle_state_change(
                record.id,
                StateChangeRequest::new(QuotationState::Activa),
                &Actor::system(),
            )
            .await
            .unwrap();
        assert_eq!(active.state, QuotationState::Activa);

        let rejected = handler
            .handle_state_change(
                record.id,
                StateChangeRequest::new(QuotationState::Aceptada),
                &Actor::system(),
            )
            .await;
        assert!(matches!(
            rejected,
            Err(ServerError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn timed_out_state_change_still_completes() {
        let audit = Arc::new(RecordingAuditSink::new());
        let config = ServerConfig::default().with_request_timeout(Duration::from_millis(100));
        let (store, handler) = setup_with(config, audit.clone());

        let mut old = Quotation::new(QuotationId::new(), "a@example.com", Fields::new());
        old.state = QuotationState::Activa;
        store.insert(old.clone());
        let new = Quotation::new(QuotationId::new(), "a@example.com", Fields::new());
        store.insert(new.clone());
        store.set_latency(Duration::from_millis(60));

        let result = handler
            .handle_state_change(
                new.id,
                StateChangeRequest::forced(QuotationState::Activa),
                &Actor::system(),
            )
            .await;
        assert!(matches!(result, Err(ServerError::Unavailable(_))));

        tokio::time::sleep(Duration::from_millis(500)).await;

        let active: Vec<_> = store
            .all()
            .into_iter()
            .filter(|q| q.state == QuotationState::Activa)
            .map(|q| q.id)
            .collect();
        assert_eq!(active, vec![new.id]);
        assert_eq!(
            store.snapshot(old.id).unwrap().state,
            QuotationState::Inactiva
        );
        assert_eq!(audit.entries_for(new.id)[0].action, STATE_CHANGE_ACTION);
        assert_eq!(audit.entries_for(old.id)[0].action, SUPERSEDED_ACTION);
    }

    #[tokio::test]
    async fn state_change_within_timeout_returns_record() {
        let config = ServerConfig::default().with_request_timeout(Duration::from_secs(2));
        let (store, handler) = setup_with(config, Arc::new(TracingAuditSink));
        let record = handler
            .handle_create(create_request("a@example.com"))
            .await
            .unwrap();
        store.set_latency(Duration::from_millis(20));

        let inactive = handler
            .handle_state_change(
                record.id,
                StateChangeRequest::new(QuotationState::Inactiva),
                &Actor::system(),
            )
            .await
            .unwrap();
        assert_eq!(inactive.state, QuotationState::Inactiva);
        assert_eq!(store.snapshot(record.id), Some(inactive));
    }
}
