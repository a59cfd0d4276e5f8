//! Main QuoteSync server.

use crate::collaborators::{LogNotifier, TracingAuditSink};
use crate::config::ServerConfig;
use crate::handler::{HandlerContext, RequestHandler};
use crate::routes::app_router;
use axum::Router;
use quotesync_engine::{
    AuditSink, MemoryQuotationStore, Notifier, QuotationStateMachine, QuotationStore,
    SyncEventBus,
};
use std::sync::Arc;
use tokio::net::TcpListener;

/// The QuoteSync server.
///
/// Holds the authoritative store and serves the quotation endpoints over
/// HTTP. Lifecycle changes go through a [`QuotationStateMachine`] so the
/// transition table, the "one active quotation per client" cascade, audit
/// and staff notification all apply.
///
/// # Example
///
/// ```
/// use quotesync_server::{ServerConfig, SyncServer};
///
/// let config = ServerConfig::default().with_staff(["ana"]);
/// let server = SyncServer::new(config);
///
/// // In a real application, bind a listener and call `server.serve(listener)`.
/// let _router = server.router();
/// ```
pub struct SyncServer {
    handler: RequestHandler,
}

impl SyncServer {
    /// Creates a server over an empty in-memory store.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryQuotationStore::new()))
    }

    /// Creates a server over an existing store, with the tracing audit sink
    /// and the log notifier.
    pub fn with_store(config: ServerConfig, store: Arc<dyn QuotationStore>) -> Self {
        let notifier = Arc::new(LogNotifier::new(config.staff.clone()));
        Self::with_collaborators(config, store, Arc::new(TracingAuditSink), notifier)
    }

    /// Creates a server with every collaborator supplied by the caller.
    pub fn with_collaborators(
        config: ServerConfig,
        store: Arc<dyn QuotationStore>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let bus = SyncEventBus::new();
        let machine = QuotationStateMachine::new(Arc::clone(&store), audit, notifier, bus.clone());
        let context = Arc::new(HandlerContext::new(config, store, machine, bus));
        Self {
            handler: RequestHandler::new(context),
        }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.handler.context().config
    }

    /// Bus receiving every change made through this server.
    pub fn bus(&self) -> SyncEventBus {
        self.handler.context().bus.clone()
    }

    /// Returns the request handler.
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Builds the HTTP router.
    pub fn router(&self) -> Router {
        app_router(self.handler.clone())
    }

    /// Serves requests on `listener` until the task is cancelled.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "quotesync server listening");
        }
        axum::serve(listener, self.router()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotesync_protocol::{CreateQuotationRequest, SyncEventKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn bus_sees_server_changes() {
        let server = SyncServer::new(ServerConfig::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        let _sub = server.bus().subscribe(SyncEventKind::Created, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        server
            .handler()
            .handle_create(CreateQuotationRequest {
                id: None,
                client_email: "a@example.com".into(),
                fields: Default::default(),
            })
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn config_is_kept() {
        let server = SyncServer::new(ServerConfig::default().with_staff(["ana"]));
        assert_eq!(server.config().staff, vec!["ana"]);
    }
}
