//! HTTP collaborators.
//!
//! [`HttpProbe`] and [`HttpQuotationStore`] talk to a QuoteSync server over
//! its JSON API, so a client process can run the engine against a remote
//! authoritative store.

use crate::collaborators::{Actor, QuotationStore, ReachabilityProbe};
use crate::config::{join_url, SyncConfig};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use quotesync_protocol::{
    ActiveConflictBody, CreateQuotationRequest, ErrorBody, InvalidTransitionBody, Quotation,
    QuotationId, QuotationPatch, StaleWriteBody, StateChangeRequest,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

/// Header carrying the acting user's ID.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

/// Header carrying the acting user's display name.
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";

/// Reachability probe hitting the server's health endpoint.
///
/// Only the status matters: 2xx means reachable, anything else means not.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    /// Creates a probe for `config.probe_url()`, bounded by the monitor's
    /// probe timeout.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.monitor.probe_timeout)
            .build()?;
        Ok(Self {
            client,
            url: config.probe_url(),
        })
    }

    /// The probed URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> SyncResult<bool> {
        let response = self.client.get(&self.url).send().await?;
        Ok(response.status().is_success())
    }
}

/// Quotation store backed by the server's REST API.
///
/// `update` carries content patches only. The server owns the lifecycle, so
/// a patch with a `state` is refused locally and state changes go through
/// [`HttpQuotationStore::request_state_change`]. For the same reason a
/// [`QuotationStateMachine`](crate::QuotationStateMachine) should run
/// against the server's own store, not this one.
#[derive(Debug, Clone)]
pub struct HttpQuotationStore {
    client: reqwest::Client,
    base_url: String,
    probe_path: String,
    actor: Actor,
}

impl HttpQuotationStore {
    /// Creates a store client for `config.server_url`.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.server_url.clone(),
            probe_path: config.probe_path.clone(),
            actor: Actor::system(),
        })
    }

    /// Sets the actor sent with every request.
    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Asks the server to move a quotation to another lifecycle state.
    ///
    /// Rejections come back as the same `SyncError` variants the state
    /// machine produces locally.
    pub async fn request_state_change(
        &self,
        id: QuotationId,
        request: &StateChangeRequest,
    ) -> SyncResult<Quotation> {
        let response = self
            .with_headers(self.client.post(self.url(&format!("quotations/{id}/state"))))
            .json(request)
            .send()
            .await?;
        read_json(response, Some(id)).await
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn with_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(reqwest::header::ACCEPT, "application/json")
            .header(ACTOR_ID_HEADER, &self.actor.id)
            .header(ACTOR_NAME_HEADER, &self.actor.name)
    }
}

#[async_trait]
impl QuotationStore for HttpQuotationStore {
    async fn get(&self, id: QuotationId) -> SyncResult<Quotation> {
        let response = self
            .with_headers(self.client.get(self.url(&format!("quotations/{id}"))))
            .send()
            .await?;
        read_json(response, Some(id)).await
    }

    async fn update(&self, id: QuotationId, patch: QuotationPatch) -> SyncResult<Quotation> {
        if patch.state.is_some() {
            return Err(SyncError::Protocol(format!(
                "quotation {id}: state changes go through request_state_change"
            )));
        }
        let response = self
            .with_headers(self.client.patch(self.url(&format!("quotations/{id}"))))
            .json(&patch)
            .send()
            .await?;
        read_json(response, Some(id)).await
    }

    async fn find_by_client(&self, client_email: &str) -> SyncResult<Vec<Quotation>> {
        let response = self
            .with_headers(self.client.get(self.url("quotations")))
            .query(&[("client", client_email)])
            .send()
            .await?;
        read_json(response, None).await
    }

    async fn create(&self, request: CreateQuotationRequest) -> SyncResult<Quotation> {
        let response = self
            .with_headers(self.client.post(self.url("quotations")))
            .json(&request)
            .send()
            .await?;
        read_json(response, None).await
    }

    async fn ping(&self) -> SyncResult<()> {
        let response = self
            .client
            .get(self.url(&self.probe_path))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SyncError::transport_retryable(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }
}

async fn read_json<T: DeserializeOwned>(response: Response, id: Option<QuotationId>) -> SyncResult<T> {
    if response.status().is_success() {
        return Ok(response.json::<T>().await?);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(error_from_status(status, &body, id))
}

/// Maps a non-success response onto a `SyncError`.
fn error_from_status(status: StatusCode, body: &str, id: Option<QuotationId>) -> SyncError {
    match status {
        StatusCode::NOT_FOUND => match id {
            Some(id) => SyncError::NotFound(id),
            None => SyncError::Protocol(error_message(status, body)),
        },
        StatusCode::BAD_REQUEST => match serde_json::from_str::<InvalidTransitionBody>(body) {
            Ok(rejection) => SyncError::InvalidTransition {
                from: rejection.from,
                to: rejection.to,
                allowed: rejection.allowed,
            },
            Err(_) => SyncError::Protocol(error_message(status, body)),
        },
        StatusCode::CONFLICT => {
            if let Ok(conflict) = serde_json::from_str::<ActiveConflictBody>(body) {
                SyncError::ActiveConflict {
                    existing: conflict.existing,
                    client: conflict.client,
                }
            } else if let Ok(stale) = serde_json::from_str::<StaleWriteBody>(body) {
                SyncError::StaleWrite {
                    id: stale.id,
                    expected: stale.expected,
                    actual: stale.actual,
                }
            } else {
                SyncError::Protocol(error_message(status, body))
            }
        }
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            SyncError::transport_retryable(error_message(status, body))
        }
        s if s.is_server_error() => SyncError::Persistence(error_message(status, body)),
        _ => SyncError::Protocol(error_message(status, body)),
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => format!("{status}: {}", parsed.error),
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => format!("{status}: {}", body.trim()),
    }
}
