//! HTTP routes.

use crate::error::ServerError;
use crate::handler::RequestHandler;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use quotesync_engine::{Actor, ACTOR_ID_HEADER, ACTOR_NAME_HEADER};
use quotesync_protocol::{
    CreateQuotationRequest, Quotation, QuotationId, QuotationPatch, StateChangeRequest,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

/// Builds the router over a request handler.
pub fn app_router(handler: RequestHandler) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/quotations", get(list_quotations).post(create_quotation))
        .route(
            "/quotations/{id}",
            get(get_quotation).patch(patch_quotation),
        )
        .route("/quotations/{id}/state", post(change_state))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health(State(handler): State<RequestHandler>) -> (StatusCode, Json<HealthResponse>) {
    match handler.handle_health().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse { status: "ok" })),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable",
                }),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default)]
    client: String,
}

async fn list_quotations(
    State(handler): State<RequestHandler>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Quotation>>, ServerError> {
    handler.handle_list(&query.client).await.map(Json)
}

async fn create_quotation(
    State(handler): State<RequestHandler>,
    Json(request): Json<CreateQuotationRequest>,
) -> Result<(StatusCode, Json<Quotation>), ServerError> {
    let record = handler.handle_create(request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_quotation(
    State(handler): State<RequestHandler>,
    Path(id): Path<QuotationId>,
) -> Result<Json<Quotation>, ServerError> {
    handler.handle_get(id).await.map(Json)
}

async fn patch_quotation(
    State(handler): State<RequestHandler>,
    Path(id): Path<QuotationId>,
    Json(patch): Json<QuotationPatch>,
) -> Result<Json<Quotation>, ServerError> {
    handler.handle_patch(id, patch).await.map(Json)
}

async fn change_state(
    State(handler): State<RequestHandler>,
    Path(id): Path<QuotationId>,
    headers: HeaderMap,
    Json(request): Json<StateChangeRequest>,
) -> Result<Json<Quotation>, ServerError> {
    let actor = actor_from_headers(&headers);
    handler
        .handle_state_change(id, request, &actor)
        .await
        .map(Json)
}

/// Reads the acting user from the request headers, falling back to
/// [`Actor::system`].
fn actor_from_headers(headers: &HeaderMap) -> Actor {
    match (
        header_value(headers, ACTOR_ID_HEADER),
        header_value(headers, ACTOR_NAME_HEADER),
    ) {
        (Some(id), Some(name)) => Actor::new(id, name),
        (Some(id), None) => Actor::new(id, id),
        _ => Actor::system(),
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
