//! Client record admin endpoints.
//!
//! CRUD over `/clients` for inspecting and adjusting per-client buckets
//! at runtime. Lookup failures and duplicate creates are client errors;
//! anything the store itself reports becomes a 500.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::http::response::envelope;
use crate::limiter::error::LimiterError;
use crate::limiter::store::Store;
use crate::limiter::ClientRecord;

#[derive(Debug, Deserialize)]
struct ClientQuery {
    #[serde(default)]
    client_id: String,
}

/// Router for the client admin endpoints.
pub fn router(store: Arc<Store>) -> Router {
    Router::new()
        .route(
            "/clients",
            get(read_client)
                .post(create_client)
                .put(update_client)
                .delete(delete_client),
        )
        .with_state(store)
}

async fn read_client(
    State(store): State<Arc<Store>>,
    Query(query): Query<ClientQuery>,
) -> Response {
    if query.client_id.is_empty() {
        return envelope(StatusCode::BAD_REQUEST, "empty client id");
    }
    match store.read_client(&query.client_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => limiter_error_response(e),
    }
}

async fn create_client(
    State(store): State<Arc<Store>>,
    Json(record): Json<ClientRecord>,
) -> Response {
    if record.client_ip.is_empty() {
        return envelope(StatusCode::BAD_REQUEST, "empty client id");
    }
    match store.create_client(&record).await {
        Ok(()) => envelope(StatusCode::OK, "client created"),
        Err(e) => limiter_error_response(e),
    }
}

async fn update_client(
    State(store): State<Arc<Store>>,
    Json(record): Json<ClientRecord>,
) -> Response {
    if record.client_ip.is_empty() {
        return envelope(StatusCode::BAD_REQUEST, "empty client id");
    }
    match store.update_client(&record).await {
        Ok(()) => envelope(StatusCode::OK, "client updated"),
        Err(e) => limiter_error_response(e),
    }
}

async fn delete_client(
    State(store): State<Arc<Store>>,
    Query(query): Query<ClientQuery>,
) -> Response {
    if query.client_id.is_empty() {
        return envelope(StatusCode::BAD_REQUEST, "empty client id");
    }
    match store.delete_client(&query.client_id).await {
        Ok(()) => envelope(StatusCode::OK, "client deleted"),
        Err(e) => limiter_error_response(e),
    }
}

fn limiter_error_response(error: LimiterError) -> Response {
    match error {
        LimiterError::UserNotFound | LimiterError::UserAlreadyExists => {
            envelope(StatusCode::BAD_REQUEST, error.to_string())
        }
        other => {
            tracing::error!(error = %other, "Client store operation failed");
            envelope(StatusCode::INTERNAL_SERVER_ERROR, "store operation failed")
        }
    }
}
