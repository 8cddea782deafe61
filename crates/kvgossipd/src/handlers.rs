//! HTTP routes: client record API and the peer sync endpoints

use crate::gossip::SyncError;
use crate::node::{Node, NodeError, NodeStats};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use kvgossip_core::types::{PullRequest, Record, RecordId, SyncMessage};
use kvgossip_net::transport::{EXPIRATION_DELETE_PATH, REQUEST_DATA_PATH, SYNC_DIGEST_PATH};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

pub const ADD_RECORD_PATH: &str = "/AddRecord";
pub const UPDATE_RECORD_PATH: &str = "/UpdateRecord";
pub const DELETE_RECORD_PATH: &str = "/DeleteRecord";
pub const QUERY_RECORD_PATH: &str = "/QueryRecord";
pub const STATS_PATH: &str = "/Stats";

impl NodeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::AlreadyExists(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct IdQuery {
    id: RecordId,
}

fn message(text: &str) -> Json<serde_json::Value> {
    Json(json!({ "message": text }))
}

/// Build the router for a node
pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route(ADD_RECORD_PATH, post(add_record))
        .route(UPDATE_RECORD_PATH, post(update_record))
        .route(DELETE_RECORD_PATH, delete(delete_record))
        .route(QUERY_RECORD_PATH, get(query_record))
        .route(STATS_PATH, get(stats))
        .route(SYNC_DIGEST_PATH, post(sync_digest))
        .route(REQUEST_DATA_PATH, post(request_data))
        .route(EXPIRATION_DELETE_PATH, get(expiration_delete))
        .with_state(node)
}

async fn add_record(
    State(node): State<Arc<Node>>,
    Json(record): Json<Record>,
) -> Result<Json<Record>, NodeError> {
    node.insert(record).map(Json)
}

async fn update_record(State(node): State<Arc<Node>>, Json(record): Json<Record>) -> Json<Record> {
    Json(node.update(record))
}

async fn delete_record(
    State(node): State<Arc<Node>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<serde_json::Value>, NodeError> {
    node.delete(query.id)?;
    Ok(message("record deleted"))
}

async fn query_record(
    State(node): State<Arc<Node>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Record>, NodeError> {
    node.get(query.id).map(Json)
}

async fn stats(State(node): State<Arc<Node>>) -> Json<NodeStats> {
    Json(node.stats())
}

async fn sync_digest(
    State(node): State<Arc<Node>>,
    Json(digest): Json<SyncMessage>,
) -> Response {
    let sender = digest.node_addr.clone();
    match node.gossip().receive_digest(digest).await {
        Ok(_) => message("digest processed").into_response(),
        Err(e @ SyncError::InvalidSender(_)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => {
            // the sender is not owed our pull failure
            warn!(peer = %sender, "Pull after digest failed: {}", e);
            message("digest processed").into_response()
        }
    }
}

async fn request_data(
    State(node): State<Arc<Node>>,
    Json(request): Json<PullRequest>,
) -> Json<Vec<Record>> {
    Json(node.gossip().requested_data(&request.ids))
}

async fn expiration_delete(
    State(node): State<Arc<Node>>,
    Query(query): Query<IdQuery>,
) -> Json<serde_json::Value> {
    node.expire_remote(query.id);
    message("deleted successfully")
}
