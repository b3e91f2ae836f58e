//! REST handlers for logical resources.
//!
//! Every request must carry the caller identity header set by the
//! upstream auth gateway. Callers only see their own resources.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use shipyard_core::{LogicalResource, NewResource, ResourceId, ResourceKind, UserId};
use shipyard_state::{Page, StateError};

use crate::context::SessionContext;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn state_error(e: &StateError) -> Response {
    let status = match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

/// Authenticated caller from the identity header.
pub(crate) fn caller(headers: &HeaderMap, header: &str) -> Result<UserId, Response> {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| {
            error_response("missing or invalid caller identity", StatusCode::UNAUTHORIZED)
                .into_response()
        })
}

/// A resource owned by `user_id`; anything else reads as not found.
fn owned(ctx: &SessionContext, user_id: UserId, id: ResourceId) -> Result<LogicalResource, Response> {
    match ctx.state.get_resource(id) {
        Ok(Some(resource)) if resource.user_id == user_id => Ok(resource),
        Ok(_) => Err(error_response("resource not found", StatusCode::NOT_FOUND).into_response()),
        Err(e) => Err(state_error(&e)),
    }
}

// ── Resources ──────────────────────────────────────────────────

/// Register request body.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub repository_id: String,
    pub resource_type: String,
    pub blob_url: String,
    pub file_name: String,
}

/// POST /api/v1/resources
pub async fn register_resource(
    State(ctx): State<Arc<SessionContext>>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let user_id = match caller(&headers, &ctx.server.identity_header) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let kind: ResourceKind = match req.resource_type.parse() {
        Ok(kind) => kind,
        Err(e) => return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response(),
    };
    if req.blob_url.trim().is_empty() || req.file_name.trim().is_empty() {
        return error_response("blob_url and file_name are required", StatusCode::BAD_REQUEST)
            .into_response();
    }

    let new = NewResource {
        user_id,
        repository_id: req.repository_id,
        kind,
        blob_url: req.blob_url,
        file_name: req.file_name,
    };
    match ctx.state.register_resource(&new) {
        Ok(resource) => (StatusCode::CREATED, ApiResponse::ok(resource)).into_response(),
        Err(e) => state_error(&e),
    }
}

/// Redeploy request body.
#[derive(Debug, Deserialize)]
pub struct RedeployRequest {
    pub blob_url: String,
    pub file_name: String,
}

/// POST /api/v1/resources/{id}/redeploy
pub async fn redeploy_resource(
    State(ctx): State<Arc<SessionContext>>,
    headers: HeaderMap,
    Path(id): Path<ResourceId>,
    Json(req): Json<RedeployRequest>,
) -> impl IntoResponse {
    let user_id = match caller(&headers, &ctx.server.identity_header) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Err(resp) = owned(&ctx, user_id, id) {
        return resp;
    }
    match ctx.state.redeploy_resource(id, &req.blob_url, &req.file_name) {
        Ok(resource) => (StatusCode::CREATED, ApiResponse::ok(resource)).into_response(),
        Err(e) => state_error(&e),
    }
}

/// List query parameters.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub repository_id: String,
    pub resource_type: Option<String>,
}

/// GET /api/v1/resources?repository_id=&resource_type=
pub async fn list_resources(
    State(ctx): State<Arc<SessionContext>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let user_id = match caller(&headers, &ctx.server.identity_header) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let kind = match query.resource_type.as_deref().map(str::parse::<ResourceKind>) {
        None => None,
        Some(Ok(kind)) => Some(kind),
        Some(Err(e)) => {
            return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
        }
    };
    match ctx.state.list_resources_by_repository(&query.repository_id, kind) {
        Ok(resources) => {
            let mine: Vec<_> = resources
                .into_iter()
                .filter(|r| r.user_id == user_id)
                .collect();
            ApiResponse::ok(mine).into_response()
        }
        Err(e) => state_error(&e),
    }
}

/// GET /api/v1/resources/{id}
pub async fn get_resource(
    State(ctx): State<Arc<SessionContext>>,
    headers: HeaderMap,
    Path(id): Path<ResourceId>,
) -> impl IntoResponse {
    let user_id = match caller(&headers, &ctx.server.identity_header) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match owned(&ctx, user_id, id) {
        Ok(resource) => ApiResponse::ok(resource).into_response(),
        Err(resp) => resp,
    }
}

/// Ledger paging parameters.
#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// GET /api/v1/resources/{id}/ledger?offset=&limit=
pub async fn resource_ledger(
    State(ctx): State<Arc<SessionContext>>,
    headers: HeaderMap,
    Path(id): Path<ResourceId>,
    Query(query): Query<LedgerQuery>,
) -> impl IntoResponse {
    let user_id = match caller(&headers, &ctx.server.identity_header) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Err(resp) = owned(&ctx, user_id, id) {
        return resp;
    }
    let defaults = Page::default();
    let page = Page {
        offset: query.offset.unwrap_or(defaults.offset),
        limit: query.limit.unwrap_or(defaults.limit).min(500),
    };
    match ctx.state.history(id, page) {
        Ok(entries) => ApiResponse::ok(entries).into_response(),
        Err(e) => state_error(&e),
    }
}
