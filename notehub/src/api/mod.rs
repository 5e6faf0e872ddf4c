//! HTTP API layer exposing page, database and permission endpoints.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use notehub_core::auth::TokenVerifier;
use notehub_core::error::Error;
use notehub_core::model::{
    Block, Database, Entry, Field, Page, PageVersion, Permission, ResourceType, Role,
    VersionSummary,
};
use notehub_core::store::Store;

/// Authentication context extracted from request headers. The bearer token
/// is resolved by the configured verifier; the `X-User-Id` header is the
/// development/test fallback.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        if let Some(auth) = headers.get("Authorization").and_then(|v| v.to_str().ok()) {
            if let Some(token) = auth.strip_prefix("Bearer ") {
                if let Some(claims) = state.verifier.verify(token).await {
                    return Ok(Self {
                        user_id: claims.sub,
                    });
                }
            }
        }
        let user = headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        match user {
            Some(user_id) => Ok(Self { user_id }),
            None => Err(StatusCode::UNAUTHORIZED),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<Store>>,
    pub verifier: Arc<dyn TokenVerifier>,
}

/// Error responses carry a stable kind plus a human-readable message.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct PageCreateRequest {
    title: Option<String>,
    #[serde(default)]
    blocks: Vec<Block>,
}

#[derive(Deserialize)]
struct PagePatchRequest {
    title: Option<String>,
    blocks: Option<Vec<Block>>,
}

#[derive(Deserialize)]
struct DatabaseCreateRequest {
    name: Option<String>,
    description: Option<String>,
    schema: Option<Vec<Field>>,
}

#[derive(Deserialize)]
struct DatabasePatchRequest {
    name: Option<String>,
    description: Option<String>,
    schema: Option<Vec<Field>>,
}

#[derive(Deserialize)]
struct EntryRequest {
    data: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionGrantRequest {
    resource_type: ResourceType,
    resource_id: Uuid,
    principal_email: String,
    role: Role,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionListParams {
    resource_type: ResourceType,
    resource_id: Uuid,
}

pub fn router(store: Arc<RwLock<Store>>, verifier: Arc<dyn TokenVerifier>) -> Router {
    let state = AppState { store, verifier };
    Router::new()
        .route("/resources/pages", post(create_page).get(list_pages))
        .route(
            "/resources/pages/{id}",
            get(get_page).patch(update_page).delete(delete_page),
        )
        .route("/resources/pages/{id}/versions", get(list_versions))
        .route("/resources/pages/{id}/versions/{vid}", get(get_version))
        .route(
            "/resources/pages/{id}/versions/{vid}/revert",
            post(revert_page),
        )
        .route(
            "/resources/databases",
            post(create_database).get(list_databases),
        )
        .route(
            "/resources/databases/{id}",
            get(get_database).patch(update_database).delete(delete_database),
        )
        .route("/resources/databases/{id}/entries", post(create_entry))
        .route(
            "/resources/databases/{id}/entries/{eid}",
            axum::routing::patch(update_entry).delete(delete_entry),
        )
        .route(
            "/resources/permissions",
            post(grant_permission).get(list_permissions),
        )
        .route("/resources/permissions/{id}", axum::routing::delete(revoke_permission))
        .with_state(state)
}

// --- pages -----------------------------------------------------------------

async fn create_page(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<PageCreateRequest>,
) -> ApiResult<(StatusCode, Json<Page>)> {
    let mut store = state.store.write().await;
    let page = store.create_page(&auth.user_id, req.title, req.blocks)?;
    Ok((StatusCode::CREATED, Json(page)))
}

async fn list_pages(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<Vec<Page>>> {
    let store = state.store.read().await;
    Ok(Json(store.list_pages(&auth.user_id)))
}

async fn get_page(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Page>> {
    let store = state.store.read().await;
    let page = store.get_page(&auth.user_id, id)?;
    Ok(Json(page.clone()))
}

async fn update_page(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<PagePatchRequest>,
) -> ApiResult<Json<Page>> {
    let mut store = state.store.write().await;
    let page = store.update_page(&auth.user_id, id, req.title, req.blocks)?;
    Ok(Json(page))
}

async fn delete_page(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut store = state.store.write().await;
    store.delete_page(&auth.user_id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- version history -------------------------------------------------------

async fn list_versions(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<VersionSummary>>> {
    let store = state.store.read().await;
    Ok(Json(store.list_versions(&auth.user_id, id)?))
}

async fn get_version(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, vid)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<PageVersion>> {
    let store = state.store.read().await;
    let version = store.get_version(&auth.user_id, id, vid)?;
    Ok(Json(version.clone()))
}

async fn revert_page(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, vid)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Page>> {
    let mut store = state.store.write().await;
    let page = store.revert_page(&auth.user_id, id, vid)?;
    Ok(Json(page))
}

// --- databases -------------------------------------------------------------

async fn create_database(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<DatabaseCreateRequest>,
) -> ApiResult<(StatusCode, Json<Database>)> {
    let mut store = state.store.write().await;
    let db = store.create_database(&auth.user_id, req.name, req.description, req.schema)?;
    Ok((StatusCode::CREATED, Json(db)))
}

async fn list_databases(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Vec<Database>>> {
    let store = state.store.read().await;
    Ok(Json(store.list_databases(&auth.user_id)))
}

async fn get_database(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Database>> {
    let store = state.store.read().await;
    let db = store.get_database(&auth.user_id, id)?;
    Ok(Json(db.clone()))
}

async fn update_database(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<DatabasePatchRequest>,
) -> ApiResult<Json<Database>> {
    let mut store = state.store.write().await;
    let db = store.update_database(&auth.user_id, id, req.name, req.description, req.schema)?;
    Ok(Json(db))
}

async fn delete_database(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut store = state.store.write().await;
    store.delete_database(&auth.user_id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- entries ---------------------------------------------------------------

async fn create_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<EntryRequest>,
) -> ApiResult<(StatusCode, Json<Entry>)> {
    let mut store = state.store.write().await;
    let entry = store.create_entry(&auth.user_id, id, req.data)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn update_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, eid)): Path<(Uuid, Uuid)>,
    Json(req): Json<EntryRequest>,
) -> ApiResult<Json<Entry>> {
    let mut store = state.store.write().await;
    let entry = store.update_entry(&auth.user_id, id, eid, req.data)?;
    Ok(Json(entry))
}

async fn delete_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, eid)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    let mut store = state.store.write().await;
    store.delete_entry(&auth.user_id, id, eid)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- permissions -----------------------------------------------------------

async fn grant_permission(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<PermissionGrantRequest>,
) -> ApiResult<Json<Permission>> {
    let mut store = state.store.write().await;
    let perm = store.grant_permission(
        &auth.user_id,
        req.resource_type,
        req.resource_id,
        &req.principal_email,
        req.role,
    )?;
    Ok(Json(perm))
}

async fn list_permissions(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<PermissionListParams>,
) -> ApiResult<Json<Vec<Permission>>> {
    let store = state.store.read().await;
    let perms = store.list_permissions(&auth.user_id, params.resource_type, params.resource_id)?;
    Ok(Json(perms))
}

async fn revoke_permission(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut store = state.store.write().await;
    store.revoke_permission(&auth.user_id, id)?;
    Ok(StatusCode::NO_CONTENT)
}
