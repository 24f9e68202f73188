use crate::auth::{self, authorize};
use crate::metrics;
use crate::AppState;
use axum::{
    extract::{Form, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use litesearch_core::query::QueryParser;
use litesearch_core::{Page, StoreError};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

/// Maps a store error onto a status code and `{"error": ...}` body.
pub fn error_response(e: StoreError) -> Response {
    let status = match &e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(_)
        | StoreError::Validation(_)
        | StoreError::QuerySyntax { .. } => StatusCode::BAD_REQUEST,
        StoreError::InvariantViolation(_) | StoreError::Internal(_) => {
            tracing::error!(error = %e, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({"error": e.to_string()}))).into_response()
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    let _ = encoder.encode(&metric_families, &mut buf);
    (StatusCode::OK, String::from_utf8(buf).unwrap_or_default())
}

#[derive(Deserialize)]
pub struct TokenForm {
    username: String,
    password: String,
}

pub async fn issue_token(State(app): State<AppState>, Form(form): Form<TokenForm>) -> Response {
    let Some(secret) = app.settings.secret_key.as_deref() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "authentication is not configured"})),
        )
            .into_response();
    };
    if !auth::authenticate(&app.settings, &form.username, &form.password) {
        tracing::warn!(username = %form.username, "rejected login");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "incorrect username or password"})),
        )
            .into_response();
    }
    let token = auth::issue_token(
        secret,
        &form.username,
        app.settings.token_ttl_secs,
        chrono::Utc::now().timestamp(),
    );
    (
        StatusCode::OK,
        Json(json!({"access_token": token, "token_type": "bearer"})),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct ListIndexesParams {
    query_index_id: Option<String>,
}

pub async fn list_indexes(
    State(app): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListIndexesParams>,
) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    let _timer = metrics::track("list_indexes");
    match app.store.list_indexes(params.query_index_id.as_deref()).await {
        Ok(list) => (StatusCode::OK, Json(list)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn create_index(
    State(app): State<AppState>,
    Path(index_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    let _timer = metrics::track("create_index");
    match app.store.create_index(&index_id).await {
        Ok(index) => (StatusCode::CREATED, Json(index)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn delete_index(
    State(app): State<AppState>,
    Path(index_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    let _timer = metrics::track("delete_index");
    match app.store.delete_index(&index_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({"id": index_id}))).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct DocumentBody {
    source: JsonValue,
}

pub async fn create_document(
    State(app): State<AppState>,
    Path(index_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<DocumentBody>,
) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    let _timer = metrics::track("create_document");
    match app.store.create_document(&index_id, body.source).await {
        Ok(doc) => (StatusCode::CREATED, Json(json!({"id": doc.id}))).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn upsert_document(
    State(app): State<AppState>,
    Path((index_id, document_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<DocumentBody>,
) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    let _timer = metrics::track("upsert_document");
    match app
        .store
        .upsert_document(&index_id, &document_id, body.source, false)
        .await
    {
        Ok((created, doc)) => {
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(json!({"id": doc.id}))).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct DocumentsParams {
    #[serde(default)]
    query: String,
    offset: Option<usize>,
    limit: Option<usize>,
}

pub async fn query_documents(
    State(app): State<AppState>,
    Path(index_id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<DocumentsParams>,
) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    let _timer = metrics::track("query_documents");
    let page = Page::new(
        params.offset.unwrap_or(0),
        params.limit.unwrap_or(Page::DEFAULT_LIMIT),
    );
    match app.store.query_documents(&index_id, &params.query, page).await {
        Ok(res) => (
            StatusCode::OK,
            Json(json!({
                "total": res.total,
                "offset": page.offset,
                "limit": page.limit,
                "documents": res.documents,
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn get_document(
    State(app): State<AppState>,
    Path((index_id, document_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    let _timer = metrics::track("get_document");
    match app.store.get_document(&index_id, &document_id).await {
        Ok(doc) => (StatusCode::OK, Json(doc)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn delete_document(
    State(app): State<AppState>,
    Path((index_id, document_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    let _timer = metrics::track("delete_document");
    match app.store.delete_document(&index_id, &document_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({"id": document_id}))).into_response(),
        Err(e) => error_response(e),
    }
}

// Admin endpoints
pub async fn admin_snapshot(State(app): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    let t0 = std::time::Instant::now();
    let result = app.store.storage().admin_snapshot().await;
    metrics::SNAPSHOT_DURATION_SEC.observe(t0.elapsed().as_secs_f64());
    match result {
        Ok((id, last_seq)) => {
            metrics::SNAPSHOT_TOTAL.with_label_values(&["ok"]).inc();
            (
                StatusCode::OK,
                Json(json!({"snapshot_id": id, "last_seq": last_seq})),
            )
                .into_response()
        }
        Err(e) => {
            metrics::SNAPSHOT_TOTAL.with_label_values(&["error"]).inc();
            error_response(e)
        }
    }
}

pub async fn admin_manifest(State(app): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    match app.store.storage().admin_manifest().await {
        Ok(m) => {
            if let Some(segs) = m.get("segments").and_then(|v| v.as_array()) {
                metrics::WAL_ACTIVE_SEGMENTS.set(segs.len() as f64);
            }
            (StatusCode::OK, Json(m)).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct TrimParams {
    #[serde(default)]
    snapshot_id: String,
}

pub async fn admin_trim_wal(
    State(app): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TrimParams>,
) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    if params.snapshot_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing snapshot_id"})),
        )
            .into_response();
    }
    let storage = app.store.storage();
    match storage.admin_trim_wal(&params.snapshot_id).await {
        Ok(deleted) => {
            if let Ok(m) = storage.admin_manifest().await {
                if let Some(segs) = m.get("segments").and_then(|v| v.as_array()) {
                    metrics::WAL_ACTIVE_SEGMENTS.set(segs.len() as f64);
                }
            }
            (StatusCode::OK, Json(json!({"deleted": deleted}))).into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn admin_verify(
    State(app): State<AppState>,
    Path(index_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    match app.store.verify_index(&index_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"index_id": index_id, "consistent": true})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct ExplainParams {
    #[serde(default)]
    query: String,
}

/// Echoes the parsed form of a query, fully parenthesized.
pub async fn admin_explain(
    State(app): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ExplainParams>,
) -> Response {
    if let Err(resp) = authorize(&app.settings, &headers) {
        return resp.into_response();
    }
    if params.query.trim().is_empty() {
        return (
            StatusCode::OK,
            Json(json!({"query": params.query, "ast": null, "matches_all": true})),
        )
            .into_response();
    }
    match QueryParser::parse(&params.query) {
        Ok(expr) => (
            StatusCode::OK,
            Json(json!({
                "query": params.query,
                "ast": expr.to_string(),
                "matches_all": false,
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}
