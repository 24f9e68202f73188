//! End-to-end tests for the HTTP API, driving the router in-process.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use litesearch_server::{create_router, AppState, Settings};
use litesearch_storage::InMemoryStore;

fn app() -> Router {
    create_router(AppState::new(
        Arc::new(InMemoryStore::new()),
        Settings::default(),
    ))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    let req = match body {
        Some(b) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&b).unwrap()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_responds() {
    let app = app();
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn index_lifecycle() {
    let app = app();
    let (status, body) = send(&app, "POST", "/indexes/books", None, None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "books");

    let (status, body) = send(&app, "POST", "/indexes/books", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("already exists"));

    send(&app, "POST", "/indexes/cars", None, None).await;
    let (status, body) = send(&app, "GET", "/indexes?query_index_id=oo", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"id": "books", "fields": {}}]));

    let (status, _) = send(&app, "DELETE", "/indexes/books", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "DELETE", "/indexes/books", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn documents_are_upserted_queried_and_deleted() {
    let app = app();
    let doc = json!({"source": {"title": "Dune", "meta": {"year": 1965}, "tags": ["scifi", "classic"]}});
    let (status, body) = send(&app, "POST", "/indexes/books/documents/d1", Some(doc.clone()), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"id": "d1"}));
    let (status, _) = send(&app, "POST", "/indexes/books/documents/d1", Some(doc), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        "POST",
        "/indexes/books/documents",
        Some(json!({"source": {"title": "Emma", "meta": {"year": 1815}}})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let generated = body["id"].as_str().unwrap().to_string();
    assert_eq!(generated.len(), 32);

    let (_, index) = send(&app, "GET", "/indexes?query_index_id=books", None, None).await;
    assert_eq!(
        index[0]["fields"],
        json!({"meta.year": 2, "tags": 1, "title": 2})
    );

    let (status, body) = send(
        &app,
        "GET",
        "/indexes/books/documents?query=meta.year%20%3E%201900&limit=5",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["offset"], 0);
    assert_eq!(body["limit"], 5);
    assert_eq!(body["documents"][0]["id"], "d1");
    assert_eq!(body["documents"][0]["fields"]["tags"], json!(["scifi", "classic"]));
    assert!(body["documents"][0].get("source").is_none());

    let (status, body) = send(&app, "GET", "/indexes/books/documents?query=title%20%3D", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(&app, "GET", &format!("/indexes/books/documents/{generated}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"]["title"], "Emma");

    let (status, _) = send(&app, "DELETE", "/indexes/books/documents/d1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/indexes/books/documents/d1", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, index) = send(&app, "GET", "/indexes?query_index_id=books", None, None).await;
    assert_eq!(index[0]["fields"], json!({"meta.year": 1, "title": 1}));

    let (status, body) = send(&app, "GET", "/admin/verify/books", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["consistent"], true);
}

#[tokio::test]
async fn non_object_sources_are_bad_requests() {
    let app = app();
    let (status, _) = send(
        &app,
        "POST",
        "/indexes/books/documents/x",
        Some(json!({"source": [1, 2, 3]})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn explain_renders_the_parsed_query() {
    let app = app();
    let (status, body) = send(
        &app,
        "GET",
        "/admin/explain?query=a%20%3D%201%20%26%26%20(b%20like%20%22x%25%22%20%7C%7C%20c%20is%20null)",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ast"], r#"(a = 1 && (b like "x%" || c is null))"#);

    let (status, _) = send(&app, "GET", "/admin/explain?query=a%20%3D%3D%201", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bearer_tokens_guard_index_routes() {
    let settings = Settings {
        secret_key: Some("test-secret".into()),
        admin_user: "admin".into(),
        admin_password: "hunter2".into(),
        ..Settings::default()
    };
    let app = create_router(AppState::new(Arc::new(InMemoryStore::new()), settings));

    let (status, _) = send(&app, "GET", "/indexes", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let login = |form: &'static str| {
        Request::post("/auth/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .unwrap()
    };
    let response = app.clone().oneshot(login("username=admin&password=nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.clone().oneshot(login("username=admin&password=hunter2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["token_type"], "bearer");
    let token = body["access_token"].as_str().unwrap();

    let (status, _) = send(&app, "GET", "/indexes", None, Some(token)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/indexes", None, Some("garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn snapshots_need_a_data_dir() {
    let app = app();
    let (status, _) = send(&app, "POST", "/admin/snapshot", None, None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        data_dir: Some(dir.path().to_path_buf()),
        ..Settings::default()
    };
    let app = create_router(AppState::open(settings).unwrap());
    send(&app, "POST", "/indexes/a/documents/1", Some(json!({"source": {"k": 1}})), None).await;
    let (status, body) = send(&app, "POST", "/admin/snapshot", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["last_seq"], 1);
    let snapshot_id = body["snapshot_id"].as_str().unwrap().to_string();

    let (status, manifest) = send(&app, "GET", "/admin/manifest", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(manifest["current_snapshot"], snapshot_id);

    let (status, _) = send(&app, "POST", &format!("/admin/trim-wal?snapshot_id={snapshot_id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
}
