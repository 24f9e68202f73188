use crate::handlers;
use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let index_routes = Router::new()
        .route("/indexes", get(handlers::list_indexes))
        .route(
            "/indexes/:index_id",
            post(handlers::create_index).delete(handlers::delete_index),
        )
        .route(
            "/indexes/:index_id/documents",
            get(handlers::query_documents).post(handlers::create_document),
        )
        .route(
            "/indexes/:index_id/documents/:document_id",
            get(handlers::get_document)
                .post(handlers::upsert_document)
                .delete(handlers::delete_document),
        );

    let admin_routes = Router::new()
        .route("/snapshot", post(handlers::admin_snapshot))
        .route("/manifest", get(handlers::admin_manifest))
        .route("/trim-wal", post(handlers::admin_trim_wal))
        .route("/verify/:index_id", get(handlers::admin_verify))
        .route("/explain", get(handlers::admin_explain));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/auth/token", post(handlers::issue_token))
        .merge(index_routes)
        .nest("/admin", admin_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
