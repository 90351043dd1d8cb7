use crate::api::{handlers, AppState};
use crate::metrics::track_metrics;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Default upload cap when none is configured
pub const DEFAULT_BODY_LIMIT: usize = 20 * 1024 * 1024;

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    build_router_with_limit(state, DEFAULT_BODY_LIMIT)
}

pub fn build_router_with_limit(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        // Model pipeline
        .route("/api/train-model/", post(handlers::train_model))
        .route("/api/predict/", post(handlers::predict))
        .route("/api/model-info/", get(handlers::model_info))
        .route("/api/batch-predict/", post(handlers::batch_predict))
        .route("/api/upload-and-train/", post(handlers::upload_and_train))
        // Exports
        .route("/api/download-csv/", get(handlers::download_csv))
        .route("/api/download-template/", get(handlers::download_template))
        .route(
            "/api/download-data-template/",
            get(handlers::download_data_template),
        )
        // Record management
        .route(
            "/api/siniestros/",
            get(handlers::list_records).post(handlers::create_record),
        )
        .route(
            "/api/siniestros/:id",
            get(handlers::get_record)
                .put(handlers::update_record)
                .delete(handlers::delete_record),
        )
        // Add state
        .with_state(state)
        // Add middleware
        .layer(middleware::from_fn(track_metrics))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CorsLayer::permissive())
}
