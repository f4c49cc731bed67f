use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;
use super::AppState;
use crate::middleware::request_id::{make_span_with_request_id, request_id_middleware};

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/healthcheck", get(handlers::health_check))
        // Serving
        .route("/recs/:user_id", get(handlers::get_recommendations))
        // Catalog
        .route("/add_items", post(handlers::add_items))
        .route("/cleanup", get(handlers::cleanup).post(handlers::cleanup))
        // Event collection
        .route("/interact", post(handlers::interact))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
