use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::middleware::request_id::RequestId;
use crate::models::{InteractionMessage, NewItemsRequest, Recommendations};

use super::AppState;

#[derive(Debug, Serialize)]
pub struct AddItemsResponse {
    pub added: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub cache_cleared: bool,
}

/// Health check endpoint
pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Fixed-size recommendations for one user; never fails while the catalog is non-empty
pub async fn get_recommendations(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<String>,
) -> Json<Recommendations> {
    let recommendations = state.composer.recommend(&user_id).await;

    tracing::info!(
        request_id = %request_id,
        user_id = %user_id,
        count = recommendations.item_ids.len(),
        provenance = %recommendations.provenance,
        "Served recommendations"
    );

    Json(recommendations)
}

/// Registers item ids into the catalog
pub async fn add_items(
    State(state): State<AppState>,
    Json(request): Json<NewItemsRequest>,
) -> AppResult<Json<AddItemsResponse>> {
    if request.item_ids.iter().any(|id| id.trim().is_empty()) {
        return Err(AppError::InvalidInput("item ids must not be blank".to_string()));
    }

    let added = state.catalog.register(request.item_ids).await;
    let total = state.catalog.len().await;
    tracing::info!(added, total, "Registered items");

    Ok(Json(AddItemsResponse { added, total }))
}

/// Administrative reset: empties the catalog and the candidate cache
///
/// An unreachable cache does not fail the reset; the catalog is still cleared.
pub async fn cleanup(State(state): State<AppState>) -> Json<CleanupResponse> {
    state.catalog.reset().await;

    let cache_cleared = match state.store.clear().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Candidate cache could not be cleared");
            false
        }
    };

    tracing::info!(cache_cleared, "Catalog reset");
    Json(CleanupResponse { cache_cleared })
}

/// Publishes an interaction message onto the event source
pub async fn interact(
    State(state): State<AppState>,
    Json(message): Json<InteractionMessage>,
) -> AppResult<StatusCode> {
    // reject what the ingestor would drop anyway
    message.clone().explode()?;

    state.publisher.publish(&message).await?;
    Ok(StatusCode::ACCEPTED)
}
