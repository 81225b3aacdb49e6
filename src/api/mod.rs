use crate::state::AppState;
use axum::Router;
use axum::routing::get;
use std::sync::{Arc, RwLock};

pub mod handlers;
pub mod responses;

pub fn router(state: Arc<RwLock<AppState>>) -> Router {
    Router::new()
        .route("/api/heatmap", get(handlers::get_heatmap))
        .route("/api/heatmap/display", get(handlers::get_display_grid))
        .route("/api/zones/{zone_id}", get(handlers::get_zone))
        .route("/api/health", get(handlers::get_health))
        .with_state(state)
}
