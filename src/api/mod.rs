use crate::broadcast::BroadcastHub;
use crate::ingest::Ingestor;
use crate::recommendation::RecommendationScorer;
use crate::store::ParkingStore;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

pub mod handlers;
pub mod responses;
pub mod ws;

/// Shared services handed to every handler.
#[derive(Clone, Debug)]
pub struct ApiState {
    pub app_name: Arc<str>,
    pub store: Arc<dyn ParkingStore>,
    pub ingestor: Arc<Ingestor>,
    pub scorer: Arc<RecommendationScorer>,
    pub hub: Arc<BroadcastHub>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(handlers::get_root))
        .route("/api/iot/slot-update", post(handlers::post_slot_update))
        .route("/api/parking/map", get(handlers::get_parking_map))
        .route(
            "/api/parking/recommendation",
            get(handlers::get_recommendation),
        )
        .route("/api/parking/predictions", get(handlers::get_predictions))
        .route("/api/impact", post(handlers::post_impact))
        .route("/ws/slots", get(ws::slots_socket))
        .with_state(state)
}
