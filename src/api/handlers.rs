use crate::api::ApiState;
use crate::api::responses::{
    ApiErrorCode, ErrorResponse, ImpactRequest, ImpactResponse, MapQuery, ParkingMapResponse,
    ParkingSlotResponse, PredictionResponse, RecommendationItem, RecommendationResponse,
    ServiceStatusResponse, SlotUpdateRequest, SlotUpdateResponse,
};
use crate::error::AppError;
use crate::ingest::SlotUpdate;
use crate::prediction::round3;
use crate::state::{PredictedStatus, SlotStatus, format_timestamp};
use crate::store::DEFAULT_FLOOR;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::SystemTime;
use tracing::{error, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
const CO2_KG_PER_SAVED_MINUTE: f64 = 0.08;
const EPOCH_TIMESTAMP: &str = "1970-01-01T00:00:00Z";

pub enum ApiResponse<T> {
    Success(T),
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_root(State(state): State<ApiState>) -> impl IntoResponse {
    Json(ServiceStatusResponse {
        status: "ok",
        service: state.app_name.to_string(),
    })
}

pub async fn post_slot_update(
    State(state): State<ApiState>,
    Json(payload): Json<SlotUpdateRequest>,
) -> impl IntoResponse {
    build_slot_update_response(&state, payload)
}

pub async fn get_parking_map(
    State(state): State<ApiState>,
    Query(query): Query<MapQuery>,
) -> impl IntoResponse {
    build_map_response(&state, query, SystemTime::now())
}

pub async fn get_recommendation(State(state): State<ApiState>) -> impl IntoResponse {
    build_recommendation_response(&state, SystemTime::now())
}

pub async fn get_predictions(State(state): State<ApiState>) -> impl IntoResponse {
    build_predictions_response(&state)
}

pub async fn post_impact(Json(payload): Json<ImpactRequest>) -> impl IntoResponse {
    Json(compute_impact(&payload))
}

fn build_slot_update_response(
    state: &ApiState,
    payload: SlotUpdateRequest,
) -> ApiResponse<SlotUpdateResponse> {
    let timestamp = match payload.timestamp.to_system_time() {
        Ok(timestamp) => timestamp,
        Err(err) => return error_response(&err),
    };
    let update = SlotUpdate {
        slot_id: payload.slot_id,
        status: payload.status,
        timestamp,
    };
    match state.ingestor.apply(update) {
        Ok(slot) => ApiResponse::Success(SlotUpdateResponse {
            message: "updated",
            slot: slot.slot_id,
        }),
        Err(err) => error_response(&err),
    }
}

fn build_map_response(
    state: &ApiState,
    query: MapQuery,
    now: SystemTime,
) -> ApiResponse<ParkingMapResponse> {
    let floor_filter = query.floor.as_deref().filter(|floor| !floor.is_empty());
    let slots = match state.store.slots(floor_filter) {
        Ok(slots) => slots,
        Err(err) => return error_response(&err),
    };
    let floor = floor_filter
        .map(str::to_string)
        .or_else(|| slots.first().map(|slot| slot.floor.clone()))
        .unwrap_or_else(|| DEFAULT_FLOOR.to_string());

    let mut mapped = Vec::with_capacity(slots.len());
    for slot in slots {
        let prediction = match state.store.latest_prediction(&slot.slot_id) {
            Ok(prediction) => prediction.filter(|p| p.is_live_at(now)),
            Err(err) => return error_response(&err),
        };
        let status = match (slot.current_status, prediction) {
            (SlotStatus::Available, Some(p))
                if p.predicted_status == PredictedStatus::PredictedOccupied =>
            {
                PredictedStatus::PredictedOccupied
            }
            (SlotStatus::Available, _) => PredictedStatus::Available,
            (SlotStatus::Occupied, _) => PredictedStatus::Occupied,
        };
        let last_updated = match format_timestamp(slot.last_updated) {
            Ok(formatted) => formatted,
            Err(err) => return error_response(&err),
        };
        mapped.push(ParkingSlotResponse {
            slot_id: slot.slot_id,
            floor: slot.floor,
            zone: slot.zone,
            distance_from_entry: slot.distance_from_entry,
            status,
            last_updated,
        });
    }

    ApiResponse::Success(ParkingMapResponse {
        floor,
        slots: mapped,
    })
}

fn build_recommendation_response(
    state: &ApiState,
    now: SystemTime,
) -> ApiResponse<RecommendationResponse> {
    match state.scorer.recommend_at(now) {
        Ok(recommendation) => ApiResponse::Success(RecommendationResponse {
            recommended: recommendation.slot.map(|slot| RecommendationItem {
                slot_id: slot.slot_id,
                distance_from_entry: slot.distance_from_entry,
                probability_available: round3(recommendation.probability_available),
            }),
            reason: recommendation.reason.to_string(),
        }),
        Err(err) => error_response(&err),
    }
}

fn build_predictions_response(state: &ApiState) -> ApiResponse<Vec<PredictionResponse>> {
    let predictions = match state.store.predictions() {
        Ok(predictions) => predictions,
        Err(err) => return error_response(&err),
    };
    let mut mapped = Vec::with_capacity(predictions.len());
    for prediction in predictions {
        let valid_until = match format_timestamp(prediction.valid_until) {
            Ok(formatted) => formatted,
            Err(err) => return error_response(&err),
        };
        mapped.push(PredictionResponse {
            slot_id: prediction.slot_id,
            predicted_status: prediction.predicted_status,
            confidence: prediction.confidence,
            valid_until,
        });
    }
    ApiResponse::Success(mapped)
}

fn compute_impact(request: &ImpactRequest) -> ImpactResponse {
    ImpactResponse {
        saved_minutes: request.saved_minutes,
        co2_saved_kg: round3(request.saved_minutes * CO2_KG_PER_SAVED_MINUTE),
    }
}

fn error_response<T>(err: &AppError) -> ApiResponse<T> {
    let (status, error_code, message) = match err {
        AppError::InvalidObservation(_) | AppError::Timestamp(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiErrorCode::InvalidObservation,
            err.to_string(),
        ),
        AppError::InvalidSlot(_) => (
            StatusCode::NOT_FOUND,
            ApiErrorCode::SlotNotFound,
            err.to_string(),
        ),
        AppError::DataUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::DataUnavailable,
            err.to_string(),
        ),
        AppError::StateLock => {
            error!(error = %err, "Internal error while handling request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiErrorCode::InternalError,
                INTERNAL_ERROR_MESSAGE.to_string(),
            )
        }
    };
    if status != StatusCode::INTERNAL_SERVER_ERROR {
        warn!(status = status.as_u16(), error = %err, "Request failed");
    }

    let timestamp = format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format error timestamp");
        EPOCH_TIMESTAMP.to_string()
    });
    ApiResponse::Error {
        status,
        body: ErrorResponse {
            error_code,
            error_message: message,
            timestamp,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::responses::TimestampInput;
    use crate::broadcast::BroadcastHub;
    use crate::ingest::Ingestor;
    use crate::prediction::recency::RecencyWeightedModel;
    use crate::prediction::{PredictionEngine, PredictionSettings, RefreshScope};
    use crate::recommendation::{RecommendationScorer, RecommendationSettings};
    use crate::state::{Observation, Prediction};
    use crate::store::memory::MemoryStore;
    use crate::store::mock::{FlakyStore, MockStoreBehavior};
    use crate::store::{ParkingStore, SlotDefaults};
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    fn api_state(store: Arc<dyn ParkingStore>) -> ApiState {
        let hub = Arc::new(BroadcastHub::default());
        let engine = Arc::new(PredictionEngine::new(
            Arc::clone(&store),
            Arc::new(RecencyWeightedModel::with_defaults()),
            PredictionSettings::default(),
        ));
        ApiState {
            app_name: Arc::from("ParkSmart AI"),
            store: Arc::clone(&store),
            ingestor: Arc::new(Ingestor::new(
                Arc::clone(&store),
                engine,
                Arc::clone(&hub),
                SlotDefaults::default(),
                RefreshScope::Slot,
            )),
            scorer: Arc::new(RecommendationScorer::new(
                Arc::clone(&store),
                RecommendationSettings::default(),
            )),
            hub,
        }
    }

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn slot_update_records_and_responds_with_slot() {
        let store = Arc::new(MemoryStore::new());
        let state = api_state(store.clone());
        let payload = SlotUpdateRequest {
            slot_id: "A-03".to_string(),
            status: 1,
            timestamp: TimestampInput::Iso("2026-01-11T12:30:00Z".to_string()),
        };

        match build_slot_update_response(&state, payload) {
            ApiResponse::Success(body) => {
                assert_eq!(body.message, "updated");
                assert_eq!(body.slot, "A-03");
            }
            ApiResponse::Error { status, .. } => panic!("expected success, got {status}"),
        }
        assert_eq!(state.hub.stats().queued, 1);
    }

    #[test]
    fn slot_update_rejects_bad_status_and_timestamp() {
        let state = api_state(Arc::new(MemoryStore::new()));
        let bad_status = SlotUpdateRequest {
            slot_id: "A-03".to_string(),
            status: 5,
            timestamp: TimestampInput::EpochSeconds(10.0),
        };
        let bad_timestamp = SlotUpdateRequest {
            slot_id: "A-03".to_string(),
            status: 1,
            timestamp: TimestampInput::Iso("soon".to_string()),
        };
        let far_future = SlotUpdateRequest {
            slot_id: "A-03".to_string(),
            status: 1,
            timestamp: TimestampInput::EpochSeconds(1e12),
        };

        for payload in [bad_status, bad_timestamp, far_future] {
            match build_slot_update_response(&state, payload) {
                ApiResponse::Error { status, body } => {
                    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
                    assert_eq!(body.error_code, ApiErrorCode::InvalidObservation);
                }
                ApiResponse::Success(_) => panic!("expected validation error"),
            }
        }
        assert!(state.store.is_empty().unwrap_or(false));
    }

    #[test]
    fn map_overlays_live_predicted_occupied() -> Result<(), AppError> {
        let store = Arc::new(MemoryStore::new());
        store.get_or_create_slot("A-01", &SlotDefaults::default(), at(1))?;
        store.get_or_create_slot("A-02", &SlotDefaults::default(), at(1))?;
        store.append_observation(Observation::new("A-02", 1, at(2))?)?;
        store.replace_prediction(Prediction {
            slot_id: "A-01".to_string(),
            prediction_time: at(3),
            predicted_status: PredictedStatus::PredictedOccupied,
            confidence: 0.8,
            valid_until: at(603),
        })?;
        let state = api_state(store);

        match build_map_response(&state, MapQuery::default(), at(10)) {
            ApiResponse::Success(body) => {
                assert_eq!(body.floor, "B1");
                assert_eq!(body.slots.len(), 2);
                assert_eq!(body.slots[0].status, PredictedStatus::PredictedOccupied);
                assert_eq!(body.slots[1].status, PredictedStatus::Occupied);
                assert_eq!(body.slots[1].last_updated, "1970-01-01T00:00:02Z");
            }
            ApiResponse::Error { status, .. } => panic!("expected success, got {status}"),
        }
        Ok(())
    }

    #[test]
    fn map_for_unknown_floor_is_empty() {
        let state = api_state(Arc::new(MemoryStore::new()));
        let query = MapQuery {
            location: None,
            floor: Some("B9".to_string()),
        };

        match build_map_response(&state, query, at(10)) {
            ApiResponse::Success(body) => {
                assert_eq!(body.floor, "B9");
                assert!(body.slots.is_empty());
            }
            ApiResponse::Error { status, .. } => panic!("expected success, got {status}"),
        }
    }

    #[test]
    fn recommendation_rounds_probability() -> Result<(), AppError> {
        let store = Arc::new(MemoryStore::new());
        store.get_or_create_slot("A-01", &SlotDefaults::default(), at(1))?;
        for (secs, status) in [(2, 1), (3, 0), (4, 0)] {
            store.append_observation(Observation::new("A-01", status, at(secs))?)?;
        }
        let state = api_state(store);

        match build_recommendation_response(&state, at(10)) {
            ApiResponse::Success(body) => {
                let item = body.recommended.expect("recommended slot");
                assert_eq!(item.slot_id, "A-01");
                assert_eq!(item.probability_available, 0.667);
                assert_eq!(body.reason, "Highest probability & closest");
            }
            ApiResponse::Error { status, .. } => panic!("expected success, got {status}"),
        }
        Ok(())
    }

    #[test]
    fn store_outage_maps_to_service_unavailable() {
        let store = Arc::new(FlakyStore::new(MockStoreBehavior::ok()));
        store.set_offline(true);
        let state = api_state(store);

        match build_predictions_response(&state) {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body.error_code, ApiErrorCode::DataUnavailable);
            }
            ApiResponse::Success(_) => panic!("expected outage error"),
        }
    }

    #[test]
    fn impact_converts_minutes_to_co2() {
        let response = compute_impact(&ImpactRequest {
            saved_minutes: 12.5,
        });

        assert_eq!(response.saved_minutes, 12.5);
        assert_eq!(response.co2_saved_kg, 1.0);
    }
}
