use crate::error::AppError;
use crate::state::{PredictedStatus, parse_timestamp, timestamp_from_epoch_secs};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Debug, Serialize)]
pub struct ServiceStatusResponse {
    pub status: &'static str,
    pub service: String,
}

/// Accepts ISO-8601 text or epoch seconds for the same instant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TimestampInput {
    EpochSeconds(f64),
    Iso(String),
}

impl TimestampInput {
    pub fn to_system_time(&self) -> Result<SystemTime, AppError> {
        match self {
            TimestampInput::EpochSeconds(secs) => timestamp_from_epoch_secs(*secs),
            TimestampInput::Iso(text) => parse_timestamp(text),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SlotUpdateRequest {
    pub slot_id: String,
    pub status: u8,
    pub timestamp: TimestampInput,
}

#[derive(Debug, Serialize)]
pub struct SlotUpdateResponse {
    pub message: &'static str,
    pub slot: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct MapQuery {
    /// Accepted for client compatibility; a single lot is served.
    pub location: Option<String>,
    pub floor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ParkingMapResponse {
    pub floor: String,
    pub slots: Vec<ParkingSlotResponse>,
}

#[derive(Debug, Serialize)]
pub struct ParkingSlotResponse {
    pub slot_id: String,
    pub floor: String,
    pub zone: Option<String>,
    pub distance_from_entry: u32,
    pub status: PredictedStatus,
    pub last_updated: String,
}

#[derive(Debug, Serialize)]
pub struct RecommendationResponse {
    pub recommended: Option<RecommendationItem>,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RecommendationItem {
    pub slot_id: String,
    pub distance_from_entry: u32,
    pub probability_available: f64,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub slot_id: String,
    pub predicted_status: PredictedStatus,
    pub confidence: f64,
    pub valid_until: String,
}

#[derive(Debug, Deserialize)]
pub struct ImpactRequest {
    pub saved_minutes: f64,
}

#[derive(Debug, Serialize)]
pub struct ImpactResponse {
    pub saved_minutes: f64,
    pub co2_saved_kg: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ApiErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    InvalidObservation,
    SlotNotFound,
    DataUnavailable,
    InternalError,
}
