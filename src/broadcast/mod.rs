//! Live fan-out of slot events to websocket subscribers.

use crate::error::AppError;
use crate::state::{PredictedStatus, Prediction, Slot, SlotId, SlotStatus, format_timestamp};
use serde::Serialize;
use std::time::{Duration, SystemTime};
use thiserror::Error;

pub mod hub;
pub mod queue;

pub use hub::{BroadcastHub, DeliveryRound, HubSettings, HubStats, Subscription};

pub type ConnectionId = u64;

/// Lifecycle of one subscriber connection. Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open)
                | (Self::Connecting, Self::Closed)
                | (Self::Open, Self::Closed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SlotEvent {
    SlotUpdate {
        slot_id: SlotId,
        status: SlotStatus,
        timestamp: String,
    },
    PredictionUpdate {
        slot_id: SlotId,
        predicted_status: PredictedStatus,
        confidence: f64,
        valid_until: String,
    },
}

impl SlotEvent {
    pub fn slot_update(slot: &Slot, observed_at: SystemTime) -> Result<Self, AppError> {
        Ok(Self::SlotUpdate {
            slot_id: slot.slot_id.clone(),
            status: slot.current_status,
            timestamp: format_timestamp(observed_at)?,
        })
    }

    pub fn prediction_update(prediction: &Prediction) -> Result<Self, AppError> {
        Ok(Self::PredictionUpdate {
            slot_id: prediction.slot_id.clone(),
            predicted_status: prediction.predicted_status,
            confidence: prediction.confidence,
            valid_until: format_timestamp(prediction.valid_until)?,
        })
    }

    pub fn slot_id(&self) -> &str {
        match self {
            Self::SlotUpdate { slot_id, .. } | Self::PredictionUpdate { slot_id, .. } => slot_id,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber closed")]
    Closed,
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}
