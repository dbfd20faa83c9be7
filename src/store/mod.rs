//! Persistence seam for slots, their observation log and predictions.
//!
//! The service only needs keyed lookups and "most recent N" range reads, so
//! the store is a trait. `memory::MemoryStore` backs the running service;
//! `mock::FlakyStore` injects failures for tests.

use crate::error::AppError;
use crate::state::{Observation, Prediction, Slot, SlotStatus};
use std::fmt;
use std::time::SystemTime;

pub mod memory;
pub mod mock;

pub const DEFAULT_FLOOR: &str = "B1";
pub const DEFAULT_DISTANCE_FROM_ENTRY: u32 = 30;

/// Attributes given to a slot that is provisioned on first sight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDefaults {
    pub floor: String,
    pub zone: Option<String>,
    pub distance_from_entry: u32,
}

impl Default for SlotDefaults {
    fn default() -> Self {
        Self {
            floor: DEFAULT_FLOOR.to_string(),
            zone: None,
            distance_from_entry: DEFAULT_DISTANCE_FROM_ENTRY,
        }
    }
}

/// Outcome of offering a prediction to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionWrite {
    /// Stored, replacing the prediction it carries (if any).
    Stored(Option<Prediction>),
    /// The stored prediction was computed later and was kept.
    Superseded(Prediction),
}

pub trait ParkingStore: Send + Sync + fmt::Debug {
    /// Return the slot, creating it as available with `defaults` if unknown.
    fn get_or_create_slot(
        &self,
        slot_id: &str,
        defaults: &SlotDefaults,
        now: SystemTime,
    ) -> Result<Slot, AppError>;

    fn slot(&self, slot_id: &str) -> Result<Option<Slot>, AppError>;

    /// All slots ordered by `slot_id`, optionally restricted to one floor.
    fn slots(&self, floor: Option<&str>) -> Result<Vec<Slot>, AppError>;

    /// Append to the slot's log and move its current status to match.
    /// Fails with `InvalidSlot` if the slot was never provisioned.
    fn append_observation(&self, observation: Observation) -> Result<Slot, AppError>;

    /// Up to `limit` observations for the slot, newest first.
    fn recent_observations(&self, slot_id: &str, limit: usize)
    -> Result<Vec<Observation>, AppError>;

    fn current_slot_state(&self, slot_id: &str) -> Result<SlotStatus, AppError> {
        self.slot(slot_id)?
            .map(|slot| slot.current_status)
            .ok_or_else(|| AppError::InvalidSlot(slot_id.to_string()))
    }

    /// Available slots ordered by `slot_id`.
    fn available_slots(&self) -> Result<Vec<Slot>, AppError>;

    /// Atomically swap in the slot's single prediction unless the stored one
    /// has a later `prediction_time`.
    fn replace_prediction(&self, prediction: Prediction) -> Result<PredictionWrite, AppError>;

    fn latest_prediction(&self, slot_id: &str) -> Result<Option<Prediction>, AppError>;

    /// Every stored prediction ordered by `slot_id`.
    fn predictions(&self) -> Result<Vec<Prediction>, AppError>;

    fn is_empty(&self) -> Result<bool, AppError>;

    /// Bulk reset: drop predictions, observations and slots.
    fn clear(&self) -> Result<(), AppError>;
}
