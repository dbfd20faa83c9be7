use crate::error::AppError;
use crate::state::{Observation, Prediction, Slot, SlotId, SlotStatus};
use crate::store::{ParkingStore, PredictionWrite, SlotDefaults};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::SystemTime;
use tracing::debug;

/// Per-slot log length kept in memory; the oldest entries are trimmed first.
pub const DEFAULT_RETAINED_OBSERVATIONS: usize = 10_000;

#[derive(Debug, Default)]
struct Tables {
    slots: BTreeMap<SlotId, Slot>,
    /// Ascending by timestamp.
    observations: HashMap<SlotId, Vec<Observation>>,
    predictions: BTreeMap<SlotId, Prediction>,
}

/// In-process store. A single `RwLock` guards all tables so a prediction
/// swap is never observed half-done.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    retained_observations: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETAINED_OBSERVATIONS)
    }

    pub fn with_retention(retained_observations: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            retained_observations: retained_observations.max(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParkingStore for MemoryStore {
    fn get_or_create_slot(
        &self,
        slot_id: &str,
        defaults: &SlotDefaults,
        now: SystemTime,
    ) -> Result<Slot, AppError> {
        let mut tables = self.tables.write().map_err(|_| AppError::StateLock)?;
        let slot = tables
            .slots
            .entry(slot_id.to_string())
            .or_insert_with(|| {
                debug!(slot_id, floor = %defaults.floor, "Provisioning slot");
                Slot {
                    slot_id: slot_id.to_string(),
                    floor: defaults.floor.clone(),
                    zone: defaults.zone.clone(),
                    distance_from_entry: defaults.distance_from_entry,
                    current_status: SlotStatus::Available,
                    last_updated: now,
                }
            });
        Ok(slot.clone())
    }

    fn slot(&self, slot_id: &str) -> Result<Option<Slot>, AppError> {
        let tables = self.tables.read().map_err(|_| AppError::StateLock)?;
        Ok(tables.slots.get(slot_id).cloned())
    }

    fn slots(&self, floor: Option<&str>) -> Result<Vec<Slot>, AppError> {
        let tables = self.tables.read().map_err(|_| AppError::StateLock)?;
        Ok(tables
            .slots
            .values()
            .filter(|slot| floor.is_none_or(|floor| slot.floor == floor))
            .cloned()
            .collect())
    }

    fn append_observation(&self, observation: Observation) -> Result<Slot, AppError> {
        let mut tables = self.tables.write().map_err(|_| AppError::StateLock)?;
        let Tables {
            slots,
            observations,
            ..
        } = &mut *tables;

        let slot = slots
            .get_mut(&observation.slot_id)
            .ok_or_else(|| AppError::InvalidSlot(observation.slot_id.clone()))?;
        slot.current_status = observation.slot_status();
        slot.last_updated = observation.timestamp;
        let updated = slot.clone();

        let log = observations.entry(observation.slot_id.clone()).or_default();
        // Late arrivals land in timestamp order; equal stamps keep arrival order.
        let index = log.partition_point(|existing| existing.timestamp <= observation.timestamp);
        log.insert(index, observation);
        if log.len() > self.retained_observations {
            let excess = log.len() - self.retained_observations;
            log.drain(..excess);
        }

        Ok(updated)
    }

    fn recent_observations(
        &self,
        slot_id: &str,
        limit: usize,
    ) -> Result<Vec<Observation>, AppError> {
        let tables = self.tables.read().map_err(|_| AppError::StateLock)?;
        Ok(tables
            .observations
            .get(slot_id)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn available_slots(&self) -> Result<Vec<Slot>, AppError> {
        let tables = self.tables.read().map_err(|_| AppError::StateLock)?;
        Ok(tables
            .slots
            .values()
            .filter(|slot| slot.current_status == SlotStatus::Available)
            .cloned()
            .collect())
    }

    fn replace_prediction(&self, prediction: Prediction) -> Result<PredictionWrite, AppError> {
        let mut tables = self.tables.write().map_err(|_| AppError::StateLock)?;
        if !tables.slots.contains_key(&prediction.slot_id) {
            return Err(AppError::InvalidSlot(prediction.slot_id));
        }
        if let Some(stored) = tables.predictions.get(&prediction.slot_id)
            && stored.prediction_time > prediction.prediction_time
        {
            return Ok(PredictionWrite::Superseded(stored.clone()));
        }
        Ok(PredictionWrite::Stored(
            tables
                .predictions
                .insert(prediction.slot_id.clone(), prediction),
        ))
    }

    fn latest_prediction(&self, slot_id: &str) -> Result<Option<Prediction>, AppError> {
        let tables = self.tables.read().map_err(|_| AppError::StateLock)?;
        Ok(tables.predictions.get(slot_id).cloned())
    }

    fn predictions(&self) -> Result<Vec<Prediction>, AppError> {
        let tables = self.tables.read().map_err(|_| AppError::StateLock)?;
        Ok(tables.predictions.values().cloned().collect())
    }

    fn is_empty(&self) -> Result<bool, AppError> {
        let tables = self.tables.read().map_err(|_| AppError::StateLock)?;
        Ok(tables.slots.is_empty())
    }

    fn clear(&self) -> Result<(), AppError> {
        let mut tables = self.tables.write().map_err(|_| AppError::StateLock)?;
        tables.predictions.clear();
        tables.observations.clear();
        tables.slots.clear();
        Ok(())
    }
}
