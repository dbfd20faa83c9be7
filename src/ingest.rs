use crate::broadcast::{BroadcastHub, SlotEvent};
use crate::error::AppError;
use crate::prediction::{PredictionEngine, RefreshScope};
use crate::state::{Observation, Slot, SlotId};
use crate::store::{ParkingStore, SlotDefaults};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// One binary reading reported by a trusted device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotUpdate {
    pub slot_id: SlotId,
    pub status: u8,
    pub timestamp: SystemTime,
}

/// Sensor ingestion: log the reading, re-predict, then notify subscribers.
#[derive(Debug)]
pub struct Ingestor {
    store: Arc<dyn ParkingStore>,
    engine: Arc<PredictionEngine>,
    hub: Arc<BroadcastHub>,
    defaults: SlotDefaults,
    scope: RefreshScope,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn ParkingStore>,
        engine: Arc<PredictionEngine>,
        hub: Arc<BroadcastHub>,
        defaults: SlotDefaults,
        scope: RefreshScope,
    ) -> Self {
        Self {
            store,
            engine,
            hub,
            defaults,
            scope,
        }
    }

    /// Apply a reading. Unknown slots are provisioned with the configured
    /// defaults. A failed re-prediction is logged; the reading stays recorded.
    pub fn apply(&self, update: SlotUpdate) -> Result<Slot, AppError> {
        let slot_id = update.slot_id.trim();
        if slot_id.is_empty() {
            return Err(AppError::InvalidObservation(
                "slot_id must not be empty".to_string(),
            ));
        }
        let observation = Observation::new(slot_id, update.status, update.timestamp)?;

        self.store
            .get_or_create_slot(slot_id, &self.defaults, update.timestamp)?;
        let slot = self.store.append_observation(observation)?;
        debug!(
            slot_id = %slot.slot_id,
            status = %slot.current_status,
            "Observation recorded"
        );

        self.refresh_predictions(&slot.slot_id);

        match SlotEvent::slot_update(&slot, update.timestamp) {
            Ok(event) => self.hub.publish(event),
            Err(err) => warn!(
                slot_id = %slot.slot_id,
                error = %err,
                "Failed to build slot update event"
            ),
        }
        Ok(slot)
    }

    fn refresh_predictions(&self, slot_id: &str) {
        match self.scope {
            RefreshScope::Slot => {
                if let Err(err) = self.engine.refresh(slot_id) {
                    warn!(slot_id, error = %err, "Prediction refresh after update failed");
                }
            }
            RefreshScope::All => match self.engine.refresh_all() {
                Ok(report) if !report.is_complete() => warn!(
                    refreshed = report.refreshed,
                    failed = report.failures.len(),
                    "Some predictions failed to refresh after update"
                ),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "Prediction refresh after update failed"),
            },
        }
    }
}
