use crate::broadcast::{BroadcastHub, SlotEvent};
use crate::error::AppError;
use crate::state::{PredictedStatus, Prediction, SlotId, SlotStatus};
use crate::store::{ParkingStore, PredictionWrite};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub mod model;
pub mod recency;

use model::OccupancyModel;

pub const DEFAULT_VALID_MINUTES: u64 = 10;
pub const DEFAULT_OCCUPIED_THRESHOLD: f64 = 0.6;

/// Which slots an accepted observation re-predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshScope {
    /// Only the slot that reported.
    #[default]
    Slot,
    /// Every known slot.
    All,
}

#[derive(Debug, Clone)]
pub struct PredictionSettings {
    pub valid_for: Duration,
    /// Probability at or above which an available slot is flagged `predicted_occupied`.
    pub occupied_threshold: f64,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            valid_for: Duration::from_secs(DEFAULT_VALID_MINUTES * 60),
            occupied_threshold: DEFAULT_OCCUPIED_THRESHOLD,
        }
    }
}

#[derive(Debug)]
pub struct RefreshFailure {
    pub slot_id: SlotId,
    pub error: AppError,
}

#[derive(Debug, Default)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub failures: Vec<RefreshFailure>,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Map a probability and the slot's current status to the reported status
/// and its confidence (rounded to 3 decimals).
pub fn classify(
    current: SlotStatus,
    probability_occupied: f64,
    occupied_threshold: f64,
) -> (PredictedStatus, f64) {
    let predicted_status = match current {
        SlotStatus::Occupied => PredictedStatus::Occupied,
        SlotStatus::Available if probability_occupied >= occupied_threshold => {
            PredictedStatus::PredictedOccupied
        }
        SlotStatus::Available => PredictedStatus::Available,
    };
    let confidence = match predicted_status {
        PredictedStatus::Available => 1.0 - probability_occupied,
        PredictedStatus::Occupied | PredictedStatus::PredictedOccupied => probability_occupied,
    };
    (predicted_status, round3(confidence))
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[derive(Debug)]
pub struct PredictionEngine {
    store: Arc<dyn ParkingStore>,
    model: Arc<dyn OccupancyModel>,
    settings: PredictionSettings,
    publisher: Option<Arc<BroadcastHub>>,
}

impl PredictionEngine {
    pub fn new(
        store: Arc<dyn ParkingStore>,
        model: Arc<dyn OccupancyModel>,
        settings: PredictionSettings,
    ) -> Self {
        Self {
            store,
            model,
            settings,
            publisher: None,
        }
    }

    /// Publish a `prediction_update` whenever a slot's predicted status changes.
    pub fn with_publisher(mut self, hub: Arc<BroadcastHub>) -> Self {
        self.publisher = Some(hub);
        self
    }

    pub fn refresh(&self, slot_id: &str) -> Result<Prediction, AppError> {
        self.refresh_at(slot_id, SystemTime::now())
    }

    pub fn refresh_at(&self, slot_id: &str, now: SystemTime) -> Result<Prediction, AppError> {
        let current = self.store.current_slot_state(slot_id)?;
        let observations = self
            .store
            .recent_observations(slot_id, self.model.history_limit())?;

        let probability = self.model.probability_occupied(&observations, now);
        let (predicted_status, confidence) =
            classify(current, probability, self.settings.occupied_threshold);

        let valid_until = now.checked_add(self.settings.valid_for).ok_or_else(|| {
            AppError::Timestamp(format!("prediction for {slot_id} would expire out of range"))
        })?;
        let prediction = Prediction {
            slot_id: slot_id.to_string(),
            prediction_time: now,
            predicted_status,
            confidence,
            valid_until,
        };

        match self.store.replace_prediction(prediction.clone())? {
            PredictionWrite::Stored(previous) => {
                debug!(
                    slot_id,
                    observations = observations.len(),
                    probability,
                    predicted_status = %predicted_status,
                    confidence,
                    "Prediction refreshed"
                );
                if previous.map(|p| p.predicted_status) != Some(predicted_status) {
                    self.publish_change(&prediction);
                }
                Ok(prediction)
            }
            PredictionWrite::Superseded(current) => {
                debug!(slot_id, "Kept newer stored prediction");
                Ok(current)
            }
        }
    }

    fn publish_change(&self, prediction: &Prediction) {
        let Some(hub) = self.publisher.as_ref() else {
            return;
        };
        match SlotEvent::prediction_update(prediction) {
            Ok(event) => hub.publish(event),
            Err(err) => warn!(
                slot_id = %prediction.slot_id,
                error = %err,
                "Failed to build prediction update event"
            ),
        }
    }

    /// Refresh every known slot. A failing slot is recorded and skipped;
    /// only a failure to list slots aborts the batch.
    pub fn refresh_all(&self) -> Result<RefreshReport, AppError> {
        self.refresh_all_at(SystemTime::now())
    }

    pub fn refresh_all_at(&self, now: SystemTime) -> Result<RefreshReport, AppError> {
        let slots = self.store.slots(None)?;
        let mut report = RefreshReport::default();
        for slot in slots {
            match self.refresh_at(&slot.slot_id, now) {
                Ok(_) => report.refreshed += 1,
                Err(error) => {
                    warn!(slot_id = %slot.slot_id, error = %error, "Prediction refresh failed");
                    report.failures.push(RefreshFailure {
                        slot_id: slot.slot_id,
                        error,
                    });
                }
            }
        }
        Ok(report)
    }
}

/// Re-predict every slot on a fixed interval until `shutdown` turns true.
pub fn spawn_refresh_task(
    engine: Arc<PredictionEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    info!(
        interval_secs = interval.as_secs(),
        "Starting prediction refresh task"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; startup already refreshed.
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match engine.refresh_all() {
                        Ok(report) => debug!(
                            refreshed = report.refreshed,
                            failed = report.failures.len(),
                            "Periodic prediction refresh complete"
                        ),
                        Err(err) => warn!(error = %err, "Periodic prediction refresh failed"),
                    }
                }
            }
        }
        info!("Prediction refresh task stopped");
    })
}
