//! Best-slot recommendation.
//!
//! Each available slot is scored as
//! `availability_weight · p(available) + proximity_weight · 1/(1 + distance)`
//! and the highest score wins. Candidates are visited in `slot_id` order and
//! only a strictly better score replaces the current pick, so ties resolve
//! to the lowest id.

use crate::error::AppError;
use crate::state::{PredictedStatus, Slot};
use crate::store::ParkingStore;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

pub const REASON_RECOMMENDED: &str = "Highest probability & closest";
pub const REASON_NO_AVAILABLE_SLOTS: &str = "No available slots";

#[derive(Debug, Clone)]
pub struct RecommendationSettings {
    pub history_limit: usize,
    pub availability_weight: f64,
    pub proximity_weight: f64,
    /// Availability assumed for a slot that has never reported.
    pub unseen_prior: f64,
    /// Lower bound for availability derived from history.
    pub history_floor: f64,
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            history_limit: 50,
            availability_weight: 0.7,
            proximity_weight: 0.3,
            unseen_prior: 0.8,
            history_floor: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub slot: Option<Slot>,
    pub probability_available: f64,
    pub reason: &'static str,
}

impl Recommendation {
    fn none() -> Self {
        Self {
            slot: None,
            probability_available: 0.0,
            reason: REASON_NO_AVAILABLE_SLOTS,
        }
    }
}

#[derive(Debug)]
pub struct RecommendationScorer {
    store: Arc<dyn ParkingStore>,
    settings: RecommendationSettings,
}

impl RecommendationScorer {
    pub fn new(store: Arc<dyn ParkingStore>, settings: RecommendationSettings) -> Self {
        Self { store, settings }
    }

    pub fn score(&self, probability_available: f64, distance_from_entry: u32) -> f64 {
        let proximity = 1.0 / (1.0 + f64::from(distance_from_entry));
        self.settings.availability_weight * probability_available
            + self.settings.proximity_weight * proximity
    }

    pub fn recommend(&self) -> Result<Recommendation, AppError> {
        self.recommend_at(SystemTime::now())
    }

    pub fn recommend_at(&self, now: SystemTime) -> Result<Recommendation, AppError> {
        let mut candidates = self.store.available_slots()?;
        if candidates.is_empty() {
            return Ok(Recommendation::none());
        }
        candidates.sort_by(|a, b| a.slot_id.cmp(&b.slot_id));

        let mut best: Option<(Slot, f64, f64)> = None;
        for slot in candidates {
            let probability = self.probability_available(&slot, now)?;
            let score = self.score(probability, slot.distance_from_entry);
            debug!(slot_id = %slot.slot_id, probability, score, "Scored candidate slot");
            if best.as_ref().is_none_or(|(_, _, best_score)| score > *best_score) {
                best = Some((slot, probability, score));
            }
        }

        Ok(match best {
            Some((slot, probability_available, _)) => Recommendation {
                slot: Some(slot),
                probability_available,
                reason: REASON_RECOMMENDED,
            },
            None => Recommendation::none(),
        })
    }

    /// Availability from a live `predicted_occupied` prediction, else from
    /// the recent occupancy rate, else the unseen prior.
    pub fn probability_available(&self, slot: &Slot, now: SystemTime) -> Result<f64, AppError> {
        let prediction = self
            .store
            .latest_prediction(&slot.slot_id)?
            .filter(|prediction| prediction.is_live_at(now));
        if let Some(prediction) = prediction
            && prediction.predicted_status == PredictedStatus::PredictedOccupied
        {
            return Ok((1.0 - prediction.confidence).max(0.0));
        }

        let observations = self
            .store
            .recent_observations(&slot.slot_id, self.settings.history_limit)?;
        if observations.is_empty() {
            return Ok(self.settings.unseen_prior);
        }
        let occupied: f64 = observations.iter().map(|o| f64::from(o.status)).sum();
        let occupied_ratio = occupied / observations.len() as f64;
        Ok((1.0 - occupied_ratio).max(self.settings.history_floor))
    }
}
