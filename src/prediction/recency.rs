//! Recency-weighted occupancy model.
//!
//! probability = Σ(status · weight) / Σ(weight) over the observations inside
//! the horizon, where the newest observations carry a heavier weight. The
//! result is clamped so the model is never fully certain.

use crate::prediction::model::OccupancyModel;
use crate::state::{Observation, window_start};
use serde::Deserialize;
use std::time::{Duration, SystemTime};

/// One week.
pub const MAX_WINDOW_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecencyParams {
    pub history_limit: usize,
    pub horizon_minutes: u64,
    pub recent_minutes: u64,
    pub recent_weight: f64,
    pub base_weight: f64,
    /// Used when a slot has never reported.
    pub prior: f64,
    pub min_probability: f64,
    pub max_probability: f64,
}

impl Default for RecencyParams {
    fn default() -> Self {
        Self {
            history_limit: 200,
            horizon_minutes: 120,
            recent_minutes: 30,
            recent_weight: 1.5,
            base_weight: 1.0,
            prior: 0.3,
            min_probability: 0.05,
            max_probability: 0.95,
        }
    }
}

impl RecencyParams {
    /// Reject settings the model cannot evaluate.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("prior", self.prior),
            ("min_probability", self.min_probability),
            ("max_probability", self.max_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.min_probability > self.max_probability {
            return Err(format!(
                "min_probability {} exceeds max_probability {}",
                self.min_probability, self.max_probability
            ));
        }
        for (name, value) in [
            ("recent_weight", self.recent_weight),
            ("base_weight", self.base_weight),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{name} must be a positive number, got {value}"));
            }
        }
        for (name, value) in [
            ("horizon_minutes", self.horizon_minutes),
            ("recent_minutes", self.recent_minutes),
        ] {
            if value > MAX_WINDOW_MINUTES {
                return Err(format!("{name} must be at most {MAX_WINDOW_MINUTES}, got {value}"));
            }
        }
        if self.history_limit == 0 {
            return Err("history_limit must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct RecencyWeightedModel {
    pub params: RecencyParams,
}

impl RecencyWeightedModel {
    pub fn new(params: RecencyParams) -> Self {
        Self { params }
    }

    pub fn with_defaults() -> Self {
        Self::new(RecencyParams::default())
    }

    fn weight(&self, observation: &Observation, recent_start: SystemTime) -> f64 {
        if observation.timestamp >= recent_start {
            self.params.recent_weight
        } else {
            self.params.base_weight
        }
    }
}

impl OccupancyModel for RecencyWeightedModel {
    fn probability_occupied(&self, observations: &[Observation], now: SystemTime) -> f64 {
        if observations.is_empty() {
            return self.params.prior;
        }

        let horizon_start = window_start(now, minutes(self.params.horizon_minutes));
        let in_horizon: Vec<&Observation> = observations
            .iter()
            .filter(|observation| observation.timestamp >= horizon_start)
            .collect();
        let window = if in_horizon.is_empty() {
            observations.iter().collect()
        } else {
            in_horizon
        };

        let recent_start = window_start(now, minutes(self.params.recent_minutes));
        let (weighted, total) = window.iter().fold((0.0, 0.0), |(weighted, total), obs| {
            let weight = self.weight(obs, recent_start);
            (weighted + f64::from(obs.status) * weight, total + weight)
        });
        if total <= 0.0 {
            return self.params.prior;
        }

        (weighted / total)
            .max(self.params.min_probability)
            .min(self.params.max_probability)
    }

    fn history_limit(&self) -> usize {
        self.params.history_limit
    }
}

fn minutes(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(60))
}
