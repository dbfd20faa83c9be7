//! Occupancy model trait for the prediction engine.
//!
//! A model turns a slot's recent observation log into the probability that
//! the slot will be occupied in the near future. The engine owns the discrete
//! policy built on top of that probability.

use crate::state::Observation;
use std::time::SystemTime;

pub trait OccupancyModel: Send + Sync + std::fmt::Debug {
    /// Probability in [0, 1] that the slot is occupied soon.
    ///
    /// `observations` are newest first, at most `history_limit()` long.
    fn probability_occupied(&self, observations: &[Observation], now: SystemTime) -> f64;

    /// How many recent observations the model wants to see.
    fn history_limit(&self) -> usize;
}
