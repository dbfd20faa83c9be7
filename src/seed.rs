//! Demo lot used when the service starts with an empty store, and the
//! longer history written by a full reset.

use crate::error::AppError;
use crate::state::Observation;
use crate::store::{ParkingStore, SlotDefaults};
use std::time::{Duration, SystemTime};
use tracing::info;

const DEMO_FLOOR: &str = "B1";
const DEMO_ZONE: &str = "A";
const DEMO_SLOTS: [(&str, u32); 5] = [
    ("A-01", 20),
    ("A-02", 25),
    ("A-03", 30),
    ("A-04", 35),
    ("A-05", 40),
];

/// Shape of the synthetic history written for each demo slot.
#[derive(Debug, Clone, Copy)]
struct History {
    readings: u64,
    spacing_minutes: u64,
    /// Reading `j` of slot `i` is occupied when `(i + j) % occupied_every == 0`.
    occupied_every: u64,
}

/// An hour of readings.
const STARTUP_HISTORY: History = History {
    readings: 10,
    spacing_minutes: 6,
    occupied_every: 3,
};

/// Five hours of readings.
const RESET_HISTORY: History = History {
    readings: 50,
    spacing_minutes: 6,
    occupied_every: 4,
};

/// Provision the demo slots and an hour of readings for each.
/// Returns the number of slots seeded.
pub fn seed_demo(store: &dyn ParkingStore, now: SystemTime) -> Result<usize, AppError> {
    let seeded = write_history(store, now, STARTUP_HISTORY)?;
    info!(slots = seeded, "Seeded demo parking lot");
    Ok(seeded)
}

/// Drop every slot, observation and prediction, then write five hours of
/// demo history. Returns the number of slots seeded.
pub fn reset_and_seed(store: &dyn ParkingStore, now: SystemTime) -> Result<usize, AppError> {
    store.clear()?;
    let seeded = write_history(store, now, RESET_HISTORY)?;
    info!(slots = seeded, "Reset store and reseeded demo parking lot");
    Ok(seeded)
}

fn write_history(
    store: &dyn ParkingStore,
    now: SystemTime,
    history: History,
) -> Result<usize, AppError> {
    let span = Duration::from_secs(history.readings * history.spacing_minutes * 60);
    let start = now.checked_sub(span).unwrap_or(now);

    for (index, (slot_id, distance)) in DEMO_SLOTS.iter().enumerate() {
        let defaults = SlotDefaults {
            floor: DEMO_FLOOR.to_string(),
            zone: Some(DEMO_ZONE.to_string()),
            distance_from_entry: *distance,
        };
        store.get_or_create_slot(slot_id, &defaults, now)?;

        for step in 0..history.readings {
            let timestamp = start + Duration::from_secs(step * history.spacing_minutes * 60);
            let status = u8::from((index as u64 + step) % history.occupied_every == 0);
            store.append_observation(Observation::new(*slot_id, status, timestamp)?)?;
        }
    }

    Ok(DEMO_SLOTS.len())
}
