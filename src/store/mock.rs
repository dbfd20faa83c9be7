use crate::error::AppError;
use crate::state::{Observation, Prediction, Slot};
use crate::store::memory::MemoryStore;
use crate::store::{ParkingStore, PredictionWrite, SlotDefaults};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

/// Which store calls fail, and for which slots.
#[derive(Debug, Clone, Default)]
pub struct MockStoreBehavior {
    pub failing_slots: HashSet<String>,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

impl MockStoreBehavior {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn fail_slots<I, S>(slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing_slots: slots.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn fail_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }
}

/// Memory store that reports `DataUnavailable` according to a behavior.
/// Listing calls fail only while `set_offline(true)` is in effect.
#[derive(Debug)]
pub struct FlakyStore {
    inner: MemoryStore,
    behavior: MockStoreBehavior,
    offline: AtomicBool,
}

impl FlakyStore {
    pub fn new(behavior: MockStoreBehavior) -> Self {
        Self {
            inner: MemoryStore::new(),
            behavior,
            offline: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    fn check_offline(&self) -> Result<(), AppError> {
        if self.offline.load(Ordering::Relaxed) {
            Err(AppError::DataUnavailable("mock store offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_read(&self, slot_id: &str) -> Result<(), AppError> {
        self.check_offline()?;
        if self.behavior.fail_reads || self.behavior.failing_slots.contains(slot_id) {
            return Err(AppError::DataUnavailable(format!(
                "mock read failed for {slot_id}"
            )));
        }
        Ok(())
    }

    fn check_write(&self, slot_id: &str) -> Result<(), AppError> {
        self.check_offline()?;
        if self.behavior.fail_writes || self.behavior.failing_slots.contains(slot_id) {
            return Err(AppError::DataUnavailable(format!(
                "mock write failed for {slot_id}"
            )));
        }
        Ok(())
    }
}

impl ParkingStore for FlakyStore {
    fn get_or_create_slot(
        &self,
        slot_id: &str,
        defaults: &SlotDefaults,
        now: SystemTime,
    ) -> Result<Slot, AppError> {
        self.check_offline()?;
        self.inner.get_or_create_slot(slot_id, defaults, now)
    }

    fn slot(&self, slot_id: &str) -> Result<Option<Slot>, AppError> {
        self.check_offline()?;
        self.inner.slot(slot_id)
    }

    fn slots(&self, floor: Option<&str>) -> Result<Vec<Slot>, AppError> {
        self.check_offline()?;
        self.inner.slots(floor)
    }

    fn append_observation(&self, observation: Observation) -> Result<Slot, AppError> {
        self.check_offline()?;
        self.inner.append_observation(observation)
    }

    fn recent_observations(
        &self,
        slot_id: &str,
        limit: usize,
    ) -> Result<Vec<Observation>, AppError> {
        self.check_read(slot_id)?;
        self.inner.recent_observations(slot_id, limit)
    }

    fn available_slots(&self) -> Result<Vec<Slot>, AppError> {
        self.check_offline()?;
        self.inner.available_slots()
    }

    fn replace_prediction(&self, prediction: Prediction) -> Result<PredictionWrite, AppError> {
        self.check_write(&prediction.slot_id)?;
        self.inner.replace_prediction(prediction)
    }

    fn latest_prediction(&self, slot_id: &str) -> Result<Option<Prediction>, AppError> {
        self.check_read(slot_id)?;
        self.inner.latest_prediction(slot_id)
    }

    fn predictions(&self) -> Result<Vec<Prediction>, AppError> {
        self.check_offline()?;
        self.inner.predictions()
    }

    fn is_empty(&self) -> Result<bool, AppError> {
        self.check_offline()?;
        self.inner.is_empty()
    }

    fn clear(&self) -> Result<(), AppError> {
        self.check_offline()?;
        self.inner.clear()
    }
}
