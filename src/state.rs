use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, PrimitiveDateTime};

pub type SlotId = String;

/// Naive ISO-8601 layout emitted by clients that do not attach an offset.
const NAIVE_ISO_FORMAT: &str =
    "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Occupied,
}

impl SlotStatus {
    /// Map a binary sensor reading (0 = free, 1 = taken) to a slot status.
    pub fn from_reading(status: u8) -> Result<Self, AppError> {
        match status {
            0 => Ok(Self::Available),
            1 => Ok(Self::Occupied),
            other => Err(AppError::InvalidObservation(format!(
                "status must be 0 or 1, got {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Occupied => "occupied",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictedStatus {
    Available,
    Occupied,
    /// Available now, expected to be taken soon.
    PredictedOccupied,
}

impl PredictedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Occupied => "occupied",
            Self::PredictedOccupied => "predicted_occupied",
        }
    }
}

impl fmt::Display for PredictedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub slot_id: SlotId,
    pub floor: String,
    pub zone: Option<String>,
    pub distance_from_entry: u32,
    pub current_status: SlotStatus,
    pub last_updated: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub slot_id: SlotId,
    /// 0 = free, 1 = occupied.
    pub status: u8,
    pub timestamp: SystemTime,
}

impl Observation {
    pub fn new(
        slot_id: impl Into<SlotId>,
        status: u8,
        timestamp: SystemTime,
    ) -> Result<Self, AppError> {
        SlotStatus::from_reading(status)?;
        to_offset_datetime(timestamp)?;
        Ok(Self {
            slot_id: slot_id.into(),
            status,
            timestamp,
        })
    }

    pub fn slot_status(&self) -> SlotStatus {
        if self.status == 1 {
            SlotStatus::Occupied
        } else {
            SlotStatus::Available
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub slot_id: SlotId,
    pub prediction_time: SystemTime,
    pub predicted_status: PredictedStatus,
    pub confidence: f64,
    pub valid_until: SystemTime,
}

impl Prediction {
    pub fn is_live_at(&self, now: SystemTime) -> bool {
        self.valid_until >= now
    }
}

pub fn format_timestamp(timestamp: SystemTime) -> Result<String, AppError> {
    to_offset_datetime(timestamp)?
        .format(&Rfc3339)
        .map_err(|err| AppError::Timestamp(err.to_string()))
}

/// Fails for instants outside the calendar range `time` can represent.
pub fn to_offset_datetime(timestamp: SystemTime) -> Result<OffsetDateTime, AppError> {
    let nanos = match timestamp.duration_since(UNIX_EPOCH) {
        Ok(after) => i128::try_from(after.as_nanos()).ok(),
        Err(before) => i128::try_from(before.duration().as_nanos())
            .ok()
            .map(|nanos| -nanos),
    };
    nanos
        .ok_or_else(|| AppError::Timestamp("timestamp out of range".to_string()))
        .and_then(|nanos| {
            OffsetDateTime::from_unix_timestamp_nanos(nanos)
                .map_err(|err| AppError::Timestamp(err.to_string()))
        })
}

/// Parse an ISO-8601 instant. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<SystemTime, AppError> {
    if let Ok(datetime) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(datetime.into());
    }

    let layout = time::format_description::parse(NAIVE_ISO_FORMAT)
        .map_err(|err| AppError::Timestamp(err.to_string()))?;
    let naive = PrimitiveDateTime::parse(value, &layout)
        .map_err(|err| AppError::Timestamp(format!("{value:?}: {err}")))?;
    Ok(naive.assume_utc().into())
}

pub fn timestamp_from_epoch_secs(secs: f64) -> Result<SystemTime, AppError> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(AppError::Timestamp(format!(
            "epoch seconds out of range: {secs}"
        )));
    }
    let timestamp = Duration::try_from_secs_f64(secs)
        .ok()
        .and_then(|offset| UNIX_EPOCH.checked_add(offset))
        .ok_or_else(|| AppError::Timestamp(format!("epoch seconds out of range: {secs}")))?;
    to_offset_datetime(timestamp)?;
    Ok(timestamp)
}

/// Start of a trailing window ending at `now`, saturating at the epoch.
pub fn window_start(now: SystemTime, window: Duration) -> SystemTime {
    now.checked_sub(window).unwrap_or(UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_maps_to_slot_status() {
        assert_eq!(SlotStatus::from_reading(0).ok(), Some(SlotStatus::Available));
        assert_eq!(SlotStatus::from_reading(1).ok(), Some(SlotStatus::Occupied));
        assert!(matches!(
            SlotStatus::from_reading(2),
            Err(AppError::InvalidObservation(_))
        ));
    }

    #[test]
    fn observation_rejects_non_binary_status() {
        let result = Observation::new("A-01", 7, UNIX_EPOCH);

        assert!(matches!(result, Err(AppError::InvalidObservation(_))));
    }

    #[test]
    fn parses_rfc3339_and_naive_iso_as_same_instant() -> Result<(), AppError> {
        let with_offset = parse_timestamp("2026-01-11T12:30:00Z")?;
        let naive = parse_timestamp("2026-01-11T12:30:00")?;
        let fractional = parse_timestamp("2026-01-11T12:30:00.250000")?;

        assert_eq!(with_offset, naive);
        assert_eq!(
            fractional.duration_since(naive).ok(),
            Some(Duration::from_millis(250))
        );
        Ok(())
    }

    #[test]
    fn epoch_seconds_match_iso_instant() -> Result<(), AppError> {
        let iso = parse_timestamp("1970-01-01T00:01:40Z")?;
        let epoch = timestamp_from_epoch_secs(100.0)?;

        assert_eq!(iso, epoch);
        assert!(timestamp_from_epoch_secs(-1.0).is_err());
        Ok(())
    }

    #[test]
    fn epoch_seconds_beyond_calendar_range_are_rejected() {
        // Year 33658 fits in SystemTime but not in the calendar.
        assert!(matches!(
            timestamp_from_epoch_secs(1e12),
            Err(AppError::Timestamp(_))
        ));
        // Too large for a Duration at all.
        assert!(matches!(
            timestamp_from_epoch_secs(1e20),
            Err(AppError::Timestamp(_))
        ));
        assert!(timestamp_from_epoch_secs(253_402_300_799.0).is_ok());
    }

    #[test]
    fn out_of_range_instants_fail_to_format_and_observe() {
        let far_future = UNIX_EPOCH + Duration::from_secs(1_000_000_000_000);

        assert!(matches!(
            format_timestamp(far_future),
            Err(AppError::Timestamp(_))
        ));
        assert!(matches!(
            Observation::new("A-01", 1, far_future),
            Err(AppError::Timestamp(_))
        ));
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(AppError::Timestamp(_))
        ));
    }

    #[test]
    fn format_timestamp_uses_rfc3339() -> Result<(), AppError> {
        let formatted = format_timestamp(UNIX_EPOCH + Duration::from_secs(1))?;

        assert_eq!(formatted, "1970-01-01T00:00:01Z");
        Ok(())
    }

    #[test]
    fn window_start_saturates_at_epoch() {
        let now = UNIX_EPOCH + Duration::from_secs(60);

        assert_eq!(window_start(now, Duration::from_secs(3600)), UNIX_EPOCH);
        assert_eq!(
            window_start(now, Duration::from_secs(30)),
            UNIX_EPOCH + Duration::from_secs(30)
        );
    }
}
