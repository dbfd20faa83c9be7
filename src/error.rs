use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
    #[error("unknown slot: {0}")]
    InvalidSlot(String),
    #[error("invalid observation: {0}")]
    InvalidObservation(String),
    #[error("timestamp error: {0}")]
    Timestamp(String),
    #[error("state lock poisoned")]
    StateLock,
}

impl AppError {
    /// Store-level failures the caller may re-trigger later.
    pub fn is_data_unavailable(&self) -> bool {
        matches!(self, Self::DataUnavailable(_) | Self::StateLock)
    }
}
