use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while synchronizing audio and video playout.
///
/// None of these is fatal to a [`SyncController`](crate::SyncController):
/// a failing cycle is skipped and retried at the next wake.
#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Fewer than two sender reports are known for a stream, so no
    /// media-timestamp rate can be derived yet.
    #[error("correlation history: insufficient data")]
    ErrInsufficientData,
    /// The receiver has no packet or the transport has no sender report yet.
    #[error("stream has no measurement yet")]
    ErrNoMeasurement,
    /// A playout delay setter on a collaborator failed.
    #[error("failed to apply playout delay: {0}")]
    ErrApplyFailed(String),
    /// The measured skew is too large to be a real network difference.
    #[error("relative delay {0} ms out of range")]
    ErrSkewOutOfRange(i32),
    #[error("audio endpoint has no delay estimate")]
    ErrNoDelayEstimate,
    #[error("audio endpoint has no rtp handles")]
    ErrNoRtpHandles,
    #[error("mutex poison: {0}")]
    ErrPoisoned(String),
}

impl Error {
    /// Transient conditions expected during session startup.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ErrInsufficientData
                | Error::ErrNoMeasurement
                | Error::ErrNoDelayEstimate
                | Error::ErrNoRtpHandles
        )
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::ErrPoisoned(e.to_string())
    }
}
