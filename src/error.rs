//! Error type shared by every stage of a calibration or sweep run.
//!
//! All kinds except [`SweepError::Capture`] are fatal for the current run:
//! they propagate with `?` up to the single handler in `main`, which logs the
//! diagnostic and terminates the process. Capture failures (screenshot or
//! trace download) are reported through the same type so callers can log
//! them, but the sweep continues past them.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, SweepError>;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Expected {expected} instrument endpoints but found {found}; check connections")]
    EndpointDiscovery { expected: usize, found: usize },

    #[error("Failed to connect to instrument '{resource}': {reason}")]
    Connection { resource: String, reason: String },

    #[error("Voltage {voltage:.3} V exceeds the safety ceiling of {ceiling:.3} V; check the voltage step and try again")]
    SafetyBoundExceeded { voltage: f64, ceiling: f64 },

    #[error("Calibration map unavailable: {0}")]
    CalibrationMapUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[cfg(feature = "visa")]
    #[error("VISA error: {0}")]
    Visa(#[from] visa_rs::Error),
}

impl SweepError {
    /// Whether a run may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SweepError::Capture(_))
    }
}

impl From<figment::Error> for SweepError {
    fn from(err: figment::Error) -> Self {
        SweepError::Config(err.to_string())
    }
}
