//! Bias calibration and frequency sweeps for a SCPI test bench made of a
//! voltage source, a signal generator and a spectrum analyzer.
//!
//! - [`calibration`] finds the power-maximizing bias voltage per frequency
//!   and persists it as a [`vmap::FrequencyVoltageMap`].
//! - [`sweep`] replays that map while stepping the generator and records
//!   the measured power per point.
//! - [`fluctuation`] samples raw power at one fixed point to characterize
//!   measurement noise.
//!
//! Instruments are reached through the [`channel::InstrumentChannel`]
//! trait; the `visa` feature provides the VISA implementation.

pub mod bench;
pub mod calibration;
pub mod channel;
pub mod config;
pub mod error;
pub mod fluctuation;
pub mod frequency;
pub mod instruments;
pub mod mock;
pub mod record;
pub mod session;
pub mod sweep;
#[cfg(feature = "visa")]
pub mod visa;
pub mod vmap;

pub use error::{Result, SweepError};
