//! # VL53LX Multi-Target Ranging Session
//!
//! This crate provides a `no_std` ranging session for ST-Microelectronics' VL53L3CX
//! multi-target time-of-flight sensor, built on the VL53LX firmware.
//!
//! The session owns a chunked I2C register transport, drives the vendor firmware through
//! the [`RangingFirmware`] trait, retries failed fetches with fault-specific backoff,
//! detects dropped frames from the stream counter, classifies up to four targets per frame
//! and persists calibration data per sensor address.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use vl53lx_ranging::{Config, MemoryStore, RangingFirmware, RangingSession, Transport};
//!
//! fn run<F: RangingFirmware>(firmware: F) {
//!     let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
//!     let delay = embedded_hal_mock::eh1::delay::NoopDelay;
//!     let transport = Transport::new(i2c, delay);
//!     let store: MemoryStore<F::Calibration, 1> = MemoryStore::new();
//!
//!     let mut session = RangingSession::new(transport, firmware, store, Config::default());
//!     session.initialize(&mut ()).unwrap();
//!
//!     // Poll once per inter-measurement period
//!     if let Ok(Some(frame)) = session.acquire_frame(&mut (), 0) {
//!         for (slot, reading) in frame.slots.iter().enumerate() {
//!             if let Some(meters) = reading.meters() {
//!                 println!("Target {slot}: {meters} m");
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! * `async` - use `embedded-hal-async` instead of the blocking traits
//! * `log` - log through the `log` crate (default)
//! * `defmt` - log through `defmt`
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod fmt; // <-- must be first module!

pub mod acquisition;
pub mod calibration;
pub mod classifier;
pub mod config;
pub mod firmware;
pub mod power;
pub mod session;
pub mod status;
pub mod transport;

pub use acquisition::{AcquisitionCounters, AcquisitionEngine, EngineState, Fetch};
pub use calibration::{
    CalibrationKey, CalibrationKind, CalibrationOutcome, CalibrationStore, MemoryStore,
};
pub use classifier::{classify, Classification, SlotReading};
pub use config::{
    Config, ConfigError, DistanceMode, OffsetCorrectionMode, Roi, SmudgeCorrectionMode,
    TargetOrder,
};
pub use firmware::{
    FixPoint1616, RangeStatus, RangingFirmware, RangingFrame, TargetReading, TuningParameter,
};
pub use power::{PowerControl, XshutPin};
pub use session::{RangingOutput, RangingSession};
pub use status::{FaultKind, Status};
pub use transport::{RegisterBus, Transport};

/// Error type for ranging session operations.
///
/// This enum represents all possible errors that can occur when driving the sensor.
/// Most of them are recoverable; only [`Error::Faulted`] requires the session to be
/// re-initialized.
///
/// # Examples
///
/// ```rust,no_run
/// use vl53lx_ranging::Error;
///
/// fn describe(result: Result<(), Error<embedded_hal::i2c::ErrorKind>>) {
///     match result {
///         Ok(()) => println!("ok"),
///         Err(e) if e.is_fatal() => println!("session must be re-initialized"),
///         Err(Error::Vendor(status)) => println!("firmware reported {status}"),
///         Err(e) => println!("error: {e}"),
///     }
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E: core::fmt::Debug> {
    /// I2C communication error from the underlying hardware
    I2cError(E),
    /// Sensor operation timed out
    Timeout,
    /// Invalid parameter value provided
    InvalidArgument,
    /// Configuration rejected before touching the sensor
    InvalidConfig(config::ConfigError),
    /// Non-success status reported by the ranging firmware
    Vendor(Status),
    /// The XSHUT or interrupt pin could not be driven
    PowerControl,
    /// The session has not been initialized
    NotInitialized,
    /// Too many consecutive failures; re-initialization required
    Faulted,
}

impl<E: core::fmt::Debug> Error<E> {
    /// `true` when the session cannot recover without re-initialization.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Faulted)
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl<E: core::fmt::Debug> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Error::I2cError(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_faulted_is_fatal() {
        assert!(Error::<()>::Faulted.is_fatal());
        assert!(!Error::<()>::Timeout.is_fatal());
        assert!(!Error::<()>::Vendor(Status::TimeOut).is_fatal());
        assert!(!Error::<()>::NotInitialized.is_fatal());
    }

    #[test]
    fn bus_errors_wrap_into_i2c_error() {
        let error: Error<u8> = 5.into();
        assert_eq!(error, Error::I2cError(5));
        assert_eq!(std::format!("{}", Error::<u8>::Faulted), "Faulted");
    }
}
