//! Frame acquisition with fault-specific retry and dropped-frame detection.

use crate::firmware::{RangingFirmware, RangingFrame};
use crate::status::{FaultKind, Status};
use crate::transport::RegisterBus;
use crate::Error;

/// Fetch attempts per frame before the cycle is abandoned.
pub const MAX_FETCH_ATTEMPTS: u32 = 3;

/// Consecutive failures tolerated before the engine faults.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Extra wait after a synchronization restart, on top of the timing budget.
const RESTART_SETTLE_MARGIN_MS: u32 = 10;

/// Where the engine is in its poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EngineState {
    /// Waiting for the sensor to flag a new frame
    #[default]
    AwaitingReady,
    /// Fetching a frame
    Fetching {
        /// Attempt number, counting from zero
        attempt: u32,
    },
    /// A frame was fetched and is being accounted for
    Processing,
    /// Too many consecutive failures; only re-initialization recovers
    Faulted,
}

/// Lifetime counters kept by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcquisitionCounters {
    /// Failed fetches since the last success
    pub consecutive_errors: u32,
    /// Fetch cycles started
    pub total_measurements: u32,
    /// Fetch cycles that returned a frame
    pub valid_measurements: u32,
    /// Frames the sensor produced but were never fetched
    pub missed_measurements: u32,
    /// Stream count of the last accounted frame, zero before the first
    pub last_stream_count: u8,
    /// Set once the first frame after start has been dropped
    pub first_frame_discarded: bool,
}

/// Outcome of a successful fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fetch {
    /// The first frame was fetched and dropped
    FirstFrameDiscarded,
    /// A frame ready for classification
    Frame {
        /// Fetched frame
        frame: RangingFrame,
        /// Frames skipped since the previous one
        missed: u8,
    },
}

/// Number of frames lost between stream counts `last` and `current`.
///
/// The counter runs 0 to 255 once, then cycles through 128 to 255.
#[must_use]
pub fn missed_frames(last: u8, current: u8) -> u8 {
    let expected = if last == 255 { 128 } else { last + 1 };
    let missed: u16 = if current == expected {
        0
    } else if current > expected {
        u16::from(current - expected)
    } else if expected <= 127 && current >= 128 {
        u16::from(128 - expected) + u16::from(current - 128)
    } else {
        256 - u16::from(expected) + u16::from(current)
    };
    u8::try_from(missed).unwrap_or(u8::MAX)
}

/// Retry and rollover state machine driven once per poll tick.
#[derive(Debug, Default)]
pub struct AcquisitionEngine {
    state: EngineState,
    counters: AcquisitionCounters,
}

impl AcquisitionEngine {
    /// Creates an engine with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Lifetime counters.
    pub fn counters(&self) -> &AcquisitionCounters {
        &self.counters
    }

    /// `true` once the consecutive-error threshold was exceeded.
    pub fn is_faulted(&self) -> bool {
        self.state == EngineState::Faulted
    }

    /// Leaves the faulted state after the device was re-initialized.
    ///
    /// Lifetime counters and the first-frame flag are kept.
    pub fn clear_fault(&mut self) {
        self.state = EngineState::AwaitingReady;
        self.counters.consecutive_errors = 0;
    }

    /// Recovery wait applied after failed attempt `attempt` (zero based).
    fn backoff_ms(kind: FaultKind, attempt: u32) -> u32 {
        match kind {
            FaultKind::Timeout => 10 + 5 * attempt,
            FaultKind::Range => 10,
            FaultKind::Synchronization => 20 + 10 * attempt,
            FaultKind::ControlInterface => 50 + 25 * attempt,
            FaultKind::CalibrationWarning | FaultKind::Other => 15 + 5 * attempt,
        }
    }

    fn account(&mut self, frame: &RangingFrame) -> u8 {
        let mut missed = 0;
        if self.counters.last_stream_count != 0 {
            missed = missed_frames(self.counters.last_stream_count, frame.stream_count);
            if missed > 0 {
                self.counters.missed_measurements = self
                    .counters
                    .missed_measurements
                    .saturating_add(u32::from(missed));
                warn!(
                    "Missed {} frame(s) before stream count {} (total missed: {})",
                    missed,
                    frame.stream_count,
                    self.counters.missed_measurements
                );
            }
        }
        self.counters.last_stream_count = frame.stream_count;
        missed
    }
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), keep_self),
    async(feature = "async", keep_self)
)]
impl AcquisitionEngine {
    /// Asks the firmware whether a new frame is waiting.
    ///
    /// # Errors
    ///
    /// * `Err(Error::Vendor(Status))` - the readiness query failed
    /// * `Err(Error::Faulted)` - the engine is faulted
    pub async fn check_ready<B, F>(
        &mut self,
        bus: &mut B,
        firmware: &mut F,
    ) -> Result<bool, Error<B::BusError>>
    where
        B: RegisterBus,
        F: RangingFirmware,
    {
        if self.is_faulted() {
            return Err(Error::Faulted);
        }
        firmware.get_data_ready(bus).await.map_err(|status| {
            warn!("Failed to check data ready: {}", status);
            Error::Vendor(status)
        })
    }

    /// Runs one bounded fetch cycle for a frame that was reported ready.
    ///
    /// # Errors
    ///
    /// * `Err(Error::Vendor(Status))` - every attempt failed; try again next tick
    /// * `Err(Error::Faulted)` - the consecutive-error threshold was exceeded
    pub async fn acquire<B, F>(
        &mut self,
        bus: &mut B,
        firmware: &mut F,
        timing_budget_us: u32,
    ) -> Result<Fetch, Error<B::BusError>>
    where
        B: RegisterBus,
        F: RangingFirmware,
    {
        if self.is_faulted() {
            return Err(Error::Faulted);
        }

        self.counters.total_measurements = self.counters.total_measurements.wrapping_add(1);
        let frame = self.fetch(bus, firmware, timing_budget_us).await?;

        self.state = EngineState::Processing;
        if let Err(status) = firmware.clear_and_restart(bus).await {
            warn!("Failed to clear interrupt: {}", status);
        }

        let result = if self.counters.first_frame_discarded {
            trace!(
                "Frame {}: {} object(s)",
                frame.stream_count,
                frame.object_count
            );
            let missed = self.account(&frame);
            Fetch::Frame { frame, missed }
        } else {
            debug!("Discarding first frame, wrap-around check not yet valid");
            self.counters.first_frame_discarded = true;
            Fetch::FirstFrameDiscarded
        };
        self.state = EngineState::AwaitingReady;
        Ok(result)
    }

    async fn fetch<B, F>(
        &mut self,
        bus: &mut B,
        firmware: &mut F,
        timing_budget_us: u32,
    ) -> Result<RangingFrame, Error<B::BusError>>
    where
        B: RegisterBus,
        F: RangingFirmware,
    {
        let mut last_status = Status::Undefined;
        for attempt in 0..MAX_FETCH_ATTEMPTS {
            self.state = EngineState::Fetching { attempt };
            let status = match firmware.get_multi_ranging_data(bus).await {
                Ok(frame) => {
                    self.counters.consecutive_errors = 0;
                    self.counters.valid_measurements =
                        self.counters.valid_measurements.wrapping_add(1);
                    return Ok(frame);
                }
                Err(status) => status,
            };

            self.counters.consecutive_errors += 1;
            last_status = status;
            warn!(
                "Failed to get ranging data (attempt {}/{}): {}",
                attempt + 1,
                MAX_FETCH_ATTEMPTS,
                status
            );

            let kind = status.kind();
            let wait_ms = Self::backoff_ms(kind, attempt);
            if kind == FaultKind::Synchronization {
                debug!("Restarting ranging after sync failure (attempt {})", attempt + 1);
                if let Err(status) = firmware.stop_measurement(bus).await {
                    warn!("Failed to stop ranging: {}", status);
                }
                bus.delay_ms(wait_ms).await;
                if let Err(status) = firmware.start_measurement(bus).await {
                    warn!("Failed to restart ranging: {}", status);
                }
                bus.delay_ms(timing_budget_us / 1000 + RESTART_SETTLE_MARGIN_MS)
                    .await;
            } else {
                bus.delay_ms(wait_ms).await;
            }

            if self.counters.consecutive_errors > MAX_CONSECUTIVE_ERRORS {
                error!(
                    "Too many consecutive errors ({}), sensor marked as failed",
                    self.counters.consecutive_errors
                );
                self.state = EngineState::Faulted;
                return Err(Error::Faulted);
            }
        }

        error!("All fetch attempts failed: {}", last_status);
        self.state = EngineState::AwaitingReady;
        Err(Error::Vendor(last_status))
    }
}
