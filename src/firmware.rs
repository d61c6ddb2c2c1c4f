//! Boundary to the vendor ranging firmware.
//!
//! The histogram processing and calibration algorithms live in ST's VL53LX
//! core library; this crate drives them through [`RangingFirmware`]. Each
//! method receives the register bus explicitly, so several sensors on one
//! bus never share hidden state.

use crate::config::{DistanceMode, OffsetCorrectionMode, Roi, SmudgeCorrectionMode};
use crate::status::Status;
use crate::transport::RegisterBus;

/// Number of target slots reported per frame.
pub const MAX_TARGETS: usize = 4;

/// How long [`RangingFirmware::boot_wait`] waits for the firmware to boot.
pub const BOOT_TIMEOUT_MS: u32 = 500;

/// Register addresses used directly by this crate.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    /// GPIO HV mux control register, bit 4 holds the interrupt polarity (0x0030)
    GpioHvMuxCtrl = 0x0030,
    /// GPIO TIO HV status register, bit 0 holds the interrupt line (0x0031)
    GpioTioHvStatus = 0x0031,
    /// Firmware system status register, bit 0 set once booted (0x00E5)
    FirmwareSystemStatus = 0x00E5,
    /// Identification model ID register (0x010F)
    IdentificationModelId = 0x010F,
}

impl From<Register> for u16 {
    fn from(r: Register) -> Self {
        r as u16
    }
}

/// Firmware tuning parameters this crate configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TuningParameter {
    /// Minimum return count rate in short mode (16.16 Mcps)
    LiteShortMinCountRateRtnMcps,
    /// Minimum return count rate in medium mode (16.16 Mcps)
    LiteMedMinCountRateRtnMcps,
    /// Minimum return count rate in long mode (16.16 Mcps)
    LiteLongMinCountRateRtnMcps,
    /// Histogram sigma threshold (16.16 mm)
    HistSigmaThreshMm,
    /// Target ordering
    HistTargetOrder,
    /// Reset merge threshold
    ResetMergeThreshold,
    /// Histogram merge enable
    HistMerge,
    /// Histogram noise threshold
    HistNoiseThreshold,
    /// Histogram merge max size
    HistMergeMaxSize,
}

impl TuningParameter {
    /// The signal rate key for `mode`.
    #[must_use]
    pub fn min_count_rate_for(mode: DistanceMode) -> Self {
        match mode {
            DistanceMode::Short => TuningParameter::LiteShortMinCountRateRtnMcps,
            DistanceMode::Medium => TuningParameter::LiteMedMinCountRateRtnMcps,
            DistanceMode::Long => TuningParameter::LiteLongMinCountRateRtnMcps,
        }
    }
}

/// Unsigned 16.16 fixed-point value as used by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixPoint1616(pub u32);

impl FixPoint1616 {
    const ONE: f32 = 65536.0;

    /// Converts from floating point, saturating at the type's range.
    #[must_use]
    pub fn from_f32(value: f32) -> Self {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        Self((value * Self::ONE) as u32)
    }

    /// Converts to floating point.
    #[must_use]
    pub fn to_f32(self) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let raw = self.0 as f32;
        raw / Self::ONE
    }

    /// Raw value as the signed integer tuning parameters take.
    #[must_use]
    pub fn to_tuning_value(self) -> i32 {
        i32::try_from(self.0).unwrap_or(i32::MAX)
    }
}

/// Per-target quality code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RangeStatus {
    /// Valid range (0)
    RangeValid,
    /// Sigma above threshold (1)
    SigmaFail,
    /// Signal below threshold (2)
    SignalFail,
    /// Valid but clipped to minimum range (3)
    RangeValidMinRangeClipped,
    /// Phase out of bounds (4)
    OutOfBoundsFail,
    /// Hardware or VCSEL failure (5)
    HardwareFail,
    /// Valid, but no wrap-around check was possible (6)
    RangeValidNoWrapCheckFail,
    /// Wrap-around target detected (7)
    WrapTargetFail,
    /// Processing failure (8)
    ProcessingFail,
    /// Crosstalk signal failure (9)
    XtalkSignalFail,
    /// Synchronisation frame (10)
    SynchronisationInt,
    /// Valid, several targets merged into one pulse (11)
    RangeValidMergedPulse,
    /// Target present but signal too weak to range (12)
    TargetPresentLackOfSignal,
    /// Minimum range failure (13)
    MinRangeFail,
    /// Invalid range (14)
    RangeInvalid,
    /// No target in this slot (255)
    None,
    /// Any other code
    Unknown(u8),
}

impl From<u8> for RangeStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => RangeStatus::RangeValid,
            1 => RangeStatus::SigmaFail,
            2 => RangeStatus::SignalFail,
            3 => RangeStatus::RangeValidMinRangeClipped,
            4 => RangeStatus::OutOfBoundsFail,
            5 => RangeStatus::HardwareFail,
            6 => RangeStatus::RangeValidNoWrapCheckFail,
            7 => RangeStatus::WrapTargetFail,
            8 => RangeStatus::ProcessingFail,
            9 => RangeStatus::XtalkSignalFail,
            10 => RangeStatus::SynchronisationInt,
            11 => RangeStatus::RangeValidMergedPulse,
            12 => RangeStatus::TargetPresentLackOfSignal,
            13 => RangeStatus::MinRangeFail,
            14 => RangeStatus::RangeInvalid,
            255 => RangeStatus::None,
            _ => RangeStatus::Unknown(value),
        }
    }
}

impl From<RangeStatus> for u8 {
    fn from(status: RangeStatus) -> Self {
        match status {
            RangeStatus::RangeValid => 0,
            RangeStatus::SigmaFail => 1,
            RangeStatus::SignalFail => 2,
            RangeStatus::RangeValidMinRangeClipped => 3,
            RangeStatus::OutOfBoundsFail => 4,
            RangeStatus::HardwareFail => 5,
            RangeStatus::RangeValidNoWrapCheckFail => 6,
            RangeStatus::WrapTargetFail => 7,
            RangeStatus::ProcessingFail => 8,
            RangeStatus::XtalkSignalFail => 9,
            RangeStatus::SynchronisationInt => 10,
            RangeStatus::RangeValidMergedPulse => 11,
            RangeStatus::TargetPresentLackOfSignal => 12,
            RangeStatus::MinRangeFail => 13,
            RangeStatus::RangeInvalid => 14,
            RangeStatus::None => 255,
            RangeStatus::Unknown(value) => value,
        }
    }
}

/// One target's result within a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TargetReading {
    /// Measured distance in millimeters
    pub range_mm: i16,
    /// Quality code for this target
    pub range_status: RangeStatus,
    /// Return signal rate, 16.16 Mcps
    pub signal_rate_mcps: FixPoint1616,
    /// Estimated standard deviation, 16.16 mm
    pub sigma_mm: FixPoint1616,
    /// Lower bound of the valid range in millimeters
    pub range_min_mm: i16,
    /// Upper bound of the valid range in millimeters
    pub range_max_mm: i16,
}

impl Default for TargetReading {
    fn default() -> Self {
        Self {
            range_mm: 0,
            range_status: RangeStatus::None,
            signal_rate_mcps: FixPoint1616::default(),
            sigma_mm: FixPoint1616::default(),
            range_min_mm: 0,
            range_max_mm: 0,
        }
    }
}

/// One multi-target ranging result.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RangingFrame {
    /// Rolling frame counter: 0-255 once, then 128-255
    pub stream_count: u8,
    /// Number of valid entries in `targets`
    pub object_count: u8,
    /// Per-slot target data
    pub targets: [TargetReading; MAX_TARGETS],
    /// Crosstalk compensation changed for this frame
    pub xtalk_changed: bool,
}

impl RangingFrame {
    /// The target slots that carry a reading this frame.
    pub fn detected(&self) -> &[TargetReading] {
        let count = usize::from(self.object_count).min(MAX_TARGETS);
        &self.targets[..count]
    }
}

/// Operations provided by the vendor ranging firmware.
///
/// Every method gets the register bus it must use; the implementation keeps
/// whatever per-device state the firmware needs. A non-`Ok` result carries
/// the firmware's [`Status`].
#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), keep_self),
    async(feature = "async", keep_self)
)]
#[allow(async_fn_in_trait)]
pub trait RangingFirmware {
    /// Fixed-layout calibration blob produced and consumed by the firmware.
    type Calibration: Clone;

    /// Waits until the firmware reports it has booted.
    async fn boot_wait<B: RegisterBus>(&mut self, bus: &mut B) -> Result<(), Status> {
        bus.wait_until(Register::FirmwareSystemStatus, 0x01, 0x01, BOOT_TIMEOUT_MS, 1)
            .await
            .map_err(Status::from)
    }

    /// Reads the model identification word.
    async fn model_id<B: RegisterBus>(&mut self, bus: &mut B) -> Result<u16, Status> {
        bus.read_word(Register::IdentificationModelId)
            .await
            .map_err(Status::from)
    }

    /// One-time device data initialisation.
    async fn data_init<B: RegisterBus>(&mut self, bus: &mut B) -> Result<(), Status>;

    /// Selects the distance mode.
    async fn set_distance_mode<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        mode: DistanceMode,
    ) -> Result<(), Status>;

    /// Sets the measurement timing budget.
    async fn set_timing_budget_us<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        budget_us: u32,
    ) -> Result<(), Status>;

    /// Selects how offset calibration data is applied.
    async fn set_offset_correction_mode<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        mode: OffsetCorrectionMode,
    ) -> Result<(), Status>;

    /// Writes a tuning parameter.
    async fn set_tuning_parameter<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        key: TuningParameter,
        value: i32,
    ) -> Result<(), Status>;

    /// Restricts ranging to a region of interest.
    async fn set_user_roi<B: RegisterBus>(&mut self, bus: &mut B, roi: Roi)
        -> Result<(), Status>;

    /// Sets the inter-measurement period.
    async fn set_inter_measurement_period_ms<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        period_ms: u32,
    ) -> Result<(), Status>;

    /// Selects the smudge correction mode.
    async fn set_smudge_correction<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        mode: SmudgeCorrectionMode,
    ) -> Result<(), Status>;

    /// Enables or disables crosstalk compensation.
    async fn set_xtalk_compensation<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        enable: bool,
    ) -> Result<(), Status>;

    /// Starts continuous ranging.
    async fn start_measurement<B: RegisterBus>(&mut self, bus: &mut B) -> Result<(), Status>;

    /// Stops ranging.
    async fn stop_measurement<B: RegisterBus>(&mut self, bus: &mut B) -> Result<(), Status>;

    /// Clears the interrupt and primes the next frame.
    async fn clear_and_restart<B: RegisterBus>(&mut self, bus: &mut B) -> Result<(), Status>;

    /// Returns `true` when a new frame is waiting.
    ///
    /// The interrupt line is active when its level equals the inverse of the
    /// configured polarity bit.
    async fn get_data_ready<B: RegisterBus>(&mut self, bus: &mut B) -> Result<bool, Status> {
        let polarity = bus
            .read_byte(Register::GpioHvMuxCtrl)
            .await
            .map_err(Status::from)?;
        let active_level = u8::from(polarity & 0x10 == 0);
        let level = bus
            .read_byte(Register::GpioTioHvStatus)
            .await
            .map_err(Status::from)?;
        Ok(level & 0x01 == active_level)
    }

    /// Fetches the pending multi-target frame.
    async fn get_multi_ranging_data<B: RegisterBus>(
        &mut self,
        bus: &mut B,
    ) -> Result<RangingFrame, Status>;

    /// Reads the current calibration blob out of the device.
    async fn get_calibration_data<B: RegisterBus>(
        &mut self,
        bus: &mut B,
    ) -> Result<Self::Calibration, Status>;

    /// Replays a calibration blob into the device.
    async fn set_calibration_data<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        data: &Self::Calibration,
    ) -> Result<(), Status>;

    /// Reference SPAD management.
    async fn perform_ref_spad_management<B: RegisterBus>(
        &mut self,
        bus: &mut B,
    ) -> Result<(), Status>;

    /// Crosstalk calibration against a target at the reference distance.
    async fn perform_xtalk_calibration<B: RegisterBus>(&mut self, bus: &mut B)
        -> Result<(), Status>;

    /// Per-VCSEL offset calibration against a target at `target_distance_mm`.
    async fn perform_offset_per_vcsel_calibration<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        target_distance_mm: u16,
    ) -> Result<(), Status>;

    /// Offset calibration with a target touching the cover glass.
    async fn perform_offset_zero_distance_calibration<B: RegisterBus>(
        &mut self,
        bus: &mut B,
    ) -> Result<(), Status>;
}

#[cfg(all(test, not(feature = "async")))]
pub(crate) mod testing {
    //! Scripted firmware and bus fakes shared by the engine and session tests.

    use std::collections::VecDeque;
    use std::vec::Vec;

    use super::*;
    use crate::Error;

    /// In-memory register bus that records every delay.
    #[derive(Default)]
    pub struct FakeBus {
        pub delays: Vec<u32>,
        pub us_delays: Vec<u32>,
        pub registers: std::collections::BTreeMap<u16, u8>,
    }

    impl RegisterBus for FakeBus {
        type BusError = ();

        fn read(&mut self, index: u16, data: &mut [u8]) -> Result<(), Error<()>> {
            for (i, byte) in data.iter_mut().enumerate() {
                let offset = u16::try_from(i).map_err(|_| Error::InvalidArgument)?;
                *byte = self
                    .registers
                    .get(&index.wrapping_add(offset))
                    .copied()
                    .unwrap_or(0);
            }
            Ok(())
        }

        fn write(&mut self, index: u16, data: &[u8]) -> Result<(), Error<()>> {
            for (i, byte) in data.iter().enumerate() {
                let offset = u16::try_from(i).map_err(|_| Error::InvalidArgument)?;
                self.registers.insert(index.wrapping_add(offset), *byte);
            }
            Ok(())
        }

        fn delay_ms(&mut self, ms: u32) {
            self.delays.push(ms);
        }

        fn delay_us(&mut self, us: u32) {
            self.us_delays.push(us);
        }
    }

    /// Calls observed by [`FakeFirmware`].
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum Call {
        DataInit,
        SetCalibration(u8),
        GetCalibration,
        DistanceMode(DistanceMode),
        TimingBudget(u32),
        OffsetMode(OffsetCorrectionMode),
        Tuning(TuningParameter, i32),
        Roi(Roi),
        Period(u32),
        Smudge(SmudgeCorrectionMode),
        Xtalk(bool),
        Start,
        Stop,
        ClearAndRestart,
        Fetch,
        RefSpad,
        XtalkCalibration,
        OffsetCalibration(u16),
        ZeroDistanceCalibration,
    }

    /// Firmware whose answers are scripted per call.
    #[derive(Default)]
    pub struct FakeFirmware {
        pub calls: Vec<Call>,
        pub ready: VecDeque<bool>,
        pub frames: VecDeque<Result<RangingFrame, Status>>,
        pub calibration_result: Option<Status>,
        pub calibration_blob: u8,
        /// Calls that answer `ControlInterface`, matched by variant only.
        pub failing: Vec<Call>,
    }

    impl FakeFirmware {
        /// Firmware on which every call shaped like one of `calls` fails.
        pub fn failing(calls: &[Call]) -> Self {
            Self {
                failing: calls.to_vec(),
                ..Self::default()
            }
        }

        pub fn count(&self, call: Call) -> usize {
            self.calls.iter().filter(|c| **c == call).count()
        }

        fn record(&mut self, call: Call) -> Result<(), Status> {
            self.calls.push(call);
            let variant = core::mem::discriminant(&call);
            if self
                .failing
                .iter()
                .any(|failing| core::mem::discriminant(failing) == variant)
            {
                Err(Status::ControlInterface)
            } else {
                Ok(())
            }
        }

        fn calibration_outcome(&self) -> Result<(), Status> {
            match self.calibration_result {
                Some(status) => Err(status),
                None => Ok(()),
            }
        }
    }

    impl RangingFirmware for FakeFirmware {
        type Calibration = u8;

        fn boot_wait<B: RegisterBus>(&mut self, _bus: &mut B) -> Result<(), Status> {
            Ok(())
        }

        fn model_id<B: RegisterBus>(&mut self, _bus: &mut B) -> Result<u16, Status> {
            Ok(0xEAAA)
        }

        fn data_init<B: RegisterBus>(&mut self, _bus: &mut B) -> Result<(), Status> {
            self.record(Call::DataInit)
        }

        fn set_distance_mode<B: RegisterBus>(
            &mut self,
            _bus: &mut B,
            mode: DistanceMode,
        ) -> Result<(), Status> {
            self.record(Call::DistanceMode(mode))
        }

        fn set_timing_budget_us<B: RegisterBus>(
            &mut self,
            _bus: &mut B,
            budget_us: u32,
        ) -> Result<(), Status> {
            self.record(Call::TimingBudget(budget_us))
        }

        fn set_offset_correction_mode<B: RegisterBus>(
            &mut self,
            _bus: &mut B,
            mode: OffsetCorrectionMode,
        ) -> Result<(), Status> {
            self.record(Call::OffsetMode(mode))
        }

        fn set_tuning_parameter<B: RegisterBus>(
            &mut self,
            _bus: &mut B,
            key: TuningParameter,
            value: i32,
        ) -> Result<(), Status> {
            self.record(Call::Tuning(key, value))
        }

        fn set_user_roi<B: RegisterBus>(&mut self, _bus: &mut B, roi: Roi) -> Result<(), Status> {
            self.record(Call::Roi(roi))
        }

        fn set_inter_measurement_period_ms<B: RegisterBus>(
            &mut self,
            _bus: &mut B,
            period_ms: u32,
        ) -> Result<(), Status> {
            self.record(Call::Period(period_ms))
        }

        fn set_smudge_correction<B: RegisterBus>(
            &mut self,
            _bus: &mut B,
            mode: SmudgeCorrectionMode,
        ) -> Result<(), Status> {
            self.record(Call::Smudge(mode))
        }

        fn set_xtalk_compensation<B: RegisterBus>(
            &mut self,
            _bus: &mut B,
            enable: bool,
        ) -> Result<(), Status> {
            self.record(Call::Xtalk(enable))
        }

        fn start_measurement<B: RegisterBus>(&mut self, _bus: &mut B) -> Result<(), Status> {
            self.record(Call::Start)
        }

        fn stop_measurement<B: RegisterBus>(&mut self, _bus: &mut B) -> Result<(), Status> {
            self.record(Call::Stop)
        }

        fn clear_and_restart<B: RegisterBus>(&mut self, _bus: &mut B) -> Result<(), Status> {
            self.record(Call::ClearAndRestart)
        }

        fn get_data_ready<B: RegisterBus>(&mut self, _bus: &mut B) -> Result<bool, Status> {
            Ok(self.ready.pop_front().unwrap_or(true))
        }

        fn get_multi_ranging_data<B: RegisterBus>(
            &mut self,
            _bus: &mut B,
        ) -> Result<RangingFrame, Status> {
            self.calls.push(Call::Fetch);
            self.frames.pop_front().unwrap_or(Err(Status::TimeOut))
        }

        fn get_calibration_data<B: RegisterBus>(&mut self, _bus: &mut B) -> Result<u8, Status> {
            self.record(Call::GetCalibration)?;
            Ok(self.calibration_blob)
        }

        fn set_calibration_data<B: RegisterBus>(
            &mut self,
            _bus: &mut B,
            data: &u8,
        ) -> Result<(), Status> {
            self.record(Call::SetCalibration(*data))
        }

        fn perform_ref_spad_management<B: RegisterBus>(
            &mut self,
            _bus: &mut B,
        ) -> Result<(), Status> {
            self.calls.push(Call::RefSpad);
            self.calibration_outcome()
        }

        fn perform_xtalk_calibration<B: RegisterBus>(&mut self, _bus: &mut B) -> Result<(), Status> {
            self.calls.push(Call::XtalkCalibration);
            self.calibration_outcome()
        }

        fn perform_offset_per_vcsel_calibration<B: RegisterBus>(
            &mut self,
            _bus: &mut B,
            target_distance_mm: u16,
        ) -> Result<(), Status> {
            self.calls.push(Call::OffsetCalibration(target_distance_mm));
            self.calibration_outcome()
        }

        fn perform_offset_zero_distance_calibration<B: RegisterBus>(
            &mut self,
            _bus: &mut B,
        ) -> Result<(), Status> {
            self.calls.push(Call::ZeroDistanceCalibration);
            self.calibration_outcome()
        }
    }

    /// Frame with one target per `(distance, status)` pair.
    pub fn frame(stream_count: u8, targets: &[(i16, RangeStatus)]) -> RangingFrame {
        let mut frame = RangingFrame {
            stream_count,
            object_count: u8::try_from(targets.len()).unwrap(),
            ..RangingFrame::default()
        };
        for (slot, &(range_mm, range_status)) in frame.targets.iter_mut().zip(targets) {
            slot.range_mm = range_mm;
            slot.range_status = range_status;
        }
        frame
    }
}
