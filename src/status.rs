//! Result codes reported by the ranging firmware.
//!
//! The firmware reports every operation outcome as a signed byte: zero for
//! success, a negative value for an error or warning. Success is represented
//! by `Ok(..)` on the Rust side, so [`Status`] only enumerates the non-zero
//! codes. [`Status::kind`] groups them the way the acquisition engine and
//! the calibration routines react to them.

/// Non-success status code returned by the ranging firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// A calibration completed with a generic warning (-1)
    CalibrationWarning,
    /// A value was clipped to its minimum (-2)
    MinClipped,
    /// Undefined error (-3)
    Undefined,
    /// Invalid parameters were supplied (-4)
    InvalidParams,
    /// The function is not supported in the current mode (-5)
    NotSupported,
    /// The device reported a ranging error (-6)
    RangeError,
    /// A polling or ranging timeout elapsed (-7)
    TimeOut,
    /// The requested mode is not supported (-8)
    ModeNotSupported,
    /// A supplied buffer was too small (-9)
    BufferTooSmall,
    /// The communications buffer was too small (-10)
    CommsBufferTooSmall,
    /// The requested GPIO does not exist (-11)
    GpioNotExisting,
    /// The requested GPIO functionality is not supported (-12)
    GpioFunctionalityNotSupported,
    /// The bus or control interface failed (-13)
    ControlInterface,
    /// An invalid command was issued (-14)
    InvalidCommand,
    /// Division by zero in the firmware's arithmetic (-15)
    DivisionByZero,
    /// Reference SPAD initialisation failed (-16)
    RefSpadInit,
    /// Grouped parameter hold sync check failed (-17)
    GphSyncCheckFail,
    /// Result stream count check failed (-18)
    StreamCountCheckFail,
    /// Grouped parameter hold ID check failed (-19)
    GphIdCheckFail,
    /// Zone stream count check failed (-20)
    ZoneStreamCountCheckFail,
    /// Zone grouped parameter hold ID check failed (-21)
    ZoneGphIdCheckFail,
    /// Crosstalk extraction collected no samples (-22)
    XtalkExtractionNoSampleFail,
    /// Crosstalk extraction exceeded the sigma limit (-23)
    XtalkExtractionSigmaLimitFail,
    /// Offset calibration collected no samples (-24)
    OffsetCalNoSampleFail,
    /// Offset calibration found no enabled SPADs (-25)
    OffsetCalNoSpadsEnabledFail,
    /// Zone calibration collected no samples (-26)
    ZoneCalNoSampleFail,
    /// Tuning parameter key mismatch (-27)
    TuningParmKeyMismatch,
    /// Reference SPAD characterisation found fewer than five good SPADs (-28)
    WarningRefSpadCharNotEnoughSpads,
    /// Reference rate above 40 Mcps (-29)
    WarningRefSpadCharRateTooHigh,
    /// Reference rate below 10 Mcps (-30)
    WarningRefSpadCharRateTooLow,
    /// Offset calibration missed samples (-31)
    WarningOffsetCalMissingSamples,
    /// Offset calibration sigma too high (-32)
    WarningOffsetCalSigmaTooHigh,
    /// Offset calibration signal rate too high (-33)
    WarningOffsetCalRateTooHigh,
    /// Offset calibration SPAD count too low (-34)
    WarningOffsetCalSpadCountTooLow,
    /// Zone calibration missed samples (-35)
    WarningZoneCalMissingSamples,
    /// Zone calibration sigma too high (-36)
    WarningZoneCalSigmaTooHigh,
    /// Zone calibration signal rate too high (-37)
    WarningZoneCalRateTooHigh,
    /// Crosstalk gradient had no samples (-38)
    WarningXtalkNoSamplesForGradient,
    /// Crosstalk gradient hit the sigma limit (-39)
    WarningXtalkSigmaLimitForGradient,
    /// Crosstalk calibration missed samples (-40)
    WarningXtalkMissingSamples,
    /// The function is not implemented (-41)
    NotImplemented,
    /// First platform specific code (-42)
    PlatformSpecificStart,
    /// Any code outside the documented range
    Unknown(i8),
}

/// How the acquisition engine and calibration routines react to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultKind {
    /// Ranging timed out; retried with an escalating delay.
    Timeout,
    /// The device reported a range error; retried after a fixed delay.
    Range,
    /// Stream or zone sync mismatch; recovered by restarting ranging.
    Synchronization,
    /// Bus failure; retried with escalating backoff.
    ControlInterface,
    /// Non-fatal calibration warning.
    CalibrationWarning,
    /// Anything else.
    Other,
}

impl Status {
    /// Returns how this status should be handled.
    #[must_use]
    pub fn kind(self) -> FaultKind {
        match self {
            Status::TimeOut => FaultKind::Timeout,
            Status::RangeError => FaultKind::Range,
            Status::GphSyncCheckFail
            | Status::StreamCountCheckFail
            | Status::ZoneStreamCountCheckFail => FaultKind::Synchronization,
            Status::ControlInterface => FaultKind::ControlInterface,
            Status::CalibrationWarning
            | Status::WarningRefSpadCharNotEnoughSpads
            | Status::WarningRefSpadCharRateTooHigh
            | Status::WarningRefSpadCharRateTooLow
            | Status::WarningOffsetCalMissingSamples
            | Status::WarningOffsetCalSigmaTooHigh
            | Status::WarningOffsetCalRateTooHigh
            | Status::WarningOffsetCalSpadCountTooLow
            | Status::WarningZoneCalMissingSamples
            | Status::WarningZoneCalSigmaTooHigh
            | Status::WarningZoneCalRateTooHigh
            | Status::WarningXtalkNoSamplesForGradient
            | Status::WarningXtalkSigmaLimitForGradient
            | Status::WarningXtalkMissingSamples => FaultKind::CalibrationWarning,
            _ => FaultKind::Other,
        }
    }

    /// Returns the firmware's name for this status code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Status::CalibrationWarning => "CALIBRATION_WARNING",
            Status::MinClipped => "MIN_CLIPPED",
            Status::Undefined => "UNDEFINED",
            Status::InvalidParams => "INVALID_PARAMS",
            Status::NotSupported => "NOT_SUPPORTED",
            Status::RangeError => "RANGE_ERROR",
            Status::TimeOut => "TIME_OUT",
            Status::ModeNotSupported => "MODE_NOT_SUPPORTED",
            Status::BufferTooSmall => "BUFFER_TOO_SMALL",
            Status::CommsBufferTooSmall => "COMMS_BUFFER_TOO_SMALL",
            Status::GpioNotExisting => "GPIO_NOT_EXISTING",
            Status::GpioFunctionalityNotSupported => "GPIO_FUNCTIONALITY_NOT_SUPPORTED",
            Status::ControlInterface => "CONTROL_INTERFACE",
            Status::InvalidCommand => "INVALID_COMMAND",
            Status::DivisionByZero => "DIVISION_BY_ZERO",
            Status::RefSpadInit => "REF_SPAD_INIT",
            Status::GphSyncCheckFail => "GPH_SYNC_CHECK_FAIL",
            Status::StreamCountCheckFail => "STREAM_COUNT_CHECK_FAIL",
            Status::GphIdCheckFail => "GPH_ID_CHECK_FAIL",
            Status::ZoneStreamCountCheckFail => "ZONE_STREAM_COUNT_CHECK_FAIL",
            Status::ZoneGphIdCheckFail => "ZONE_GPH_ID_CHECK_FAIL",
            Status::XtalkExtractionNoSampleFail => "XTALK_EXTRACTION_NO_SAMPLE_FAIL",
            Status::XtalkExtractionSigmaLimitFail => "XTALK_EXTRACTION_SIGMA_LIMIT_FAIL",
            Status::OffsetCalNoSampleFail => "OFFSET_CAL_NO_SAMPLE_FAIL",
            Status::OffsetCalNoSpadsEnabledFail => "OFFSET_CAL_NO_SPADS_ENABLED_FAIL",
            Status::ZoneCalNoSampleFail => "ZONE_CAL_NO_SAMPLE_FAIL",
            Status::TuningParmKeyMismatch => "TUNING_PARM_KEY_MISMATCH",
            Status::WarningRefSpadCharNotEnoughSpads => "WARNING_REF_SPAD_CHAR_NOT_ENOUGH_SPADS",
            Status::WarningRefSpadCharRateTooHigh => "WARNING_REF_SPAD_CHAR_RATE_TOO_HIGH",
            Status::WarningRefSpadCharRateTooLow => "WARNING_REF_SPAD_CHAR_RATE_TOO_LOW",
            Status::WarningOffsetCalMissingSamples => "WARNING_OFFSET_CAL_MISSING_SAMPLES",
            Status::WarningOffsetCalSigmaTooHigh => "WARNING_OFFSET_CAL_SIGMA_TOO_HIGH",
            Status::WarningOffsetCalRateTooHigh => "WARNING_OFFSET_CAL_RATE_TOO_HIGH",
            Status::WarningOffsetCalSpadCountTooLow => "WARNING_OFFSET_CAL_SPAD_COUNT_TOO_LOW",
            Status::WarningZoneCalMissingSamples => "WARNING_ZONE_CAL_MISSING_SAMPLES",
            Status::WarningZoneCalSigmaTooHigh => "WARNING_ZONE_CAL_SIGMA_TOO_HIGH",
            Status::WarningZoneCalRateTooHigh => "WARNING_ZONE_CAL_RATE_TOO_HIGH",
            Status::WarningXtalkNoSamplesForGradient => "WARNING_XTALK_NO_SAMPLES_FOR_GRADIENT",
            Status::WarningXtalkSigmaLimitForGradient => "WARNING_XTALK_SIGMA_LIMIT_FOR_GRADIENT",
            Status::WarningXtalkMissingSamples => "WARNING_XTALK_MISSING_SAMPLES",
            Status::NotImplemented => "NOT_IMPLEMENTED",
            Status::PlatformSpecificStart => "PLATFORM_SPECIFIC_START",
            Status::Unknown(_) => "UNKNOWN",
        }
    }

    /// Converts a raw firmware code into a `Result`, mapping zero to `Ok`.
    ///
    /// # Errors
    ///
    /// Returns the decoded [`Status`] for any non-zero code.
    pub fn check(code: i8) -> Result<(), Status> {
        if code == 0 {
            Ok(())
        } else {
            Err(Status::from(code))
        }
    }
}

impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})", i8::from(*self), self.as_str())
    }
}

impl From<Status> for i8 {
    fn from(status: Status) -> Self {
        match status {
            Status::CalibrationWarning => -1,
            Status::MinClipped => -2,
            Status::Undefined => -3,
            Status::InvalidParams => -4,
            Status::NotSupported => -5,
            Status::RangeError => -6,
            Status::TimeOut => -7,
            Status::ModeNotSupported => -8,
            Status::BufferTooSmall => -9,
            Status::CommsBufferTooSmall => -10,
            Status::GpioNotExisting => -11,
            Status::GpioFunctionalityNotSupported => -12,
            Status::ControlInterface => -13,
            Status::InvalidCommand => -14,
            Status::DivisionByZero => -15,
            Status::RefSpadInit => -16,
            Status::GphSyncCheckFail => -17,
            Status::StreamCountCheckFail => -18,
            Status::GphIdCheckFail => -19,
            Status::ZoneStreamCountCheckFail => -20,
            Status::ZoneGphIdCheckFail => -21,
            Status::XtalkExtractionNoSampleFail => -22,
            Status::XtalkExtractionSigmaLimitFail => -23,
            Status::OffsetCalNoSampleFail => -24,
            Status::OffsetCalNoSpadsEnabledFail => -25,
            Status::ZoneCalNoSampleFail => -26,
            Status::TuningParmKeyMismatch => -27,
            Status::WarningRefSpadCharNotEnoughSpads => -28,
            Status::WarningRefSpadCharRateTooHigh => -29,
            Status::WarningRefSpadCharRateTooLow => -30,
            Status::WarningOffsetCalMissingSamples => -31,
            Status::WarningOffsetCalSigmaTooHigh => -32,
            Status::WarningOffsetCalRateTooHigh => -33,
            Status::WarningOffsetCalSpadCountTooLow => -34,
            Status::WarningZoneCalMissingSamples => -35,
            Status::WarningZoneCalSigmaTooHigh => -36,
            Status::WarningZoneCalRateTooHigh => -37,
            Status::WarningXtalkNoSamplesForGradient => -38,
            Status::WarningXtalkSigmaLimitForGradient => -39,
            Status::WarningXtalkMissingSamples => -40,
            Status::NotImplemented => -41,
            Status::PlatformSpecificStart => -42,
            Status::Unknown(code) => code,
        }
    }
}

impl From<i8> for Status {
    fn from(code: i8) -> Self {
        match code {
            -1 => Status::CalibrationWarning,
            -2 => Status::MinClipped,
            -3 => Status::Undefined,
            -4 => Status::InvalidParams,
            -5 => Status::NotSupported,
            -6 => Status::RangeError,
            -7 => Status::TimeOut,
            -8 => Status::ModeNotSupported,
            -9 => Status::BufferTooSmall,
            -10 => Status::CommsBufferTooSmall,
            -11 => Status::GpioNotExisting,
            -12 => Status::GpioFunctionalityNotSupported,
            -13 => Status::ControlInterface,
            -14 => Status::InvalidCommand,
            -15 => Status::DivisionByZero,
            -16 => Status::RefSpadInit,
            -17 => Status::GphSyncCheckFail,
            -18 => Status::StreamCountCheckFail,
            -19 => Status::GphIdCheckFail,
            -20 => Status::ZoneStreamCountCheckFail,
            -21 => Status::ZoneGphIdCheckFail,
            -22 => Status::XtalkExtractionNoSampleFail,
            -23 => Status::XtalkExtractionSigmaLimitFail,
            -24 => Status::OffsetCalNoSampleFail,
            -25 => Status::OffsetCalNoSpadsEnabledFail,
            -26 => Status::ZoneCalNoSampleFail,
            -27 => Status::TuningParmKeyMismatch,
            -28 => Status::WarningRefSpadCharNotEnoughSpads,
            -29 => Status::WarningRefSpadCharRateTooHigh,
            -30 => Status::WarningRefSpadCharRateTooLow,
            -31 => Status::WarningOffsetCalMissingSamples,
            -32 => Status::WarningOffsetCalSigmaTooHigh,
            -33 => Status::WarningOffsetCalRateTooHigh,
            -34 => Status::WarningOffsetCalSpadCountTooLow,
            -35 => Status::WarningZoneCalMissingSamples,
            -36 => Status::WarningZoneCalSigmaTooHigh,
            -37 => Status::WarningZoneCalRateTooHigh,
            -38 => Status::WarningXtalkNoSamplesForGradient,
            -39 => Status::WarningXtalkSigmaLimitForGradient,
            -40 => Status::WarningXtalkMissingSamples,
            -41 => Status::NotImplemented,
            -42 => Status::PlatformSpecificStart,
            _ => {
                warn!("Unknown firmware status code: {}", code);
                Status::Unknown(code)
            }
        }
    }
}

impl<E: core::fmt::Debug> From<crate::Error<E>> for Status {
    fn from(error: crate::Error<E>) -> Self {
        match error {
            crate::Error::Timeout => Status::TimeOut,
            crate::Error::InvalidArgument | crate::Error::InvalidConfig(_) => Status::InvalidParams,
            crate::Error::Vendor(status) => status,
            crate::Error::I2cError(_)
            | crate::Error::PowerControl
            | crate::Error::NotInitialized
            | crate::Error::Faulted => {
                Status::ControlInterface
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_success() {
        assert_eq!(Status::check(0), Ok(()));
        assert_eq!(Status::check(-7), Err(Status::TimeOut));
    }

    #[test]
    fn fetch_faults_are_grouped() {
        assert_eq!(Status::TimeOut.kind(), FaultKind::Timeout);
        assert_eq!(Status::RangeError.kind(), FaultKind::Range);
        assert_eq!(Status::GphSyncCheckFail.kind(), FaultKind::Synchronization);
        assert_eq!(Status::StreamCountCheckFail.kind(), FaultKind::Synchronization);
        assert_eq!(Status::ZoneStreamCountCheckFail.kind(), FaultKind::Synchronization);
        assert_eq!(Status::ControlInterface.kind(), FaultKind::ControlInterface);
        assert_eq!(Status::GphIdCheckFail.kind(), FaultKind::Other);
        assert_eq!(Status::Unknown(-99).kind(), FaultKind::Other);
    }

    #[test]
    fn warnings_are_grouped() {
        for code in -40i8..=-28 {
            assert_eq!(Status::from(code).kind(), FaultKind::CalibrationWarning, "code {code}");
        }
    }

    #[test]
    fn unknown_codes_survive_conversion() {
        let status = Status::from(-100);
        assert_eq!(status, Status::Unknown(-100));
        assert_eq!(i8::from(status), -100);
        assert_eq!(status.as_str(), "UNKNOWN");
    }

    #[test]
    fn bus_errors_become_control_interface() {
        let error: crate::Error<()> = crate::Error::I2cError(());
        assert_eq!(Status::from(error), Status::ControlInterface);
        let error: crate::Error<()> = crate::Error::Timeout;
        assert_eq!(Status::from(error), Status::TimeOut);
    }
}
