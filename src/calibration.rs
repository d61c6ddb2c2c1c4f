//! Calibration kinds and calibration blob persistence.

use crate::status::Status;

/// Target distance used for per-VCSEL offset calibration.
pub const OFFSET_TARGET_DISTANCE_MM: u16 = 100;

/// Supported calibration procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationKind {
    /// Reference SPAD management, no target in front of the sensor
    RefSpad,
    /// Crosstalk, target at 600 mm in the dark
    Crosstalk,
    /// Per-VCSEL offset, target at [`OFFSET_TARGET_DISTANCE_MM`]
    Offset,
    /// Field offset, target touching the cover glass
    ZeroDistance,
}

/// Result of one calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationOutcome {
    /// Completed without warnings
    Success,
    /// Completed with a warning that still allows the data to be kept
    Warning(Status),
    /// Failed; prior calibration stays in force
    Failed(Status),
}

impl CalibrationOutcome {
    /// `true` when the resulting calibration data should be persisted.
    pub fn should_persist(&self) -> bool {
        !matches!(self, CalibrationOutcome::Failed(_))
    }
}

impl CalibrationKind {
    /// Name used in log messages.
    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationKind::RefSpad => "RefSPAD",
            CalibrationKind::Crosstalk => "Crosstalk",
            CalibrationKind::Offset => "Offset",
            CalibrationKind::ZeroDistance => "Zero-distance",
        }
    }

    /// Setup the operator must prepare before running this calibration.
    pub fn setup_hint(self) -> &'static str {
        match self {
            CalibrationKind::RefSpad => "ensure no target is in front of the sensor",
            CalibrationKind::Crosstalk => "place a target at 600 mm in a dark environment",
            CalibrationKind::Offset => {
                "place a target at 100 mm with a signal rate of 2-80 Mcps in a dark environment"
            }
            CalibrationKind::ZeroDistance => "place a target directly touching the cover glass",
        }
    }

    /// Warnings after which this calibration's data is still kept.
    pub fn tolerates(self, status: Status) -> bool {
        match self {
            CalibrationKind::RefSpad => matches!(
                status,
                Status::WarningRefSpadCharNotEnoughSpads
                    | Status::WarningRefSpadCharRateTooHigh
                    | Status::WarningRefSpadCharRateTooLow
            ),
            CalibrationKind::Crosstalk => status == Status::WarningXtalkMissingSamples,
            CalibrationKind::Offset => matches!(
                status,
                Status::WarningOffsetCalSpadCountTooLow | Status::WarningOffsetCalRateTooHigh
            ),
            CalibrationKind::ZeroDistance => false,
        }
    }

    /// Classifies the firmware's answer to this calibration.
    pub fn outcome(self, result: Result<(), Status>) -> CalibrationOutcome {
        match result {
            Ok(()) => CalibrationOutcome::Success,
            Err(status) if self.tolerates(status) => CalibrationOutcome::Warning(status),
            Err(status) => CalibrationOutcome::Failed(status),
        }
    }
}

/// Storage key of one sensor's calibration blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationKey(pub u32);

impl CalibrationKey {
    const PREFIX: u32 = 0x564C_5300;

    /// Key for the sensor at 7-bit I2C address `address`.
    pub fn for_address(address: u8) -> Self {
        Self(Self::PREFIX | u32::from(address & 0x7F))
    }
}

/// Persistent storage for calibration blobs.
pub trait CalibrationStore<C> {
    /// Returns the blob stored under `key`, if any.
    fn load(&mut self, key: CalibrationKey) -> Option<C>;

    /// Replaces the blob stored under `key`. Returns `false` when the data
    /// could not be stored.
    fn save(&mut self, key: CalibrationKey, data: &C) -> bool;
}

impl<C, S: CalibrationStore<C>> CalibrationStore<C> for &mut S {
    fn load(&mut self, key: CalibrationKey) -> Option<C> {
        (**self).load(key)
    }

    fn save(&mut self, key: CalibrationKey, data: &C) -> bool {
        (**self).save(key, data)
    }
}

/// Store that never holds anything, for hosts without persistent storage.
impl<C> CalibrationStore<C> for () {
    fn load(&mut self, _key: CalibrationKey) -> Option<C> {
        None
    }

    fn save(&mut self, _key: CalibrationKey, _data: &C) -> bool {
        warn!("No calibration storage available; calibration not saved");
        false
    }
}

/// In-RAM store with room for `N` sensors.
pub struct MemoryStore<C, const N: usize> {
    entries: [Option<(CalibrationKey, C)>; N],
}

impl<C: Clone, const N: usize> MemoryStore<C, N> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: core::array::from_fn(|_| None),
        }
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    /// `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: Clone, const N: usize> Default for MemoryStore<C, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clone, const N: usize> CalibrationStore<C> for MemoryStore<C, N> {
    fn load(&mut self, key: CalibrationKey) -> Option<C> {
        self.entries
            .iter()
            .flatten()
            .find(|(stored, _)| *stored == key)
            .map(|(_, data)| data.clone())
    }

    fn save(&mut self, key: CalibrationKey, data: &C) -> bool {
        let slot = match self
            .entries
            .iter()
            .position(|entry| matches!(entry, Some((stored, _)) if *stored == key))
        {
            Some(index) => Some(index),
            None => self.entries.iter().position(Option::is_none),
        };
        match slot {
            Some(index) => {
                self.entries[index] = Some((key, data.clone()));
                true
            }
            None => {
                warn!("Calibration store full, cannot save key {:#x}", key.0);
                false
            }
        }
    }
}
