//! Per-target publish decisions for a fetched frame.

use crate::firmware::{RangeStatus, RangingFrame, TargetReading, MAX_TARGETS};

/// What to do with one target slot.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotReading {
    /// Beyond the frame's object count; the previous value is left alone
    Empty,
    /// Publishable distance
    Publish {
        /// Distance in meters
        meters: f32,
        /// Raw target data
        reading: TargetReading,
    },
    /// Target reported, but its status rules out publishing
    Withheld(TargetReading),
}

impl SlotReading {
    /// Distance to publish, if any.
    pub fn meters(&self) -> Option<f32> {
        match self {
            SlotReading::Publish { meters, .. } => Some(*meters),
            SlotReading::Empty | SlotReading::Withheld(_) => None,
        }
    }
}

/// Classified frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Classification {
    /// One decision per target slot
    pub slots: [SlotReading; MAX_TARGETS],
    /// Slot 0 distance when its status is exactly `RangeValid`
    pub primary_mm: Option<i16>,
    /// Crosstalk compensation changed this frame
    pub xtalk_changed: bool,
}

/// `true` for statuses whose distance may be published.
pub fn is_publishable(status: RangeStatus) -> bool {
    matches!(
        status,
        RangeStatus::RangeValid | RangeStatus::RangeValidMergedPulse
    )
}

fn report(slot: usize, target: &TargetReading) {
    match target.range_status {
        RangeStatus::RangeValid => {
            debug!("Target {}: valid, {} mm", slot, target.range_mm);
        }
        RangeStatus::RangeValidMergedPulse => {
            warn!("Target {}: multiple targets merged, {} mm", slot, target.range_mm);
        }
        RangeStatus::None => {
            debug!("Target {}: no target detected", slot);
        }
        RangeStatus::SignalFail => {
            warn!(
                "Target {}: signal too weak ({} raw Mcps)",
                slot,
                target.signal_rate_mcps.0
            );
        }
        RangeStatus::SigmaFail => {
            warn!("Target {}: sigma too high ({} raw mm)", slot, target.sigma_mm.0);
        }
        RangeStatus::OutOfBoundsFail => {
            warn!("Target {}: out of bounds", slot);
        }
        RangeStatus::HardwareFail => {
            error!("Target {}: hardware or VCSEL failure", slot);
        }
        RangeStatus::TargetPresentLackOfSignal => {
            warn!("Target {}: target present but signal too weak", slot);
        }
        RangeStatus::SynchronisationInt => {
            debug!("Target {}: synchronisation frame, ignored", slot);
        }
        RangeStatus::RangeValidNoWrapCheckFail => {
            warn!("Target {}: no wrap-around check, expected only on the first frame", slot);
        }
        RangeStatus::WrapTargetFail => {
            warn!("Target {}: wrap-around target", slot);
        }
        other => {
            warn!("Target {}: rejected with status {}", slot, u8::from(other));
        }
    }
}

/// Maps every target slot of `frame` to a publish decision.
pub fn classify(frame: &RangingFrame) -> Classification {
    let mut slots = [SlotReading::Empty; MAX_TARGETS];
    for (slot, (decision, target)) in slots.iter_mut().zip(frame.detected()).enumerate() {
        trace!(
            "Target {}: {} mm, status {}, range {}..{} mm",
            slot,
            target.range_mm,
            u8::from(target.range_status),
            target.range_min_mm,
            target.range_max_mm
        );
        report(slot, target);
        *decision = if is_publishable(target.range_status) {
            SlotReading::Publish {
                meters: f32::from(target.range_mm) / 1000.0,
                reading: *target,
            }
        } else {
            SlotReading::Withheld(*target)
        };
    }

    let primary_mm = frame
        .detected()
        .first()
        .filter(|target| target.range_status == RangeStatus::RangeValid)
        .map(|target| target.range_mm);

    if frame.xtalk_changed {
        debug!("Crosstalk compensation applied");
    }

    Classification {
        slots,
        primary_mm,
        xtalk_changed: frame.xtalk_changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::FixPoint1616;

    fn frame(targets: &[(i16, RangeStatus)]) -> RangingFrame {
        let mut frame = RangingFrame {
            stream_count: 140,
            object_count: targets.len() as u8,
            ..RangingFrame::default()
        };
        for (slot, &(range_mm, range_status)) in frame.targets.iter_mut().zip(targets) {
            slot.range_mm = range_mm;
            slot.range_status = range_status;
            slot.signal_rate_mcps = FixPoint1616::from_f32(2.5);
        }
        frame
    }

    #[test]
    fn valid_and_merged_targets_publish_meters() {
        let result = classify(&frame(&[
            (1234, RangeStatus::RangeValid),
            (2500, RangeStatus::RangeValidMergedPulse),
        ]));
        assert_eq!(result.slots[0].meters(), Some(1.234));
        assert_eq!(result.slots[1].meters(), Some(2.5));
        assert_eq!(result.slots[2], SlotReading::Empty);
        assert_eq!(result.slots[3], SlotReading::Empty);
        assert_eq!(result.primary_mm, Some(1234));
    }

    #[test]
    fn quality_failures_are_withheld() {
        for code in [1u8, 2, 4, 5, 6, 7, 10, 12, 13, 255, 99] {
            let result = classify(&frame(&[(800, RangeStatus::from(code))]));
            assert!(
                matches!(result.slots[0], SlotReading::Withheld(_)),
                "status {code}"
            );
            assert_eq!(result.slots[0].meters(), None);
            assert_eq!(result.primary_mm, None);
        }
    }

    #[test]
    fn slots_beyond_object_count_stay_empty() {
        let mut raw = frame(&[(300, RangeStatus::RangeValid)]);
        raw.targets[1].range_mm = 900;
        raw.targets[1].range_status = RangeStatus::RangeValid;

        let result = classify(&raw);
        assert_eq!(result.slots[1], SlotReading::Empty);
    }

    #[test]
    fn merged_primary_does_not_update_last_distance() {
        let result = classify(&frame(&[(700, RangeStatus::RangeValidMergedPulse)]));
        assert_eq!(result.slots[0].meters(), Some(0.7));
        assert_eq!(result.primary_mm, None);
    }

    #[test]
    fn crosstalk_flag_is_passed_through() {
        let mut raw = frame(&[]);
        raw.xtalk_changed = true;
        let result = classify(&raw);
        assert!(result.xtalk_changed);
        assert!(result.slots.iter().all(|slot| *slot == SlotReading::Empty));
    }
}
