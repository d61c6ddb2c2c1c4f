//! Session configuration.
//!
//! Everything here is supplied once when the session is built and applied
//! to the firmware during [`initialize`](crate::RangingSession::initialize).

/// Ranging distance mode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DistanceMode {
    /// Up to ~1.3 m, best ambient immunity
    Short = 1,
    /// Up to ~3 m
    Medium = 2,
    /// Up to ~4 m in the dark
    Long = 3,
}

/// Crosstalk (smudge) correction applied while ranging.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SmudgeCorrectionMode {
    /// Correction disabled
    None = 0,
    /// Correction updated continuously
    Continuous = 1,
    /// Correction computed once per start
    Single = 2,
    /// Debug mode
    Debug = 3,
}

/// Order in which detected targets are reported.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TargetOrder {
    /// Closest target first
    Distance = 1,
    /// Strongest return first
    SignalStrength = 2,
}

/// How the firmware applies offset calibration data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OffsetCorrectionMode {
    /// Single offset for all VCSEL periods
    Standard,
    /// Separate offset per VCSEL period
    PerVcsel,
}

impl From<DistanceMode> for u8 {
    fn from(mode: DistanceMode) -> Self {
        mode as u8
    }
}

impl From<SmudgeCorrectionMode> for u8 {
    fn from(mode: SmudgeCorrectionMode) -> Self {
        mode as u8
    }
}

impl From<TargetOrder> for u8 {
    fn from(order: TargetOrder) -> Self {
        order as u8
    }
}

/// Region of interest on the 16x16 SPAD array, corners inclusive.
///
/// Rows count upwards, so the top-left row is greater than or equal to the
/// bottom-right row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Roi {
    /// Left column (0-15)
    pub top_left_x: u8,
    /// Top row (0-15, 15 is the top edge)
    pub top_left_y: u8,
    /// Right column (0-15)
    pub bottom_right_x: u8,
    /// Bottom row (0-15)
    pub bottom_right_y: u8,
}

impl Roi {
    /// Largest valid SPAD coordinate.
    pub const MAX_COORDINATE: u8 = 15;

    /// Creates a region from its corners.
    pub fn new(top_left_x: u8, top_left_y: u8, bottom_right_x: u8, bottom_right_y: u8) -> Self {
        Self {
            top_left_x,
            top_left_y,
            bottom_right_x,
            bottom_right_y,
        }
    }
}

/// Reason a [`Config`] was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Timing budget outside 20 000..=1 000 000 µs
    TimingBudget,
    /// Signal rate limit outside 0.1..=100 Mcps
    SignalRateLimit,
    /// Sigma threshold outside 1..=1000 mm
    SigmaThreshold,
    /// Merge threshold outside 1000..=30 000
    MergeThreshold,
    /// Histogram noise threshold outside 10..=200
    HistNoiseThreshold,
    /// Histogram merge max size outside 1..=16
    HistMergeMaxSize,
    /// ROI coordinate above 15 or corners out of order
    Roi,
    /// Inter-measurement period shorter than the timing budget
    InterMeasurementPeriod,
}

/// Ranging session configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Distance mode
    pub distance_mode: DistanceMode,
    /// Measurement timing budget in microseconds
    pub timing_budget_us: u32,
    /// Minimum return signal rate in Mcps
    pub signal_rate_limit_mcps: f32,
    /// Maximum sigma in millimeters
    pub sigma_threshold_mm: f32,
    /// Explicit inter-measurement period; derived from the budget when `None`
    pub inter_measurement_period_ms: Option<u32>,
    /// Optional region of interest
    pub roi: Option<Roi>,
    /// Smudge correction mode
    pub smudge_correction: SmudgeCorrectionMode,
    /// Target ordering
    pub target_order: TargetOrder,
    /// Reset merge threshold, lower separates targets more
    pub merge_threshold: u32,
    /// Histogram merge enable
    pub hist_merge: bool,
    /// Histogram noise threshold
    pub hist_noise_threshold: u16,
    /// Histogram merge max size
    pub hist_merge_max_size: u8,
    /// Offset correction mode applied at start and after offset calibration
    pub offset_correction: OffsetCorrectionMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            distance_mode: DistanceMode::Medium,
            timing_budget_us: 33_000,
            signal_rate_limit_mcps: 0.1,
            sigma_threshold_mm: 60.0,
            inter_measurement_period_ms: None,
            roi: None,
            smudge_correction: SmudgeCorrectionMode::Continuous,
            target_order: TargetOrder::Distance,
            merge_threshold: 15_000,
            hist_merge: true,
            hist_noise_threshold: 50,
            hist_merge_max_size: 8,
            offset_correction: OffsetCorrectionMode::PerVcsel,
        }
    }
}

impl Config {
    /// Margin added to the timing budget when the period is derived.
    const DERIVED_PERIOD_MARGIN_MS: u32 = 5;

    /// Sets the distance mode.
    #[must_use]
    pub fn distance_mode(mut self, mode: DistanceMode) -> Self {
        self.distance_mode = mode;
        self
    }

    /// Sets the timing budget in microseconds.
    #[must_use]
    pub fn timing_budget_us(mut self, budget_us: u32) -> Self {
        self.timing_budget_us = budget_us;
        self
    }

    /// Sets the minimum signal rate in Mcps.
    #[must_use]
    pub fn signal_rate_limit_mcps(mut self, mcps: f32) -> Self {
        self.signal_rate_limit_mcps = mcps;
        self
    }

    /// Sets the sigma threshold in millimeters.
    #[must_use]
    pub fn sigma_threshold_mm(mut self, sigma_mm: f32) -> Self {
        self.sigma_threshold_mm = sigma_mm;
        self
    }

    /// Sets an explicit inter-measurement period.
    #[must_use]
    pub fn inter_measurement_period_ms(mut self, period_ms: u32) -> Self {
        self.inter_measurement_period_ms = Some(period_ms);
        self
    }

    /// Restricts ranging to a region of interest.
    #[must_use]
    pub fn roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    /// Sets the smudge correction mode.
    #[must_use]
    pub fn smudge_correction(mut self, mode: SmudgeCorrectionMode) -> Self {
        self.smudge_correction = mode;
        self
    }

    /// Sets the target ordering.
    #[must_use]
    pub fn target_order(mut self, order: TargetOrder) -> Self {
        self.target_order = order;
        self
    }

    /// Sets the merge threshold.
    #[must_use]
    pub fn merge_threshold(mut self, threshold: u32) -> Self {
        self.merge_threshold = threshold;
        self
    }

    /// Sets the histogram merge parameters.
    #[must_use]
    pub fn hist_merge(mut self, enabled: bool, noise_threshold: u16, max_size: u8) -> Self {
        self.hist_merge = enabled;
        self.hist_noise_threshold = noise_threshold;
        self.hist_merge_max_size = max_size;
        self
    }

    /// Sets the offset correction mode.
    #[must_use]
    pub fn offset_correction(mut self, mode: OffsetCorrectionMode) -> Self {
        self.offset_correction = mode;
        self
    }

    /// Timing budget rounded up to whole milliseconds.
    pub fn timing_budget_ms(&self) -> u32 {
        self.timing_budget_us.div_ceil(1000)
    }

    /// Period programmed into the sensor.
    ///
    /// An explicit period is raised to at least the timing budget; otherwise
    /// the budget plus a 5 ms guard interval is used.
    pub fn effective_inter_measurement_period_ms(&self) -> u32 {
        let budget_ms = self.timing_budget_us / 1000;
        match self.inter_measurement_period_ms {
            Some(period_ms) => period_ms.max(budget_ms),
            None => budget_ms + Self::DERIVED_PERIOD_MARGIN_MS,
        }
    }

    /// Checks every field against the sensor's accepted ranges.
    ///
    /// # Errors
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(20_000..=1_000_000).contains(&self.timing_budget_us) {
            error!("Invalid timing budget: {} us", self.timing_budget_us);
            return Err(ConfigError::TimingBudget);
        }
        if !(0.1..=100.0).contains(&self.signal_rate_limit_mcps) {
            error!("Invalid signal rate limit: {} Mcps", self.signal_rate_limit_mcps);
            return Err(ConfigError::SignalRateLimit);
        }
        if !(1.0..=1000.0).contains(&self.sigma_threshold_mm) {
            error!("Invalid sigma threshold: {} mm", self.sigma_threshold_mm);
            return Err(ConfigError::SigmaThreshold);
        }
        if !(1000..=30_000).contains(&self.merge_threshold) {
            error!("Invalid merge threshold: {}", self.merge_threshold);
            return Err(ConfigError::MergeThreshold);
        }
        if !(10..=200).contains(&self.hist_noise_threshold) {
            error!("Invalid histogram noise threshold: {}", self.hist_noise_threshold);
            return Err(ConfigError::HistNoiseThreshold);
        }
        if !(1..=16).contains(&self.hist_merge_max_size) {
            error!("Invalid histogram merge max size: {}", self.hist_merge_max_size);
            return Err(ConfigError::HistMergeMaxSize);
        }
        if let Some(roi) = self.roi {
            let in_range = [
                roi.top_left_x,
                roi.top_left_y,
                roi.bottom_right_x,
                roi.bottom_right_y,
            ]
            .iter()
            .all(|&c| c <= Roi::MAX_COORDINATE);
            if !in_range
                || roi.top_left_x > roi.bottom_right_x
                || roi.top_left_y < roi.bottom_right_y
            {
                error!(
                    "Invalid ROI: ({},{}) to ({},{})",
                    roi.top_left_x,
                    roi.top_left_y,
                    roi.bottom_right_x,
                    roi.bottom_right_y
                );
                return Err(ConfigError::Roi);
            }
        }
        if let Some(period_ms) = self.inter_measurement_period_ms {
            if period_ms < self.timing_budget_ms() {
                error!(
                    "Inter-measurement period {} ms is shorter than the timing budget {} ms",
                    period_ms,
                    self.timing_budget_ms()
                );
                return Err(ConfigError::InterMeasurementPeriod);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.distance_mode, DistanceMode::Medium);
        assert_eq!(config.timing_budget_us, 33_000);
        assert_eq!(config.smudge_correction, SmudgeCorrectionMode::Continuous);
    }

    #[test]
    fn derived_period_adds_guard_interval() {
        let config = Config::default();
        assert_eq!(config.effective_inter_measurement_period_ms(), 38);
    }

    #[test]
    fn explicit_period_is_kept() {
        let config = Config::default().inter_measurement_period_ms(100);
        assert_eq!(config.effective_inter_measurement_period_ms(), 100);
    }

    #[test]
    fn period_shorter_than_budget_is_rejected() {
        // 33 500 us rounds up to 34 ms
        let config = Config::default()
            .timing_budget_us(33_500)
            .inter_measurement_period_ms(33);
        assert_eq!(config.validate(), Err(ConfigError::InterMeasurementPeriod));
        let config = config.inter_measurement_period_ms(34);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        let base = Config::default();
        assert_eq!(
            base.timing_budget_us(10_000).validate(),
            Err(ConfigError::TimingBudget)
        );
        assert_eq!(
            base.signal_rate_limit_mcps(0.05).validate(),
            Err(ConfigError::SignalRateLimit)
        );
        assert_eq!(
            base.sigma_threshold_mm(2000.0).validate(),
            Err(ConfigError::SigmaThreshold)
        );
        assert_eq!(
            base.merge_threshold(500).validate(),
            Err(ConfigError::MergeThreshold)
        );
        assert_eq!(
            base.hist_merge(true, 5, 8).validate(),
            Err(ConfigError::HistNoiseThreshold)
        );
        assert_eq!(
            base.hist_merge(true, 50, 17).validate(),
            Err(ConfigError::HistMergeMaxSize)
        );
    }

    #[test]
    fn roi_corners_must_be_ordered() {
        let base = Config::default();
        assert_eq!(base.roi(Roi::new(0, 15, 15, 0)).validate(), Ok(()));
        assert_eq!(base.roi(Roi::new(4, 11, 11, 4)).validate(), Ok(()));
        assert_eq!(
            base.roi(Roi::new(12, 11, 11, 4)).validate(),
            Err(ConfigError::Roi)
        );
        assert_eq!(
            base.roi(Roi::new(4, 4, 11, 11)).validate(),
            Err(ConfigError::Roi)
        );
        assert_eq!(
            base.roi(Roi::new(0, 16, 15, 0)).validate(),
            Err(ConfigError::Roi)
        );
    }
}
