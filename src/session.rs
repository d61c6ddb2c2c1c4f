//! One ranging sensor from power-up to published distances.

use crate::acquisition::{AcquisitionCounters, AcquisitionEngine, Fetch};
use crate::calibration::{
    CalibrationKey, CalibrationKind, CalibrationOutcome, CalibrationStore,
    OFFSET_TARGET_DISTANCE_MM,
};
use crate::classifier::{classify, Classification};
use crate::config::Config;
use crate::firmware::{FixPoint1616, RangingFirmware, TuningParameter};
use crate::power::PowerControl;
use crate::status::Status;
use crate::transport::RegisterBus;
use crate::Error;

/// Receiver of published measurements.
pub trait RangingOutput {
    /// New distance for target `slot`.
    fn publish_distance(&mut self, slot: usize, meters: f32);

    /// Data-ready indicator.
    fn publish_ready(&mut self, ready: bool);
}

/// Discards every measurement.
impl RangingOutput for () {
    fn publish_distance(&mut self, _slot: usize, _meters: f32) {}

    fn publish_ready(&mut self, _ready: bool) {}
}

/// Logs a non-fatal configuration failure.
fn report(what: &'static str, result: Result<(), Status>) {
    if let Err(status) = result {
        warn!("Failed to {}: {}", what, status);
    }
}

/// Wraps a fatal configuration failure.
fn fatal<E: core::fmt::Debug>(what: &'static str) -> impl FnOnce(Status) -> Error<E> {
    move |status| {
        error!("Failed to {}: {}", what, status);
        Error::Vendor(status)
    }
}

/// Ranging session for one sensor.
///
/// Owns the register bus, the firmware handle, the calibration store and
/// the acquisition state. All firmware calls go through the owned bus, so
/// sessions for several sensors can share nothing but the physical I2C
/// peripheral.
pub struct RangingSession<B, F: RangingFirmware, S> {
    bus: B,
    firmware: F,
    store: S,
    config: Config,
    key: CalibrationKey,
    engine: AcquisitionEngine,
    calibration: Option<F::Calibration>,
    initialized: bool,
    last_distance_mm: Option<i16>,
    last_measurement_ms: Option<u64>,
}

impl<B, F, S> RangingSession<B, F, S>
where
    B: RegisterBus,
    F: RangingFirmware,
    S: CalibrationStore<F::Calibration>,
{
    /// Creates an uninitialized session.
    ///
    /// The calibration key is derived from the bus's device address.
    pub fn new(bus: B, firmware: F, store: S, config: Config) -> Self {
        let key = CalibrationKey::for_address(bus.device_address());
        Self {
            bus,
            firmware,
            store,
            config,
            key,
            engine: AcquisitionEngine::new(),
            calibration: None,
            initialized: false,
            last_distance_mm: None,
            last_measurement_ms: None,
        }
    }

    /// Configuration the session was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Key this sensor's calibration is stored under.
    pub fn calibration_key(&self) -> CalibrationKey {
        self.key
    }

    /// Calibration currently in force, loaded or freshly captured.
    pub fn calibration(&self) -> Option<&F::Calibration> {
        self.calibration.as_ref()
    }

    /// `true` once [`initialize`](Self::initialize) completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// `true` once too many consecutive fetches failed.
    pub fn is_faulted(&self) -> bool {
        self.engine.is_faulted()
    }

    /// Distance of the last valid primary target.
    ///
    /// Targets closer than the calibrated zero point read slightly negative.
    pub fn distance_mm(&self) -> Option<i16> {
        self.last_distance_mm
    }

    /// Timestamp passed with the frame that set [`distance_mm`](Self::distance_mm).
    pub fn last_measurement_ms(&self) -> Option<u64> {
        self.last_measurement_ms
    }

    /// Acquisition counters.
    pub fn stats(&self) -> AcquisitionCounters {
        *self.engine.counters()
    }

    /// Tears the session down, giving back its parts.
    pub fn release(self) -> (B, F, S) {
        (self.bus, self.firmware, self.store)
    }
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), keep_self),
    async(feature = "async", keep_self)
)]
impl<B, F, S> RangingSession<B, F, S>
where
    B: RegisterBus,
    F: RangingFirmware,
    S: CalibrationStore<F::Calibration>,
{
    /// Powers up, configures and starts the sensor.
    ///
    /// The configuration is validated before anything touches the bus. The
    /// sensor is then reset through `power`, stored calibration for this
    /// sensor's address is loaded and replayed, and the firmware is
    /// configured and started. Boot, data init, distance mode, timing budget
    /// and start are mandatory; every other step only logs a warning when the
    /// firmware rejects it.
    ///
    /// May be called again to recover a faulted session; lifetime counters
    /// survive.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidConfig(_))` - the configuration is out of range
    /// * `Err(Error::PowerControl)` - the XSHUT sequence failed
    /// * `Err(Error::Vendor(Status))` - a mandatory firmware step failed
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53lx_ranging::{
    ///     Config, DistanceMode, RangingFirmware, RangingSession, Transport, XshutPin,
    /// };
    ///
    /// fn start<F: RangingFirmware>(firmware: F) {
    ///     let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    ///     let transport = Transport::new(i2c, embedded_hal_mock::eh1::delay::NoopDelay);
    ///     let config = Config::default().distance_mode(DistanceMode::Long);
    ///     let mut session = RangingSession::new(transport, firmware, (), config);
    ///
    ///     let pin = embedded_hal_mock::eh1::digital::Mock::new(&[]);
    ///     let mut xshut = XshutPin::new(pin, embedded_hal_mock::eh1::delay::NoopDelay);
    ///
    ///     match session.initialize(&mut xshut) {
    ///         Ok(()) => println!("ranging"),
    ///         Err(e) => println!("sensor did not start: {e}"),
    ///     }
    /// }
    /// ```
    pub async fn initialize<P: PowerControl>(
        &mut self,
        power: &mut P,
    ) -> Result<(), Error<B::BusError>> {
        info!(
            "Initializing ranging session at {:#x}",
            self.bus.device_address()
        );
        self.initialized = false;

        self.config.validate().map_err(Error::InvalidConfig)?;

        power.configure_pins().await.map_err(|_| {
            error!("Failed to configure control pins");
            Error::PowerControl
        })?;
        power.reset().await.map_err(|_| {
            error!("Failed to reset sensor");
            Error::PowerControl
        })?;

        self.calibration = self.store.load(self.key);
        if self.calibration.is_some() {
            info!("Loaded calibration data for key {:#x}", self.key.0);
        }

        self.configure().await?;

        if self.calibration.is_some() {
            info!("Using stored calibration data");
        } else {
            warn!("No calibration data found, using factory defaults");
        }

        report(
            "enable crosstalk compensation",
            self.firmware.set_xtalk_compensation(&mut self.bus, true).await,
        );

        self.engine.clear_fault();
        self.initialized = true;
        info!("Ranging session initialized");
        Ok(())
    }

    async fn configure(&mut self) -> Result<(), Error<B::BusError>> {
        let bus = &mut self.bus;
        let firmware = &mut self.firmware;
        let config = &self.config;

        debug!("Waiting for firmware boot");
        firmware.boot_wait(bus).await.map_err(fatal("boot device"))?;
        firmware.data_init(bus).await.map_err(fatal("initialize device data"))?;

        if let Some(calibration) = &self.calibration {
            debug!("Applying stored calibration data");
            report(
                "apply stored calibration",
                firmware.set_calibration_data(bus, calibration).await,
            );
        }

        match firmware.model_id(bus).await {
            Ok(model_id) => debug!("Model ID: {:#x}", model_id),
            Err(status) => warn!("Failed to read model ID: {}", status),
        }

        firmware
            .set_distance_mode(bus, config.distance_mode)
            .await
            .map_err(fatal("set distance mode"))?;
        firmware
            .set_timing_budget_us(bus, config.timing_budget_us)
            .await
            .map_err(fatal("set timing budget"))?;

        report(
            "set offset correction mode",
            firmware
                .set_offset_correction_mode(bus, config.offset_correction)
                .await,
        );

        debug!(
            "Signal rate limit: {} Mcps, sigma threshold: {} mm",
            config.signal_rate_limit_mcps,
            config.sigma_threshold_mm
        );
        report(
            "set signal rate limit",
            firmware
                .set_tuning_parameter(
                    bus,
                    TuningParameter::min_count_rate_for(config.distance_mode),
                    FixPoint1616::from_f32(config.signal_rate_limit_mcps).to_tuning_value(),
                )
                .await,
        );
        report(
            "set sigma threshold",
            firmware
                .set_tuning_parameter(
                    bus,
                    TuningParameter::HistSigmaThreshMm,
                    FixPoint1616::from_f32(config.sigma_threshold_mm).to_tuning_value(),
                )
                .await,
        );

        if let Some(roi) = config.roi {
            debug!("ROI: {:?}", roi);
            report("set ROI", firmware.set_user_roi(bus, roi).await);
        }

        let period_ms = config.effective_inter_measurement_period_ms();
        debug!("Inter-measurement period: {} ms", period_ms);
        report(
            "set inter-measurement period",
            firmware.set_inter_measurement_period_ms(bus, period_ms).await,
        );
        report(
            "set smudge correction",
            firmware
                .set_smudge_correction(bus, config.smudge_correction)
                .await,
        );

        let tuning = [
            (
                TuningParameter::HistTargetOrder,
                i32::from(u8::from(config.target_order)),
            ),
            (
                TuningParameter::ResetMergeThreshold,
                i32::try_from(config.merge_threshold).unwrap_or(i32::MAX),
            ),
            (TuningParameter::HistMerge, i32::from(config.hist_merge)),
            (
                TuningParameter::HistNoiseThreshold,
                i32::from(config.hist_noise_threshold),
            ),
            (
                TuningParameter::HistMergeMaxSize,
                i32::from(config.hist_merge_max_size),
            ),
        ];
        for (key, value) in tuning {
            debug!("Tuning {:?} = {}", key, value);
            report(
                "set tuning parameter",
                firmware.set_tuning_parameter(bus, key, value).await,
            );
        }

        firmware
            .start_measurement(bus)
            .await
            .map_err(fatal("start ranging"))
    }

    /// `true` when the sensor flags a new frame.
    pub async fn is_data_ready(&mut self) -> bool {
        if !self.initialized {
            return false;
        }
        self.firmware
            .get_data_ready(&mut self.bus)
            .await
            .unwrap_or(false)
    }

    /// Runs one poll tick and publishes whatever the frame yields.
    ///
    /// Call this once per inter-measurement period. When the sensor has a
    /// frame, `output` sees `publish_ready(true)`, one `publish_distance`
    /// per publishable target and `publish_ready(false)`, in that order.
    /// `now_ms` is recorded as the time of the last valid primary distance.
    ///
    /// Returns `Ok(None)` when no frame was ready or the first frame was
    /// dropped.
    ///
    /// # Errors
    ///
    /// * `Err(Error::NotInitialized)` - [`initialize`](Self::initialize) has not succeeded
    /// * `Err(Error::Vendor(Status))` - this tick failed, retry on the next one
    /// * `Err(Error::Faulted)` - the session needs re-initialization
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53lx_ranging::{Error, RangingFirmware, RangingOutput, RangingSession, Transport};
    /// # use embedded_hal_mock::eh1::{delay::NoopDelay, i2c::Mock};
    ///
    /// struct Printer;
    ///
    /// impl RangingOutput for Printer {
    ///     fn publish_distance(&mut self, slot: usize, meters: f32) {
    ///         println!("Target {slot}: {meters} m");
    ///     }
    ///
    ///     fn publish_ready(&mut self, _ready: bool) {}
    /// }
    ///
    /// type Session<F> = RangingSession<Transport<Mock, NoopDelay>, F, ()>;
    ///
    /// fn tick<F: RangingFirmware>(session: &mut Session<F>, now_ms: u64) {
    ///     match session.acquire_frame(&mut Printer, now_ms) {
    ///         Ok(_) => {}
    ///         Err(e) if e.is_fatal() => {
    ///             session.initialize(&mut ()).ok();
    ///         }
    ///         Err(Error::Vendor(status)) => println!("frame skipped: {status}"),
    ///         Err(e) => println!("error: {e}"),
    ///     }
    /// }
    /// ```
    pub async fn acquire_frame<O: RangingOutput>(
        &mut self,
        output: &mut O,
        now_ms: u64,
    ) -> Result<Option<Classification>, Error<B::BusError>> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        if !self
            .engine
            .check_ready(&mut self.bus, &mut self.firmware)
            .await?
        {
            return Ok(None);
        }

        output.publish_ready(true);
        let fetched = self
            .engine
            .acquire(&mut self.bus, &mut self.firmware, self.config.timing_budget_us)
            .await;

        let result = fetched.map(|fetch| match fetch {
            Fetch::FirstFrameDiscarded => None,
            Fetch::Frame { frame, .. } => {
                let classification = classify(&frame);
                for (slot, reading) in classification.slots.iter().enumerate() {
                    if let Some(meters) = reading.meters() {
                        output.publish_distance(slot, meters);
                    }
                }
                if let Some(mm) = classification.primary_mm {
                    self.last_distance_mm = Some(mm);
                    self.last_measurement_ms = Some(now_ms);
                }
                Some(classification)
            }
        });
        output.publish_ready(false);
        result
    }

    /// Stops ranging, runs one calibration, persists its data when usable
    /// and restarts ranging.
    ///
    /// # Errors
    ///
    /// * `Err(Error::NotInitialized)` - the session was never initialized
    pub async fn start_calibration_mode(
        &mut self,
        kind: CalibrationKind,
    ) -> Result<CalibrationOutcome, Error<B::BusError>> {
        info!("Starting {} calibration", kind.as_str());
        info!("Before calibrating, {}", kind.setup_hint());
        if !self.initialized {
            error!("Cannot calibrate: sensor not initialized");
            return Err(Error::NotInitialized);
        }

        report("stop ranging", self.firmware.stop_measurement(&mut self.bus).await);

        let bus = &mut self.bus;
        let result = match kind {
            CalibrationKind::RefSpad => self.firmware.perform_ref_spad_management(bus).await,
            CalibrationKind::Crosstalk => self.firmware.perform_xtalk_calibration(bus).await,
            CalibrationKind::Offset => {
                self.firmware
                    .perform_offset_per_vcsel_calibration(bus, OFFSET_TARGET_DISTANCE_MM)
                    .await
            }
            CalibrationKind::ZeroDistance => {
                self.firmware
                    .perform_offset_zero_distance_calibration(bus)
                    .await
            }
        };

        let outcome = kind.outcome(result);
        match outcome {
            CalibrationOutcome::Success => {
                info!("{} calibration completed successfully", kind.as_str());
            }
            CalibrationOutcome::Warning(status) => {
                warn!("{} calibration completed with warning: {}", kind.as_str(), status);
            }
            CalibrationOutcome::Failed(status) => {
                error!("{} calibration failed: {}", kind.as_str(), status);
            }
        }

        if outcome.should_persist() {
            self.save_calibration().await;
        }

        match kind {
            CalibrationKind::Offset => report(
                "set offset correction mode",
                self.firmware
                    .set_offset_correction_mode(&mut self.bus, self.config.offset_correction)
                    .await,
            ),
            CalibrationKind::Crosstalk => report(
                "re-enable crosstalk compensation",
                self.firmware
                    .set_xtalk_compensation(&mut self.bus, true)
                    .await,
            ),
            CalibrationKind::RefSpad | CalibrationKind::ZeroDistance => {}
        }

        if let Err(status) = self.firmware.start_measurement(&mut self.bus).await {
            error!("Failed to restart ranging after calibration: {}", status);
        }
        Ok(outcome)
    }

    async fn save_calibration(&mut self) -> bool {
        let data = match self.firmware.get_calibration_data(&mut self.bus).await {
            Ok(data) => data,
            Err(status) => {
                warn!("Failed to read calibration data from device: {}", status);
                return false;
            }
        };
        if !self.store.save(self.key, &data) {
            warn!("Failed to save calibration data");
            return false;
        }
        info!("Calibration data saved under key {:#x}", self.key.0);
        self.calibration = Some(data);
        true
    }

    /// Reference SPAD calibration; the outcome is only logged.
    pub async fn perform_refspad_calibration(&mut self) {
        if self.start_calibration_mode(CalibrationKind::RefSpad).await.is_err() {
            debug!("Calibration request dropped");
        }
    }

    /// Crosstalk calibration; the outcome is only logged.
    pub async fn perform_crosstalk_calibration(&mut self) {
        if self.start_calibration_mode(CalibrationKind::Crosstalk).await.is_err() {
            debug!("Calibration request dropped");
        }
    }

    /// Offset calibration; the outcome is only logged.
    pub async fn perform_offset_calibration(&mut self) {
        if self.start_calibration_mode(CalibrationKind::Offset).await.is_err() {
            debug!("Calibration request dropped");
        }
    }

    /// Zero-distance calibration; the outcome is only logged.
    pub async fn perform_zero_distance_calibration(&mut self) {
        if self
            .start_calibration_mode(CalibrationKind::ZeroDistance)
            .await
            .is_err()
        {
            debug!("Calibration request dropped");
        }
    }
}
