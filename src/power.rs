//! XSHUT power sequencing.

use embedded_hal::digital::OutputPin;

#[cfg(not(feature = "async"))]
use embedded_hal::delay::DelayNs;
#[cfg(feature = "async")]
use embedded_hal_async::delay::DelayNs;

/// How long XSHUT is held low during a reset.
const RESET_LOW_MS: u32 = 20;

/// Boot settling time after XSHUT is released.
const RESET_SETTLE_MS: u32 = 10;

/// Power and reset control of one sensor.
#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), keep_self),
    async(feature = "async", keep_self)
)]
#[allow(async_fn_in_trait)]
pub trait PowerControl {
    /// Pin error type.
    type Error: core::fmt::Debug;

    /// Puts the control pins into their idle state.
    async fn configure_pins(&mut self) -> Result<(), Self::Error>;

    /// Power-cycles the sensor.
    async fn reset(&mut self) -> Result<(), Self::Error>;
}

/// No XSHUT line wired; the sensor is always powered.
#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), keep_self),
    async(feature = "async", keep_self)
)]
impl PowerControl for () {
    type Error = core::convert::Infallible;

    async fn configure_pins(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// XSHUT line driven by an output pin, active low.
pub struct XshutPin<P, D> {
    pin: P,
    delay: D,
}

impl<P, D> XshutPin<P, D> {
    /// Wraps the XSHUT output pin and a delay provider.
    pub fn new(pin: P, delay: D) -> Self {
        Self { pin, delay }
    }

    /// Gives back the pin and the delay provider.
    pub fn release(self) -> (P, D) {
        (self.pin, self.delay)
    }
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), keep_self),
    async(feature = "async", keep_self)
)]
impl<P, D> PowerControl for XshutPin<P, D>
where
    P: OutputPin,
    D: DelayNs,
{
    type Error = P::Error;

    async fn configure_pins(&mut self) -> Result<(), P::Error> {
        self.pin.set_high()?;
        debug!("XSHUT pin configured");
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), P::Error> {
        debug!("Resetting sensor via XSHUT");
        self.pin.set_low()?;
        self.delay.delay_ms(RESET_LOW_MS).await;
        self.pin.set_high()?;
        self.delay.delay_ms(RESET_SETTLE_MS).await;
        Ok(())
    }
}

#[cfg(all(test, not(feature = "async")))]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction};

    #[test]
    fn configure_drives_xshut_high() {
        let expectations = [Transaction::set(State::High)];
        let mut pin = PinMock::new(&expectations);
        let mut power = XshutPin::new(pin.clone(), NoopDelay);

        power.configure_pins().unwrap();
        pin.done();
    }

    #[test]
    fn reset_pulses_xshut_low() {
        let expectations = [Transaction::set(State::Low), Transaction::set(State::High)];
        let mut pin = PinMock::new(&expectations);
        let mut power = XshutPin::new(pin.clone(), NoopDelay);

        power.reset().unwrap();
        pin.done();
    }

    #[test]
    fn missing_pin_is_a_no_op() {
        assert_eq!(().configure_pins(), Ok(()));
        assert_eq!(().reset(), Ok(()));
    }
}
