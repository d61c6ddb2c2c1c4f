//! Chunked register access over I2C.
//!
//! The VL53LX register map uses 16-bit indices and big-endian multi-byte
//! values. Many host I2C peripherals cap the size of a single transaction,
//! so reads and writes longer than the configured chunk limit are split into
//! sequential transactions, each addressed at `index + offset`, with a short
//! pause between them.

#[cfg(not(feature = "async"))]
use embedded_hal::{delay::DelayNs, i2c::I2c};
#[cfg(feature = "async")]
use embedded_hal_async::{delay::DelayNs, i2c::I2c};

use crate::Error;

/// Default 7-bit I2C address of the sensor.
pub const DEFAULT_ADDRESS: u8 = 0x29;

/// Largest payload sent or received in one bus transaction.
pub const MAX_CHUNK_SIZE: usize = 32;

/// Pause between consecutive chunks of one transfer.
const INTER_CHUNK_DELAY_MS: u32 = 1;

/// Byte-addressed register access used by the ranging firmware.
///
/// Implementors supply raw `read`, `write`, `delay_ms` and `delay_us`; the sized
/// accessors and [`wait_until`](RegisterBus::wait_until) are built on top.
#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), keep_self),
    async(feature = "async", keep_self)
)]
#[allow(async_fn_in_trait)]
pub trait RegisterBus {
    /// Error reported by the underlying bus.
    type BusError: core::fmt::Debug;

    /// Reads `data.len()` bytes starting at register `index`.
    ///
    /// # Errors
    ///
    /// Any failed transaction aborts the read with `Error::I2cError`.
    async fn read(&mut self, index: u16, data: &mut [u8]) -> Result<(), Error<Self::BusError>>;

    /// Writes `data` starting at register `index`.
    ///
    /// # Errors
    ///
    /// Any failed transaction aborts the write with `Error::I2cError`.
    async fn write(&mut self, index: u16, data: &[u8]) -> Result<(), Error<Self::BusError>>;

    /// Blocks for `ms` milliseconds.
    async fn delay_ms(&mut self, ms: u32);

    /// Blocks for `us` microseconds.
    ///
    /// The firmware core uses this for the short settling waits between
    /// register sequences.
    async fn delay_us(&mut self, us: u32);

    /// 7-bit address of the device behind this bus.
    fn device_address(&self) -> u8 {
        DEFAULT_ADDRESS
    }

    /// Reads a single register byte.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    async fn read_byte<R>(&mut self, register_address: R) -> Result<u8, Error<Self::BusError>>
    where
        R: Into<u16>,
    {
        let mut buffer = [0u8; 1];
        self.read(register_address.into(), &mut buffer).await?;
        Ok(buffer[0])
    }

    /// Writes a single register byte.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    async fn write_byte<R>(
        &mut self,
        register_address: R,
        value: u8,
    ) -> Result<(), Error<Self::BusError>>
    where
        R: Into<u16>,
    {
        self.write(register_address.into(), &[value]).await
    }

    /// Reads a big-endian 16-bit register.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    async fn read_word<R>(&mut self, register_address: R) -> Result<u16, Error<Self::BusError>>
    where
        R: Into<u16>,
    {
        let mut buffer = [0u8; 2];
        self.read(register_address.into(), &mut buffer).await?;
        Ok(u16::from_be_bytes(buffer))
    }

    /// Writes a big-endian 16-bit register.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    async fn write_word<R>(
        &mut self,
        register_address: R,
        value: u16,
    ) -> Result<(), Error<Self::BusError>>
    where
        R: Into<u16>,
    {
        self.write(register_address.into(), &value.to_be_bytes())
            .await
    }

    /// Reads a big-endian 32-bit register.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    async fn read_dword<R>(&mut self, register_address: R) -> Result<u32, Error<Self::BusError>>
    where
        R: Into<u16>,
    {
        let mut buffer = [0u8; 4];
        self.read(register_address.into(), &mut buffer).await?;
        Ok(u32::from_be_bytes(buffer))
    }

    /// Writes a big-endian 32-bit register.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    async fn write_dword<R>(
        &mut self,
        register_address: R,
        value: u32,
    ) -> Result<(), Error<Self::BusError>>
    where
        R: Into<u16>,
    {
        self.write(register_address.into(), &value.to_be_bytes())
            .await
    }

    /// Polls register `index` every `poll_interval_ms` until
    /// `(value_read & mask) == value`.
    ///
    /// A zero poll interval is treated as 1 ms.
    ///
    /// # Errors
    ///
    /// * `Err(Error::Timeout)` - the condition did not hold within `timeout_ms`
    /// * `Err(Error::I2cError(E))` - a poll read failed
    async fn wait_until<R>(
        &mut self,
        register_address: R,
        value: u8,
        mask: u8,
        timeout_ms: u32,
        poll_interval_ms: u32,
    ) -> Result<(), Error<Self::BusError>>
    where
        R: Into<u16>,
    {
        let index: u16 = register_address.into();
        let poll_interval_ms = poll_interval_ms.max(1);
        let mut elapsed_ms = 0u32;
        loop {
            let current = self.read_byte(index).await?;
            if current & mask == value {
                return Ok(());
            }
            if elapsed_ms >= timeout_ms {
                debug!(
                    "Timed out waiting for {:#x} & {:#x} == {:#x}",
                    index,
                    mask,
                    value
                );
                return Err(Error::Timeout);
            }
            self.delay_ms(poll_interval_ms).await;
            elapsed_ms = elapsed_ms.saturating_add(poll_interval_ms);
        }
    }
}

/// I2C transport for one sensor.
///
/// Owns the bus handle, the sensor's 7-bit address, the delay provider and
/// the per-transaction chunk limit.
pub struct Transport<I2C, D> {
    /// I2C interface for communication with the sensor
    i2c: I2C,
    /// Current 7-bit I2C address of the sensor
    address: u8,
    /// Delay implementation for inter-chunk pauses and firmware waits
    delay: D,
    /// Maximum payload bytes per transaction
    chunk_limit: usize,
}

impl<I2C, D> Transport<I2C, D> {
    /// Creates a transport at the default address (0x29) with 32-byte chunks.
    ///
    /// The transport takes ownership of the I2C bus and the delay provider.
    /// Use [`with_address`](Self::with_address) when the sensor was moved to
    /// another address, and [`release`](Self::release) to get both back.
    ///
    /// # Arguments
    ///
    /// * `i2c` - I2C bus implementing `embedded_hal::i2c::I2c`
    /// * `delay` - delay provider used between chunks and for firmware waits
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53lx_ranging::{RegisterBus, Transport};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut transport = Transport::new(i2c, delay).with_address(0x30);
    ///
    /// // Model ID register, big-endian
    /// let model_id = transport.read_word(0x010Fu16).unwrap();
    /// println!("Model ID: {:#x}", model_id);
    ///
    /// let (i2c, delay) = transport.release();
    /// ```
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            i2c,
            address: DEFAULT_ADDRESS,
            delay,
            chunk_limit: MAX_CHUNK_SIZE,
        }
    }

    /// Uses `address` instead of the default for every transaction.
    #[must_use]
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// The 7-bit address transactions are sent to.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// The current per-transaction payload limit.
    pub fn chunk_limit(&self) -> usize {
        self.chunk_limit
    }

    /// Gives back the I2C bus and delay provider.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), keep_self),
    async(feature = "async", keep_self)
)]
impl<I2C, E, D> Transport<I2C, D>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
    D: DelayNs,
{
    /// Lowers the per-transaction payload limit.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidArgument)` - `limit` is zero or above [`MAX_CHUNK_SIZE`]
    pub fn set_chunk_limit(&mut self, limit: usize) -> Result<(), Error<E>> {
        if !(1..=MAX_CHUNK_SIZE).contains(&limit) {
            error!("Invalid chunk limit: {}", limit);
            return Err(Error::InvalidArgument);
        }
        self.chunk_limit = limit;
        Ok(())
    }
}

/// Register index of the chunk starting `offset` bytes after `index`.
fn offset_index<E: core::fmt::Debug>(index: u16, offset: usize) -> Result<u16, Error<E>> {
    let offset = u16::try_from(offset).map_err(|_| Error::InvalidArgument)?;
    Ok(index.wrapping_add(offset))
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), keep_self),
    async(feature = "async", keep_self)
)]
impl<I2C, E, D> RegisterBus for Transport<I2C, D>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
    D: DelayNs,
{
    type BusError = E;

    async fn read(&mut self, index: u16, data: &mut [u8]) -> Result<(), Error<E>> {
        let count = data.len();
        for (n, chunk) in data.chunks_mut(self.chunk_limit).enumerate() {
            if n > 0 {
                self.delay.delay_ms(INTER_CHUNK_DELAY_MS).await;
            }
            let chunk_index = offset_index(index, n * self.chunk_limit)?;
            self.i2c
                .write_read(self.address, &chunk_index.to_be_bytes(), chunk)
                .await
                .map_err(|e| {
                    debug!("Failed to read {} bytes from {:#x}", chunk.len(), chunk_index);
                    Error::I2cError(e)
                })?;
        }
        trace!("Read {} bytes from {:#x}", count, index);
        Ok(())
    }

    async fn write(&mut self, index: u16, data: &[u8]) -> Result<(), Error<E>> {
        let mut buffer = [0u8; 2 + MAX_CHUNK_SIZE];
        if data.len() > self.chunk_limit {
            debug!("Chunking large write: {} bytes to {:#x}", data.len(), index);
        }
        for (n, chunk) in data.chunks(self.chunk_limit).enumerate() {
            if n > 0 {
                self.delay.delay_ms(INTER_CHUNK_DELAY_MS).await;
            }
            let chunk_index = offset_index(index, n * self.chunk_limit)?;
            buffer[0..2].copy_from_slice(&chunk_index.to_be_bytes());
            buffer[2..2 + chunk.len()].copy_from_slice(chunk);
            self.i2c
                .write(self.address, &buffer[..2 + chunk.len()])
                .await
                .map_err(|e| {
                    debug!("Failed to write {} bytes to {:#x}", chunk.len(), chunk_index);
                    Error::I2cError(e)
                })?;
        }
        trace!("Wrote {} bytes to {:#x}", data.len(), index);
        Ok(())
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms).await;
    }

    async fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us).await;
    }

    fn device_address(&self) -> u8 {
        self.address
    }
}

#[cfg(all(test, not(feature = "async")))]
mod tests {
    use super::*;
    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock, Transaction};

    #[test]
    fn short_write_is_one_transaction() {
        let expectations = [Transaction::write(0x29, vec![0x00, 0x86, 0x01])];
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(i2c.clone(), NoopDelay);

        transport.write_byte(0x0086u16, 0x01).unwrap();
        i2c.done();
    }

    #[test]
    fn long_write_is_split_at_chunk_offsets() {
        let data: Vec<u8> = (0u8..70).collect();
        let mut first = vec![0x01, 0x00];
        first.extend_from_slice(&data[0..32]);
        let mut second = vec![0x01, 0x20];
        second.extend_from_slice(&data[32..64]);
        let mut third = vec![0x01, 0x40];
        third.extend_from_slice(&data[64..70]);

        let expectations = [
            Transaction::write(0x29, first),
            Transaction::write(0x29, second),
            Transaction::write(0x29, third),
        ];
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(i2c.clone(), NoopDelay);

        transport.write(0x0100, &data).unwrap();
        i2c.done();
    }

    #[test]
    fn long_read_is_split_and_reassembled() {
        let expectations = [
            Transaction::write_read(0x30, vec![0x00, 0x10], vec![0xAA; 8]),
            Transaction::write_read(0x30, vec![0x00, 0x18], vec![0xBB; 8]),
            Transaction::write_read(0x30, vec![0x00, 0x20], vec![0xCC; 4]),
        ];
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(i2c.clone(), NoopDelay).with_address(0x30);
        transport.set_chunk_limit(8).unwrap();

        let mut data = [0u8; 20];
        transport.read(0x0010, &mut data).unwrap();
        assert_eq!(&data[0..8], &[0xAA; 8]);
        assert_eq!(&data[8..16], &[0xBB; 8]);
        assert_eq!(&data[16..20], &[0xCC; 4]);
        i2c.done();
    }

    #[test]
    fn failed_chunk_aborts_remaining_chunks() {
        let data = [0x55u8; 40];
        let mut first = vec![0x02, 0x00];
        first.extend_from_slice(&data[0..16]);
        let mut second = vec![0x02, 0x10];
        second.extend_from_slice(&data[16..32]);

        let expectations = [
            Transaction::write(0x29, first),
            Transaction::write(0x29, second).with_error(ErrorKind::Other),
        ];
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(i2c.clone(), NoopDelay);
        transport.set_chunk_limit(16).unwrap();

        let result = transport.write(0x0200, &data);
        assert!(matches!(result, Err(Error::I2cError(ErrorKind::Other))));
        i2c.done();
    }

    #[test]
    fn multi_byte_values_are_big_endian() {
        let expectations = [
            Transaction::write(0x29, vec![0x00, 0x6C, 0x12, 0x34, 0x56, 0x78]),
            Transaction::write_read(0x29, vec![0x01, 0x0F], vec![0xEA, 0xAA]),
            Transaction::write_read(0x29, vec![0x00, 0x6C], vec![0x12, 0x34, 0x56, 0x78]),
        ];
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(i2c.clone(), NoopDelay);

        transport.write_dword(0x006Cu16, 0x1234_5678).unwrap();
        assert_eq!(transport.read_word(0x010Fu16).unwrap(), 0xEAAA);
        assert_eq!(transport.read_dword(0x006Cu16).unwrap(), 0x1234_5678);
        i2c.done();
    }

    #[test]
    fn wait_until_returns_once_masked_value_matches() {
        let expectations = [
            Transaction::write_read(0x29, vec![0x00, 0xE5], vec![0x00]),
            Transaction::write_read(0x29, vec![0x00, 0xE5], vec![0x02]),
            Transaction::write_read(0x29, vec![0x00, 0xE5], vec![0x03]),
        ];
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(i2c.clone(), NoopDelay);

        transport.wait_until(0x00E5u16, 0x01, 0x01, 10, 1).unwrap();
        i2c.done();
    }

    #[test]
    fn wait_until_timeout_is_distinct_from_bus_failure() {
        let expectations = [
            Transaction::write_read(0x29, vec![0x00, 0xE5], vec![0x00]),
            Transaction::write_read(0x29, vec![0x00, 0xE5], vec![0x00]),
            Transaction::write_read(0x29, vec![0x00, 0xE5], vec![0x00]),
        ];
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(i2c.clone(), NoopDelay);

        let result = transport.wait_until(0x00E5u16, 0x01, 0x01, 10, 5);
        assert!(matches!(result, Err(Error::Timeout)));
        i2c.done();

        let expectations = [Transaction::write_read(0x29, vec![0x00, 0xE5], vec![0x00])
            .with_error(ErrorKind::Other)];
        let mut i2c = Mock::new(&expectations);
        let mut transport = Transport::new(i2c.clone(), NoopDelay);

        let result = transport.wait_until(0x00E5u16, 0x01, 0x01, 10, 5);
        assert!(matches!(result, Err(Error::I2cError(ErrorKind::Other))));
        i2c.done();
    }

    #[test]
    fn chunk_limit_is_bounded() {
        let mut i2c = Mock::new(&[]);
        let mut transport = Transport::new(i2c.clone(), NoopDelay);

        assert!(matches!(transport.set_chunk_limit(0), Err(Error::InvalidArgument)));
        assert!(matches!(
            transport.set_chunk_limit(MAX_CHUNK_SIZE + 1),
            Err(Error::InvalidArgument)
        ));
        assert_eq!(transport.chunk_limit(), MAX_CHUNK_SIZE);
        i2c.done();
    }

    #[derive(Default)]
    struct RecordingDelay {
        ns: Vec<u32>,
    }

    impl DelayNs for RecordingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.ns.push(ns);
        }
    }

    #[test]
    fn microsecond_waits_reach_the_delay_provider() {
        let mut transport = Transport::new(Mock::new(&[]), RecordingDelay::default());

        transport.delay_us(250);
        transport.delay_ms(2);

        let (mut i2c, delay) = transport.release();
        assert_eq!(delay.ns, vec![250_000, 2_000_000]);
        i2c.done();
    }
}
