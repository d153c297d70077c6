//! SPI transport
//!
//! Every SPI transfer to the PN532 starts with a direction byte: `0x01`
//! data write (host to PN532), `0x02` status read, `0x03` data read. The
//! status read returns one byte whose LSB signals that a frame is pending.
//!
//! The PN532 clocks SPI data LSB first; the bus (or [`SpiDevice`]
//! implementation) must be configured accordingly, mode 0, max 5 MHz.
//!
//! Like I2C, SPI delivers one transfer per frame ([`RecvMode::Buffered`]).

use super::{Channel, Error, RecvMode, Result};
use alloc::vec;
use embassy_time::{Duration, Instant, Timer, with_timeout};
use embedded_hal_async::spi::SpiDevice;
use log::debug;

/// Direction byte preceding a host to PN532 data transfer
const DATA_WRITE: u8 = 0x01;
/// Direction byte requesting the ready status
const STATUS_READ: u8 = 0x02;
/// Direction byte preceding a PN532 to host data transfer
const DATA_READ: u8 = 0x03;

/// Ready-status bit signalling a pending frame
const STATUS_READY_BIT: u8 = 0x01;

/// Poll interval for the ready-status byte
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// PN532 channel over SPI
#[derive(Debug)]
pub struct SpiChannel<S> {
    spi: S,
}

impl<S: SpiDevice> SpiChannel<S> {
    /// Create an SPI channel over the given device
    pub fn new(spi: S) -> Self {
        Self { spi }
    }

    /// Release the underlying SPI device
    pub fn release(self) -> S {
        self.spi
    }

    async fn read_status(&mut self) -> Result<u8> {
        let mut status = [STATUS_READ, 0x00];
        self.spi
            .transfer_in_place(&mut status)
            .await
            .map_err(|_| Error::HwError)?;
        Ok(status[1])
    }
}

impl<S: SpiDevice> Channel for SpiChannel<S> {
    fn receive_mode(&self) -> RecvMode {
        RecvMode::Buffered
    }

    async fn wake(&mut self) -> Result {
        debug!("PN532: waking up via SPI chip select");
        // Asserting chip select wakes the chip; a status read does just
        // that and its result does not matter yet
        let _ = self.read_status().await;
        Timer::after(Duration::from_millis(2)).await;
        Ok(())
    }

    async fn on_receive_prepare(&mut self, timeout: Duration) -> Result {
        let deadline = Instant::now() + timeout;
        loop {
            if self.read_status().await? & STATUS_READY_BIT != 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            Timer::after(STATUS_POLL_INTERVAL).await;
        }
    }

    async fn raw_send(&mut self, data: &[u8], timeout: Duration) -> Result {
        let mut frame = vec![DATA_WRITE];
        frame.extend_from_slice(data);
        match with_timeout(timeout, self.spi.write(&frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::HwError),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn raw_receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result {
        use embedded_hal_async::spi::Operation;
        let mut ops = [Operation::Write(&[DATA_READ]), Operation::Read(buf)];
        let transfer = self.spi.transaction(&mut ops);
        match with_timeout(timeout, transfer).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::HwError),
            Err(_) => Err(Error::Timeout),
        }
    }
}
