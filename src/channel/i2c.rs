//! I2C transport
//!
//! The PN532 answers on address `0x24`. Every read transfer is prefixed by
//! a ready-status byte (`0x01` when a frame is waiting); a read while not
//! ready yields `0x00` and garbage. Readiness is awaited in the receive
//! prepare hook, either by polling the status byte or, when an IRQ line is
//! wired up, by waiting for it to go low.
//!
//! I2C delivers one transfer per frame, so the channel operates in
//! [`RecvMode::Buffered`]: a receive call cannot be continued, re-reads are
//! requested at frame level.

use super::{Channel, Error, RecvMode, Result};
use core::convert::Infallible;
use embassy_time::{Duration, Instant, Timer, with_timeout};
use embedded_hal_async::digital::Wait;
use embedded_hal_async::i2c::{I2c, Operation};
use log::{debug, warn};

/// 7-bit I2C address of the PN532
pub const I2C_ADDRESS: u8 = 0x24;

/// Ready-status byte value signalling a pending frame
pub const STATUS_READY: u8 = 0x01;

/// Poll interval for the ready-status byte when no IRQ line is available
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Read `buf` prefixed by the status byte in a single I2C transaction
async fn status_prefixed_read<I: I2c>(i2c: &mut I, buf: &mut [u8]) -> Result {
    let mut status = [0];
    i2c.transaction(
        I2C_ADDRESS,
        &mut [Operation::Read(&mut status), Operation::Read(buf)],
    )
    .await
    .map_err(|_| Error::HwError)?;
    // Reads only happen after readiness was confirmed, but the chip
    // occasionally reports otherwise; the data read is still valid
    if status[0] != STATUS_READY {
        warn!("PN532: I2C read while not ready");
    }
    Ok(())
}

/// PN532 channel over I2C, polling the ready-status byte
#[derive(Debug)]
pub struct I2cChannel<I> {
    i2c: I,
}

impl<I: I2c> I2cChannel<I> {
    /// Create an I2C channel over the given bus
    pub fn new(i2c: I) -> Self {
        Self { i2c }
    }

    /// Release the underlying bus
    pub fn release(self) -> I {
        self.i2c
    }
}

impl<I: I2c> Channel for I2cChannel<I> {
    fn receive_mode(&self) -> RecvMode {
        RecvMode::Buffered
    }

    async fn wake(&mut self) -> Result {
        debug!("PN532: waking up via I2C address assertion");
        // Addressing the chip is enough to wake it; it may still nack the
        // transfer while waking up
        let _ = self.i2c.write(I2C_ADDRESS, &[]).await;
        Timer::after(Duration::from_millis(2)).await;
        Ok(())
    }

    async fn on_receive_prepare(&mut self, timeout: Duration) -> Result {
        // Poll the ready-status byte until the response frame is pending
        let deadline = Instant::now() + timeout;
        loop {
            let mut status = [0];
            if self.i2c.read(I2C_ADDRESS, &mut status).await.is_err() {
                return Err(Error::HwError);
            }
            if status[0] == STATUS_READY {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            Timer::after(STATUS_POLL_INTERVAL).await;
        }
    }

    async fn raw_send(&mut self, data: &[u8], timeout: Duration) -> Result {
        match with_timeout(timeout, self.i2c.write(I2C_ADDRESS, data)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::HwError),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn raw_receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result {
        match with_timeout(timeout, status_prefixed_read(&mut self.i2c, buf)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }
}

/// PN532 channel over I2C with the IRQ line wired up
///
/// Instead of polling the ready-status byte, reception readiness is awaited
/// through a falling edge on the IRQ line.
#[derive(Debug)]
pub struct I2cChannelWithIrq<I, IRQ> {
    i2c: I,
    irq: IRQ,
}

impl<I: I2c, IRQ: Wait<Error = Infallible>> I2cChannelWithIrq<I, IRQ> {
    /// Create an I2C channel with IRQ over the given bus and input pin
    pub fn new(i2c: I, irq: IRQ) -> Self {
        Self { i2c, irq }
    }

    /// Release the underlying bus and IRQ pin
    pub fn release(self) -> (I, IRQ) {
        (self.i2c, self.irq)
    }
}

impl<I: I2c, IRQ: Wait<Error = Infallible>> Channel for I2cChannelWithIrq<I, IRQ> {
    fn receive_mode(&self) -> RecvMode {
        RecvMode::Buffered
    }

    async fn wake(&mut self) -> Result {
        debug!("PN532: waking up via I2C address assertion");
        let _ = self.i2c.write(I2C_ADDRESS, &[]).await;
        Timer::after(Duration::from_millis(2)).await;
        Ok(())
    }

    async fn on_receive_prepare(&mut self, timeout: Duration) -> Result {
        // IRQ goes low when a response frame is pending. Always safe to
        // unwrap because of the `Wait<Error = Infallible>` bound.
        match with_timeout(timeout, self.irq.wait_for_low()).await {
            Ok(result) => {
                result.unwrap();
                Ok(())
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn raw_send(&mut self, data: &[u8], timeout: Duration) -> Result {
        match with_timeout(timeout, self.i2c.write(I2C_ADDRESS, data)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::HwError),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn raw_receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result {
        match with_timeout(timeout, status_prefixed_read(&mut self.i2c, buf)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }
}
