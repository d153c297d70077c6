//! Byte transport between host and PN532
//!
//! A [`Channel`] moves raw byte sequences over one of the physical links the
//! PN532 supports (HSU serial, I2C, SPI) and knows how to wake the chip from
//! power down. The PN532 is strictly half duplex: at any time there is at
//! most one send or one receive in flight. Exclusive access is expressed
//! through [`CommOperation`], which borrows the channel mutably for the
//! duration of one operation and fires the prepare/complete hooks around it.

pub mod hsu;
pub mod i2c;
pub mod spi;

use core::fmt;
use embassy_time::Duration;

pub use hsu::HsuChannel;
pub use i2c::{I2cChannel, I2cChannelWithIrq};
pub use spi::SpiChannel;

/// Channel-level error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The given timeout elapsed before the transmission was complete
    Timeout,
    /// Hardware error of the underlying bus driver
    HwError,
    /// Received data cannot be parsed, or an unexpected frame was received
    Malformed,
    /// The PN532 sent an application-level error frame
    AppError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Timeout"),
            Self::HwError => write!(f, "Bus error"),
            Self::Malformed => write!(f, "Malformed frame"),
            Self::AppError => write!(f, "PN532 error frame"),
        }
    }
}

/// Channel-level result
pub type Result<T = ()> = core::result::Result<T, Error>;

/// How a channel delivers received bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvMode {
    /// The receive stream is consumed progressively: multiple short
    /// [`Channel::raw_receive`] calls each return the next bytes of the
    /// same frame (typical for serial links)
    Stream,
    /// Each receive operation returns one atomic transport frame and cannot
    /// be continued. To size the read for a long info frame, the frame has
    /// to be requested again (by sending a nack) with a larger buffer
    Buffered,
}

/// Direction of a half-duplex channel operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommDir {
    /// Data goes from the host to the PN532
    Send,
    /// Data goes from the PN532 to the host
    Receive,
}

/// Abstract PN532 transport
///
/// Implementations provide blocking (up to a timeout) byte-level send and
/// receive plus chip wakeup. The `on_*` hooks are fired in pairs around
/// every operation by [`CommOperation`]; implementations use them to
/// acquire the bus, wait for receive readiness, or toggle wake lines.
/// Never call `raw_send`/`raw_receive` directly, always go through a
/// [`CommOperation`] so the hooks stay paired.
pub trait Channel {
    /// How this channel delivers received bytes
    fn receive_mode(&self) -> RecvMode;

    /// Wake the PN532 from power down (transport specific)
    async fn wake(&mut self) -> Result;

    /// Send all bytes in `data`, blocking at most `timeout`
    async fn raw_send(&mut self, data: &[u8], timeout: Duration) -> Result;

    /// Fill `buf` completely with received bytes, blocking at most `timeout`
    ///
    /// In [`RecvMode::Buffered`], the requested buffer may be larger than
    /// the actual frame; the bytes past the frame boundary are unspecified.
    async fn raw_receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result;

    /// Prepare the channel for data transmission
    async fn on_send_prepare(&mut self, _timeout: Duration) -> Result {
        Ok(())
    }

    /// Transmission finished with the given outcome
    fn on_send_complete(&mut self, _outcome: Result) {}

    /// Prepare the channel for data reception (e.g. await the IRQ line)
    async fn on_receive_prepare(&mut self, _timeout: Duration) -> Result {
        Ok(())
    }

    /// Reception finished with the given outcome
    fn on_receive_complete(&mut self, _outcome: Result) {}
}

/// One half-duplex channel operation
///
/// Creating the operation fires the corresponding prepare hook; dropping it
/// fires the complete hook with the recorded outcome. Since the operation
/// holds the only mutable borrow of the channel, a second concurrent
/// operation is unrepresentable (the compile-time counterpart of the
/// "no two operations overlap" protocol invariant).
pub struct CommOperation<'a, C: Channel + ?Sized> {
    channel: &'a mut C,
    dir: CommDir,
    outcome: Result,
}

impl<'a, C: Channel + ?Sized> CommOperation<'a, C> {
    /// Start a send operation, firing [`Channel::on_send_prepare`]
    pub async fn send(channel: &'a mut C, timeout: Duration) -> Result<CommOperation<'a, C>> {
        channel.on_send_prepare(timeout).await?;
        Ok(Self {
            channel,
            dir: CommDir::Send,
            outcome: Ok(()),
        })
    }

    /// Start a receive operation, firing [`Channel::on_receive_prepare`]
    pub async fn receive(channel: &'a mut C, timeout: Duration) -> Result<CommOperation<'a, C>> {
        channel.on_receive_prepare(timeout).await?;
        Ok(Self {
            channel,
            dir: CommDir::Receive,
            outcome: Ok(()),
        })
    }

    /// Receive mode of the underlying channel
    pub fn receive_mode(&self) -> RecvMode {
        self.channel.receive_mode()
    }

    /// Send bytes within this operation, recording the outcome
    pub async fn raw_send(&mut self, data: &[u8], timeout: Duration) -> Result {
        debug_assert_eq!(self.dir, CommDir::Send);
        let result = self.channel.raw_send(data, timeout).await;
        self.update(result)
    }

    /// Receive bytes within this operation, recording the outcome
    pub async fn raw_receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result {
        debug_assert_eq!(self.dir, CommDir::Receive);
        let result = self.channel.raw_receive(buf, timeout).await;
        self.update(result)
    }

    /// Record an outcome (e.g. a parse failure after a successful read) so
    /// the complete hook sees it; returns the same value for passthrough
    pub fn update<T>(&mut self, result: Result<T>) -> Result<T> {
        self.outcome = result.as_ref().map(|_| ()).map_err(|&e| e);
        result
    }
}

impl<C: Channel + ?Sized> Drop for CommOperation<'_, C> {
    fn drop(&mut self) {
        match self.dir {
            CommDir::Send => self.channel.on_send_complete(self.outcome),
            CommDir::Receive => self.channel.on_receive_complete(self.outcome),
        }
    }
}
