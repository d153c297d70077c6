//! High speed UART (HSU) transport
//!
//! The PN532 powers up in HSU mode at 115200 baud. Serial delivers bytes as
//! a stream, so the frame reader can consume a frame piece by piece
//! ([`RecvMode::Stream`]) and never reads past the frame boundary.

use super::{Channel, Error, RecvMode, Result};
use embassy_time::{Duration, with_timeout};
use embedded_io_async::{Read, Write};
use log::debug;

/// Bytes sent to wake the PN532 over HSU: long enough a preamble for the
/// chip to sample the wakeup condition (UM0701-02 §7.2.11)
const WAKE_SEQUENCE: [u8; 5] = [0x55, 0x55, 0x55, 0x55, 0x55];

/// PN532 channel over a serial link
#[derive(Debug)]
pub struct HsuChannel<S> {
    serial: S,
}

impl<S: Read + Write> HsuChannel<S> {
    /// Create an HSU channel over the given serial port
    ///
    /// The port must be configured to the PN532's current baudrate (115200
    /// baud 8N1 after power up, changeable with `set_serial_baudrate`).
    pub fn new(serial: S) -> Self {
        Self { serial }
    }

    /// Release the underlying serial port
    pub fn release(self) -> S {
        self.serial
    }
}

impl<S: Read + Write> Channel for HsuChannel<S> {
    fn receive_mode(&self) -> RecvMode {
        RecvMode::Stream
    }

    async fn wake(&mut self) -> Result {
        debug!("PN532: waking up via HSU");
        // Sampling the wake condition takes the chip a while, errors while
        // it is still asleep are of no interest
        let write = async {
            self.serial.write_all(&WAKE_SEQUENCE).await?;
            self.serial.flush().await
        };
        match with_timeout(Duration::from_millis(100), write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::HwError),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn raw_send(&mut self, data: &[u8], timeout: Duration) -> Result {
        let write = async {
            self.serial.write_all(data).await?;
            self.serial.flush().await
        };
        match with_timeout(timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::HwError),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn raw_receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result {
        match with_timeout(timeout, self.serial.read_exact(buf)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::HwError),
            Err(_) => Err(Error::Timeout),
        }
    }
}
