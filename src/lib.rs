//! Async driver for the NXP PN532 contactless reader/writer IC and a session
//! layer for MIFARE DESFire cards reached through it.
//!
//! The stack is layered bottom-up:
//!
//! * [`channel`]: byte transport over HSU (serial), I2C or SPI, including
//!   chip wakeup and the half-duplex send/receive handshake
//! * [`frame`]: the PN532 host frame codec (info/ack/nack/error frames,
//!   standard and extended length)
//! * [`pn532`]: the typed PN532 command set (UM0701-02 §7) with
//!   command/ack/response ordering, timeouts and target management
//! * [`desfire`]: the DESFire card dialog, from authentication and secure
//!   messaging (MAC/CMAC/CRC/encryption) to applications, files and records
//!
//! All operations are asynchronous, strictly request driven and carry an
//! explicit timeout. The stack keeps no background tasks and no shared
//! state; a [`pn532::Pn532`] owns its channel and a [`desfire::Tag`] owns
//! its card session.

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod bytes;
pub mod channel;
pub mod desfire;
pub mod frame;
pub mod pn532;

pub use channel::{Channel, RecvMode};
pub use pn532::Pn532;
