//! Seam between the DESFire session layer and the reader
//!
//! A [`DesfirePcd`] moves one raw command to the card and returns the raw
//! response (status byte first). The stock implementation drives a PN532
//! through `InDataExchange`; anything that can shuttle native command bytes
//! to a DESFire card (a different reader, a test double) can stand in.

use crate::channel;
use crate::pn532::data::RfStatus;
use crate::pn532::{LONG_TIMEOUT, Pn532};
use alloc::vec::Vec;
use log::warn;

/// Transport for raw DESFire command/response pairs
pub trait DesfirePcd {
    /// Send one command and collect the card's full response
    ///
    /// Returns the raw response bytes (first byte is the card status) and
    /// whether the exchange succeeded at the transport level. On `false`
    /// the response bytes are meaningless.
    async fn communicate(&mut self, tx: &[u8]) -> (Vec<u8>, bool);
}

/// DESFire transport over a PN532 and an activated target
///
/// Keeps the result of the last PN532 exchange around, so when the session
/// layer reports a controller error the underlying cause can be inspected.
#[derive(Debug)]
pub struct Pn532Pcd<'a, C> {
    pn532: &'a mut Pn532<C>,
    logical_index: u8,
    last_result: Option<channel::Result<RfStatus>>,
}

impl<'a, C: channel::Channel> Pn532Pcd<'a, C> {
    /// Talk to the target with the given logical index through a PN532
    pub fn new(pn532: &'a mut Pn532<C>, logical_index: u8) -> Self {
        Self {
            pn532,
            logical_index,
            last_result: None,
        }
    }

    /// Logical index of the target this transport addresses
    #[must_use]
    pub fn logical_index(&self) -> u8 {
        self.logical_index
    }

    /// Outcome of the most recent exchange: the channel result of the
    /// `InDataExchange`, carrying the RF status on success
    #[must_use]
    pub fn last_result(&self) -> Option<&channel::Result<RfStatus>> {
        self.last_result.as_ref()
    }

    /// The PN532 driving this transport
    pub fn pn532(&mut self) -> &mut Pn532<C> {
        self.pn532
    }
}

impl<C: channel::Channel> DesfirePcd for Pn532Pcd<'_, C> {
    async fn communicate(&mut self, tx: &[u8]) -> (Vec<u8>, bool) {
        match self
            .pn532
            .initiator_data_exchange(self.logical_index, tx, LONG_TIMEOUT)
            .await
        {
            Ok((status, data)) => {
                let ok = status.is_ok();
                if !ok {
                    warn!("DESFire: data exchange failed, RF status {:?}", status.error);
                }
                self.last_result = Some(Ok(status));
                (data, ok)
            }
            Err(err) => {
                warn!("DESFire: data exchange failed: {err}");
                self.last_result = Some(Err(err));
                (Vec::new(), false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecvMode;
    use crate::desfire::Tag;
    use crate::desfire::data::{Error, Key};
    use crate::pn532::data::{Command, InternalError};
    use crate::pn532::tests::MockChannel;
    use rand_core::RngCore;

    struct NoRng;

    impl RngCore for NoRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            dst.fill(0);
        }
    }

    #[async_std::test]
    async fn card_dialog_through_the_whole_stack() {
        // Select an application through channel, frame codec, controller
        // and data exchange: RF status 0x00, then the card's reply
        let mut channel = MockChannel::new(RecvMode::Stream);
        channel.queue_response(Command::InDataExchange, &[0x00, 0x00]);
        let mut pn532 = Pn532::new(channel);
        {
            let pcd = Pn532Pcd::new(&mut pn532, 1);
            let mut tag = Tag::new(pcd, NoRng);
            tag.select_application([0x00, 0xAE, 0x16]).await.unwrap();
            assert_eq!(tag.active_app(), [0x00, 0xAE, 0x16]);
        }

        // The transmitted frame wraps the DESFire command for target 1
        let channel = pn532.release();
        assert_eq!(
            channel.sent[0],
            [0x00, 0x00, 0xFF, 0x07, 0xF9, 0xD4, 0x40, 0x01, 0x5A, 0x00, 0xAE, 0x16, 0xCD, 0x00]
        );
    }

    #[async_std::test]
    async fn rf_error_surfaces_as_controller_error() {
        let mut channel = MockChannel::new(RecvMode::Stream);
        // Timeout (0x01) in the RF status byte of the exchange
        channel.queue_response(Command::InDataExchange, &[0x01]);
        let mut pn532 = Pn532::new(channel);
        let pcd = Pn532Pcd::new(&mut pn532, 0);
        let mut tag = Tag::new(pcd, NoRng);

        let result = tag.authenticate(&Key::des(0, [0; 8])).await;
        assert_eq!(result.unwrap_err(), Error::ControllerError);
        let (pcd, _) = tag.release();
        match pcd.last_result() {
            Some(Ok(status)) => assert_eq!(status.error, InternalError::Timeout),
            result => panic!("unexpected last result {result:?}"),
        }
    }
}
