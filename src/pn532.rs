//! PN532 controller: typed command set over a [`Channel`]
//!
//! [`Pn532`] owns a channel and exposes every PN532 operation (UM0701-02
//! §7) as a typed request/response method. The command flow is strictly
//! request → ack → response → reply-ack; malformed or checksum-failing
//! responses are re-requested once by sending a nack frame.

pub mod data;

use crate::bytes::Reader;
use crate::channel::{Channel, CommOperation, Error, RecvMode, Result};
use crate::frame::{self, Frame, FrameId, Transport};
use alloc::vec;
use alloc::vec::Vec;
use data::{
    ActivationAsTarget, AtrResInfo, Baudrate, BaudrateModulation, Ciu106kbpsTypeA, Ciu212_424kbps,
    CiuIso14443_4, CiuTypeB, Command, FelicaParams, FirmwareVersion, GeneralStatus, GpioPort,
    GpioStatus, HighCurrentThreshold, JumpDepPsl, LowCurrentThreshold, MifareParams, Parameters,
    PollPeriod, PollTarget, PollingMethod, RegisterAddr, RfStatus, RfTestMode, RfTimeout, SamMode,
    SerialBaudrate, StatusAsTarget, TargetFelica, TargetJewel, TargetType, TargetTypeA,
    TargetTypeB, WakeSources,
};
use embassy_time::{Duration, Instant};
use log::{debug, warn};

/// Default timeout for a single command/response round trip
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Longer default timeout for operations involving card activation
pub const LONG_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum number of targets the PN532 tracks concurrently
pub const MAX_TARGETS: u8 = 2;

/// Maximum data bytes per `InDataExchange` frame; longer payloads are
/// split into chained chunks (UM0701-02 §7.3.8)
const DATA_EXCHANGE_CHUNK: usize = 262;

/// Maximum number of target types `InAutoPoll` accepts (UM0701-02 §7.3.13)
const AUTOPOLL_MAX_TYPES: usize = 15;

/// SAM timeout field unit (UM0701-02 §7.2.10)
const SAM_TIMEOUT_UNIT_MS: u64 = 50;

/// Echo-back reply delay unit (UM0701-02 §7.2.1)
const ECHO_BACK_DELAY_STEPS_PER_MS: u64 = 2;

/// Tracks the remaining time budget of an operation across sub-steps
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReducedTimeout {
    deadline: Instant,
}

impl ReducedTimeout {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::from_ticks(0))
    }
}

/// PN532 driver
///
/// Owns the channel to the chip. All methods are strictly sequential; the
/// mutable receiver enforces the half-duplex protocol ordering at compile
/// time.
#[derive(Debug)]
pub struct Pn532<C> {
    channel: C,
}

impl<C: Channel> Pn532<C> {
    /// Create a driver over the given channel
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Release the underlying channel
    pub fn release(self) -> C {
        self.channel
    }

    /// Wake the PN532 from power down or after power up
    ///
    /// Must be called once before the first command and again after
    /// [`Pn532::power_down`].
    pub async fn wake(&mut self) -> Result {
        self.channel.wake().await
    }

    // -------------------------------------------------------------------
    // Frame level
    // -------------------------------------------------------------------

    async fn send_frame(&mut self, frame: &Frame, timeout: Duration) -> Result {
        let rt = ReducedTimeout::new(timeout);
        let bytes = frame.serialize();
        debug!("PN532: >> {}", const_hex::encode(&bytes));
        let mut op = CommOperation::send(&mut self.channel, rt.remaining()).await?;
        op.raw_send(&bytes, rt.remaining()).await
    }

    async fn receive_frame(&mut self, timeout: Duration) -> Result<Frame> {
        let rt = ReducedTimeout::new(timeout);
        match self.channel.receive_mode() {
            RecvMode::Stream => self.receive_frame_stream(rt).await,
            RecvMode::Buffered => self.receive_frame_buffered(rt).await,
        }
    }

    /// Receive a frame from a stream channel, consuming it piece by piece
    async fn receive_frame_stream(&mut self, rt: ReducedTimeout) -> Result<Frame> {
        let mut op = CommOperation::receive(&mut self.channel, rt.remaining()).await?;
        // Scan for the start of packet code, skipping preamble and garbage
        let mut window = [0x55, 0x55];
        loop {
            if window == frame::START_OF_PACKET {
                break;
            }
            let mut byte = [0];
            op.raw_receive(&mut byte, rt.remaining()).await?;
            window = [window[1], byte[0]];
        }
        // Frame code: ack/nack/extended length marker or standard length
        let mut code = [0; 2];
        op.raw_receive(&mut code, rt.remaining()).await?;
        if code == frame::ACK_CODE {
            return Ok(Frame::Ack);
        }
        if code == frame::NACK_CODE {
            return Ok(Frame::Nack);
        }
        let body_len = if code == frame::EXTENDED_LENGTH_CODE {
            let mut ext = [0; 3];
            op.raw_receive(&mut ext, rt.remaining()).await?;
            if ext[0].wrapping_add(ext[1]).wrapping_add(ext[2]) != 0 {
                return op.update(Err(Error::Malformed));
            }
            usize::from(ext[0]) * 256 + usize::from(ext[1])
        } else {
            if code[0].wrapping_add(code[1]) != 0 {
                return op.update(Err(Error::Malformed));
            }
            usize::from(code[0])
        };
        // Body plus data checksum; the postamble is left in the stream and
        // skipped by the next start-of-packet scan
        let mut body = vec![0; body_len + 1];
        op.raw_receive(&mut body, rt.remaining()).await?;
        let checksum = body.iter().fold(0u8, |s, &b| s.wrapping_add(b));
        if checksum != 0 {
            return op.update(Err(Error::Malformed));
        }
        if body_len == 1 && body[0] == frame::ERROR_CODE {
            return Ok(Frame::Error);
        }
        if body_len < 2 {
            return op.update(Err(Error::Malformed));
        }
        let transport = match body[0] {
            frame::HOST_TO_PN532 => Transport::HostToPn532,
            frame::PN532_TO_HOST => Transport::Pn532ToHost,
            _ => return op.update(Err(Error::Malformed)),
        };
        Ok(Frame::Info {
            transport,
            command: body[1],
            data: body[2..body_len].to_vec(),
        })
    }

    /// Receive a frame from a buffered channel
    ///
    /// Reads the minimum prefix first; if the identified info frame is
    /// longer, requests a retransmission with a nack and reads the full
    /// length (only info frames are retransmitted by the PN532).
    async fn receive_frame_buffered(&mut self, rt: ReducedTimeout) -> Result<Frame> {
        let mut buf = vec![0; frame::MAX_HEADER_LEN];
        {
            let mut op = CommOperation::receive(&mut self.channel, rt.remaining()).await?;
            op.raw_receive(&mut buf, rt.remaining()).await?;
        }
        let Ok(id) = FrameId::parse(&buf) else {
            return Err(Error::Malformed);
        };
        if id.frame_len > buf.len() {
            // Ask the PN532 to send the very same frame again, this time
            // with a buffer sized for the whole frame
            debug!(
                "PN532: info frame of {} bytes does not fit the first read, requesting again",
                id.frame_len
            );
            self.send_frame(&Frame::Nack, rt.remaining()).await?;
            buf = vec![0; id.frame_len];
            let mut op = CommOperation::receive(&mut self.channel, rt.remaining()).await?;
            op.raw_receive(&mut buf, rt.remaining()).await?;
            let result = FrameId::parse(&buf)
                .and_then(|id| Frame::parse(id, &buf))
                .map_err(|_| Error::Malformed);
            return op.update(result);
        }
        Frame::parse(id, &buf).map_err(|_| Error::Malformed)
    }

    /// Send an ack (true) or nack (false) frame
    pub async fn send_ack(&mut self, ack: bool, timeout: Duration) -> Result {
        self.send_frame(if ack { &Frame::Ack } else { &Frame::Nack }, timeout)
            .await
    }

    /// Wait for an ack frame; a nack or any other frame is an error
    async fn receive_ack(&mut self, timeout: Duration) -> Result {
        match self.receive_frame(timeout).await? {
            Frame::Ack => Ok(()),
            Frame::Nack => {
                warn!("PN532: command was not acknowledged");
                Err(Error::Malformed)
            }
            Frame::Error => Err(Error::AppError),
            Frame::Info { command, .. } => {
                warn!("PN532: expected ack, got info frame for {command:#04x}");
                Err(Error::Malformed)
            }
        }
    }

    // -------------------------------------------------------------------
    // Command level
    // -------------------------------------------------------------------

    /// Send a command and wait for the PN532 to acknowledge it
    pub async fn command(&mut self, cmd: Command, payload: &[u8], timeout: Duration) -> Result {
        let rt = ReducedTimeout::new(timeout);
        self.send_frame(&Frame::info(cmd.code(), payload), rt.remaining())
            .await?;
        self.receive_ack(rt.remaining()).await
    }

    /// Wait for the response to a previously sent command
    ///
    /// On a malformed or checksum-failing frame, one nack is sent to make
    /// the PN532 retransmit before giving up.
    pub async fn response(&mut self, cmd: Command, timeout: Duration) -> Result<Vec<u8>> {
        let rt = ReducedTimeout::new(timeout);
        let mut retried = false;
        loop {
            let error = match self.receive_frame(rt.remaining()).await {
                Ok(Frame::Info {
                    transport: Transport::Pn532ToHost,
                    command,
                    data,
                }) if command == cmd.reply_code() => return Ok(data),
                Ok(Frame::Info { command, .. }) => {
                    warn!(
                        "PN532: got reply {command:#04x} instead of {:#04x} to {cmd}",
                        cmd.reply_code()
                    );
                    Error::Malformed
                }
                Ok(Frame::Error) => Error::AppError,
                Ok(Frame::Ack | Frame::Nack) => {
                    warn!("PN532: expected response to {cmd}, got ack/nack");
                    Error::Malformed
                }
                Err(e) => e,
            };
            if error == Error::Malformed && !retried {
                // Request a retransmission of the last response frame
                retried = true;
                self.send_ack(false, rt.remaining()).await?;
            } else {
                return Err(error);
            }
        }
    }

    /// Send a command, wait for its response and acknowledge it
    pub async fn command_response(
        &mut self,
        cmd: Command,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let rt = ReducedTimeout::new(timeout);
        self.command(cmd, payload, rt.remaining()).await?;
        let response = self.response(cmd, rt.remaining()).await?;
        // Tell the PN532 the response arrived intact; a send failure here
        // does not invalidate the response
        let _ = self.send_ack(true, rt.remaining()).await;
        Ok(response)
    }

    /// Send a command and parse its response with the given parser
    async fn command_parse_response<T>(
        &mut self,
        cmd: Command,
        payload: &[u8],
        timeout: Duration,
        parse: impl FnOnce(&mut Reader<'_>) -> Option<T>,
    ) -> Result<T> {
        let response = self.command_response(cmd, payload, timeout).await?;
        let mut reader = Reader::new(&response);
        let Some(value) = parse(&mut reader) else {
            warn!("PN532: could not parse response to {cmd}");
            return Err(Error::Malformed);
        };
        if !reader.is_at_end() {
            warn!("PN532: {} stray bytes in response to {cmd}", reader.remaining());
        }
        Ok(value)
    }

    // -------------------------------------------------------------------
    // Diagnostics (UM0701-02 §7.2.1)
    // -------------------------------------------------------------------

    /// Communication line test: sends a data pattern and checks the echo
    pub async fn diagnose_comm_line(&mut self, timeout: Duration) -> Result<bool> {
        // Test number followed by a full-length ramp pattern
        let mut payload: Vec<u8> = (0..=0xFE).collect();
        payload[0] = 0x00;
        let response = self
            .command_response(Command::Diagnose, &payload, timeout)
            .await?;
        Ok(response == payload)
    }

    /// ROM checksum self test
    pub async fn diagnose_rom(&mut self, timeout: Duration) -> Result<bool> {
        self.diagnose_simple(0x01, &[], timeout).await
    }

    /// RAM self test
    pub async fn diagnose_ram(&mut self, timeout: Duration) -> Result<bool> {
        self.diagnose_simple(0x02, &[], timeout).await
    }

    /// Poll a target repeatedly and count communication failures
    ///
    /// Returns the number of failures at 212 kbps and 424 kbps; a speed
    /// that was not requested reports `None`.
    pub async fn diagnose_poll_target(
        &mut self,
        slow: bool,
        fast: bool,
        timeout: Duration,
    ) -> Result<(Option<u8>, Option<u8>)> {
        let rt = ReducedTimeout::new(timeout);
        let mut fails = (None, None);
        if slow {
            let response = self
                .command_response(Command::Diagnose, &[0x04, 0x01], rt.remaining())
                .await?;
            fails.0 = Some(*response.first().ok_or(Error::Malformed)?);
        }
        if fast {
            let response = self
                .command_response(Command::Diagnose, &[0x04, 0x02], rt.remaining())
                .await?;
            fails.1 = Some(*response.first().ok_or(Error::Malformed)?);
        }
        Ok(fails)
    }

    /// Echo-back test: the PN532 repeats every received frame after the
    /// given delay until another command is issued
    pub async fn diagnose_echo_back(
        &mut self,
        reply_delay: Duration,
        tx_mode: u8,
        rx_mode: u8,
        timeout: Duration,
    ) -> Result {
        #[allow(clippy::cast_possible_truncation)]
        let delay = (reply_delay.as_millis() * ECHO_BACK_DELAY_STEPS_PER_MS).min(0xFF) as u8;
        self.command(Command::Diagnose, &[0x05, delay, tx_mode, rx_mode], timeout)
            .await
    }

    /// Attention request / card presence test
    pub async fn diagnose_attention_req_or_card_presence(
        &mut self,
        timeout: Duration,
    ) -> Result<bool> {
        self.diagnose_simple(0x06, &[], timeout).await
    }

    /// Antenna continuity self test (PN532/C1 §8.6.9.2)
    pub async fn diagnose_self_antenna(
        &mut self,
        low: LowCurrentThreshold,
        high: HighCurrentThreshold,
        timeout: Duration,
    ) -> Result<bool> {
        // Control value: thresholds plus the antenna detection enable bit
        let control = low as u8 | high as u8 | 0x01;
        self.diagnose_simple(0x07, &[control], timeout).await
    }

    async fn diagnose_simple(&mut self, test: u8, args: &[u8], timeout: Duration) -> Result<bool> {
        let mut payload = vec![test];
        payload.extend_from_slice(args);
        let response = self
            .command_response(Command::Diagnose, &payload, timeout)
            .await?;
        if response.len() != 1 {
            warn!(
                "PN532: diagnose test {test:#04x} returned {} bytes, expected 1",
                response.len()
            );
            return Err(Error::Malformed);
        }
        Ok(response[0] == 0x00)
    }

    // -------------------------------------------------------------------
    // Chip status and configuration (UM0701-02 §7.2)
    // -------------------------------------------------------------------

    /// Query version and capabilities (UM0701-02 §7.2.2)
    pub async fn get_firmware_version(&mut self, timeout: Duration) -> Result<FirmwareVersion> {
        // GetFirmwareVersion response (UM0701-02 §7.2.2)
        // - 1 byte: IC version (0x32 for PN532)
        // - 1 byte: firmware version
        // - 1 byte: firmware revision
        // - 1 byte: supported functionality bitmask
        //           - Bit 0: ISO/IEC 14443 Type A
        //           - Bit 1: ISO/IEC 14443 Type B
        //           - Bit 2: ISO 18092
        self.command_parse_response(Command::GetFirmwareVersion, &[], timeout, |r| {
            let ic = r.u8()?;
            let version = r.u8()?;
            let revision = r.u8()?;
            let support = r.u8()?;
            Some(FirmwareVersion {
                ic,
                version,
                revision,
                iso_18092: support & 0b100 != 0,
                iso_iec_14443_typea: support & 0b001 != 0,
                iso_iec_14443_typeb: support & 0b010 != 0,
            })
        })
        .await
    }

    /// Query the overall chip, target and SAM status (UM0701-02 §7.2.3)
    pub async fn get_general_status(&mut self, timeout: Duration) -> Result<GeneralStatus> {
        self.command_parse_response(Command::GetGeneralStatus, &[], timeout, GeneralStatus::parse)
            .await
    }

    /// Read up to 131 low-level registers in one batch (UM0701-02 §7.2.4)
    pub async fn read_registers(
        &mut self,
        addresses: &[RegisterAddr],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let max = frame::MAX_PAYLOAD_LEN / 2;
        if addresses.len() > max {
            warn!("PN532: reading only the first {max} of {} registers", addresses.len());
        }
        let mut payload = Vec::with_capacity(addresses.len().min(max) * 2);
        for addr in addresses.iter().take(max) {
            payload.extend_from_slice(&addr.to_bytes());
        }
        let response = self
            .command_response(Command::ReadRegister, &payload, timeout)
            .await?;
        if response.len() != addresses.len().min(max) {
            warn!(
                "PN532: requested {} registers, got {}",
                addresses.len().min(max),
                response.len()
            );
        }
        Ok(response)
    }

    /// Write low-level registers in one batch (UM0701-02 §7.2.5)
    pub async fn write_registers(
        &mut self,
        addr_value_pairs: &[(RegisterAddr, u8)],
        timeout: Duration,
    ) -> Result {
        let max = frame::MAX_PAYLOAD_LEN / 3;
        if addr_value_pairs.len() > max {
            warn!(
                "PN532: writing only the first {max} of {} registers",
                addr_value_pairs.len()
            );
        }
        let mut payload = Vec::with_capacity(addr_value_pairs.len().min(max) * 3);
        for (addr, value) in addr_value_pairs.iter().take(max) {
            payload.extend_from_slice(&addr.to_bytes());
            payload.push(*value);
        }
        self.command_response(Command::WriteRegister, &payload, timeout)
            .await?;
        Ok(())
    }

    /// Read the GPIO levels (UM0701-02 §7.2.6)
    pub async fn read_gpio(&mut self, timeout: Duration) -> Result<GpioStatus> {
        self.command_parse_response(Command::ReadGpio, &[], timeout, |r| {
            Some(GpioStatus::new(r.u8()?, r.u8()?, r.u8()?))
        })
        .await
    }

    /// Write the GPIO levels of the selected ports (UM0701-02 §7.2.7)
    pub async fn write_gpio(
        &mut self,
        status: GpioStatus,
        write_p3: bool,
        write_p7: bool,
        timeout: Duration,
    ) -> Result {
        if !write_p3 && !write_p7 {
            warn!("PN532: GPIO write with neither port selected does nothing");
            return Ok(());
        }
        // Bit 7 validates the written mask
        let p3 = if write_p3 { 0x80 | status.mask(GpioPort::P3) } else { 0x00 };
        let p7 = if write_p7 { 0x80 | status.mask(GpioPort::P7) } else { 0x00 };
        self.command_response(Command::WriteGpio, &[p3, p7], timeout)
            .await?;
        Ok(())
    }

    /// Read-modify-write a single GPIO pin
    pub async fn set_gpio_pin(
        &mut self,
        port: GpioPort,
        pin: u8,
        high: bool,
        timeout: Duration,
    ) -> Result {
        let rt = ReducedTimeout::new(timeout);
        let mut status = self.read_gpio(rt.remaining()).await?;
        status.set_pin(port, pin, high);
        self.write_gpio(status, port == GpioPort::P3, port == GpioPort::P7, rt.remaining())
            .await
    }

    /// Change the HSU baudrate (UM0701-02 §7.2.8)
    ///
    /// Takes effect after the reply-ack; the host must switch its own
    /// serial configuration afterwards.
    pub async fn set_serial_baudrate(
        &mut self,
        baudrate: SerialBaudrate,
        timeout: Duration,
    ) -> Result {
        self.command_response(Command::SetSerialBaudrate, &[baudrate as u8], timeout)
            .await?;
        Ok(())
    }

    /// Set internal parameter flags (UM0701-02 §7.2.9)
    pub async fn set_parameters(&mut self, parameters: Parameters, timeout: Duration) -> Result {
        self.command_response(Command::SetParameters, &[parameters.bits()], timeout)
            .await?;
        Ok(())
    }

    /// Configure the SAM data flow; mandatory before NFC operation
    /// (UM0701-02 §7.2.10)
    ///
    /// `sam_timeout` only matters in virtual-card mode and is expressed in
    /// units of 50 ms on the wire.
    pub async fn sam_configuration(
        &mut self,
        mode: SamMode,
        sam_timeout: Duration,
        controller_drives_irq: bool,
        timeout: Duration,
    ) -> Result {
        #[allow(clippy::cast_possible_truncation)]
        let timeout_byte = (sam_timeout.as_millis() / SAM_TIMEOUT_UNIT_MS).min(0xFF) as u8;
        let payload = [mode as u8, timeout_byte, u8::from(controller_drives_irq)];
        self.command_response(Command::SamConfiguration, &payload, timeout)
            .await?;
        Ok(())
    }

    /// Put the PN532 into deep sleep (UM0701-02 §7.2.11)
    ///
    /// The next operation must be preceded by [`Pn532::wake`]; the driver
    /// does not track the power state.
    pub async fn power_down(
        &mut self,
        wake_sources: WakeSources,
        generate_irq: bool,
        timeout: Duration,
    ) -> Result<RfStatus> {
        let payload = [wake_sources.bits(), u8::from(generate_irq)];
        self.command_parse_response(Command::PowerDown, &payload, timeout, |r| {
            Some(RfStatus::from_byte(r.u8()?))
        })
        .await
    }

    // -------------------------------------------------------------------
    // RF configuration (UM0701-02 §7.3.1, §7.3.2)
    // -------------------------------------------------------------------

    /// Switch the RF field on or off, optionally with automatic RF
    /// collision avoidance
    pub async fn rf_configuration_field(
        &mut self,
        auto_rfca: bool,
        rf_on: bool,
        timeout: Duration,
    ) -> Result {
        let config = u8::from(auto_rfca) << 1 | u8::from(rf_on);
        self.command_response(Command::RfConfiguration, &[0x01, config], timeout)
            .await?;
        Ok(())
    }

    /// Configure ATR_RES and non-ATR response timeouts
    pub async fn rf_configuration_timings(
        &mut self,
        atr_res_timeout: RfTimeout,
        retry_timeout: RfTimeout,
        timeout: Duration,
    ) -> Result {
        let payload = [0x02, 0x00, atr_res_timeout as u8, retry_timeout as u8];
        self.command_response(Command::RfConfiguration, &payload, timeout)
            .await?;
        Ok(())
    }

    /// Number of times the PN532 retries a failed communication with a
    /// target (`0xFF` = forever)
    pub async fn rf_configuration_retries_comm(
        &mut self,
        comm_retries: u8,
        timeout: Duration,
    ) -> Result {
        self.command_response(Command::RfConfiguration, &[0x04, comm_retries], timeout)
            .await?;
        Ok(())
    }

    /// Retry counts for ATR_REQ, PSL_REQ and passive activation
    /// (`0xFF` = forever)
    pub async fn rf_configuration_retries(
        &mut self,
        atr_retries: u8,
        psl_retries: u8,
        passive_activation_retries: u8,
        timeout: Duration,
    ) -> Result {
        let payload = [0x05, atr_retries, psl_retries, passive_activation_retries];
        self.command_response(Command::RfConfiguration, &payload, timeout)
            .await?;
        Ok(())
    }

    /// Write the analog register block for 106 kbps type A
    pub async fn rf_configuration_analog_106kbps_typea(
        &mut self,
        config: Ciu106kbpsTypeA,
        timeout: Duration,
    ) -> Result {
        let mut payload = vec![0x0A];
        config.serialize(&mut payload);
        self.command_response(Command::RfConfiguration, &payload, timeout)
            .await?;
        Ok(())
    }

    /// Write the analog register block for 212/424 kbps
    pub async fn rf_configuration_analog_212_424kbps(
        &mut self,
        config: Ciu212_424kbps,
        timeout: Duration,
    ) -> Result {
        let mut payload = vec![0x0B];
        config.serialize(&mut payload);
        self.command_response(Command::RfConfiguration, &payload, timeout)
            .await?;
        Ok(())
    }

    /// Write the analog register block for type B
    pub async fn rf_configuration_analog_typeb(
        &mut self,
        config: CiuTypeB,
        timeout: Duration,
    ) -> Result {
        let mut payload = vec![0x0C];
        config.serialize(&mut payload);
        self.command_response(Command::RfConfiguration, &payload, timeout)
            .await?;
        Ok(())
    }

    /// Write the analog register block for ISO/IEC14443-4 at 212–848 kbps
    pub async fn rf_configuration_analog_iso_iec_14443_4(
        &mut self,
        config: CiuIso14443_4,
        timeout: Duration,
    ) -> Result {
        let mut payload = vec![0x0D];
        config.serialize(&mut payload);
        self.command_response(Command::RfConfiguration, &payload, timeout)
            .await?;
        Ok(())
    }

    /// Start emitting a carrier for EMI testing; ends with the next command
    /// (UM0701-02 §7.3.2)
    pub async fn rf_regulation_test(&mut self, mode: RfTestMode, timeout: Duration) -> Result {
        self.command(Command::RfRegulationTest, &[mode as u8], timeout)
            .await
    }

    // -------------------------------------------------------------------
    // Target discovery (UM0701-02 §7.3.5, §7.3.13)
    // -------------------------------------------------------------------

    /// List up to `max_targets` passive 106 kbps ISO/IEC14443 type A
    /// targets, optionally re-finding a known card by its UID cascade
    pub async fn initiator_list_passive_kbps106_typea(
        &mut self,
        max_targets: u8,
        uid_filter: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Vec<TargetTypeA>> {
        let mut payload = vec![
            max_targets.clamp(1, MAX_TARGETS),
            BaudrateModulation::Kbps106TypeA as u8,
        ];
        if let Some(uid) = uid_filter {
            payload.extend_from_slice(uid);
        }
        self.list_passive(&payload, timeout, TargetTypeA::parse).await
    }

    /// List passive 106 kbps ISO/IEC14443-3 type B targets; the AFI byte
    /// selects the card category
    pub async fn initiator_list_passive_kbps106_typeb(
        &mut self,
        max_targets: u8,
        afi: u8,
        method: Option<PollingMethod>,
        timeout: Duration,
    ) -> Result<Vec<TargetTypeB>> {
        let mut payload = vec![
            max_targets.clamp(1, MAX_TARGETS),
            BaudrateModulation::Kbps106TypeB as u8,
            afi,
        ];
        if let Some(method) = method {
            payload.push(method as u8);
        }
        self.list_passive(&payload, timeout, TargetTypeB::parse).await
    }

    /// List passive 212 kbps FeliCa targets; `polling` is the 5-byte
    /// FeliCa polling command payload
    pub async fn initiator_list_passive_kbps212_felica(
        &mut self,
        max_targets: u8,
        polling: [u8; 5],
        timeout: Duration,
    ) -> Result<Vec<TargetFelica>> {
        let mut payload = vec![
            max_targets.clamp(1, MAX_TARGETS),
            BaudrateModulation::Kbps212Felica as u8,
        ];
        payload.extend_from_slice(&polling);
        self.list_passive(&payload, timeout, TargetFelica::parse).await
    }

    /// List passive 424 kbps FeliCa targets; `polling` is the 5-byte
    /// FeliCa polling command payload
    pub async fn initiator_list_passive_kbps424_felica(
        &mut self,
        max_targets: u8,
        polling: [u8; 5],
        timeout: Duration,
    ) -> Result<Vec<TargetFelica>> {
        let mut payload = vec![
            max_targets.clamp(1, MAX_TARGETS),
            BaudrateModulation::Kbps424Felica as u8,
        ];
        payload.extend_from_slice(&polling);
        self.list_passive(&payload, timeout, TargetFelica::parse).await
    }

    /// List a passive 106 kbps Innovision Jewel tag (at most one can be
    /// initialized)
    pub async fn initiator_list_passive_kbps106_jewel(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<TargetJewel>> {
        let payload = [1, BaudrateModulation::Kbps106Jewel as u8];
        self.list_passive(&payload, timeout, TargetJewel::parse).await
    }

    async fn list_passive<T>(
        &mut self,
        payload: &[u8],
        timeout: Duration,
        parse: impl Fn(&mut Reader<'_>) -> Option<T>,
    ) -> Result<Vec<T>> {
        // InListPassiveTarget response (UM0701-02 §7.3.5)
        // - 1 byte: number of detected targets
        // - for each target: target record (modulation specific)
        let response = self
            .command_response(Command::InListPassiveTarget, payload, timeout)
            .await?;
        let mut reader = Reader::new(&response);
        let count = reader.u8().ok_or(Error::Malformed)?;
        if count > MAX_TARGETS {
            warn!("PN532: {count} targets reported, parsing only {MAX_TARGETS}");
        }
        let mut targets = Vec::new();
        for _ in 0..count.min(MAX_TARGETS) {
            match parse(&mut reader) {
                Some(target) => targets.push(target),
                None => return Err(Error::Malformed),
            }
        }
        Ok(targets)
    }

    /// Poll for up to 15 target types in turn (UM0701-02 §7.3.13)
    ///
    /// `polls_per_type` of `0xFF` polls forever. The response is awaited
    /// for at most `types × polls × period` (bounded by `timeout`), so a
    /// poll that finds nothing does not hang beyond its own schedule.
    pub async fn initiator_auto_poll(
        &mut self,
        types: &[TargetType],
        polls_per_type: u8,
        period: PollPeriod,
        timeout: Duration,
    ) -> Result<Vec<PollTarget>> {
        let types = if types.len() > AUTOPOLL_MAX_TYPES {
            warn!(
                "PN532: auto poll with {} target types, using the first {AUTOPOLL_MAX_TYPES}",
                types.len()
            );
            &types[..AUTOPOLL_MAX_TYPES]
        } else {
            types
        };
        let mut payload = vec![polls_per_type, period as u8];
        payload.extend(types.iter().map(|&t| t as u8));
        // Cap the wait at the poll schedule length, when it is finite
        let response_timeout = if polls_per_type == 0xFF {
            timeout
        } else {
            let schedule = Duration::from_millis(
                period.as_millis() * u64::from(polls_per_type) * types.len() as u64,
            );
            timeout.min(schedule)
        };
        let rt = ReducedTimeout::new(response_timeout);
        self.command(Command::InAutopoll, &payload, rt.remaining())
            .await?;
        let response = self.response(Command::InAutopoll, rt.remaining()).await?;
        let _ = self.send_ack(true, rt.remaining()).await;

        // InAutoPoll response: count, then per target a type byte, a
        // length byte and the target record
        let mut reader = Reader::new(&response);
        let count = reader.u8().ok_or(Error::Malformed)?;
        if count > MAX_TARGETS {
            warn!("PN532: {count} poll targets reported, parsing only {MAX_TARGETS}");
        }
        let mut targets = Vec::new();
        for _ in 0..count.min(MAX_TARGETS) {
            let type_byte = reader.u8().ok_or(Error::Malformed)?;
            let len = reader.u8().ok_or(Error::Malformed)? as usize;
            let record = reader.take(len).ok_or(Error::Malformed)?;
            let mut record = Reader::new(record);
            let target = Self::parse_poll_target(type_byte, &mut record).ok_or(Error::Malformed)?;
            targets.push(target);
        }
        Ok(targets)
    }

    fn parse_poll_target(type_byte: u8, reader: &mut Reader<'_>) -> Option<PollTarget> {
        // DEP active entries only carry the ATR_RES
        if type_byte & 0x80 != 0 {
            return Some(PollTarget::DepActive(AtrResInfo::parse(reader)?));
        }
        let dep = type_byte & 0x40 != 0;
        match type_byte & 0b111 {
            0x01 | 0x02 => {
                let target = TargetFelica::parse(reader)?;
                if dep {
                    let atr_info = AtrResInfo::parse(reader)?;
                    if type_byte & 0b111 == 0x01 {
                        Some(PollTarget::DepPassive212 { target, atr_info })
                    } else {
                        Some(PollTarget::DepPassive424 { target, atr_info })
                    }
                } else if type_byte & 0b111 == 0x01 {
                    Some(PollTarget::Felica212(target))
                } else {
                    Some(PollTarget::Felica424(target))
                }
            }
            0x03 => Some(PollTarget::TypeB(TargetTypeB::parse(reader)?)),
            0x04 => Some(PollTarget::Jewel(TargetJewel::parse(reader)?)),
            _ => {
                let target = TargetTypeA::parse(reader)?;
                if dep {
                    let atr_info = AtrResInfo::parse(reader)?;
                    Some(PollTarget::DepPassive106 { target, atr_info })
                } else {
                    Some(PollTarget::TypeA(target))
                }
            }
        }
    }

    // -------------------------------------------------------------------
    // Target lifecycle (UM0701-02 §7.3.6–§7.3.12)
    // -------------------------------------------------------------------

    /// Target byte: logical index clamped to the supported range, bit 6
    /// signals that more data follows (chaining)
    fn target_byte(logical_index: u8, expect_more_data: bool) -> u8 {
        if logical_index >= MAX_TARGETS {
            warn!("PN532: logical target index {logical_index} out of range, clamping");
        }
        logical_index.min(MAX_TARGETS - 1) | if expect_more_data { 0x40 } else { 0x00 }
    }

    /// Select a target; subsequent exchanges address it
    pub async fn initiator_select(
        &mut self,
        logical_index: u8,
        timeout: Duration,
    ) -> Result<RfStatus> {
        let payload = [Self::target_byte(logical_index, false)];
        self.command_parse_response(Command::InSelect, &payload, timeout, |r| {
            Some(RfStatus::from_byte(r.u8()?))
        })
        .await
    }

    /// Deselect a target but keep its state in the PN532
    pub async fn initiator_deselect(
        &mut self,
        logical_index: u8,
        timeout: Duration,
    ) -> Result<RfStatus> {
        let payload = [Self::target_byte(logical_index, false)];
        self.command_parse_response(Command::InDeselect, &payload, timeout, |r| {
            Some(RfStatus::from_byte(r.u8()?))
        })
        .await
    }

    /// Release a target and forget its state
    pub async fn initiator_release(
        &mut self,
        logical_index: u8,
        timeout: Duration,
    ) -> Result<RfStatus> {
        let payload = [Self::target_byte(logical_index, false)];
        self.command_parse_response(Command::InRelease, &payload, timeout, |r| {
            Some(RfStatus::from_byte(r.u8()?))
        })
        .await
    }

    /// Renegotiate the baudrate of a TPE or ISO/IEC14443-4 target
    /// (UM0701-02 §7.3.7)
    pub async fn initiator_psl(
        &mut self,
        logical_index: u8,
        tx: Baudrate,
        rx: Baudrate,
        timeout: Duration,
    ) -> Result<RfStatus> {
        let payload = [Self::target_byte(logical_index, false), tx as u8, rx as u8];
        self.command_parse_response(Command::InPsl, &payload, timeout, |r| {
            Some(RfStatus::from_byte(r.u8()?))
        })
        .await
    }

    /// Activate a passive target that was listed but not yet activated
    /// (UM0701-02 §7.3.6)
    pub async fn initiator_activate_target(
        &mut self,
        logical_index: u8,
        nfcid_3t: Option<[u8; 10]>,
        general_info: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<(RfStatus, AtrResInfo)> {
        let mut payload = vec![Self::target_byte(logical_index, false)];
        let next = u8::from(nfcid_3t.is_some()) | u8::from(general_info.is_some()) << 1;
        payload.push(next);
        if let Some(nfcid) = nfcid_3t {
            payload.extend_from_slice(&nfcid);
        }
        if let Some(gi) = general_info {
            payload.extend_from_slice(gi);
        }
        self.command_parse_response(Command::InAtr, &payload, timeout, |r| {
            let status = RfStatus::from_byte(r.u8()?);
            let atr = AtrResInfo::parse(r)?;
            Some((status, atr))
        })
        .await
    }

    // -------------------------------------------------------------------
    // Data exchange (UM0701-02 §7.3.8, §7.3.9)
    // -------------------------------------------------------------------

    /// Exchange data with an activated target, transparently chaining
    /// frames in both directions (UM0701-02 §7.3.8)
    ///
    /// Payloads longer than a single frame are split into chunks with the
    /// more-information bit set on all but the last; replies flagged with
    /// more-information are fetched and concatenated. Any error status
    /// terminates chaining and is returned as-is.
    pub async fn initiator_data_exchange(
        &mut self,
        logical_index: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(RfStatus, Vec<u8>)> {
        let rt = ReducedTimeout::new(timeout);
        let mut chunks = data.chunks(DATA_EXCHANGE_CHUNK);
        let mut response = Vec::new();
        // Always send at least one frame, even with no payload
        let mut chunk = chunks.next().unwrap_or(&[]);
        let mut status;
        loop {
            let next = chunks.next();
            let mut payload = vec![Self::target_byte(logical_index, next.is_some())];
            payload.extend_from_slice(chunk);
            let (s, data) = self.data_exchange_round(&payload, rt.remaining()).await?;
            status = s;
            response.extend_from_slice(&data);
            if !status.is_ok() {
                return Ok((status, response));
            }
            match next {
                Some(next) => chunk = next,
                None => break,
            }
        }
        // The target may have more reply data than fits one frame
        while status.is_ok() && status.expect_more_info {
            let payload = [Self::target_byte(logical_index, false)];
            let (s, data) = self.data_exchange_round(&payload, rt.remaining()).await?;
            status = s;
            response.extend_from_slice(&data);
        }
        Ok((status, response))
    }

    async fn data_exchange_round(
        &mut self,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(RfStatus, Vec<u8>)> {
        let response = self
            .command_response(Command::InDataExchange, payload, timeout)
            .await?;
        let (&status, data) = response.split_first().ok_or(Error::Malformed)?;
        Ok((RfStatus::from_byte(status), data.to_vec()))
    }

    /// Raw exchange without protocol handling by the PN532
    /// (UM0701-02 §7.3.9)
    pub async fn initiator_communicate_through(
        &mut self,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(RfStatus, Vec<u8>)> {
        let response = self
            .command_response(Command::InCommunicateThru, data, timeout)
            .await?;
        let (&status, data) = response.split_first().ok_or(Error::Malformed)?;
        Ok((RfStatus::from_byte(status), data.to_vec()))
    }

    // -------------------------------------------------------------------
    // DEP/PSL activation (UM0701-02 §7.3.3, §7.3.4)
    // -------------------------------------------------------------------

    /// Activate a target for a DEP exchange (UM0701-02 §7.3.3)
    ///
    /// For passive modes, `passive_init_data` carries the UID cascade
    /// (106 kbps) or the FeliCa polling payload (212/424 kbps).
    pub async fn initiator_jump_for_dep(
        &mut self,
        active: bool,
        speed: Baudrate,
        passive_init_data: Option<&[u8]>,
        nfcid_3t: Option<[u8; 10]>,
        general_info: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<JumpDepPsl> {
        let payload = Self::jump_payload(active, speed, passive_init_data, nfcid_3t, general_info);
        self.command_parse_response(Command::InJumpForDep, &payload, timeout, |r| {
            Some(JumpDepPsl {
                status: RfStatus::from_byte(r.u8()?),
                target_logical_index: r.u8()?,
                atr_info: AtrResInfo::parse(r)?,
            })
        })
        .await
    }

    /// Activate a target for a PSL or DEP exchange (UM0701-02 §7.3.4)
    pub async fn initiator_jump_for_psl(
        &mut self,
        active: bool,
        speed: Baudrate,
        passive_init_data: Option<&[u8]>,
        nfcid_3t: Option<[u8; 10]>,
        general_info: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<JumpDepPsl> {
        let payload = Self::jump_payload(active, speed, passive_init_data, nfcid_3t, general_info);
        self.command_parse_response(Command::InJumpForPsl, &payload, timeout, |r| {
            Some(JumpDepPsl {
                status: RfStatus::from_byte(r.u8()?),
                target_logical_index: r.u8()?,
                atr_info: AtrResInfo::parse(r)?,
            })
        })
        .await
    }

    fn jump_payload(
        active: bool,
        speed: Baudrate,
        passive_init_data: Option<&[u8]>,
        nfcid_3t: Option<[u8; 10]>,
        general_info: Option<&[u8]>,
    ) -> Vec<u8> {
        let next = u8::from(passive_init_data.is_some())
            | u8::from(nfcid_3t.is_some()) << 1
            | u8::from(general_info.is_some()) << 2;
        let mut payload = vec![u8::from(active), speed as u8, next];
        if let Some(data) = passive_init_data {
            payload.extend_from_slice(data);
        }
        if let Some(nfcid) = nfcid_3t {
            payload.extend_from_slice(&nfcid);
        }
        if let Some(gi) = general_info {
            payload.extend_from_slice(gi);
        }
        payload
    }

    // -------------------------------------------------------------------
    // Target mode (UM0701-02 §7.3.14–§7.3.21)
    // -------------------------------------------------------------------

    /// Configure the PN532 as a target and wait for an initiator
    /// (UM0701-02 §7.3.14)
    #[allow(clippy::too_many_arguments)]
    pub async fn target_init_as_target(
        &mut self,
        picc_only: bool,
        dep_only: bool,
        passive_only: bool,
        mifare: MifareParams,
        felica: FelicaParams,
        nfcid_3t: [u8; 10],
        general_info: &[u8],
        historical_bytes: &[u8],
        timeout: Duration,
    ) -> Result<ActivationAsTarget> {
        if general_info.len() > 47 {
            warn!("PN532: general info of {} bytes exceeds 47, truncating", general_info.len());
        }
        if historical_bytes.len() > 48 {
            warn!(
                "PN532: historical bytes of {} bytes exceed 48, truncating",
                historical_bytes.len()
            );
        }
        let general_info = &general_info[..general_info.len().min(47)];
        let historical_bytes = &historical_bytes[..historical_bytes.len().min(48)];
        let mode = u8::from(picc_only) << 2 | u8::from(dep_only) << 1 | u8::from(passive_only);
        let mut payload = vec![mode];
        payload.extend_from_slice(&mifare.sens_res);
        payload.extend_from_slice(&mifare.nfcid_1t);
        payload.push(mifare.sel_res);
        payload.extend_from_slice(&felica.nfcid_2t);
        payload.extend_from_slice(&felica.pad);
        payload.extend_from_slice(&felica.syst_code);
        payload.extend_from_slice(&nfcid_3t);
        #[allow(clippy::cast_possible_truncation)]
        payload.push(general_info.len() as u8);
        payload.extend_from_slice(general_info);
        #[allow(clippy::cast_possible_truncation)]
        payload.push(historical_bytes.len() as u8);
        payload.extend_from_slice(historical_bytes);
        self.command_parse_response(Command::TgInitAsTarget, &payload, timeout, |r| {
            ActivationAsTarget::parse(r)
        })
        .await
    }

    /// Set the general bytes sent in the ATR_RES (UM0701-02 §7.3.15)
    pub async fn target_set_general_bytes(
        &mut self,
        general_info: &[u8],
        timeout: Duration,
    ) -> Result<RfStatus> {
        self.command_parse_response(Command::TgSetGeneralBytes, general_info, timeout, |r| {
            Some(RfStatus::from_byte(r.u8()?))
        })
        .await
    }

    /// Receive data from the initiator while operating as target
    /// (UM0701-02 §7.3.16)
    pub async fn target_get_data(&mut self, timeout: Duration) -> Result<(RfStatus, Vec<u8>)> {
        let response = self
            .command_response(Command::TgGetData, &[], timeout)
            .await?;
        let (&status, data) = response.split_first().ok_or(Error::Malformed)?;
        Ok((RfStatus::from_byte(status), data.to_vec()))
    }

    /// Send data to the initiator while operating as target
    /// (UM0701-02 §7.3.17)
    pub async fn target_set_data(&mut self, data: &[u8], timeout: Duration) -> Result<RfStatus> {
        self.command_parse_response(Command::TgSetData, data, timeout, |r| {
            Some(RfStatus::from_byte(r.u8()?))
        })
        .await
    }

    /// Announce over-length DEP data as target (UM0701-02 §7.3.18)
    pub async fn target_set_metadata(&mut self, data: &[u8], timeout: Duration) -> Result<RfStatus> {
        self.command_parse_response(Command::TgSetMetaData, data, timeout, |r| {
            Some(RfStatus::from_byte(r.u8()?))
        })
        .await
    }

    /// Get a raw packet from the initiator (UM0701-02 §7.3.19)
    pub async fn target_get_initiator_command(
        &mut self,
        timeout: Duration,
    ) -> Result<(RfStatus, Vec<u8>)> {
        let response = self
            .command_response(Command::TgGetInitiatorCommand, &[], timeout)
            .await?;
        let (&status, data) = response.split_first().ok_or(Error::Malformed)?;
        Ok((RfStatus::from_byte(status), data.to_vec()))
    }

    /// Send a raw response packet to the initiator (UM0701-02 §7.3.20)
    pub async fn target_response_to_initiator(
        &mut self,
        data: &[u8],
        timeout: Duration,
    ) -> Result<RfStatus> {
        self.command_parse_response(Command::TgResponseToInitiator, data, timeout, |r| {
            Some(RfStatus::from_byte(r.u8()?))
        })
        .await
    }

    /// Read the current target-mode activation state (UM0701-02 §7.3.21)
    pub async fn target_get_target_status(&mut self, timeout: Duration) -> Result<StatusAsTarget> {
        self.command_parse_response(Command::TgGetTargetStatus, &[], timeout, StatusAsTarget::parse)
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel::{Channel, RecvMode, Result};
    use std::collections::VecDeque;
    use std::vec::Vec;

    /// Scripted channel: records sent bytes, replays queued receive data
    pub(crate) struct MockChannel {
        mode: RecvMode,
        pub(crate) sent: Vec<Vec<u8>>,
        rx: VecDeque<Vec<u8>>,
        stream_pos: usize,
    }

    impl MockChannel {
        pub(crate) fn new(mode: RecvMode) -> Self {
            Self {
                mode,
                sent: Vec::new(),
                rx: VecDeque::new(),
                stream_pos: 0,
            }
        }

        pub(crate) fn queue_frame(&mut self, frame: &Frame) {
            self.rx.push_back(frame.serialize());
        }

        fn queue_bytes(&mut self, bytes: &[u8]) {
            self.rx.push_back(bytes.to_vec());
        }

        pub(crate) fn queue_response(&mut self, cmd: Command, data: &[u8]) {
            self.queue_frame(&Frame::Ack);
            self.queue_frame(&Frame::Info {
                transport: Transport::Pn532ToHost,
                command: cmd.reply_code(),
                data: data.to_vec(),
            });
        }
    }

    impl Channel for MockChannel {
        fn receive_mode(&self) -> RecvMode {
            self.mode
        }

        async fn wake(&mut self) -> Result {
            Ok(())
        }

        async fn raw_send(&mut self, data: &[u8], _timeout: Duration) -> Result {
            self.sent.push(data.to_vec());
            Ok(())
        }

        async fn raw_receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result {
            match self.mode {
                RecvMode::Stream => {
                    // Serve bytes one run at a time from the queued frames
                    let mut filled = 0;
                    while filled < buf.len() {
                        let Some(front) = self.rx.front() else {
                            return Err(Error::Timeout);
                        };
                        let available = &front[self.stream_pos..];
                        let n = available.len().min(buf.len() - filled);
                        buf[filled..filled + n].copy_from_slice(&available[..n]);
                        filled += n;
                        self.stream_pos += n;
                        if self.stream_pos == front.len() {
                            self.rx.pop_front();
                            self.stream_pos = 0;
                        }
                    }
                    Ok(())
                }
                RecvMode::Buffered => {
                    let Some(frame) = self.rx.pop_front() else {
                        return Err(Error::Timeout);
                    };
                    let n = frame.len().min(buf.len());
                    buf[..n].copy_from_slice(&frame[..n]);
                    Ok(())
                }
            }
        }
    }

    fn pn532(mode: RecvMode) -> Pn532<MockChannel> {
        Pn532::new(MockChannel::new(mode))
    }

    #[async_std::test]
    async fn command_response_stream() {
        let mut driver = pn532(RecvMode::Stream);
        driver
            .channel
            .queue_response(Command::GetFirmwareVersion, &[0x32, 0x01, 0x06, 0x07]);
        let version = driver.get_firmware_version(DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(version.ic, 0x32);
        assert_eq!(version.version, 0x01);
        assert_eq!(version.revision, 0x06);
        assert!(version.iso_18092);
        assert!(version.iso_iec_14443_typea);
        assert!(version.iso_iec_14443_typeb);
        // Request frame plus the final reply-ack
        assert_eq!(driver.channel.sent.len(), 2);
        assert_eq!(
            driver.channel.sent[0],
            [0x00, 0x00, 0xFF, 0x02, 0xFE, 0xD4, 0x02, 0x2A, 0x00]
        );
        assert_eq!(driver.channel.sent[1], Frame::Ack.serialize());
    }

    #[async_std::test]
    async fn command_response_buffered() {
        let mut driver = pn532(RecvMode::Buffered);
        driver
            .channel
            .queue_response(Command::GetFirmwareVersion, &[0x32, 0x01, 0x06, 0x07]);
        // The info frame is longer than the 8-byte first read, so the
        // driver nacks and the frame must be queued again
        driver.channel.queue_frame(&Frame::Info {
            transport: Transport::Pn532ToHost,
            command: Command::GetFirmwareVersion.reply_code(),
            data: vec![0x32, 0x01, 0x06, 0x07],
        });
        let version = driver.get_firmware_version(DEFAULT_TIMEOUT).await.unwrap();
        assert_eq!(version.ic, 0x32);
        // Command, retransmission nack, final ack
        assert_eq!(driver.channel.sent.len(), 3);
        assert_eq!(driver.channel.sent[1], Frame::Nack.serialize());
    }

    #[async_std::test]
    async fn response_checksum_failure_triggers_nack() {
        let mut driver = pn532(RecvMode::Stream);
        driver.channel.queue_frame(&Frame::Ack);
        // First response has a corrupted data checksum
        let mut bad = Frame::Info {
            transport: Transport::Pn532ToHost,
            command: Command::GetGeneralStatus.reply_code(),
            data: vec![0x00, 0x00, 0x00, 0x00],
        }
        .serialize();
        let dcs = bad.len() - 2;
        bad[dcs] ^= 0xFF;
        driver.channel.queue_bytes(&bad);
        // Retransmitted response is intact: no error, field off, no
        // targets, SAM status zero
        driver.channel.queue_frame(&Frame::Info {
            transport: Transport::Pn532ToHost,
            command: Command::GetGeneralStatus.reply_code(),
            data: vec![0x00, 0x00, 0x00, 0x00],
        });
        let status = driver.get_general_status(DEFAULT_TIMEOUT).await.unwrap();
        assert!(status.last_error.is_ok());
        assert!(!status.rf_field_present);
        assert!(status.targets.is_empty());
        // Command frame, nack, final ack
        assert_eq!(driver.channel.sent.len(), 3);
        assert_eq!(driver.channel.sent[1], Frame::Nack.serialize());
    }

    #[async_std::test]
    async fn error_frame_maps_to_app_error() {
        let mut driver = pn532(RecvMode::Stream);
        driver.channel.queue_frame(&Frame::Ack);
        driver.channel.queue_frame(&Frame::Error);
        let result = driver.get_general_status(DEFAULT_TIMEOUT).await;
        assert_eq!(result.unwrap_err(), Error::AppError);
    }

    #[async_std::test]
    async fn missing_ack_times_out() {
        let mut driver = pn532(RecvMode::Stream);
        let result = driver.get_firmware_version(DEFAULT_TIMEOUT).await;
        assert_eq!(result.unwrap_err(), Error::Timeout);
    }

    #[async_std::test]
    async fn list_passive_typea() {
        let mut driver = pn532(RecvMode::Stream);
        driver.channel.queue_response(
            Command::InListPassiveTarget,
            &[0x01, 0x01, 0x00, 0x04, 0x08, 0x04, 0xDE, 0xAD, 0xBE, 0xEF],
        );
        let targets = driver
            .initiator_list_passive_kbps106_typea(1, None, DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].logical_index, 1);
        assert_eq!(targets[0].nfcid, [0xDE, 0xAD, 0xBE, 0xEF]);
        // Request payload: max targets, baudrate/modulation
        assert_eq!(driver.channel.sent[0][5..9], [0xD4, 0x4A, 0x01, 0x00]);
    }

    #[async_std::test]
    async fn data_exchange_chunks_and_aggregates() {
        let mut driver = pn532(RecvMode::Stream);
        // Two chunks expected: 262 + 38 bytes
        driver.channel.queue_response(Command::InDataExchange, &[0x00]);
        driver
            .channel
            .queue_response(Command::InDataExchange, &[0x00, 0xAA, 0xBB]);
        let data = vec![0x42; 300];
        let (status, response) = driver
            .initiator_data_exchange(0, &data, DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert!(status.is_ok());
        assert_eq!(response, [0xAA, 0xBB]);
        // Frames 0 and 2 are the two chunks (1 and 3 are reply-acks). The
        // first chunk fills an extended frame (body of 265 bytes), so its
        // target byte sits behind the extended length; it must carry the
        // more-information bit. The second chunk is a standard frame.
        assert_eq!(&driver.channel.sent[0][3..5], &frame::EXTENDED_LENGTH_CODE);
        assert_eq!(driver.channel.sent[0][10], 0x40);
        assert_eq!(driver.channel.sent[2][7], 0x00);
    }

    #[async_std::test]
    async fn data_exchange_rx_chaining() {
        let mut driver = pn532(RecvMode::Stream);
        // Reply signals more data to fetch (bit 6), then finishes
        driver
            .channel
            .queue_response(Command::InDataExchange, &[0x40, 0x01, 0x02]);
        driver
            .channel
            .queue_response(Command::InDataExchange, &[0x00, 0x03]);
        let (status, response) = driver
            .initiator_data_exchange(1, &[0x60], DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert!(status.is_ok());
        assert_eq!(response, [0x01, 0x02, 0x03]);
    }

    #[async_std::test]
    async fn data_exchange_error_status_stops_chaining() {
        let mut driver = pn532(RecvMode::Stream);
        // Timeout error (0x01) on the first chunk of two
        driver.channel.queue_response(Command::InDataExchange, &[0x01]);
        let data = vec![0x42; 300];
        let (status, _) = driver
            .initiator_data_exchange(0, &data, DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(status.error, data::InternalError::Timeout);
        // Only the first chunk went out: its command frame plus reply-ack
        assert_eq!(driver.channel.sent.len(), 2);
    }

    #[async_std::test]
    async fn auto_poll_parses_typed_targets() {
        let mut driver = pn532(RecvMode::Stream);
        // One ISO14443-4A entry: type 0x20, length, then a type A record
        driver.channel.queue_response(
            Command::InAutopoll,
            &[0x01, 0x20, 0x09, 0x01, 0x00, 0x04, 0x08, 0x04, 0xDE, 0xAD, 0xBE, 0xEF],
        );
        let targets = driver
            .initiator_auto_poll(
                &[TargetType::Passive106kbpsIso14443_4TypeA],
                2,
                PollPeriod::Ms150,
                DEFAULT_TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(targets.len(), 1);
        match &targets[0] {
            PollTarget::TypeA(target) => assert_eq!(target.nfcid, [0xDE, 0xAD, 0xBE, 0xEF]),
            target => panic!("unexpected target {target:?}"),
        }
        assert_eq!(targets[0].logical_index(), Some(1));
    }

    #[async_std::test]
    async fn select_clamps_logical_index() {
        let mut driver = pn532(RecvMode::Stream);
        driver.channel.queue_response(Command::InSelect, &[0x00]);
        let status = driver.initiator_select(7, DEFAULT_TIMEOUT).await.unwrap();
        assert!(status.is_ok());
        // Clamped to index 1
        assert_eq!(driver.channel.sent[0][7], 0x01);
    }

    #[async_std::test]
    async fn power_down_reports_status() {
        let mut driver = pn532(RecvMode::Stream);
        driver.channel.queue_response(Command::PowerDown, &[0x00]);
        let status = driver
            .power_down(WakeSources::none().hsu().rf(), false, DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert!(status.is_ok());
        assert_eq!(driver.channel.sent[0][7], 0b0001_1000);
    }
}
