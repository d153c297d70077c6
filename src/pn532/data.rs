//! Typed PN532 entities: command codes, status words, discovered targets
//! and configuration items (UM0701-02 §7)

use crate::bytes::Reader;
use alloc::vec::Vec;
use core::fmt;
use log::warn;

/// PN532 command codes (UM0701-02 §7)
///
/// The reply to a command carries the code incremented by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Run diagnostic commands (UM0701-02 §7.2.1)
    Diagnose = 0x00,
    /// Query for PN532 version and info (UM0701-02 §7.2.2)
    GetFirmwareVersion = 0x02,
    /// Get PN532 and initialized tag status (UM0701-02 §7.2.3)
    GetGeneralStatus = 0x04,
    /// Read low level registers (UM0701-02 §7.2.4)
    ReadRegister = 0x06,
    /// Write low level registers (UM0701-02 §7.2.5)
    WriteRegister = 0x08,
    /// Get GPIO state (UM0701-02 §7.2.6)
    ReadGpio = 0x0C,
    /// Write the GPIO status (UM0701-02 §7.2.7)
    WriteGpio = 0x0E,
    /// Configure serial communication baudrate, HSU mode only (UM0701-02 §7.2.8)
    SetSerialBaudrate = 0x10,
    /// Set internal configuration parameters (UM0701-02 §7.2.9)
    SetParameters = 0x12,
    /// Configure the SAM data flow (UM0701-02 §7.2.10)
    SamConfiguration = 0x14,
    /// Put the PN532 in deep sleep (UM0701-02 §7.2.11)
    PowerDown = 0x16,
    /// Configure RF parameters (UM0701-02 §7.3.1)
    RfConfiguration = 0x32,
    /// Radio regulation test (UM0701-02 §7.3.2)
    RfRegulationTest = 0x58,
    /// Activate a target and set up for a DEP exchange (UM0701-02 §7.3.3)
    InJumpForDep = 0x56,
    /// Activate a target and set up for a PSL or DEP exchange (UM0701-02 §7.3.4)
    InJumpForPsl = 0x46,
    /// Detect targets in range (max 2) in passive mode (UM0701-02 §7.3.5)
    InListPassiveTarget = 0x4A,
    /// Activate a passive target (UM0701-02 §7.3.6)
    InAtr = 0x50,
    /// Change the baudrate of a TPE or ISO14443-4 target (UM0701-02 §7.3.7)
    InPsl = 0x4E,
    /// Start a data exchange with the selected target (UM0701-02 §7.3.8)
    InDataExchange = 0x40,
    /// Start a low level data exchange (UM0701-02 §7.3.9)
    InCommunicateThru = 0x42,
    /// Deselect the target but keep its state (UM0701-02 §7.3.10)
    InDeselect = 0x44,
    /// Release the target and forget its state (UM0701-02 §7.3.11)
    InRelease = 0x52,
    /// Select the target (UM0701-02 §7.3.12)
    InSelect = 0x54,
    /// Poll for specified targets in range and initialize them (UM0701-02 §7.3.13)
    InAutopoll = 0x60,
    /// Configure the PN532 as a target (UM0701-02 §7.3.14)
    TgInitAsTarget = 0x8C,
    /// Set the general bytes sent on ATR_RES (UM0701-02 §7.3.15)
    TgSetGeneralBytes = 0x92,
    /// Receive data when operating as target (UM0701-02 §7.3.16)
    TgGetData = 0x86,
    /// Send data when operating as target (UM0701-02 §7.3.17)
    TgSetData = 0x8E,
    /// Send over-length data in a DEP exchange as target (UM0701-02 §7.3.18)
    TgSetMetaData = 0x94,
    /// Get a data packet from the initiator (UM0701-02 §7.3.19)
    TgGetInitiatorCommand = 0x88,
    /// Send a response packet to the initiator (UM0701-02 §7.3.20)
    TgResponseToInitiator = 0x90,
    /// Read the current target-mode state of the PN532 (UM0701-02 §7.3.21)
    TgGetTargetStatus = 0x8A,
}

impl Command {
    /// Command code byte as sent on the wire
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Expected reply code (command code plus one)
    #[must_use]
    pub const fn reply_code(self) -> u8 {
        self as u8 + 1
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// PN532 internal error codes (UM0701-02 §7.1)
///
/// These are not channel errors: they are reported inline in status bytes
/// and in `GetGeneralStatus`, and are surfaced through [`RfStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalError {
    /// No error
    None,
    /// Time out, the target has not answered
    Timeout,
    /// A CRC error has been detected by the CIU
    CrcError,
    /// A parity error has been detected by the CIU
    ParityError,
    /// Erroneous bit count during anticollision
    ErroneousBitCount,
    /// Framing error during Mifare operation
    FramingError,
    /// Abnormal bit collision during bitwise anticollision at 106 kbps
    BitCollision,
    /// Communication buffer size insufficient
    BufferSizeInsufficient,
    /// RF buffer overflow detected by the CIU
    RfBufferOverflow,
    /// The counterpart did not switch its RF field on in time
    CounterpartRfOff,
    /// RF protocol error
    RfProtocolError,
    /// Antenna drivers switched off due to overheating
    TemperatureError,
    /// Internal buffer overflow
    BufferOverflow,
    /// Invalid parameter
    InvalidParameter,
    /// DEP: unsupported command received from the initiator
    DepUnsupportedCommand,
    /// Data format does not match the specification
    SpecificationMismatch,
    /// Mifare authentication error
    MifareAuthError,
    /// ISO/IEC14443-3: UID check byte is wrong
    WrongUidCheckByte,
    /// DEP: device state does not allow this command
    DepInvalidDeviceState,
    /// Operation not allowed in this configuration
    OperationNotAllowed,
    /// The current state disallows this command
    CommandNotAcceptable,
    /// The PN532 as target was released by the initiator
    ReleasedByInitiator,
    /// ISO/IEC14443-3B: card ID mismatch, card was exchanged
    CardExchanged,
    /// ISO/IEC14443-3B: previously activated card has disappeared
    CardDisappeared,
    /// NFCID3 initiator/target mismatch in DEP
    Nfcid3Mismatch,
    /// Over-current event detected
    OverCurrent,
    /// NAD missing in DEP frame
    NadMissing,
    /// Reserved or undocumented error code
    Other(u8),
}

impl InternalError {
    /// Decode the error bits of a status byte
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::None,
            0x01 => Self::Timeout,
            0x02 => Self::CrcError,
            0x03 => Self::ParityError,
            0x04 => Self::ErroneousBitCount,
            0x05 => Self::FramingError,
            0x06 => Self::BitCollision,
            0x07 => Self::BufferSizeInsufficient,
            0x09 => Self::RfBufferOverflow,
            0x0A => Self::CounterpartRfOff,
            0x0B => Self::RfProtocolError,
            0x0D => Self::TemperatureError,
            0x0E => Self::BufferOverflow,
            0x10 => Self::InvalidParameter,
            0x12 => Self::DepUnsupportedCommand,
            0x13 => Self::SpecificationMismatch,
            0x14 => Self::MifareAuthError,
            0x23 => Self::WrongUidCheckByte,
            0x25 => Self::DepInvalidDeviceState,
            0x26 => Self::OperationNotAllowed,
            0x27 => Self::CommandNotAcceptable,
            0x29 => Self::ReleasedByInitiator,
            0x2A => Self::CardExchanged,
            0x2B => Self::CardDisappeared,
            0x2C => Self::Nfcid3Mismatch,
            0x2D => Self::OverCurrent,
            0x2E => Self::NadMissing,
            code => Self::Other(code),
        }
    }

    /// True if this is [`InternalError::None`]
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::None
    }
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Status byte returned by most initiator commands (UM0701-02 §7.1)
///
/// Bit 7 signals a NAD byte, bit 6 that the target expects more data,
/// bits 5..0 carry the internal error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfStatus {
    /// True if a NAD byte is present
    pub nad_present: bool,
    /// True if the target expects another frame (chaining)
    pub expect_more_info: bool,
    /// PN532 internal error code
    pub error: InternalError,
}

impl RfStatus {
    /// Decode a status byte
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            nad_present: byte & 0x80 != 0,
            expect_more_info: byte & 0x40 != 0,
            error: InternalError::from_code(byte & 0x3F),
        }
    }

    /// True if no error is flagged
    #[must_use]
    pub fn is_ok(self) -> bool {
        self.error.is_ok()
    }
}

/// Operating mode of the optional companion SAM chip (UM0701-02 §7.2.10)
///
/// PN532 boards normally come without a SAM; use [`SamMode::Normal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SamMode {
    /// Normal mode, no SAM chip
    Normal = 0x01,
    /// PN532 and SAM together appear as one virtual card
    VirtualCard = 0x02,
    /// The host accesses the SAM through the PN532
    WiredCard = 0x03,
    /// The host talks to PN532 and SAM separately
    DualCard = 0x04,
}

/// Wake-up sources for [`crate::Pn532::power_down`] (UM0701-02 §7.2.11)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WakeSources(u8);

impl WakeSources {
    /// No wake-up source (only a hard reset wakes the chip)
    #[must_use]
    pub const fn none() -> Self {
        Self(0)
    }

    /// Wake up through the I2C interface
    #[must_use]
    pub const fn i2c(self) -> Self {
        Self(self.0 | 1 << 7)
    }

    /// Wake up when any GPIO changes state
    #[must_use]
    pub const fn gpio(self) -> Self {
        Self(self.0 | 1 << 6)
    }

    /// Wake up through the SPI interface
    #[must_use]
    pub const fn spi(self) -> Self {
        Self(self.0 | 1 << 5)
    }

    /// Wake up through the HSU interface
    #[must_use]
    pub const fn hsu(self) -> Self {
        Self(self.0 | 1 << 4)
    }

    /// Wake up when an external RF field is detected
    #[must_use]
    pub const fn rf(self) -> Self {
        Self(self.0 | 1 << 3)
    }

    /// Wake up through the INT1 GPIO
    #[must_use]
    pub const fn int1(self) -> Self {
        Self(self.0 | 1 << 1)
    }

    /// Wake up through the INT0 GPIO
    #[must_use]
    pub const fn int0(self) -> Self {
        Self(self.0 | 1)
    }

    /// Bitmask as sent on the wire
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// HSU baudrate selector (UM0701-02 §7.2.8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SerialBaudrate {
    Baud9600 = 0x00,
    Baud19200 = 0x01,
    Baud38400 = 0x02,
    Baud57600 = 0x03,
    Baud115200 = 0x04,
    Baud230400 = 0x05,
    Baud460800 = 0x06,
    Baud921600 = 0x07,
    Baud1288000 = 0x08,
}

/// RF timeout values for the timings configuration item (UM0701-02 §7.3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RfTimeout {
    None = 0x00,
    Us100 = 0x01,
    Us200 = 0x02,
    Us400 = 0x03,
    Us800 = 0x04,
    Ms1_6 = 0x05,
    Ms3_2 = 0x06,
    Ms6_4 = 0x07,
    Ms12_8 = 0x08,
    Ms25_6 = 0x09,
    Ms51_2 = 0x0A,
    Ms102_4 = 0x0B,
    Ms204_8 = 0x0C,
    Ms409_6 = 0x0D,
    Ms819_2 = 0x0E,
    S1_64 = 0x0F,
    S3_28 = 0x10,
}

/// Polling period for `InAutoPoll` (UM0701-02 §7.3.13), in units of 150 ms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PollPeriod {
    Ms150 = 0x1,
    Ms300 = 0x2,
    Ms450 = 0x3,
    Ms600 = 0x4,
    Ms750 = 0x5,
    Ms900 = 0x6,
    Ms1050 = 0x7,
    Ms1200 = 0x8,
    Ms1350 = 0x9,
    Ms1500 = 0xA,
    Ms1650 = 0xB,
    Ms1800 = 0xC,
    Ms1950 = 0xD,
    Ms2100 = 0xE,
    Ms2250 = 0xF,
}

impl PollPeriod {
    /// Period duration in milliseconds
    #[must_use]
    pub fn as_millis(self) -> u64 {
        (self as u64) * 150
    }
}

/// Polling method for ISO/IEC14443-3B targets (UM0701-02 §7.3.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PollingMethod {
    /// Default timeslot approach
    Timeslot = 0x00,
    /// Probabilistic approach
    Probabilistic = 0x01,
}

/// Low current threshold for the antenna self test (PN532/C1 §8.6.9.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LowCurrentThreshold {
    /// 25 mA
    Ma25 = 0b10 << 4,
    /// 35 mA
    Ma35 = 0b11 << 4,
}

/// High current threshold for the antenna self test (PN532/C1 §8.6.9.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HighCurrentThreshold {
    Ma45 = 0b000 << 1,
    Ma60 = 0b001 << 1,
    Ma75 = 0b010 << 1,
    Ma90 = 0b011 << 1,
    Ma105 = 0b100 << 1,
    Ma120 = 0b101 << 1,
    Ma130 = 0b110 << 1,
    Ma150 = 0b111 << 1,
}

/// Framing and speed selector for the RF regulation test (UM0701-02 §7.3.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RfTestMode {
    Mifare106kbps = 0b000_0000,
    Mifare212kbps = 0b001_0000,
    Mifare424kbps = 0b010_0000,
    Mifare848kbps = 0b011_0000,
    Felica106kbps = 0b000_0010,
    Felica212kbps = 0b001_0010,
    Felica424kbps = 0b010_0010,
    Felica848kbps = 0b011_0010,
}

/// Bit rate of a target link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Baudrate {
    /// 106 kbps
    Kbps106 = 0x0,
    /// 212 kbps
    Kbps212 = 0x1,
    /// 424 kbps
    Kbps424 = 0x2,
}

impl Baudrate {
    fn from_byte(byte: u8) -> Self {
        match byte & 0b111 {
            0x1 => Self::Kbps212,
            0x2 => Self::Kbps424,
            _ => Self::Kbps106,
        }
    }
}

/// Baudrate/modulation pairs supported by `InListPassiveTarget`
/// (UM0701-02 §7.3.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BaudrateModulation {
    /// 106 kbps ISO/IEC 14443 type A
    Kbps106TypeA = 0x00,
    /// 212 kbps FeliCa
    Kbps212Felica = 0x01,
    /// 424 kbps FeliCa
    Kbps424Felica = 0x02,
    /// 106 kbps ISO/IEC 14443-3 type B
    Kbps106TypeB = 0x03,
    /// 106 kbps Innovision Jewel tag
    Kbps106Jewel = 0x04,
}

/// Target types pollable with `InAutoPoll` (UM0701-02 §7.3.13)
///
/// Modern Mifare DESFire cards activate as
/// [`TargetType::Passive106kbpsIso14443_4TypeA`], not as
/// [`TargetType::MifareClassicUltralight`]; polling for the latter can push
/// a DESFire card into a legacy compatibility mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TargetType {
    /// Generic passive 106 kbps (ISO/IEC 14443-4A, Mifare, DEP)
    GenericPassive106kbps = 0x00,
    /// Generic passive 212 kbps (FeliCa and DEP)
    GenericPassive212kbps = 0x01,
    /// Generic passive 424 kbps (FeliCa and DEP)
    GenericPassive424kbps = 0x02,
    /// Passive 106 kbps ISO/IEC14443-4B
    Passive106kbpsIso14443TypeB = 0x03,
    /// Innovision Jewel tag
    InnovisionJewel = 0x04,
    /// Mifare Classic or Ultralight card
    MifareClassicUltralight = 0x10,
    /// FeliCa 212 kbps card
    Felica212kbps = 0x11,
    /// FeliCa 424 kbps card
    Felica424kbps = 0x12,
    /// Passive 106 kbps ISO/IEC14443-4A (Mifare DESFire)
    Passive106kbpsIso14443_4TypeA = 0x20,
    /// Passive 106 kbps ISO/IEC14443-4B (alternative code)
    Passive106kbpsIso14443_4TypeB = 0x23,
    /// DEP passive 106 kbps
    DepPassive106kbps = 0x40,
    /// DEP passive 212 kbps
    DepPassive212kbps = 0x41,
    /// DEP passive 424 kbps
    DepPassive424kbps = 0x42,
    /// DEP active 106 kbps
    DepActive106kbps = 0x80,
    /// DEP active 212 kbps
    DepActive212kbps = 0x81,
    /// DEP active 424 kbps
    DepActive424kbps = 0x82,
}

impl TargetType {
    /// The baudrate/modulation pair encoded in the low bits of the type
    #[must_use]
    pub fn baudrate_modulation(self) -> BaudrateModulation {
        match (self as u8) & 0b111 {
            0x01 => BaudrateModulation::Kbps212Felica,
            0x02 => BaudrateModulation::Kbps424Felica,
            0x03 => BaudrateModulation::Kbps106TypeB,
            0x04 => BaudrateModulation::Kbps106Jewel,
            _ => BaudrateModulation::Kbps106TypeA,
        }
    }

    /// True for the six DEP target types
    #[must_use]
    pub fn is_dep(self) -> bool {
        self as u8 & 0xC0 != 0
    }

    /// True for the three active DEP target types
    #[must_use]
    pub fn is_dep_active(self) -> bool {
        self as u8 & 0x80 != 0
    }
}

/// A 106 kbps ISO/IEC 14443 type A passive target (UM0701-02 §7.3.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTypeA {
    /// Logical index by which the PN532 refers to this target
    pub logical_index: u8,
    /// SENS_RES, MSB first
    pub sens_res: [u8; 2],
    /// SEL_RES byte
    pub sel_res: u8,
    /// NFCID1 (4, 7 or 10 bytes)
    pub nfcid: Vec<u8>,
    /// ATS bytes, if the target sent any
    pub ats: Vec<u8>,
}

impl TargetTypeA {
    /// Parse one type A target record
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        let logical_index = reader.u8()?;
        let sens_res = reader.take_array()?;
        let sel_res = reader.u8()?;
        let nfcid_len = reader.u8()? as usize;
        let nfcid = reader.take_vec(nfcid_len)?;
        // ATS length includes the length byte itself
        let ats = if reader.remaining() > 0 {
            let ats_len = (reader.u8()? as usize).saturating_sub(1);
            reader.take_vec(ats_len.min(reader.remaining()))?
        } else {
            Vec::new()
        };
        Some(Self {
            logical_index,
            sens_res,
            sel_res,
            nfcid,
            ats,
        })
    }
}

/// A FeliCa passive target at 212 or 424 kbps (part of the POL_RES)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFelica {
    /// Logical index by which the PN532 refers to this target
    pub logical_index: u8,
    /// NFCID2, includes the cascade byte
    pub nfcid_2t: [u8; 8],
    /// Padding bytes
    pub pad: [u8; 8],
    /// SYST_CODE, if transmitted
    pub syst_code: [u8; 2],
}

impl TargetFelica {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        let logical_index = reader.u8()?;
        // POL_RES length byte, either 18 or 20 depending on SYST_CODE
        let pol_res_len = reader.u8()?;
        let _response_code = reader.u8()?;
        let nfcid_2t = reader.take_array()?;
        let pad = reader.take_array()?;
        let syst_code = if pol_res_len >= 20 {
            reader.take_array()?
        } else {
            [0, 0]
        };
        Some(Self {
            logical_index,
            nfcid_2t,
            pad,
            syst_code,
        })
    }
}

/// A 106 kbps ISO/IEC 14443-3 type B passive target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTypeB {
    /// Logical index by which the PN532 refers to this target
    pub logical_index: u8,
    /// ATQB response
    pub atqb_response: [u8; 12],
    /// ATTRIB_RES bytes
    pub attrib_res: Vec<u8>,
}

impl TargetTypeB {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        let logical_index = reader.u8()?;
        let atqb_response = reader.take_array()?;
        let attrib_res_len = reader.u8()? as usize;
        let attrib_res = reader.take_vec(attrib_res_len)?;
        Some(Self {
            logical_index,
            atqb_response,
            attrib_res,
        })
    }
}

/// A 106 kbps Innovision Jewel tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetJewel {
    /// Logical index by which the PN532 refers to this target
    pub logical_index: u8,
    /// SENS_RES, MSB first
    pub sens_res: [u8; 2],
    /// Jewel ID (4 bytes)
    pub jewel_id: [u8; 4],
}

impl TargetJewel {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        Some(Self {
            logical_index: reader.u8()?,
            sens_res: reader.take_array()?,
            jewel_id: reader.take_array()?,
        })
    }
}

/// ATR_RES content of an activated DEP target (UM0701-02 §7.3.3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtrResInfo {
    /// NFCID3 of the target
    pub nfcid_3t: [u8; 10],
    /// DID byte sent by the target
    pub did_t: u8,
    /// Supported send bit rate of the target
    pub b_st: u8,
    /// Supported receive bit rate of the target
    pub b_rt: u8,
    /// Timeout value in the transport protocol
    pub to: u8,
    /// Optional parameters (length reduction, NAD usable, general bytes)
    pub pp_t: u8,
    /// General information bytes (max 48)
    pub g_t: Vec<u8>,
}

impl AtrResInfo {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        Some(Self {
            nfcid_3t: reader.take_array()?,
            did_t: reader.u8()?,
            b_st: reader.u8()?,
            b_rt: reader.u8()?,
            to: reader.u8()?,
            pp_t: reader.u8()?,
            g_t: reader.take_rest().to_vec(),
        })
    }

    /// Parse from a length-prefixed ATR_RES block (length includes itself)
    pub(crate) fn parse_length_prefixed(reader: &mut Reader<'_>) -> Option<Self> {
        let len = (reader.u8()? as usize).saturating_sub(1);
        let block = reader.take(len)?;
        Self::parse(&mut Reader::new(block))
    }
}

/// A target discovered by `InAutoPoll`, keyed on the polled target type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollTarget {
    /// Plain 106 kbps type A target (incl. Mifare and ISO14443-4A)
    TypeA(TargetTypeA),
    /// FeliCa target at 212 kbps
    Felica212(TargetFelica),
    /// FeliCa target at 424 kbps
    Felica424(TargetFelica),
    /// 106 kbps type B target
    TypeB(TargetTypeB),
    /// Innovision Jewel tag
    Jewel(TargetJewel),
    /// Passive DEP target on a type A link
    DepPassive106 {
        /// Underlying type A target data
        target: TargetTypeA,
        /// ATR_RES of the DEP activation
        atr_info: AtrResInfo,
    },
    /// Passive DEP target on a 212 kbps FeliCa link
    DepPassive212 {
        /// Underlying FeliCa target data
        target: TargetFelica,
        /// ATR_RES of the DEP activation
        atr_info: AtrResInfo,
    },
    /// Passive DEP target on a 424 kbps FeliCa link
    DepPassive424 {
        /// Underlying FeliCa target data
        target: TargetFelica,
        /// ATR_RES of the DEP activation
        atr_info: AtrResInfo,
    },
    /// Active DEP target (ATR_RES only)
    DepActive(AtrResInfo),
}

impl PollTarget {
    /// Logical index assigned by the PN532, if the entry carries one
    #[must_use]
    pub fn logical_index(&self) -> Option<u8> {
        match self {
            Self::TypeA(t) | Self::DepPassive106 { target: t, .. } => Some(t.logical_index),
            Self::Felica212(t)
            | Self::Felica424(t)
            | Self::DepPassive212 { target: t, .. }
            | Self::DepPassive424 { target: t, .. } => Some(t.logical_index),
            Self::TypeB(t) => Some(t.logical_index),
            Self::Jewel(t) => Some(t.logical_index),
            Self::DepActive(_) => None,
        }
    }
}

/// Data returned by `GetFirmwareVersion` (UM0701-02 §7.2.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    /// IC version, `0x32` for the PN532
    pub ic: u8,
    /// Firmware version
    pub version: u8,
    /// Firmware revision
    pub revision: u8,
    /// Supports ISO18092
    pub iso_18092: bool,
    /// Supports ISO/IEC 14443 type A
    pub iso_iec_14443_typea: bool,
    /// Supports ISO/IEC 14443 type B
    pub iso_iec_14443_typeb: bool,
}

/// Status of one activated target, part of [`GeneralStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneralStatusTarget {
    /// Logical index assigned by the PN532
    pub logical_index: u8,
    /// Receive bit rate
    pub baudrate_rx: Baudrate,
    /// Transmit bit rate
    pub baudrate_tx: Baudrate,
    /// Modulation type byte
    pub modulation: u8,
}

/// Status of the SAM companion chip, part of [`GeneralStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamStatus {
    /// A full negative pulse was detected on the CLAD line
    pub neg_pulse_on_clad_line: bool,
    /// An external RF field was detected and switched off
    pub detected_rf_field_off: bool,
    /// A timeout was detected after SigActIRQ fell
    pub timeout_after_sig_act_irq: bool,
    /// The CLAD line is high
    pub clad_line_high: bool,
}

/// Data returned by `GetGeneralStatus` (UM0701-02 §7.2.3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneralStatus {
    /// Last error of the controller
    pub last_error: InternalError,
    /// True if the RF field is switched on
    pub rf_field_present: bool,
    /// Status of each activated target (max 2)
    pub targets: Vec<GeneralStatusTarget>,
    /// SAM status bits
    pub sam: SamStatus,
}

impl GeneralStatus {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        let last_error = InternalError::from_code(reader.u8()? & 0x3F);
        let rf_field_present = reader.u8()? != 0;
        let num_targets = reader.u8()?;
        if num_targets > 2 {
            warn!("PN532: general status reports {num_targets} targets, expected at most 2");
        }
        let mut targets = Vec::new();
        for _ in 0..num_targets.min(2) {
            targets.push(GeneralStatusTarget {
                logical_index: reader.u8()?,
                baudrate_rx: Baudrate::from_byte(reader.u8()?),
                baudrate_tx: Baudrate::from_byte(reader.u8()?),
                modulation: reader.u8()?,
            });
        }
        let sam_byte = reader.u8()?;
        Some(Self {
            last_error,
            rf_field_present,
            targets,
            sam: SamStatus {
                neg_pulse_on_clad_line: sam_byte & 1 != 0,
                detected_rf_field_off: sam_byte & (1 << 1) != 0,
                timeout_after_sig_act_irq: sam_byte & (1 << 2) != 0,
                clad_line_high: sam_byte & (1 << 7) != 0,
            },
        })
    }
}

/// One of the GPIO ports of the PN532 (UM0701-02 §7.2.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioPort {
    /// Port P3 (6 usable pins)
    P3,
    /// Port P7 (pins 1 and 2)
    P7,
    /// I0/I1 interface selection pins (read only)
    I0I1,
}

/// GPIO levels of the ports P3, P7 and I0/I1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpioStatus {
    p3: u8,
    p7: u8,
    i0i1: u8,
}

impl GpioStatus {
    /// Create from the three raw port masks
    #[must_use]
    pub fn new(p3: u8, p7: u8, i0i1: u8) -> Self {
        Self { p3, p7, i0i1 }
    }

    /// Raw bitmask of one port
    #[must_use]
    pub fn mask(self, port: GpioPort) -> u8 {
        match port {
            GpioPort::P3 => self.p3,
            GpioPort::P7 => self.p7,
            GpioPort::I0I1 => self.i0i1,
        }
    }

    /// Level of a single pin
    #[must_use]
    pub fn pin(self, port: GpioPort, index: u8) -> bool {
        self.mask(port) & (1 << index) != 0
    }

    /// Set the level of a single pin (I0/I1 cannot be written)
    pub fn set_pin(&mut self, port: GpioPort, index: u8, high: bool) {
        let mask = match port {
            GpioPort::P3 => &mut self.p3,
            GpioPort::P7 => &mut self.p7,
            GpioPort::I0I1 => return,
        };
        if high {
            *mask |= 1 << index;
        } else {
            *mask &= !(1 << index);
        }
    }
}

/// Address of a PN532 register, either an SFR or a XRAM-mapped address
/// (UM0701-02 §7.2.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterAddr(pub u16);

impl RegisterAddr {
    /// Address of a special function register (high byte `0xFF`)
    #[must_use]
    pub fn sfr(reg: u8) -> Self {
        Self(0xFF00 | u16::from(reg))
    }

    /// The two address bytes, MSB first
    #[must_use]
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

/// Configuration parameter bits for `SetParameters` (UM0701-02 §7.2.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Parameters {
    /// Use NAD information (initiator mode)
    pub use_nad_data: bool,
    /// Use DID information (initiator mode)
    pub use_did_data: bool,
    /// Automatic generation of ATR_RES (target mode)
    pub auto_generate_atr_res: bool,
    /// Automatic generation of RATS (ISO 14443-4 PCD mode)
    pub auto_generate_rats: bool,
    /// Emulate an ISO 14443-4 PICC
    pub enable_iso_14443_4_picc_emulation: bool,
    /// Remove pre- and postamble from frames
    pub remove_pre_post_amble: bool,
}

impl Parameters {
    /// Flag byte as sent on the wire
    #[must_use]
    pub fn bits(self) -> u8 {
        u8::from(self.use_nad_data)
            | u8::from(self.use_did_data) << 1
            | u8::from(self.auto_generate_atr_res) << 2
            | u8::from(self.auto_generate_rats) << 4
            | u8::from(self.enable_iso_14443_4_picc_emulation) << 5
            | u8::from(self.remove_pre_post_amble) << 6
    }
}

/// RF analog settings for 106 kbps type A (UM0701-02 §7.3.1), with the
/// power-up defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ciu106kbpsTypeA {
    pub rf_cfg: u8,
    pub gs_n_on: u8,
    pub cw_gs_p: u8,
    pub mod_gs_p: u8,
    pub demod_own_rf_on: u8,
    pub rx_threshold: u8,
    pub demod_own_rf_off: u8,
    pub gs_n_off: u8,
    pub mod_width: u8,
    pub mif_nfc: u8,
    pub tx_bit_phase: u8,
}

impl Default for Ciu106kbpsTypeA {
    fn default() -> Self {
        Self {
            rf_cfg: 0x59,
            gs_n_on: 0xF4,
            cw_gs_p: 0x3F,
            mod_gs_p: 0x11,
            demod_own_rf_on: 0x4D,
            rx_threshold: 0x85,
            demod_own_rf_off: 0x61,
            gs_n_off: 0x6F,
            mod_width: 0x26,
            mif_nfc: 0x62,
            tx_bit_phase: 0x87,
        }
    }
}

impl Ciu106kbpsTypeA {
    pub(crate) fn serialize(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[
            self.rf_cfg,
            self.gs_n_on,
            self.cw_gs_p,
            self.mod_gs_p,
            self.demod_own_rf_on,
            self.rx_threshold,
            self.demod_own_rf_off,
            self.gs_n_off,
            self.mod_width,
            self.mif_nfc,
            self.tx_bit_phase,
        ]);
    }
}

/// RF analog settings for 212/424 kbps (UM0701-02 §7.3.1), with the
/// power-up defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ciu212_424kbps {
    pub rf_cfg: u8,
    pub gs_n_on: u8,
    pub cw_gs_p: u8,
    pub mod_gs_p: u8,
    pub demod_own_rf_on: u8,
    pub rx_threshold: u8,
    pub demod_own_rf_off: u8,
    pub gs_n_off: u8,
}

impl Default for Ciu212_424kbps {
    fn default() -> Self {
        Self {
            rf_cfg: 0x69,
            gs_n_on: 0xFF,
            cw_gs_p: 0x3F,
            mod_gs_p: 0x11,
            demod_own_rf_on: 0x41,
            rx_threshold: 0x85,
            demod_own_rf_off: 0x61,
            gs_n_off: 0x6F,
        }
    }
}

impl Ciu212_424kbps {
    pub(crate) fn serialize(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[
            self.rf_cfg,
            self.gs_n_on,
            self.cw_gs_p,
            self.mod_gs_p,
            self.demod_own_rf_on,
            self.rx_threshold,
            self.demod_own_rf_off,
            self.gs_n_off,
        ]);
    }
}

/// RF analog settings for type B (UM0701-02 §7.3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CiuTypeB {
    pub gs_n_on: u8,
    pub mod_gs_p: u8,
    pub rx_threshold: u8,
}

impl Default for CiuTypeB {
    fn default() -> Self {
        Self {
            gs_n_on: 0xFF,
            mod_gs_p: 0x17,
            rx_threshold: 0x85,
        }
    }
}

impl CiuTypeB {
    pub(crate) fn serialize(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.gs_n_on, self.mod_gs_p, self.rx_threshold]);
    }
}

/// RF analog settings for one ISO/IEC14443-4 baudrate (UM0701-02 §7.3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CiuIso14443_4AtBaudrate {
    pub rx_threshold: u8,
    pub mod_width: u8,
    pub mif_nfc: u8,
}

/// RF analog settings for ISO/IEC14443-4 at 212/424/848 kbps
/// (UM0701-02 §7.3.1), with the power-up defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CiuIso14443_4 {
    pub kbps212: CiuIso14443_4AtBaudrate,
    pub kbps424: CiuIso14443_4AtBaudrate,
    pub kbps848: CiuIso14443_4AtBaudrate,
}

impl Default for CiuIso14443_4 {
    fn default() -> Self {
        Self {
            kbps212: CiuIso14443_4AtBaudrate {
                rx_threshold: 0x85,
                mod_width: 0x15,
                mif_nfc: 0x8A,
            },
            kbps424: CiuIso14443_4AtBaudrate {
                rx_threshold: 0x85,
                mod_width: 0x08,
                mif_nfc: 0xB2,
            },
            kbps848: CiuIso14443_4AtBaudrate {
                rx_threshold: 0x85,
                mod_width: 0x01,
                mif_nfc: 0xDA,
            },
        }
    }
}

impl CiuIso14443_4 {
    pub(crate) fn serialize(self, out: &mut Vec<u8>) {
        for at in [self.kbps212, self.kbps424, self.kbps848] {
            out.extend_from_slice(&[at.rx_threshold, at.mod_width, at.mif_nfc]);
        }
    }
}

/// Result of `InJumpForDEP`/`InJumpForPSL` (UM0701-02 §7.3.3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpDepPsl {
    /// RF communication status
    pub status: RfStatus,
    /// Logical index assigned to the activated target
    pub target_logical_index: u8,
    /// ATR_RES sent by the target
    pub atr_info: AtrResInfo,
}

/// Activation state of the PN532 as a target (UM0701-02 §7.3.21)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nfcip1PiccStatus {
    /// Waiting for an initiator or released (NFCIP-1)
    Nfcip1Idle,
    /// Activated as NFCIP-1 target
    Nfcip1Activated,
    /// Deselected by the initiator (NFCIP-1)
    Nfcip1Deselected,
    /// Released by the PCD, no RF field detected (ISO/IEC14443-4 PICC)
    PiccReleased,
    /// Activated as ISO/IEC14443-4 PICC
    PiccActivated,
    /// Deselected by the PCD (ISO/IEC14443-4 PICC)
    PiccDeselected,
    /// Undocumented state byte
    Other(u8),
}

impl Nfcip1PiccStatus {
    fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Nfcip1Idle,
            0x01 => Self::Nfcip1Activated,
            0x02 => Self::Nfcip1Deselected,
            0x80 => Self::PiccReleased,
            0x81 => Self::PiccActivated,
            0x82 => Self::PiccDeselected,
            byte => Self::Other(byte),
        }
    }
}

/// Data returned by `TgGetTargetStatus` (UM0701-02 §7.3.21)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusAsTarget {
    /// Activation state
    pub status: Nfcip1PiccStatus,
    /// Bit rate towards the initiator
    pub initiator_speed: Baudrate,
    /// Bit rate towards the target
    pub target_speed: Baudrate,
}

impl StatusAsTarget {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        let state = reader.u8()?;
        let speeds = reader.u8()?;
        Some(Self {
            status: Nfcip1PiccStatus::from_byte(state),
            initiator_speed: Baudrate::from_byte(speeds >> 4),
            target_speed: Baudrate::from_byte(speeds),
        })
    }
}

/// Framing to use when operating as a target (UM0701-02 §7.3.14)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FramingAsTarget {
    /// Mifare framing
    Mifare = 0b00,
    /// Active mode
    ActiveMode = 0b01,
    /// FeliCa framing
    Felica = 0b10,
}

/// Mifare parameter block for `TgInitAsTarget` (UM0701-02 §7.3.14)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MifareParams {
    /// SENS_RES bytes
    pub sens_res: [u8; 2],
    /// First three NFCID1 bytes
    pub nfcid_1t: [u8; 3],
    /// SEL_RES byte
    pub sel_res: u8,
}

/// FeliCa parameter block for `TgInitAsTarget` (UM0701-02 §7.3.14)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FelicaParams {
    /// NFCID2, includes the cascade byte
    pub nfcid_2t: [u8; 8],
    /// Padding bytes
    pub pad: [u8; 8],
    /// SYST_CODE
    pub syst_code: [u8; 2],
}

/// Mode in which the PN532 was activated as a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationAsTargetMode {
    /// Transmission bit rate
    pub speed: Baudrate,
    /// Activated as ISO/IEC 14443-4 PICC
    pub iso_iec_14443_4_picc: bool,
    /// Activated with DEP
    pub dep: bool,
    /// Framing in use
    pub framing: FramingAsTarget,
}

/// Result of `TgInitAsTarget` (UM0701-02 §7.3.14)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationAsTarget {
    /// Activation mode byte, decoded
    pub mode: ActivationAsTargetMode,
    /// First frame received from the initiator
    pub initiator_command: Vec<u8>,
}

impl ActivationAsTarget {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        let mode = reader.u8()?;
        let framing = match mode & 0b11 {
            0b01 => FramingAsTarget::ActiveMode,
            0b10 => FramingAsTarget::Felica,
            _ => FramingAsTarget::Mifare,
        };
        Some(Self {
            mode: ActivationAsTargetMode {
                speed: Baudrate::from_byte(mode >> 4),
                iso_iec_14443_4_picc: mode & (1 << 3) != 0,
                dep: mode & (1 << 2) != 0,
                framing,
            },
            initiator_command: reader.take_rest().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_reply_codes() {
        assert_eq!(Command::GetFirmwareVersion.code(), 0x02);
        assert_eq!(Command::GetFirmwareVersion.reply_code(), 0x03);
        assert_eq!(Command::InDataExchange.reply_code(), 0x41);
        assert_eq!(Command::TgInitAsTarget.reply_code(), 0x8D);
    }

    #[test]
    fn rf_status_bit_split() {
        let status = RfStatus::from_byte(0x00);
        assert!(status.is_ok());
        assert!(!status.nad_present);
        assert!(!status.expect_more_info);

        // More-info bit plus timeout code
        let status = RfStatus::from_byte(0x41);
        assert!(status.expect_more_info);
        assert_eq!(status.error, InternalError::Timeout);

        let status = RfStatus::from_byte(0x8A);
        assert!(status.nad_present);
        assert_eq!(status.error, InternalError::CounterpartRfOff);
    }

    #[test]
    fn internal_error_codes_distinct() {
        // Every documented code maps to a named error, everything else to Other
        for code in [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x09, 0x0A, 0x0B, 0x0D, 0x0E, 0x10, 0x12,
            0x13, 0x14, 0x23, 0x25, 0x26, 0x27, 0x29, 0x2A, 0x2B, 0x2C, 0x2D, 0x2E,
        ] {
            assert!(!InternalError::from_code(code).is_ok());
            assert!(!matches!(InternalError::from_code(code), InternalError::Other(_)));
        }
        assert!(matches!(InternalError::from_code(0x3F), InternalError::Other(0x3F)));
    }

    #[test]
    fn target_type_baudrate_modulation() {
        assert_eq!(
            TargetType::Passive106kbpsIso14443_4TypeA.baudrate_modulation(),
            BaudrateModulation::Kbps106TypeA
        );
        assert_eq!(
            TargetType::Felica212kbps.baudrate_modulation(),
            BaudrateModulation::Kbps212Felica
        );
        assert_eq!(
            TargetType::DepPassive424kbps.baudrate_modulation(),
            BaudrateModulation::Kbps424Felica
        );
        assert!(TargetType::DepActive106kbps.is_dep_active());
        assert!(TargetType::DepPassive106kbps.is_dep());
        assert!(!TargetType::MifareClassicUltralight.is_dep());
    }

    #[test]
    fn parse_type_a_target() {
        // Target record: index, SENS_RES, SEL_RES, NFCID length, NFCID
        let bytes = [0x01, 0x00, 0x04, 0x08, 0x04, 0xDE, 0xAD, 0xBE, 0xEF];
        let target = TargetTypeA::parse(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(target.logical_index, 1);
        assert_eq!(target.sens_res, [0x00, 0x04]);
        assert_eq!(target.sel_res, 0x08);
        assert_eq!(target.nfcid, [0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(target.ats.is_empty());
    }

    #[test]
    fn parameters_bits() {
        let mut params = Parameters::default();
        assert_eq!(params.bits(), 0);
        params.auto_generate_rats = true;
        params.use_nad_data = true;
        assert_eq!(params.bits(), 0b0001_0001);
    }

    #[test]
    fn wake_sources_bitmap() {
        assert_eq!(WakeSources::none().bits(), 0);
        assert_eq!(WakeSources::none().i2c().spi().hsu().bits(), 0b1011_0000);
        assert_eq!(WakeSources::none().rf().int0().int1().bits(), 0b0000_1011);
    }

    #[test]
    fn register_addr() {
        assert_eq!(RegisterAddr::sfr(0xA9).to_bytes(), [0xFF, 0xA9]);
        assert_eq!(RegisterAddr(0x6331).to_bytes(), [0x63, 0x31]);
    }
}
