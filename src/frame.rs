//! PN532 host frame codec (UM0701-02 §6.2)
//!
//! Frames exchanged between host and PN532 share one envelope: an optional
//! preamble `00`, the start-of-packet code `00 FF`, a length field with
//! checksum (standard or extended), the body, a data checksum and an
//! optional postamble `00`. Ack/nack frames carry no body; an info frame
//! whose body is the single byte `7F` is an application-level error frame.
//!
//! Decoding is split in two stages so that channels which cannot read a
//! frame incrementally can size their reads: [`FrameId`] is parsed from a
//! short prefix and predicts the total frame length, then the full byte
//! sequence is decoded into a [`Frame`].

use alloc::vec::Vec;
use core::fmt;
use log::warn;

/// Preamble/postamble filler byte
pub const PREAMBLE: u8 = 0x00;
/// Postamble filler byte
pub const POSTAMBLE: u8 = 0x00;
/// Start of packet code (UM0701-02 §6.2.1.1)
pub const START_OF_PACKET: [u8; 2] = [0x00, 0xFF];
/// Frame code of an ack frame (UM0701-02 §6.2.1.3)
pub const ACK_CODE: [u8; 2] = [0x00, 0xFF];
/// Frame code of a nack frame (UM0701-02 §6.2.1.4)
pub const NACK_CODE: [u8; 2] = [0xFF, 0x00];
/// Length marker announcing an extended info frame (UM0701-02 §6.2.1.2)
pub const EXTENDED_LENGTH_CODE: [u8; 2] = [0xFF, 0xFF];
/// Body of an application-level error frame (UM0701-02 §6.2.1.5)
pub const ERROR_CODE: u8 = 0x7F;

/// Frame identifier byte for host to PN532 transfers
pub const HOST_TO_PN532: u8 = 0xD4;
/// Frame identifier byte for PN532 to host transfers
pub const PN532_TO_HOST: u8 = 0xD5;

/// Maximum number of command payload bytes the PN532 firmware accepts in
/// one frame, on top of frame identifier and command code
/// (UM0701-02 §6.2.1.2)
pub const MAX_PAYLOAD_LEN: usize = 263;

/// Number of prefix bytes that suffice to classify any frame and, for a
/// standard info frame, to know its length. Extended info frames need
/// `MAX_HEADER_LEN` bytes.
pub const MIN_HEADER_LEN: usize = 6;

/// Number of prefix bytes that suffice to determine the length of any
/// frame, including extended info frames: preamble, start of packet, `FF FF`
/// and the three extended length bytes.
pub const MAX_HEADER_LEN: usize = 8;

/// Two's complement checksum byte: `(sum + checksum) % 256 == 0`
#[must_use]
pub const fn checksum(sum: u8) -> u8 {
    (!sum).wrapping_add(1)
}

/// Sum of a byte sequence, wrapping around `u8`
fn sum(data: &[u8]) -> u8 {
    data.iter().fold(0, |s, &b| s.wrapping_add(b))
}

/// Direction of an info frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Frame travels from the host to the PN532
    HostToPn532,
    /// Frame travels from the PN532 to the host
    Pn532ToHost,
}

impl Transport {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            HOST_TO_PN532 => Some(Self::HostToPn532),
            PN532_TO_HOST => Some(Self::Pn532ToHost),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::HostToPn532 => HOST_TO_PN532,
            Self::Pn532ToHost => PN532_TO_HOST,
        }
    }
}

/// Any frame transmitted between host and PN532 (UM0701-02 §6.2.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Previous communication was acknowledged
    Ack,
    /// Previous communication has to be repeated
    Nack,
    /// Application-level error frame
    Error,
    /// Frame carrying data: direction, command code, command data
    Info {
        /// Direction in which the frame travels
        transport: Transport,
        /// Raw command code (request or reply code)
        command: u8,
        /// Command payload
        data: Vec<u8>,
    },
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => write!(f, "ack"),
            Self::Nack => write!(f, "nack"),
            Self::Error => write!(f, "error"),
            Self::Info { command, data, .. } => {
                write!(f, "info({command:#04x}, {} bytes)", data.len())
            }
        }
    }
}

/// Frame kind determined by the first decoding stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Ack frame
    Ack,
    /// Nack frame
    Nack,
    /// Info frame (standard or extended); error frames are only detected in
    /// stage two, since they are info frames with a special body
    Info,
}

/// Partial parse of a frame prefix
///
/// Produced by [`FrameId::parse`] from the first few received bytes. It
/// determines the frame kind and the total frame length, so channels which
/// read whole buffers (see [`crate::channel::RecvMode::Buffered`]) know how
/// many bytes to request on the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId {
    /// Frame kind
    pub kind: FrameKind,
    /// True if the frame starts with a preamble byte (a postamble is then
    /// expected at the end as well)
    pub has_preamble: bool,
    /// Total frame length in bytes, including pre/postamble if present
    pub frame_len: usize,
    /// Body length of an info frame (frame identifier + command + data), 0
    /// for ack/nack
    pub body_len: usize,
}

/// Frame codec error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Not enough bytes to complete this parsing stage; the contained
    /// amount is the total number of bytes needed
    Incomplete(usize),
    /// Start of packet code not found
    BadSop,
    /// Length checksum mismatch
    BadLengthChecksum,
    /// Data checksum mismatch
    BadDataChecksum,
    /// Frame structure is invalid (bad length, missing frame identifier)
    Malformed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete(n) => write!(f, "Need {n} bytes to parse frame"),
            Self::BadSop => write!(f, "Start of packet code not found"),
            Self::BadLengthChecksum => write!(f, "Length checksum mismatch"),
            Self::BadDataChecksum => write!(f, "Data checksum mismatch"),
            Self::Malformed => write!(f, "Malformed frame"),
        }
    }
}

impl FrameId {
    /// First decoding stage: classify a frame and determine its length
    ///
    /// Needs at least `MIN_HEADER_LEN` bytes; extended info frames are only
    /// fully sized with `MAX_HEADER_LEN` bytes and yield
    /// [`Error::Incomplete`] otherwise.
    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < MIN_HEADER_LEN {
            return Err(Error::Incomplete(MIN_HEADER_LEN));
        }
        // Optional preamble in front of the start of packet code
        let (has_preamble, ofs) = if buf[0] == PREAMBLE && buf[1..3] == START_OF_PACKET {
            (true, 3)
        } else if buf[0..2] == START_OF_PACKET {
            (false, 2)
        } else {
            return Err(Error::BadSop);
        };
        let trailer = usize::from(has_preamble);
        let code = [buf[ofs], buf[ofs + 1]];
        if code == ACK_CODE {
            return Ok(Self {
                kind: FrameKind::Ack,
                has_preamble,
                frame_len: ofs + 2 + trailer,
                body_len: 0,
            });
        }
        if code == NACK_CODE {
            return Ok(Self {
                kind: FrameKind::Nack,
                has_preamble,
                frame_len: ofs + 2 + trailer,
                body_len: 0,
            });
        }
        if code == EXTENDED_LENGTH_CODE {
            // Extended info frame: 2-byte length plus length checksum
            if buf.len() < ofs + 5 {
                return Err(Error::Incomplete(ofs + 5));
            }
            let (hi, lo, lcs) = (buf[ofs + 2], buf[ofs + 3], buf[ofs + 4]);
            if hi.wrapping_add(lo).wrapping_add(lcs) != 0 {
                return Err(Error::BadLengthChecksum);
            }
            let body_len = usize::from(hi) * 256 + usize::from(lo);
            Ok(Self {
                kind: FrameKind::Info,
                has_preamble,
                frame_len: ofs + 5 + body_len + 1 + trailer,
                body_len,
            })
        } else {
            // Standard info frame: length byte plus length checksum
            let (len, lcs) = (code[0], code[1]);
            if len.wrapping_add(lcs) != 0 {
                return Err(Error::BadLengthChecksum);
            }
            let body_len = usize::from(len);
            Ok(Self {
                kind: FrameKind::Info,
                has_preamble,
                frame_len: ofs + 2 + body_len + 1 + trailer,
                body_len,
            })
        }
    }
}

impl Frame {
    /// Build an info frame for the given command and payload
    ///
    /// Payloads longer than the firmware limit are truncated with a
    /// warning. The extended frame format is selected automatically
    /// whenever the body does not fit the single length byte.
    #[must_use]
    pub fn info(command: u8, data: &[u8]) -> Self {
        let data = if data.len() > MAX_PAYLOAD_LEN {
            warn!(
                "PN532: payload of command {command:#04x} too long, truncating {} to {} bytes",
                data.len(),
                MAX_PAYLOAD_LEN
            );
            &data[..MAX_PAYLOAD_LEN]
        } else {
            data
        };
        Self::Info {
            transport: Transport::HostToPn532,
            command,
            data: data.to_vec(),
        }
    }

    /// Encode this frame into raw bytes, including pre- and postamble
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Self::Ack => {
                let mut bytes = Vec::with_capacity(6);
                bytes.push(PREAMBLE);
                bytes.extend_from_slice(&START_OF_PACKET);
                bytes.extend_from_slice(&ACK_CODE);
                bytes.push(POSTAMBLE);
                bytes
            }
            Self::Nack => {
                let mut bytes = Vec::with_capacity(6);
                bytes.push(PREAMBLE);
                bytes.extend_from_slice(&START_OF_PACKET);
                bytes.extend_from_slice(&NACK_CODE);
                bytes.push(POSTAMBLE);
                bytes
            }
            // 00 00 FF 01 FF 7F 81 00 (UM0701-02 §6.2.1.5)
            Self::Error => {
                let mut bytes = Vec::with_capacity(8);
                bytes.push(PREAMBLE);
                bytes.extend_from_slice(&START_OF_PACKET);
                bytes.extend_from_slice(&[0x01, 0xFF, ERROR_CODE, checksum(ERROR_CODE)]);
                bytes.push(POSTAMBLE);
                bytes
            }
            Self::Info {
                transport,
                command,
                data,
            } => {
                // Body is frame identifier + command code + data
                let body_len = data.len() + 2;
                let mut bytes = Vec::with_capacity(body_len + 10);
                bytes.push(PREAMBLE);
                bytes.extend_from_slice(&START_OF_PACKET);
                if body_len > 0xFF {
                    #[allow(clippy::cast_possible_truncation)]
                    let (hi, lo) = ((body_len >> 8) as u8, (body_len & 0xFF) as u8);
                    bytes.extend_from_slice(&EXTENDED_LENGTH_CODE);
                    bytes.push(hi);
                    bytes.push(lo);
                    bytes.push(checksum(hi.wrapping_add(lo)));
                } else {
                    #[allow(clippy::cast_possible_truncation)]
                    let len = body_len as u8;
                    bytes.push(len);
                    bytes.push(checksum(len));
                }
                let dcs = checksum(
                    transport
                        .to_byte()
                        .wrapping_add(*command)
                        .wrapping_add(sum(data)),
                );
                bytes.push(transport.to_byte());
                bytes.push(*command);
                bytes.extend_from_slice(data);
                bytes.push(dcs);
                bytes.push(POSTAMBLE);
                bytes
            }
        }
    }

    /// Second decoding stage: decode a full frame
    ///
    /// `buf` must contain the whole frame (at least [`FrameId::frame_len`]
    /// bytes, trailing garbage is ignored) and must start with the same
    /// bytes from which `id` was parsed.
    pub fn parse(id: FrameId, buf: &[u8]) -> Result<Self, Error> {
        match id.kind {
            FrameKind::Ack => Ok(Self::Ack),
            FrameKind::Nack => Ok(Self::Nack),
            FrameKind::Info => {
                if buf.len() < id.frame_len {
                    return Err(Error::Incomplete(id.frame_len));
                }
                // Body starts after preamble, start of packet and length
                let trailer = usize::from(id.has_preamble);
                let body_start = id.frame_len - trailer - 1 - id.body_len;
                let body = &buf[body_start..body_start + id.body_len];
                let dcs = buf[body_start + id.body_len];
                if sum(body).wrapping_add(dcs) != 0 {
                    return Err(Error::BadDataChecksum);
                }
                if id.body_len == 1 && body[0] == ERROR_CODE {
                    return Ok(Self::Error);
                }
                if id.body_len < 2 {
                    return Err(Error::Malformed);
                }
                let Some(transport) = Transport::from_byte(body[0]) else {
                    return Err(Error::Malformed);
                };
                Ok(Self::Info {
                    transport,
                    command: body[1],
                    data: body[2..].to_vec(),
                })
            }
        }
    }
}
