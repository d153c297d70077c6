//! Typed DESFire entities: status codes, keys, access rights, application
//! and file settings, card information

use super::crypto::{get_key_version, set_key_version};
use crate::bytes::{Reader, put_u24_le};
use alloc::vec::Vec;
use core::fmt;

/// Application identifier, three bytes in wire order (least significant
/// byte first)
pub type AppId = [u8; 3];

/// The PICC-level root application
pub const ROOT_APP: AppId = [0x00, 0x00, 0x00];

/// File identifier within an application (0..=31)
pub type FileId = u8;

/// Marker for "all records" in record file reads
pub const ALL_RECORDS: u32 = 0;

/// Maximum number of keys an application can store (numbers 0..=13)
pub const MAX_KEYS_PER_APP: u8 = 14;

/// DESFire command codes (subset the session layer speaks)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    /// Legacy authentication (DES, 2K3DES)
    AuthenticateLegacy = 0x0A,
    /// ISO authentication (3K3DES)
    AuthenticateIso = 0x1A,
    /// AES authentication
    AuthenticateAes = 0xAA,
    /// Create application
    CreateApplication = 0xCA,
    /// Delete application
    DeleteApplication = 0xDA,
    /// List application identifiers
    GetApplicationIds = 0x6A,
    /// Select application
    SelectApplication = 0x5A,
    /// Format the PICC
    FormatPicc = 0xFC,
    /// Read application key settings
    GetKeySettings = 0x45,
    /// Change application key settings
    ChangeKeySettings = 0x54,
    /// Change a key
    ChangeKey = 0xC4,
    /// Read a key version
    GetKeyVersion = 0x64,
    /// Card manufacturing information
    GetVersion = 0x60,
    /// Real card UID (requires authentication)
    GetCardUid = 0x51,
    /// Remaining NV memory
    GetFreeMem = 0x6E,
    /// PICC configuration (format lock, random UID)
    SetConfiguration = 0x5C,
    /// List file identifiers
    GetFileIds = 0x6F,
    /// Read file settings
    GetFileSettings = 0xF5,
    /// Change file settings
    ChangeFileSettings = 0x5F,
    /// Create standard data file
    CreateStdDataFile = 0xCD,
    /// Create backup data file
    CreateBackupDataFile = 0xCB,
    /// Create value file
    CreateValueFile = 0xCC,
    /// Create linear record file
    CreateLinearRecordFile = 0xC1,
    /// Create cyclic record file
    CreateCyclicRecordFile = 0xC0,
    /// Delete file
    DeleteFile = 0xDF,
    /// Read from a data file
    ReadData = 0xBD,
    /// Write to a data file
    WriteData = 0x3D,
    /// Read a value file
    GetValue = 0x6C,
    /// Increment a value file
    Credit = 0x0C,
    /// Decrement a value file
    Debit = 0xDC,
    /// Increment a value file within the limited-credit budget
    LimitedCredit = 0x1C,
    /// Read records
    ReadRecords = 0xBB,
    /// Write a record
    WriteRecord = 0x3B,
    /// Clear a record file
    ClearRecordFile = 0xEB,
    /// Commit a transaction
    CommitTransaction = 0xC7,
    /// Abort a transaction
    AbortTransaction = 0xA7,
    /// Additional frame (chaining)
    AdditionalFrame = 0xAF,
}

impl CommandCode {
    /// Command byte as sent on the wire
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// DESFire status byte (subset relevant to the protocol flow)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation successful
    Ok,
    /// Operation successful, no changes were made
    NoChanges,
    /// More data follows, the host must issue an additional frame
    AdditionalFrame,
    /// Any other status; carries the raw code
    Error(u8),
}

/// Status code of an additional frame
pub const STATUS_ADDITIONAL_FRAME: u8 = 0xAF;

impl Status {
    /// Decode a status byte
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Ok,
            0x0C => Self::NoChanges,
            STATUS_ADDITIONAL_FRAME => Self::AdditionalFrame,
            byte => Self::Error(byte),
        }
    }

    /// True for [`Status::Ok`] and [`Status::NoChanges`]
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::NoChanges)
    }
}

/// DESFire error
///
/// Card-reported status codes, plus three conditions synthesized by this
/// layer: [`Error::ControllerError`] for failures below the card protocol,
/// [`Error::Malformed`] for unparseable card data and [`Error::CryptoError`]
/// for failed MAC/CMAC/CRC or block size checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Insufficient NV memory to complete the command
    OutOfEeprom,
    /// Command code not supported
    IllegalCommand,
    /// CRC or MAC does not match, card-side
    IntegrityError,
    /// Invalid key number specified
    NoSuchKey,
    /// Length of command string invalid
    LengthError,
    /// Current configuration/state does not allow the command
    PermissionDenied,
    /// Value of the parameter invalid
    ParameterError,
    /// Requested application not present
    AppNotFound,
    /// Unrecoverable error within an application
    AppIntegrityError,
    /// Current authentication status does not allow the command
    AuthenticationError,
    /// Attempt to read/write beyond the limits
    BoundaryError,
    /// Unrecoverable error within the PICC
    PiccIntegrityError,
    /// Previous command was not fully completed
    CommandAborted,
    /// PICC was disabled by an unrecoverable error
    PiccDisabled,
    /// Application count limit reached
    CountError,
    /// File or application already exists
    DuplicateError,
    /// NV memory write error
    EepromError,
    /// Specified file number does not exist
    FileNotFound,
    /// Unrecoverable error within a file
    FileIntegrityError,
    /// Status code with no dedicated name
    UnknownStatus(u8),
    /// The PN532 layer failed; the card was never reached or the exchange
    /// broke below the card protocol
    ControllerError,
    /// Card data could not be parsed
    Malformed,
    /// MAC/CMAC/CRC mismatch, bad block size, or a failed authentication
    /// random challenge
    CryptoError,
}

impl Error {
    /// Map an error status byte to its named error
    #[must_use]
    pub fn from_status(byte: u8) -> Self {
        match byte {
            0x0E => Self::OutOfEeprom,
            0x1C => Self::IllegalCommand,
            0x1E => Self::IntegrityError,
            0x40 => Self::NoSuchKey,
            0x7E => Self::LengthError,
            0x9D => Self::PermissionDenied,
            0x9E => Self::ParameterError,
            0xA0 => Self::AppNotFound,
            0xA1 => Self::AppIntegrityError,
            0xAE => Self::AuthenticationError,
            0xBE => Self::BoundaryError,
            0xC1 => Self::PiccIntegrityError,
            0xCA => Self::CommandAborted,
            0xCD => Self::PiccDisabled,
            0xCE => Self::CountError,
            0xDE => Self::DuplicateError,
            0xEE => Self::EepromError,
            0xF0 => Self::FileNotFound,
            0xF1 => Self::FileIntegrityError,
            byte => Self::UnknownStatus(byte),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfEeprom => write!(f, "Out of NV memory"),
            Self::IllegalCommand => write!(f, "Illegal command"),
            Self::IntegrityError => write!(f, "Integrity error"),
            Self::NoSuchKey => write!(f, "No such key"),
            Self::LengthError => write!(f, "Length error"),
            Self::PermissionDenied => write!(f, "Permission denied"),
            Self::ParameterError => write!(f, "Parameter error"),
            Self::AppNotFound => write!(f, "Application not found"),
            Self::AppIntegrityError => write!(f, "Application integrity error"),
            Self::AuthenticationError => write!(f, "Authentication error"),
            Self::BoundaryError => write!(f, "Boundary error"),
            Self::PiccIntegrityError => write!(f, "PICC integrity error"),
            Self::CommandAborted => write!(f, "Command aborted"),
            Self::PiccDisabled => write!(f, "PICC disabled"),
            Self::CountError => write!(f, "Count error"),
            Self::DuplicateError => write!(f, "Duplicate error"),
            Self::EepromError => write!(f, "NV memory error"),
            Self::FileNotFound => write!(f, "File not found"),
            Self::FileIntegrityError => write!(f, "File integrity error"),
            Self::UnknownStatus(byte) => write!(f, "Unknown status {byte:#04x}"),
            Self::ControllerError => write!(f, "Controller error"),
            Self::Malformed => write!(f, "Malformed card data"),
            Self::CryptoError => write!(f, "Cryptographic verification failed"),
        }
    }
}

/// Result of DESFire operations
pub type Result<T = ()> = core::result::Result<T, Error>;

/// Cipher families a DESFire key can belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherType {
    /// Single DES, 8-byte key
    Des,
    /// 2-key triple DES, 16-byte key
    Des3_2k,
    /// 3-key triple DES, 24-byte key
    Des3_3k,
    /// AES-128, 16-byte key
    Aes128,
}

impl CipherType {
    /// True for the legacy secure messaging family (DES, 2K3DES)
    #[must_use]
    pub fn is_legacy(self) -> bool {
        matches!(self, Self::Des | Self::Des3_2k)
    }

    /// Block size of the cipher in bytes
    #[must_use]
    pub fn block_size(self) -> usize {
        match self {
            Self::Aes128 => 16,
            _ => 8,
        }
    }
}

/// A DESFire key: key number, key material and version
///
/// DES-family keys encode their version in the parity bits (the least
/// significant bit of each of the first 8 bytes); AES keys carry it as a
/// separate byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    /// Single DES key
    Des {
        /// Key number (0..=13)
        key_no: u8,
        /// Key material; parity bits hold the version
        key: [u8; 8],
    },
    /// 2-key triple DES key
    Des3_2k {
        /// Key number (0..=13)
        key_no: u8,
        /// Key material; parity bits hold the version
        key: [u8; 16],
    },
    /// 3-key triple DES key
    Des3_3k {
        /// Key number (0..=13)
        key_no: u8,
        /// Key material; parity bits hold the version
        key: [u8; 24],
    },
    /// AES-128 key
    Aes128 {
        /// Key number (0..=13)
        key_no: u8,
        /// Key material
        key: [u8; 16],
        /// Key version byte
        version: u8,
    },
}

impl Key {
    /// Single DES key
    #[must_use]
    pub fn des(key_no: u8, key: [u8; 8]) -> Self {
        Self::Des { key_no, key }
    }

    /// Single DES key with the version encoded into the parity bits
    #[must_use]
    pub fn des_with_version(key_no: u8, mut key: [u8; 8], version: u8) -> Self {
        set_key_version(&mut key, version);
        Self::Des { key_no, key }
    }

    /// 2-key triple DES key
    #[must_use]
    pub fn des3_2k(key_no: u8, key: [u8; 16]) -> Self {
        Self::Des3_2k { key_no, key }
    }

    /// 2-key triple DES key with the version encoded into the parity bits
    #[must_use]
    pub fn des3_2k_with_version(key_no: u8, mut key: [u8; 16], version: u8) -> Self {
        set_key_version(&mut key, version);
        Self::Des3_2k { key_no, key }
    }

    /// 3-key triple DES key
    #[must_use]
    pub fn des3_3k(key_no: u8, key: [u8; 24]) -> Self {
        Self::Des3_3k { key_no, key }
    }

    /// 3-key triple DES key with the version encoded into the parity bits
    #[must_use]
    pub fn des3_3k_with_version(key_no: u8, mut key: [u8; 24], version: u8) -> Self {
        set_key_version(&mut key, version);
        Self::Des3_3k { key_no, key }
    }

    /// AES-128 key with a version byte
    #[must_use]
    pub fn aes128(key_no: u8, key: [u8; 16], version: u8) -> Self {
        Self::Aes128 { key_no, key, version }
    }

    /// Key number on the card (0..=13)
    #[must_use]
    pub fn key_no(&self) -> u8 {
        match self {
            Self::Des { key_no, .. }
            | Self::Des3_2k { key_no, .. }
            | Self::Des3_3k { key_no, .. }
            | Self::Aes128 { key_no, .. } => *key_no,
        }
    }

    /// Key version (parity bits for the DES family, explicit for AES)
    #[must_use]
    pub fn version(&self) -> u8 {
        match self {
            Self::Des { key, .. } => get_key_version(key),
            Self::Des3_2k { key, .. } => get_key_version(key),
            Self::Des3_3k { key, .. } => get_key_version(key),
            Self::Aes128 { version, .. } => *version,
        }
    }

    /// Cipher family of this key
    #[must_use]
    pub fn cipher_type(&self) -> CipherType {
        match self {
            Self::Des { .. } => CipherType::Des,
            Self::Des3_2k { .. } => CipherType::Des3_2k,
            Self::Des3_3k { .. } => CipherType::Des3_3k,
            Self::Aes128 { .. } => CipherType::Aes128,
        }
    }

    /// True if the version lives in the parity bits of the key material
    #[must_use]
    pub fn parity_bits_are_version(&self) -> bool {
        !matches!(self, Self::Aes128 { .. })
    }

    /// Key material as transmitted in a change-key cryptogram
    ///
    /// DESFire stores DES keys as 16 bytes, so a single DES key is doubled.
    /// The AES version byte is not included (it is appended separately).
    #[must_use]
    pub fn packed_body(&self) -> Vec<u8> {
        match self {
            Self::Des { key, .. } => {
                let mut body = key.to_vec();
                body.extend_from_slice(key);
                body
            }
            Self::Des3_2k { key, .. } => key.to_vec(),
            Self::Des3_3k { key, .. } => key.to_vec(),
            Self::Aes128 { key, .. } => key.to_vec(),
        }
    }

    /// Derive the session key of a successful authentication from the two
    /// exchanged random numbers
    ///
    /// A 2K3DES key whose halves coincide is cryptographically plain DES;
    /// its session key duplicates the DES half pair so the card and host
    /// agree.
    #[must_use]
    pub fn session_key(&self, rnd_a: &[u8], rnd_b: &[u8]) -> Self {
        // Note: the `try_into` calls below are always safe to unwrap
        // because they slice fixed ranges out of the scratch array
        let mut key = [0u8; 24];
        match self {
            Self::Des { key_no, .. } => {
                key[0..4].copy_from_slice(&rnd_a[0..4]);
                key[4..8].copy_from_slice(&rnd_b[0..4]);
                Self::Des {
                    key_no: *key_no,
                    key: key[0..8].try_into().unwrap(),
                }
            }
            Self::Des3_2k { key_no, key: k } => {
                key[0..4].copy_from_slice(&rnd_a[0..4]);
                key[4..8].copy_from_slice(&rnd_b[0..4]);
                if k[0..8] == k[8..16] {
                    // Degenerate 2K3DES key, derive a DES-style session key
                    let (first, second) = key.split_at_mut(8);
                    second[0..8].copy_from_slice(first);
                } else {
                    key[8..12].copy_from_slice(&rnd_a[4..8]);
                    key[12..16].copy_from_slice(&rnd_b[4..8]);
                }
                Self::Des3_2k {
                    key_no: *key_no,
                    key: key[0..16].try_into().unwrap(),
                }
            }
            Self::Des3_3k { key_no, .. } => {
                key[0..4].copy_from_slice(&rnd_a[0..4]);
                key[4..8].copy_from_slice(&rnd_b[0..4]);
                key[8..12].copy_from_slice(&rnd_a[6..10]);
                key[12..16].copy_from_slice(&rnd_b[6..10]);
                key[16..20].copy_from_slice(&rnd_a[12..16]);
                key[20..24].copy_from_slice(&rnd_b[12..16]);
                Self::Des3_3k { key_no: *key_no, key }
            }
            Self::Aes128 { key_no, .. } => {
                key[0..4].copy_from_slice(&rnd_a[0..4]);
                key[4..8].copy_from_slice(&rnd_b[0..4]);
                key[8..12].copy_from_slice(&rnd_a[12..16]);
                key[12..16].copy_from_slice(&rnd_b[12..16]);
                Self::Aes128 {
                    key_no: *key_no,
                    key: key[0..16].try_into().unwrap(),
                    version: 0,
                }
            }
        }
    }
}

/// Actor of one 4-bit access-rights slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyActor {
    /// A specific key number (0..=13)
    Key(u8),
    /// Free access, no authentication needed (`0xE`)
    Free,
    /// Access forbidden (`0xF`)
    Never,
}

impl KeyActor {
    const FREE: u8 = 0xE;
    const NEVER: u8 = 0xF;

    fn from_nibble(nibble: u8) -> Self {
        match nibble & 0xF {
            Self::FREE => Self::Free,
            Self::NEVER => Self::Never,
            key => Self::Key(key),
        }
    }

    fn nibble(self) -> u8 {
        match self {
            Self::Key(key) => key & 0xF,
            Self::Free => Self::FREE,
            Self::Never => Self::NEVER,
        }
    }
}

/// Kinds of file access, used to pick the relevant access-rights slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccess {
    /// Reading data, records or values
    Read,
    /// Writing data, records or value changes
    Write,
    /// Changing the file settings
    Change,
}

/// 16-bit file access rights: four 4-bit key slots for read, write,
/// read/write and change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRights(u16);

impl AccessRights {
    const READ_SHIFT: u16 = 12;
    const WRITE_SHIFT: u16 = 8;
    const READ_WRITE_SHIFT: u16 = 4;
    const CHANGE_SHIFT: u16 = 0;

    /// All four slots assigned to a single key
    #[must_use]
    pub fn single_key(key_no: u8) -> Self {
        let nibble = u16::from(KeyActor::Key(key_no).nibble());
        Self(
            nibble << Self::READ_SHIFT
                | nibble << Self::WRITE_SHIFT
                | nibble << Self::READ_WRITE_SHIFT
                | nibble << Self::CHANGE_SHIFT,
        )
    }

    /// All four slots free (no authentication required)
    #[must_use]
    pub fn free() -> Self {
        Self(0xEEEE)
    }

    /// All four slots forbidden
    #[must_use]
    pub fn never() -> Self {
        Self(0xFFFF)
    }

    /// From the raw 16-bit mask
    #[must_use]
    pub fn from_mask(mask: u16) -> Self {
        Self(mask)
    }

    /// Raw 16-bit mask
    #[must_use]
    pub fn mask(self) -> u16 {
        self.0
    }

    fn slot(self, shift: u16) -> KeyActor {
        KeyActor::from_nibble(((self.0 >> shift) & 0xF) as u8)
    }

    fn set_slot(&mut self, shift: u16, actor: KeyActor) {
        self.0 = (self.0 & !(0xF << shift)) | u16::from(actor.nibble()) << shift;
    }

    /// Read access slot
    #[must_use]
    pub fn read(self) -> KeyActor {
        self.slot(Self::READ_SHIFT)
    }

    /// Write access slot
    #[must_use]
    pub fn write(self) -> KeyActor {
        self.slot(Self::WRITE_SHIFT)
    }

    /// Combined read/write access slot
    #[must_use]
    pub fn read_write(self) -> KeyActor {
        self.slot(Self::READ_WRITE_SHIFT)
    }

    /// Change-settings access slot
    #[must_use]
    pub fn change(self) -> KeyActor {
        self.slot(Self::CHANGE_SHIFT)
    }

    /// Set the read access slot
    pub fn set_read(&mut self, actor: KeyActor) {
        self.set_slot(Self::READ_SHIFT, actor);
    }

    /// Set the write access slot
    pub fn set_write(&mut self, actor: KeyActor) {
        self.set_slot(Self::WRITE_SHIFT, actor);
    }

    /// Set the combined read/write access slot
    pub fn set_read_write(&mut self, actor: KeyActor) {
        self.set_slot(Self::READ_WRITE_SHIFT, actor);
    }

    /// Set the change-settings access slot
    pub fn set_change(&mut self, actor: KeyActor) {
        self.set_slot(Self::CHANGE_SHIFT, actor);
    }

    /// True if the given access works without any authentication
    #[must_use]
    pub fn is_free(self, access: FileAccess) -> bool {
        match access {
            FileAccess::Read => self.read() == KeyActor::Free || self.read_write() == KeyActor::Free,
            FileAccess::Write => {
                self.write() == KeyActor::Free || self.read_write() == KeyActor::Free
            }
            FileAccess::Change => self.change() == KeyActor::Free,
        }
    }

    pub(crate) fn serialize(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }

    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        reader.u16_le().map(Self)
    }
}

impl Default for AccessRights {
    fn default() -> Self {
        Self::never()
    }
}

/// Actor allowed to change keys in an application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKeyActor {
    /// A specific key number (0..=13)
    Key(u8),
    /// Each key can only be changed with itself (`0xE`)
    SameKey,
    /// All keys are frozen (`0xF`)
    Never,
}

impl ChangeKeyActor {
    fn from_nibble(nibble: u8) -> Self {
        match nibble & 0xF {
            0xE => Self::SameKey,
            0xF => Self::Never,
            key => Self::Key(key),
        }
    }

    fn nibble(self) -> u8 {
        match self {
            Self::Key(key) => key & 0xF,
            Self::SameKey => 0xE,
            Self::Never => 0xF,
        }
    }
}

/// Key settings of an application or of the PICC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRights {
    /// Who may change keys (high nibble of the settings byte)
    pub allowed_to_change_keys: ChangeKeyActor,
    /// Clearing this freezes the master key
    pub master_key_changeable: bool,
    /// Listing files/apps and reading settings without authentication
    pub dir_access_without_auth: bool,
    /// Creating and deleting files/apps without authentication
    pub create_delete_without_auth: bool,
    /// Clearing this freezes this very configuration
    pub config_changeable: bool,
}

impl Default for KeyRights {
    fn default() -> Self {
        Self {
            allowed_to_change_keys: ChangeKeyActor::Key(0),
            master_key_changeable: true,
            dir_access_without_auth: true,
            create_delete_without_auth: true,
            config_changeable: true,
        }
    }
}

impl KeyRights {
    /// Settings byte as transmitted
    #[must_use]
    pub fn to_byte(self) -> u8 {
        self.allowed_to_change_keys.nibble() << 4
            | u8::from(self.config_changeable) << 3
            | u8::from(self.create_delete_without_auth) << 2
            | u8::from(self.dir_access_without_auth) << 1
            | u8::from(self.master_key_changeable)
    }

    /// Decode a settings byte
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            allowed_to_change_keys: ChangeKeyActor::from_nibble(byte >> 4),
            master_key_changeable: byte & 1 != 0,
            dir_access_without_auth: byte & (1 << 1) != 0,
            create_delete_without_auth: byte & (1 << 2) != 0,
            config_changeable: byte & (1 << 3) != 0,
        }
    }
}

/// Cryptography family of an application, encoded in the high bits of the
/// key-count byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AppCrypto {
    /// DES and 2K3DES (legacy)
    LegacyDes2k3des = 0x00,
    /// 3K3DES
    Iso3k3des = 0x40,
    /// AES-128
    Aes128 = 0x80,
}

impl AppCrypto {
    /// Crypto family matching a cipher type
    #[must_use]
    pub fn from_cipher(cipher: CipherType) -> Self {
        match cipher {
            CipherType::Des | CipherType::Des3_2k => Self::LegacyDes2k3des,
            CipherType::Des3_3k => Self::Iso3k3des,
            CipherType::Aes128 => Self::Aes128,
        }
    }

    fn from_byte(byte: u8) -> Self {
        match byte & 0xC0 {
            0x40 => Self::Iso3k3des,
            0x80 => Self::Aes128,
            _ => Self::LegacyDes2k3des,
        }
    }
}

/// Application settings: key rights, key count, cryptography family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppSettings {
    /// Key management rights
    pub rights: KeyRights,
    /// Number of keys the application stores (1..=14)
    pub max_num_keys: u8,
    /// Cryptography family of the application's keys
    pub crypto: AppCrypto,
}

impl AppSettings {
    /// Settings for an application using the given cipher family
    #[must_use]
    pub fn new(cipher: CipherType) -> Self {
        Self {
            rights: KeyRights::default(),
            max_num_keys: MAX_KEYS_PER_APP,
            crypto: AppCrypto::from_cipher(cipher),
        }
    }

    pub(crate) fn serialize(self, out: &mut Vec<u8>) {
        out.push(self.rights.to_byte());
        out.push((self.max_num_keys & 0x0F) | self.crypto as u8);
    }

    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        let rights = KeyRights::from_byte(reader.u8()?);
        let keys_byte = reader.u8()?;
        Some(Self {
            rights,
            max_num_keys: keys_byte & 0x0F,
            crypto: AppCrypto::from_byte(keys_byte),
        })
    }
}

/// Communication mode of a file, as stored in its settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommMode {
    /// No protection
    #[default]
    Plain,
    /// MAC/CMAC appended to responses and (for legacy MAC) writes
    Maced,
    /// Fully enciphered
    Ciphered,
}

impl CommMode {
    /// Decode a communication settings byte
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte & 0x03 {
            0x01 => Self::Maced,
            0x03 => Self::Ciphered,
            _ => Self::Plain,
        }
    }

    /// Communication settings byte as transmitted
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Plain => 0x00,
            Self::Maced => 0x01,
            Self::Ciphered => 0x03,
        }
    }

    /// The more secure of two modes
    #[must_use]
    pub fn most_secure(self, other: Self) -> Self {
        if self.to_byte() >= other.to_byte() { self } else { other }
    }
}

/// Expected security of one file operation: trust the caller or ask the
/// card first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileSecurity {
    /// Fetch the file settings and use the mode the card declares
    #[default]
    Auto,
    /// Use the given mode without a settings round trip
    Trusted(CommMode),
}

/// Settings shared by all file types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenericFileSettings {
    /// Communication mode of the file
    pub mode: CommMode,
    /// Access rights word
    pub rights: AccessRights,
}

impl GenericFileSettings {
    /// New settings from mode and rights
    #[must_use]
    pub fn new(mode: CommMode, rights: AccessRights) -> Self {
        Self { mode, rights }
    }

    pub(crate) fn serialize(self, out: &mut Vec<u8>) {
        out.push(self.mode.to_byte());
        self.rights.serialize(out);
    }

    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        Some(Self {
            mode: CommMode::from_byte(reader.u8()?),
            rights: AccessRights::parse(reader)?,
        })
    }
}

/// Settings of a value file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueFileSettings {
    /// Smallest value the file may hold
    pub lower_limit: i32,
    /// Largest value the file may hold
    pub upper_limit: i32,
    /// Current value (initial value at creation time)
    pub value: i32,
    /// Whether limited credit is enabled
    pub limited_credit_enabled: bool,
}

/// Settings of a linear or cyclic record file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFileSettings {
    /// Size of one record (24-bit)
    pub record_size: u32,
    /// Maximum number of records (24-bit)
    pub max_record_count: u32,
    /// Current number of records (24-bit, reported by the card)
    pub record_count: u32,
}

/// Type and type-specific settings of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSettings {
    /// Plain data file
    Standard {
        /// Shared settings
        generic: GenericFileSettings,
        /// File size in bytes (24-bit)
        size: u32,
    },
    /// Data file with transaction backup
    Backup {
        /// Shared settings
        generic: GenericFileSettings,
        /// File size in bytes (24-bit)
        size: u32,
    },
    /// Credit/debit value file
    Value {
        /// Shared settings
        generic: GenericFileSettings,
        /// Value limits and state
        value: ValueFileSettings,
    },
    /// Linear record file
    LinearRecord {
        /// Shared settings
        generic: GenericFileSettings,
        /// Record layout and fill state
        record: RecordFileSettings,
    },
    /// Cyclic record file
    CyclicRecord {
        /// Shared settings
        generic: GenericFileSettings,
        /// Record layout and fill state
        record: RecordFileSettings,
    },
}

impl FileSettings {
    /// File type byte as used on the wire
    #[must_use]
    pub fn type_byte(&self) -> u8 {
        match self {
            Self::Standard { .. } => 0x00,
            Self::Backup { .. } => 0x01,
            Self::Value { .. } => 0x02,
            Self::LinearRecord { .. } => 0x03,
            Self::CyclicRecord { .. } => 0x04,
        }
    }

    /// Settings shared by all file types
    #[must_use]
    pub fn generic(&self) -> &GenericFileSettings {
        match self {
            Self::Standard { generic, .. }
            | Self::Backup { generic, .. }
            | Self::Value { generic, .. }
            | Self::LinearRecord { generic, .. }
            | Self::CyclicRecord { generic, .. } => generic,
        }
    }

    /// Parse a get-file-settings response (type byte first)
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        let file_type = reader.u8()?;
        let generic = GenericFileSettings::parse(reader)?;
        match file_type {
            0x00 | 0x01 => {
                let size = reader.u24_le()?;
                Some(if file_type == 0x00 {
                    Self::Standard { generic, size }
                } else {
                    Self::Backup { generic, size }
                })
            }
            0x02 => Some(Self::Value {
                generic,
                value: ValueFileSettings {
                    lower_limit: reader.i32_le()?,
                    upper_limit: reader.i32_le()?,
                    value: reader.i32_le()?,
                    limited_credit_enabled: reader.u8()? & 1 != 0,
                },
            }),
            0x03 | 0x04 => {
                let record = RecordFileSettings {
                    record_size: reader.u24_le()?,
                    max_record_count: reader.u24_le()?,
                    record_count: reader.u24_le()?,
                };
                Some(if file_type == 0x03 {
                    Self::LinearRecord { generic, record }
                } else {
                    Self::CyclicRecord { generic, record }
                })
            }
            _ => None,
        }
    }

    /// Serialize for a create-file command (no type byte, no record count)
    pub(crate) fn serialize_for_create(&self, out: &mut Vec<u8>) {
        self.generic().serialize(out);
        match self {
            Self::Standard { size, .. } | Self::Backup { size, .. } => put_u24_le(out, *size),
            Self::Value { value, .. } => {
                out.extend_from_slice(&value.lower_limit.to_le_bytes());
                out.extend_from_slice(&value.upper_limit.to_le_bytes());
                out.extend_from_slice(&value.value.to_le_bytes());
                out.push(u8::from(value.limited_credit_enabled));
            }
            Self::LinearRecord { record, .. } | Self::CyclicRecord { record, .. } => {
                put_u24_le(out, record.record_size);
                put_u24_le(out, record.max_record_count);
            }
        }
    }
}

/// Coded storage size of the card (exponent plus approximation bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageSize(pub u8);

impl StorageSize {
    /// Smallest byte count this coding can mean
    #[must_use]
    pub fn bytes_lower_bound(self) -> usize {
        1 << (self.0 >> 1)
    }

    /// Largest byte count this coding can mean (twice the lower bound when
    /// the approximation bit is set)
    #[must_use]
    pub fn bytes_upper_bound(self) -> usize {
        1 << ((self.0 >> 1) + u8::from(self.0 & 1 != 0))
    }
}

/// Hardware or software description block of [`ManufacturingInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WareInfo {
    /// Vendor (NXP is `0x04`)
    pub vendor_id: u8,
    /// Type
    pub ware_type: u8,
    /// Subtype
    pub subtype: u8,
    /// Major version
    pub version_major: u8,
    /// Minor version
    pub version_minor: u8,
    /// Coded storage size
    pub size: StorageSize,
    /// Communication protocol type
    pub comm_protocol_type: u8,
}

impl WareInfo {
    fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        Some(Self {
            vendor_id: reader.u8()?,
            ware_type: reader.u8()?,
            subtype: reader.u8()?,
            version_major: reader.u8()?,
            version_minor: reader.u8()?,
            size: StorageSize(reader.u8()?),
            comm_protocol_type: reader.u8()?,
        })
    }
}

/// Card production information returned by the version command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManufacturingInfo {
    /// Hardware description
    pub hardware: WareInfo,
    /// Software description
    pub software: WareInfo,
    /// Unique serial number
    pub serial_no: [u8; 7],
    /// Production batch number
    pub batch_no: [u8; 5],
    /// Calendar week of production (BCD)
    pub production_week: u8,
    /// Year of production (BCD)
    pub production_year: u8,
}

impl ManufacturingInfo {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Option<Self> {
        Some(Self {
            hardware: WareInfo::parse(reader)?,
            software: WareInfo::parse(reader)?,
            serial_no: reader.take_array()?,
            batch_no: reader.take_array()?,
            production_week: reader.u8()?,
            production_year: reader.u8()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn status_dispatch_is_total() {
        // Every byte value maps to exactly one of the four kinds
        for byte in 0..=0xFFu8 {
            let status = Status::from_byte(byte);
            match byte {
                0x00 => assert_eq!(status, Status::Ok),
                0x0C => assert_eq!(status, Status::NoChanges),
                0xAF => assert_eq!(status, Status::AdditionalFrame),
                byte => assert_eq!(status, Status::Error(byte)),
            }
        }
        assert!(Status::Ok.is_success());
        assert!(Status::NoChanges.is_success());
        assert!(!Status::AdditionalFrame.is_success());
        assert!(!Status::Error(0xAE).is_success());
    }

    #[test]
    fn error_from_status_names_documented_codes() {
        assert_eq!(Error::from_status(0x0E), Error::OutOfEeprom);
        assert_eq!(Error::from_status(0x9D), Error::PermissionDenied);
        assert_eq!(Error::from_status(0xAE), Error::AuthenticationError);
        assert_eq!(Error::from_status(0xF0), Error::FileNotFound);
        assert_eq!(Error::from_status(0x42), Error::UnknownStatus(0x42));
    }

    #[test]
    fn access_rights_pack_unpack() {
        let mut rights = AccessRights::never();
        rights.set_read(KeyActor::Key(1));
        rights.set_write(KeyActor::Key(2));
        rights.set_read_write(KeyActor::Key(3));
        rights.set_change(KeyActor::Key(4));
        assert_eq!(rights.mask(), 0x1234);
        assert_eq!(rights.read(), KeyActor::Key(1));
        assert_eq!(rights.write(), KeyActor::Key(2));
        assert_eq!(rights.read_write(), KeyActor::Key(3));
        assert_eq!(rights.change(), KeyActor::Key(4));

        // Lossless for every mask
        for mask in [0x0000u16, 0xEEEE, 0xFFFF, 0x1234, 0xE01F] {
            let rights = AccessRights::from_mask(mask);
            let mut packed = Vec::new();
            rights.serialize(&mut packed);
            assert_eq!(packed, mask.to_le_bytes());
            let parsed = AccessRights::parse(&mut Reader::new(&packed)).unwrap();
            assert_eq!(parsed.mask(), mask);
        }
    }

    #[test]
    fn access_rights_free_checks() {
        let rights = AccessRights::from_mask(0xE01F);
        // read = E (free), write = 0, read/write = 1, change = F
        assert!(rights.is_free(FileAccess::Read));
        assert!(!rights.is_free(FileAccess::Write));
        assert!(!rights.is_free(FileAccess::Change));
        assert_eq!(rights.change(), KeyActor::Never);

        let rights = AccessRights::from_mask(0x00E0);
        // read/write = E covers both read and write
        assert!(rights.is_free(FileAccess::Read));
        assert!(rights.is_free(FileAccess::Write));
    }

    #[test]
    fn key_rights_byte_roundtrip() {
        let rights = KeyRights {
            allowed_to_change_keys: ChangeKeyActor::SameKey,
            master_key_changeable: true,
            dir_access_without_auth: false,
            create_delete_without_auth: true,
            config_changeable: false,
        };
        let byte = rights.to_byte();
        assert_eq!(byte, 0xE5);
        assert_eq!(KeyRights::from_byte(byte), rights);

        let default_byte = KeyRights::default().to_byte();
        assert_eq!(default_byte, 0x0F);
    }

    #[test]
    fn app_settings_wire_format() {
        let settings = AppSettings::new(CipherType::Aes128);
        let mut out = Vec::new();
        settings.serialize(&mut out);
        assert_eq!(out, [0x0F, 0x8E]);
        let parsed = AppSettings::parse(&mut Reader::new(&out)).unwrap();
        assert_eq!(parsed, settings);

        let mut settings = AppSettings::new(CipherType::Des3_3k);
        settings.max_num_keys = 2;
        let mut out = Vec::new();
        settings.serialize(&mut out);
        assert_eq!(out, [0x0F, 0x42]);
    }

    #[test]
    fn key_versions() {
        let key = Key::des_with_version(0, [0x00, 0x02, 0x04, 0x06, 0x08, 0x0A, 0x0C, 0x0E], 0x10);
        assert_eq!(key.version(), 0x10);
        match &key {
            Key::Des { key, .. } => {
                assert_eq!(key, &[0x00, 0x02, 0x04, 0x07, 0x08, 0x0A, 0x0C, 0x0E]);
            }
            _ => unreachable!(),
        }
        let key = Key::aes128(0, [0; 16], 0x42);
        assert_eq!(key.version(), 0x42);
    }

    #[test]
    fn packed_key_bodies() {
        let des = Key::des(0, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(des.packed_body(), [1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8]);
        let aes = Key::aes128(0, [9; 16], 0x10);
        assert_eq!(aes.packed_body(), [9; 16]);
    }

    #[test]
    fn session_key_recipes() {
        let rnd_a_8 = [0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17];
        let rnd_b_8 = [0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27];
        let rnd_a_16: Vec<u8> = (0x30..0x40).collect();
        let rnd_b_16: Vec<u8> = (0x40..0x50).collect();

        let session = Key::des(0, [0; 8]).session_key(&rnd_a_8, &rnd_b_8);
        match session {
            Key::Des { key, .. } => {
                assert_eq!(key, [0x10, 0x11, 0x12, 0x13, 0x20, 0x21, 0x22, 0x23]);
            }
            _ => unreachable!(),
        }

        let session = Key::des3_2k(0, core::array::from_fn(|i| i as u8))
            .session_key(&rnd_a_8, &rnd_b_8);
        match session {
            Key::Des3_2k { key, .. } => {
                assert_eq!(
                    key,
                    [
                        0x10, 0x11, 0x12, 0x13, 0x20, 0x21, 0x22, 0x23, 0x14, 0x15, 0x16, 0x17,
                        0x24, 0x25, 0x26, 0x27
                    ]
                );
            }
            _ => unreachable!(),
        }

        // Degenerate 2K3DES key: halves coincide, session key is DES-like
        let session = Key::des3_2k(0, [7; 16]).session_key(&rnd_a_8, &rnd_b_8);
        match session {
            Key::Des3_2k { key, .. } => {
                assert_eq!(key[0..8], key[8..16]);
                assert_eq!(key[0..8], [0x10, 0x11, 0x12, 0x13, 0x20, 0x21, 0x22, 0x23]);
            }
            _ => unreachable!(),
        }

        let session = Key::des3_3k(0, [0; 24]).session_key(&rnd_a_16, &rnd_b_16);
        match session {
            Key::Des3_3k { key, .. } => {
                assert_eq!(
                    key,
                    [
                        0x30, 0x31, 0x32, 0x33, 0x40, 0x41, 0x42, 0x43, 0x36, 0x37, 0x38, 0x39,
                        0x46, 0x47, 0x48, 0x49, 0x3C, 0x3D, 0x3E, 0x3F, 0x4C, 0x4D, 0x4E, 0x4F
                    ]
                );
            }
            _ => unreachable!(),
        }

        let session = Key::aes128(0, [0; 16], 0).session_key(&rnd_a_16, &rnd_b_16);
        match session {
            Key::Aes128 { key, .. } => {
                assert_eq!(
                    key,
                    [
                        0x30, 0x31, 0x32, 0x33, 0x40, 0x41, 0x42, 0x43, 0x3C, 0x3D, 0x3E, 0x3F,
                        0x4C, 0x4D, 0x4E, 0x4F
                    ]
                );
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn file_settings_parse_standard() {
        // Type, comm mode, access rights, 24-bit size
        let bytes = [0x00, 0x00, 0x11, 0x00, 0x50, 0x00, 0x00];
        let settings = FileSettings::parse(&mut Reader::new(&bytes)).unwrap();
        match settings {
            FileSettings::Standard { generic, size } => {
                assert_eq!(generic.mode, CommMode::Plain);
                assert_eq!(generic.rights.mask(), 0x0011);
                assert_eq!(size, 80);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn file_settings_create_payload() {
        let settings = FileSettings::Standard {
            generic: GenericFileSettings::new(CommMode::Plain, AccessRights::from_mask(0x0011)),
            size: 80,
        };
        let mut out = Vec::new();
        settings.serialize_for_create(&mut out);
        assert_eq!(out, [0x00, 0x11, 0x00, 0x50, 0x00, 0x00]);

        let settings = FileSettings::Value {
            generic: GenericFileSettings::new(CommMode::Ciphered, AccessRights::single_key(0)),
            value: ValueFileSettings {
                lower_limit: -10,
                upper_limit: 100,
                value: 5,
                limited_credit_enabled: true,
            },
        };
        let mut out = Vec::new();
        settings.serialize_for_create(&mut out);
        assert_eq!(out[0], 0x03);
        assert_eq!(out[1..3], [0x00, 0x00]);
        assert_eq!(out[3..7], (-10i32).to_le_bytes());
        assert_eq!(out[7..11], 100i32.to_le_bytes());
        assert_eq!(out[11..15], 5i32.to_le_bytes());
        assert_eq!(out[15], 0x01);
    }

    #[test]
    fn storage_size_bounds() {
        // DESFire 4k cards report 0x18: exponent 12, exact
        let size = StorageSize(0x18);
        assert_eq!(size.bytes_lower_bound(), 4096);
        assert_eq!(size.bytes_upper_bound(), 4096);
        // Approximation bit doubles the upper bound
        let size = StorageSize(0x19);
        assert_eq!(size.bytes_lower_bound(), 4096);
        assert_eq!(size.bytes_upper_bound(), 8192);
    }

    #[test]
    fn comm_mode_coding() {
        assert_eq!(CommMode::from_byte(0x00), CommMode::Plain);
        assert_eq!(CommMode::from_byte(0x02), CommMode::Plain);
        assert_eq!(CommMode::from_byte(0x01), CommMode::Maced);
        assert_eq!(CommMode::from_byte(0x03), CommMode::Ciphered);
        assert_eq!(CommMode::Plain.most_secure(CommMode::Maced), CommMode::Maced);
        assert_eq!(CommMode::Ciphered.most_secure(CommMode::Maced), CommMode::Ciphered);
    }
}
