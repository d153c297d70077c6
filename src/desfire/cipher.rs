//! DESFire secure messaging: the four session ciphers and the two
//! protection schemes
//!
//! The legacy scheme (DES, 2K3DES) uses 4-byte MACs cut from a plain CBC
//! encryption with zero IV, CRC16, and the protocol's infamous direction
//! quirk: data sent to the card is run through the block *decryption*
//! primitive, so the CBC chaining xors against plaintext. The modern
//! scheme (3K3DES, AES-128) uses CMAC with derived subkeys, CRC32 over
//! command byte and data, and real CBC in both directions.
//!
//! Every cipher carries a global IV that advances with each crypto
//! operation of the session. A few commands need a locally zeroed IV
//! instead; [`Cipher::set_iv_mode`] switches between the two, and
//! [`IvGuard`] restores the previous mode on scope exit.

use super::crypto::{
    self, CRC16_INIT, CRC32_INIT, cbc_decrypt, cbc_encrypt, cmac_subkey, zero_pad,
};
use super::data::{CipherType, Key};
use aes::Aes128;
use alloc::vec::Vec;
use cipher::{BlockDecrypt, BlockEncrypt, BlockSizeUser, KeyInit};
use des::{Des, TdesEde2, TdesEde3};
use log::{debug, error, warn};

/// Protection applied to one direction of one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    /// No transformation; modern ciphers still run a CMAC over the data to
    /// keep the IV in sync
    Plain,
    /// MAC (legacy, 4 bytes) or CMAC (modern, 8 bytes) appended
    Maced,
    /// CRC appended, zero padded and encrypted
    Ciphered,
    /// Zero padded and encrypted without a CRC (authentication traffic)
    CipheredNoCrc,
}

/// Which IV the data path of a cipher uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherIv {
    /// The session-global IV, advanced by every operation
    Global,
    /// A zero IV local to the operation; the global IV is left untouched
    Zero,
}

/// Scoped IV-mode override: sets the given mode on creation and restores
/// the previous one when dropped
pub struct IvGuard<'a> {
    cipher: &'a mut Cipher,
    previous: CipherIv,
}

impl<'a> IvGuard<'a> {
    pub fn new(cipher: &'a mut Cipher, mode: CipherIv) -> Self {
        let previous = cipher.iv_mode();
        debug!("DESFire: switching crypto IV mode to {mode:?} (was {previous:?})");
        cipher.set_iv_mode(mode);
        Self { cipher, previous }
    }

    /// Access the cipher within the guard's scope
    pub fn cipher(&mut self) -> &mut Cipher {
        self.cipher
    }
}

impl Drop for IvGuard<'_> {
    fn drop(&mut self) {
        self.cipher.set_iv_mode(self.previous);
    }
}

/// Legacy scheme state: DES or 2K3DES with an 8-byte block
#[derive(Clone)]
pub struct Legacy<C> {
    cipher: C,
    global_iv: [u8; 8],
    iv_mode: CipherIv,
}

impl<C: BlockEncrypt + BlockDecrypt + BlockSizeUser> Legacy<C> {
    fn new(cipher: C) -> Self {
        Self {
            cipher,
            global_iv: [0; 8],
            iv_mode: CipherIv::Global,
        }
    }

    /// 4-byte MAC: head of the last CBC ciphertext block, always zero IV
    fn compute_mac(&self, data: &[u8]) -> [u8; 4] {
        let mut buffer = data.to_vec();
        zero_pad(&mut buffer, 0, 8);
        let mut iv = [0u8; 8];
        cbc_encrypt(&self.cipher, &mut iv, &mut buffer);
        [iv[0], iv[1], iv[2], iv[3]]
    }

    /// Data path crypto; both directions use the decryption primitive
    /// (the legacy send quirk), so one routine serves send and receive
    fn crypt(&mut self, data: &mut [u8]) {
        match self.iv_mode {
            CipherIv::Global => cbc_decrypt(&self.cipher, &mut self.global_iv, data),
            CipherIv::Zero => {
                let mut iv = [0u8; 8];
                cbc_decrypt(&self.cipher, &mut iv, data);
            }
        }
    }

    fn prepare_tx(&mut self, data: &mut Vec<u8>, offset: usize, mode: CipherMode) {
        if offset >= data.len() {
            return;
        }
        match mode {
            CipherMode::Plain => {}
            CipherMode::Maced => {
                let mac = self.compute_mac(&data[offset..]);
                data.extend_from_slice(&mac);
            }
            CipherMode::Ciphered => {
                let crc = crypto::crc16(&data[offset..], CRC16_INIT).to_le_bytes();
                data.extend_from_slice(&crc);
                zero_pad(data, offset, 8);
                self.crypt(&mut data[offset..]);
            }
            CipherMode::CipheredNoCrc => {
                zero_pad(data, offset, 8);
                self.crypt(&mut data[offset..]);
            }
        }
    }

    /// `data` is `[payload ‖ status]`; returns false on a failed check
    fn confirm_rx(&mut self, data: &mut Vec<u8>, mode: CipherMode) -> bool {
        if data.len() <= 1 {
            return true;
        }
        match mode {
            CipherMode::Plain => true,
            CipherMode::Maced => {
                // [ data ‖ mac (4) ‖ status ]
                if data.len() < 5 {
                    return false;
                }
                let payload_len = data.len() - 5;
                let computed = self.compute_mac(&data[..payload_len]);
                if data[payload_len..payload_len + 4] != computed {
                    return false;
                }
                // Move the status byte over the MAC and drop it
                data[payload_len] = data[data.len() - 1];
                data.truncate(payload_len + 1);
                true
            }
            CipherMode::Ciphered => {
                let status = data.pop().unwrap_or_default();
                if data.len() % 8 != 0 {
                    warn!(
                        "DESFire: enciphered data of {} bytes is not a multiple of the block size",
                        data.len()
                    );
                    return false;
                }
                self.crypt(data);
                let verified = crypto::strip_padding_verify_crc16(data);
                data.push(status);
                verified
            }
            CipherMode::CipheredNoCrc => {
                let status = data.pop().unwrap_or_default();
                if data.len() % 8 != 0 {
                    return false;
                }
                self.crypt(data);
                data.push(status);
                true
            }
        }
    }
}

/// Modern scheme state: 3K3DES (8-byte block, Rb `0x1B`) or AES-128
/// (16-byte block, Rb `0x87`)
#[derive(Clone)]
pub struct Modern<C, const BS: usize> {
    cipher: C,
    global_iv: [u8; BS],
    subkey_nopad: [u8; BS],
    subkey_pad: [u8; BS],
    iv_mode: CipherIv,
}

impl<C: BlockEncrypt + BlockDecrypt + BlockSizeUser, const BS: usize> Modern<C, BS> {
    fn new(cipher: C, rb: u8) -> Self {
        // CMAC subkeys from the encryption of a zero block under a zero IV
        let mut base = [0u8; BS];
        let mut iv = [0u8; BS];
        cbc_encrypt(&cipher, &mut iv, &mut base);
        let k1 = cmac_subkey(&base, rb);
        let k2 = cmac_subkey(&k1, rb);
        let mut subkey_nopad = [0u8; BS];
        let mut subkey_pad = [0u8; BS];
        subkey_nopad.copy_from_slice(&k1);
        subkey_pad.copy_from_slice(&k2);
        Self {
            cipher,
            global_iv: [0; BS],
            subkey_nopad,
            subkey_pad,
            iv_mode: CipherIv::Global,
        }
    }

    /// 8-byte truncated CMAC; advances the global IV
    fn compute_cmac(&mut self, data: &[u8]) -> [u8; 8] {
        let mut buffer = data.to_vec();
        let padded = buffer.len() < crypto::padded_len(buffer.len(), BS) || buffer.is_empty();
        if padded {
            buffer.push(0x80);
            zero_pad(&mut buffer, 0, BS);
        }
        let subkey = if padded { &self.subkey_pad } else { &self.subkey_nopad };
        let last_block = buffer.len() - BS;
        for (b, k) in buffer[last_block..].iter_mut().zip(subkey.iter()) {
            *b ^= k;
        }
        cbc_encrypt(&self.cipher, &mut self.global_iv, &mut buffer);
        let mut mac = [0u8; 8];
        mac.copy_from_slice(&self.global_iv[..8]);
        mac
    }

    fn encrypt(&mut self, data: &mut [u8]) {
        match self.iv_mode {
            CipherIv::Global => cbc_encrypt(&self.cipher, &mut self.global_iv, data),
            CipherIv::Zero => {
                let mut iv = [0u8; BS];
                cbc_encrypt(&self.cipher, &mut iv, data);
            }
        }
    }

    fn decrypt(&mut self, data: &mut [u8]) {
        match self.iv_mode {
            CipherIv::Global => cbc_decrypt(&self.cipher, &mut self.global_iv, data),
            CipherIv::Zero => {
                let mut iv = [0u8; BS];
                cbc_decrypt(&self.cipher, &mut iv, data);
            }
        }
    }

    fn prepare_tx(&mut self, data: &mut Vec<u8>, offset: usize, mode: CipherMode) {
        match mode {
            CipherMode::Plain | CipherMode::Maced => {
                if offset >= data.len() {
                    return;
                }
                // CMAC over the whole data, command byte included, to keep
                // the IV in sync; only the maced mode transmits it
                let cmac = self.compute_cmac(data);
                if mode == CipherMode::Maced {
                    data.extend_from_slice(&cmac);
                }
            }
            CipherMode::Ciphered => {
                if offset >= data.len() {
                    return;
                }
                // CRC over the whole data, command byte included
                let crc = crypto::crc32(data, CRC32_INIT).to_le_bytes();
                data.extend_from_slice(&crc);
                zero_pad(data, offset, BS);
                self.encrypt(&mut data[offset..]);
            }
            CipherMode::CipheredNoCrc => {
                if offset >= data.len() {
                    return;
                }
                zero_pad(data, offset, BS);
                self.encrypt(&mut data[offset..]);
            }
        }
    }

    /// `data` is `[payload ‖ status]`; returns false on a failed check
    fn confirm_rx(&mut self, data: &mut Vec<u8>, mode: CipherMode) -> bool {
        if data.len() <= 1 {
            return true;
        }
        match mode {
            CipherMode::Plain => {
                // Pass data and status through CMAC to keep the IV in sync
                let _ = self.compute_cmac(data);
                true
            }
            CipherMode::Maced => {
                // [ data ‖ cmac (8) ‖ status ] → [ data ‖ status ‖ cmac ]
                if data.len() < 9 {
                    return false;
                }
                let status = data.pop().unwrap_or_default();
                let mac_start = data.len() - 8;
                data.insert(mac_start, status);
                let computed = self.compute_cmac(&data[..=mac_start]);
                let received = &data[mac_start + 1..];
                if received != computed {
                    warn!("DESFire: response CMAC mismatch");
                    return false;
                }
                data.truncate(mac_start + 1);
                true
            }
            CipherMode::Ciphered => {
                let status = data.pop().unwrap_or_default();
                if data.len() % BS != 0 {
                    warn!(
                        "DESFire: enciphered data of {} bytes is not a multiple of the block size",
                        data.len()
                    );
                    return false;
                }
                self.decrypt(data);
                let verified = crypto::strip_padding_verify_crc32(data, status, BS);
                data.push(status);
                verified
            }
            CipherMode::CipheredNoCrc => {
                let status = data.pop().unwrap_or_default();
                if data.len() % BS != 0 {
                    return false;
                }
                self.decrypt(data);
                data.push(status);
                true
            }
        }
    }
}

/// Session cipher of a DESFire dialog
///
/// [`Cipher::None`] is the unauthenticated state and only passes plain
/// traffic through.
#[derive(Clone)]
pub enum Cipher {
    /// No authentication, plain traffic only
    None,
    /// Single DES (legacy scheme)
    Des(Legacy<Des>),
    /// 2-key triple DES (legacy scheme)
    Des3_2k(Legacy<TdesEde2>),
    /// 3-key triple DES (modern scheme, Rb `0x1B`)
    Des3_3k(Modern<TdesEde3, 8>),
    /// AES-128 (modern scheme, Rb `0x87`)
    Aes128(Modern<Aes128, 16>),
}

impl core::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Key material stays out of debug output
        let name = match self {
            Self::None => "None",
            Self::Des(_) => "Des",
            Self::Des3_2k(_) => "Des3_2k",
            Self::Des3_3k(_) => "Des3_3k",
            Self::Aes128(_) => "Aes128",
        };
        write!(f, "Cipher::{name}")
    }
}

impl Cipher {
    /// Create the session cipher for the given key, with a zero IV
    #[must_use]
    pub fn new(key: &Key) -> Self {
        match key {
            Key::Des { key, .. } => Self::Des(Legacy::new(Des::new(key.into()))),
            Key::Des3_2k { key, .. } => Self::Des3_2k(Legacy::new(TdesEde2::new(key.into()))),
            Key::Des3_3k { key, .. } => Self::Des3_3k(Modern::new(TdesEde3::new(key.into()), 0x1B)),
            Key::Aes128 { key, .. } => Self::Aes128(Modern::new(Aes128::new(key.into()), 0x87)),
        }
    }

    /// The cipher family, `None` when unauthenticated
    #[must_use]
    pub fn cipher_type(&self) -> Option<CipherType> {
        match self {
            Self::None => None,
            Self::Des(_) => Some(CipherType::Des),
            Self::Des3_2k(_) => Some(CipherType::Des3_2k),
            Self::Des3_3k(_) => Some(CipherType::Des3_3k),
            Self::Aes128(_) => Some(CipherType::Aes128),
        }
    }

    /// Block size of the underlying cipher (8 for the unauthenticated
    /// state, where it only sizes random buffers)
    #[must_use]
    pub fn block_size(&self) -> usize {
        match self {
            Self::Aes128(_) => 16,
            _ => 8,
        }
    }

    /// Current IV mode
    #[must_use]
    pub fn iv_mode(&self) -> CipherIv {
        match self {
            Self::None => CipherIv::Global,
            Self::Des(c) => c.iv_mode,
            Self::Des3_2k(c) => c.iv_mode,
            Self::Des3_3k(c) => c.iv_mode,
            Self::Aes128(c) => c.iv_mode,
        }
    }

    /// Switch between the global and the locally zeroed IV
    pub fn set_iv_mode(&mut self, mode: CipherIv) {
        match self {
            Self::None => {}
            Self::Des(c) => c.iv_mode = mode,
            Self::Des3_2k(c) => c.iv_mode = mode,
            Self::Des3_3k(c) => c.iv_mode = mode,
            Self::Aes128(c) => c.iv_mode = mode,
        }
    }

    /// Transform outgoing `[command ‖ data]` bytes in place
    ///
    /// `offset` marks where the protected region starts; header bytes in
    /// front of it stay untouched (MAC/CMAC and CRC32 still cover the
    /// whole buffer where the scheme says so).
    pub fn prepare_tx(&mut self, data: &mut Vec<u8>, offset: usize, mode: CipherMode) {
        match self {
            Self::None => {
                if mode != CipherMode::Plain {
                    error!("DESFire: secure messaging requested without authentication");
                }
            }
            Self::Des(c) => c.prepare_tx(data, offset, mode),
            Self::Des3_2k(c) => c.prepare_tx(data, offset, mode),
            Self::Des3_3k(c) => c.prepare_tx(data, offset, mode),
            Self::Aes128(c) => c.prepare_tx(data, offset, mode),
        }
    }

    /// Validate and unwrap incoming `[payload ‖ status]` bytes in place
    #[must_use]
    pub fn confirm_rx(&mut self, data: &mut Vec<u8>, mode: CipherMode) -> bool {
        match self {
            Self::None => {
                if mode == CipherMode::Plain {
                    true
                } else {
                    error!("DESFire: secure messaging requested without authentication");
                    false
                }
            }
            Self::Des(c) => c.confirm_rx(data, mode),
            Self::Des3_2k(c) => c.confirm_rx(data, mode),
            Self::Des3_3k(c) => c.confirm_rx(data, mode),
            Self::Aes128(c) => c.confirm_rx(data, mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn des_cipher(key: [u8; 8]) -> Cipher {
        Cipher::new(&Key::des(0, key))
    }

    fn rx(cipher: &mut Cipher, data: &[u8], mode: CipherMode) -> Vec<u8> {
        let mut data = data.to_vec();
        assert!(cipher.confirm_rx(&mut data, mode));
        data
    }

    fn tx(cipher: &mut Cipher, data: &[u8], mode: CipherMode) -> Vec<u8> {
        let mut data = data.to_vec();
        cipher.prepare_tx(&mut data, 0, mode);
        data
    }

    // The authentication cryptograms below reproduce the traces from the
    // public hack.cert.pl DESFire analysis: decrypt E(RndB), encrypt
    // RndA ‖ rot(RndB) with the chained IV, decrypt E(rot(RndA)).

    #[test]
    fn des_auth_cryptograms() {
        let mut c = des_cipher([0; 8]);
        let step1 = rx(
            &mut c,
            &[0x5D, 0x99, 0x4C, 0xE0, 0x85, 0xF2, 0x40, 0x89, 0xAF],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(step1, [0x4F, 0xD1, 0xB7, 0x59, 0x42, 0xA8, 0xB8, 0xE1, 0xAF]);
        let step2 = tx(
            &mut c,
            &[
                0x84, 0x9B, 0x36, 0xC5, 0xF8, 0xBF, 0x4A, 0x09, 0xD1, 0xB7, 0x59, 0x42, 0xA8,
                0xB8, 0xE1, 0x4F,
            ],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(
            step2,
            [
                0x21, 0xD0, 0xAD, 0x5F, 0x2F, 0xD9, 0x74, 0x54, 0xA7, 0x46, 0xCC, 0x80, 0x56,
                0x7F, 0x1B, 0x1C
            ]
        );
        let step3 = rx(
            &mut c,
            &[0x91, 0x3C, 0x6D, 0xED, 0x84, 0x22, 0x1C, 0x41, 0x00],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(step3, [0x9B, 0x36, 0xC5, 0xF8, 0xBF, 0x4A, 0x09, 0x84, 0x00]);
    }

    #[test]
    fn des_send_uses_decryption_primitive() {
        // Change-key cryptogram: enciphering must run the key material
        // through the DES decryption primitive
        let mut c = des_cipher([0xC8, 0x6D, 0xB4, 0x4F, 0x05, 0x52, 0xB6, 0x9B]);
        let out = tx(
            &mut c,
            &[
                0x00, 0x02, 0x04, 0x07, 0x08, 0x0A, 0x0C, 0x0E, 0x00, 0x02, 0x04, 0x07, 0x08,
                0x0A, 0x0C, 0x0E, 0x2A, 0xEC, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(
            out,
            [
                0xAE, 0x99, 0x2B, 0xD7, 0x2B, 0x90, 0x32, 0x4F, 0x3E, 0x2C, 0xF2, 0xF3, 0x5E,
                0x4F, 0xD7, 0x9A, 0x99, 0xBE, 0xA5, 0x61, 0xAD, 0x04, 0x24, 0xBC
            ]
        );
    }

    #[test]
    fn des3_2k_auth_cryptograms() {
        let mut c = Cipher::new(&Key::des3_2k(0, [0; 16]));
        let step1 = rx(
            &mut c,
            &[0xDE, 0x50, 0xF9, 0x23, 0x10, 0xCA, 0xF5, 0xA5, 0xAF],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(step1, [0x4C, 0x64, 0x7E, 0x56, 0x72, 0xE2, 0xA6, 0x51, 0xAF]);
        let step2 = tx(
            &mut c,
            &[
                0xC9, 0x6C, 0xE3, 0x5E, 0x4D, 0x60, 0x87, 0xF2, 0x64, 0x7E, 0x56, 0x72, 0xE2,
                0xA6, 0x51, 0x4C,
            ],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(
            step2,
            [
                0xE0, 0x06, 0x16, 0x66, 0x87, 0x04, 0xD5, 0x54, 0x9C, 0x8D, 0x6A, 0x13, 0xA0,
                0xF8, 0xFC, 0xED
            ]
        );
        let step3 = rx(
            &mut c,
            &[0x1D, 0x9D, 0x29, 0x54, 0x69, 0x7D, 0xE7, 0x60, 0x00],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(step3, [0x6C, 0xE3, 0x5E, 0x4D, 0x60, 0x87, 0xF2, 0xC9, 0x00]);
    }

    #[test]
    fn des3_2k_nonzero_version_key() {
        // Key with version bits set in the parity positions
        let mut c = Cipher::new(&Key::des3_2k(
            0,
            [
                0x00, 0x10, 0x20, 0x31, 0x40, 0x50, 0x60, 0x70, 0x80, 0x90, 0xA0, 0xB0, 0xB0,
                0xA0, 0x90, 0x80,
            ],
        ));
        let step1 = rx(
            &mut c,
            &[0xB2, 0x95, 0x57, 0x99, 0x26, 0x15, 0x5A, 0xE3, 0xAF],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(step1, [0xBC, 0xD8, 0x29, 0x97, 0x47, 0x33, 0x2D, 0xAF, 0xAF]);
    }

    #[test]
    fn des3_3k_auth_cryptograms() {
        let mut c = Cipher::new(&Key::des3_3k(0, [0; 24]));
        let step1 = rx(
            &mut c,
            &[
                0xBC, 0x1C, 0x57, 0x0B, 0xC9, 0x48, 0x15, 0x61, 0x87, 0x13, 0x23, 0x64, 0xE4,
                0xDC, 0xE1, 0x76, 0xAF,
            ],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(
            step1,
            [
                0x31, 0x6E, 0x6D, 0x76, 0xA4, 0x49, 0xF9, 0x25, 0xBA, 0x30, 0x4F, 0xB2, 0x65,
                0x36, 0x56, 0xA2, 0xAF
            ]
        );
        let step2 = tx(
            &mut c,
            &[
                0x36, 0xC5, 0xF8, 0xBF, 0x4A, 0x09, 0xAC, 0x23, 0x9E, 0x8D, 0xA0, 0xC7, 0x32,
                0x51, 0xD4, 0xAB, 0x6E, 0x6D, 0x76, 0xA4, 0x49, 0xF9, 0x25, 0xBA, 0x30, 0x4F,
                0xB2, 0x65, 0x36, 0x56, 0xA2, 0x31,
            ],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(
            step2,
            [
                0xDD, 0xDC, 0x9A, 0x77, 0x59, 0x7F, 0x03, 0xA4, 0x0C, 0x7F, 0xAA, 0x36, 0x2F,
                0x45, 0xA8, 0xEA, 0xDB, 0xE4, 0x6A, 0x11, 0x5D, 0x98, 0x19, 0x8C, 0xBF, 0x36,
                0xA6, 0xE5, 0x1B, 0x39, 0xD8, 0x7C
            ]
        );
        let step3 = rx(
            &mut c,
            &[
                0x72, 0x44, 0xD9, 0x35, 0xED, 0x9A, 0x13, 0x06, 0xCD, 0x8C, 0x84, 0x1A, 0x7C,
                0x1D, 0xE3, 0x9A, 0x00,
            ],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(
            step3,
            [
                0xC5, 0xF8, 0xBF, 0x4A, 0x09, 0xAC, 0x23, 0x9E, 0x8D, 0xA0, 0xC7, 0x32, 0x51,
                0xD4, 0xAB, 0x36, 0x00
            ]
        );
    }

    #[test]
    fn aes_auth_cryptograms() {
        let mut c = Cipher::new(&Key::aes128(0, [0; 16], 0));
        let step1 = rx(
            &mut c,
            &[
                0xB9, 0x69, 0xFD, 0xFE, 0x56, 0xFD, 0x91, 0xFC, 0x9D, 0xE6, 0xF6, 0xF2, 0x13,
                0xB8, 0xFD, 0x1E, 0xAF,
            ],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(
            step1,
            [
                0xC0, 0x5D, 0xDD, 0x71, 0x4F, 0xD7, 0x88, 0xA6, 0xB7, 0xB7, 0x54, 0xF3, 0xC4,
                0xD0, 0x66, 0xE8, 0xAF
            ]
        );
        let step2 = tx(
            &mut c,
            &[
                0xF4, 0x4B, 0x26, 0xF5, 0x68, 0x6F, 0x3A, 0x39, 0x1C, 0xD3, 0x8E, 0xBD, 0x10,
                0x77, 0x22, 0x81, 0x5D, 0xDD, 0x71, 0x4F, 0xD7, 0x88, 0xA6, 0xB7, 0xB7, 0x54,
                0xF3, 0xC4, 0xD0, 0x66, 0xE8, 0xC0,
            ],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(
            step2,
            [
                0x36, 0xAA, 0xD7, 0xDF, 0x6E, 0x43, 0x6B, 0xA0, 0x8D, 0x18, 0x61, 0x38, 0x30,
                0xA7, 0x0D, 0x5A, 0xD4, 0x3E, 0x3D, 0x3F, 0x4A, 0x8D, 0x47, 0x54, 0x1E, 0xEE,
                0x62, 0x3A, 0x93, 0x4E, 0x47, 0x74
            ]
        );
        let step3 = rx(
            &mut c,
            &[
                0x80, 0x0D, 0xB6, 0x80, 0xBC, 0x14, 0x6B, 0xD1, 0x21, 0xD6, 0x57, 0x8F, 0x2D,
                0x2E, 0x20, 0x59, 0x00,
            ],
            CipherMode::CipheredNoCrc,
        );
        assert_eq!(
            step3,
            [
                0x4B, 0x26, 0xF5, 0x68, 0x6F, 0x3A, 0x39, 0x1C, 0xD3, 0x8E, 0xBD, 0x10, 0x77,
                0x22, 0x81, 0xF4, 0x00
            ]
        );
    }

    #[test]
    fn cmac_rfc4493_vectors() {
        // RFC 4493 §4 with K = 2b7e1516 28aed2a6 abf71588 09cf4f3c; our
        // CMAC is truncated to its first 8 bytes
        let key = [
            0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF,
            0x4F, 0x3C,
        ];
        let Cipher::Aes128(mut modern) = Cipher::new(&Key::aes128(0, key, 0)) else {
            unreachable!();
        };
        // Empty message: full CMAC bb1d6929 e9593728 7fa37d12 9b756746
        let mac = modern.compute_cmac(&[]);
        assert_eq!(mac, [0xBB, 0x1D, 0x69, 0x29, 0xE9, 0x59, 0x37, 0x28]);

        // One-block message 6bc1bee2 2e409f96 e93d7e11 7393172a:
        // full CMAC 070a16b4 6b4d4144 f79bdd9d d04a287c
        let Cipher::Aes128(mut modern) = Cipher::new(&Key::aes128(0, key, 0)) else {
            unreachable!();
        };
        let mac = modern.compute_cmac(&[
            0x6B, 0xC1, 0xBE, 0xE2, 0x2E, 0x40, 0x9F, 0x96, 0xE9, 0x3D, 0x7E, 0x11, 0x73, 0x93,
            0x17, 0x2A,
        ]);
        assert_eq!(mac, [0x07, 0x0A, 0x16, 0xB4, 0x6B, 0x4D, 0x41, 0x44]);
    }

    #[test]
    fn legacy_mac_mode_roundtrip() {
        let mut c = des_cipher([0xC8, 0x6D, 0xB4, 0x4F, 0x23, 0x43, 0xBA, 0x56]);
        let data: Vec<u8> = (0..32).collect();
        let mut tx_data = data.clone();
        c.prepare_tx(&mut tx_data, 0, CipherMode::Maced);
        assert_eq!(tx_data.len(), 36);
        // Recorded MAC for this session key and payload
        assert_eq!(&tx_data[32..], [0x9A, 0xA8, 0x3A, 0x44]);

        // A response carrying the same data, MAC and status verifies
        let mut rx_data = data.clone();
        rx_data.extend_from_slice(&[0x9A, 0xA8, 0x3A, 0x44, 0x00]);
        assert!(c.confirm_rx(&mut rx_data, CipherMode::Maced));
        assert_eq!(rx_data[..32], data[..]);
        assert_eq!(rx_data[32], 0x00);

        // Corrupted MAC fails
        let mut rx_data = data;
        rx_data.extend_from_slice(&[0x9A, 0xA8, 0x3A, 0x45, 0x00]);
        assert!(!c.confirm_rx(&mut rx_data, CipherMode::Maced));
    }

    #[test]
    fn modern_ciphered_roundtrip() {
        // Host-side encrypt then card-side style decrypt with a second
        // cipher instance sharing the session key and IV history
        let key = [0x42; 16];
        let mut host = Cipher::new(&Key::aes128(0, key, 0));
        let payload = vec![0xC4, 0x01, 0x02, 0x03, 0x04, 0x05];
        let mut wire = payload.clone();
        host.prepare_tx(&mut wire, 1, CipherMode::Ciphered);
        assert_eq!(wire[0], 0xC4);
        // Command byte untouched, rest padded to a block
        assert_eq!(wire.len(), 1 + 16);

        // Decrypt manually with a fresh cipher and verify CRC placement
        let Cipher::Aes128(mut card) = Cipher::new(&Key::aes128(0, key, 0)) else {
            unreachable!();
        };
        card.decrypt(&mut wire[1..]);
        let crc = crypto::crc32(&payload, CRC32_INIT).to_le_bytes();
        assert_eq!(wire[1..6], payload[1..6]);
        assert_eq!(wire[6..10], crc);
    }

    #[test]
    fn iv_guard_restores_mode() {
        let mut c = des_cipher([0; 8]);
        assert_eq!(c.iv_mode(), CipherIv::Global);
        {
            let mut guard = IvGuard::new(&mut c, CipherIv::Zero);
            assert_eq!(guard.cipher().iv_mode(), CipherIv::Zero);
        }
        assert_eq!(c.iv_mode(), CipherIv::Global);
    }

    #[test]
    fn unauthenticated_cipher_rejects_secure_modes() {
        let mut c = Cipher::None;
        let mut data = vec![0x01, 0x02, 0x00];
        assert!(c.confirm_rx(&mut data, CipherMode::Plain));
        assert!(!c.confirm_rx(&mut data, CipherMode::Maced));
    }
}
