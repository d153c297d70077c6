//! Cryptographic building blocks of the DESFire protocol
//!
//! CBC runs over the RustCrypto block ciphers with a caller-owned IV,
//! because the protocol threads one "global" IV through every operation of
//! a session (encryption, decryption and CMAC alike) instead of starting
//! fresh per message. The CRC flavors are the DESFire ones: CRC_A style
//! CRC16 and a CRC32 that omits the usual final complement.

use alloc::vec::Vec;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, BlockSizeUser};

/// CRC16 initial value (ISO/IEC 14443-3 type A)
pub const CRC16_INIT: u16 = 0x6363;

/// CRC32 initial value
pub const CRC32_INIT: u32 = 0xFFFF_FFFF;

/// Reflected CRC16 with polynomial `0x8408`, no final xor
///
/// Chainable: pass the previous result as `init` to continue over more
/// data.
#[must_use]
pub fn crc16(data: &[u8], init: u16) -> u16 {
    let mut crc = init;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Reflected CRC32 with polynomial `0xEDB88320`, no final xor
///
/// Chainable like [`crc16`]. Note that unlike the common zlib variant,
/// DESFire transmits the register value directly without complementing it.
#[must_use]
pub fn crc32(data: &[u8], init: u32) -> u32 {
    let mut crc = init;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Length of `size` rounded up to the next multiple of `block_size`
#[must_use]
pub fn padded_len(size: usize, block_size: usize) -> usize {
    size.div_ceil(block_size) * block_size
}

/// Zero-pad a buffer starting at `offset` up to a block boundary
pub fn zero_pad(data: &mut Vec<u8>, offset: usize, block_size: usize) {
    let padded = offset + padded_len(data.len() - offset, block_size);
    data.resize(padded, 0x00);
}

/// CBC encryption in place; `iv` is updated to the last ciphertext block
pub fn cbc_encrypt<C: BlockEncrypt + BlockSizeUser>(cipher: &C, iv: &mut [u8], data: &mut [u8]) {
    let block_size = C::block_size();
    debug_assert_eq!(data.len() % block_size, 0);
    debug_assert_eq!(iv.len(), block_size);
    for block in data.chunks_exact_mut(block_size) {
        for (b, v) in block.iter_mut().zip(iv.iter()) {
            *b ^= v;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        iv.copy_from_slice(block);
    }
}

/// CBC decryption in place; `iv` is updated to the last ciphertext block
///
/// This doubles as the legacy send transformation: DESFire's legacy scheme
/// "encrypts" host-to-card data with the block decryption primitive, which
/// makes the chaining xor against the previous plaintext block.
pub fn cbc_decrypt<C: BlockDecrypt + BlockSizeUser>(cipher: &C, iv: &mut [u8], data: &mut [u8]) {
    let block_size = C::block_size();
    debug_assert_eq!(data.len() % block_size, 0);
    debug_assert_eq!(iv.len(), block_size);
    let mut chain = [0u8; 16];
    let chain = &mut chain[..block_size];
    for block in data.chunks_exact_mut(block_size) {
        chain.copy_from_slice(block);
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        for (b, v) in block.iter_mut().zip(iv.iter()) {
            *b ^= v;
        }
        iv.copy_from_slice(chain);
    }
}

/// Derive a CMAC subkey: shift left by one bit, xor `rb` into the last
/// byte if the shifted-out bit was set (RFC 4493 §2.3)
pub fn cmac_subkey(base: &[u8], rb: u8) -> Vec<u8> {
    let mut subkey = base.to_vec();
    let msb_was_set = subkey.first().is_some_and(|&b| b & 0x80 != 0);
    let mut carry = 0;
    for byte in subkey.iter_mut().rev() {
        let next_carry = *byte >> 7;
        *byte = (*byte << 1) | carry;
        carry = next_carry;
    }
    if msb_was_set {
        if let Some(last) = subkey.last_mut() {
            *last ^= rb;
        }
    }
    subkey
}

/// Scan a decrypted `[payload ‖ crc ‖ zero padding]` buffer for the end of
/// the payload, trying every candidate split whose padding is all zeros
///
/// `check` receives a candidate `[payload ‖ crc]` prefix and reports
/// whether the chained CRC comes out clean. The last verifying candidate
/// wins (zero bytes may legitimately end the CRC itself). Returns the
/// payload length without the CRC.
fn find_crc_tail(
    data: &[u8],
    block_size: usize,
    crc_size: usize,
    check: impl Fn(&[u8]) -> bool,
) -> Option<usize> {
    if data.is_empty() || data.len() % block_size != 0 {
        return None;
    }
    // The payload ends at or after the last nonzero byte; only the last
    // block can be padding
    let mut scan_from = data.len();
    let last_block = data.len() - block_size;
    while scan_from > last_block && data[scan_from - 1] == 0 {
        scan_from -= 1;
    }
    let mut payload_len = None;
    for end in scan_from..=data.len() {
        if check(&data[..end]) {
            payload_len = Some(end.max(crc_size) - crc_size);
        }
    }
    payload_len
}

/// Verify and strip a CRC16 tail plus zero padding (legacy scheme; the
/// CRC covers the payload only)
pub fn strip_padding_verify_crc16(data: &mut Vec<u8>) -> bool {
    match find_crc_tail(data, 8, 2, |candidate| crc16(candidate, CRC16_INIT) == 0) {
        Some(len) => {
            data.truncate(len);
            true
        }
        None => false,
    }
}

/// Verify and strip a CRC32 tail plus zero padding (modern scheme; the
/// CRC covers `payload ‖ status`, with the status byte sent separately)
pub fn strip_padding_verify_crc32(data: &mut Vec<u8>, status: u8, block_size: usize) -> bool {
    let check = |candidate: &[u8]| {
        let split = candidate.len().max(4) - 4;
        let crc_payload = crc32(&candidate[..split], CRC32_INIT);
        let crc_status = crc32(&[status], crc_payload);
        crc32(&candidate[split..], crc_status) == 0
    };
    match find_crc_tail(data, block_size, 4, check) {
        Some(len) => {
            data.truncate(len);
            true
        }
        None => false,
    }
}

/// Encode a key version into the parity bits (LSBs) of a DES-family key
pub fn set_key_version(key: &mut [u8], mut version: u8) {
    for byte in key.iter_mut() {
        *byte = (*byte & 0xFE) | (version >> 7);
        version <<= 1;
    }
}

/// Read the key version back out of the parity bits of a DES-family key
#[must_use]
pub fn get_key_version(key: &[u8]) -> u8 {
    key.iter()
        .take(8)
        .fold(0, |version, &byte| (version << 1) | (byte & 0x01))
}
