// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Session signing and key derivation from the shared hash key.

use core::fmt::Write;

use sha1::{Digest as _, Sha1};

use crate::prog::{ProgError, ProgInitParams};

/// Key used by the demo bootloader and the upload tool unless overridden.
pub const DEMO_HASH_KEY: &str = "fwup-demo-key-01";

/// Longest accepted signing string.
pub const MAX_HASH_INPUT: usize = 255;

/// Key bytes taken from the hash key for each block key.
const BLOCK_KEY_PREFIX: usize = 14;

/// Build the canonical signing string for an init request.
pub fn hash_input(
    key: &str,
    params: &ProgInitParams,
) -> Result<heapless::String<MAX_HASH_INPUT>, ProgError> {
    let mut s = heapless::String::new();
    write!(
        s,
        "{}-{:05}-{}-{}-{:06}-{}-{}-{:08X}",
        key,
        params.part_number,
        params.part_rev_min,
        params.part_rev_max,
        params.serial_number,
        params.data_format,
        params.length,
        params.checksum
    )
    .map_err(|_| ProgError::Hash)?;
    Ok(s)
}

/// SHA-1 digest a host must supply with an init request.
pub fn init_digest(key: &str, params: &ProgInitParams) -> Result<[u8; 20], ProgError> {
    let input = hash_input(key, params)?;
    let mut digest = [0u8; 20];
    digest.copy_from_slice(&Sha1::digest(input.as_bytes()));
    Ok(digest)
}

/// Per-block decryption key: the first 14 key bytes (zero padded) followed by
/// the little-endian block counter.
pub fn block_key(key: &str, counter: u16) -> [u8; 16] {
    let mut out = [0u8; 16];
    let src = key.as_bytes();
    let n = src.len().min(BLOCK_KEY_PREFIX);
    out[..n].copy_from_slice(&src[..n]);
    out[BLOCK_KEY_PREFIX..].copy_from_slice(&counter.to_le_bytes());
    out
}

/// Backdoor comparison key: the hash key padded with ASCII zeros to 8 bytes.
pub fn backdoor_key(key: &str) -> [u8; 8] {
    let mut out = [b'0'; 8];
    let src = key.as_bytes();
    let n = src.len().min(out.len());
    out[..n].copy_from_slice(&src[..n]);
    out
}
