// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware image packing: padding, checksum, signed init request and the
//! block stream sent with `ProgScratch`.

use anyhow::{bail, Result};

use fwup_common::auth;
use fwup_common::prog::MIN_BLOCK_LEN;
use fwup_common::{xxtea, DataFormat, ProgInitParams, Section, CRC32, MAX_BLOCK_SIZE, PHRASE_SIZE};

/// Hardware filters carried in the init request. Zero matches any device.
#[derive(Clone, Copy, Debug, Default)]
pub struct Target {
    pub part_number: u16,
    pub part_rev_min: u8,
    pub part_rev_max: u8,
    pub serial_number: u32,
}

/// A packed image ready to stream.
pub struct PackedImage {
    pub params: ProgInitParams,
    /// Blocks as sent on the wire, encrypted if the format asks for it.
    pub blocks: Vec<Vec<u8>>,
    /// Padded plaintext, as it will land in flash.
    pub plain: Vec<u8>,
}

/// Pad `firmware` to whole phrases with 0xFF.
pub fn pad(firmware: &[u8]) -> Vec<u8> {
    let mut data = firmware.to_vec();
    let phrase = PHRASE_SIZE as usize;
    let padded = data.len().div_ceil(phrase) * phrase;
    data.resize(padded, 0xFF);
    data
}

pub fn pack(
    firmware: &[u8],
    section: Section,
    format: DataFormat,
    target: Target,
    key: &str,
    block_size: usize,
) -> Result<PackedImage> {
    if firmware.is_empty() {
        bail!("Firmware image is empty");
    }
    if !format.supported() {
        bail!("Data format {:?} is not supported by the bootloader", format);
    }
    if block_size < MIN_BLOCK_LEN || block_size > MAX_BLOCK_SIZE || block_size % 8 != 0 {
        bail!(
            "Block size must be a multiple of 8 between {} and {}",
            MIN_BLOCK_LEN,
            MAX_BLOCK_SIZE
        );
    }

    let plain = pad(firmware);
    let length = u32::try_from(plain.len())?;

    let params = ProgInitParams {
        section: section as u8,
        part_number: target.part_number,
        part_rev_min: target.part_rev_min,
        part_rev_max: target.part_rev_max,
        serial_number: target.serial_number,
        data_format: format as u8,
        length,
        checksum: CRC32.checksum(&plain),
        hash: [0; 20],
    }
    .sign(key)
    .map_err(|e| anyhow::anyhow!("Failed to sign init request: {}", e))?;

    let blocks = plain
        .chunks(block_size)
        .enumerate()
        .map(|(index, chunk)| {
            let mut block = chunk.to_vec();
            if format.encrypted() {
                xxtea::encrypt(&mut block, &auth::block_key(key, index as u16));
            }
            block
        })
        .collect();

    Ok(PackedImage {
        params,
        blocks,
        plain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = auth::DEMO_HASH_KEY;

    #[test]
    fn test_pad_to_phrase() {
        assert_eq!(pad(&[1, 2, 3]), vec![1, 2, 3, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(pad(&[0u8; 16]).len(), 16);
    }

    #[test]
    fn test_pack_binary() {
        let fw: Vec<u8> = (0..100u8).collect();
        let img = pack(&fw, Section::Main, DataFormat::Binary, Target::default(), KEY, 32).unwrap();

        assert_eq!(img.params.length, 104);
        assert_eq!(img.params.checksum, CRC32.checksum(&img.plain));
        assert_eq!(img.params.hash, auth::init_digest(KEY, &img.params).unwrap());
        assert_eq!(img.blocks.len(), 4);
        assert_eq!(img.blocks[3].len(), 8);
        assert_eq!(img.blocks.concat(), img.plain);
    }

    #[test]
    fn test_pack_encrypted_blocks_decrypt_with_index_key() {
        let fw = vec![0x5Au8; 64];
        let img = pack(&fw, Section::Main, DataFormat::Encrypted, Target::default(), KEY, 32).unwrap();

        assert_ne!(img.blocks[0], img.plain[..32]);
        for (index, block) in img.blocks.iter().enumerate() {
            let mut block = block.clone();
            xxtea::decrypt(&mut block, &auth::block_key(KEY, index as u16));
            assert_eq!(block, img.plain[index * 32..(index + 1) * 32]);
        }
    }

    #[test]
    fn test_pack_rejects_bad_input() {
        let fw = vec![0u8; 16];
        let t = Target::default();
        assert!(pack(&[], Section::Main, DataFormat::Binary, t, KEY, 32).is_err());
        assert!(pack(&fw, Section::Main, DataFormat::Compressed, t, KEY, 32).is_err());
        assert!(pack(&fw, Section::Main, DataFormat::Binary, t, KEY, 12).is_err());
        assert!(pack(&fw, Section::Main, DataFormat::Binary, t, KEY, 2048).is_err());
    }
}
