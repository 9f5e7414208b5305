// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! XXTEA (corrected block TEA) over little-endian words, in place.
//!
//! Buffers are processed as whole 32-bit words; trailing bytes past the last
//! full word and buffers shorter than two words are left untouched.

const DELTA: u32 = 0x9E37_79B9;

fn key_words(key: &[u8; 16]) -> [u32; 4] {
    let mut k = [0u32; 4];
    for (word, chunk) in k.iter_mut().zip(key.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    k
}

fn get(buf: &[u8], i: usize) -> u32 {
    let b = &buf[i * 4..i * 4 + 4];
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn set(buf: &mut [u8], i: usize, v: u32) {
    buf[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
}

fn mx(sum: u32, y: u32, z: u32, p: usize, e: usize, k: &[u32; 4]) -> u32 {
    (((z >> 5) ^ (y << 2)).wrapping_add((y >> 3) ^ (z << 4)))
        ^ ((sum ^ y).wrapping_add(k[(p & 3) ^ e] ^ z))
}

fn rounds(n: usize) -> u32 {
    6 + 52 / n as u32
}

pub fn encrypt(buf: &mut [u8], key: &[u8; 16]) {
    let n = buf.len() / 4;
    if n < 2 {
        return;
    }
    let k = key_words(key);
    let mut sum = 0u32;
    let mut z = get(buf, n - 1);

    for _ in 0..rounds(n) {
        sum = sum.wrapping_add(DELTA);
        let e = ((sum >> 2) & 3) as usize;
        for p in 0..n {
            let y = get(buf, (p + 1) % n);
            z = get(buf, p).wrapping_add(mx(sum, y, z, p, e, &k));
            set(buf, p, z);
        }
    }
}

pub fn decrypt(buf: &mut [u8], key: &[u8; 16]) {
    let n = buf.len() / 4;
    if n < 2 {
        return;
    }
    let k = key_words(key);
    let mut sum = rounds(n).wrapping_mul(DELTA);
    let mut y = get(buf, 0);

    while sum != 0 {
        let e = ((sum >> 2) & 3) as usize;
        for p in (0..n).rev() {
            let z = get(buf, (p + n - 1) % n);
            y = get(buf, p).wrapping_sub(mx(sum, y, z, p, e, &k));
            set(buf, p, y);
        }
        sum = sum.wrapping_sub(DELTA);
    }
}
