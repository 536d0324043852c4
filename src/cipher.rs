// src/cipher.rs

//! Partial-block XXTEA cipher for on-device pack artifacts
//!
//! The retail firmware obscures every index and asset file by running
//! Corrected Block TEA over the first 512 bytes only; anything past that
//! stays in cleartext. Data words are little-endian and key words big-endian,
//! matching the firmware, and at most 128 words take part. This is
//! obfuscation, not authenticated encryption: a wrong key or damaged bytes
//! decipher to garbage without any error.

const DELTA: u32 = 0x9e37_79b9;
const MAX_WORDS: usize = 128;

/// Number of leading bytes that take part in the cipher
pub const CIPHER_BLOCK_LEN: usize = 512;

fn key_words(key: &[u8; 16]) -> [u32; 4] {
    let mut words = [0u32; 4];
    for (i, chunk) in key.chunks_exact(4).enumerate() {
        words[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

fn mix(sum: u32, y: u32, z: u32, p: usize, e: u32, key: &[u32; 4]) -> u32 {
    let a = ((z >> 5) ^ (y << 2)).wrapping_add((y >> 3) ^ (z << 4));
    let b = (sum ^ y).wrapping_add(key[(p & 3) ^ e as usize] ^ z);
    a ^ b
}

fn encrypt_words(v: &mut [u32], key: &[u32; 4]) {
    let n = v.len();
    if n < 2 {
        return;
    }
    let rounds = 6 + 52 / n;
    let mut sum = 0u32;
    let mut z = v[n - 1];
    for _ in 0..rounds {
        sum = sum.wrapping_add(DELTA);
        let e = (sum >> 2) & 3;
        for p in 0..n {
            let y = v[(p + 1) % n];
            v[p] = v[p].wrapping_add(mix(sum, y, z, p, e, key));
            z = v[p];
        }
    }
}

fn decrypt_words(v: &mut [u32], key: &[u32; 4]) {
    let n = v.len();
    if n < 2 {
        return;
    }
    let rounds = 6 + 52 / n;
    let mut sum = (rounds as u32).wrapping_mul(DELTA);
    let mut y = v[0];
    while sum != 0 {
        let e = (sum >> 2) & 3;
        for p in (0..n).rev() {
            let z = if p == 0 { v[n - 1] } else { v[p - 1] };
            v[p] = v[p].wrapping_sub(mix(sum, y, z, p, e, key));
            y = v[p];
        }
        sum = sum.wrapping_sub(DELTA);
    }
}

fn transform(data: &[u8], key: &[u8; 16], decrypt: bool) -> Vec<u8> {
    let mut out = data.to_vec();
    let prefix_len = data.len().min(CIPHER_BLOCK_LEN);
    let nwords = (prefix_len / 4).min(MAX_WORDS);
    if nwords < 2 {
        // btea is undefined below two words; short inputs pass through
        return out;
    }
    let mut words = Vec::with_capacity(nwords);
    for i in 0..nwords {
        words.push(u32::from_le_bytes([
            out[i * 4],
            out[i * 4 + 1],
            out[i * 4 + 2],
            out[i * 4 + 3],
        ]));
    }
    let key = key_words(key);
    if decrypt {
        decrypt_words(&mut words, &key);
    } else {
        encrypt_words(&mut words, &key);
    }
    for (i, word) in words.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    out
}

/// Cipher the leading block of `data` for writing a device artifact
pub fn cipher_block(data: &[u8], key: &[u8; 16]) -> Vec<u8> {
    transform(data, key, false)
}

/// Decipher the leading block of a device artifact
pub fn decipher_block(data: &[u8], key: &[u8; 16]) -> Vec<u8> {
    transform(data, key, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [
        0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x10, 0x32, 0x54, 0x76, 0x98, 0xba, 0xdc,
        0xfe,
    ];

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_round_trip_all_lengths() {
        for len in [0, 1, 5, 7, 8, 12, 100, 511, 512, 513, 2048] {
            let data = sample(len);
            let ciphered = cipher_block(&data, &KEY);
            assert_eq!(decipher_block(&ciphered, &KEY), data, "length {len}");
        }
    }

    #[test]
    fn test_empty_input_returns_empty() {
        assert!(decipher_block(&[], &KEY).is_empty());
    }

    #[test]
    fn test_ciphertext_differs_from_plaintext() {
        let data = sample(512);
        assert_ne!(cipher_block(&data, &KEY), data);
    }

    #[test]
    fn test_only_first_block_is_ciphered() {
        let data = sample(2048);
        let ciphered = cipher_block(&data, &KEY);
        assert_ne!(&ciphered[..512], &data[..512]);
        assert_eq!(&ciphered[512..], &data[512..]);
    }

    #[test]
    fn test_short_input_passes_through() {
        // fewer than two 32-bit words cannot be ciphered
        let data = sample(7);
        assert_eq!(cipher_block(&data, &KEY), data);
    }

    #[test]
    fn test_trailing_bytes_of_partial_word_stay_plain() {
        let data = sample(10);
        let ciphered = cipher_block(&data, &KEY);
        assert_eq!(&ciphered[8..], &data[8..]);
        assert_ne!(&ciphered[..8], &data[..8]);
    }

    #[test]
    fn test_wrong_key_yields_garbage_not_error() {
        let data = sample(512);
        let ciphered = cipher_block(&data, &KEY);
        let wrong = decipher_block(&ciphered, &[0u8; 16]);
        assert_ne!(wrong, data);
    }
}
