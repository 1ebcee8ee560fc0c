use hmac::{Hmac, Mac};
use sha1::digest::generic_array::GenericArray;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::{KeyMaterial, Password};
use crate::hashing::Checksum;

type HmacSha256 = Hmac<Sha256>;

const RAR30_ROUNDS: u32 = 0x40000;
const RAR30_IV_STEP: u32 = RAR30_ROUNDS / 16;

/// Largest PBKDF2 iteration exponent accepted for RAR 5.0 keys.
pub const RAR50_MAX_LG2_COUNT: u8 = 24;

/// Extra PBKDF2 iterations for each of the hash key and password check.
const RAR50_EXTRA_ROUNDS: u32 = 16;

const SHA1_INIT: [u32; 5] = [0x6745_2301, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476, 0xc3d2_e1f0];

/// SHA-1 with the block handling of the RAR 2.9 key derivation.
///
/// When a full block is hashed straight out of the caller's buffer, the
/// last 16 words of the expanded message schedule are written back over
/// that block. The next round then hashes the modified buffer, so keys
/// only match when this is reproduced exactly.
#[derive(Clone)]
struct LegacySha1 {
    state: [u32; 5],
    buffer: [u8; 64],
    count: u64,
}

impl LegacySha1 {
    fn new() -> LegacySha1 {
        LegacySha1 {
            state: SHA1_INIT,
            buffer: [0; 64],
            count: 0,
        }
    }

    fn compress(state: &mut [u32; 5], block: &[u8]) {
        let block = GenericArray::clone_from_slice(block);
        sha1::compress(state, std::slice::from_ref(&block));
    }

    fn update(&mut self, data: &[u8]) {
        let mut j = (self.count & 63) as usize;
        self.count += data.len() as u64;
        let mut i = 0;
        if j + data.len() > 63 {
            i = 64 - j;
            self.buffer[j..].copy_from_slice(&data[..i]);
            Self::compress(&mut self.state, &self.buffer);
            while i + 63 < data.len() {
                Self::compress(&mut self.state, &data[i..i + 64]);
                i += 64;
            }
            j = 0;
        }
        self.buffer[j..j + data.len() - i].copy_from_slice(&data[i..]);
    }

    fn update_with_writeback(&mut self, data: &mut [u8]) {
        let mut j = (self.count & 63) as usize;
        self.count += data.len() as u64;
        let mut i = 0;
        if j + data.len() > 63 {
            i = 64 - j;
            self.buffer[j..].copy_from_slice(&data[..i]);
            Self::compress(&mut self.state, &self.buffer);
            while i + 63 < data.len() {
                let block = &mut data[i..i + 64];
                Self::compress(&mut self.state, block);
                let tail = schedule_tail(block);
                for (word, out) in tail.iter().zip(block.chunks_exact_mut(4)) {
                    out.copy_from_slice(&word.to_le_bytes());
                }
                i += 64;
            }
            j = 0;
        }
        self.buffer[j..j + data.len() - i].copy_from_slice(&data[i..]);
    }

    fn finalize(mut self) -> [u32; 5] {
        let bits = self.count.wrapping_mul(8);
        self.update(&[0x80]);
        while self.count & 63 != 56 {
            self.update(&[0]);
        }
        self.update(&bits.to_be_bytes());
        self.state
    }
}

/// Words 64..80 of the SHA-1 message schedule of `block`.
fn schedule_tail(block: &[u8]) -> [u32; 16] {
    let mut w = [0u32; 80];
    for (t, chunk) in block.chunks_exact(4).enumerate() {
        w[t] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    for t in 16..80 {
        w[t] = (w[t - 3] ^ w[t - 8] ^ w[t - 14] ^ w[t - 16]).rotate_left(1);
    }
    let mut tail = [0u32; 16];
    tail.copy_from_slice(&w[64..80]);
    tail
}

/// RAR 2.9 key and IV from a password and optional 8-byte salt.
pub(crate) fn derive_rar30(password: &Password, salt: Option<&[u8]>) -> KeyMaterial {
    let mut raw = Zeroizing::new(password.to_utf16le());
    if let Some(salt) = salt {
        raw.extend_from_slice(salt);
    }

    let mut sha = LegacySha1::new();
    let mut iv = [0u8; 16];
    for i in 0..RAR30_ROUNDS {
        sha.update_with_writeback(&mut raw);
        sha.update(&[i as u8, (i >> 8) as u8, (i >> 16) as u8]);
        if i % RAR30_IV_STEP == 0 {
            let digest = sha.clone().finalize();
            iv[(i / RAR30_IV_STEP) as usize] = digest[4] as u8;
        }
    }

    let digest = sha.finalize();
    let mut key = [0u8; 32];
    for (out, word) in key.chunks_exact_mut(4).zip(digest.iter().take(4)) {
        out.copy_from_slice(&word.to_le_bytes());
    }

    KeyMaterial {
        key,
        key_len: 16,
        iv,
        hash_key: [0; 32],
        password_check: [0; 8],
    }
}

fn hmac(key: &[u8]) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length")
}

fn finalize_into(mac: HmacSha256) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// RAR 5.0 key, hash key and password check from one PBKDF2 chain.
///
/// The key is the PBKDF2 output after `1 << lg2_count` iterations. The
/// chain then runs 16 more iterations for the hash key and 16 more for
/// the password check value, which is folded to 8 bytes.
pub(crate) fn derive_rar50(password: &Password, salt: &[u8], lg2_count: u8) -> KeyMaterial {
    let prf = hmac(password.as_bytes());
    let count = 1u32 << lg2_count.min(RAR50_MAX_LG2_COUNT);

    let mut first = prf.clone();
    first.update(salt);
    first.update(&1u32.to_be_bytes());
    let mut u = Zeroizing::new(finalize_into(first));
    let mut f = Zeroizing::new(*u);

    let mut values = Zeroizing::new([[0u8; 32]; 3]);
    for (stage, rounds) in [count - 1, RAR50_EXTRA_ROUNDS, RAR50_EXTRA_ROUNDS]
        .into_iter()
        .enumerate()
    {
        for _ in 0..rounds {
            let mut mac = prf.clone();
            mac.update(&u[..]);
            *u = finalize_into(mac);
            for (a, b) in f.iter_mut().zip(u.iter()) {
                *a ^= b;
            }
        }
        values[stage] = *f;
    }

    let mut password_check = [0u8; 8];
    for (i, b) in values[2].iter().enumerate() {
        password_check[i % 8] ^= b;
    }

    KeyMaterial {
        key: values[0],
        key_len: 32,
        iv: [0; 16],
        hash_key: values[1],
        password_check,
    }
}

/// Compare derived material against a stored RAR 5.0 check record
/// (8 check bytes followed by 4 bytes of their SHA-256).
///
/// `None` when the record itself is damaged and cannot be relied on.
pub(crate) fn check_password(material: &KeyMaterial, stored: &[u8; 12]) -> Option<bool> {
    let digest = Sha256::digest(&stored[..8]);
    if digest[..4] != stored[8..] {
        return None;
    }
    Some(material.password_check()[..] == stored[..8])
}

/// Replace a content checksum with the password keyed MAC RAR 5.0 stores
/// for entries whose encryption record requests it.
pub(crate) fn mac_checksum(hash_key: &[u8; 32], checksum: Checksum) -> Checksum {
    match checksum {
        Checksum::Crc32(crc) => {
            let mut mac = hmac(hash_key);
            mac.update(&crc.to_le_bytes());
            let digest = finalize_into(mac);
            let folded = digest
                .iter()
                .enumerate()
                .fold(0u32, |acc, (i, b)| acc ^ (u32::from(*b) << ((i & 3) * 8)));
            Checksum::Crc32(folded)
        }
        Checksum::Blake2sp(digest) => {
            let mut mac = hmac(hash_key);
            mac.update(&digest);
            Checksum::Blake2sp(finalize_into(mac))
        }
        other => other,
    }
}
