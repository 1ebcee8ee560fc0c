//! A bounds-checked cursor over the bytes of one header.
//!
//! The buffer is owned by the reader and reused from header to header.
//! With a cipher attached, bytes are taken from the volume in whole cipher
//! blocks and decrypted as they are appended, so field accessors only ever
//! see plaintext.

use byteorder::{ByteOrder, LittleEndian};

use crate::crypto::BlockCipher;
use crate::error::DecodeError;

/// Longest RAR5 variable length integer, in bytes.
const MAX_VINT_LEN: usize = 10;

pub struct RawReader {
    buf: Vec<u8>,
    pos: usize,
    /// Absolute position of the block in its volume.
    origin: u64,
    cipher: Option<Box<dyn BlockCipher>>,
}

impl Default for RawReader {
    fn default() -> Self {
        RawReader::new()
    }
}

impl RawReader {
    pub fn new() -> RawReader {
        RawReader {
            buf: Vec::with_capacity(256),
            pos: 0,
            origin: 0,
            cipher: None,
        }
    }

    /// Start a new block at `origin`, optionally decrypting what gets appended.
    pub fn reset(&mut self, origin: u64, cipher: Option<Box<dyn BlockCipher>>) {
        self.buf.clear();
        self.pos = 0;
        self.origin = origin;
        self.cipher = cipher;
    }

    /// Append at least `len` bytes of `src` starting at `offset`.
    ///
    /// Returns how many source bytes were consumed, which is `len` rounded
    /// up to the cipher block size when a cipher is attached.
    pub fn fill(&mut self, src: &[u8], offset: usize, len: usize) -> Result<usize, DecodeError> {
        let len = match &self.cipher {
            Some(c) => round_up(len, c.block_size()),
            None => len,
        };
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= src.len())
            .ok_or(DecodeError::TruncatedBlock {
                position: self.origin,
                needed: len,
                available: src.len().saturating_sub(offset),
            })?;

        let start = self.buf.len();
        self.buf.extend_from_slice(&src[offset..end]);
        if let Some(cipher) = self.cipher.as_mut() {
            cipher.decrypt_blocks(&mut self.buf[start..]);
        }
        Ok(len)
    }

    /// Replace the contents with already plain bytes.
    pub fn load(&mut self, origin: u64, bytes: &[u8]) {
        self.reset(origin, None);
        self.buf.extend_from_slice(bytes);
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    pub fn origin(&self) -> u64 {
        self.origin
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Drop everything past `len`, e.g. cipher padding after the declared header size.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    fn take(&mut self, n: usize) -> Result<&[u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::TruncatedBlock {
                position: self.origin,
                needed: self.pos + n,
                available: self.buf.len(),
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..self.pos])
    }

    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, DecodeError> {
        self.take(2).map(LittleEndian::read_u16)
    }

    pub fn get_u32(&mut self) -> Result<u32, DecodeError> {
        self.take(4).map(LittleEndian::read_u32)
    }

    pub fn get_u64(&mut self) -> Result<u64, DecodeError> {
        self.take(8).map(LittleEndian::read_u64)
    }

    /// RAR5 variable length integer: seven bits per byte, low bits first,
    /// high bit set on every byte but the last.
    pub fn get_vint(&mut self) -> Result<u64, DecodeError> {
        let mut value = 0u64;
        for i in 0..MAX_VINT_LEN {
            let b = self.get_u8()?;
            value |= u64::from(b & 0x7f) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::CorruptHeader {
            position: self.origin,
            reason: "variable length integer too long",
        })
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&[u8], DecodeError> {
        self.take(n)
    }

    pub fn get_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n).map(|_| ())
    }
}

#[inline]
pub(crate) fn round_up(n: usize, block: usize) -> usize {
    (n + block - 1) / block * block
}
