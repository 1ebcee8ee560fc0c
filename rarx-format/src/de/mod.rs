//! Header decoding for the three RAR header generations.

mod v14;
mod v15;
mod v50;

use std::sync::Arc;

use crate::crypto::{check_password, Kdf, KeyCache, KeyMaterial, Password};
use crate::error::DecodeError;
use crate::header::Format;
use crate::raw::RawReader;
use crate::record::{CryptHeader, Header};

/// How the headers following the current one are encrypted.
pub(crate) enum HeaderKey {
    /// RAR 1.5: each header carries its own salt, the key is derived per header.
    Rar30,
    /// RAR 5.0: one key for the volume, each header carries its own IV.
    Rar50(KeyMaterial),
}

/// Decodes one block at a time from a volume buffer.
///
/// The codec keeps the state that carries from one block to the next:
/// header encryption, which only starts after the main or crypt header,
/// and for RAR 1.4 the solid flag of the main header.
pub struct HeaderCodec {
    format: Format,
    raw: RawReader,
    password: Option<Password>,
    keys: Arc<KeyCache>,
    header_key: Option<HeaderKey>,
    /// The next RAR 1.4 block is the main header of a volume.
    expect_main: bool,
    solid: bool,
    files_seen: u64,
}

impl HeaderCodec {
    pub fn new(format: Format, password: Option<Password>, keys: Arc<KeyCache>) -> HeaderCodec {
        HeaderCodec {
            format,
            raw: RawReader::new(),
            password,
            keys,
            header_key: None,
            expect_main: true,
            solid: false,
            files_seen: 0,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn headers_encrypted(&self) -> bool {
        self.header_key.is_some()
    }

    /// Every volume starts with unencrypted main (and crypt) headers.
    pub fn start_volume(&mut self) {
        self.header_key = None;
        self.expect_main = true;
    }

    /// Decode the block at `position`, or `None` at the end of the volume data.
    pub fn decode_next(
        &mut self,
        data: &[u8],
        position: u64,
        volume: usize,
    ) -> Result<Option<Header>, DecodeError> {
        let len = data.len() as u64;
        if position == len {
            return Ok(None);
        }
        if position > len {
            return Err(DecodeError::TruncatedBlock {
                position,
                needed: (position - len) as usize,
                available: 0,
            });
        }

        let header = match self.format {
            Format::Legacy14 => v14::decode(self, data, position, volume)?,
            Format::Legacy15 => v15::decode(self, data, position, volume)?,
            Format::Modern50 => v50::decode(self, data, position, volume)?,
            Format::FutureUnknown => return Err(DecodeError::UnrecognizedFormat),
        };
        check_extent(&header, len)?;

        tracing::debug!(
            kind = header.kind.name(),
            volume,
            start = format_args!("{:#x}", header.position),
            end = format_args!("{:#x}", header.next_position()),
            bytes = header.raw_size,
            "decoded block"
        );
        Ok(Some(header))
    }

    /// Decode a header whose plain bytes were cached by a quick open record.
    pub fn decode_cached(
        &mut self,
        bytes: &[u8],
        position: u64,
        volume: usize,
    ) -> Result<Header, DecodeError> {
        match self.format {
            Format::Modern50 => v50::decode_cached(self, bytes, position, volume),
            _ => Err(DecodeError::CorruptHeader {
                position,
                reason: "cached headers exist only in RAR 5.0 archives",
            }),
        }
    }

    fn enable_rar50_headers(&mut self, crypt: &CryptHeader) -> Result<(), DecodeError> {
        let password = self.password.as_ref().ok_or(DecodeError::MissingPassword)?;
        let material = self.keys.derive_key(
            password,
            Some(&crypt.salt),
            Kdf::Rar50 {
                lg2_count: crypt.lg2_count,
            },
        );
        if let Some(check) = &crypt.check {
            if check_password(&material, check) == Some(false) {
                return Err(DecodeError::BadPassword);
            }
        }
        self.header_key = Some(HeaderKey::Rar50(material));
        Ok(())
    }
}

/// A block and its data must end inside the volume it was read from.
fn check_extent(header: &Header, volume_len: u64) -> Result<(), DecodeError> {
    let end = header
        .position
        .checked_add(header.raw_size)
        .and_then(|end| end.checked_add(header.data_size));
    match end {
        Some(end) if end <= volume_len => Ok(()),
        _ => Err(DecodeError::CorruptHeader {
            position: header.position,
            reason: "block data runs past the end of the volume",
        }),
    }
}

/// Read the `N` bytes at `offset` that sit in front of an encrypted header.
fn prefix<const N: usize>(data: &[u8], offset: usize, position: u64) -> Result<[u8; N], DecodeError> {
    let bytes = offset
        .checked_add(N)
        .and_then(|end| data.get(offset..end))
        .ok_or(DecodeError::TruncatedBlock {
            position,
            needed: N,
            available: data.len().saturating_sub(offset),
        })?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}
