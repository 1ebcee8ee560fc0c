//! The quick open record: copies of the headers of a RAR 5.0 volume stored
//! near its end, so that a listing does not need to walk every block.
//!
//! The record is a read-through cache and never trusted on its own. It is
//! only used when its own checksums hold, the end of the volume is exactly
//! where it was when the record was written, and the cached bytes still
//! match the live headers they were copied from. The record may leave
//! headers out; the reader decodes those from the volume itself.

use crate::de::HeaderCodec;
use crate::error::DecodeError;
use crate::hashing::crc32;
use crate::raw::RawReader;
use crate::record::{Header, HeaderKind, MainHeader};
use crate::volume::Volume;

const QO_NAME: &str = "QO";
const MAX_HEADER_SIZE: usize = 0x200000;

/// A header as stored in the quick open record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedHeader {
    /// Offset of the live header in the volume.
    pub position: u64,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct QuickOpenIndex {
    entries: Vec<CachedHeader>,
    headers: Vec<Header>,
    qo_position: u64,
    data_crc: u32,
    volume_size: u64,
}

macro_rules! reject {
    ($reason:expr) => {{
        tracing::debug!(reason = $reason, "quick open record rejected");
        return None;
    }};
}

impl QuickOpenIndex {
    /// Load and validate the quick open record of `volume`, whose main
    /// header is `main`. Headers cached before `first_block` are ignored.
    pub fn try_load(
        volume: &Volume,
        main: &MainHeader,
        codec: &mut HeaderCodec,
        first_block: u64,
    ) -> Option<QuickOpenIndex> {
        let qo_position = main.quick_open_offset?;
        if codec.headers_encrypted() {
            reject!("headers are encrypted");
        }
        let data: &[u8] = &volume.data;
        let volume_size = data.len() as u64;

        let service = match codec.decode_next(data, qo_position, volume.index) {
            Ok(Some(header)) => header,
            Ok(None) => reject!("locator points past the end of the volume"),
            Err(e) => {
                tracing::debug!(error = %e, "quick open service header unreadable");
                return None;
            }
        };
        let entry = match &service.kind {
            HeaderKind::Service(s) if s.name == QO_NAME => &s.entry,
            _ => reject!("locator does not point at a quick open block"),
        };
        if !entry.compression.is_stored() || entry.is_encrypted() {
            reject!("quick open data is packed or encrypted");
        }

        let start = service.data_position();
        let end = service.next_position();
        if end > volume_size {
            reject!("quick open data runs past the end of the volume");
        }
        let qo_data = &data[start as usize..end as usize];
        let data_crc = crc32(qo_data);
        if !entry.checksum.is_none() && entry.checksum.compute(qo_data) != entry.checksum {
            reject!("quick open data checksum mismatch");
        }

        match codec.decode_next(data, end, volume.index) {
            Ok(Some(h)) if matches!(h.kind, HeaderKind::EndOfArchive(_)) && h.next_position() == volume_size => {}
            _ => reject!("volume tail changed since the record was written"),
        }

        let entries = match parse_records(qo_data, qo_position) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(error = %e, "quick open record malformed");
                return None;
            }
        };
        let entries: Vec<_> = entries.into_iter().filter(|e| e.position >= first_block).collect();

        let mut previous_end = first_block;
        for cached in &entries {
            if cached.position < previous_end {
                reject!("cached headers out of order");
            }
            previous_end = cached.position + cached.raw.len() as u64;
            if previous_end > qo_position {
                reject!("cached header overlaps the quick open block");
            }
        }
        for cached in [entries.first(), entries.last()].into_iter().flatten() {
            let live = &data[cached.position as usize..cached.position as usize + cached.raw.len()];
            if live != cached.raw.as_slice() {
                reject!("cached header differs from the live header");
            }
        }

        let mut headers = Vec::with_capacity(entries.len());
        let mut previous_end = first_block;
        for cached in &entries {
            let header = match codec.decode_cached(&cached.raw, cached.position, volume.index) {
                Ok(header) => header,
                Err(e) => {
                    tracing::debug!(error = %e, "cached header unreadable");
                    return None;
                }
            };
            if !matches!(
                header.kind,
                HeaderKind::File(_) | HeaderKind::Service(_) | HeaderKind::Recovery(_) | HeaderKind::Unknown { .. }
            ) {
                reject!("unexpected block kind in quick open record");
            }
            if header.position < previous_end || header.next_position() > qo_position {
                reject!("cached header data overlaps another block");
            }
            previous_end = header.next_position();
            headers.push(header);
        }

        tracing::debug!(
            headers = headers.len(),
            start = format_args!("{:#x}", qo_position),
            "quick open record accepted"
        );
        Some(QuickOpenIndex {
            entries,
            headers,
            qo_position,
            data_crc,
            volume_size,
        })
    }

    pub fn entries(&self) -> &[CachedHeader] {
        &self.entries
    }

    /// The cached headers, decoded, in archive order.
    pub fn lookup_headers(&self) -> impl Iterator<Item = Header> + '_ {
        self.headers.iter().cloned()
    }

    /// Offset of the quick open block itself.
    pub fn position(&self) -> u64 {
        self.qo_position
    }

    pub fn data_crc(&self) -> u32 {
        self.data_crc
    }

    pub fn volume_size(&self) -> u64 {
        self.volume_size
    }
}

/// Split quick open data into its records.
///
/// Each record is a CRC32 over the rest of the record, the record size,
/// flags, the distance back from the quick open block to the live header,
/// and the header bytes.
fn parse_records(data: &[u8], qo_position: u64) -> Result<Vec<CachedHeader>, DecodeError> {
    let mut raw = RawReader::new();
    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        raw.load(qo_position, &data[offset..]);
        let stored = raw.get_u32()?;
        let size = raw.get_vint()? as usize;
        let record_end = raw.position() + size;
        if size == 0 || record_end > raw.len() {
            return Err(DecodeError::CorruptHeader {
                position: qo_position,
                reason: "quick open record size",
            });
        }
        if crc32(&raw.data()[4..record_end]) != stored {
            return Err(DecodeError::HeaderCrcMismatch {
                position: qo_position,
            });
        }
        let _flags = raw.get_vint()?;
        let back = raw.get_vint()?;
        let header_size = raw.get_vint()? as usize;
        if back > qo_position || header_size > MAX_HEADER_SIZE || raw.position() + header_size > record_end {
            return Err(DecodeError::CorruptHeader {
                position: qo_position,
                reason: "quick open record fields",
            });
        }
        entries.push(CachedHeader {
            position: qo_position - back,
            raw: raw.get_bytes(header_size)?.to_vec(),
        });
        offset += record_end;
    }
    Ok(entries)
}
