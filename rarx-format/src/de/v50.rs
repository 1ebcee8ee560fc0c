//! RAR 5.0 headers: a common prologue of variable length integers, then
//! block specific fields and an optional area of typed extra records.

use byteorder::{ByteOrder, LittleEndian};
use enumflags2::BitFlags;

use super::{prefix, HeaderCodec, HeaderKey};
use crate::compression::CompressionInfo;
use crate::crypto::{Aes256Cbc, EntryEncryption};
use crate::error::DecodeError;
use crate::hashing::{crc32, Checksum};
use crate::raw::RawReader;
use crate::record::{
    filetime_datetime, unix_datetime, ArchiveFlag, CryptHeader, DataSegment, EndOfArchive,
    EntryFlag, FileEntry, FileTimes, Header, HeaderKind, HostOs, MainHeader, RecoveryHeader,
    Redirection, RedirectionKind, ServiceHeader,
};

pub(crate) const HEAD_MAIN: u64 = 1;
pub(crate) const HEAD_FILE: u64 = 2;
pub(crate) const HEAD_SERVICE: u64 = 3;
pub(crate) const HEAD_CRYPT: u64 = 4;
pub(crate) const HEAD_END: u64 = 5;

const HFL_EXTRA: u64 = 0x01;
const HFL_DATA: u64 = 0x02;
const HFL_SPLIT_BEFORE: u64 = 0x08;
const HFL_SPLIT_AFTER: u64 = 0x10;

const MHFL_VOLUME: u64 = 0x01;
const MHFL_VOLNUMBER: u64 = 0x02;
const MHFL_SOLID: u64 = 0x04;
const MHFL_PROTECT: u64 = 0x08;
const MHFL_LOCK: u64 = 0x10;

const MHEXTRA_LOCATOR: u64 = 1;
const MHEXTRA_LOCATOR_QLIST: u64 = 0x01;
const MHEXTRA_LOCATOR_RR: u64 = 0x02;

const FHFL_DIRECTORY: u64 = 0x01;
const FHFL_UTIME: u64 = 0x02;
const FHFL_CRC32: u64 = 0x04;
const FHFL_UNPUNKNOWN: u64 = 0x08;

const FHEXTRA_CRYPT: u64 = 1;
const FHEXTRA_HASH: u64 = 2;
const FHEXTRA_HTIME: u64 = 3;
const FHEXTRA_REDIR: u64 = 5;

const FHEXTRA_HASH_BLAKE2: u64 = 0;

const FHEXTRA_CRYPT_PSWCHECK: u64 = 0x01;
const FHEXTRA_CRYPT_HASHMAC: u64 = 0x02;

const FHEXTRA_HTIME_UNIXTIME: u64 = 0x01;
const FHEXTRA_HTIME_MTIME: u64 = 0x02;
const FHEXTRA_HTIME_CTIME: u64 = 0x04;
const FHEXTRA_HTIME_ATIME: u64 = 0x08;
const FHEXTRA_HTIME_UNIX_NS: u64 = 0x10;

const FHEXTRA_REDIR_DIR: u64 = 0x01;

const CHFL_CRYPT_PSWCHECK: u64 = 0x01;

const EHFL_NEXTVOLUME: u64 = 0x01;

const CRYPT_VERSION: u64 = 0;
const IV_SIZE: usize = 16;
/// CRC32, a one byte size, type and flags.
const MIN_HEAD: usize = 7;
pub(crate) const MAX_HEADER_SIZE: u64 = 0x200000;

pub(super) fn decode(
    codec: &mut HeaderCodec,
    data: &[u8],
    position: u64,
    volume: usize,
) -> Result<Header, DecodeError> {
    let start = position as usize;
    let iv_len = match &codec.header_key {
        Some(HeaderKey::Rar50(material)) => {
            let iv = prefix::<IV_SIZE>(data, start, position)?;
            codec
                .raw
                .reset(position, Some(Box::new(Aes256Cbc::new(material.key(), &iv))));
            IV_SIZE
        }
        _ => {
            codec.raw.reset(position, None);
            0
        }
    };

    let raw = &mut codec.raw;
    let mut consumed = raw.fill(data, start + iv_len, MIN_HEAD)?;
    let total = block_size(raw)?;
    if total > raw.len() {
        consumed += raw.fill(data, start + iv_len + consumed, total - raw.len())?;
    }
    verify_crc(raw, total)?;
    raw.truncate(total);

    let raw_size = (iv_len + consumed) as u64;
    let header = parse(codec, position, raw_size, volume)?;
    if let HeaderKind::Crypt(crypt) = &header.kind {
        codec.enable_rar50_headers(crypt)?;
    }
    Ok(header)
}

pub(super) fn decode_cached(
    codec: &mut HeaderCodec,
    bytes: &[u8],
    position: u64,
    volume: usize,
) -> Result<Header, DecodeError> {
    codec.raw.load(position, bytes);
    let total = block_size(&mut codec.raw)?;
    if total != bytes.len() {
        return Err(DecodeError::CorruptHeader {
            position,
            reason: "cached header size does not match its record",
        });
    }
    verify_crc(&codec.raw, total)?;
    parse(codec, position, total as u64, volume)
}

/// Size of the block from its CRC field to its last byte, leaving the
/// cursor after the size field.
fn block_size(raw: &mut RawReader) -> Result<usize, DecodeError> {
    let position = raw.origin();
    let corrupt = |raw: &RawReader| {
        if raw.is_encrypted() {
            DecodeError::FailedDecryption { position }
        } else {
            DecodeError::CorruptHeader {
                position,
                reason: "invalid header size",
            }
        }
    };

    raw.set_position(0);
    raw.skip(4)?;
    let size = match raw.get_vint() {
        Ok(size) => size,
        Err(DecodeError::TruncatedBlock { .. }) => return Err(corrupt(raw)),
        Err(e) => return Err(e),
    };
    if size == 0 || size > MAX_HEADER_SIZE {
        return Err(corrupt(raw));
    }
    Ok(raw.position() + size as usize)
}

fn verify_crc(raw: &RawReader, total: usize) -> Result<(), DecodeError> {
    let data = raw.data();
    let stored = LittleEndian::read_u32(&data[..4]);
    if crc32(&data[4..total]) == stored {
        return Ok(());
    }
    let position = raw.origin();
    Err(if raw.is_encrypted() {
        DecodeError::FailedDecryption { position }
    } else {
        DecodeError::HeaderCrcMismatch { position }
    })
}

fn parse(
    codec: &mut HeaderCodec,
    position: u64,
    raw_size: u64,
    volume: usize,
) -> Result<Header, DecodeError> {
    let raw = &mut codec.raw;
    let total = raw.len();
    let tag = raw.get_vint()?;
    let flags = raw.get_vint()?;
    let extra_size = if flags & HFL_EXTRA != 0 { raw.get_vint()? } else { 0 };
    let data_size = if flags & HFL_DATA != 0 { raw.get_vint()? } else { 0 };
    if extra_size > raw.remaining() as u64 {
        return Err(DecodeError::CorruptHeader {
            position,
            reason: "extra area larger than the header",
        });
    }
    let extra_start = total - extra_size as usize;
    let data_position = position + raw_size;

    let kind = match tag {
        HEAD_MAIN => HeaderKind::Main(main_header(raw, extra_start, position)?),
        HEAD_FILE | HEAD_SERVICE => {
            let entry = file_entry(raw, flags, data_size, extra_start, volume, data_position)?;
            if tag == HEAD_FILE {
                HeaderKind::File(entry)
            } else if entry.name == "RR" {
                HeaderKind::Recovery(RecoveryHeader {
                    data_size,
                    sectors: None,
                })
            } else {
                HeaderKind::Service(ServiceHeader {
                    name: entry.name.clone(),
                    entry,
                })
            }
        }
        HEAD_CRYPT => HeaderKind::Crypt(crypt_header(raw)?),
        HEAD_END => {
            let end_flags = raw.get_vint()?;
            HeaderKind::EndOfArchive(EndOfArchive {
                next_volume: end_flags & EHFL_NEXTVOLUME != 0,
                ..EndOfArchive::default()
            })
        }
        tag => HeaderKind::Unknown { tag },
    };

    Ok(Header {
        volume,
        position,
        raw_size,
        data_size,
        kind,
    })
}

fn main_header(raw: &mut RawReader, extra_start: usize, position: u64) -> Result<MainHeader, DecodeError> {
    let arc_flags = raw.get_vint()?;
    let mut main = MainHeader::default();
    if arc_flags & MHFL_VOLNUMBER != 0 {
        main.volume_number = Some(raw.get_vint()?);
    }

    main.flags |= ArchiveFlag::NewNumbering;
    for (bit, flag) in [
        (MHFL_VOLUME, ArchiveFlag::Volume),
        (MHFL_SOLID, ArchiveFlag::Solid),
        (MHFL_PROTECT, ArchiveFlag::RecoveryRecord),
        (MHFL_LOCK, ArchiveFlag::Locked),
    ] {
        if arc_flags & bit != 0 {
            main.flags |= flag;
        }
    }
    if main.volume_number.unwrap_or(0) == 0 {
        main.flags |= ArchiveFlag::FirstVolume;
    }

    for_each_extra(raw, extra_start, position, |raw, kind| {
        if kind == MHEXTRA_LOCATOR {
            let flags = raw.get_vint()?;
            if flags & MHEXTRA_LOCATOR_QLIST != 0 {
                let offset = raw.get_vint()?;
                if offset != 0 {
                    main.quick_open_offset = Some(position + offset);
                }
            }
            if flags & MHEXTRA_LOCATOR_RR != 0 {
                let offset = raw.get_vint()?;
                if offset != 0 {
                    main.recovery_offset = Some(position + offset);
                }
            }
        }
        Ok(())
    })?;
    Ok(main)
}

fn crypt_header(raw: &mut RawReader) -> Result<CryptHeader, DecodeError> {
    let version = raw.get_vint()?;
    if version != CRYPT_VERSION {
        return Err(DecodeError::UnsupportedEncryption(format!(
            "header encryption version {}",
            version
        )));
    }
    let flags = raw.get_vint()?;
    let lg2_count = raw.get_u8()?;
    if lg2_count > crate::crypto::RAR50_MAX_LG2_COUNT {
        return Err(DecodeError::UnsupportedEncryption(format!(
            "key derivation with 2^{} iterations",
            lg2_count
        )));
    }
    let salt = raw.get_array::<16>()?;
    let check = if flags & CHFL_CRYPT_PSWCHECK != 0 {
        Some(raw.get_array::<12>()?)
    } else {
        None
    };
    Ok(CryptHeader {
        lg2_count,
        salt,
        check,
    })
}

fn file_entry(
    raw: &mut RawReader,
    header_flags: u64,
    data_size: u64,
    extra_start: usize,
    volume: usize,
    data_position: u64,
) -> Result<FileEntry, DecodeError> {
    let position = raw.origin();
    let file_flags = raw.get_vint()?;
    let unpacked_size = raw.get_vint()?;
    let attributes = raw.get_vint()?;
    let mtime = if file_flags & FHFL_UTIME != 0 {
        Some(raw.get_u32()?)
    } else {
        None
    };
    let crc = if file_flags & FHFL_CRC32 != 0 {
        Some(raw.get_u32()?)
    } else {
        None
    };
    let compression = compression_info(raw.get_vint()?);
    let host_os = HostOs::from_rar50(raw.get_vint()?);
    let name_len = raw.get_vint()? as usize;
    if name_len > raw.remaining() {
        return Err(DecodeError::CorruptHeader {
            position,
            reason: "name longer than the header",
        });
    }
    let name = String::from_utf8_lossy(raw.get_bytes(name_len)?).into_owned();

    let mut entry_flags = BitFlags::empty();
    if file_flags & FHFL_DIRECTORY != 0 {
        entry_flags |= EntryFlag::Directory;
    }
    if file_flags & FHFL_UNPUNKNOWN != 0 {
        entry_flags |= EntryFlag::UnknownSize;
    }
    if header_flags & HFL_SPLIT_BEFORE != 0 {
        entry_flags |= EntryFlag::SplitBefore;
    }
    if header_flags & HFL_SPLIT_AFTER != 0 {
        entry_flags |= EntryFlag::SplitAfter;
    }
    if compression.solid {
        entry_flags |= EntryFlag::Solid;
    }

    let mut times = FileTimes {
        modified: mtime.and_then(|t| unix_datetime(i64::from(t), 0)),
        ..FileTimes::default()
    };
    let mut blake2 = None;
    let mut encryption = None;
    let mut redirection = None;

    for_each_extra(raw, extra_start, position, |raw, kind| {
        match kind {
            FHEXTRA_CRYPT => {
                let version = raw.get_vint()?;
                if version != CRYPT_VERSION {
                    return Err(DecodeError::UnsupportedEncryption(format!(
                        "file encryption version {}",
                        version
                    )));
                }
                let flags = raw.get_vint()?;
                let lg2_count = raw.get_u8()?;
                let salt = raw.get_array::<16>()?;
                let iv = raw.get_array::<16>()?;
                let check = if flags & FHEXTRA_CRYPT_PSWCHECK != 0 {
                    Some(raw.get_array::<12>()?)
                } else {
                    None
                };
                encryption = Some(EntryEncryption::Rar50 {
                    lg2_count,
                    salt,
                    iv,
                    check,
                    use_mac: flags & FHEXTRA_CRYPT_HASHMAC != 0,
                });
            }
            FHEXTRA_HASH => {
                if raw.get_vint()? == FHEXTRA_HASH_BLAKE2 {
                    blake2 = Some(raw.get_array::<32>()?);
                }
            }
            FHEXTRA_HTIME => times = high_precision_times(raw, times)?,
            FHEXTRA_REDIR => {
                let kind = RedirectionKind::from_rar50(raw.get_vint()?);
                let flags = raw.get_vint()?;
                let len = raw.get_vint()? as usize;
                let target = String::from_utf8_lossy(raw.get_bytes(len)?).into_owned();
                redirection = Some(Redirection {
                    kind,
                    target,
                    is_directory: flags & FHEXTRA_REDIR_DIR != 0,
                });
            }
            // Version, owner and service data records are not needed to extract.
            _ => {}
        }
        Ok(())
    })?;

    if encryption.is_some() {
        entry_flags |= EntryFlag::Encrypted | EntryFlag::Salted;
    }
    let checksum = match (blake2, crc) {
        (Some(digest), _) => Checksum::Blake2sp(digest),
        (None, Some(crc)) => Checksum::Crc32(crc),
        (None, None) => Checksum::None,
    };
    let split_after = header_flags & HFL_SPLIT_AFTER != 0;

    Ok(FileEntry {
        index: 0,
        name,
        packed_size: data_size,
        unpacked_size,
        checksum,
        attributes,
        times,
        compression,
        flags: entry_flags,
        host_os,
        encryption,
        redirection,
        segments: vec![DataSegment {
            volume,
            offset: data_position,
            length: data_size,
            // Parts before the last store a checksum of their packed data.
            checksum: if split_after { checksum } else { Checksum::None },
            split_after,
        }],
    })
}

fn compression_info(v: u64) -> CompressionInfo {
    let algorithm = v & 0x3f;
    let solid = v & 0x40 != 0;
    let method = ((v >> 7) & 0x07) as u8;
    let dictionary_size = if algorithm == 0 {
        0x20000u64 << ((v >> 10) & 0x0f)
    } else {
        // Newer algorithm versions add a fraction in 1/32 steps.
        let base = 0x20000u64 << ((v >> 10) & 0x1f);
        base + base / 32 * ((v >> 15) & 0x1f)
    };
    CompressionInfo {
        method,
        version: if algorithm == 0 { 50 } else { 70 },
        dictionary_size,
        solid,
    }
}

fn high_precision_times(raw: &mut RawReader, mut times: FileTimes) -> Result<FileTimes, DecodeError> {
    let flags = raw.get_vint()?;
    let unix = flags & FHEXTRA_HTIME_UNIXTIME != 0;
    let present = [
        flags & FHEXTRA_HTIME_MTIME != 0,
        flags & FHEXTRA_HTIME_CTIME != 0,
        flags & FHEXTRA_HTIME_ATIME != 0,
    ];

    let mut values = [0u64; 3];
    for (value, _) in values.iter_mut().zip(present).filter(|(_, p)| *p) {
        *value = if unix {
            u64::from(raw.get_u32()?)
        } else {
            raw.get_u64()?
        };
    }
    let mut nanos = [0u32; 3];
    if unix && flags & FHEXTRA_HTIME_UNIX_NS != 0 {
        for (ns, _) in nanos.iter_mut().zip(present).filter(|(_, p)| *p) {
            *ns = raw.get_u32()? & 0x3fff_ffff;
        }
    }

    let convert = |i: usize| {
        if !present[i] {
            None
        } else if unix {
            unix_datetime(values[i] as i64, nanos[i])
        } else {
            filetime_datetime(values[i])
        }
    };
    if present[0] {
        times.modified = convert(0);
    }
    times.created = convert(1).or(times.created);
    times.accessed = convert(2).or(times.accessed);
    Ok(times)
}

/// Walk the extra records from `start` to the end of the header, calling
/// `f` with the cursor after each record's type field.
fn for_each_extra<F>(raw: &mut RawReader, start: usize, position: u64, mut f: F) -> Result<(), DecodeError>
where
    F: FnMut(&mut RawReader, u64) -> Result<(), DecodeError>,
{
    if start < raw.position() {
        return Err(DecodeError::CorruptHeader {
            position,
            reason: "extra area overlaps header fields",
        });
    }
    raw.set_position(start);
    while raw.remaining() > 0 {
        let size = raw.get_vint()? as usize;
        let record_start = raw.position();
        if size == 0 || size > raw.remaining() {
            return Err(DecodeError::CorruptHeader {
                position,
                reason: "extra record larger than the header",
            });
        }
        let kind = raw.get_vint()?;
        f(raw, kind)?;
        raw.set_position(record_start + size);
    }
    Ok(())
}
