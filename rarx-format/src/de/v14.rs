//! RAR 1.4: fixed layout headers without header checksums or an end block.

use enumflags2::BitFlags;

use super::HeaderCodec;
use crate::compression::CompressionInfo;
use crate::crypto::EntryEncryption;
use crate::error::DecodeError;
use crate::hashing::Checksum;
use crate::record::{
    dos_datetime, ArchiveFlag, CommentHeader, DataSegment, EntryFlag, FileEntry, FileTimes, Header,
    HeaderKind, HostOs, MainHeader,
};

const MAIN_HEAD: usize = 7;
const FILE_HEAD: usize = 21;

const MHD_VOLUME: u8 = 0x01;
const MHD_COMMENT: u8 = 0x02;
const MHD_LOCK: u8 = 0x04;
const MHD_SOLID: u8 = 0x08;
const MHD_PACK_COMMENT: u8 = 0x10;

const LHD_SPLIT_BEFORE: u8 = 0x01;
const LHD_SPLIT_AFTER: u8 = 0x02;
const LHD_PASSWORD: u8 = 0x04;

const ATTR_DIRECTORY: u8 = 0x10;
const WINDOW_SIZE: u64 = 0x10000;

pub(super) fn decode(
    codec: &mut HeaderCodec,
    data: &[u8],
    position: u64,
    volume: usize,
) -> Result<Header, DecodeError> {
    codec.raw.reset(position, None);
    if codec.expect_main {
        codec.expect_main = false;
        return main_header(codec, data, position, volume);
    }

    let start = position as usize;
    let raw = &mut codec.raw;
    raw.fill(data, start, FILE_HEAD)?;
    let packed_size = u64::from(raw.get_u32()?);
    let unpacked_size = u64::from(raw.get_u32()?);
    let sum = raw.get_u16()?;
    let head_size = raw.get_u16()? as usize;
    let ftime = raw.get_u32()?;
    let attr = raw.get_u8()?;
    let flags = raw.get_u8()?;
    let version = if raw.get_u8()? == 2 { 13 } else { 10 };
    let name_len = raw.get_u8()? as usize;
    let method = raw.get_u8()?;

    if head_size < FILE_HEAD + name_len {
        return Err(DecodeError::CorruptHeader {
            position,
            reason: "file header smaller than its name",
        });
    }
    raw.fill(data, start + FILE_HEAD, head_size - FILE_HEAD)?;
    let name_bytes = raw.get_bytes(name_len)?;
    // OEM names; bytes above 0x7f are read as Latin-1.
    let name: String = name_bytes
        .iter()
        .map(|&b| if b == b'\\' { '/' } else { char::from(b) })
        .collect();

    let mut entry_flags = BitFlags::empty();
    if attr & ATTR_DIRECTORY != 0 {
        entry_flags |= EntryFlag::Directory;
    }
    if flags & LHD_SPLIT_BEFORE != 0 {
        entry_flags |= EntryFlag::SplitBefore;
    }
    if flags & LHD_SPLIT_AFTER != 0 {
        entry_flags |= EntryFlag::SplitAfter;
    }
    let encryption = if flags & LHD_PASSWORD != 0 {
        entry_flags |= EntryFlag::Encrypted;
        Some(EntryEncryption::Legacy { version: 13 })
    } else {
        None
    };
    // Solid archives of this generation mark no entry; every entry after
    // the first continues the stream.
    if codec.solid && codec.files_seen > 0 && !entry_flags.contains(EntryFlag::SplitBefore) {
        entry_flags |= EntryFlag::Solid;
    }
    if !entry_flags.contains(EntryFlag::SplitBefore) {
        codec.files_seen += 1;
    }

    let raw_size = head_size as u64;
    let entry = FileEntry {
        index: 0,
        name,
        packed_size,
        unpacked_size,
        checksum: Checksum::Sum16(sum),
        attributes: u64::from(attr),
        times: FileTimes {
            modified: dos_datetime(ftime),
            ..FileTimes::default()
        },
        compression: CompressionInfo {
            method,
            version,
            dictionary_size: WINDOW_SIZE,
            solid: entry_flags.contains(EntryFlag::Solid),
        },
        flags: entry_flags,
        host_os: HostOs::MsDos,
        encryption,
        redirection: None,
        segments: vec![DataSegment {
            volume,
            offset: position + raw_size,
            length: packed_size,
            checksum: Checksum::None,
            split_after: flags & LHD_SPLIT_AFTER != 0,
        }],
    };

    Ok(Header {
        volume,
        position,
        raw_size,
        data_size: packed_size,
        kind: HeaderKind::File(entry),
    })
}

fn main_header(
    codec: &mut HeaderCodec,
    data: &[u8],
    position: u64,
    volume: usize,
) -> Result<Header, DecodeError> {
    let start = position as usize;
    let raw = &mut codec.raw;
    raw.fill(data, start, MAIN_HEAD)?;
    raw.skip(4)?;
    let head_size = raw.get_u16()? as usize;
    let flags = raw.get_u8()?;
    if head_size < MAIN_HEAD {
        return Err(DecodeError::CorruptHeader {
            position,
            reason: "main header size below minimum",
        });
    }
    raw.fill(data, start + MAIN_HEAD, head_size - MAIN_HEAD)?;

    let comment = if flags & MHD_COMMENT != 0 && raw.remaining() >= 2 {
        let len = raw.get_u16()? as usize;
        let len = len.min(raw.remaining());
        Some(CommentHeader {
            unpacked_size: len as u64,
            method: if flags & MHD_PACK_COMMENT != 0 { 1 } else { 0 },
            crc16: None,
            data: raw.get_bytes(len)?.to_vec(),
        })
    } else {
        None
    };

    let mut archive_flags = BitFlags::empty();
    for (bit, flag) in [
        (MHD_VOLUME, ArchiveFlag::Volume),
        (MHD_COMMENT, ArchiveFlag::Comment),
        (MHD_LOCK, ArchiveFlag::Locked),
        (MHD_SOLID, ArchiveFlag::Solid),
    ] {
        if flags & bit != 0 {
            archive_flags |= flag;
        }
    }
    codec.solid = flags & MHD_SOLID != 0;

    Ok(Header {
        volume,
        position,
        raw_size: head_size as u64,
        data_size: 0,
        kind: HeaderKind::Main(MainHeader {
            flags: archive_flags,
            comment,
            ..MainHeader::default()
        }),
    })
}
