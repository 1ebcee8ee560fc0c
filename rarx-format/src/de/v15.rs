//! RAR 1.5 to 4.x headers.

use byteorder::{ByteOrder, LittleEndian};
use enumflags2::BitFlags;

use super::{prefix, HeaderCodec, HeaderKey};
use crate::compression::CompressionInfo;
use crate::crypto::{Aes128Cbc, EntryEncryption, Kdf};
use crate::error::DecodeError;
use crate::hashing::{crc32, Checksum};
use crate::raw::RawReader;
use crate::record::{
    dos_datetime, ArchiveFlag, CommentHeader, DataSegment, EndOfArchive, EntryFlag, FileEntry,
    FileTimes, Header, HeaderKind, HostOs, MainHeader, RecoveryHeader, ServiceHeader,
};

const HEAD_MAIN: u8 = 0x73;
const HEAD_FILE: u8 = 0x74;
const HEAD_COMMENT: u8 = 0x75;
const HEAD_PROTECT: u8 = 0x78;
const HEAD_SERVICE: u8 = 0x7a;
const HEAD_END: u8 = 0x7b;

const LONG_BLOCK: u16 = 0x8000;

const MHD_VOLUME: u16 = 0x0001;
const MHD_COMMENT: u16 = 0x0002;
const MHD_LOCK: u16 = 0x0004;
const MHD_SOLID: u16 = 0x0008;
const MHD_NEWNUMBERING: u16 = 0x0010;
const MHD_AV: u16 = 0x0020;
const MHD_PROTECT: u16 = 0x0040;
const MHD_PASSWORD: u16 = 0x0080;
const MHD_FIRSTVOLUME: u16 = 0x0100;
const MHD_ENCRYPTVER: u16 = 0x0200;

const LHD_SPLIT_BEFORE: u16 = 0x0001;
const LHD_SPLIT_AFTER: u16 = 0x0002;
const LHD_PASSWORD: u16 = 0x0004;
const LHD_SOLID: u16 = 0x0010;
const LHD_WINDOWMASK: u16 = 0x00e0;
const LHD_DIRECTORY: u16 = 0x00e0;
const LHD_LARGE: u16 = 0x0100;
const LHD_UNICODE: u16 = 0x0200;
const LHD_SALT: u16 = 0x0400;
const LHD_EXTTIME: u16 = 0x1000;

const EARC_NEXT_VOLUME: u16 = 0x0001;
const EARC_DATACRC: u16 = 0x0002;
const EARC_VOLNUMBER: u16 = 0x0008;

const SHORT_HEAD: usize = 7;
const MAIN_HEAD: usize = 13;
const FILE_HEAD: usize = 32;
const SALT_SIZE: usize = 8;

pub(super) fn decode(
    codec: &mut HeaderCodec,
    data: &[u8],
    position: u64,
    volume: usize,
) -> Result<Header, DecodeError> {
    let start = position as usize;
    let encrypted = matches!(codec.header_key, Some(HeaderKey::Rar30));
    let salt_len = if encrypted {
        let salt = prefix::<SALT_SIZE>(data, start, position)?;
        let password = codec.password.as_ref().ok_or(DecodeError::MissingPassword)?;
        let material = codec.keys.derive_key(password, Some(&salt), Kdf::Rar30);
        codec
            .raw
            .reset(position, Some(Box::new(Aes128Cbc::new(material.key(), material.iv()))));
        SALT_SIZE
    } else {
        codec.raw.reset(position, None);
        0
    };

    let raw = &mut codec.raw;
    let mut consumed = raw.fill(data, start + salt_len, SHORT_HEAD)?;
    let stored_crc = raw.get_u16()?;
    let tag = raw.get_u8()?;
    let flags = raw.get_u16()?;
    let head_size = raw.get_u16()? as usize;
    if head_size < SHORT_HEAD {
        return Err(if encrypted {
            DecodeError::FailedDecryption { position }
        } else {
            DecodeError::CorruptHeader {
                position,
                reason: "header size below minimum",
            }
        });
    }
    if head_size > raw.len() {
        consumed += match raw.fill(data, start + salt_len + consumed, head_size - raw.len()) {
            Ok(filled) => filled,
            // A wrong key turns the size field into noise.
            Err(DecodeError::TruncatedBlock { .. }) if encrypted => {
                return Err(DecodeError::FailedDecryption { position })
            }
            Err(e) => return Err(e),
        };
    }

    // Archives with an old style comment embedded in the main header only
    // checksum the main header fields.
    let crc_end = if tag == HEAD_MAIN && flags & MHD_COMMENT != 0 {
        MAIN_HEAD.min(head_size)
    } else {
        head_size
    };
    if crc32(&raw.data()[2..crc_end]) as u16 != stored_crc {
        return Err(if encrypted {
            DecodeError::FailedDecryption { position }
        } else {
            DecodeError::HeaderCrcMismatch { position }
        });
    }
    raw.truncate(head_size);

    let raw_size = (salt_len + consumed) as u64;
    let data_position = position + raw_size;
    let add_size = if flags & LONG_BLOCK != 0 && raw.remaining() >= 4 {
        u64::from(LittleEndian::read_u32(&raw.data()[SHORT_HEAD..]))
    } else {
        0
    };

    let (kind, data_size) = match tag {
        HEAD_MAIN => {
            let main = main_header(raw, flags, head_size)?;
            if flags & MHD_PASSWORD != 0 {
                codec.header_key = Some(HeaderKey::Rar30);
            }
            (HeaderKind::Main(main), 0)
        }
        HEAD_FILE | HEAD_SERVICE => {
            let entry = file_entry(raw, tag, flags, head_size, volume, data_position)?;
            let data_size = entry.packed_size;
            let kind = if tag == HEAD_FILE {
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
            };
            (kind, data_size)
        }
        HEAD_COMMENT => (HeaderKind::Comment(comment_block(raw, head_size)?), add_size),
        HEAD_PROTECT => {
            raw.skip(4)?;
            let _version = raw.get_u8()?;
            let sectors = raw.get_u16()?;
            (
                HeaderKind::Recovery(RecoveryHeader {
                    data_size: add_size,
                    sectors: Some(sectors),
                }),
                add_size,
            )
        }
        HEAD_END => {
            let mut end = EndOfArchive {
                next_volume: flags & EARC_NEXT_VOLUME != 0,
                ..EndOfArchive::default()
            };
            if flags & EARC_DATACRC != 0 {
                end.data_crc = Some(raw.get_u32()?);
            }
            if flags & EARC_VOLNUMBER != 0 {
                end.volume_number = Some(raw.get_u16()?);
            }
            (HeaderKind::EndOfArchive(end), 0)
        }
        tag => (HeaderKind::Unknown { tag: u64::from(tag) }, add_size),
    };

    Ok(Header {
        volume,
        position,
        raw_size,
        data_size,
        kind,
    })
}

fn main_header(raw: &mut RawReader, flags: u16, head_size: usize) -> Result<MainHeader, DecodeError> {
    let _high_pos_av = raw.get_u16()?;
    let _pos_av = raw.get_u32()?;
    let mut main = MainHeader::default();
    if flags & MHD_ENCRYPTVER != 0 && raw.remaining() > 0 && flags & MHD_COMMENT == 0 {
        main.encrypt_version = Some(raw.get_u8()?);
    }

    for (bit, flag) in [
        (MHD_VOLUME, ArchiveFlag::Volume),
        (MHD_COMMENT, ArchiveFlag::Comment),
        (MHD_LOCK, ArchiveFlag::Locked),
        (MHD_SOLID, ArchiveFlag::Solid),
        (MHD_NEWNUMBERING, ArchiveFlag::NewNumbering),
        (MHD_AV, ArchiveFlag::AuthInfo),
        (MHD_PROTECT, ArchiveFlag::RecoveryRecord),
        (MHD_PASSWORD, ArchiveFlag::EncryptedHeaders),
        (MHD_FIRSTVOLUME, ArchiveFlag::FirstVolume),
    ] {
        if flags & bit != 0 {
            main.flags |= flag;
        }
    }

    if flags & MHD_COMMENT != 0 && head_size >= MAIN_HEAD + SHORT_HEAD {
        raw.set_position(MAIN_HEAD);
        let _crc = raw.get_u16()?;
        let tag = raw.get_u8()?;
        let _flags = raw.get_u16()?;
        let size = raw.get_u16()? as usize;
        if tag == HEAD_COMMENT {
            main.comment = Some(comment_block(raw, (MAIN_HEAD + size).min(head_size))?);
        }
    }
    Ok(main)
}

/// The fields of a comment block following its prologue, up to `end`.
fn comment_block(raw: &mut RawReader, end: usize) -> Result<CommentHeader, DecodeError> {
    let unpacked_size = u64::from(raw.get_u16()?);
    let _version = raw.get_u8()?;
    let method = raw.get_u8()?.wrapping_sub(0x30);
    let crc16 = raw.get_u16()?;
    let len = end.saturating_sub(raw.position()).min(raw.remaining());
    Ok(CommentHeader {
        unpacked_size,
        method,
        crc16: Some(crc16),
        data: raw.get_bytes(len)?.to_vec(),
    })
}

fn file_entry(
    raw: &mut RawReader,
    tag: u8,
    flags: u16,
    head_size: usize,
    volume: usize,
    data_position: u64,
) -> Result<FileEntry, DecodeError> {
    let position = raw.origin();
    raw.set_position(SHORT_HEAD);
    let pack_low = raw.get_u32()?;
    let unp_low = raw.get_u32()?;
    let host_os = HostOs::from_rar15(raw.get_u8()?);
    let crc = raw.get_u32()?;
    let ftime = raw.get_u32()?;
    let unp_ver = raw.get_u8()?;
    let method = raw.get_u8()?.wrapping_sub(0x30);
    let name_size = raw.get_u16()? as usize;
    let attributes = u64::from(raw.get_u32()?);

    let mut entry_flags = BitFlags::empty();
    let (pack_high, unp_high) = if flags & LHD_LARGE != 0 {
        (raw.get_u32()?, raw.get_u32()?)
    } else {
        if unp_low == u32::MAX {
            entry_flags |= EntryFlag::UnknownSize;
        }
        (0, 0)
    };
    let packed_size = u64::from(pack_high) << 32 | u64::from(pack_low);
    let unpacked_size = u64::from(unp_high) << 32 | u64::from(unp_low);

    if name_size > raw.remaining() {
        return Err(DecodeError::CorruptHeader {
            position,
            reason: "name longer than the header",
        });
    }
    let name_bytes = raw.get_bytes(name_size)?.to_vec();
    let name = if tag == HEAD_FILE {
        decode_name(&name_bytes, flags & LHD_UNICODE != 0, host_os)
    } else {
        String::from_utf8_lossy(&name_bytes).into_owned()
    };

    if tag == HEAD_SERVICE {
        // Service specific data sits between the name and the salt.
        let large = if flags & LHD_LARGE != 0 { 8 } else { 0 };
        let salt = if flags & LHD_SALT != 0 { SALT_SIZE } else { 0 };
        let sub_data = head_size.saturating_sub(FILE_HEAD + large + name_size + salt);
        raw.skip(sub_data.min(raw.remaining()))?;
    }

    let salt = if flags & LHD_SALT != 0 {
        entry_flags |= EntryFlag::Salted;
        Some(raw.get_array::<SALT_SIZE>()?)
    } else {
        None
    };

    let times = if flags & LHD_EXTTIME != 0 && raw.remaining() >= 2 {
        ext_times(raw, ftime)?
    } else {
        FileTimes {
            modified: dos_datetime(ftime),
            ..FileTimes::default()
        }
    };

    let is_dir = flags & LHD_WINDOWMASK == LHD_DIRECTORY;
    if is_dir {
        entry_flags |= EntryFlag::Directory;
    }
    if flags & LHD_SPLIT_BEFORE != 0 {
        entry_flags |= EntryFlag::SplitBefore;
    }
    if flags & LHD_SPLIT_AFTER != 0 {
        entry_flags |= EntryFlag::SplitAfter;
    }
    if flags & LHD_SOLID != 0 {
        entry_flags |= EntryFlag::Solid;
    }
    let encryption = if flags & LHD_PASSWORD != 0 {
        entry_flags |= EntryFlag::Encrypted;
        Some(match unp_ver {
            29.. => EntryEncryption::Rar30 { salt },
            20..=28 => EntryEncryption::Legacy { version: 20 },
            15..=19 => EntryEncryption::Legacy { version: 15 },
            _ => EntryEncryption::Legacy { version: 13 },
        })
    } else {
        None
    };

    let split_after = flags & LHD_SPLIT_AFTER != 0;
    // Parts before the last carry a checksum of their packed data.
    let segment_checksum = if split_after && unp_ver >= 20 && crc != u32::MAX {
        Checksum::Crc32(crc)
    } else {
        Checksum::None
    };

    Ok(FileEntry {
        index: 0,
        name,
        packed_size,
        unpacked_size,
        checksum: Checksum::Crc32(crc),
        attributes,
        times,
        compression: CompressionInfo {
            method,
            version: unp_ver,
            dictionary_size: if is_dir {
                0
            } else {
                0x10000 << ((flags & LHD_WINDOWMASK) >> 5)
            },
            solid: flags & LHD_SOLID != 0,
        },
        flags: entry_flags,
        host_os,
        encryption,
        redirection: None,
        segments: vec![DataSegment {
            volume,
            offset: data_position,
            length: packed_size,
            checksum: segment_checksum,
            split_after,
        }],
    })
}

fn decode_name(bytes: &[u8], unicode: bool, host_os: HostOs) -> String {
    let name = if unicode {
        match bytes.iter().position(|b| *b == 0) {
            Some(zero) => {
                let wide = decode_wide_name(bytes, &bytes[zero + 1..]);
                if wide.is_empty() {
                    latin1(&bytes[..zero])
                } else {
                    String::from_utf16_lossy(&wide)
                }
            }
            None => String::from_utf8_lossy(bytes).into_owned(),
        }
    } else {
        latin1(bytes)
    };

    if host_os.is_dos_like() {
        name.replace('\\', "/")
    } else {
        name
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Expand the compact Unicode name table stored after the single-byte name.
///
/// The table starts with a high byte shared by many characters, followed by
/// flag bytes holding four 2-bit opcodes each: a low byte alone, a low byte
/// with the shared high byte, a full 16-bit unit, or a run copied from the
/// single-byte name with an optional correction.
fn decode_wide_name(name: &[u8], enc: &[u8]) -> Vec<u16> {
    let mut out = Vec::with_capacity(name.len());
    let mut pos = 0;
    let high = match enc.first() {
        Some(b) => u16::from(*b) << 8,
        None => return out,
    };
    pos += 1;

    let mut flags = 0u8;
    let mut flag_bits = 0;
    while pos < enc.len() {
        if flag_bits == 0 {
            flags = enc[pos];
            pos += 1;
            flag_bits = 8;
        }
        match flags >> 6 {
            0 => {
                if pos >= enc.len() {
                    break;
                }
                out.push(u16::from(enc[pos]));
                pos += 1;
            }
            1 => {
                if pos >= enc.len() {
                    break;
                }
                out.push(u16::from(enc[pos]) | high);
                pos += 1;
            }
            2 => {
                if pos + 1 >= enc.len() {
                    break;
                }
                out.push(u16::from(enc[pos]) | u16::from(enc[pos + 1]) << 8);
                pos += 2;
            }
            _ => {
                if pos >= enc.len() {
                    break;
                }
                let length = enc[pos];
                pos += 1;
                if length & 0x80 != 0 {
                    if pos >= enc.len() {
                        break;
                    }
                    let correction = enc[pos];
                    pos += 1;
                    for _ in 0..(length & 0x7f) as usize + 2 {
                        let Some(&b) = name.get(out.len()) else { break };
                        out.push(u16::from(b.wrapping_add(correction)) | high);
                    }
                } else {
                    for _ in 0..length as usize + 2 {
                        let Some(&b) = name.get(out.len()) else { break };
                        out.push(u16::from(b));
                    }
                }
            }
        }
        flags <<= 2;
        flag_bits -= 2;
    }
    out
}

/// Extended times: a flag word with a nibble per time (modified, created,
/// accessed, archived), each optionally followed by a DOS time and up to
/// three bytes of 100 ns remainder.
fn ext_times(raw: &mut RawReader, mtime: u32) -> Result<FileTimes, DecodeError> {
    let flags = raw.get_u16()?;
    let mut times = [None; 4];
    for (i, slot) in times.iter_mut().enumerate() {
        let mode = flags >> ((3 - i) * 4);
        if mode & 8 == 0 {
            continue;
        }
        let dos = if i == 0 { mtime } else { raw.get_u32()? };
        let count = (mode & 3) as usize;
        let mut remainder = 0u32;
        for j in 0..count {
            remainder |= u32::from(raw.get_u8()?) << ((j + 3 - count) * 8);
        }
        *slot = dos_datetime(dos).map(|t| {
            let mut t = t + chrono::Duration::nanoseconds(i64::from(remainder) * 100);
            if mode & 4 != 0 {
                t += chrono::Duration::seconds(1);
            }
            t
        });
    }
    Ok(FileTimes {
        modified: times[0].or_else(|| dos_datetime(mtime)),
        created: times[1],
        accessed: times[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_name_with_shared_high_byte() {
        // "ab" followed by two Cyrillic letters sharing high byte 0x04.
        let name = b"ab??";
        let enc = [0x04, 0b0000_0101, b'a', b'b', 0x10, 0x11];
        let wide = decode_wide_name(name, &enc);
        assert_eq!(String::from_utf16_lossy(&wide), "ab\u{410}\u{411}");
    }

    #[test]
    fn wide_name_copies_runs_from_single_byte_name() {
        let name = b"hello.txt";
        // Opcode 3 copying 7 + 2 bytes from the single-byte name.
        let enc = [0x00, 0b1100_0000, 7];
        let wide = decode_wide_name(name, &enc);
        assert_eq!(String::from_utf16_lossy(&wide), "hello.txt");
    }

    #[test]
    fn name_separator_follows_host() {
        assert_eq!(decode_name(b"dir\\file", false, HostOs::Windows), "dir/file");
        assert_eq!(decode_name(b"dir\\file", false, HostOs::Unix), "dir\\file");
        assert_eq!(decode_name("d\u{e9}j\u{e0}".as_bytes(), true, HostOs::Unix), "d\u{e9}j\u{e0}");
    }
}
