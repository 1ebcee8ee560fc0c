use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use enumflags2::{bitflags, BitFlags};

use crate::compression::CompressionInfo;
use crate::crypto::EntryEncryption;
use crate::hashing::Checksum;

/// One decoded block of the header stream.
#[derive(Debug, Clone)]
pub struct Header {
    /// Index of the volume the block was read from.
    pub volume: usize,
    /// Offset of the block in its volume, including any salt or IV in front of it.
    pub position: u64,
    /// Size of the block on disk, including salt, IV and cipher padding.
    pub raw_size: u64,
    /// Size of the data area following the block.
    pub data_size: u64,
    pub kind: HeaderKind,
}

impl Header {
    /// Offset of the next block in the same volume.
    pub fn next_position(&self) -> u64 {
        self.data_position().saturating_add(self.data_size)
    }

    pub fn data_position(&self) -> u64 {
        self.position.saturating_add(self.raw_size)
    }
}

#[derive(Debug, Clone)]
pub enum HeaderKind {
    Main(MainHeader),
    File(FileEntry),
    Service(ServiceHeader),
    Comment(CommentHeader),
    Crypt(CryptHeader),
    EndOfArchive(EndOfArchive),
    Recovery(RecoveryHeader),
    /// A block type this reader does not know, skipped by its declared size.
    Unknown { tag: u64 },
}

impl HeaderKind {
    pub fn name(&self) -> &'static str {
        match self {
            HeaderKind::Main(_) => "main",
            HeaderKind::File(_) => "file",
            HeaderKind::Service(_) => "service",
            HeaderKind::Comment(_) => "comment",
            HeaderKind::Crypt(_) => "crypt",
            HeaderKind::EndOfArchive(_) => "end",
            HeaderKind::Recovery(_) => "recovery",
            HeaderKind::Unknown { .. } => "unknown",
        }
    }
}

#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFlag {
    Volume = 1 << 0,
    Comment = 1 << 1,
    Locked = 1 << 2,
    Solid = 1 << 3,
    NewNumbering = 1 << 4,
    AuthInfo = 1 << 5,
    RecoveryRecord = 1 << 6,
    EncryptedHeaders = 1 << 7,
    FirstVolume = 1 << 8,
}

pub type ArchiveFlags = BitFlags<ArchiveFlag>;

#[derive(Debug, Clone, Default)]
pub struct MainHeader {
    pub flags: ArchiveFlags,
    pub volume_number: Option<u64>,
    /// Absolute offset of the quick open service block.
    pub quick_open_offset: Option<u64>,
    /// Absolute offset of the recovery record.
    pub recovery_offset: Option<u64>,
    pub encrypt_version: Option<u8>,
    /// An archive comment embedded in the main header (RAR 1.4 and 1.5).
    pub comment: Option<CommentHeader>,
}

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFlag {
    Directory = 1 << 0,
    /// Data continues from the previous volume.
    SplitBefore = 1 << 1,
    /// Data continues in the next volume.
    SplitAfter = 1 << 2,
    Encrypted = 1 << 3,
    Salted = 1 << 4,
    /// Continues the compression stream of the previous entry.
    Solid = 1 << 5,
    UnknownSize = 1 << 6,
}

pub type EntryFlags = BitFlags<EntryFlag>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    MsDos,
    Os2,
    Windows,
    Unix,
    MacOs,
    BeOs,
    Unknown(u8),
}

impl HostOs {
    pub(crate) fn from_rar15(v: u8) -> HostOs {
        match v {
            0 => HostOs::MsDos,
            1 => HostOs::Os2,
            2 => HostOs::Windows,
            3 => HostOs::Unix,
            4 => HostOs::MacOs,
            5 => HostOs::BeOs,
            v => HostOs::Unknown(v),
        }
    }

    pub(crate) fn from_rar50(v: u64) -> HostOs {
        match v {
            0 => HostOs::Windows,
            1 => HostOs::Unix,
            v => HostOs::Unknown(v.min(u64::from(u8::MAX)) as u8),
        }
    }

    /// Names use '\' as separator and attributes are DOS attributes.
    pub fn is_dos_like(&self) -> bool {
        matches!(self, HostOs::MsDos | HostOs::Os2 | HostOs::Windows)
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOs::MsDos => f.write_str("MS-DOS"),
            HostOs::Os2 => f.write_str("OS/2"),
            HostOs::Windows => f.write_str("Windows"),
            HostOs::Unix => f.write_str("Unix"),
            HostOs::MacOs => f.write_str("Mac OS"),
            HostOs::BeOs => f.write_str("BeOS"),
            HostOs::Unknown(v) => write!(f, "unknown ({})", v),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTimes {
    pub modified: Option<NaiveDateTime>,
    pub created: Option<NaiveDateTime>,
    pub accessed: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectionKind {
    UnixSymlink,
    WindowsSymlink,
    WindowsJunction,
    HardLink,
    FileCopy,
    Unknown(u64),
}

impl RedirectionKind {
    pub(crate) fn from_rar50(v: u64) -> RedirectionKind {
        match v {
            1 => RedirectionKind::UnixSymlink,
            2 => RedirectionKind::WindowsSymlink,
            3 => RedirectionKind::WindowsJunction,
            4 => RedirectionKind::HardLink,
            5 => RedirectionKind::FileCopy,
            v => RedirectionKind::Unknown(v),
        }
    }
}

/// A link record. Reported, never followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub kind: RedirectionKind,
    pub target: String,
    pub is_directory: bool,
}

/// The part of an entry's packed data stored in one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub volume: usize,
    pub offset: u64,
    pub length: u64,
    /// Checksum of the packed bytes of a part that is not the last, when stored.
    pub checksum: Checksum,
    pub split_after: bool,
}

/// A file or directory stored in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Position in archive order, counting logical entries.
    pub index: usize,
    /// Path inside the archive, with '/' as separator.
    pub name: String,
    pub packed_size: u64,
    pub unpacked_size: u64,
    pub checksum: Checksum,
    pub attributes: u64,
    pub times: FileTimes,
    pub compression: CompressionInfo,
    pub flags: EntryFlags,
    pub host_os: HostOs,
    pub encryption: Option<EntryEncryption>,
    pub redirection: Option<Redirection>,
    pub segments: Vec<DataSegment>,
}

impl FileEntry {
    #[inline]
    pub fn is_directory(&self) -> bool {
        self.flags.contains(EntryFlag::Directory)
    }

    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(EntryFlag::Encrypted)
    }

    #[inline]
    pub fn is_solid(&self) -> bool {
        self.flags.contains(EntryFlag::Solid)
    }

    #[inline]
    pub fn continues_from_previous_volume(&self) -> bool {
        self.flags.contains(EntryFlag::SplitBefore)
    }

    #[inline]
    pub fn continues_in_next_volume(&self) -> bool {
        self.flags.contains(EntryFlag::SplitAfter)
    }

    /// Unix permission bits, when the entry was stored on a Unix host.
    pub fn unix_mode(&self) -> Option<u32> {
        match self.host_os {
            HostOs::Unix => Some((self.attributes & 0o7777) as u32),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceHeader {
    /// Service name, such as `CMT`, `QO`, `ACL` or `STM`.
    pub name: String,
    /// The block uses the file header layout; its data fields live here.
    pub entry: FileEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentHeader {
    pub unpacked_size: u64,
    pub method: u8,
    /// Low 16 bits of the CRC32 of the unpacked comment.
    pub crc16: Option<u16>,
    /// The comment text when stored, otherwise its packed bytes.
    pub data: Vec<u8>,
}

impl CommentHeader {
    pub fn text(&self) -> Option<String> {
        if self.method != 0 {
            return None;
        }
        Some(String::from_utf8_lossy(&self.data).into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptHeader {
    pub lg2_count: u8,
    pub salt: [u8; 16],
    pub check: Option<[u8; 12]>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfArchive {
    pub next_volume: bool,
    pub data_crc: Option<u32>,
    pub volume_number: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryHeader {
    pub data_size: u64,
    pub sectors: Option<u16>,
}

/// MS-DOS date and time, with two second resolution.
pub(crate) fn dos_datetime(v: u32) -> Option<NaiveDateTime> {
    let second = (v & 0x1f) * 2;
    let minute = (v >> 5) & 0x3f;
    let hour = (v >> 11) & 0x1f;
    let day = (v >> 16) & 0x1f;
    let month = (v >> 21) & 0x0f;
    let year = (v >> 25) as i32 + 1980;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

pub(crate) fn unix_datetime(secs: i64, nanos: u32) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(secs, nanos).map(|t| t.naive_utc())
}

/// Windows FILETIME: 100 ns intervals since 1601-01-01.
pub(crate) fn filetime_datetime(v: u64) -> Option<NaiveDateTime> {
    const EPOCH_DIFF: i64 = 11_644_473_600;
    let secs = (v / 10_000_000) as i64 - EPOCH_DIFF;
    let nanos = (v % 10_000_000) as u32 * 100;
    unix_datetime(secs, nanos)
}
