//! Reading and extracting RAR archives.
//!
//! All three header generations are understood: RAR 1.4, RAR 1.5 to 4.x and
//! RAR 5.0, including self-extracting archives, multi-volume sets, solid
//! archives, AES encrypted data and headers, and the RAR 5.0 quick open
//! record. Decompression of the LZ and PPM methods is left to a
//! [`DecompressorFactory`] supplied by the caller; stored data is handled
//! here.
//!
//! ```no_run
//! use rarx_format::{ArchiveReader, ExtractOptions};
//!
//! let mut reader = ArchiveReader::open("backup.part1.rar")?;
//! while let Some(entry) = reader.next_entry() {
//!     let entry = entry?;
//!     reader.extract(&entry, "out", &ExtractOptions::default())?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod compression;
mod crypto;
mod de;
mod error;
mod file;
mod hashing;
mod header;
pub mod path;
mod quick_open;
mod raw;
mod record;
mod volume;

#[cfg(test)]
extern crate self as rarx_format;
#[cfg(test)]
mod testutil;

pub use compression::{
    constants, CompressionInfo, Decompressor, DecompressorFactory, StandardDecoders, Stored,
};
pub use crypto::{EntryEncryption, Kdf, KeyCache, KeyMaterial, Password, RAR50_MAX_LG2_COUNT};
pub use de::HeaderCodec;
pub use error::{DecodeError, ExtractError, OpenError};
pub use file::{
    ArchiveReader, Conflict, ConflictKind, Decision, DecisionHandler, Entries, EntryOutcome,
    ExtractOptions, ExtractReport, ExtractStats, ExtractionEngine, OpenOptions, OverwritePolicy,
    ReaderState, SkipReason,
};
pub use hashing::{Checksum, Hasher};
pub use header::{Archive, Format, Signature, MAX_SFX_SIZE};
pub use path::{EntryPath, EntryPathError, MatchMode, PathMatcher};
pub use quick_open::{CachedHeader, QuickOpenIndex};
pub use record::{
    ArchiveFlag, ArchiveFlags, CommentHeader, CryptHeader, DataSegment, EndOfArchive, EntryFlag,
    EntryFlags, FileEntry, FileTimes, Header, HeaderKind, HostOs, MainHeader, RecoveryHeader,
    Redirection, RedirectionKind, ServiceHeader,
};
pub use volume::{
    first_volume_name, next_volume_name, MappedFiles, MemoryVolumes, NumberingScheme, Volume,
    VolumeData, VolumeSet, VolumeSource,
};
