use std::io;
use std::path::PathBuf;

use crate::file::ReaderState;

/// Errors raised while decoding the header stream of an archive.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("No RAR 1.4, 1.5 or 5.0 signature found")]
    UnrecognizedFormat,

    #[error("Corrupt header at offset {position:#x}: {reason}")]
    CorruptHeader { position: u64, reason: &'static str },

    #[error("Header checksum mismatch at offset {position:#x}")]
    HeaderCrcMismatch { position: u64 },

    #[error("Block at offset {position:#x} is truncated ({needed} bytes needed, {available} available)")]
    TruncatedBlock {
        position: u64,
        needed: usize,
        available: usize,
    },

    #[error("Next volume is missing. Path: '{}'", .0.display())]
    VolumeMissing(PathBuf),

    #[error("Archive headers are encrypted and no password was given")]
    MissingPassword,

    #[error("The password is incorrect")]
    BadPassword,

    #[error("Decrypting header at offset {position:#x} failed (wrong password or corrupt data)")]
    FailedDecryption { position: u64 },

    #[error("Unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    #[error("Reading volume failed. Path: '{}'", .1.display())]
    Io(#[source] io::Error, PathBuf),
}

impl DecodeError {
    /// The archive ends early rather than being malformed.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            DecodeError::TruncatedBlock { .. } | DecodeError::VolumeMissing(_)
        )
    }

    /// The caller may prompt for another password and reopen.
    pub fn is_password_error(&self) -> bool {
        matches!(
            self,
            DecodeError::MissingPassword
                | DecodeError::BadPassword
                | DecodeError::FailedDecryption { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("Could not open archive. Path: '{}'", .1.display())]
    ReadFailed(#[source] io::Error, PathBuf),

    #[error("Could not read archive headers")]
    Decode(#[from] DecodeError),
}

impl OpenError {
    pub fn decode_error(&self) -> Option<&DecodeError> {
        match self {
            OpenError::Decode(e) => Some(e),
            OpenError::ReadFailed(..) => None,
        }
    }
}

/// A failure to extract or test one entry.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Checksum mismatch for '{name}' (expected {expected}, got {actual})")]
    EntryCrcMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Wrong password for '{0}'")]
    BadPassword(String),

    #[error("'{0}' is encrypted and no password was given")]
    MissingPassword(String),

    #[error("Unsupported packing method {method} (version {version}) for '{name}'")]
    UnsupportedMethod { name: String, method: u8, version: u8 },

    #[error("Unsupported encryption for '{0}': {1}")]
    UnsupportedEncryption(String, String),

    #[error("Next volume is missing. Path: '{}'", .0.display())]
    VolumeMissing(PathBuf),

    #[error("'{0}' starts in a previous volume that is not part of this set")]
    MissingPreviousVolume(String),

    #[error("Packed data of '{0}' is truncated")]
    TruncatedData(String),

    #[error("Reading volume failed. Path: '{}'", .1.display())]
    ReadFailed(#[source] io::Error, PathBuf),

    #[error("Creating directory failed. Path: '{}'", .1.display())]
    CreateDirFailed(#[source] io::Error, PathBuf),

    #[error("Creating file failed. Path: '{}'", .1.display())]
    CreateFileFailed(#[source] io::Error, PathBuf),

    #[error("Writing file failed. Path: '{}'", .1.display())]
    WriteFailed(#[source] io::Error, PathBuf),

    #[error("Disk is full. Path: '{}'", .1.display())]
    DiskFull(#[source] io::Error, PathBuf),

    #[error("Decompressing '{0}' failed")]
    DecompressionFailed(String, #[source] io::Error),

    #[error("Entry name '{0}' cannot be turned into a safe output path")]
    InvalidPath(String, #[source] crate::path::EntryPathError),

    #[error("'{}' already exists and no decision was given", .0.display())]
    DecisionRequired(PathBuf),

    #[error("Extraction was cancelled")]
    Cancelled,

    #[error("Archive reader is {0:?}; entries cannot be extracted")]
    InvalidState(ReaderState),

    #[error("Entry {0} is not part of this archive")]
    UnknownEntry(usize),

    #[error(transparent)]
    Decode(DecodeError),
}

impl ExtractError {
    /// Errors after which no further entries of the session can be extracted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExtractError::Cancelled
                | ExtractError::ReadFailed(..)
                | ExtractError::InvalidState(_)
        )
    }
}

impl From<DecodeError> for ExtractError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::VolumeMissing(path) => ExtractError::VolumeMissing(path),
            DecodeError::Io(e, path) => ExtractError::ReadFailed(e, path),
            other => ExtractError::Decode(other),
        }
    }
}
