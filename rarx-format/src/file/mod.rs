//! Reading sessions over an opened archive and extraction of its entries.

use std::ops::AddAssign;
use std::path::PathBuf;

use chrono::NaiveDateTime;

use crate::error::ExtractError;

mod extract;
pub mod reader;

pub use self::extract::ExtractionEngine;
pub use self::reader::{ArchiveReader, Entries, OpenOptions};

/// Lifecycle of an [`ArchiveReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderState {
    Unopened,
    SignatureDetected,
    /// Headers come from a validated quick open record.
    FastIndexed,
    /// Headers are decoded one block after another.
    FullScanning,
    /// Every header has been read.
    Ready,
    Extracting,
    Closed,
    /// The header stream failed. Entries already read stay extractable.
    Broken,
}

impl ReaderState {
    pub(crate) fn is_scanning(&self) -> bool {
        matches!(self, ReaderState::FastIndexed | ReaderState::FullScanning)
    }
}

/// What to do when an output file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OverwritePolicy {
    /// Ask the decision handler; "all" answers hold for the rest of the session.
    #[default]
    Default,
    ReplaceAll,
    SkipAll,
    /// Write to `name(1).ext`, `name(2).ext`, ... instead.
    AutoRename,
    /// Ask on every conflict, "all" answers only hold for that conflict.
    ForceAsk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// The output file exists.
    Exists,
    WriteFailed,
    DiskFull,
}

/// A question for the [`DecisionHandler`].
#[derive(Debug, Clone)]
pub struct Conflict {
    pub entry_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<NaiveDateTime>,
    pub kind: ConflictKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Overwrite the file; after a write failure, try again.
    Replace,
    ReplaceAll,
    Skip,
    SkipAll,
    /// Write under a free `name(n).ext` name.
    Rename,
    Cancel,
}

/// Answers overwrite and write failure questions during extraction.
/// Extraction blocks until the handler returns.
pub trait DecisionHandler: Send {
    fn decide(&mut self, conflict: &Conflict) -> Decision;
}

/// Options for extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub overwrite: OverwritePolicy,
    /// Compare checksums of extracted data with the stored ones.
    pub verify: bool,
    /// Leave output in place when it fails verification.
    pub keep_broken: bool,
    pub restore_times: bool,
    pub restore_permissions: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            overwrite: OverwritePolicy::Default,
            verify: true,
            keep_broken: false,
            restore_times: true,
            restore_permissions: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The output exists and the policy or handler chose to keep it.
    Exists,
    /// Link entries are listed but not created.
    Link,
    /// Not selected by the path matcher.
    NotMatched,
}

/// The result of extracting or testing one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Extracted { path: PathBuf, bytes: u64 },
    DirectoryCreated(PathBuf),
    Tested { bytes: u64 },
    Skipped(SkipReason),
}

/// Statistics from extracting or testing entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Number of files extracted or tested.
    pub files: u64,
    /// Number of directories created.
    pub dirs_created: u64,
    /// Total bytes of entry content produced.
    pub bytes_written: u64,
    pub skipped: u64,
    /// Number of entries that failed, checksum failures included.
    pub failures: u64,
    pub checksum_failures: u64,
}

impl ExtractStats {
    pub(crate) fn record(&mut self, result: &Result<EntryOutcome, ExtractError>) {
        match result {
            Ok(EntryOutcome::Extracted { bytes, .. }) | Ok(EntryOutcome::Tested { bytes }) => {
                self.files += 1;
                self.bytes_written += bytes;
            }
            Ok(EntryOutcome::DirectoryCreated(_)) => self.dirs_created += 1,
            Ok(EntryOutcome::Skipped(_)) => self.skipped += 1,
            Err(e) => {
                self.failures += 1;
                if matches!(e, ExtractError::EntryCrcMismatch { .. }) {
                    self.checksum_failures += 1;
                }
            }
        }
    }
}

impl AddAssign for ExtractStats {
    fn add_assign(&mut self, other: Self) {
        self.files += other.files;
        self.dirs_created += other.dirs_created;
        self.bytes_written += other.bytes_written;
        self.skipped += other.skipped;
        self.failures += other.failures;
        self.checksum_failures += other.checksum_failures;
    }
}

/// Per-entry results of a whole-archive operation, in archive order.
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub results: Vec<(String, Result<EntryOutcome, ExtractError>)>,
    pub stats: ExtractStats,
    /// The header stream failed before every entry was read.
    pub scan_error: Option<crate::error::DecodeError>,
}

impl ExtractReport {
    pub(crate) fn push(&mut self, name: String, result: Result<EntryOutcome, ExtractError>) {
        self.stats.record(&result);
        self.results.push((name, result));
    }

    pub fn is_success(&self) -> bool {
        self.scan_error.is_none() && self.stats.failures == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ExtractError)> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (name.as_str(), e)))
    }
}
