use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use super::{
    Conflict, ConflictKind, Decision, DecisionHandler, EntryOutcome, ExtractOptions,
    OverwritePolicy, SkipReason,
};
use crate::compression::{Decompressor, DecompressorFactory, DEFAULT_BLOCK_SIZE};
use crate::crypto::{
    check_password, mac_checksum, BlockCipher, EntryEncryption, KeyCache, KeyMaterial, Password,
    RAR50_MAX_LG2_COUNT,
};
use crate::error::ExtractError;
use crate::hashing::{Checksum, Hasher};
use crate::path::EntryPath;
use crate::record::{EntryFlag, FileEntry};
use crate::volume::VolumeSet;

const CIPHER_BLOCK: usize = 16;

pub(crate) type Sink<'a> = dyn FnMut(&[u8]) -> Result<(), ExtractError> + 'a;

/// The decoder of a solid run, positioned before entry `next`.
struct SolidCursor {
    run_start: usize,
    next: usize,
    decoder: Box<dyn Decompressor>,
}

/// What decoding an entry produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Decoded {
    pub bytes: u64,
    /// Checksum of the content, in the form the header stores it.
    pub checksum: Checksum,
}

/// Whether the entry's data goes through the shared decoder of its run.
fn in_stream(entry: &FileEntry) -> bool {
    !entry.is_directory() && !entry.compression.is_stored() && entry.redirection.is_none()
}

/// First entry of the solid run `index` belongs to.
pub(crate) fn run_start(entries: &[FileEntry], index: usize) -> usize {
    let mut start = index;
    for (i, entry) in entries[..=index].iter().enumerate().rev() {
        if !in_stream(entry) {
            continue;
        }
        start = i;
        if !entry.is_solid() {
            break;
        }
    }
    start
}

/// Group entries into units that can be processed independently: each solid
/// run in archive order, and every other entry on its own.
pub(crate) fn independent_runs(entries: &[FileEntry]) -> Vec<Vec<usize>> {
    let mut runs: Vec<Vec<usize>> = Vec::new();
    let mut current: Option<usize> = None;
    for (i, entry) in entries.iter().enumerate() {
        if !in_stream(entry) {
            runs.push(vec![i]);
            continue;
        }
        match current {
            Some(run) if entry.is_solid() => runs[run].push(i),
            _ => {
                current = Some(runs.len());
                runs.push(vec![i]);
            }
        }
    }
    runs
}

/// Content hashing and cutting the decoder output to the entry size.
struct Output<'a, 'b> {
    sink: &'a mut Sink<'b>,
    hasher: Box<dyn Hasher>,
    written: u64,
    limit: u64,
}

impl Output<'_, '_> {
    fn emit(&mut self, data: &mut Vec<u8>) -> Result<(), ExtractError> {
        let room = self.limit - self.written;
        let take = (data.len() as u64).min(room) as usize;
        if take > 0 {
            self.hasher.update(&data[..take]);
            (self.sink)(&data[..take])?;
            self.written += take as u64;
        }
        data.clear();
        Ok(())
    }
}

/// Extracts and tests entries, keeping the decoder of the current solid run
/// between calls so that entries read in archive order are decoded once.
pub struct ExtractionEngine {
    keys: Arc<KeyCache>,
    password: Option<Password>,
    decoders: Arc<dyn DecompressorFactory>,
    cursor: Option<SolidCursor>,
    /// An "all" answer given during this session.
    session_policy: Option<OverwritePolicy>,
    handler: Option<Box<dyn DecisionHandler>>,
    cancel: Arc<AtomicBool>,
}

impl ExtractionEngine {
    pub fn new(
        keys: Arc<KeyCache>,
        password: Option<Password>,
        decoders: Arc<dyn DecompressorFactory>,
    ) -> ExtractionEngine {
        ExtractionEngine {
            keys,
            password,
            decoders,
            cursor: None,
            session_policy: None,
            handler: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_decision_handler(&mut self, handler: Box<dyn DecisionHandler>) {
        self.handler = Some(handler);
    }

    /// Setting the flag stops extraction before the next entry.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub(crate) fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> ExtractionEngine {
        self.cancel = cancel;
        self
    }

    fn check_cancelled(&self) -> Result<(), ExtractError> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(ExtractError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Decode and verify entry `index` without writing it anywhere.
    pub fn test(
        &mut self,
        entries: &[FileEntry],
        index: usize,
        volumes: &mut VolumeSet,
    ) -> Result<EntryOutcome, ExtractError> {
        self.check_cancelled()?;
        let entry = entries.get(index).ok_or(ExtractError::UnknownEntry(index))?;
        if entry.redirection.is_some() {
            return Ok(EntryOutcome::Skipped(SkipReason::Link));
        }
        let decoded = self.decode(entries, index, volumes, &mut |_| Ok(()))?;
        verify(entry, &decoded)?;
        Ok(EntryOutcome::Tested {
            bytes: decoded.bytes,
        })
    }

    /// Test every entry of `run` in order.
    pub(crate) fn test_run(
        &mut self,
        entries: &[FileEntry],
        run: &[usize],
        volumes: &mut VolumeSet,
    ) -> Vec<(usize, Result<EntryOutcome, ExtractError>)> {
        run.iter()
            .map(|&index| (index, self.test(entries, index, volumes)))
            .collect()
    }

    /// Extract entry `index` below `destination`.
    pub fn extract(
        &mut self,
        entries: &[FileEntry],
        index: usize,
        volumes: &mut VolumeSet,
        destination: &Path,
        options: &ExtractOptions,
    ) -> Result<EntryOutcome, ExtractError> {
        self.check_cancelled()?;
        let entry = entries.get(index).ok_or(ExtractError::UnknownEntry(index))?;
        if let Some(redirection) = &entry.redirection {
            tracing::info!(name = %entry.name, target = %redirection.target, "link not created");
            return Ok(EntryOutcome::Skipped(SkipReason::Link));
        }

        let relative = EntryPath::new(&entry.name)
            .map_err(|e| ExtractError::InvalidPath(entry.name.clone(), e))?;
        let mut path = relative.under(destination);

        if entry.is_directory() {
            fs::create_dir_all(&path).map_err(|e| ExtractError::CreateDirFailed(e, path.clone()))?;
            return Ok(EntryOutcome::DirectoryCreated(path));
        }

        if path.symlink_metadata().is_ok() {
            match self.resolve_existing(entry, &path, options)? {
                Some(target) => path = target,
                None => return Ok(EntryOutcome::Skipped(SkipReason::Exists)),
            }
        }

        loop {
            match self.write_file(entries, index, volumes, &path, options) {
                Ok(bytes) => return Ok(EntryOutcome::Extracted { path, bytes }),
                Err(e @ (ExtractError::WriteFailed(..) | ExtractError::DiskFull(..))) => {
                    let kind = match e {
                        ExtractError::DiskFull(..) => ConflictKind::DiskFull,
                        _ => ConflictKind::WriteFailed,
                    };
                    match self.ask(entry, &path, kind) {
                        Some(Decision::Replace) | Some(Decision::ReplaceAll) => {
                            tracing::info!(path = %path.display(), "retrying write");
                        }
                        Some(Decision::Rename) => path = free_name(&path),
                        Some(Decision::Cancel) => {
                            self.cancel.store(true, Ordering::Relaxed);
                            return Err(ExtractError::Cancelled);
                        }
                        Some(Decision::Skip) | Some(Decision::SkipAll) | None => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn ask(&mut self, entry: &FileEntry, path: &Path, kind: ConflictKind) -> Option<Decision> {
        let conflict = Conflict {
            entry_name: entry.name.clone(),
            path: path.to_path_buf(),
            size: entry.unpacked_size,
            modified: entry.times.modified,
            kind,
        };
        self.handler.as_mut().map(|handler| handler.decide(&conflict))
    }

    /// Where to write an entry whose output exists, or `None` to skip it.
    fn resolve_existing(
        &mut self,
        entry: &FileEntry,
        path: &Path,
        options: &ExtractOptions,
    ) -> Result<Option<PathBuf>, ExtractError> {
        let policy = match options.overwrite {
            OverwritePolicy::ForceAsk => OverwritePolicy::ForceAsk,
            policy => self.session_policy.unwrap_or(policy),
        };
        match policy {
            OverwritePolicy::ReplaceAll => Ok(Some(path.to_path_buf())),
            OverwritePolicy::SkipAll => Ok(None),
            OverwritePolicy::AutoRename => Ok(Some(free_name(path))),
            OverwritePolicy::Default | OverwritePolicy::ForceAsk => {
                let decision = self
                    .ask(entry, path, ConflictKind::Exists)
                    .ok_or_else(|| ExtractError::DecisionRequired(path.to_path_buf()))?;
                let remember = policy == OverwritePolicy::Default;
                match decision {
                    Decision::Replace => Ok(Some(path.to_path_buf())),
                    Decision::ReplaceAll => {
                        if remember {
                            self.session_policy = Some(OverwritePolicy::ReplaceAll);
                        }
                        Ok(Some(path.to_path_buf()))
                    }
                    Decision::Skip => Ok(None),
                    Decision::SkipAll => {
                        if remember {
                            self.session_policy = Some(OverwritePolicy::SkipAll);
                        }
                        Ok(None)
                    }
                    Decision::Rename => Ok(Some(free_name(path))),
                    Decision::Cancel => {
                        self.cancel.store(true, Ordering::Relaxed);
                        Err(ExtractError::Cancelled)
                    }
                }
            }
        }
    }

    /// Decode entry `index` into a new file at `path`. The file is closed
    /// before returning, and removed again if it could not be completed.
    fn write_file(
        &mut self,
        entries: &[FileEntry],
        index: usize,
        volumes: &mut VolumeSet,
        path: &Path,
        options: &ExtractOptions,
    ) -> Result<u64, ExtractError> {
        let entry = &entries[index];
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ExtractError::CreateDirFailed(e, parent.to_path_buf()))?;
        }
        // Replace a link at the output path rather than write through it.
        if fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink()) {
            fs::remove_file(path).map_err(|e| ExtractError::CreateFileFailed(e, path.to_path_buf()))?;
        }
        let file =
            File::create(path).map_err(|e| ExtractError::CreateFileFailed(e, path.to_path_buf()))?;
        let mut writer = BufWriter::new(file);

        let decoded = self.decode(entries, index, volumes, &mut |data| {
            writer.write_all(data).map_err(|e| write_error(e, path))
        });
        let result = decoded
            .and_then(|decoded| {
                writer.flush().map_err(|e| write_error(e, path))?;
                Ok(decoded)
            })
            .and_then(|decoded| {
                if options.verify {
                    verify(entry, &decoded)?;
                }
                Ok(decoded)
            });

        match result {
            Ok(decoded) => {
                let file = writer
                    .into_inner()
                    .map_err(|e| write_error(e.into_error(), path))?;
                restore_metadata(&file, entry, path, options);
                Ok(decoded.bytes)
            }
            Err(e) => {
                drop(writer);
                let partial = matches!(e, ExtractError::WriteFailed(..) | ExtractError::DiskFull(..));
                if partial || !options.keep_broken {
                    if let Err(remove) = fs::remove_file(path) {
                        tracing::warn!(path = %path.display(), error = %remove, "could not remove broken output");
                    }
                }
                Err(e)
            }
        }
    }

    /// Decode entry `index`, first decoding the entries of its solid run
    /// that the current decoder has not seen yet.
    pub(crate) fn decode(
        &mut self,
        entries: &[FileEntry],
        index: usize,
        volumes: &mut VolumeSet,
        sink: &mut Sink<'_>,
    ) -> Result<Decoded, ExtractError> {
        let entry = entries.get(index).ok_or(ExtractError::UnknownEntry(index))?;
        if entry.is_directory() {
            return Ok(Decoded {
                bytes: 0,
                checksum: Checksum::None,
            });
        }
        if !in_stream(entry) {
            return self.decode_isolated(entry, volumes, sink);
        }

        let start = run_start(entries, index);
        let mut cursor = match self.cursor.take() {
            Some(cursor) if cursor.run_start == start && cursor.next <= index => cursor,
            _ => {
                if start != index {
                    tracing::debug!(from = start, to = index, "starting solid run from its first entry");
                }
                SolidCursor {
                    run_start: start,
                    next: start,
                    decoder: self.create_decoder(&entries[start])?,
                }
            }
        };
        while cursor.next < index {
            let skipped = &entries[cursor.next];
            if in_stream(skipped) {
                self.decode_entry(skipped, cursor.decoder.as_mut(), volumes, &mut |_| Ok(()))?;
            }
            cursor.next += 1;
        }
        let decoded = self.decode_entry(entry, cursor.decoder.as_mut(), volumes, sink)?;
        cursor.next = index + 1;
        self.cursor = Some(cursor);
        Ok(decoded)
    }

    /// Decode one entry with a fresh decoder, ignoring the solid run.
    pub(crate) fn decode_isolated(
        &self,
        entry: &FileEntry,
        volumes: &mut VolumeSet,
        sink: &mut Sink<'_>,
    ) -> Result<Decoded, ExtractError> {
        let mut decoder = self.create_decoder(entry)?;
        self.decode_entry(entry, decoder.as_mut(), volumes, sink)
    }

    fn create_decoder(&self, entry: &FileEntry) -> Result<Box<dyn Decompressor>, ExtractError> {
        self.decoders
            .create(&entry.compression)
            .ok_or_else(|| ExtractError::UnsupportedMethod {
                name: entry.name.clone(),
                method: entry.compression.method,
                version: entry.compression.version,
            })
    }

    fn entry_key(
        &self,
        entry: &FileEntry,
        encryption: &EntryEncryption,
    ) -> Result<(Box<dyn BlockCipher>, KeyMaterial), ExtractError> {
        let unsupported = |why: String| ExtractError::UnsupportedEncryption(entry.name.clone(), why);
        let kdf = encryption
            .kdf()
            .ok_or_else(|| unsupported(encryption.to_string()))?;
        if let EntryEncryption::Rar50 { lg2_count, .. } = encryption {
            if *lg2_count > RAR50_MAX_LG2_COUNT {
                return Err(unsupported(format!(
                    "{} with 2^{} key derivation rounds",
                    encryption, lg2_count
                )));
            }
        }
        let password = self
            .password
            .as_ref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ExtractError::MissingPassword(entry.name.clone()))?;

        let material = self.keys.derive_key(password, encryption.salt(), kdf);
        if let EntryEncryption::Rar50 {
            check: Some(check), ..
        } = encryption
        {
            if check_password(&material, check) == Some(false) {
                return Err(ExtractError::BadPassword(entry.name.clone()));
            }
        }
        let cipher = encryption
            .data_cipher(&material)
            .ok_or_else(|| unsupported(encryption.to_string()))?;
        Ok((cipher, material))
    }

    /// Feed every segment of `entry` through `decoder`.
    fn decode_entry(
        &self,
        entry: &FileEntry,
        decoder: &mut dyn Decompressor,
        volumes: &mut VolumeSet,
        sink: &mut Sink<'_>,
    ) -> Result<Decoded, ExtractError> {
        let name = &entry.name;
        if entry.continues_from_previous_volume() {
            return Err(ExtractError::MissingPreviousVolume(name.clone()));
        }
        if let Some(last) = entry.segments.last().filter(|s| s.split_after) {
            // The reader merges every part it finds; a trailing part means
            // the scan stopped at a missing volume.
            volumes.volume(last.volume + 1)?;
            return Err(ExtractError::TruncatedData(name.clone()));
        }

        let (mut cipher, material) = match &entry.encryption {
            Some(encryption) => {
                let (cipher, material) = self.entry_key(entry, encryption)?;
                (Some(cipher), Some(material))
            }
            None => (None, None),
        };
        let mac_key = material
            .as_ref()
            .filter(|_| entry.encryption.as_ref().map_or(false, |e| e.uses_mac()))
            .map(|m| m.hash_key());

        let limit = if entry.flags.contains(EntryFlag::UnknownSize) {
            u64::MAX
        } else {
            entry.unpacked_size
        };
        let mut output = Output {
            sink,
            hasher: entry.checksum.hasher(),
            written: 0,
            limit,
        };
        let mut out = Vec::with_capacity(DEFAULT_BLOCK_SIZE);
        let mut buf = Vec::with_capacity(DEFAULT_BLOCK_SIZE + CIPHER_BLOCK);
        let mut carry: Vec<u8> = Vec::with_capacity(CIPHER_BLOCK);

        for (part, segment) in entry.segments.iter().enumerate() {
            let volume = volumes.volume(segment.volume)?;
            let packed = usize::try_from(segment.offset)
                .ok()
                .zip(usize::try_from(segment.length).ok())
                .and_then(|(start, len)| volume.data.get(start..start.checked_add(len)?))
                .ok_or_else(|| ExtractError::TruncatedData(name.clone()))?;

            if !segment.checksum.is_none() {
                let mut actual = segment.checksum.compute(packed);
                if let Some(key) = mac_key {
                    actual = mac_checksum(key, actual);
                }
                if actual != segment.checksum {
                    tracing::warn!(name = %name, part = part + 1, "packed data checksum mismatch");
                    return Err(ExtractError::EntryCrcMismatch {
                        name: format!("{} (part {})", name, part + 1),
                        expected: segment.checksum.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }

            for chunk in packed.chunks(DEFAULT_BLOCK_SIZE) {
                let plain: &[u8] = match cipher.as_mut() {
                    Some(cipher) => {
                        buf.clear();
                        buf.extend_from_slice(&carry);
                        buf.extend_from_slice(chunk);
                        let whole = buf.len() - buf.len() % CIPHER_BLOCK;
                        carry.clear();
                        carry.extend_from_slice(&buf[whole..]);
                        buf.truncate(whole);
                        cipher.decrypt_blocks(&mut buf);
                        &buf
                    }
                    None => chunk,
                };
                decoder
                    .feed(plain, &mut out)
                    .map_err(|e| ExtractError::DecompressionFailed(name.clone(), e))?;
                output.emit(&mut out)?;
            }
        }
        decoder
            .finish(&mut out)
            .map_err(|e| ExtractError::DecompressionFailed(name.clone(), e))?;
        output.emit(&mut out)?;

        if !carry.is_empty() {
            tracing::debug!(name = %name, bytes = carry.len(), "encrypted data is not a whole number of blocks");
        }
        let written = output.written;
        if limit != u64::MAX && written < limit {
            return Err(ExtractError::TruncatedData(name.clone()));
        }

        let mut checksum = output.hasher.finalize();
        if let Some(key) = mac_key {
            checksum = mac_checksum(key, checksum);
        }
        Ok(Decoded {
            bytes: written,
            checksum,
        })
    }
}

fn verify(entry: &FileEntry, decoded: &Decoded) -> Result<(), ExtractError> {
    if entry.is_directory() || entry.checksum.is_none() || decoded.checksum == entry.checksum {
        return Ok(());
    }
    tracing::warn!(
        name = %entry.name,
        expected = %entry.checksum,
        actual = %decoded.checksum,
        "checksum mismatch"
    );
    Err(ExtractError::EntryCrcMismatch {
        name: entry.name.clone(),
        expected: entry.checksum.to_string(),
        actual: decoded.checksum.to_string(),
    })
}

fn write_error(e: io::Error, path: &Path) -> ExtractError {
    if e.kind() == io::ErrorKind::StorageFull {
        ExtractError::DiskFull(e, path.to_path_buf())
    } else {
        ExtractError::WriteFailed(e, path.to_path_buf())
    }
}

/// `name(1).ext`, `name(2).ext`, ... whichever does not exist yet.
fn free_name(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    (1u64..)
        .map(|n| {
            let name = match &ext {
                Some(ext) => format!("{}({}).{}", stem, n, ext),
                None => format!("{}({})", stem, n),
            };
            path.with_file_name(name)
        })
        .find(|candidate| candidate.symlink_metadata().is_err())
        .unwrap_or_else(|| path.to_path_buf())
}

fn restore_metadata(file: &File, entry: &FileEntry, path: &Path, options: &ExtractOptions) {
    if options.restore_times {
        if let Some(modified) = entry.times.modified {
            if let Err(e) = file.set_modified(SystemTime::from(modified.and_utc())) {
                tracing::warn!(path = %path.display(), error = %e, "could not set modification time");
            }
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = entry.unix_mode().filter(|mode| *mode != 0);
        if let Some(mode) = mode.filter(|_| options.restore_permissions) {
            if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
                tracing::warn!(path = %path.display(), error = %e, "could not set permissions");
            }
        }
    }
}
