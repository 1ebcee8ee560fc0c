use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rayon::prelude::*;

use super::extract::{independent_runs, ExtractionEngine};
use super::{
    DecisionHandler, EntryOutcome, ExtractOptions, ExtractReport, ReaderState, SkipReason,
};
use crate::compression::{DecompressorFactory, StandardDecoders};
use crate::crypto::{KeyCache, Password};
use crate::de::HeaderCodec;
use crate::error::{DecodeError, ExtractError, OpenError};
use crate::header::{Archive, Format, Signature, MAX_SFX_SIZE};
use crate::path::PathMatcher;
use crate::quick_open::QuickOpenIndex;
use crate::record::{ArchiveFlag, EntryFlag, FileEntry, Header, HeaderKind, MainHeader};
use crate::volume::{MappedFiles, NumberingScheme, Volume, VolumeData, VolumeSet, VolumeSource};

const COMMENT_SERVICE: &str = "CMT";

/// How an archive is opened.
#[derive(Clone)]
pub struct OpenOptions {
    password: Option<Password>,
    key_cache: Option<Arc<KeyCache>>,
    source: Option<Arc<dyn VolumeSource>>,
    decoders: Option<Arc<dyn DecompressorFactory>>,
    quick_open: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            password: None,
            key_cache: None,
            source: None,
            decoders: None,
            quick_open: true,
        }
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("password", &self.password)
            .field("source", &self.source)
            .field("decoders", &self.decoders)
            .field("quick_open", &self.quick_open)
            .finish_non_exhaustive()
    }
}

impl OpenOptions {
    pub fn new() -> OpenOptions {
        OpenOptions::default()
    }

    pub fn password(mut self, password: impl Into<Password>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Derived keys are shared process-wide unless a cache is given here.
    pub fn key_cache(mut self, cache: Arc<KeyCache>) -> Self {
        self.key_cache = Some(cache);
        self
    }

    /// Read volumes from `source` instead of memory mapped files.
    pub fn source(mut self, source: Arc<dyn VolumeSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn decoders(mut self, decoders: Arc<dyn DecompressorFactory>) -> Self {
        self.decoders = Some(decoders);
        self
    }

    /// Whether a RAR 5.0 quick open record may stand in for walking the headers.
    pub fn quick_open(mut self, enabled: bool) -> Self {
        self.quick_open = enabled;
        self
    }

    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<ArchiveReader, OpenError> {
        ArchiveReader::open_with(path, self)
    }
}

/// A reading session over one archive.
///
/// Headers are read lazily: [`ArchiveReader::next_entry`] walks the header
/// stream, crossing volume boundaries as needed, and every entry it returns
/// can then be tested or extracted. Entries of a solid archive are cheapest
/// to extract in the order they were read.
pub struct ArchiveReader {
    state: ReaderState,
    archive: Archive,
    volumes: VolumeSet,
    codec: HeaderCodec,
    keys: Arc<KeyCache>,
    password: Option<Password>,
    decoders: Arc<dyn DecompressorFactory>,
    quick_open: bool,
    quick_opened: usize,
    volume: Volume,
    position: u64,
    queued: VecDeque<Header>,
    /// Headers of the current volume copied by its quick open record, in order.
    cached: VecDeque<Header>,
    /// The current volume ended and the archive continues in the next one.
    advance: bool,
    finished: bool,
    last_split_after: bool,
    pending: Option<FileEntry>,
    entries: Vec<FileEntry>,
    comment: Option<String>,
    engine: ExtractionEngine,
}

impl fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("state", &self.state)
            .field("archive", &self.archive)
            .field("volume", &self.volume.index)
            .field("position", &self.position)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl ArchiveReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ArchiveReader, OpenError> {
        ArchiveReader::open_with(path, OpenOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        options: OpenOptions,
    ) -> Result<ArchiveReader, OpenError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "opening archive");

        let source = options
            .source
            .unwrap_or_else(|| Arc::new(MappedFiles) as Arc<dyn VolumeSource>);
        let mut volumes = VolumeSet::new(source, path);
        let volume = volumes.open_first().map_err(|e| match e {
            DecodeError::Io(e, path) => OpenError::ReadFailed(e, path),
            e => OpenError::Decode(e),
        })?;

        let signature = match Signature::find(&volume.data, MAX_SFX_SIZE) {
            Some(sig) if sig.format != Format::FutureUnknown => sig,
            Some(_) => {
                tracing::debug!("archive format is newer than any supported");
                return Err(DecodeError::UnrecognizedFormat.into());
            }
            None => return Err(DecodeError::UnrecognizedFormat.into()),
        };
        if signature.offset > 0 {
            tracing::debug!(offset = signature.offset, "archive follows a self-extracting module");
        }

        let keys = options.key_cache.unwrap_or_else(KeyCache::shared);
        let decoders = options
            .decoders
            .unwrap_or_else(|| Arc::new(StandardDecoders) as Arc<dyn DecompressorFactory>);
        let password = options.password;

        let mut reader = ArchiveReader {
            state: ReaderState::Unopened,
            archive: Archive::new(signature),
            volumes,
            codec: HeaderCodec::new(signature.format, password.clone(), keys.clone()),
            engine: ExtractionEngine::new(keys.clone(), password.clone(), decoders.clone()),
            keys,
            password,
            decoders,
            quick_open: options.quick_open,
            quick_opened: 0,
            volume: volume.clone(),
            position: signature.first_block(),
            queued: VecDeque::new(),
            cached: VecDeque::new(),
            advance: false,
            finished: false,
            last_split_after: false,
            pending: None,
            entries: Vec::new(),
            comment: None,
        };
        reader.set_state(ReaderState::SignatureDetected);
        reader.begin_volume(volume, signature)?;
        let scanning = if reader.quick_opened > 0 {
            ReaderState::FastIndexed
        } else {
            ReaderState::FullScanning
        };
        reader.set_state(scanning);
        Ok(reader)
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// The archive comment, once the header carrying it has been read.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Entries read so far, in archive order.
    pub fn entries_read(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn volumes(&self) -> &VolumeSet {
        &self.volumes
    }

    /// Whether any volume was listed from its quick open record.
    pub fn used_quick_open(&self) -> bool {
        self.quick_opened > 0
    }

    pub fn set_decision_handler(&mut self, handler: Box<dyn DecisionHandler>) {
        self.engine.set_decision_handler(handler);
    }

    /// Setting the returned flag stops extraction before the next entry.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.engine.cancel_flag()
    }

    /// Iterate over the entries not read yet.
    pub fn entries(&mut self) -> Entries<'_> {
        Entries { reader: self }
    }

    /// Release the volumes. Later calls find no more entries and extract nothing.
    pub fn close(&mut self) {
        self.queued.clear();
        self.cached.clear();
        self.pending = None;
        self.volume = Volume {
            index: self.volume.index,
            path: self.volume.path.clone(),
            data: VolumeData::Memory(Arc::from(Vec::new())),
        };
        self.volumes.release();
        self.set_state(ReaderState::Closed);
    }

    fn set_state(&mut self, state: ReaderState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "reader state");
            self.state = state;
        }
    }

    fn fail(&mut self, error: DecodeError) -> DecodeError {
        tracing::warn!(
            error = %error,
            volume = self.volume.index,
            position = self.position,
            "header stream failed"
        );
        self.set_state(ReaderState::Broken);
        error
    }

    /// Read the opening headers of `volume` and, where possible, its quick
    /// open record.
    fn begin_volume(&mut self, volume: Volume, signature: Signature) -> Result<(), DecodeError> {
        self.codec.start_volume();
        self.cached.clear();
        self.volume = volume;
        self.position = signature.first_block();
        self.last_split_after = false;

        loop {
            let header = self
                .codec
                .decode_next(&self.volume.data, self.position, self.volume.index)?
                .ok_or(DecodeError::TruncatedBlock {
                    position: self.position,
                    needed: 1,
                    available: 0,
                })?;
            self.position = header.next_position();

            match &header.kind {
                HeaderKind::Crypt(crypt) => {
                    if self.volume.index == 0 {
                        self.archive.is_encrypted_headers = true;
                        self.archive.salt = Some(crypt.salt.to_vec());
                    }
                    self.queued.push_back(header);
                }
                HeaderKind::Main(main) => {
                    let main = main.clone();
                    if self.volume.index == 0 {
                        self.apply_main(&main)?;
                    } else if main.volume_number.is_some() {
                        tracing::debug!(number = ?main.volume_number, "volume number");
                    }
                    self.queued.push_back(header);
                    self.try_quick_open(&main);
                    return Ok(());
                }
                _ => {
                    return Err(DecodeError::CorruptHeader {
                        position: header.position,
                        reason: "volume does not start with a main header",
                    })
                }
            }
        }
    }

    fn apply_main(&mut self, main: &MainHeader) -> Result<(), DecodeError> {
        let flags = main.flags;
        let format = self.archive.format;
        let archive = &mut self.archive;
        archive.is_solid = flags.contains(ArchiveFlag::Solid);
        archive.is_locked = flags.contains(ArchiveFlag::Locked);
        archive.is_volume = flags.contains(ArchiveFlag::Volume);
        archive.has_recovery_record =
            flags.contains(ArchiveFlag::RecoveryRecord) || main.recovery_offset.is_some();
        archive.has_comment = flags.contains(ArchiveFlag::Comment) || main.comment.is_some();
        archive.volume_number = main.volume_number;
        if flags.contains(ArchiveFlag::EncryptedHeaders) {
            archive.is_encrypted_headers = true;
        }
        archive.numbering = if format == Format::Modern50 || flags.contains(ArchiveFlag::NewNumbering)
        {
            NumberingScheme::New
        } else {
            NumberingScheme::Old
        };
        archive.is_first_volume = !archive.is_volume
            || flags.contains(ArchiveFlag::FirstVolume)
            || (format != Format::Modern50
                && archive.volume_number.is_none()
                && has_first_volume_extension(self.volumes.first_path()));
        self.volumes.set_scheme(archive.numbering);

        if archive.is_volume && !archive.is_first_volume {
            tracing::warn!(
                path = %self.volumes.first_path().display(),
                "not the first volume; entries before it cannot be read"
            );
        }
        if archive.is_encrypted_headers && self.password.is_none() {
            return Err(DecodeError::MissingPassword);
        }
        if let Some(text) = main.comment.as_ref().and_then(|c| c.text()) {
            self.comment = Some(text);
        }
        Ok(())
    }

    fn try_quick_open(&mut self, main: &MainHeader) {
        if !self.quick_open || self.archive.format != Format::Modern50 {
            return;
        }
        if let Some(index) =
            QuickOpenIndex::try_load(&self.volume, main, &mut self.codec, self.position)
        {
            self.cached.extend(index.lookup_headers());
            self.quick_opened += 1;
        }
    }

    /// The cached copy of the header at the current position, if the quick
    /// open record holds one. Positions it does not cover are read live.
    fn take_cached(&mut self) -> Option<Header> {
        while let Some(front) = self.cached.front() {
            match front.position.cmp(&self.position) {
                Ordering::Less => {
                    tracing::debug!(position = front.position, "cached header not on the live header chain");
                    self.cached.pop_front();
                }
                Ordering::Equal => return self.cached.pop_front(),
                Ordering::Greater => return None,
            }
        }
        None
    }

    fn next_volume(&mut self) -> Result<(), DecodeError> {
        let volume = self.volumes.open_next()?;
        let signature = Signature::find(&volume.data, MAX_SFX_SIZE)
            .filter(|sig| sig.format == self.archive.format)
            .ok_or(DecodeError::CorruptHeader {
                position: 0,
                reason: "volume is not part of this archive",
            })?;
        tracing::debug!(
            volume = volume.index,
            path = %volume.path.display(),
            "continuing in next volume"
        );
        self.begin_volume(volume, signature)
    }

    /// Track volume continuation as headers go by.
    fn observe(&mut self, header: Header) -> Header {
        match &header.kind {
            HeaderKind::File(entry) => self.last_split_after = entry.continues_in_next_volume(),
            HeaderKind::EndOfArchive(end) => {
                if end.next_volume || (self.archive.is_volume && self.last_split_after) {
                    self.advance = true;
                } else {
                    self.finished = true;
                }
            }
            _ => {}
        }
        header
    }

    /// The next header of the archive, in any volume.
    pub fn next_header(&mut self) -> Option<Result<Header, DecodeError>> {
        loop {
            if !self.state.is_scanning() {
                return None;
            }
            if let Some(header) = self.queued.pop_front() {
                return Some(Ok(self.observe(header)));
            }
            if self.finished {
                self.set_state(ReaderState::Ready);
                return None;
            }
            if self.advance {
                self.advance = false;
                if let Err(e) = self.next_volume() {
                    return Some(Err(self.fail(e)));
                }
                continue;
            }
            if let Some(header) = self.take_cached() {
                self.position = header.next_position();
                return Some(Ok(self.observe(header)));
            }

            match self
                .codec
                .decode_next(&self.volume.data, self.position, self.volume.index)
            {
                Ok(Some(header)) => {
                    self.position = header.next_position();
                    return Some(Ok(self.observe(header)));
                }
                Ok(None) if self.archive.is_volume && self.last_split_after => {
                    self.advance = true;
                }
                Ok(None) => self.finished = true,
                Err(e) => return Some(Err(self.fail(e))),
            }
        }
    }

    /// The next file or directory entry, with the parts of a file split over
    /// volumes merged into one entry.
    pub fn next_entry(&mut self) -> Option<Result<FileEntry, DecodeError>> {
        loop {
            let header = match self.next_header() {
                Some(Ok(header)) => header,
                Some(Err(e)) => {
                    if let Some(partial) = self.pending.take() {
                        tracing::debug!(name = %partial.name, "dropping incomplete split entry");
                    }
                    return Some(Err(e));
                }
                None => return self.pending.take().map(|entry| Ok(self.record(entry))),
            };

            match header.kind {
                HeaderKind::File(entry) => {
                    if let Some(entry) = self.merge_part(entry) {
                        return Some(Ok(self.record(entry)));
                    }
                }
                HeaderKind::Service(service) if service.name == COMMENT_SERVICE => {
                    self.read_comment(&service.entry)
                }
                HeaderKind::Comment(comment) => {
                    if self.comment.is_none() {
                        self.comment = comment.text();
                    }
                }
                _ => {}
            }
        }
    }

    fn merge_part(&mut self, part: FileEntry) -> Option<FileEntry> {
        let entry = match (part.continues_from_previous_volume(), self.pending.take()) {
            (true, Some(mut whole)) if whole.name == part.name => {
                whole.packed_size += part.packed_size;
                whole.checksum = part.checksum;
                let split_after = part.continues_in_next_volume();
                whole.segments.extend(part.segments);
                if split_after {
                    whole.flags.insert(EntryFlag::SplitAfter);
                } else {
                    whole.flags.remove(EntryFlag::SplitAfter);
                }
                whole
            }
            (continues, stale) => {
                if let Some(stale) = stale {
                    tracing::warn!(name = %stale.name, "split entry has no continuation");
                }
                if continues {
                    tracing::debug!(name = %part.name, "entry continues from a volume that was not read");
                }
                part
            }
        };
        if entry.continues_in_next_volume() {
            self.pending = Some(entry);
            None
        } else {
            Some(entry)
        }
    }

    fn record(&mut self, mut entry: FileEntry) -> FileEntry {
        entry.index = self.entries.len();
        self.entries.push(entry.clone());
        entry
    }

    fn read_comment(&mut self, entry: &FileEntry) {
        if self.comment.is_some() || entry.is_encrypted() {
            return;
        }
        let Some(segment) = entry.segments.first() else {
            return;
        };
        let data: &[u8] = &self.volume.data;
        let Some(packed) = segment
            .offset
            .checked_add(segment.length)
            .and_then(|end| data.get(segment.offset as usize..end as usize))
        else {
            return;
        };
        let Some(mut decoder) = self.decoders.create(&entry.compression) else {
            tracing::debug!(method = entry.compression.method, "comment packed with an unsupported method");
            return;
        };
        let mut text = Vec::new();
        if let Err(e) = decoder
            .feed(packed, &mut text)
            .and_then(|_| decoder.finish(&mut text))
        {
            tracing::debug!(error = %e, "comment unreadable");
            return;
        }
        text.truncate(entry.unpacked_size as usize);
        self.comment = Some(String::from_utf8_lossy(&text).into_owned());
    }

    /// The index of `entry` if it was read from this archive.
    fn check_entry(&self, entry: &FileEntry) -> Result<usize, ExtractError> {
        match self.state {
            ReaderState::Unopened
            | ReaderState::SignatureDetected
            | ReaderState::Extracting
            | ReaderState::Closed => return Err(ExtractError::InvalidState(self.state)),
            _ => {}
        }
        match self.entries.get(entry.index) {
            Some(known) if known.name == entry.name && known.segments == entry.segments => {
                Ok(entry.index)
            }
            _ => Err(ExtractError::UnknownEntry(entry.index)),
        }
    }

    fn finish_extraction(&mut self, resume: ReaderState, result: &Result<EntryOutcome, ExtractError>) {
        match result {
            Err(ExtractError::ReadFailed(..)) => self.set_state(ReaderState::Broken),
            _ => self.set_state(resume),
        }
    }

    /// Extract `entry` below `destination`.
    pub fn extract<P: AsRef<Path>>(
        &mut self,
        entry: &FileEntry,
        destination: P,
        options: &ExtractOptions,
    ) -> Result<EntryOutcome, ExtractError> {
        let index = self.check_entry(entry)?;
        let resume = self.state;
        self.set_state(ReaderState::Extracting);
        let result = self.engine.extract(
            &self.entries,
            index,
            &mut self.volumes,
            destination.as_ref(),
            options,
        );
        self.finish_extraction(resume, &result);
        result
    }

    /// Decode `entry` and verify its checksum without writing anything.
    pub fn test(&mut self, entry: &FileEntry) -> Result<EntryOutcome, ExtractError> {
        let index = self.check_entry(entry)?;
        let resume = self.state;
        self.set_state(ReaderState::Extracting);
        let result = self.engine.test(&self.entries, index, &mut self.volumes);
        self.finish_extraction(resume, &result);
        result
    }

    /// Extract every entry accepted by `matcher`, in archive order, reading
    /// the rest of the headers as it goes.
    pub fn extract_all<P: AsRef<Path>>(
        &mut self,
        destination: P,
        matcher: &PathMatcher,
        options: &ExtractOptions,
    ) -> ExtractReport {
        self.extract_all_with_progress(destination, matcher, options, |_, _| {})
    }

    /// Like [`ArchiveReader::extract_all`], calling `progress` after each
    /// matched entry.
    pub fn extract_all_with_progress<P, F>(
        &mut self,
        destination: P,
        matcher: &PathMatcher,
        options: &ExtractOptions,
        mut progress: F,
    ) -> ExtractReport
    where
        P: AsRef<Path>,
        F: FnMut(&FileEntry, &Result<EntryOutcome, ExtractError>),
    {
        let destination = destination.as_ref();
        self.for_each_entry(matcher, &mut progress, |reader, entry| {
            reader.extract(entry, destination, options)
        })
    }

    /// Test every entry accepted by `matcher`, in archive order.
    pub fn test_all(&mut self, matcher: &PathMatcher) -> ExtractReport {
        self.test_all_with_progress(matcher, |_, _| {})
    }

    pub fn test_all_with_progress<F>(&mut self, matcher: &PathMatcher, mut progress: F) -> ExtractReport
    where
        F: FnMut(&FileEntry, &Result<EntryOutcome, ExtractError>),
    {
        self.for_each_entry(matcher, &mut progress, |reader, entry| reader.test(entry))
    }

    fn for_each_entry<F>(
        &mut self,
        matcher: &PathMatcher,
        progress: &mut dyn FnMut(&FileEntry, &Result<EntryOutcome, ExtractError>),
        mut f: F,
    ) -> ExtractReport
    where
        F: FnMut(&mut ArchiveReader, &FileEntry) -> Result<EntryOutcome, ExtractError>,
    {
        let mut report = ExtractReport::default();
        let mut index = 0;
        loop {
            if index == self.entries.len() {
                match self.next_entry() {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        report.scan_error = Some(e);
                        break;
                    }
                    None => break,
                }
            }
            let entry = self.entries[index].clone();
            index += 1;

            if !matcher.is_match(&entry.name) {
                report.push(entry.name, Ok(EntryOutcome::Skipped(SkipReason::NotMatched)));
                continue;
            }
            let result = f(self, &entry);
            progress(&entry, &result);
            let fatal = matches!(&result, Err(e) if e.is_fatal());
            report.push(entry.name, result);
            if fatal {
                break;
            }
        }
        report
    }

    /// Test every entry accepted by `matcher` on up to `jobs` threads.
    ///
    /// The rest of the headers are read first. Each solid run is decoded on
    /// one thread, in order; independent entries and runs are spread over
    /// the pool. Results come back in archive order.
    pub fn test_parallel(&mut self, matcher: &PathMatcher, jobs: usize) -> ExtractReport {
        let mut report = ExtractReport::default();
        while let Some(result) = self.next_entry() {
            if let Err(e) = result {
                report.scan_error = Some(e);
                break;
            }
        }
        if self.state == ReaderState::Closed {
            return report;
        }

        let entries = &self.entries;
        let runs: Vec<Vec<usize>> = independent_runs(entries)
            .into_iter()
            .map(|run| {
                run.into_iter()
                    .filter(|&i| matcher.is_match(&entries[i].name))
                    .collect::<Vec<_>>()
            })
            .filter(|run| !run.is_empty())
            .collect();
        tracing::debug!(runs = runs.len(), jobs, "testing in parallel");

        let volumes = &self.volumes;
        let keys = &self.keys;
        let password = &self.password;
        let decoders = &self.decoders;
        let cancel = self.engine.cancel_flag();
        let work = |run: &Vec<usize>| {
            let mut volumes = volumes.clone();
            let mut engine = ExtractionEngine::new(keys.clone(), password.clone(), decoders.clone())
                .with_cancel_flag(cancel.clone());
            engine.test_run(entries, run, &mut volumes)
        };

        let mut results: Vec<(usize, Result<EntryOutcome, ExtractError>)> =
            match rayon::ThreadPoolBuilder::new().num_threads(jobs.max(1)).build() {
                Ok(pool) => pool.install(|| runs.par_iter().flat_map_iter(&work).collect()),
                Err(e) => {
                    tracing::warn!(error = %e, "no thread pool, testing serially");
                    runs.iter().flat_map(&work).collect()
                }
            };
        results.sort_by_key(|(index, _)| *index);

        let unmatched = self.entries.iter().filter(|e| !matcher.is_match(&e.name));
        let mut unmatched: Vec<(usize, String)> =
            unmatched.map(|e| (e.index, e.name.clone())).collect();
        unmatched.reverse();
        for (index, result) in results {
            while matches!(unmatched.last(), Some((i, _)) if *i < index) {
                if let Some((_, name)) = unmatched.pop() {
                    report.push(name, Ok(EntryOutcome::Skipped(SkipReason::NotMatched)));
                }
            }
            report.push(self.entries[index].name.clone(), result);
        }
        while let Some((_, name)) = unmatched.pop() {
            report.push(name, Ok(EntryOutcome::Skipped(SkipReason::NotMatched)));
        }
        report
    }
}

fn has_first_volume_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| {
            ["rar", "exe", "sfx"].iter().any(|e| ext.eq_ignore_ascii_case(e))
        })
}

/// Iterator over the entries of an [`ArchiveReader`] not read yet.
pub struct Entries<'a> {
    reader: &'a mut ArchiveReader,
}

impl Iterator for Entries<'_> {
    type Item = Result<FileEntry, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_entry()
    }
}
