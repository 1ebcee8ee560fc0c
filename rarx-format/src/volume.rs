//! The physical files that make up one archive, and how their names follow
//! each other.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::DecodeError;

/// Bytes of one volume, cheap to clone and share between threads.
#[derive(Clone)]
pub enum VolumeData {
    Mapped(Arc<Mmap>),
    Memory(Arc<[u8]>),
}

impl Deref for VolumeData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            VolumeData::Mapped(map) => map,
            VolumeData::Memory(bytes) => bytes,
        }
    }
}

impl fmt::Debug for VolumeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            VolumeData::Mapped(_) => "Mapped",
            VolumeData::Memory(_) => "Memory",
        };
        write!(f, "{}({} bytes)", kind, self.len())
    }
}

/// Where volumes come from.
pub trait VolumeSource: Send + Sync + fmt::Debug {
    fn exists(&self, path: &Path) -> bool;
    fn open(&self, path: &Path) -> io::Result<VolumeData>;
}

/// Volumes on disk, memory mapped.
#[derive(Debug, Default, Clone, Copy)]
pub struct MappedFiles;

impl VolumeSource for MappedFiles {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn open(&self, path: &Path) -> io::Result<VolumeData> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(VolumeData::Memory(Arc::from(Vec::new())));
        }
        // SAFETY: the map is read only. Volumes are not expected to change
        // while open; a truncated file surfaces as a bus error, as with any
        // memory mapped reader.
        let map = unsafe { Mmap::map(&file)? };
        Ok(VolumeData::Mapped(Arc::new(map)))
    }
}

/// Volumes held in memory, keyed by path.
#[derive(Debug, Default, Clone)]
pub struct MemoryVolumes {
    files: HashMap<PathBuf, Arc<[u8]>>,
}

impl MemoryVolumes {
    pub fn new() -> MemoryVolumes {
        MemoryVolumes::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), Arc::from(data.into()));
    }

    pub fn with(mut self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) -> MemoryVolumes {
        self.insert(path, data);
        self
    }
}

impl VolumeSource for MemoryVolumes {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn open(&self, path: &Path) -> io::Result<VolumeData> {
        self.files
            .get(path)
            .cloned()
            .map(VolumeData::Memory)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such volume"))
    }
}

#[derive(Debug, Clone)]
pub struct Volume {
    pub index: usize,
    pub path: PathBuf,
    pub data: VolumeData,
}

/// How volume names follow each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberingScheme {
    /// `name.rar`, `name.r00`, `name.r01`, ...
    Old,
    /// `name.part1.rar`, `name.part2.rar`, ...
    New,
}

impl NumberingScheme {
    /// The scheme that turns `first` into `second`, if any.
    pub fn infer(first: &Path, second: &Path) -> Option<NumberingScheme> {
        [NumberingScheme::New, NumberingScheme::Old]
            .into_iter()
            .find(|scheme| next_volume_name(first, *scheme) == second)
    }
}

/// The ordered volumes of one archive, opened on demand.
///
/// Clones share the already opened volume buffers, so a clone can be
/// handed to another thread.
#[derive(Debug, Clone)]
pub struct VolumeSet {
    source: Arc<dyn VolumeSource>,
    scheme: NumberingScheme,
    first: PathBuf,
    volumes: Vec<Volume>,
    current: usize,
}

impl VolumeSet {
    pub fn new(source: Arc<dyn VolumeSource>, first: impl Into<PathBuf>) -> VolumeSet {
        VolumeSet {
            source,
            scheme: NumberingScheme::New,
            first: first.into(),
            volumes: Vec::new(),
            current: 0,
        }
    }

    pub fn scheme(&self) -> NumberingScheme {
        self.scheme
    }

    pub fn set_scheme(&mut self, scheme: NumberingScheme) {
        self.scheme = scheme;
    }

    pub fn first_path(&self) -> &Path {
        &self.first
    }

    /// Index of the volume being read.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Number of volumes opened so far.
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.volumes.iter().map(|v| v.path.as_path())
    }

    pub fn open_first(&mut self) -> Result<Volume, DecodeError> {
        self.current = 0;
        if let Some(volume) = self.volumes.first() {
            return Ok(volume.clone());
        }
        let path = self.first.clone();
        let data = self
            .source
            .open(&path)
            .map_err(|e| DecodeError::Io(e, path.clone()))?;
        let volume = Volume { index: 0, path, data };
        self.volumes.push(volume.clone());
        Ok(volume)
    }

    /// Drop the opened volumes. They are opened again when next needed.
    pub fn release(&mut self) {
        self.volumes.clear();
        self.current = 0;
    }

    /// Move on to the volume after the current one.
    pub fn open_next(&mut self) -> Result<Volume, DecodeError> {
        let volume = self.volume(self.current + 1)?;
        self.current = volume.index;
        Ok(volume)
    }

    /// Volume `index`, opening the volumes up to it as needed.
    pub fn volume(&mut self, index: usize) -> Result<Volume, DecodeError> {
        if self.volumes.is_empty() {
            self.open_first()?;
        }
        while self.volumes.len() <= index {
            let last = &self.volumes[self.volumes.len() - 1];
            let path = next_volume_name(&last.path, self.scheme);
            if !self.source.exists(&path) {
                tracing::debug!(path = %path.display(), "next volume missing");
                return Err(DecodeError::VolumeMissing(path));
            }
            let data = self
                .source
                .open(&path)
                .map_err(|e| DecodeError::Io(e, path.clone()))?;
            tracing::debug!(path = %path.display(), bytes = data.len(), "opened volume");
            self.volumes.push(Volume {
                index: self.volumes.len(),
                path,
                data,
            });
        }
        Ok(self.volumes[index].clone())
    }
}

fn split_name(path: &Path) -> (Option<&Path>, Vec<char>) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().chars().collect())
        .unwrap_or_default();
    (path.parent(), name)
}

fn join_name(parent: Option<&Path>, name: &[char]) -> PathBuf {
    let name: String = name.iter().collect();
    match parent {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Position of the extension's dot, if the name has one.
fn extension_start(name: &[char]) -> Option<usize> {
    name.iter().rposition(|c| *c == '.')
}

/// Position of the last digit of the volume number in a new-style name.
///
/// Normally the digits right before the extension; in names such as
/// `name.part1of3.rar` it is the first digit group after a dot.
fn volume_number_end(name: &[char]) -> usize {
    if name.is_empty() {
        return 0;
    }
    let mut end = name.len() - 1;
    while !name[end].is_ascii_digit() && end > 0 {
        end -= 1;
    }
    let mut num = end;
    while name[num].is_ascii_digit() && num > 0 {
        num -= 1;
    }
    while num > 0 && name[num] != '.' {
        if name[num].is_ascii_digit() {
            let dot = name.iter().position(|c| *c == '.');
            if matches!(dot, Some(dot) if dot < num) {
                end = num;
            }
            break;
        }
        num -= 1;
    }
    end
}

/// The name of the volume following `path`.
pub fn next_volume_name(path: &Path, scheme: NumberingScheme) -> PathBuf {
    let (parent, mut name) = split_name(path);

    let ext = match extension_start(&name) {
        None => {
            name.extend(".rar".chars());
            name.len() - 4
        }
        Some(dot) => {
            let ext: String = name[dot..].iter().collect::<String>().to_ascii_lowercase();
            if ext == "." || ext == ".exe" || ext == ".sfx" {
                name.truncate(dot);
                name.extend(".rar".chars());
            }
            dot
        }
    };

    match scheme {
        NumberingScheme::New => {
            let mut pos = volume_number_end(&name);
            loop {
                if name[pos] == '9' {
                    name[pos] = '0';
                    if pos == 0 || !name[pos - 1].is_ascii_digit() {
                        name.insert(pos, '1');
                        break;
                    }
                    pos -= 1;
                } else {
                    name[pos] = char::from_u32(name[pos] as u32 + 1).unwrap_or('0');
                    break;
                }
            }
        }
        NumberingScheme::Old => {
            let digits = name.len() > ext + 3 && name[ext + 2].is_ascii_digit() && name[ext + 3].is_ascii_digit();
            if !digits {
                // From .rar to .r00.
                name.truncate(ext + 2);
                name.extend("00".chars());
            } else {
                let mut pos = name.len() - 1;
                loop {
                    if name[pos] != '9' {
                        name[pos] = char::from_u32(name[pos] as u32 + 1).unwrap_or('0');
                        break;
                    }
                    if pos == 0 || name[pos - 1] == '.' {
                        // From .999 to .a00 when numbering started at .001.
                        name[pos] = 'a';
                        break;
                    }
                    name[pos] = '0';
                    pos -= 1;
                }
            }
        }
    }

    join_name(parent, &name)
}

/// The name of the first volume of the set `path` belongs to.
pub fn first_volume_name(path: &Path, scheme: NumberingScheme) -> PathBuf {
    let (parent, mut name) = split_name(path);
    match scheme {
        NumberingScheme::New => {
            let mut digit = '1';
            let mut pos = volume_number_end(&name);
            while pos > 0 {
                if name[pos].is_ascii_digit() {
                    name[pos] = digit;
                    digit = '0';
                } else if digit == '0' {
                    break;
                }
                pos -= 1;
            }
        }
        NumberingScheme::Old => {
            if let Some(dot) = extension_start(&name) {
                name.truncate(dot);
            }
            name.extend(".rar".chars());
        }
    }
    join_name(parent, &name)
}
