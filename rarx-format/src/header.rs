use std::fmt;

use crate::volume::NumberingScheme;

/// The header generation of an archive, identified by its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// RAR 1.4, `RE~^`.
    Legacy14,
    /// RAR 1.5 to 4.x, `Rar!\x1a\x07\x00`.
    Legacy15,
    /// RAR 5.0 and later, `Rar!\x1a\x07\x01\x00`.
    Modern50,
    /// `Rar!\x1a\x07` followed by a version byte newer than 5.0.
    FutureUnknown,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Format::Legacy14 => "RAR 1.4",
            Format::Legacy15 => "RAR 1.5",
            Format::Modern50 => "RAR 5.0",
            Format::FutureUnknown => "RAR (unknown future version)",
        };
        f.write_str(s)
    }
}

pub(crate) const MAGIC_14: &[u8; 4] = b"RE~^";
pub(crate) const MAGIC_15: &[u8; 7] = b"Rar!\x1a\x07\x00";
pub(crate) const MAGIC_50: &[u8; 8] = b"Rar!\x1a\x07\x01\x00";
const MAGIC_PREFIX: &[u8; 6] = b"Rar!\x1a\x07";

/// How far into a file a signature is searched for, so that archives
/// prefixed with a self-extracting module still open.
pub const MAX_SFX_SIZE: usize = 0x100000;

/// A signature found in a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub format: Format,
    /// Offset of the signature in the volume (non-zero for self-extracting archives).
    pub offset: u64,
    /// Length of the signature in bytes.
    pub len: usize,
}

impl Signature {
    /// Match a signature at `offset` in `data`.
    pub fn at(data: &[u8], offset: usize) -> Option<Signature> {
        let tail = data.get(offset..)?;
        let (format, len) = if tail.starts_with(MAGIC_50) {
            (Format::Modern50, MAGIC_50.len())
        } else if tail.starts_with(MAGIC_15) {
            (Format::Legacy15, MAGIC_15.len())
        } else if tail.starts_with(MAGIC_PREFIX) && tail.len() > 6 && (2..5).contains(&tail[6]) {
            (Format::FutureUnknown, 7)
        } else if offset == 0 && tail.starts_with(MAGIC_14) {
            // The 1.4 signature is the start of the main header itself, so
            // it has no length of its own.
            (Format::Legacy14, 0)
        } else {
            return None;
        };

        Some(Signature {
            format,
            offset: offset as u64,
            len,
        })
    }

    /// Scan the first `limit` bytes of `data` for a signature.
    pub fn find(data: &[u8], limit: usize) -> Option<Signature> {
        let end = data.len().min(limit);
        (0..end)
            .filter(|&i| data[i] == b'R')
            .find_map(|i| Signature::at(data, i))
    }

    /// Position of the first block after the signature.
    pub fn first_block(&self) -> u64 {
        self.offset + self.len as u64
    }
}

/// Archive-wide properties, fixed once the main header of the first volume is read.
#[derive(Debug, Clone)]
pub struct Archive {
    pub format: Format,
    pub is_encrypted_headers: bool,
    /// Salt of the header encryption, when the format stores a single one.
    pub salt: Option<Vec<u8>>,
    pub is_solid: bool,
    pub is_locked: bool,
    pub is_volume: bool,
    pub is_first_volume: bool,
    pub numbering: NumberingScheme,
    pub has_recovery_record: bool,
    pub has_comment: bool,
    /// Volume number stored in the main header, if any.
    pub volume_number: Option<u64>,
    /// Length of a self-extracting module in front of the first volume.
    pub sfx_offset: u64,
}

impl Archive {
    pub(crate) fn new(signature: Signature) -> Archive {
        Archive {
            format: signature.format,
            is_encrypted_headers: false,
            salt: None,
            is_solid: false,
            is_locked: false,
            is_volume: false,
            is_first_volume: true,
            numbering: match signature.format {
                Format::Legacy14 | Format::Legacy15 => NumberingScheme::Old,
                Format::Modern50 | Format::FutureUnknown => NumberingScheme::New,
            },
            has_recovery_record: false,
            has_comment: false,
            volume_number: None,
            sfx_offset: signature.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_each_generation() {
        assert_eq!(Signature::at(b"RE~^\x07\x00\x00", 0).unwrap().format, Format::Legacy14);
        assert_eq!(
            Signature::at(b"Rar!\x1a\x07\x00\xcf\x90", 0).unwrap().format,
            Format::Legacy15
        );
        let sig = Signature::at(b"Rar!\x1a\x07\x01\x00\x33", 0).unwrap();
        assert_eq!(sig.format, Format::Modern50);
        assert_eq!(sig.first_block(), 8);
    }

    #[test]
    fn future_version_is_not_guessed() {
        let sig = Signature::at(b"Rar!\x1a\x07\x02\x00", 0).unwrap();
        assert_eq!(sig.format, Format::FutureUnknown);
        assert!(Signature::at(b"Rar!\x1a\x07\x09\x00", 0).is_none());
        assert!(Signature::at(b"PK\x03\x04", 0).is_none());
    }

    #[test]
    fn finds_signature_after_sfx_stub() {
        let mut data = vec![0x4d, 0x5a];
        data.extend(std::iter::repeat(b'R').take(100));
        data.extend_from_slice(MAGIC_50);
        let sig = Signature::find(&data, MAX_SFX_SIZE).unwrap();
        assert_eq!(sig.offset, 102);
        assert_eq!(sig.format, Format::Modern50);

        // 1.4 archives cannot carry a stub.
        let mut data = vec![0u8; 10];
        data.extend_from_slice(MAGIC_14);
        assert!(Signature::find(&data, MAX_SFX_SIZE).is_none());
    }
}
