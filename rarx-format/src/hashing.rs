//! Content checksums and the hashers that compute them.
//!
//! RAR 1.4 uses a 16 bit rotating sum, RAR 1.5 and later use CRC32, and
//! RAR 5.0 may store a BLAKE2sp digest instead.

use std::fmt;

/// A checksum as stored in a header, or as computed over extracted data.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum Checksum {
    #[default]
    None,
    Sum16(u16),
    Crc32(u32),
    Blake2sp([u8; 32]),
}

impl Checksum {
    pub fn is_none(&self) -> bool {
        matches!(self, Checksum::None)
    }

    /// A fresh hasher of the same kind as this checksum.
    pub fn hasher(&self) -> Box<dyn Hasher> {
        match self {
            Checksum::None => Box::new(NullHasher),
            Checksum::Sum16(_) => Box::<Sum16Hasher>::default(),
            Checksum::Crc32(_) => Box::<Crc32Hasher>::default(),
            Checksum::Blake2sp(_) => Box::<Blake2spHasher>::default(),
        }
    }

    /// Compute a checksum of the same kind over `data`.
    pub fn compute(&self, data: &[u8]) -> Checksum {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checksum::None => f.write_str("-"),
            Checksum::Sum16(v) => write!(f, "{:04x}", v),
            Checksum::Crc32(v) => write!(f, "{:08x}", v),
            Checksum::Blake2sp(v) => {
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checksum::None => f.write_str("None"),
            Checksum::Sum16(_) => write!(f, "Sum16({})", self),
            Checksum::Crc32(_) => write!(f, "Crc32({})", self),
            Checksum::Blake2sp(_) => write!(f, "Blake2sp({})", self),
        }
    }
}

/// Incremental hash over entry content.
pub trait Hasher: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Checksum;
}

struct NullHasher;

impl Hasher for NullHasher {
    fn update(&mut self, _data: &[u8]) {}

    fn finalize(self: Box<Self>) -> Checksum {
        Checksum::None
    }
}

/// The RAR 1.4 content checksum.
#[derive(Default)]
pub struct Sum16Hasher(u16);

impl Hasher for Sum16Hasher {
    fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.0 = self.0.wrapping_add(u16::from(b)).rotate_left(1);
        }
    }

    fn finalize(self: Box<Self>) -> Checksum {
        Checksum::Sum16(self.0)
    }
}

#[derive(Default)]
pub struct Crc32Hasher(crc32fast::Hasher);

impl Hasher for Crc32Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> Checksum {
        Checksum::Crc32(self.0.finalize())
    }
}

pub struct Blake2spHasher(blake2s_simd::blake2sp::State);

impl Default for Blake2spHasher {
    fn default() -> Self {
        Blake2spHasher(blake2s_simd::blake2sp::State::new())
    }
}

impl Hasher for Blake2spHasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> Checksum {
        let hash = self.0.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(hash.as_bytes());
        Checksum::Blake2sp(out)
    }
}

/// CRC32 as used for RAR 1.5 and RAR 5.0 header checksums.
#[inline]
pub(crate) fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
