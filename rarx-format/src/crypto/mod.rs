mod cache;
mod cipher;
mod kdf;

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

pub use self::cache::KeyCache;
pub use self::cipher::{Aes128Cbc, Aes256Cbc, BlockCipher};
pub(crate) use self::kdf::{check_password, mac_checksum};
pub use self::kdf::RAR50_MAX_LG2_COUNT;

/// A password, wiped from memory when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Password {
        Password(password.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// UTF-16LE, as the RAR 2.9 key derivation consumes it.
    pub(crate) fn to_utf16le(&self) -> Vec<u8> {
        self.0.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        Password::new(s)
    }
}

impl From<String> for Password {
    fn from(s: String) -> Self {
        Password(s)
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Key derivation function, with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kdf {
    /// Iterated SHA-1 over password and salt (RAR 2.9 to 4.x).
    Rar30,
    /// PBKDF2-HMAC-SHA256 with `1 << lg2_count` iterations (RAR 5.0).
    Rar50 { lg2_count: u8 },
}

/// Key material derived from a password and salt.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: [u8; 32],
    key_len: usize,
    iv: [u8; 16],
    hash_key: [u8; 32],
    password_check: [u8; 8],
}

impl KeyMaterial {
    /// The cipher key: 16 bytes for RAR 2.9, 32 bytes for RAR 5.0.
    pub fn key(&self) -> &[u8] {
        &self.key[..self.key_len]
    }

    /// The derived IV. Only RAR 2.9 derives one; RAR 5.0 stores its IVs.
    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    /// Key for turning content checksums into MACs (RAR 5.0).
    pub fn hash_key(&self) -> &[u8; 32] {
        &self.hash_key
    }

    /// Value compared against the password check stored by RAR 5.0.
    pub fn password_check(&self) -> &[u8; 8] {
        &self.password_check
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_len", &self.key_len)
            .finish_non_exhaustive()
    }
}

/// How the data of one entry is encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryEncryption {
    /// AES-128, key and IV derived from the password and an optional 8-byte salt.
    Rar30 { salt: Option<[u8; 8]> },
    /// AES-256 with a stored IV.
    Rar50 {
        lg2_count: u8,
        salt: [u8; 16],
        iv: [u8; 16],
        /// Password check value and its checksum, when stored.
        check: Option<[u8; 12]>,
        /// Checksums are stored as MACs keyed by the password.
        use_mac: bool,
    },
    /// The RAR 1.3, 1.5 and 2.0 ciphers. Recognized, not supported.
    Legacy { version: u8 },
}

impl EntryEncryption {
    pub fn kdf(&self) -> Option<Kdf> {
        match self {
            EntryEncryption::Rar30 { .. } => Some(Kdf::Rar30),
            EntryEncryption::Rar50 { lg2_count, .. } => Some(Kdf::Rar50 {
                lg2_count: *lg2_count,
            }),
            EntryEncryption::Legacy { .. } => None,
        }
    }

    pub fn salt(&self) -> Option<&[u8]> {
        match self {
            EntryEncryption::Rar30 { salt } => salt.as_ref().map(|s| &s[..]),
            EntryEncryption::Rar50 { salt, .. } => Some(&salt[..]),
            EntryEncryption::Legacy { .. } => None,
        }
    }

    pub(crate) fn uses_mac(&self) -> bool {
        matches!(self, EntryEncryption::Rar50 { use_mac: true, .. })
    }

    /// A cipher positioned at the start of the entry's packed data.
    pub(crate) fn data_cipher(&self, material: &KeyMaterial) -> Option<Box<dyn BlockCipher>> {
        match self {
            EntryEncryption::Rar30 { .. } => {
                Some(Box::new(Aes128Cbc::new(material.key(), material.iv())))
            }
            EntryEncryption::Rar50 { iv, .. } => Some(Box::new(Aes256Cbc::new(material.key(), iv))),
            EntryEncryption::Legacy { .. } => None,
        }
    }
}

impl fmt::Display for EntryEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryEncryption::Rar30 { .. } => f.write_str("AES-128"),
            EntryEncryption::Rar50 { .. } => f.write_str("AES-256"),
            EntryEncryption::Legacy { version } => write!(f, "RAR {}.{} cipher", version / 10, version % 10),
        }
    }
}
