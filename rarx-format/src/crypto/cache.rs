use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use lru::LruCache;
use parking_lot::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::kdf::{derive_rar30, derive_rar50};
use super::{Kdf, KeyMaterial, Password};

pub const DEFAULT_CAPACITY: usize = 4;

#[derive(Clone, PartialEq, Eq, Hash, Zeroize, ZeroizeOnDrop)]
struct CacheKey {
    #[zeroize(skip)]
    kdf: Kdf,
    password: Vec<u8>,
    salt: Option<Vec<u8>>,
}

/// A bounded cache of derived keys.
///
/// Deriving a key takes hundreds of thousands of hash rounds, and an
/// archive encrypted with one password derives the same key for every
/// header and entry. Results are identical with or without the cache.
pub struct KeyCache {
    slots: Mutex<LruCache<CacheKey, KeyMaterial>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for KeyCache {
    fn default() -> Self {
        KeyCache::new()
    }
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("len", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

impl KeyCache {
    pub fn new() -> KeyCache {
        KeyCache::with_capacity(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> KeyCache {
        KeyCache {
            slots: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The process wide cache, for callers that do not bring their own.
    pub fn shared() -> Arc<KeyCache> {
        static SHARED: OnceLock<Arc<KeyCache>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(KeyCache::new())).clone()
    }

    /// Key material for `password` and `salt` under `kdf`, derived at most
    /// once while it stays cached.
    ///
    /// The lock is held while deriving, so concurrent callers asking for the
    /// same key wait for the first derivation instead of repeating it.
    pub fn derive_key(&self, password: &Password, salt: Option<&[u8]>, kdf: Kdf) -> KeyMaterial {
        let key = CacheKey {
            kdf,
            password: password.as_bytes().to_vec(),
            salt: salt.map(<[u8]>::to_vec),
        };

        let mut slots = self.slots.lock();
        if let Some(material) = slots.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(?kdf, "key cache hit");
            return material.clone();
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(?kdf, salted = salt.is_some(), "deriving key");
        let material = match kdf {
            Kdf::Rar30 => derive_rar30(password, salt),
            Kdf::Rar50 { lg2_count } => derive_rar50(password, salt.unwrap_or(&[]), lg2_count),
        };

        // Evicted entries are wiped as they drop.
        if slots.push(key, material.clone()).is_some() {
            tracing::trace!("key cache slot evicted");
        }
        material
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: Kdf = Kdf::Rar50 { lg2_count: 2 };

    #[test]
    fn hit_returns_same_material() {
        let cache = KeyCache::new();
        let pw = Password::new("pw");
        let a = cache.derive_key(&pw, Some(&[1; 16]), FAST);
        let b = cache.derive_key(&pw, Some(&[1; 16]), FAST);
        assert_eq!(a, b);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn results_do_not_depend_on_cache_contents() {
        let isolated = KeyCache::with_capacity(NonZeroUsize::new(1).unwrap());
        let busy = KeyCache::with_capacity(NonZeroUsize::new(2).unwrap());
        let pw = Password::new("pw");

        let expected = isolated.derive_key(&pw, Some(&[7; 16]), FAST);
        for salt in 0..5u8 {
            busy.derive_key(&pw, Some(&[salt; 16]), FAST);
            busy.derive_key(&Password::new("other"), Some(&[7; 16]), FAST);
            assert_eq!(busy.derive_key(&pw, Some(&[7; 16]), FAST), expected);
        }
        assert!(busy.len() <= 2);
        assert!(busy.misses() > 2, "entries were evicted and derived again");
    }

    #[test]
    fn salt_presence_is_part_of_the_key() {
        let cache = KeyCache::new();
        let pw = Password::new("pw");
        let none = cache.derive_key(&pw, None, FAST);
        let empty = cache.derive_key(&pw, Some(&[]), FAST);
        assert_eq!(cache.misses(), 2);
        // Same derivation input, but cached separately.
        assert_eq!(none, empty);
    }

    #[test]
    fn concurrent_callers_derive_once() {
        let cache = Arc::new(KeyCache::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.derive_key(&Password::new("pw"), Some(&[3; 16]), FAST))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 3);
    }
}
