use aes::{Aes128, Aes256};
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};

const AES_BLOCK: usize = 16;

/// A block cipher in a chaining mode, decrypting in place.
pub trait BlockCipher: Send {
    fn block_size(&self) -> usize {
        AES_BLOCK
    }

    /// Decrypt `data`, whose length must be a multiple of the block size.
    /// Any trailing partial block is left untouched.
    fn decrypt_blocks(&mut self, data: &mut [u8]);
}

pub struct Aes128Cbc(cbc::Decryptor<Aes128>);

impl Aes128Cbc {
    pub fn new(key: &[u8], iv: &[u8; 16]) -> Aes128Cbc {
        Aes128Cbc(cbc::Decryptor::new(
            GenericArray::from_slice(&key[..16]),
            GenericArray::from_slice(iv),
        ))
    }
}

impl BlockCipher for Aes128Cbc {
    fn decrypt_blocks(&mut self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(AES_BLOCK) {
            self.0.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }
}

pub struct Aes256Cbc(cbc::Decryptor<Aes256>);

impl Aes256Cbc {
    pub fn new(key: &[u8], iv: &[u8; 16]) -> Aes256Cbc {
        Aes256Cbc(cbc::Decryptor::new(
            GenericArray::from_slice(&key[..32]),
            GenericArray::from_slice(iv),
        ))
    }
}

impl BlockCipher for Aes256Cbc {
    fn decrypt_blocks(&mut self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(AES_BLOCK) {
            self.0.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }
}
