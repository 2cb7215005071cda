//! AES-256-GCM sealing for block payloads at rest.
//!
//! The file header carries a 12-byte nonce seed chosen once at creation.
//! Each block's nonce is derived from that seed and the page index its
//! bytes start at, so no two blocks in the same file ever reuse a nonce as
//! long as a block's start page never changes without a fresh write (which
//! it can't — [`crate::provider::StorageProvider::write_block`] always
//! reallocates pages before writing new bytes at a different offset).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use scdb_core::{Error, Result};

const NONCE_LEN: usize = 12;

/// Derives this block's nonce from the file's seed and the page index its
/// ciphertext starts at. `offset` must be page-aligned, as every block
/// start is.
fn derive_nonce(seed: &[u8; NONCE_LEN], offset: u64, page_size: u32) -> [u8; NONCE_LEN] {
    let mut nonce = *seed;
    let page_index = offset / page_size as u64;
    let counter_bytes = page_index.to_le_bytes();
    for i in 0..8 {
        nonce[4 + i] ^= counter_bytes[i];
    }
    nonce
}

/// Seals `plaintext` for storage at `offset`. The returned ciphertext is
/// `plaintext.len() + 16` bytes (the GCM authentication tag is appended).
pub fn encrypt_block(
    key: &[u8; 32],
    nonce_seed: &[u8; NONCE_LEN],
    offset: u64,
    page_size: u32,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce_bytes = derive_nonce(nonce_seed, offset, page_size);
    let nonce = Nonce::from_slice(&nonce_bytes);

    cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| Error::DecryptionFailed("AEAD seal failed".to_string()))
}

/// Opens ciphertext previously produced by [`encrypt_block`] for the same
/// `offset`. Tag mismatch (wrong key, corrupted bytes, or wrong offset)
/// surfaces as `Error::DecryptionFailed`.
pub fn decrypt_block(
    key: &[u8; 32],
    nonce_seed: &[u8; NONCE_LEN],
    offset: u64,
    page_size: u32,
    ciphertext: &[u8],
    block_name: &str,
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce_bytes = derive_nonce(nonce_seed, offset, page_size);
    let nonce = Nonce::from_slice(&nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| Error::DecryptionFailed(block_name.to_string()))
}
