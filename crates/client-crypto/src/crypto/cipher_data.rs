//! [`CipherData`]: per-object key material and IV counter arithmetic.

use common::CryptoError;
use rand::{rngs::OsRng, RngCore};

/// Byte length of the AES-256 content key.
pub const KEY_LEN: usize = 32;

/// Byte length of the AES-CTR IV.
pub const IV_LEN: usize = 16;

/// Trailing IV bytes that hold the big-endian block counter.
const COUNTER_LEN: usize = 8;

/// Key material for one object (or one multipart session).
///
/// `key` and `iv` are plaintext and never leave the process; only
/// `wrapped_key` / `wrapped_iv` are persisted. Cloning copies every buffer,
/// so a clone can be seeked without touching the original.
#[derive(Clone)]
pub struct CipherData {
    /// Plaintext content key.
    pub key: Vec<u8>,
    /// Plaintext IV; the last 8 bytes are a big-endian counter.
    pub iv: Vec<u8>,
    /// Descriptor of the master key that wrapped `key` and `iv`.
    pub material_descriptor: String,
    /// Tag of the algorithm used to wrap `key` and `iv`.
    pub wrap_algorithm: String,
    /// Tag of the content cipher.
    pub content_algorithm: String,
    /// `key` encrypted under the master key.
    pub wrapped_key: Vec<u8>,
    /// `iv` encrypted under the master key.
    pub wrapped_iv: Vec<u8>,
}

impl CipherData {
    /// Draw a fresh random key and IV.
    ///
    /// The counter starts at a random 32-bit value, leaving the upper half of
    /// the 64-bit counter as headroom for seeking.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidConfig`] if `iv_len` cannot hold the counter.
    pub fn random_key_iv(key_len: usize, iv_len: usize) -> Result<Self, CryptoError> {
        if iv_len < COUNTER_LEN {
            return Err(CryptoError::InvalidConfig(format!(
                "IV length {iv_len} is shorter than the {COUNTER_LEN}-byte counter"
            )));
        }
        let mut key = vec![0u8; key_len];
        let mut iv = vec![0u8; iv_len];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);

        let mut cd = Self::from_key_iv(key, iv);
        cd.set_counter(u64::from(OsRng.next_u32()));
        Ok(cd)
    }

    /// Build from already-unwrapped key and IV.
    pub fn from_key_iv(key: Vec<u8>, iv: Vec<u8>) -> Self {
        Self {
            key,
            iv,
            material_descriptor: String::new(),
            wrap_algorithm: String::new(),
            content_algorithm: String::new(),
            wrapped_key: Vec::new(),
            wrapped_iv: Vec::new(),
        }
    }

    /// Read the big-endian counter from the trailing IV bytes.
    pub fn counter(&self) -> u64 {
        let start = self.iv.len().saturating_sub(COUNTER_LEN);
        let mut buf = [0u8; COUNTER_LEN];
        let tail = &self.iv[start..];
        buf[COUNTER_LEN - tail.len()..].copy_from_slice(tail);
        u64::from_be_bytes(buf)
    }

    /// Overwrite the trailing IV bytes with `value`, big-endian.
    pub fn set_counter(&mut self, value: u64) {
        if self.iv.len() < COUNTER_LEN {
            return;
        }
        let start = self.iv.len() - COUNTER_LEN;
        self.iv[start..].copy_from_slice(&value.to_be_bytes());
    }

    /// Advance the counter to cover `offset` bytes of keystream.
    ///
    /// Only whole IV-length blocks are skipped; callers align `offset` first.
    pub fn seek(&mut self, offset: u64) {
        if self.iv.is_empty() {
            return;
        }
        let blocks = offset / self.iv.len() as u64;
        self.set_counter(self.counter().wrapping_add(blocks));
    }
}

impl Drop for CipherData {
    fn drop(&mut self) {
        self.key.iter_mut().for_each(|b| *b = 0);
        self.iv.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for CipherData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Plaintext key and IV are never printed.
        f.debug_struct("CipherData")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .field("material_descriptor", &self.material_descriptor)
            .field("wrap_algorithm", &self.wrap_algorithm)
            .field("content_algorithm", &self.content_algorithm)
            .field("wrapped_key_len", &self.wrapped_key.len())
            .field("wrapped_iv_len", &self.wrapped_iv.len())
            .finish()
    }
}
