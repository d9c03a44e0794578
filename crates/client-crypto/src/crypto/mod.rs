//! Content encryption primitives: per-object key material and the AES-CTR
//! content cipher.
//!
//! This module is free of AWS, transport and master-key dependencies.
//!
//! # Keystream layout
//!
//! ```text
//! iv = <8 random bytes> || <8-byte big-endian counter>
//! keystream block n = AES-256(key, iv + n)
//! ```
//!
//! Byte offset `o` lives in block `o / 16`, so a reader for a range starting
//! at `o` is a clone whose counter was advanced by `o / 16`.

pub mod cipher;
pub mod cipher_data;

pub use cipher::{ContentCipher, CryptoReader};
pub use cipher_data::{CipherData, IV_LEN, KEY_LEN};
