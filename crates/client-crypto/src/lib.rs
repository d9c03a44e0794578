//! Client-side envelope encryption for object storage.
//!
//! Every object is encrypted under its own random AES-256-CTR content key.
//! The key and IV are wrapped by a master key (local RSA or a remote KMS)
//! and stored with the object as user metadata; the storage service only
//! ever sees ciphertext.
//!
//! [`bucket::CryptoBucket`] is the entry point: it encrypts uploads, decrypts
//! downloads (whole objects, arbitrary byte ranges, single parts) and drives
//! multipart uploads whose parts are encrypted independently.

pub mod aws;
pub mod bucket;
pub mod builder;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod master;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use bucket::{CryptoBucket, CryptoObject, MultipartUpload, ObjectHead};
pub use builder::CipherBuilder;
pub use envelope::Envelope;
