//! Master keys: wrap and unwrap per-object content keys.
//!
//! # Back-ends
//!
//! - [`RsaMasterKey`]: PKCS#1 v1.5 encryption under a local RSA key pair.
//! - [`KmsMasterKey`]: delegated to a remote key-management service through
//!   the [`KmsClient`] seam.
//!
//! Any other back-end plugs in by implementing [`MasterKeyProvider`]. The
//! wrap algorithm tag it reports is persisted in every envelope it produces,
//! and [`DirectoryResolver`] uses that tag to rebuild a matching provider on
//! download.

pub mod directory;
pub mod kms;
pub mod rsa;

pub use directory::{DirectoryResolver, KeyDirectory, MasterKeyResolver, StaticKeyDirectory};
pub use kms::{AwsKmsClient, KmsClient, KmsMasterKey};
pub use self::rsa::RsaMasterKey;

use std::collections::BTreeMap;

use async_trait::async_trait;
use common::CryptoError;

/// Capability that wraps content keys under an external trust anchor.
#[async_trait]
pub trait MasterKeyProvider: Send + Sync {
    /// Encrypt a short secret (content key or IV).
    async fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt a secret produced by [`wrap`](Self::wrap).
    async fn unwrap(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Tag persisted as the envelope's wrap algorithm.
    fn wrap_algorithm(&self) -> &str;

    /// Descriptor persisted as the envelope's material descriptor.
    fn material_descriptor(&self) -> &str;
}

/// Canonical material descriptor text for a set of key/value labels.
///
/// Keys are emitted in sorted order so independent clients produce identical
/// strings for identical labels. An empty map yields an empty descriptor.
pub fn material_descriptor(labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }
    // A map of strings always serialises.
    serde_json::to_string(labels).unwrap_or_default()
}
