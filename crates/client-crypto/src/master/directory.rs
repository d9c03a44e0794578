//! Resolution of foreign master keys by material descriptor.
//!
//! When an object was written under a descriptor other than the client's
//! own, a [`MasterKeyResolver`] supplies the provider that can open it. The
//! default [`DirectoryResolver`] looks the descriptor up in a
//! [`KeyDirectory`] and builds an RSA or KMS provider according to the
//! envelope's wrap algorithm tag.

use std::{collections::BTreeMap, collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use common::{
    protocol::{KMS_WRAP_PREFIX, RSA_WRAP_ALGORITHM},
    CryptoError,
};
use serde::Deserialize;
use tracing::debug;

use super::{material_descriptor, KmsClient, KmsMasterKey, MasterKeyProvider, RsaMasterKey};
use crate::envelope::Envelope;

/// Directory of master key material keyed by material descriptor.
///
/// RSA entries hold `[public_pem, private_pem]`; KMS entries hold `[key_id]`.
pub trait KeyDirectory: Send + Sync {
    /// Key material registered for `descriptor`, if any.
    fn master_keys(&self, descriptor: &str) -> Option<Vec<String>>;
}

/// In-memory [`KeyDirectory`].
///
/// Backed by [`ArcSwap`] so lookups never block and the whole directory can
/// be replaced atomically.
#[derive(Clone, Debug)]
pub struct StaticKeyDirectory {
    inner: Arc<ArcSwap<HashMap<String, Vec<String>>>>,
}

/// One entry of the JSON directory format.
#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    descriptor: DescriptorSource,
    keys: Vec<String>,
}

/// A descriptor given either as labels or as literal descriptor text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DescriptorSource {
    Labels(BTreeMap<String, String>),
    Raw(String),
}

impl StaticKeyDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(Arc::new(HashMap::new()))),
        }
    }

    /// Parse a JSON array of `{"descriptor": ..., "keys": [...]}` entries.
    ///
    /// `descriptor` is either an object of string labels (canonicalised with
    /// [`material_descriptor`]) or the literal descriptor string.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidConfig`] if the text is not valid directory JSON.
    pub fn from_json(text: &str) -> Result<Self, CryptoError> {
        let entries: Vec<DirectoryEntry> = serde_json::from_str(text)
            .map_err(|e| CryptoError::InvalidConfig(format!("invalid key directory: {e}")))?;
        let map = entries
            .into_iter()
            .map(|entry| {
                let descriptor = match entry.descriptor {
                    DescriptorSource::Labels(labels) => material_descriptor(&labels),
                    DescriptorSource::Raw(raw) => raw,
                };
                (descriptor, entry.keys)
            })
            .collect();
        let dir = Self::new();
        dir.replace_all(map);
        Ok(dir)
    }

    /// Register (or replace) the key material for one descriptor.
    pub fn insert(&self, descriptor: impl Into<String>, keys: Vec<String>) {
        let descriptor = descriptor.into();
        self.inner.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(descriptor.clone(), keys.clone());
            next
        });
    }

    /// Atomically replace the whole directory.
    pub fn replace_all(&self, entries: HashMap<String, Vec<String>>) {
        self.inner.store(Arc::new(entries));
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }
}

impl Default for StaticKeyDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyDirectory for StaticKeyDirectory {
    fn master_keys(&self, descriptor: &str) -> Option<Vec<String>> {
        self.inner.load().get(descriptor).cloned()
    }
}

/// Supplies a master key provider able to open a given envelope.
#[async_trait]
pub trait MasterKeyResolver: Send + Sync {
    /// Build the provider for `envelope`'s descriptor and wrap algorithm.
    async fn resolve(&self, envelope: &Envelope)
        -> Result<Arc<dyn MasterKeyProvider>, CryptoError>;
}

/// [`MasterKeyResolver`] backed by a [`KeyDirectory`].
pub struct DirectoryResolver {
    directory: Arc<dyn KeyDirectory>,
    kms: Option<Arc<dyn KmsClient>>,
}

impl DirectoryResolver {
    /// Resolve through `directory`; KMS envelopes additionally need `kms`.
    pub fn new(directory: Arc<dyn KeyDirectory>, kms: Option<Arc<dyn KmsClient>>) -> Self {
        Self { directory, kms }
    }

    fn lookup(&self, descriptor: &str, wanted: usize, kind: &str) -> Result<Vec<String>, CryptoError> {
        let keys = self
            .directory
            .master_keys(descriptor)
            .ok_or_else(|| cannot_decrypt(descriptor, "no master key registered for descriptor"))?;
        if keys.len() != wanted {
            return Err(cannot_decrypt(
                descriptor,
                format!("{kind} master key needs {wanted} key entries, found {}", keys.len()),
            ));
        }
        Ok(keys)
    }
}

#[async_trait]
impl MasterKeyResolver for DirectoryResolver {
    async fn resolve(
        &self,
        envelope: &Envelope,
    ) -> Result<Arc<dyn MasterKeyProvider>, CryptoError> {
        let descriptor = envelope.material_descriptor.as_str();
        let tag = envelope.wrap_algorithm.as_str();
        debug!(descriptor, wrap_algorithm = tag, "resolving foreign master key");

        if tag == RSA_WRAP_ALGORITHM {
            let keys = self.lookup(descriptor, 2, "RSA")?;
            let key = RsaMasterKey::from_pem(descriptor, &keys[0], &keys[1])
                .map_err(|e| cannot_decrypt(descriptor, e.to_string()))?;
            return Ok(Arc::new(key));
        }

        if tag.starts_with(KMS_WRAP_PREFIX) {
            let client = self
                .kms
                .clone()
                .ok_or_else(|| cannot_decrypt(descriptor, "no KMS client configured"))?;
            let keys = self.lookup(descriptor, 1, "KMS")?;
            let key = KmsMasterKey::new(descriptor, keys[0].clone(), Some(client))
                .map_err(|e| cannot_decrypt(descriptor, e.to_string()))?;
            if key.wrap_algorithm() != tag {
                return Err(CryptoError::unsupported_wrap(tag));
            }
            return Ok(Arc::new(key));
        }

        Err(CryptoError::unsupported_wrap(tag))
    }
}

fn cannot_decrypt(descriptor: &str, reason: impl Into<String>) -> CryptoError {
    CryptoError::CannotDecrypt {
        descriptor: descriptor.to_owned(),
        reason: reason.into(),
    }
}
