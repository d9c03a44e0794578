//! [`KmsMasterKey`]: wraps content keys through a remote key-management service.
//!
//! Plaintext crosses the wire base64-encoded in both directions; the opaque
//! ciphertext blob the service returns is stored as the wrapped value.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_kms::{error::DisplayErrorContext, primitives::Blob};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{protocol::KMS_WRAP_PREFIX, CryptoError};

use super::MasterKeyProvider;

/// Remote key-management calls used by [`KmsMasterKey`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Short provider name; the wrap tag becomes `KMS/<provider>`.
    fn provider(&self) -> String;

    /// Encrypt base64 `plaintext` under `key_id`, returning an opaque blob.
    async fn encrypt(&self, key_id: &str, plaintext: &str) -> Result<String, CryptoError>;

    /// Decrypt a blob from [`encrypt`](Self::encrypt), returning base64 plaintext.
    async fn decrypt(&self, key_id: &str, ciphertext_blob: &str) -> Result<String, CryptoError>;
}

/// Master key held by a remote KMS.
pub struct KmsMasterKey {
    key_id: String,
    client: Arc<dyn KmsClient>,
    material_descriptor: String,
    wrap_algorithm: String,
}

impl KmsMasterKey {
    /// Bind a remote key to a client handle.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidConfig`] if `key_id` is empty or no client
    /// handle is supplied.
    pub fn new(
        material_descriptor: impl Into<String>,
        key_id: impl Into<String>,
        client: Option<Arc<dyn KmsClient>>,
    ) -> Result<Self, CryptoError> {
        let key_id = key_id.into();
        if key_id.trim().is_empty() {
            return Err(CryptoError::InvalidConfig("KMS key id is empty".into()));
        }
        let client = client
            .ok_or_else(|| CryptoError::InvalidConfig("no KMS client configured".into()))?;
        let wrap_algorithm = format!("{KMS_WRAP_PREFIX}{}", client.provider());
        Ok(Self {
            key_id,
            client,
            material_descriptor: material_descriptor.into(),
            wrap_algorithm,
        })
    }

    /// Remote key identifier.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl std::fmt::Debug for KmsMasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsMasterKey")
            .field("key_id", &self.key_id)
            .field("material_descriptor", &self.material_descriptor)
            .field("wrap_algorithm", &self.wrap_algorithm)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MasterKeyProvider for KmsMasterKey {
    async fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let blob = self
            .client
            .encrypt(&self.key_id, &STANDARD.encode(plaintext))
            .await?;
        Ok(blob.into_bytes())
    }

    async fn unwrap(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let blob = std::str::from_utf8(ciphertext).map_err(|_| CryptoError::KeyWrap {
            operation: "kms unwrap",
            reason: "wrapped value is not a KMS ciphertext blob".into(),
        })?;
        let plaintext = self.client.decrypt(&self.key_id, blob).await?;
        STANDARD
            .decode(plaintext.as_bytes())
            .map_err(|e| CryptoError::KeyWrap {
                operation: "kms unwrap",
                reason: format!("KMS returned invalid base64 plaintext: {e}"),
            })
    }

    fn wrap_algorithm(&self) -> &str {
        &self.wrap_algorithm
    }

    fn material_descriptor(&self) -> &str {
        &self.material_descriptor
    }
}

// ---------------------------------------------------------------------------
// AWS KMS
// ---------------------------------------------------------------------------

/// [`KmsClient`] backed by AWS KMS.
///
/// Ciphertext blobs are binary in AWS; they are carried as base64 text.
#[derive(Clone, Debug)]
pub struct AwsKmsClient {
    kms: aws_sdk_kms::Client,
}

impl AwsKmsClient {
    /// Wrap an SDK client.
    pub fn new(kms: aws_sdk_kms::Client) -> Self {
        Self { kms }
    }
}

#[async_trait]
impl KmsClient for AwsKmsClient {
    fn provider(&self) -> String {
        "AWS".into()
    }

    async fn encrypt(&self, key_id: &str, plaintext: &str) -> Result<String, CryptoError> {
        let resp = self
            .kms
            .encrypt()
            .key_id(key_id)
            .plaintext(Blob::new(plaintext.as_bytes()))
            .send()
            .await
            .map_err(|e| CryptoError::KeyWrap {
                operation: "kms encrypt",
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        let blob = resp.ciphertext_blob().ok_or_else(|| CryptoError::KeyWrap {
            operation: "kms encrypt",
            reason: "KMS encrypt response contained no ciphertext".into(),
        })?;
        Ok(STANDARD.encode(blob.as_ref()))
    }

    async fn decrypt(&self, key_id: &str, ciphertext_blob: &str) -> Result<String, CryptoError> {
        let raw = STANDARD
            .decode(ciphertext_blob)
            .map_err(|e| CryptoError::KeyWrap {
                operation: "kms decrypt",
                reason: format!("ciphertext blob is not base64: {e}"),
            })?;
        let resp = self
            .kms
            .decrypt()
            .key_id(key_id)
            .ciphertext_blob(Blob::new(raw))
            .send()
            .await
            .map_err(|e| CryptoError::KeyWrap {
                operation: "kms decrypt",
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        let plaintext = resp.plaintext().ok_or_else(|| CryptoError::KeyWrap {
            operation: "kms decrypt",
            reason: "KMS decrypt response contained no plaintext".into(),
        })?;
        String::from_utf8(plaintext.as_ref().to_vec()).map_err(|_| CryptoError::KeyWrap {
            operation: "kms decrypt",
            reason: "KMS plaintext is not base64 text".into(),
        })
    }
}
