//! [`CryptoBucket`]: the encrypting facade over an [`ObjectTransport`].
//!
//! Uploads mint a fresh content cipher per object (or per multipart
//! session), wrap the body in an encrypting reader and attach the
//! [`Envelope`] as user metadata. Downloads read the envelope back, pick the
//! master key that can open it, and wrap the body in a decrypting reader.
//! Objects without an envelope pass through untouched.
//!
//! # Master key selection on download
//!
//! 1. Envelope descriptor equals this bucket's own: own master key.
//! 2. Envelope descriptor is empty: own master key with a warning, or a
//!    "cannot decrypt" error when strict descriptor matching is on.
//! 3. Otherwise: the configured [`MasterKeyResolver`]; without one the
//!    object cannot be decrypted.

pub mod multipart;
pub mod range;

pub use multipart::{MultipartUpload, PartCryptoContext};
pub use range::DiscardReader;

use std::{path::Path, sync::Arc};

use common::{
    protocol::{ByteRange, ObjectAttributes},
    CryptoError, TransportError,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::builder::CipherBuilder;
use crate::crypto::ContentCipher;
use crate::envelope::Envelope;
use crate::master::{MasterKeyProvider, MasterKeyResolver};
use crate::transport::{ByteReader, ObjectTransport};

/// A downloaded object: plaintext body plus plaintext-facing attributes.
pub struct CryptoObject {
    /// Decrypted body (or the raw body of an unencrypted object).
    pub body: ByteReader,
    /// Stored attributes with content length and MD5 describing the
    /// plaintext where known.
    pub attributes: ObjectAttributes,
    /// The object's envelope, if it was encrypted.
    pub envelope: Option<Envelope>,
}

impl std::fmt::Debug for CryptoObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoObject")
            .field("attributes", &self.attributes)
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}

/// Attributes of a stored object, without its body.
#[derive(Debug, Clone)]
pub struct ObjectHead {
    pub attributes: ObjectAttributes,
    pub envelope: Option<Envelope>,
}

/// Client-side encrypting view of one bucket.
#[derive(Clone)]
pub struct CryptoBucket {
    transport: Arc<dyn ObjectTransport>,
    builder: CipherBuilder,
    resolver: Option<Arc<dyn MasterKeyResolver>>,
    strict_descriptor: bool,
}

impl CryptoBucket {
    /// Encrypt uploads under `master` and send them through `transport`.
    pub fn new(transport: Arc<dyn ObjectTransport>, master: Arc<dyn MasterKeyProvider>) -> Self {
        Self {
            transport,
            builder: CipherBuilder::new(master),
            resolver: None,
            strict_descriptor: false,
        }
    }

    /// Resolve foreign material descriptors through `resolver`.
    pub fn with_resolver(mut self, resolver: Arc<dyn MasterKeyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Refuse to open envelopes with an empty material descriptor unless the
    /// bucket's own descriptor is empty too.
    pub fn strict_material_descriptor(mut self, strict: bool) -> Self {
        self.strict_descriptor = strict;
        self
    }

    /// Encrypt and store `body` under `key`.
    ///
    /// `attributes.content_length` and `attributes.content_md5` describe the
    /// plaintext; they are recorded in the envelope, and the MD5 is not sent
    /// as the transport-level digest since the stored bytes differ.
    ///
    /// # Errors
    ///
    /// Master key wrap failures and transport errors.
    pub async fn put_object(
        &self,
        key: &str,
        body: ByteReader,
        mut attributes: ObjectAttributes,
    ) -> Result<Envelope, CryptoError> {
        let cipher = self.builder.new_for_upload().await?;

        let mut envelope = Envelope::from_cipher_data(cipher.cipher_data());
        envelope.unencrypted_content_length = attributes.content_length;
        envelope.unencrypted_content_md5 = attributes.content_md5.take();
        envelope.write_metadata(&mut attributes.metadata);
        attributes.content_length = attributes.content_length.map(|n| cipher.encrypted_len(n));

        let encrypted: ByteReader = Box::pin(cipher.encrypt_content(body));
        self.transport.put_object(key, encrypted, attributes).await?;
        info!(
            key,
            wrap_algorithm = %envelope.wrap_algorithm,
            content_length = ?envelope.unencrypted_content_length,
            "encrypted object stored"
        );
        Ok(envelope)
    }

    /// Encrypt and store the contents of the file at `path`.
    ///
    /// # Errors
    ///
    /// Local I/O errors, plus everything [`put_object`](Self::put_object) returns.
    pub async fn put_object_from_file(
        &self,
        key: &str,
        path: impl AsRef<Path>,
        mut attributes: ObjectAttributes,
    ) -> Result<Envelope, CryptoError> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        attributes.content_length = Some(file.metadata().await?.len());
        self.put_object(key, Box::pin(file), attributes).await
    }

    /// Fetch and decrypt `key`, optionally restricted to `range`.
    ///
    /// Ranges may start anywhere: the request is widened down to the cipher
    /// alignment, decrypted from there and the extra leading bytes dropped.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::MalformedEnvelope`] for a partial or undecodable envelope.
    /// - [`CryptoError::CannotDecrypt`] if no master key opens the object.
    /// - [`CryptoError::UnsupportedAlgorithm`] for unknown algorithm tags.
    /// - [`CryptoError::InvalidConfig`] for a range that ends before it starts.
    /// - Transport errors, unmodified, and a transport error for a range that
    ///   starts past the end of the object.
    pub async fn get_object(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<CryptoObject, CryptoError> {
        let (request, skip) = match range {
            Some(r) if r.is_inverted() => {
                return Err(CryptoError::InvalidConfig(format!(
                    "range {} ends before it starts",
                    r.to_header()
                )));
            }
            Some(r) => {
                let (aligned, skip) = range::aligned_request(r, self.builder.align_len());
                (Some(aligned), skip)
            }
            None => (None, 0),
        };

        let stream = self.transport.get_object(key, request).await?;
        if let (Some(r), Some(returned)) = (range, stream.attributes.content_length) {
            // The widened request can still land inside the object when the
            // caller's start does not.
            if skip > 0 && returned <= skip {
                return Err(TransportError::new(
                    "get_object",
                    key,
                    format!("range {} starts past the end of the object", r.to_header()),
                )
                .into());
            }
        }
        let envelope = Envelope::from_metadata(&stream.attributes.metadata)?;

        let body: ByteReader = match &envelope {
            None => {
                debug!(key, "object carries no envelope; passing through");
                stream.body
            }
            Some(env) => {
                let cipher = self.content_cipher(env).await?;
                let start = request.map_or(0, |r| r.start);
                let cipher = cipher.seeked(start)?;
                Box::pin(cipher.decrypt_content(stream.body))
            }
        };
        let body: ByteReader = if skip > 0 {
            Box::pin(DiscardReader::new(body, skip))
        } else {
            body
        };

        let mut attributes = stream.attributes;
        match (range, &envelope) {
            (Some(_), _) => {
                attributes.content_length = attributes.content_length.map(|n| n.saturating_sub(skip));
            }
            (None, Some(env)) => {
                if env.unencrypted_content_length.is_some() {
                    attributes.content_length = env.unencrypted_content_length;
                }
                attributes.content_md5 = env.unencrypted_content_md5.clone();
            }
            (None, None) => {}
        }
        debug!(key, ?range, encrypted = envelope.is_some(), "object fetched");

        Ok(CryptoObject {
            body,
            attributes,
            envelope,
        })
    }

    /// Fetch and decrypt `key` into a file at `path`; returns bytes written.
    ///
    /// # Errors
    ///
    /// Local I/O errors, plus everything [`get_object`](Self::get_object) returns.
    pub async fn get_object_to_file(
        &self,
        key: &str,
        range: Option<ByteRange>,
        path: impl AsRef<Path>,
    ) -> Result<u64, CryptoError> {
        let mut object = self.get_object(key, range).await?;
        let mut file = tokio::fs::File::create(path.as_ref()).await?;
        let written = tokio::io::copy(&mut object.body, &mut file).await?;
        file.flush().await?;
        Ok(written)
    }

    /// Attributes and envelope of `key`, with length and MD5 describing the
    /// plaintext where the envelope records them.
    ///
    /// # Errors
    ///
    /// Malformed envelopes and transport errors.
    pub async fn head_object(&self, key: &str) -> Result<ObjectHead, CryptoError> {
        let mut attributes = self.transport.head_object(key).await?;
        let envelope = Envelope::from_metadata(&attributes.metadata)?;
        if let Some(env) = &envelope {
            if env.unencrypted_content_length.is_some() {
                attributes.content_length = env.unencrypted_content_length;
            }
            attributes.content_md5 = env.unencrypted_content_md5.clone();
        }
        Ok(ObjectHead {
            attributes,
            envelope,
        })
    }

    /// Content cipher for `envelope`, positioned at offset zero.
    pub(crate) async fn content_cipher(
        &self,
        envelope: &Envelope,
    ) -> Result<ContentCipher, CryptoError> {
        let master = self.resolve_master(envelope).await?;
        CipherBuilder::new(master).from_envelope(envelope).await
    }

    async fn resolve_master(
        &self,
        envelope: &Envelope,
    ) -> Result<Arc<dyn MasterKeyProvider>, CryptoError> {
        let own = self.builder.master();
        let descriptor = envelope.material_descriptor.as_str();

        if descriptor == own.material_descriptor() {
            return Ok(Arc::clone(own));
        }
        if descriptor.is_empty() {
            if self.strict_descriptor {
                return Err(CryptoError::CannotDecrypt {
                    descriptor: String::new(),
                    reason: "envelope has no material descriptor".into(),
                });
            }
            warn!(
                own_descriptor = own.material_descriptor(),
                "envelope has no material descriptor; trying own master key"
            );
            return Ok(Arc::clone(own));
        }

        match &self.resolver {
            Some(resolver) => resolver.resolve(envelope).await,
            None => Err(CryptoError::CannotDecrypt {
                descriptor: descriptor.to_owned(),
                reason: "no master key resolver configured".into(),
            }),
        }
    }
}

impl std::fmt::Debug for CryptoBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoBucket")
            .field("builder", &self.builder)
            .field("resolver", &self.resolver.is_some())
            .field("strict_descriptor", &self.strict_descriptor)
            .finish_non_exhaustive()
    }
}
