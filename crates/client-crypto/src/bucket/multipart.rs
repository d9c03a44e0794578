//! Multipart uploads and part-aligned reads.
//!
//! One content cipher covers the whole object. Part `p` (1-based) is
//! encrypted with a clone seeked to `(p - 1) * part_size`, so parts can be
//! encrypted and uploaded concurrently and the assembled object decrypts as
//! a single stream. `part_size` must therefore be a multiple of the cipher
//! alignment; this is checked before anything is sent.

use common::{
    protocol::{ByteRange, Metadata, META_DATA_SIZE, META_PART_SIZE},
    CryptoError,
};
use tracing::{debug, info};

use super::{CryptoBucket, CryptoObject};
use crate::crypto::ContentCipher;
use crate::envelope::{parse_u64, Envelope};
use crate::transport::{ByteReader, UploadedPart};

/// Cipher and sizing shared by every part of one multipart upload.
#[derive(Debug, Clone)]
pub struct PartCryptoContext {
    content_cipher: ContentCipher,
    data_size: Option<u64>,
    part_size: u64,
}

impl PartCryptoContext {
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidConfig`] if `part_size` is zero or not a
    /// multiple of the cipher's alignment.
    pub fn new(
        content_cipher: ContentCipher,
        data_size: Option<u64>,
        part_size: u64,
    ) -> Result<Self, CryptoError> {
        check_part_size(part_size, content_cipher.align_len())?;
        Ok(Self {
            content_cipher,
            data_size,
            part_size,
        })
    }

    pub fn content_cipher(&self) -> &ContentCipher {
        &self.content_cipher
    }

    /// Declared plaintext size of the whole object, if known.
    pub fn data_size(&self) -> Option<u64> {
        self.data_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Byte offset of part `part_number` within the object.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidConfig`] for part number zero or an
    /// offset that overflows.
    pub fn part_offset(&self, part_number: u32) -> Result<u64, CryptoError> {
        if part_number == 0 {
            return Err(CryptoError::InvalidConfig("part numbers start at 1".into()));
        }
        u64::from(part_number - 1)
            .checked_mul(self.part_size)
            .ok_or_else(|| CryptoError::InvalidConfig(format!("part {part_number} offset overflows")))
    }

    /// Cipher for part `part_number`: a clone seeked to the part's offset.
    ///
    /// # Errors
    ///
    /// See [`part_offset`](Self::part_offset).
    pub fn part_cipher(&self, part_number: u32) -> Result<ContentCipher, CryptoError> {
        self.content_cipher.seeked(self.part_offset(part_number)?)
    }

    /// Number of parts the declared data size splits into; an empty object
    /// still takes one part.
    pub fn part_count(&self) -> Option<u32> {
        let size = self.data_size?;
        let count = size.div_ceil(self.part_size).max(1);
        u32::try_from(count).ok()
    }

    /// Expected plaintext length of part `part_number`, if the data size is
    /// known and the part lies within it.
    pub fn part_len(&self, part_number: u32) -> Option<u64> {
        let size = self.data_size?;
        if part_number == 0 || part_number > self.part_count()? {
            return None;
        }
        let offset = self.part_offset(part_number).ok()?;
        Some((size - offset.min(size)).min(self.part_size))
    }
}

fn check_part_size(part_size: u64, align: u64) -> Result<(), CryptoError> {
    if part_size == 0 || part_size % align != 0 {
        return Err(CryptoError::InvalidConfig(format!(
            "part size {part_size} must be a positive multiple of {align} bytes"
        )));
    }
    Ok(())
}

/// Handle for an in-progress encrypted multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub key: String,
    pub upload_id: String,
    pub context: PartCryptoContext,
}

impl MultipartUpload {
    fn part_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        if let Some(size) = self.context.data_size {
            metadata.insert(META_DATA_SIZE, size.to_string());
        }
        metadata.insert(META_PART_SIZE, self.context.part_size.to_string());
        metadata
    }
}

impl CryptoBucket {
    /// Start an encrypted multipart upload of `data_size` plaintext bytes in
    /// parts of `part_size`.
    ///
    /// The envelope and sizing are attached to the final object here; parts
    /// only carry their sizing.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidConfig`] if `part_size` is not a positive
    ///   multiple of the cipher alignment. Nothing is sent in that case.
    /// - Master key wrap failures and transport errors.
    pub async fn initiate_multipart_upload(
        &self,
        key: &str,
        data_size: Option<u64>,
        part_size: u64,
        mut metadata: Metadata,
    ) -> Result<MultipartUpload, CryptoError> {
        check_part_size(part_size, self.builder.align_len())?;

        let cipher = self.builder.new_for_upload().await?;
        let mut envelope = Envelope::from_cipher_data(cipher.cipher_data());
        envelope.unencrypted_content_length = data_size;
        envelope.write_metadata(&mut metadata);
        if let Some(size) = data_size {
            metadata.insert(META_DATA_SIZE, size.to_string());
        }
        metadata.insert(META_PART_SIZE, part_size.to_string());

        let context = PartCryptoContext::new(cipher, data_size, part_size)?;
        let upload_id = self.transport.initiate_multipart(key, metadata).await?;
        info!(key, %upload_id, part_size, data_size = ?data_size, "multipart upload initiated");
        Ok(MultipartUpload {
            key: key.to_owned(),
            upload_id,
            context,
        })
    }

    /// Encrypt and upload one part of `size` plaintext bytes.
    ///
    /// Parts are independent and may be uploaded concurrently in any order.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidConfig`] if `part_number` is zero, lies past
    ///   the declared data size, or `size` disagrees with the part layout.
    /// - Transport errors.
    pub async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        body: ByteReader,
        size: u64,
    ) -> Result<UploadedPart, CryptoError> {
        let context = &upload.context;
        let cipher = context.part_cipher(part_number)?;
        if size > context.part_size {
            return Err(CryptoError::InvalidConfig(format!(
                "part {part_number} is {size} bytes, larger than the part size {}",
                context.part_size
            )));
        }
        if context.data_size.is_some() {
            match context.part_len(part_number) {
                Some(expected) if expected == size => {}
                Some(expected) => {
                    return Err(CryptoError::InvalidConfig(format!(
                        "part {part_number} must be {expected} bytes, got {size}"
                    )))
                }
                None => {
                    return Err(CryptoError::InvalidConfig(format!(
                        "part {part_number} lies past the declared data size"
                    )))
                }
            }
        }

        let encrypted: ByteReader = Box::pin(cipher.encrypt_content(body));
        let part = self
            .transport
            .upload_part(
                &upload.key,
                &upload.upload_id,
                part_number,
                encrypted,
                cipher.encrypted_len(size),
                upload.part_metadata(),
            )
            .await?;
        debug!(key = %upload.key, part_number, size, "part uploaded");
        Ok(part)
    }

    /// Assemble the uploaded parts into the final object.
    ///
    /// # Errors
    ///
    /// Transport errors.
    pub async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        mut parts: Vec<UploadedPart>,
    ) -> Result<(), CryptoError> {
        parts.sort_by_key(|p| p.part_number);
        let count = parts.len();
        self.transport
            .complete_multipart(&upload.key, &upload.upload_id, parts)
            .await?;
        info!(key = %upload.key, parts = count, "multipart upload completed");
        Ok(())
    }

    /// Abandon the upload and discard its parts.
    ///
    /// # Errors
    ///
    /// Transport errors.
    pub async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> Result<(), CryptoError> {
        self.transport
            .abort_multipart(&upload.key, &upload.upload_id)
            .await?;
        info!(key = %upload.key, upload_id = %upload.upload_id, "multipart upload aborted");
        Ok(())
    }

    /// Fetch and decrypt one part of an object uploaded in parts.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::MalformedEnvelope`] if the object records no part size,
    ///   or one so large the part's offset overflows.
    /// - Everything [`get_object`](Self::get_object) returns.
    pub async fn get_object_part(
        &self,
        key: &str,
        part_number: u32,
    ) -> Result<CryptoObject, CryptoError> {
        let head = self.transport.head_object(key).await?;
        let part_size = parse_u64(&head.metadata, META_PART_SIZE)?.ok_or_else(|| {
            CryptoError::MalformedEnvelope {
                field: META_PART_SIZE,
                reason: "object was not uploaded in parts".into(),
            }
        })?;
        check_part_size(part_size, self.builder.align_len())?;
        if part_number == 0 {
            return Err(CryptoError::InvalidConfig("part numbers start at 1".into()));
        }
        let range = u64::from(part_number - 1)
            .checked_mul(part_size)
            .and_then(|start| {
                let end = start.checked_add(part_size - 1)?;
                Some(ByteRange::new(start, end))
            })
            .ok_or_else(|| CryptoError::MalformedEnvelope {
                field: META_PART_SIZE,
                reason: format!("part {part_number} of {part_size}-byte parts lies beyond any object"),
            })?;
        self.get_object(key, Some(range)).await
    }
}
