//! Object storage transport seam.
//!
//! The encryption facade never talks to a storage service directly; it hands
//! already-encrypted streams and envelope metadata to an [`ObjectTransport`].
//! Metadata keys are passed unprefixed; each transport maps them onto its
//! service's user-metadata namespace.
//!
//! - [`memory::MemoryTransport`]: process-local store for tests and dry runs.
//! - [`s3::S3Transport`]: AWS S3 through `aws-sdk-s3`.

pub mod memory;
pub mod s3;

use std::pin::Pin;

use async_trait::async_trait;
use common::{
    protocol::{ByteRange, Metadata, ObjectAttributes},
    TransportError,
};
use tokio::io::AsyncRead;

pub use memory::MemoryTransport;
pub use s3::S3Transport;

/// Owned, sendable byte stream.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Body and attributes returned by a GET.
pub struct ObjectStream {
    /// Object body (or the requested range of it).
    pub body: ByteReader,
    /// Stored headers and user metadata.
    pub attributes: ObjectAttributes,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// Receipt for one uploaded part, needed to complete the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// 1-based part number.
    pub part_number: u32,
    /// Entity tag returned by the service.
    pub etag: String,
}

/// Storage operations the facade depends on.
///
/// Errors are reported as [`TransportError`] and surfaced unmodified.
#[async_trait]
pub trait ObjectTransport: Send + Sync {
    /// Store `body` under `key`.
    async fn put_object(
        &self,
        key: &str,
        body: ByteReader,
        attributes: ObjectAttributes,
    ) -> Result<(), TransportError>;

    /// Fetch `key`, optionally restricted to `range`.
    async fn get_object(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectStream, TransportError>;

    /// Fetch the attributes of `key` without its body.
    async fn head_object(&self, key: &str) -> Result<ObjectAttributes, TransportError>;

    /// Start a multipart upload whose final object carries `metadata`.
    async fn initiate_multipart(
        &self,
        key: &str,
        metadata: Metadata,
    ) -> Result<String, TransportError>;

    /// Upload one part of exactly `size` bytes.
    ///
    /// `metadata` carries per-part sizing information; services that cannot
    /// attach metadata to a part may ignore it.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: ByteReader,
        size: u64,
        metadata: Metadata,
    ) -> Result<UploadedPart, TransportError>;

    /// Assemble the uploaded parts into the final object.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), TransportError>;

    /// Discard an in-progress upload and its parts.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), TransportError>;
}
