//! [`ObjectTransport`] over AWS S3.

use std::{
    collections::HashMap,
    io,
    pin::Pin,
    sync::{Mutex, PoisonError},
    task::{ready, Context, Poll},
};

use async_trait::async_trait;
use aws_sdk_s3::{
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use bytes::{Bytes, BytesMut};
use common::{
    protocol::{ByteRange, Metadata, ObjectAttributes},
    TransportError,
};
use http_body::{Body, Frame, SizeHint};
use tokio::io::AsyncReadExt;
use tokio_util::io::poll_read_buf;
use tracing::debug;

use super::{ByteReader, ObjectStream, ObjectTransport, UploadedPart};

/// S3 bucket accessed through `aws-sdk-s3`.
///
/// Bodies of known length stream in both directions. A PUT without a
/// declared length is buffered first so the SDK can sign a known length.
#[derive(Clone, Debug)]
pub struct S3Transport {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Transport {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

fn to_s3_metadata(metadata: &Metadata) -> Option<HashMap<String, String>> {
    if metadata.is_empty() {
        return None;
    }
    Some(
        metadata
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect(),
    )
}

fn from_s3_metadata(metadata: Option<&HashMap<String, String>>) -> Metadata {
    metadata
        .into_iter()
        .flat_map(|m| m.iter())
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

fn length(n: Option<i64>) -> Option<u64> {
    n.and_then(|n| u64::try_from(n).ok())
}

fn signed(operation: &'static str, key: &str, n: u64) -> Result<i64, TransportError> {
    i64::try_from(n).map_err(|_| TransportError::new(operation, key, format!("length {n} out of range")))
}

async fn buffer(
    operation: &'static str,
    key: &str,
    mut body: ByteReader,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::new();
    body.read_to_end(&mut buf)
        .await
        .map_err(|e| TransportError::new(operation, key, e))?;
    Ok(buf)
}

const CHUNK: usize = 64 * 1024;

/// Request body read from a [`ByteReader`] that must yield exactly `remaining`
/// bytes.
struct ReaderBody {
    // Only touched through `&mut self`; the mutex makes the body `Sync`.
    reader: Mutex<ByteReader>,
    buf: BytesMut,
    remaining: u64,
}

impl ReaderBody {
    fn new(reader: ByteReader, len: u64) -> Self {
        Self {
            reader: Mutex::new(reader),
            buf: BytesMut::new(),
            remaining: len,
        }
    }

    fn into_stream(self) -> ByteStream {
        ByteStream::from_body_1_x(self)
    }
}

impl Body for ReaderBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        let this = self.get_mut();
        let reader = this.reader.get_mut().unwrap_or_else(PoisonError::into_inner);
        this.buf.reserve(CHUNK);
        let n = ready!(poll_read_buf(reader.as_mut(), cx, &mut this.buf))? as u64;

        if n == 0 {
            return Poll::Ready(match this.remaining {
                0 => None,
                short => Some(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("body ended {short} bytes short of its declared length"),
                ))),
            });
        }
        if n > this.remaining {
            return Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "body is longer than its declared length",
            ))));
        }
        this.remaining -= n;
        Poll::Ready(Some(Ok(Frame::data(this.buf.split().freeze()))))
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }
}

#[async_trait]
impl ObjectTransport for S3Transport {
    async fn put_object(
        &self,
        key: &str,
        body: ByteReader,
        attributes: ObjectAttributes,
    ) -> Result<(), TransportError> {
        let (body, len) = match attributes.content_length {
            Some(len) => (ReaderBody::new(body, len).into_stream(), len),
            None => {
                let data = buffer("put_object", key, body).await?;
                let len = data.len() as u64;
                (ByteStream::from(data), len)
            }
        };
        let len = signed("put_object", key, len)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(len)
            .set_content_md5(attributes.content_md5)
            .set_metadata(to_s3_metadata(&attributes.metadata))
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::new("put_object", key, e))?;
        debug!(bucket = %self.bucket, key, bytes = len, "object stored");
        Ok(())
    }

    async fn get_object(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectStream, TransportError> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range.map(|r| r.to_header()))
            .send()
            .await
            .map_err(|e| TransportError::new("get_object", key, e))?;

        let attributes = ObjectAttributes {
            content_length: length(out.content_length()),
            content_md5: None,
            metadata: from_s3_metadata(out.metadata()),
        };
        Ok(ObjectStream {
            body: Box::pin(out.body.into_async_read()),
            attributes,
        })
    }

    async fn head_object(&self, key: &str) -> Result<ObjectAttributes, TransportError> {
        let out = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| TransportError::new("head_object", key, e))?;
        Ok(ObjectAttributes {
            content_length: length(out.content_length()),
            content_md5: None,
            metadata: from_s3_metadata(out.metadata()),
        })
    }

    async fn initiate_multipart(
        &self,
        key: &str,
        metadata: Metadata,
    ) -> Result<String, TransportError> {
        let out = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_metadata(to_s3_metadata(&metadata))
            .send()
            .await
            .map_err(|e| TransportError::new("initiate_multipart", key, e))?;
        out.upload_id()
            .map(str::to_owned)
            .ok_or_else(|| TransportError::new("initiate_multipart", key, "response carried no upload id"))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: ByteReader,
        size: u64,
        _metadata: Metadata,
    ) -> Result<UploadedPart, TransportError> {
        // S3 cannot attach metadata to a part; sizing lives on the upload.
        let number = i32::try_from(part_number)
            .map_err(|_| TransportError::new("upload_part", key, "part number out of range"))?;
        let out = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(number)
            .content_length(signed("upload_part", key, size)?)
            .body(ReaderBody::new(body, size).into_stream())
            .send()
            .await
            .map_err(|e| TransportError::new("upload_part", key, e))?;
        let etag = out
            .e_tag()
            .map(str::to_owned)
            .ok_or_else(|| TransportError::new("upload_part", key, "response carried no ETag"))?;
        Ok(UploadedPart { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), TransportError> {
        let completed = parts
            .into_iter()
            .map(|p| {
                let number = i32::try_from(p.part_number).map_err(|_| {
                    TransportError::new("complete_multipart", key, "part number out of range")
                })?;
                Ok(CompletedPart::builder()
                    .part_number(number)
                    .e_tag(p.etag)
                    .build())
            })
            .collect::<Result<Vec<_>, TransportError>>()?;

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| TransportError::new("complete_multipart", key, e))?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), TransportError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| TransportError::new("abort_multipart", key, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_conversion() {
        let md: Metadata = [("Client-Side-Encryption-Key", "abc"), ("owner", "bob")]
            .into_iter()
            .collect();
        let s3 = to_s3_metadata(&md).unwrap();
        assert_eq!(s3.get("client-side-encryption-key").map(String::as_str), Some("abc"));

        let back = from_s3_metadata(Some(&s3));
        assert_eq!(back, md);
        assert!(from_s3_metadata(None).is_empty());
        assert!(to_s3_metadata(&Metadata::new()).is_none());
    }

    async fn frames(mut body: ReaderBody) -> Result<Vec<u8>, io::Error> {
        let mut out = Vec::new();
        while let Some(frame) = std::future::poll_fn(|cx| Pin::new(&mut body).poll_frame(cx)).await {
            if let Ok(data) = frame?.into_data() {
                out.extend_from_slice(&data);
            }
        }
        Ok(out)
    }

    fn body(data: &[u8]) -> ByteReader {
        Box::pin(std::io::Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn reader_body_streams_declared_length() {
        let data = vec![7u8; CHUNK * 2 + 5];
        let reader = ReaderBody::new(body(&data), data.len() as u64);
        assert_eq!(reader.size_hint().exact(), Some(data.len() as u64));
        assert_eq!(frames(reader).await.unwrap(), data);

        assert!(frames(ReaderBody::new(body(b""), 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reader_body_rejects_length_mismatch() {
        let err = frames(ReaderBody::new(body(b"short"), 9)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let err = frames(ReaderBody::new(body(b"too long"), 3)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn negative_lengths_are_dropped() {
        assert_eq!(length(Some(10)), Some(10));
        assert_eq!(length(Some(-1)), None);
        assert_eq!(length(None), None);
    }
}
