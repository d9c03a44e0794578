//! Process-local [`ObjectTransport`].

use std::{
    collections::{BTreeMap, HashMap},
    io::Cursor,
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    protocol::{ByteRange, Metadata, ObjectAttributes},
    TransportError,
};
use tokio::{io::AsyncReadExt, sync::RwLock};
use uuid::Uuid;

use super::{ByteReader, ObjectStream, ObjectTransport, UploadedPart};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    attributes: ObjectAttributes,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    metadata: Metadata,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Debug)]
struct StoredPart {
    data: Bytes,
    etag: String,
    metadata: Metadata,
}

#[derive(Debug, Default)]
struct Store {
    objects: HashMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
}

/// In-memory object store.
///
/// Cheap to clone; clones share the same store. Bodies are kept exactly as
/// received, so tests can inspect the ciphertext that would reach a real
/// service.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    store: Arc<RwLock<Store>>,
}

impl MemoryTransport {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes of `key`, exactly as uploaded.
    pub async fn raw_object(&self, key: &str) -> Option<Bytes> {
        self.store.read().await.objects.get(key).map(|o| o.data.clone())
    }

    /// Metadata sent with one part of a still-open upload.
    pub async fn part_metadata(&self, upload_id: &str, part_number: u32) -> Option<Metadata> {
        let store = self.store.read().await;
        let upload = store.uploads.get(upload_id)?;
        upload.parts.get(&part_number).map(|p| p.metadata.clone())
    }

    /// Number of multipart uploads neither completed nor aborted.
    pub async fn pending_uploads(&self) -> usize {
        self.store.read().await.uploads.len()
    }
}

async fn drain(
    operation: &'static str,
    key: &str,
    mut body: ByteReader,
) -> Result<Bytes, TransportError> {
    let mut buf = Vec::new();
    body.read_to_end(&mut buf)
        .await
        .map_err(|e| TransportError::new(operation, key, e))?;
    Ok(Bytes::from(buf))
}

fn slice(data: &Bytes, range: ByteRange) -> Result<Bytes, String> {
    let len = data.len() as u64;
    if range.start >= len || range.is_inverted() {
        return Err(format!(
            "range {} not satisfiable for {len}-byte object",
            range.to_header()
        ));
    }
    let end = range.end.map_or(len - 1, |e| e.min(len - 1));
    Ok(data.slice(range.start as usize..=end as usize))
}

#[async_trait]
impl ObjectTransport for MemoryTransport {
    async fn put_object(
        &self,
        key: &str,
        body: ByteReader,
        mut attributes: ObjectAttributes,
    ) -> Result<(), TransportError> {
        let data = drain("put_object", key, body).await?;
        if let Some(declared) = attributes.content_length {
            if declared != data.len() as u64 {
                return Err(TransportError::new(
                    "put_object",
                    key,
                    format!("declared {declared} bytes, received {}", data.len()),
                ));
            }
        }
        attributes.content_length = Some(data.len() as u64);
        self.store
            .write()
            .await
            .objects
            .insert(key.to_owned(), StoredObject { data, attributes });
        Ok(())
    }

    async fn get_object(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectStream, TransportError> {
        let object = self
            .store
            .read()
            .await
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| TransportError::new("get_object", key, "no such key"))?;

        let data = match range {
            Some(range) => {
                slice(&object.data, range).map_err(|e| TransportError::new("get_object", key, e))?
            }
            None => object.data,
        };
        let mut attributes = object.attributes;
        attributes.content_length = Some(data.len() as u64);
        Ok(ObjectStream {
            body: Box::pin(Cursor::new(data)),
            attributes,
        })
    }

    async fn head_object(&self, key: &str) -> Result<ObjectAttributes, TransportError> {
        self.store
            .read()
            .await
            .objects
            .get(key)
            .map(|o| o.attributes.clone())
            .ok_or_else(|| TransportError::new("head_object", key, "no such key"))
    }

    async fn initiate_multipart(
        &self,
        key: &str,
        metadata: Metadata,
    ) -> Result<String, TransportError> {
        let upload_id = Uuid::new_v4().simple().to_string();
        self.store.write().await.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_owned(),
                metadata,
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: ByteReader,
        size: u64,
        metadata: Metadata,
    ) -> Result<UploadedPart, TransportError> {
        let data = drain("upload_part", key, body).await?;
        if data.len() as u64 != size {
            return Err(TransportError::new(
                "upload_part",
                key,
                format!("declared {size} bytes, received {}", data.len()),
            ));
        }

        let mut store = self.store.write().await;
        let upload = store
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| TransportError::new("upload_part", key, "no such upload"))?;
        let etag = Uuid::new_v4().simple().to_string();
        upload.parts.insert(
            part_number,
            StoredPart {
                data,
                etag: etag.clone(),
                metadata,
            },
        );
        Ok(UploadedPart { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), TransportError> {
        let fail = |reason: String| TransportError::new("complete_multipart", key, reason);

        let mut store = self.store.write().await;
        let upload = store
            .uploads
            .remove(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| fail("no such upload".into()))?;
        if parts.is_empty() {
            return Err(fail("no parts listed".into()));
        }

        let mut data = Vec::new();
        let mut previous = 0;
        for part in &parts {
            if part.part_number <= previous {
                return Err(fail("parts must be listed in ascending order".into()));
            }
            previous = part.part_number;
            let stored = upload
                .parts
                .get(&part.part_number)
                .filter(|p| p.etag == part.etag)
                .ok_or_else(|| fail(format!("part {} was not uploaded", part.part_number)))?;
            data.extend_from_slice(&stored.data);
        }

        let attributes = ObjectAttributes {
            content_length: Some(data.len() as u64),
            content_md5: None,
            metadata: upload.metadata,
        };
        store.objects.insert(
            key.to_owned(),
            StoredObject {
                data: Bytes::from(data),
                attributes,
            },
        );
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), TransportError> {
        let mut store = self.store.write().await;
        match store.uploads.get(upload_id) {
            Some(upload) if upload.key == key => {
                store.uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(TransportError::new("abort_multipart", key, "no such upload")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(data: &'static [u8]) -> ByteReader {
        Box::pin(data)
    }

    async fn read_all(mut stream: ObjectStream) -> Vec<u8> {
        let mut out = Vec::new();
        stream.body.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn put_get_head() {
        let t = MemoryTransport::new();
        let mut attributes = ObjectAttributes::default();
        attributes.metadata.insert("owner", "alice");
        t.put_object("k", body(b"hello world"), attributes).await.unwrap();

        let head = t.head_object("k").await.unwrap();
        assert_eq!(head.content_length, Some(11));
        assert_eq!(head.metadata.get("owner"), Some("alice"));
        assert_eq!(read_all(t.get_object("k", None).await.unwrap()).await, b"hello world");
        assert_eq!(t.raw_object("k").await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn ranges_are_inclusive_and_clamped() {
        let t = MemoryTransport::new();
        t.put_object("k", body(b"0123456789"), ObjectAttributes::default())
            .await
            .unwrap();

        let s = t.get_object("k", Some(ByteRange::new(2, 4))).await.unwrap();
        assert_eq!(s.attributes.content_length, Some(3));
        assert_eq!(read_all(s).await, b"234");

        let s = t.get_object("k", Some(ByteRange::new(8, 100))).await.unwrap();
        assert_eq!(read_all(s).await, b"89");

        let s = t.get_object("k", Some(ByteRange::starting_at(7))).await.unwrap();
        assert_eq!(read_all(s).await, b"789");

        assert!(t.get_object("k", Some(ByteRange::starting_at(10))).await.is_err());
        assert!(t.get_object("k", Some(ByteRange::new(6, 3))).await.is_err());
    }

    #[tokio::test]
    async fn missing_key_is_a_transport_error() {
        let t = MemoryTransport::new();
        let err = t.get_object("nope", None).await.unwrap_err();
        assert_eq!(err.operation, "get_object");
        assert_eq!(err.key, "nope");
        assert!(t.head_object("nope").await.is_err());
    }

    #[tokio::test]
    async fn declared_length_must_match() {
        let t = MemoryTransport::new();
        let attributes = ObjectAttributes {
            content_length: Some(3),
            ..Default::default()
        };
        assert!(t.put_object("k", body(b"four"), attributes).await.is_err());
    }

    #[tokio::test]
    async fn multipart_lifecycle() {
        let t = MemoryTransport::new();
        let metadata: Metadata = [("m", "1")].into_iter().collect();
        let id = t.initiate_multipart("k", metadata).await.unwrap();

        let part_md: Metadata = [("p", "2")].into_iter().collect();
        let p2 = t
            .upload_part("k", &id, 2, body(b"world"), 5, part_md)
            .await
            .unwrap();
        let p1 = t
            .upload_part("k", &id, 1, body(b"hello "), 6, Metadata::new())
            .await
            .unwrap();
        assert_eq!(
            t.part_metadata(&id, 2).await.unwrap().get("p"),
            Some("2")
        );

        assert!(t
            .complete_multipart("k", &id, vec![p2.clone(), p1.clone()])
            .await
            .is_err());
        // A failed completion consumes the upload.
        assert_eq!(t.pending_uploads().await, 0);

        let id = t.initiate_multipart("k", Metadata::new()).await.unwrap();
        let p1 = t
            .upload_part("k", &id, 1, body(b"hello "), 6, Metadata::new())
            .await
            .unwrap();
        let p2 = t
            .upload_part("k", &id, 2, body(b"world"), 5, Metadata::new())
            .await
            .unwrap();
        t.complete_multipart("k", &id, vec![p1, p2]).await.unwrap();
        assert_eq!(t.raw_object("k").await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn part_size_mismatch_is_rejected() {
        let t = MemoryTransport::new();
        let id = t.initiate_multipart("k", Metadata::new()).await.unwrap();
        assert!(t
            .upload_part("k", &id, 1, body(b"abc"), 4, Metadata::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn abort_discards_parts() {
        let t = MemoryTransport::new();
        let id = t.initiate_multipart("k", Metadata::new()).await.unwrap();
        t.upload_part("k", &id, 1, body(b"abc"), 3, Metadata::new())
            .await
            .unwrap();
        assert_eq!(t.pending_uploads().await, 1);
        t.abort_multipart("k", &id).await.unwrap();
        assert_eq!(t.pending_uploads().await, 0);
        assert!(t.abort_multipart("k", &id).await.is_err());
        assert!(t.raw_object("k").await.is_none());
    }
}
