//! Object metadata protocol shared by the encryption engine and transports.
//!
//! Metadata keys are user-metadata names without the storage service's
//! prefix (`x-amz-meta-`, `x-oss-meta-`, ...); transports add and strip the
//! prefix themselves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Metadata keys
// ---------------------------------------------------------------------------

/// Wrapped content key, base64.
pub const META_KEY: &str = "client-side-encryption-key";
/// Wrapped IV, base64.
pub const META_START: &str = "client-side-encryption-start";
/// Content cipher algorithm tag.
pub const META_CEK_ALG: &str = "client-side-encryption-cek-alg";
/// Wrap algorithm tag.
pub const META_WRAP_ALG: &str = "client-side-encryption-wrap-alg";
/// Material descriptor (JSON text).
pub const META_MATDESC: &str = "client-side-encryption-matdesc";
/// Plaintext length in decimal.
pub const META_UNENCRYPTED_CONTENT_LENGTH: &str =
    "client-side-encryption-unencrypted-content-length";
/// Plaintext digest as supplied by the uploader.
pub const META_UNENCRYPTED_CONTENT_MD5: &str = "client-side-encryption-unencrypted-content-md5";
/// Declared total plaintext size of a multipart session.
pub const META_DATA_SIZE: &str = "client-side-encryption-data-size";
/// Declared part size of a multipart session.
pub const META_PART_SIZE: &str = "client-side-encryption-part-size";

// ---------------------------------------------------------------------------
// Algorithm tags
// ---------------------------------------------------------------------------

/// The only supported content cipher.
pub const AES_CTR_ALGORITHM: &str = "AES/CTR/NoPadding";
/// Wrap tag written by the RSA master key.
pub const RSA_WRAP_ALGORITHM: &str = "RSA/NONE/PKCS1Padding";
/// Prefix of every remote-KMS wrap tag (`KMS/<provider>`).
pub const KMS_WRAP_PREFIX: &str = "KMS/";

// ---------------------------------------------------------------------------
// Metadata map
// ---------------------------------------------------------------------------

/// Case-insensitive user metadata.
///
/// Keys are folded to ASCII lowercase on insert and lookup so that values
/// survive transports that re-case header names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.0.insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// Remove a value, returning it if it was present.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(&key.to_ascii_lowercase())
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(&key.to_ascii_lowercase())
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut m = Metadata::new();
        for (k, v) in iter {
            m.insert(k, v);
        }
        m
    }
}

// ---------------------------------------------------------------------------
// Object attributes
// ---------------------------------------------------------------------------

/// Standard headers plus user metadata of a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    /// Body length in bytes, if known.
    pub content_length: Option<u64>,
    /// Base64 MD5 of the body, if supplied.
    pub content_md5: Option<String>,
    /// User metadata.
    pub metadata: Metadata,
}

// ---------------------------------------------------------------------------
// Byte ranges
// ---------------------------------------------------------------------------

/// An HTTP-style byte range: `start` through `end`, both inclusive.
///
/// An absent `end` reads to the end of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: Option<u64>,
}

impl ByteRange {
    /// Range `start..=end`.
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Range from `start` to the end of the object.
    pub fn starting_at(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Render as an HTTP `Range` header value.
    pub fn to_header(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Parse the `start-end` / `start-` form used on the command line.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.strip_prefix("bytes=").unwrap_or(s);
        let (start, end) = s.split_once('-')?;
        let start = start.trim().parse().ok()?;
        let end = match end.trim() {
            "" => None,
            e => Some(e.parse().ok()?),
        };
        let range = Self { start, end };
        (!range.is_inverted()).then_some(range)
    }

    /// Whether `end` lies before `start`. Such a range selects nothing and
    /// servers are free to ignore it and send the whole object.
    pub fn is_inverted(&self) -> bool {
        matches!(self.end, Some(end) if end < self.start)
    }

    /// Truncate `start` down to a multiple of `align`.
    pub fn align_down(&self, align: u64) -> Self {
        Self {
            start: self.start / align * align,
            end: self.end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_case_insensitive() {
        let mut m = Metadata::new();
        m.insert("Client-Side-Encryption-Key", "abc");
        assert_eq!(m.get(META_KEY), Some("abc"));
        assert!(m.contains_key("CLIENT-SIDE-ENCRYPTION-KEY"));
        assert_eq!(m.remove("client-side-encryption-KEY").as_deref(), Some("abc"));
        assert!(m.is_empty());
    }

    #[test]
    fn metadata_serde() {
        let m: Metadata = [("Owner", "alice")].into_iter().collect();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"owner":"alice"}"#);
    }

    #[test]
    fn range_header() {
        assert_eq!(ByteRange::new(496, 599).to_header(), "bytes=496-599");
        assert_eq!(ByteRange::starting_at(16).to_header(), "bytes=16-");
    }

    #[test]
    fn range_parse() {
        assert_eq!(ByteRange::parse("500-599"), Some(ByteRange::new(500, 599)));
        assert_eq!(ByteRange::parse("bytes=7-"), Some(ByteRange::starting_at(7)));
        assert_eq!(ByteRange::parse("9-3"), None);
        assert_eq!(ByteRange::parse("abc"), None);
        assert!(ByteRange::new(600, 500).is_inverted());
        assert!(!ByteRange::new(5, 5).is_inverted());
        assert!(!ByteRange::starting_at(5).is_inverted());
    }

    #[test]
    fn range_align_down() {
        assert_eq!(ByteRange::new(500, 599).align_down(16), ByteRange::new(496, 599));
        assert_eq!(ByteRange::starting_at(32).align_down(16), ByteRange::starting_at(32));
        assert_eq!(ByteRange::starting_at(15).align_down(16), ByteRange::starting_at(0));
    }
}
