//! [`Envelope`]: the persisted, wrapped form of an object's key material.
//!
//! Wrapped key and IV are base64 in metadata; every other field is plain
//! text. An object carries an envelope if any of the four required keys is
//! present; a partial envelope is malformed, never plaintext.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{
    protocol::{
        Metadata, META_CEK_ALG, META_KEY, META_MATDESC, META_START,
        META_UNENCRYPTED_CONTENT_LENGTH, META_UNENCRYPTED_CONTENT_MD5, META_WRAP_ALG,
    },
    CryptoError,
};

use crate::crypto::CipherData;

/// Wrapped key material and algorithm tags of one encrypted object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Content key encrypted under the master key.
    pub wrapped_key: Vec<u8>,
    /// IV encrypted under the master key.
    pub wrapped_iv: Vec<u8>,
    /// Descriptor of the master key.
    pub material_descriptor: String,
    /// Wrap algorithm tag.
    pub wrap_algorithm: String,
    /// Content cipher tag.
    pub content_algorithm: String,
    /// Plaintext length, when known at upload time.
    pub unencrypted_content_length: Option<u64>,
    /// Plaintext MD5, when supplied at upload time.
    pub unencrypted_content_md5: Option<String>,
}

impl Envelope {
    /// Project the persistable half of `cd`.
    pub fn from_cipher_data(cd: &CipherData) -> Self {
        Self {
            wrapped_key: cd.wrapped_key.clone(),
            wrapped_iv: cd.wrapped_iv.clone(),
            material_descriptor: cd.material_descriptor.clone(),
            wrap_algorithm: cd.wrap_algorithm.clone(),
            content_algorithm: cd.content_algorithm.clone(),
            unencrypted_content_length: None,
            unencrypted_content_md5: None,
        }
    }

    /// Returns `true` if every required field is non-empty.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Check that every required field is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedEnvelope`] naming the first empty field.
    pub fn validate(&self) -> Result<(), CryptoError> {
        let required = [
            (META_KEY, self.wrapped_key.is_empty()),
            (META_START, self.wrapped_iv.is_empty()),
            (META_WRAP_ALG, self.wrap_algorithm.is_empty()),
            (META_CEK_ALG, self.content_algorithm.is_empty()),
        ];
        match required.into_iter().find(|(_, empty)| *empty) {
            Some((field, _)) => Err(CryptoError::MalformedEnvelope {
                field,
                reason: "required field is empty".into(),
            }),
            None => Ok(()),
        }
    }

    /// Write the envelope into `metadata`.
    pub fn write_metadata(&self, metadata: &mut Metadata) {
        metadata.insert(META_KEY, STANDARD.encode(&self.wrapped_key));
        metadata.insert(META_START, STANDARD.encode(&self.wrapped_iv));
        metadata.insert(META_WRAP_ALG, self.wrap_algorithm.as_str());
        metadata.insert(META_CEK_ALG, self.content_algorithm.as_str());
        metadata.insert(META_MATDESC, self.material_descriptor.as_str());
        if let Some(len) = self.unencrypted_content_length {
            metadata.insert(META_UNENCRYPTED_CONTENT_LENGTH, len.to_string());
        }
        if let Some(md5) = &self.unencrypted_content_md5 {
            metadata.insert(META_UNENCRYPTED_CONTENT_MD5, md5.as_str());
        }
    }

    /// Read an envelope back from `metadata`.
    ///
    /// Returns `Ok(None)` for objects that carry no envelope at all.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedEnvelope`] if a field fails to decode
    /// or a required field is missing or empty.
    pub fn from_metadata(metadata: &Metadata) -> Result<Option<Self>, CryptoError> {
        let present = [META_KEY, META_START, META_WRAP_ALG, META_CEK_ALG]
            .iter()
            .any(|k| metadata.contains_key(k));
        if !present {
            return Ok(None);
        }

        let envelope = Self {
            wrapped_key: decode_base64(metadata, META_KEY)?,
            wrapped_iv: decode_base64(metadata, META_START)?,
            material_descriptor: text(metadata, META_MATDESC),
            wrap_algorithm: text(metadata, META_WRAP_ALG),
            content_algorithm: text(metadata, META_CEK_ALG),
            unencrypted_content_length: parse_u64(metadata, META_UNENCRYPTED_CONTENT_LENGTH)?,
            unencrypted_content_md5: metadata
                .get(META_UNENCRYPTED_CONTENT_MD5)
                .map(str::to_owned),
        };
        envelope.validate()?;
        Ok(Some(envelope))
    }
}

fn text(metadata: &Metadata, field: &str) -> String {
    metadata.get(field).unwrap_or_default().to_owned()
}

fn decode_base64(metadata: &Metadata, field: &'static str) -> Result<Vec<u8>, CryptoError> {
    let raw = metadata.get(field).unwrap_or_default();
    STANDARD
        .decode(raw.trim())
        .map_err(|e| CryptoError::MalformedEnvelope {
            field,
            reason: format!("invalid base64: {e}"),
        })
}

/// Parse an optional decimal metadata value.
pub(crate) fn parse_u64(metadata: &Metadata, field: &'static str) -> Result<Option<u64>, CryptoError> {
    metadata
        .get(field)
        .map(|v| {
            v.trim().parse().map_err(|_| CryptoError::MalformedEnvelope {
                field,
                reason: format!("{v:?} is not a decimal length"),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use common::{protocol::AES_CTR_ALGORITHM, ErrorClass};

    use super::*;

    fn sample() -> Envelope {
        Envelope {
            wrapped_key: vec![1, 2, 3],
            wrapped_iv: vec![4, 5, 6],
            material_descriptor: r#"{"a":"b"}"#.into(),
            wrap_algorithm: "RSA/NONE/PKCS1Padding".into(),
            content_algorithm: AES_CTR_ALGORITHM.into(),
            unencrypted_content_length: Some(1023),
            unencrypted_content_md5: Some("1B2M2Y8AsgTpgAmY7PhCfg==".into()),
        }
    }

    #[test]
    fn metadata_round_trip() {
        let mut md = Metadata::new();
        sample().write_metadata(&mut md);
        assert_eq!(md.get(META_KEY), Some("AQID"));
        assert_eq!(md.get(META_UNENCRYPTED_CONTENT_LENGTH), Some("1023"));
        assert_eq!(Envelope::from_metadata(&md).unwrap(), Some(sample()));
    }

    #[test]
    fn no_envelope_keys_means_plain_object() {
        let md: Metadata = [("owner", "alice")].into_iter().collect();
        assert_eq!(Envelope::from_metadata(&md).unwrap(), None);
    }

    #[test]
    fn each_missing_required_field_is_rejected() {
        for field in [META_KEY, META_START, META_WRAP_ALG, META_CEK_ALG] {
            let mut md = Metadata::new();
            sample().write_metadata(&mut md);
            md.remove(field);
            let err = Envelope::from_metadata(&md).unwrap_err();
            assert_eq!(err.class(), ErrorClass::Decode);
            assert!(err.to_string().contains(field), "{err}");
        }
    }

    #[test]
    fn bad_base64_names_the_field() {
        let mut md = Metadata::new();
        sample().write_metadata(&mut md);
        md.insert(META_START, "not base64!");
        let err = Envelope::from_metadata(&md).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::MalformedEnvelope { field: META_START, .. }
        ));
    }

    #[test]
    fn bad_length_is_rejected() {
        let mut md = Metadata::new();
        sample().write_metadata(&mut md);
        md.insert(META_UNENCRYPTED_CONTENT_LENGTH, "ten");
        assert!(Envelope::from_metadata(&md).is_err());
    }

    #[test]
    fn validity() {
        assert!(sample().is_valid());
        let mut e = sample();
        e.content_algorithm.clear();
        assert!(!e.is_valid());
        // An empty descriptor is allowed.
        let mut e = sample();
        e.material_descriptor.clear();
        assert!(e.is_valid());
    }

    #[test]
    fn from_cipher_data_copies_wrapped_fields_only() {
        let mut cd = CipherData::from_key_iv(vec![0x11; 32], vec![0x22; 16]);
        cd.wrapped_key = vec![9; 4];
        cd.wrapped_iv = vec![8; 4];
        cd.wrap_algorithm = "KMS/TEST".into();
        cd.content_algorithm = AES_CTR_ALGORITHM.into();
        let e = Envelope::from_cipher_data(&cd);
        assert_eq!(e.wrapped_key, vec![9; 4]);
        assert_eq!(e.wrap_algorithm, "KMS/TEST");
        assert!(e.unencrypted_content_length.is_none());
    }
}
