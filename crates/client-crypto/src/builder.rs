//! [`CipherBuilder`]: mints content ciphers for uploads and rebuilds them
//! from envelopes for downloads.

use std::sync::Arc;

use common::{protocol::AES_CTR_ALGORITHM, CryptoError};

use crate::crypto::{CipherData, ContentCipher, IV_LEN, KEY_LEN};
use crate::envelope::Envelope;
use crate::master::MasterKeyProvider;

/// AES-CTR content cipher factory bound to one master key.
#[derive(Clone)]
pub struct CipherBuilder {
    master: Arc<dyn MasterKeyProvider>,
}

impl CipherBuilder {
    /// Build ciphers whose keys are wrapped by `master`.
    pub fn new(master: Arc<dyn MasterKeyProvider>) -> Self {
        Self { master }
    }

    /// The master key this builder wraps with.
    pub fn master(&self) -> &Arc<dyn MasterKeyProvider> {
        &self.master
    }

    /// Alignment of every cipher this builder produces.
    pub fn align_len(&self) -> u64 {
        IV_LEN as u64
    }

    /// Fresh key and IV, wrapped under the master key.
    ///
    /// # Errors
    ///
    /// Propagates master key wrap failures.
    pub async fn new_for_upload(&self) -> Result<ContentCipher, CryptoError> {
        let mut cd = CipherData::random_key_iv(KEY_LEN, IV_LEN)?;
        cd.wrapped_key = self.master.wrap(&cd.key).await?;
        cd.wrapped_iv = self.master.wrap(&cd.iv).await?;
        cd.wrap_algorithm = self.master.wrap_algorithm().to_owned();
        cd.material_descriptor = self.master.material_descriptor().to_owned();
        cd.content_algorithm = AES_CTR_ALGORITHM.to_owned();
        ContentCipher::new(cd)
    }

    /// Rebuild the content cipher recorded in `envelope`.
    ///
    /// The caller must already have picked the master key matching the
    /// envelope's material descriptor.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::MalformedEnvelope`] if a required field is empty.
    /// - [`CryptoError::UnsupportedAlgorithm`] if the content algorithm is not
    ///   AES-CTR or the wrap algorithm is not this master key's.
    /// - [`CryptoError::KeyWrap`] if unwrapping fails or yields material of
    ///   the wrong length.
    pub async fn from_envelope(&self, envelope: &Envelope) -> Result<ContentCipher, CryptoError> {
        envelope.validate()?;
        if envelope.content_algorithm != AES_CTR_ALGORITHM {
            return Err(CryptoError::unsupported_content(&envelope.content_algorithm));
        }
        if envelope.wrap_algorithm != self.master.wrap_algorithm() {
            return Err(CryptoError::unsupported_wrap(&envelope.wrap_algorithm));
        }

        let key = self.master.unwrap(&envelope.wrapped_key).await?;
        let iv = self.master.unwrap(&envelope.wrapped_iv).await?;
        if key.len() != KEY_LEN || iv.len() != IV_LEN {
            return Err(CryptoError::KeyWrap {
                operation: "unwrap",
                reason: "unwrapped key material has the wrong length".into(),
            });
        }

        let mut cd = CipherData::from_key_iv(key, iv);
        cd.wrapped_key = envelope.wrapped_key.clone();
        cd.wrapped_iv = envelope.wrapped_iv.clone();
        cd.wrap_algorithm = envelope.wrap_algorithm.clone();
        cd.material_descriptor = envelope.material_descriptor.clone();
        cd.content_algorithm = envelope.content_algorithm.clone();
        ContentCipher::new(cd)
    }
}

impl std::fmt::Debug for CipherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherBuilder")
            .field("wrap_algorithm", &self.master.wrap_algorithm())
            .field("material_descriptor", &self.master.material_descriptor())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use common::{protocol::RSA_WRAP_ALGORITHM, ErrorClass};

    use super::*;
    use crate::test_support::{kms_master, rsa_master, second_rsa_master};

    fn encrypt(cc: &ContentCipher, pt: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        cc.encrypt_content(pt).read_to_end(&mut out).unwrap();
        out
    }

    fn decrypt(cc: &ContentCipher, ct: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        cc.decrypt_content(ct).read_to_end(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn upload_cipher_carries_wrapped_material() {
        let builder = CipherBuilder::new(rsa_master("desc"));
        let cc = builder.new_for_upload().await.unwrap();
        let cd = cc.cipher_data();
        assert_eq!(cd.wrap_algorithm, RSA_WRAP_ALGORITHM);
        assert_eq!(cd.content_algorithm, AES_CTR_ALGORITHM);
        assert_eq!(cd.material_descriptor, "desc");
        assert!(!cd.wrapped_key.is_empty());
        assert_ne!(cd.wrapped_key, cd.key);
    }

    #[tokio::test]
    async fn envelope_round_trip_for_every_provider() {
        for master in [rsa_master(""), kms_master("")] {
            let builder = CipherBuilder::new(master);
            let cc = builder.new_for_upload().await.unwrap();
            let envelope = Envelope::from_cipher_data(cc.cipher_data());
            let rebuilt = builder.from_envelope(&envelope).await.unwrap();

            for len in [0usize, 1, 1000] {
                let pt: Vec<u8> = (0..len).map(|i| i as u8).collect();
                let ct = encrypt(&cc, &pt);
                assert_eq!(ct.len(), pt.len());
                assert_eq!(decrypt(&rebuilt, &ct), pt);
            }
        }
    }

    #[tokio::test]
    async fn unsupported_content_algorithm() {
        let builder = CipherBuilder::new(rsa_master(""));
        let cc = builder.new_for_upload().await.unwrap();
        let mut envelope = Envelope::from_cipher_data(cc.cipher_data());
        envelope.content_algorithm = "AES/GCM/NoPadding".into();
        let err = builder.from_envelope(&envelope).await.unwrap_err();
        assert!(matches!(
            err,
            CryptoError::UnsupportedAlgorithm { kind: "content", .. }
        ));
    }

    #[tokio::test]
    async fn unknown_wrap_algorithm_is_unsupported_not_decode() {
        let builder = CipherBuilder::new(rsa_master(""));
        let cc = builder.new_for_upload().await.unwrap();
        let mut envelope = Envelope::from_cipher_data(cc.cipher_data());
        envelope.wrap_algorithm = "RSA/ECB/OAEPWithSHA-1".into();
        let err = builder.from_envelope(&envelope).await.unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedAlgorithm { kind: "wrap", .. }));
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[tokio::test]
    async fn invalid_envelope_rejected_before_unwrap() {
        let builder = CipherBuilder::new(rsa_master(""));
        let cc = builder.new_for_upload().await.unwrap();
        let mut envelope = Envelope::from_cipher_data(cc.cipher_data());
        envelope.wrapped_iv.clear();
        let err = builder.from_envelope(&envelope).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Decode);
    }

    #[tokio::test]
    async fn wrong_master_key_never_yields_a_cipher() {
        let writer = CipherBuilder::new(rsa_master(""));
        let reader = CipherBuilder::new(second_rsa_master(""));
        let cc = writer.new_for_upload().await.unwrap();
        let envelope = Envelope::from_cipher_data(cc.cipher_data());
        let err = reader.from_envelope(&envelope).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::KeyResolution);
    }

    #[tokio::test]
    async fn wrong_provider_variant_is_rejected() {
        let writer = CipherBuilder::new(kms_master(""));
        let reader = CipherBuilder::new(rsa_master(""));
        let cc = writer.new_for_upload().await.unwrap();
        let envelope = Envelope::from_cipher_data(cc.cipher_data());
        assert!(reader.from_envelope(&envelope).await.is_err());
    }
}
