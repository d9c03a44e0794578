//! Shared fixtures for unit tests: RSA key pairs and an in-process KMS.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::CryptoError;
use rand::rngs::OsRng;
use rsa::{
    pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey},
    pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding},
    RsaPrivateKey, RsaPublicKey,
};

use crate::master::{KmsClient, KmsMasterKey, MasterKeyProvider, RsaMasterKey};

const TEST_RSA_BITS: usize = 1024;

fn generated(slot: &'static OnceLock<RsaPrivateKey>) -> &'static RsaPrivateKey {
    slot.get_or_init(|| RsaPrivateKey::new(&mut OsRng, TEST_RSA_BITS).expect("generate RSA key"))
}

fn first_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    generated(&KEY)
}

fn second_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    generated(&KEY)
}

fn spki_pkcs8(private: &RsaPrivateKey) -> (String, String) {
    let public = RsaPublicKey::from(private)
        .to_public_key_pem(LineEnding::LF)
        .expect("encode public key");
    let private = private
        .to_pkcs8_pem(LineEnding::LF)
        .expect("encode private key")
        .to_string();
    (public, private)
}

/// `(public, private)` PEM pair in SPKI / PKCS#8 form.
pub fn rsa_pair() -> (String, String) {
    spki_pkcs8(first_key())
}

/// The same key as [`rsa_pair`] in PKCS#1 form.
pub fn rsa_pair_pkcs1() -> (String, String) {
    let private = first_key();
    let public = RsaPublicKey::from(private)
        .to_pkcs1_pem(LineEnding::LF)
        .expect("encode public key");
    let private = private
        .to_pkcs1_pem(LineEnding::LF)
        .expect("encode private key")
        .to_string();
    (public, private)
}

/// A second, unrelated key pair.
pub fn second_rsa_pair() -> (String, String) {
    spki_pkcs8(second_key())
}

pub fn rsa_master(descriptor: &str) -> Arc<dyn MasterKeyProvider> {
    let (public, private) = rsa_pair();
    Arc::new(RsaMasterKey::from_pem(descriptor, &public, &private).expect("rsa master"))
}

pub fn second_rsa_master(descriptor: &str) -> Arc<dyn MasterKeyProvider> {
    let (public, private) = second_rsa_pair();
    Arc::new(RsaMasterKey::from_pem(descriptor, &public, &private).expect("rsa master"))
}

pub fn kms_master(descriptor: &str) -> Arc<dyn MasterKeyProvider> {
    let client: Arc<dyn KmsClient> = Arc::new(FakeKms::new("TEST"));
    Arc::new(KmsMasterKey::new(descriptor, "test-key", Some(client)).expect("kms master"))
}

/// In-process stand-in for a KMS: blobs are `<key_id>:<masked payload>`.
#[derive(Debug, Clone)]
pub struct FakeKms {
    provider: String,
}

impl FakeKms {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_owned(),
        }
    }
}

fn mask(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| b ^ 0x5A).collect()
}

#[async_trait]
impl KmsClient for FakeKms {
    fn provider(&self) -> String {
        self.provider.clone()
    }

    async fn encrypt(&self, key_id: &str, plaintext: &str) -> Result<String, CryptoError> {
        Ok(format!("{key_id}:{}", STANDARD.encode(mask(plaintext.as_bytes()))))
    }

    async fn decrypt(&self, key_id: &str, ciphertext_blob: &str) -> Result<String, CryptoError> {
        let wrong_key = || CryptoError::KeyWrap {
            operation: "kms decrypt",
            reason: "ciphertext was not produced under this key".into(),
        };
        let payload = ciphertext_blob
            .strip_prefix(key_id)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(wrong_key)?;
        let masked = STANDARD.decode(payload).map_err(|_| wrong_key())?;
        String::from_utf8(mask(&masked)).map_err(|_| wrong_key())
    }
}
