//! Credential encryption using AES-256-GCM
//!
//! Connector credentials are serialized to a JSON object, sealed with
//! AES-256-GCM and stored as a versioned envelope:
//! `0x01 || nonce (12 bytes) || ciphertext + tag`.
//! The connector name is bound in as additional authenticated data so an
//! envelope copied onto another connector's row fails to open.

#![allow(deprecated)]

use std::collections::BTreeMap;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Decrypted credential map handed to connectors.
pub type Credentials = BTreeMap<String, String>;

/// Crypto error types
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("unsupported envelope version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
    #[error("credential payload is not a string map: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

/// Type alias for crypto keys
pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    /// Create a new crypto key from bytes
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Get the key as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ZeroizingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey(**redacted**)")
    }
}

/// Encrypt bytes using AES-256-GCM
pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Decrypt bytes using AES-256-GCM
pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let Some(&version) = ciphertext.first() else {
        return Err(CryptoError::EmptyCiphertext);
    };

    if version != VERSION_ENCRYPTED {
        return Err(CryptoError::UnsupportedVersion(version));
    }

    if ciphertext.len() < MIN_ENCRYPTED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    debug_assert!(tag_and_ct.len() >= TAG_LEN);

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

fn credentials_aad(connector_name: &str) -> Vec<u8> {
    format!("connector_configurations|{connector_name}").into_bytes()
}

/// Seal a credential map for the given connector.
///
/// An empty map seals to `None` so that "configured" always means a
/// non-empty envelope is stored.
pub fn seal_credentials(
    key: &CryptoKey,
    connector_name: &str,
    credentials: &Credentials,
) -> Result<Option<Vec<u8>>, CryptoError> {
    if credentials.is_empty() {
        return Ok(None);
    }
    let mut plaintext = serde_json::to_vec(credentials)?;
    let sealed = encrypt_bytes(key, &credentials_aad(connector_name), &plaintext);
    plaintext.zeroize();
    sealed.map(Some)
}

/// Open a stored credential envelope. A missing or empty blob yields an empty map.
pub fn open_credentials(
    key: &CryptoKey,
    connector_name: &str,
    ciphertext: Option<&[u8]>,
) -> Result<Credentials, CryptoError> {
    match ciphertext {
        None => Ok(Credentials::new()),
        Some([]) => Ok(Credentials::new()),
        Some(blob) => {
            let mut plaintext = decrypt_bytes(key, &credentials_aad(connector_name), blob)?;
            let parsed = serde_json::from_slice(&plaintext);
            plaintext.zeroize();
            Ok(parsed?)
        }
    }
}

/// Determine if a payload is using the encrypted format
pub fn is_encrypted_payload(ciphertext: &[u8]) -> bool {
    ciphertext.len() >= MIN_ENCRYPTED_LEN && ciphertext[0] == VERSION_ENCRYPTED
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![7u8; 32]).expect("valid test key")
    }

    fn sample_credentials() -> Credentials {
        Credentials::from([
            ("api_token".to_string(), "s3cr3t".to_string()),
            ("account".to_string(), "2100000000".to_string()),
        ])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let encrypted = encrypt_bytes(&key, b"aad", b"secret message").expect("encrypts");
        let decrypted = decrypt_bytes(&key, b"aad", &encrypted).expect("decrypts");
        assert_eq!(decrypted, b"secret message");
    }

    #[test]
    fn test_modified_ciphertext_fails() {
        let key = test_key();
        let mut encrypted = encrypt_bytes(&key, b"aad", b"secret message").expect("encrypts");
        encrypted[13] ^= 0x01;
        assert!(decrypt_bytes(&key, b"aad", &encrypted).is_err());
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let first = encrypt_bytes(&key, b"aad", b"same").expect("encrypts");
        let second = encrypt_bytes(&key, b"aad", b"same").expect("encrypts");
        assert_ne!(&first[1..13], &second[1..13]);
    }

    #[test]
    fn test_unversioned_payload_rejected() {
        let key = test_key();
        let result = decrypt_bytes(&key, b"aad", b"plain-token");
        assert!(matches!(result, Err(CryptoError::UnsupportedVersion(b'p'))));
    }

    #[test]
    fn test_insufficient_ciphertext_length() {
        let key = test_key();
        let result = decrypt_bytes(&key, b"aad", &[VERSION_ENCRYPTED, 0x02]);
        assert!(matches!(result, Err(CryptoError::InvalidFormat)));
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(matches!(
            CryptoKey::new(vec![0u8; 16]),
            Err(CryptoError::InvalidKeyLength(16))
        ));
        assert!(CryptoKey::new(vec![0u8; 64]).is_err());
    }

    #[test]
    fn test_credentials_roundtrip() {
        let key = test_key();
        let sealed = seal_credentials(&key, "bank_feed", &sample_credentials())
            .expect("seals")
            .expect("non-empty map produces an envelope");

        assert!(is_encrypted_payload(&sealed));
        let opened = open_credentials(&key, "bank_feed", Some(&sealed)).expect("opens");
        assert_eq!(opened, sample_credentials());
    }

    #[test]
    fn test_credentials_bound_to_connector_name() {
        let key = test_key();
        let sealed = seal_credentials(&key, "bank_feed", &sample_credentials())
            .expect("seals")
            .expect("envelope");

        let result = open_credentials(&key, "exchange_rates", Some(&sealed));
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_empty_credentials_seal_to_none() {
        let key = test_key();
        let sealed = seal_credentials(&key, "example", &Credentials::new()).expect("seals");
        assert!(sealed.is_none());

        assert!(open_credentials(&key, "example", None).expect("opens").is_empty());
        assert!(open_credentials(&key, "example", Some(&[])).expect("opens").is_empty());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let rendered = format!("{:?}", test_key());
        assert!(!rendered.contains('7'));
    }
}
