//! AES-256-GCM sealing for credential secrets stored at rest.
//!
//! Access and refresh tokens are sealed before they reach the database and
//! opened after they are read back. The key is 32 bytes, hex-encoded (64 characters).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, ErrorKind, StorageErrorKind};

/// 12-byte nonce size for AES-GCM
const NONCE_SIZE: usize = 12;

fn encryption_err() -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::Storage(StorageErrorKind::EncryptionFailed),
    }
}

fn decryption_err() -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
    }
}

/// Seals and opens token secrets with a single AES-256-GCM key.
///
/// Each sealed value is `base64(nonce || ciphertext)` with a fresh random nonce,
/// so sealing the same token twice yields different column values.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Build a cipher from a hex-encoded 32-byte key.
    pub fn from_hex(key_hex: &str) -> Result<Self, Error> {
        let bytes = hex::decode(key_hex).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Storage(StorageErrorKind::EncryptionFailed),
        })?;
        if bytes.len() != 32 {
            return Err(encryption_err());
        }
        let cipher = Aes256Gcm::new_from_slice(&bytes).map_err(|_| encryption_err())?;
        Ok(Self { cipher })
    }

    /// Seal a secret for storage in a text column.
    pub fn seal(&self, secret: &SecretString) -> Result<String, Error> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, secret.expose_secret().as_bytes())
            .map_err(|_| encryption_err())?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);

        Ok(BASE64.encode(combined))
    }

    /// Open a value produced by [`TokenCipher::seal`].
    pub fn open(&self, sealed: &str) -> Result<SecretString, Error> {
        let combined = BASE64.decode(sealed).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
        })?;

        if combined.len() < NONCE_SIZE {
            return Err(decryption_err());
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| decryption_err())?;

        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn test_sealed_token_opens_to_original() {
        let cipher = TokenCipher::from_hex(TEST_KEY).unwrap();
        let sealed = cipher.seal(&secret("qbo-refresh-AB12")).unwrap();
        assert!(!sealed.contains("qbo-refresh-AB12"));
        assert_eq!(cipher.open(&sealed).unwrap().expose_secret(), "qbo-refresh-AB12");
    }

    #[test]
    fn test_sealing_twice_uses_fresh_nonces() {
        let cipher = TokenCipher::from_hex(TEST_KEY).unwrap();
        let first = cipher.seal(&secret("xero-access")).unwrap();
        let second = cipher.seal(&secret("xero-access")).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_short_key_is_rejected() {
        let result = TokenCipher::from_hex("abcd");
        assert!(matches!(
            result,
            Err(Error {
                error_kind: ErrorKind::Storage(StorageErrorKind::EncryptionFailed),
                ..
            })
        ));
    }

    #[test]
    fn test_non_hex_key_is_rejected() {
        assert!(TokenCipher::from_hex("not-valid-hex!").is_err());
    }

    #[test]
    fn test_open_with_other_key_fails() {
        let sealed = TokenCipher::from_hex(TEST_KEY)
            .unwrap()
            .seal(&secret("wave-token"))
            .unwrap();
        let other = TokenCipher::from_hex(
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .unwrap();
        assert!(matches!(
            other.open(&sealed),
            Err(Error {
                error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
                ..
            })
        ));
    }

    #[test]
    fn test_garbage_column_value_fails_to_open() {
        let cipher = TokenCipher::from_hex(TEST_KEY).unwrap();
        assert!(cipher.open("not_valid_base64!!!").is_err());
        assert!(cipher.open("YWJj").is_err());
    }
}
