//! AES-256-GCM encryption at rest for tenant credentials, plus the
//! display-safe masking used by the admin surface.
//!
//! The ciphertext persisted by callers is `base64(ciphertext ∥ auth_tag)`
//! (the `aes-gcm` crate appends the 16-byte tag to its `encrypt` output, so
//! this is simply the raw return value, base64-encoded) alongside a
//! separate base64 of the 12-byte random IV.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use thiserror::Error;

pub const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenCryptoError {
    #[error("no encryption key configured")]
    MissingKey,
    #[error("malformed ciphertext or key: {0}")]
    Malformed(String),
}

/// An encrypted credential ready for persistence: both fields are base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedToken {
    pub ciphertext_b64: String,
    pub iv_b64: String,
}

/// Encrypts `plaintext` with `key` (must be exactly 32 bytes), generating a
/// fresh random 12-byte IV.
pub fn encrypt_token(plaintext: &str, key: &[u8]) -> Result<EncryptedToken, TokenCryptoError> {
    let cipher = build_cipher(key)?;

    let mut iv_bytes = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv_bytes);
    let nonce = Nonce::from_slice(&iv_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| TokenCryptoError::Malformed(format!("encryption failed: {e}")))?;

    Ok(EncryptedToken {
        ciphertext_b64: BASE64.encode(ciphertext),
        iv_b64: BASE64.encode(iv_bytes),
    })
}

/// Decrypts a previously-encrypted token. Any tampering of either the
/// ciphertext or the IV surfaces as `Malformed` (the GCM auth tag no longer
/// verifies), never a panic.
pub fn decrypt_token(encrypted: &EncryptedToken, key: &[u8]) -> Result<String, TokenCryptoError> {
    let cipher = build_cipher(key)?;

    let iv_bytes = BASE64
        .decode(&encrypted.iv_b64)
        .map_err(|e| TokenCryptoError::Malformed(format!("invalid IV base64: {e}")))?;
    if iv_bytes.len() != IV_LEN {
        return Err(TokenCryptoError::Malformed(format!(
            "IV must be {IV_LEN} bytes, got {}",
            iv_bytes.len()
        )));
    }
    let nonce = Nonce::from_slice(&iv_bytes);

    let ciphertext = BASE64
        .decode(&encrypted.ciphertext_b64)
        .map_err(|e| TokenCryptoError::Malformed(format!("invalid ciphertext base64: {e}")))?;

    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_slice())
        .map_err(|_| TokenCryptoError::Malformed("authentication tag mismatch".to_owned()))?;

    String::from_utf8(plaintext)
        .map_err(|e| TokenCryptoError::Malformed(format!("decrypted bytes are not UTF-8: {e}")))
}

fn build_cipher(key: &[u8]) -> Result<Aes256Gcm, TokenCryptoError> {
    if key.is_empty() {
        return Err(TokenCryptoError::MissingKey);
    }
    if key.len() != KEY_LEN {
        return Err(TokenCryptoError::Malformed(format!(
            "key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
}

/// Masks a token for display: `"***"` for inputs of length <= 8 chars;
/// otherwise a prefix, `"..."`, and a suffix, shrunk as needed so the
/// result is always strictly shorter than the input.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let len = chars.len();
    if len <= 8 {
        return "***".to_owned();
    }

    let mut start = 5usize;
    let mut end = 3usize;
    while start + end + 3 >= len {
        if end > 0 {
            end -= 1;
        } else if start > 0 {
            start -= 1;
        } else {
            break;
        }
    }

    let prefix: String = chars[..start].iter().collect();
    let suffix: String = chars[len - end..].iter().collect();
    format!("{prefix}...{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_key_00_3f() -> Vec<u8> {
        (0u8..=0x3F).collect()
    }

    #[test]
    fn encrypt_then_decrypt_round_trips_for_the_seed_scenario() {
        let key = hex_key_00_3f();
        let token = "123456789:ABCdefGHIjklMNOpqrsTUVwxyz";
        let encrypted = encrypt_token(token, &key).unwrap();
        let decrypted = decrypt_token(&encrypted, &key).unwrap();
        assert_eq!(decrypted, token);
    }

    #[test]
    fn round_trips_arbitrary_utf8_under_a_correct_key() {
        let key = hex_key_00_3f();
        for token in ["", "a", "héllo wörld 🎉", "short8chr"] {
            let encrypted = encrypt_token(token, &key).unwrap();
            let decrypted = decrypt_token(&encrypted, &key).unwrap();
            assert_eq!(decrypted, token);
        }
    }

    #[test]
    fn tampering_ciphertext_byte_yields_malformed() {
        let key = hex_key_00_3f();
        let mut encrypted = encrypt_token("hello world", &key).unwrap();
        let mut raw = BASE64.decode(&encrypted.ciphertext_b64).unwrap();
        raw[0] ^= 0xFF;
        encrypted.ciphertext_b64 = BASE64.encode(raw);

        let result = decrypt_token(&encrypted, &key);
        assert_eq!(result, Err(TokenCryptoError::Malformed("authentication tag mismatch".to_owned())));
    }

    #[test]
    fn tampering_iv_byte_yields_malformed() {
        let key = hex_key_00_3f();
        let mut encrypted = encrypt_token("hello world", &key).unwrap();
        let mut raw = BASE64.decode(&encrypted.iv_b64).unwrap();
        raw[0] ^= 0xFF;
        encrypted.iv_b64 = BASE64.encode(raw);

        let result = decrypt_token(&encrypted, &key);
        assert!(matches!(result, Err(TokenCryptoError::Malformed(_))));
    }

    #[test]
    fn missing_key_is_reported_distinctly_from_malformed() {
        let result = encrypt_token("hello", &[]);
        assert_eq!(result, Err(TokenCryptoError::MissingKey));
    }

    #[test]
    fn wrong_key_length_is_malformed_not_missing() {
        let result = encrypt_token("hello", &[1, 2, 3]);
        assert_eq!(
            result,
            Err(TokenCryptoError::Malformed("key must be 32 bytes, got 3".to_owned()))
        );
    }

    #[test]
    fn mask_token_returns_literal_stars_for_short_inputs() {
        for token in ["", "a", "1234567", "12345678"] {
            assert_eq!(mask_token(token), "***");
        }
    }

    #[test]
    fn mask_token_matches_seed_scenario() {
        assert_eq!(mask_token("123456789:ABCdefGHIjklMNOpqrsTUVwxyz"), "12345...xyz");
    }

    #[test]
    fn mask_token_output_is_always_shorter_than_input_above_threshold() {
        for len in 9..=40 {
            let token: String = (0..len).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
            let masked = mask_token(&token);
            assert!(masked.len() < token.len(), "len={len} masked={masked}");
            assert!(masked.contains("..."));
        }
    }
}
