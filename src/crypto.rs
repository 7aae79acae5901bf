//! Symmetric decryption of upstream payloads.
//!
//! The provider ships every response body as an OpenSSL-compatible blob:
//! base64 over `"Salted__" || salt[8] || AES-256-CBC ciphertext`, with the
//! key and IV derived from the shared password via EVP_BytesToKey (MD5, one
//! round per block).

use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use md5::{Digest, Md5};
use serde_json::Value;

use crate::error::DecryptError;

type Aes256CbcDec = cbc::Decryptor<Aes256>;

const SALT_MAGIC: &[u8] = b"Salted__";
const AES_BLOCK: usize = 16;

/// Decrypt an upstream ciphertext with the shared password.
///
/// Returns parsed JSON when the plaintext is valid JSON, else the raw text
/// wrapped as a JSON string.
pub fn decrypt(ciphertext: &str, password: &str) -> Result<Value, DecryptError> {
    let raw = BASE64.decode(ciphertext.trim().as_bytes())?;

    if raw.len() < SALT_MAGIC.len() + 8 || !raw.starts_with(SALT_MAGIC) {
        return Err(DecryptError::InvalidFormat);
    }
    let salt = &raw[SALT_MAGIC.len()..SALT_MAGIC.len() + 8];
    let encrypted = &raw[SALT_MAGIC.len() + 8..];

    if encrypted.is_empty() || encrypted.len() % AES_BLOCK != 0 {
        return Err(DecryptError::InvalidPadding);
    }

    let (key, iv) = bytes_to_key(password.as_bytes(), salt);
    let mut buf = encrypted.to_vec();
    let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| DecryptError::InvalidPadding)?;

    let text = std::str::from_utf8(plaintext).map_err(|_| DecryptError::InvalidUtf8)?;
    Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

/// OpenSSL EVP_BytesToKey with MD5: D_i = MD5(D_{i-1} || password || salt),
/// concatenated until key + IV bytes are available.
fn bytes_to_key(password: &[u8], salt: &[u8]) -> ([u8; 32], [u8; 16]) {
    let mut derived = Vec::with_capacity(48);
    let mut block: Vec<u8> = Vec::new();
    while derived.len() < 48 {
        let mut hasher = Md5::new();
        hasher.update(&block);
        hasher.update(password);
        hasher.update(salt);
        block = hasher.finalize().to_vec();
        derived.extend_from_slice(&block);
    }

    let mut key = [0u8; 32];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&derived[..32]);
    iv.copy_from_slice(&derived[32..48]);
    (key, iv)
}
