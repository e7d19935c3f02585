// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential vault for provider secrets at rest.
//!
//! Provider signing keys and partner API credentials are stored as
//! AES-256-GCM blobs in the format:
//!
//! ```text
//! <hex nonce>:<hex auth tag>:<hex ciphertext>
//! ```
//!
//! Every encryption draws a fresh random 96-bit nonce. Blobs written with a
//! 128-bit nonce (older records) are still accepted on decryption.
//!
//! Decryption fails closed: a malformed blob or a tag mismatch is an error,
//! never partial plaintext.

use aes_gcm::{
    aead::{consts::U16, Aead, AeadCore, KeyInit, OsRng},
    aes::Aes256,
    Aes256Gcm, AesGcm, Key, Nonce,
};
use argon2::Argon2;
use secrecy::SecretString;

/// AES-256-GCM with a 128-bit nonce, used only to read older blobs.
type Aes256GcmWideNonce = AesGcm<Aes256, U16>;

/// Fixed salt for deriving the vault key from a passphrase-style secret.
const KDF_SALT: &[u8] = b"survey-partner-vault-v1";

const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("encryption key is not configured")]
    MissingKey,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encrypted blob is malformed: {0}")]
    MalformedBlob(String),

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed: authentication tag mismatch")]
    Decryption,

    #[error("decrypted value is not valid UTF-8")]
    InvalidUtf8,
}

/// Symmetric vault holding the derived 256-bit key.
#[derive(Clone)]
pub struct CredentialVault {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Build a vault from the operator-supplied secret.
    ///
    /// - 64 hex characters: decoded and used directly.
    /// - exactly 32 bytes: used directly.
    /// - anything else: stretched with Argon2id over a fixed salt.
    pub fn from_secret(secret: &str) -> Result<Self, VaultError> {
        if secret.is_empty() {
            return Err(VaultError::MissingKey);
        }

        if secret.len() == KEY_LEN * 2 {
            if let Ok(bytes) = hex::decode(secret) {
                let mut key = [0u8; KEY_LEN];
                key.copy_from_slice(&bytes);
                return Ok(Self { key });
            }
        }

        if secret.len() == KEY_LEN {
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(secret.as_bytes());
            return Ok(Self { key });
        }

        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(secret.as_bytes(), KDF_SALT, &mut key)
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
        Ok(Self { key })
    }

    /// Encrypt a plaintext secret into a `nonce:tag:ciphertext` blob.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encryption)?;

        // aes-gcm appends the tag to the ciphertext
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    /// Decrypt a `nonce:tag:ciphertext` blob.
    pub fn decrypt(&self, blob: &str) -> Result<SecretString, VaultError> {
        let parts: Vec<&str> = blob.trim().split(':').collect();
        if parts.len() != 3 {
            return Err(VaultError::MalformedBlob(format!(
                "expected 3 segments, found {}",
                parts.len()
            )));
        }

        let nonce = decode_segment("nonce", parts[0])?;
        let tag = decode_segment("tag", parts[1])?;
        let ciphertext = decode_segment("ciphertext", parts[2])?;

        if tag.len() != TAG_LEN {
            return Err(VaultError::MalformedBlob(format!(
                "tag must be {TAG_LEN} bytes, found {}",
                tag.len()
            )));
        }

        let mut sealed = ciphertext;
        sealed.extend_from_slice(&tag);

        let plaintext = match nonce.len() {
            12 => Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
                .decrypt(Nonce::from_slice(&nonce), sealed.as_slice()),
            16 => Aes256GcmWideNonce::new(Key::<Aes256GcmWideNonce>::from_slice(&self.key))
                .decrypt(
                    aes_gcm::Nonce::<U16>::from_slice(&nonce),
                    sealed.as_slice(),
                ),
            other => {
                return Err(VaultError::MalformedBlob(format!(
                    "nonce must be 12 or 16 bytes, found {other}"
                )))
            }
        }
        .map_err(|_| VaultError::Decryption)?;

        String::from_utf8(plaintext)
            .map(SecretString::new)
            .map_err(|_| VaultError::InvalidUtf8)
    }
}

fn decode_segment(name: &str, segment: &str) -> Result<Vec<u8>, VaultError> {
    hex::decode(segment)
        .map_err(|e| VaultError::MalformedBlob(format!("{name} is not valid hex: {e}")))
}
