// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ed25519 key handling for partner URL signing.
//!
//! Keys travel as base64 of their raw 32 bytes. Signatures are base64 of the
//! raw 64-byte signature.

use base64ct::{Base64, Encoding};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("private key is not valid base64")]
    InvalidEncoding,

    #[error("private key must be 32 bytes, found {0}")]
    InvalidLength(usize),
}

/// Freshly generated Ed25519 key pair.
#[derive(Debug)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: SecretString,
}

/// Generate a new key pair from the OS RNG.
pub fn generate_key_pair() -> KeyPair {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    let signing_key = SigningKey::from_bytes(&seed);

    KeyPair {
        public_key: Base64::encode_string(signing_key.verifying_key().as_bytes()),
        private_key: SecretString::new(Base64::encode_string(&signing_key.to_bytes())),
    }
}

/// Sign `message` with a base64 private key, returning a base64 signature.
pub fn sign(message: &str, private_key: &SecretString) -> Result<String, SigningError> {
    let signing_key = decode_private_key(private_key)?;
    let signature = signing_key.sign(message.as_bytes());
    Ok(Base64::encode_string(&signature.to_bytes()))
}

/// Verify a base64 signature against a base64 public key.
///
/// Any decoding problem is treated as a failed verification.
pub fn verify(message: &str, signature: &str, public_key: &str) -> bool {
    let Ok(key_bytes) = Base64::decode_vec(public_key.trim()) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };

    let Ok(sig_bytes) = Base64::decode_vec(signature.trim()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };

    verifying_key.verify(message.as_bytes(), &signature).is_ok()
}

/// Derive the base64 public key for a base64 private key.
pub fn public_key_for(private_key: &SecretString) -> Result<String, SigningError> {
    let signing_key = decode_private_key(private_key)?;
    Ok(Base64::encode_string(signing_key.verifying_key().as_bytes()))
}

fn decode_private_key(private_key: &SecretString) -> Result<SigningKey, SigningError> {
    let bytes = Base64::decode_vec(private_key.expose_secret().trim())
        .map_err(|_| SigningError::InvalidEncoding)?;
    let seed = <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| SigningError::InvalidLength(bytes.len()))?;
    Ok(SigningKey::from_bytes(&seed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verifies_with_matching_public_key() {
        let pair = generate_key_pair();
        let sig = sign("bid_id=42&user_id=u1", &pair.private_key).unwrap();
        assert!(verify("bid_id=42&user_id=u1", &sig, &pair.public_key));
    }

    #[test]
    fn generated_keys_are_32_bytes_base64() {
        let pair = generate_key_pair();
        assert_eq!(Base64::decode_vec(&pair.public_key).unwrap().len(), 32);
        assert_eq!(
            Base64::decode_vec(pair.private_key.expose_secret())
                .unwrap()
                .len(),
            32
        );
    }

    #[test]
    fn signing_is_deterministic() {
        let pair = generate_key_pair();
        let a = sign("status=complete", &pair.private_key).unwrap();
        let b = sign("status=complete", &pair.private_key).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn altered_message_fails_verification() {
        let pair = generate_key_pair();
        let sig = sign("interview_cost=250", &pair.private_key).unwrap();
        assert!(!verify("interview_cost=251", &sig, &pair.public_key));
    }

    #[test]
    fn other_key_fails_verification() {
        let pair = generate_key_pair();
        let other = generate_key_pair();
        let sig = sign("message", &pair.private_key).unwrap();
        assert!(!verify("message", &sig, &other.public_key));
    }

    #[test]
    fn garbage_inputs_return_false() {
        let pair = generate_key_pair();
        let sig = sign("message", &pair.private_key).unwrap();

        assert!(!verify("message", "not base64 !!", &pair.public_key));
        assert!(!verify("message", "AAAA", &pair.public_key));
        assert!(!verify("message", &sig, "not a key"));
        assert!(!verify("message", &sig, "AAAA"));
        assert!(!verify("message", "", ""));
    }

    #[test]
    fn public_key_is_derivable_from_private_key() {
        let pair = generate_key_pair();
        assert_eq!(public_key_for(&pair.private_key).unwrap(), pair.public_key);
    }

    #[test]
    fn malformed_private_key_is_an_error() {
        let bad = SecretString::new("%%%".to_string());
        assert!(matches!(sign("m", &bad), Err(SigningError::InvalidEncoding)));

        let short = SecretString::new(Base64::encode_string(&[1u8; 16]));
        assert!(matches!(sign("m", &short), Err(SigningError::InvalidLength(16))));
    }
}
