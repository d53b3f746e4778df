//! # Optional Payload Encryption
//!
//! Symmetric encryption of the encoded frame, keyed by a shared secret.
//! The key schedule is a single SHA-256 of the secret string; the random
//! nonce is prepended to the ciphertext so the envelope stays
//! self-contained.
//!
//! LANBus only promises confidentiality here: the origin tag stays in
//! plaintext, there is no replay protection, and callers should not treat
//! the bus as tamper-resistant. When no secret is configured both
//! directions are exact pass-throughs and the bus runs fully unencrypted.

use std::str::FromStr;

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{ConfigError, EmitterError};

/// Supported symmetric ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherKind {
    /// XChaCha20-Poly1305 (default): 192-bit nonce, constant-time ARX design.
    #[default]
    XChaCha20Poly1305,
    /// AES-256-GCM: 96-bit nonce, use with AES-NI hardware acceleration.
    Aes256Gcm,
}

impl CipherKind {
    /// Canonical identifier, accepted back by [`FromStr`].
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::XChaCha20Poly1305 => "xchacha20-poly1305",
            Self::Aes256Gcm => "aes-256-gcm",
        }
    }

    fn nonce_len(self) -> usize {
        match self {
            Self::XChaCha20Poly1305 => 24,
            Self::Aes256Gcm => 12,
        }
    }
}

impl FromStr for CipherKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xchacha20-poly1305" => Ok(Self::XChaCha20Poly1305),
            "aes-256-gcm" => Ok(Self::Aes256Gcm),
            other => Err(ConfigError::UnknownCipher(other.to_owned())),
        }
    }
}

/// Derive the 256-bit cipher key from the shared secret.
fn derive_key(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}

/// Encrypt `plaintext` when a secret is configured; identity otherwise.
///
/// Output layout: `nonce || ciphertext`.
pub fn apply(
    plaintext: &[u8],
    secret: Option<&str>,
    kind: CipherKind,
) -> Result<Vec<u8>, EmitterError> {
    let Some(secret) = secret else {
        return Ok(plaintext.to_vec());
    };

    let key = derive_key(secret);
    let mut nonce = vec![0u8; kind.nonce_len()];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = match kind {
        CipherKind::XChaCha20Poly1305 => XChaCha20Poly1305::new((&key).into())
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| EmitterError::Decrypt(e.to_string()))?,
        CipherKind::Aes256Gcm => Aes256Gcm::new((&key).into())
            .encrypt(aes_gcm::Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| EmitterError::Decrypt(e.to_string()))?,
    };

    let mut out = nonce;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`apply`]; identity when no secret is configured.
///
/// Fails with [`EmitterError::Decrypt`] on a truncated envelope or a
/// key/ciphertext mismatch.
pub fn remove(
    bytes: &[u8],
    secret: Option<&str>,
    kind: CipherKind,
) -> Result<Vec<u8>, EmitterError> {
    let Some(secret) = secret else {
        return Ok(bytes.to_vec());
    };

    let nonce_len = kind.nonce_len();
    if bytes.len() < nonce_len {
        return Err(EmitterError::Decrypt(format!(
            "ciphertext shorter than {nonce_len}-byte nonce"
        )));
    }
    let (nonce, ciphertext) = bytes.split_at(nonce_len);

    let key = derive_key(secret);
    match kind {
        CipherKind::XChaCha20Poly1305 => XChaCha20Poly1305::new((&key).into())
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|e| EmitterError::Decrypt(e.to_string())),
        CipherKind::Aes256Gcm => Aes256Gcm::new((&key).into())
            .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| EmitterError::Decrypt(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_xchacha20() {
        let plain = b"named event payload";
        let sealed = apply(plain, Some("hunter2"), CipherKind::XChaCha20Poly1305).unwrap();
        assert_ne!(&sealed, plain);
        let opened = remove(&sealed, Some("hunter2"), CipherKind::XChaCha20Poly1305).unwrap();
        assert_eq!(opened, plain);
    }

    #[test]
    fn roundtrip_aes_gcm() {
        let plain = b"named event payload";
        let sealed = apply(plain, Some("hunter2"), CipherKind::Aes256Gcm).unwrap();
        let opened = remove(&sealed, Some("hunter2"), CipherKind::Aes256Gcm).unwrap();
        assert_eq!(opened, plain);
    }

    #[test]
    fn no_secret_is_identity_both_ways() {
        let plain = b"unencrypted operation";
        let out = apply(plain, None, CipherKind::default()).unwrap();
        assert_eq!(out, plain);
        let back = remove(&out, None, CipherKind::default()).unwrap();
        assert_eq!(back, plain);
    }

    #[test]
    fn wrong_secret_fails() {
        let sealed = apply(b"secret", Some("right"), CipherKind::default()).unwrap();
        let err = remove(&sealed, Some("wrong"), CipherKind::default()).unwrap_err();
        assert!(matches!(err, EmitterError::Decrypt(_)));
    }

    #[test]
    fn truncated_envelope_fails() {
        let err = remove(&[1, 2, 3], Some("s"), CipherKind::default()).unwrap_err();
        assert!(matches!(err, EmitterError::Decrypt(_)));
    }

    #[test]
    fn nonces_differ_between_envelopes() {
        let a = apply(b"x", Some("s"), CipherKind::default()).unwrap();
        let b = apply(b"x", Some("s"), CipherKind::default()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn cipher_names_roundtrip() {
        for kind in [CipherKind::XChaCha20Poly1305, CipherKind::Aes256Gcm] {
            assert_eq!(kind.name().parse::<CipherKind>().unwrap(), kind);
        }
        assert!(matches!(
            "rot13".parse::<CipherKind>(),
            Err(ConfigError::UnknownCipher(_))
        ));
    }
}
