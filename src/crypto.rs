//! Encryption primitives for the mobile leg.
//!
//! Two independent layers live here:
//!
//! - [`SessionCipher`] — the per-session AES-256-GCM AEAD that protects every
//!   frame relayed between bridge and mobile. The key is derived from the
//!   session token with SHA-256, so both ends only need the token.
//! - Token wrapping — X25519 + XSalsa20-Poly1305 (`crypto_box`) used to hand
//!   a session token to one specific paired mobile without the relay ever
//!   seeing it.
//!
//! # Wire formats
//!
//! Session frames: `base64(nonce12 ‖ ciphertext ‖ tag16)`.
//! Wrapped tokens: `hex(nonce24 ‖ ciphertext_with_tag)`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use crypto_box::{aead::Aead as BoxAead, PublicKey, SalsaBox, SecretKey};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Nonce size for AES-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// X25519 key size in bytes.
pub const X25519_KEY_SIZE: usize = 32;

/// Nonce size for the NaCl box construction (192 bits).
pub const BOX_NONCE_SIZE: usize = 24;

/// Per-session AEAD context.
///
/// Rebuilt whenever the session token changes; frames encrypted under the
/// old token become undecryptable and are dropped by the receiver.
pub struct SessionCipher {
    cipher: Aes256Gcm,
    /// Accept plain-base64 frames when AEAD decryption fails. Receive-only
    /// compatibility escape hatch for pre-encryption mobile builds; off
    /// unless the operator passes `--legacy-plaintext`.
    allow_plaintext_fallback: bool,
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher")
            .field("allow_plaintext_fallback", &self.allow_plaintext_fallback)
            .finish_non_exhaustive()
    }
}

impl SessionCipher {
    /// Derive an AEAD context from a session token.
    ///
    /// Key = SHA-256(token), so any 128-bit-entropy token yields a full
    /// AES-256 key.
    #[must_use]
    pub fn new(token: &str, allow_plaintext_fallback: bool) -> Self {
        let key = Sha256::digest(token.as_bytes());
        let cipher =
            Aes256Gcm::new_from_slice(&key).expect("SHA-256 digest is a valid AES-256 key");
        Self {
            cipher,
            allow_plaintext_fallback,
        }
    }

    /// Encrypt a frame. Returns `base64(nonce ‖ ciphertext ‖ tag)` with a
    /// fresh random nonce per call.
    ///
    /// # Errors
    ///
    /// Returns an error if AEAD encryption fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;

        let mut framed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(framed))
    }

    /// Decrypt a `base64(nonce ‖ ciphertext ‖ tag)` frame.
    ///
    /// Rejects blobs shorter than the nonce and any tag mismatch. When the
    /// legacy fallback is enabled, a frame that fails AEAD but decodes as
    /// plain base64 is returned as-is.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid base64, truncated input, or AEAD failure.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let strict = self.decrypt_strict(encoded);
        if strict.is_err() && self.allow_plaintext_fallback {
            if let Ok(plain) = BASE64.decode(encoded) {
                return Ok(plain);
            }
        }
        strict
    }

    fn decrypt_strict(&self, encoded: &str) -> Result<Vec<u8>> {
        let data = BASE64.decode(encoded).context("invalid base64 payload")?;
        if data.len() < NONCE_SIZE {
            anyhow::bail!("ciphertext too short");
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("decryption failed: {e}"))
    }
}

/// Generate a fresh X25519 key pair for the PC identity.
///
/// The private scalar is 32 random bytes; the public key is derived by
/// fixed-base scalar multiplication on curve25519.
#[must_use]
pub fn generate_keypair() -> (SecretKey, PublicKey) {
    let mut scalar = [0u8; X25519_KEY_SIZE];
    rand::rng().fill_bytes(&mut scalar);
    let secret = SecretKey::from(scalar);
    let public = secret.public_key();
    (secret, public)
}

/// Parse a hex-encoded X25519 secret key.
///
/// # Errors
///
/// Returns an error on invalid hex or wrong key size.
pub fn secret_key_from_hex(hex_key: &str) -> Result<SecretKey> {
    Ok(SecretKey::from(key_bytes_from_hex(hex_key)?))
}

/// Parse a hex-encoded X25519 public key.
///
/// # Errors
///
/// Returns an error on invalid hex or wrong key size.
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey> {
    Ok(PublicKey::from(key_bytes_from_hex(hex_key)?))
}

fn key_bytes_from_hex(hex_key: &str) -> Result<[u8; X25519_KEY_SIZE]> {
    let bytes = hex::decode(hex_key).context("invalid hex key")?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("key wrong size: got {}, want 32", b.len()))
}

/// Encrypt a session token for one mobile device using an authenticated box.
///
/// Only the holder of the mobile secret key (verified against the PC public
/// key) can open the result. Wire form is `hex(nonce24 ‖ ciphertext_with_tag)`.
///
/// # Errors
///
/// Returns an error if the mobile public key is malformed or sealing fails.
pub fn wrap_token_for_mobile(
    token: &str,
    mobile_public_key_hex: &str,
    pc_secret: &SecretKey,
) -> Result<String> {
    let mobile_public = public_key_from_hex(mobile_public_key_hex)
        .context("invalid mobile public key")?;

    let mut nonce_bytes = [0u8; BOX_NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = crypto_box::Nonce::from(nonce_bytes);

    let sealed = SalsaBox::new(&mobile_public, pc_secret)
        .encrypt(&nonce, token.as_bytes())
        .map_err(|e| anyhow::anyhow!("token sealing failed: {e}"))?;

    let mut framed = Vec::with_capacity(BOX_NONCE_SIZE + sealed.len());
    framed.extend_from_slice(&nonce_bytes);
    framed.extend_from_slice(&sealed);
    Ok(hex::encode(framed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_roundtrip() {
        let cipher = SessionCipher::new("0123456789abcdef0123456789abcdef", false);
        let plaintext = b"terminal bytes \x1b[2J";

        let frame = cipher.encrypt(plaintext).unwrap();
        assert_eq!(cipher.decrypt(&frame).unwrap(), plaintext);
    }

    #[test]
    fn test_fresh_nonce_per_frame() {
        let cipher = SessionCipher::new("token", false);
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_frame_rejected() {
        let cipher = SessionCipher::new("token", false);
        let frame = cipher.encrypt(b"payload").unwrap();

        let mut raw = BASE64.decode(&frame).unwrap();
        // Flip one bit in every position; none may decrypt
        for i in 0..raw.len() {
            raw[i] ^= 0x01;
            assert!(cipher.decrypt(&BASE64.encode(&raw)).is_err(), "byte {i}");
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn test_short_blob_rejected() {
        let cipher = SessionCipher::new("token", false);
        let short = BASE64.encode([0u8; NONCE_SIZE - 1]);
        assert!(cipher.decrypt(&short).is_err());
    }

    #[test]
    fn test_wrong_token_fails() {
        let a = SessionCipher::new("token-a", false);
        let b = SessionCipher::new("token-b", false);
        let frame = a.encrypt(b"secret").unwrap();
        assert!(b.decrypt(&frame).is_err());
    }

    #[test]
    fn test_plaintext_fallback_off_by_default_path() {
        let strict = SessionCipher::new("token", false);
        let legacy = SessionCipher::new("token", true);
        let plain = BASE64.encode(b"unencrypted mobile build payload");

        assert!(strict.decrypt(&plain).is_err());
        assert_eq!(
            legacy.decrypt(&plain).unwrap(),
            b"unencrypted mobile build payload"
        );
    }

    #[test]
    fn test_keypair_hex_roundtrip() {
        let (secret, public) = generate_keypair();
        let secret_hex = hex::encode(secret.to_bytes());
        let public_hex = hex::encode(public.as_bytes());

        let restored = secret_key_from_hex(&secret_hex).unwrap();
        assert_eq!(restored.public_key().as_bytes(), public.as_bytes());
        assert_eq!(
            public_key_from_hex(&public_hex).unwrap().as_bytes(),
            public.as_bytes()
        );
    }

    #[test]
    fn test_key_from_hex_rejects_bad_input() {
        assert!(secret_key_from_hex("not hex").is_err());
        assert!(secret_key_from_hex("abcd").is_err());
        assert!(public_key_from_hex(&"00".repeat(31)).is_err());
    }

    #[test]
    fn test_wrapped_token_opens_only_for_mobile() {
        let (pc_secret, pc_public) = generate_keypair();
        let (mobile_secret, mobile_public) = generate_keypair();
        let token = "a1b2c3d4e5f60718293a4b5c6d7e8f90";

        let wrapped =
            wrap_token_for_mobile(token, &hex::encode(mobile_public.as_bytes()), &pc_secret)
                .unwrap();

        let raw = hex::decode(&wrapped).unwrap();
        let (nonce_bytes, sealed) = raw.split_at(BOX_NONCE_SIZE);
        let nonce = crypto_box::Nonce::from_slice(nonce_bytes);

        let opened = SalsaBox::new(&pc_public, &mobile_secret)
            .decrypt(nonce, sealed)
            .unwrap();
        assert_eq!(opened, token.as_bytes());

        // A different key pair must not open it
        let (other_secret, _) = generate_keypair();
        assert!(SalsaBox::new(&pc_public, &other_secret)
            .decrypt(nonce, sealed)
            .is_err());
    }

    #[test]
    fn test_wrap_rejects_malformed_public_key() {
        let (pc_secret, _) = generate_keypair();
        assert!(wrap_token_for_mobile("tok", "zz", &pc_secret).is_err());
        assert!(wrap_token_for_mobile("tok", &"00".repeat(16), &pc_secret).is_err());
    }
}
