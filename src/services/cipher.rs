// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Token encryption at rest.
//!
//! AES-256-GCM with a key derived by HKDF-SHA256 from the configured secret.
//! The athlete ID is bound as additional authenticated data, so a ciphertext
//! moved to another athlete's row fails to decrypt.
//!
//! Stored format: base64(nonce || ciphertext || tag).

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use hkdf::Hkdf;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;

use crate::error::AppError;

const HKDF_SALT: &[u8] = b"pace-pipeline token encryption";
const HKDF_INFO: &[u8] = b"strava-tokens-aes256gcm-v1";

/// Encrypts and decrypts OAuth tokens.
#[derive(Clone)]
pub struct TokenCipher {
    key: Arc<LessSafeKey>,
    rng: SystemRandom,
}

impl TokenCipher {
    /// Derive the encryption key from `secret`.
    pub fn new(secret: &[u8]) -> Result<Self, AppError> {
        if secret.is_empty() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "token encryption secret is empty"
            )));
        }

        let mut key_bytes = [0u8; 32];
        Hkdf::<Sha256>::new(Some(HKDF_SALT), secret)
            .expand(HKDF_INFO, &mut key_bytes)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HKDF expand failed: {}", e)))?;

        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("invalid AES key length")))?;

        Ok(Self {
            key: Arc::new(LessSafeKey::new(unbound)),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt a token for `athlete_id`.
    pub fn encrypt(&self, athlete_id: i64, plaintext: &str) -> Result<String, AppError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("failed to generate nonce")))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(athlete_id.to_be_bytes()),
                &mut in_out,
            )
            .map_err(|_| AppError::Internal(anyhow::anyhow!("token encryption failed")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(STANDARD.encode(out))
    }

    /// Decrypt a token stored for `athlete_id`.
    pub fn decrypt(&self, athlete_id: i64, encoded: &str) -> Result<String, AppError> {
        let data = STANDARD
            .decode(encoded)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("token is not base64: {}", e)))?;

        if data.len() < NONCE_LEN {
            return Err(AppError::Internal(anyhow::anyhow!("token ciphertext too short")));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);

        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("invalid nonce")))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(athlete_id.to_be_bytes()), &mut in_out)
            .map_err(|_| {
                AppError::Internal(anyhow::anyhow!(
                    "token decryption failed for athlete {}",
                    athlete_id
                ))
            })?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("token is not UTF-8: {}", e)))
    }
}
