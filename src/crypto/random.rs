// ABOUTME: Secure random values and one-way hashes for codes, secrets and opaque tokens
// ABOUTME: Backed by ring's SystemRandom; an RNG failure is a hard error, never a fallback
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

use crate::errors::{AppError, AppResult};

/// URL-safe base64 of `length` random bytes
///
/// # Errors
///
/// Returns an error if the system RNG fails
pub fn random_token(length: usize) -> AppResult<String> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; length];

    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!(error = ?e, "CRITICAL: SystemRandom failed - cannot generate secure random bytes");
        AppError::internal("System RNG failure - server cannot operate securely")
    })?;

    Ok(URL_SAFE_NO_PAD.encode(&bytes))
}

/// Hex SHA-256 of a one-time code or refresh token, used as its lookup key
#[must_use]
pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_tokens_are_distinct_and_url_safe() {
        let a = random_token(32).unwrap();
        let b = random_token(32).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
