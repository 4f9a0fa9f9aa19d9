// ABOUTME: PKCE (RFC 7636) challenge verification for the token endpoint
// ABOUTME: Supports S256 and plain, compared in constant time
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::constants::oauth::{PKCE_METHOD_PLAIN, PKCE_METHOD_S256, SUPPORTED_PKCE_METHODS};

/// Whether `method` is an advertised challenge method
#[must_use]
pub fn is_supported_method(method: &str) -> bool {
    SUPPORTED_PKCE_METHODS.contains(&method)
}

/// `base64url(SHA256(verifier))` without padding
#[must_use]
pub fn s256_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(hash)
}

/// Check `verifier` against the stored `challenge`
///
/// A missing method means `plain` (RFC 7636 Section 4.3). Unknown methods
/// never verify.
#[must_use]
pub fn verify_challenge(verifier: &str, challenge: &str, method: Option<&str>) -> bool {
    let computed = match method.unwrap_or(PKCE_METHOD_PLAIN) {
        PKCE_METHOD_S256 => s256_challenge(verifier),
        PKCE_METHOD_PLAIN => verifier.to_owned(),
        _ => return false,
    };
    computed.as_bytes().ct_eq(challenge.as_bytes()).into()
}
