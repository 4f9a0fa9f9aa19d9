// ABOUTME: Cryptography module for token signing keys and the published key set
// ABOUTME: Centralizes Ed25519 key material and its vault-backed lifecycle
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Cryptographic utilities for the MCP OAuth gateway

/// Vault-backed signing key lifecycle and JWKS publication
pub mod jwks;
/// Ed25519 key material
pub mod keys;
/// Random tokens and lookup hashes
pub mod random;

pub use jwks::JwksManager;
pub use keys::{Ed25519KeyPair, JsonWebKey, JsonWebKeySet};
pub use random::{random_token, sha256_hex};
