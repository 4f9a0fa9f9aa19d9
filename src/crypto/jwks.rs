// ABOUTME: Vault-backed signing key lifecycle with lazy loading and manual rotation
// ABOUTME: Publishes the JWKS document consumed by third-party token verifiers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # JWKS Management
//!
//! The signing key is generated once and persisted through the credential
//! vault. It is loaded lazily under a read/write lock on first use, so any
//! number of gateway instances sharing a vault sign with the same key.
//!
//! After [`JwksManager::replace_key`] the previous public key stays in the
//! published set (and is accepted for verification) until the next
//! replacement, so tokens minted moments before a rotation remain valid for
//! their short lifetime.

use std::iter;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::keys::{Ed25519KeyPair, JsonWebKeySet};
use crate::constants::vault::{SIGNING_KEY_CONTEXT, SIGNING_KEY_NAME};
use crate::errors::{AppError, AppResult};
use crate::vault::CredentialVault;

struct KeyRing {
    active: Ed25519KeyPair,
    previous: Option<Ed25519KeyPair>,
}

/// JWKS manager for key lifecycle management
pub struct JwksManager {
    vault: Arc<dyn CredentialVault>,
    ring: RwLock<Option<KeyRing>>,
}

impl JwksManager {
    /// Create a manager; nothing is loaded until first use
    #[must_use]
    pub fn new(vault: Arc<dyn CredentialVault>) -> Self {
        Self {
            vault,
            ring: RwLock::new(None),
        }
    }

    /// Load the persisted key, generating and persisting one if none exists
    async fn ensure_loaded(&self) -> AppResult<()> {
        if self.ring.read().await.is_some() {
            return Ok(());
        }

        let mut ring = self.ring.write().await;
        if ring.is_some() {
            return Ok(());
        }

        let contexts = [SIGNING_KEY_CONTEXT.to_owned()];
        let active = match self.vault.reveal(&contexts, SIGNING_KEY_NAME).await? {
            Some(credential) => {
                let pair = Ed25519KeyPair::from_credential(&credential)?;
                info!(kid = %pair.kid, "Loaded token signing key from vault");
                pair
            }
            None => {
                let pair = Ed25519KeyPair::generate();
                self.vault
                    .create(pair.to_credential(SIGNING_KEY_CONTEXT, SIGNING_KEY_NAME))
                    .await?;
                info!(kid = %pair.kid, "Generated and stored new token signing key");
                pair
            }
        };

        *ring = Some(KeyRing {
            active,
            previous: None,
        });
        Ok(())
    }

    /// Key currently used for signing
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be loaded from or stored in the vault
    pub async fn active_key(&self) -> AppResult<Ed25519KeyPair> {
        self.ensure_loaded().await?;
        let ring = self.ring.read().await;
        ring.as_ref()
            .map(|ring| ring.active.clone())
            .ok_or_else(|| AppError::internal("Signing key not loaded"))
    }

    /// Published key with the given id
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be loaded from the vault
    pub async fn key_for(&self, kid: &str) -> AppResult<Option<Ed25519KeyPair>> {
        self.ensure_loaded().await?;
        let ring = self.ring.read().await;
        Ok(ring.as_ref().and_then(|ring| {
            iter::once(&ring.active)
                .chain(ring.previous.as_ref())
                .find(|pair| pair.kid == kid)
                .cloned()
        }))
    }

    /// Public verification key set
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be loaded from the vault
    pub async fn jwks(&self) -> AppResult<JsonWebKeySet> {
        self.ensure_loaded().await?;
        let ring = self.ring.read().await;
        Ok(JsonWebKeySet {
            keys: ring
                .as_ref()
                .map(|ring| {
                    iter::once(&ring.active)
                        .chain(ring.previous.as_ref())
                        .map(Ed25519KeyPair::to_jwk)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Replace the signing key and republish the key set
    ///
    /// Returns the new key id.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault rejects the new key
    pub async fn replace_key(&self) -> AppResult<String> {
        self.ensure_loaded().await?;
        let mut ring = self.ring.write().await;

        let replacement = Ed25519KeyPair::generate();
        self.vault
            .delete(SIGNING_KEY_CONTEXT, SIGNING_KEY_NAME)
            .await?;
        self.vault
            .create(replacement.to_credential(SIGNING_KEY_CONTEXT, SIGNING_KEY_NAME))
            .await?;

        let kid = replacement.kid.clone();
        let previous = ring.take().map(|old| old.active);
        if let Some(old) = &previous {
            info!(old_kid = %old.kid, new_kid = %kid, "Replaced token signing key");
        }
        *ring = Some(KeyRing {
            active: replacement,
            previous,
        });
        Ok(kid)
    }
}
