// ABOUTME: Credential vault abstraction for secrets addressed by opaque context strings
// ABOUTME: Holds the signing key, upstream app secrets, PKCE verifiers and upstream tokens
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Credential Vault
//!
//! Secrets are stored as small string maps (`env`) under a `(context, name)`
//! pair. `reveal` accepts several contexts and returns the first match, so a
//! caller can look a secret up in a scoped context before a shared one.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use zeroize::Zeroize;

use crate::errors::{AppError, AppResult};

/// A stored secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Opaque context the secret belongs to
    pub context: String,
    /// Secret name within the context
    pub name: String,
    /// Secret values
    pub env: HashMap<String, String>,
}

impl Credential {
    /// Build a credential
    #[must_use]
    pub fn new(context: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            name: name.into(),
            env: HashMap::new(),
        }
    }

    /// Add a value
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Required value
    ///
    /// # Errors
    ///
    /// Returns a storage error if the key is absent
    pub fn value(&self, key: &str) -> AppResult<&str> {
        self.env.get(key).map(String::as_str).ok_or_else(|| {
            AppError::storage(format!(
                "credential {}/{} has no {key} value",
                self.context, self.name
            ))
        })
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        for value in self.env.values_mut() {
            value.zeroize();
        }
    }
}

/// Narrow credential-vault interface
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// First credential named `name` found in `context_ids`, in order
    async fn reveal(&self, context_ids: &[String], name: &str) -> AppResult<Option<Credential>>;

    /// Store a credential, replacing any previous one with the same address
    async fn create(&self, credential: Credential) -> AppResult<()>;

    /// Delete a credential, returning whether it existed
    async fn delete(&self, context: &str, name: &str) -> AppResult<bool>;
}

/// In-memory [`CredentialVault`]
#[derive(Default)]
pub struct MemoryVault {
    credentials: DashMap<(String, String), Credential>,
}

impl MemoryVault {
    /// Create an empty vault
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialVault for MemoryVault {
    async fn reveal(&self, context_ids: &[String], name: &str) -> AppResult<Option<Credential>> {
        Ok(context_ids.iter().find_map(|context| {
            self.credentials
                .get(&(context.clone(), name.to_owned()))
                .map(|entry| entry.value().clone())
        }))
    }

    async fn create(&self, credential: Credential) -> AppResult<()> {
        let key = (credential.context.clone(), credential.name.clone());
        self.credentials.insert(key, credential);
        Ok(())
    }

    async fn delete(&self, context: &str, name: &str) -> AppResult<bool> {
        Ok(self
            .credentials
            .remove(&(context.to_owned(), name.to_owned()))
            .is_some())
    }
}
