// ABOUTME: Optional check that the auth-provider session behind a grant is still alive
// ABOUTME: Consulted on every code redemption and refresh when a provider reference is bound
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use async_trait::async_trait;

use crate::errors::AppResult;
use crate::models::AuthProviderRef;

/// Decides whether a user's session at an auth provider is still valid
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// `false` revokes the grant being redeemed
    async fn is_session_valid(&self, user_id: &str, provider: &AuthProviderRef) -> AppResult<bool>;
}

/// Validator for deployments without provider session tracking
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllSessions;

#[async_trait]
impl SessionValidator for AcceptAllSessions {
    async fn is_session_valid(&self, _user_id: &str, _provider: &AuthProviderRef) -> AppResult<bool> {
        Ok(true)
    }
}
