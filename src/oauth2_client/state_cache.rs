// ABOUTME: Bounded, TTL-evicting in-memory cache of pending upstream OAuth flows
// ABOUTME: Each entry carries a watch channel that resolves once the authorization URL is known
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Upstream Flow Cache
//!
//! Fast path for same-process callbacks. Capacity is bounded by an LRU and
//! every entry expires after a fixed TTL; a periodic sweep drops expired
//! entries even if nobody touches them again.
//!
//! The per-flow `watch` channel is the completion promise: the URL is stored
//! in the channel, so a waiter that subscribes after publication still sees
//! it. Repeated checks for the same user, server and first-tier request find
//! the live flow and subscribe to it instead of starting another one.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};

use super::client::{OAuth2Config, PkceParams};

/// Everything needed to finish an upstream flow
#[derive(Debug, Clone)]
pub struct PendingFlow {
    /// Opaque state sent to the provider
    pub state: String,
    /// User the flow runs for
    pub user_id: String,
    /// Server the token is for
    pub mcp_id: String,
    /// Correlated first-tier request
    pub auth_request_id: Option<String>,
    /// Issuer URL of the provider
    pub authorization_server_url: String,
    /// Client configuration including the secret
    pub config: OAuth2Config,
    /// PKCE parameters
    pub pkce: PkceParams,
}

struct CacheEntry {
    flow: Arc<PendingFlow>,
    auth_url: watch::Sender<Option<String>>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Receiver side of a flow's authorization-URL promise
pub type AuthUrlReceiver = watch::Receiver<Option<String>>;

/// Bounded TTL cache of pending flows
pub struct UpstreamStateCache {
    store: RwLock<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl UpstreamStateCache {
    const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
        Some(n) => n,
        None => unreachable!(),
    };

    /// Create a cache holding at most `capacity` flows for `ttl` each
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(Self::DEFAULT_CAPACITY);
        Self {
            store: RwLock::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Insert a flow and return the receiver of its authorization URL
    ///
    /// The least recently used flow is evicted when the cache is full.
    pub async fn insert(&self, flow: PendingFlow) -> AuthUrlReceiver {
        let (auth_url, receiver) = watch::channel(None);
        let entry = CacheEntry {
            flow: Arc::new(flow),
            auth_url,
            expires_at: Instant::now() + self.ttl,
        };
        let state = entry.flow.state.clone();
        if let Some((evicted, _)) = self.store.write().await.push(state.clone(), entry) {
            if evicted != state {
                tracing::debug!(state = %evicted, "Evicted pending upstream flow at capacity");
            }
        }
        receiver
    }

    /// State of a live flow already running for this user, server and first-tier request
    pub async fn find_flow(
        &self,
        user_id: &str,
        mcp_id: &str,
        auth_request_id: Option<&str>,
    ) -> Option<String> {
        let store = self.store.read().await;
        store
            .iter()
            .find(|(_, entry)| {
                !entry.is_expired()
                    && entry.flow.user_id == user_id
                    && entry.flow.mcp_id == mcp_id
                    && entry.flow.auth_request_id.as_deref() == auth_request_id
            })
            .map(|(state, _)| state.clone())
    }

    /// Remove and return the live flow for `state`
    pub async fn take(&self, state: &str) -> Option<Arc<PendingFlow>> {
        self.store
            .write()
            .await
            .pop(state)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.flow)
    }

    /// Resolve the flow's promise; returns whether the flow was cached
    pub async fn publish_auth_url(&self, state: &str, url: &str) -> bool {
        let store = self.store.read().await;
        store.peek(state).is_some_and(|entry| {
            entry.auth_url.send_replace(Some(url.to_owned()));
            true
        })
    }

    /// New receiver for a cached flow's promise
    pub async fn subscribe(&self, state: &str) -> Option<AuthUrlReceiver> {
        let store = self.store.read().await;
        store
            .peek(state)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.auth_url.subscribe())
    }

    /// Drop expired entries, returning how many were removed
    pub async fn remove_expired(&self) -> usize {
        let mut store = self.store.write().await;
        let expired: Vec<String> = store
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(state, _)| state.clone())
            .collect();
        for state in &expired {
            store.pop(state);
        }
        expired.len()
    }

    /// Number of cached flows, expired or not
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    /// Whether the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }
}
