// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Application token acquisition and caching.
//!
//! The identity server only answers principal-facing calls that carry a
//! valid application token. The token is acquired lazily on first use and
//! kept for the life of the manager. Its expiry policy is unknown to us, so
//! there is no time-based refresh: callers report a rejected token through
//! [`ApplicationTokenManager::refresh`].
//!
//! ## Single-flight
//!
//! Acquisition and refresh both run under the write lock and re-check the
//! cache once the lock is held. When many requests discover the same stale
//! token at once, the first one re-authenticates and the rest find the
//! replacement already cached.
//!
//! Failures are shared the same way. Every finished attempt bumps a
//! generation counter, and a failed attempt is stored with its generation.
//! A caller that read the counter before that attempt finished receives the
//! stored error instead of queueing another remote call, so N waiters cost
//! one call and one timeout, not N in series.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::error::AuthError;
use crate::config::{BrokerConfig, Secret};
use crate::transport::{with_timeout, ApplicationToken, FaultKind, IdentityTransport};

/// Cached application token.
struct CacheEntry {
    token: ApplicationToken,
    acquired_at: Instant,
}

#[derive(Default)]
struct TokenCache {
    entry: Option<CacheEntry>,
    /// Error of the latest attempt, if it failed, with that attempt's generation.
    last_failure: Option<(u64, AuthError)>,
}

impl TokenCache {
    /// Failure of an attempt that finished after `seen` was read.
    fn failure_since(&self, seen: u64) -> Option<AuthError> {
        match &self.last_failure {
            Some((generation, err)) if *generation > seen => Some(err.clone()),
            _ => None,
        }
    }
}

/// Owner of the application trust token.
pub struct ApplicationTokenManager {
    transport: Arc<dyn IdentityTransport>,
    application_name: String,
    credential: Secret,
    call_timeout: Duration,
    cache: RwLock<TokenCache>,
    /// Number of finished acquisition attempts.
    generation: AtomicU64,
}

impl ApplicationTokenManager {
    pub fn new(transport: Arc<dyn IdentityTransport>, config: &BrokerConfig) -> Self {
        Self {
            transport,
            application_name: config.application_name.clone(),
            credential: config.application_credential.clone(),
            call_timeout: config.call_timeout,
            cache: RwLock::new(TokenCache::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Authenticate the application with the identity server.
    ///
    /// Does not touch the cache; use [`token`](Self::token) for the cached path.
    pub async fn acquire(&self) -> Result<ApplicationToken, AuthError> {
        let result = with_timeout(
            self.call_timeout,
            self.transport
                .authenticate_application(&self.application_name, self.credential.expose()),
        )
        .await;

        match result {
            Ok(Some(token)) if !token.is_blank() => {
                info!(application = %self.application_name, "Application token acquired");
                Ok(token)
            }
            Ok(_) => {
                warn!(
                    application = %self.application_name,
                    "Identity server returned no application token"
                );
                Err(AuthError::InvalidCredentials)
            }
            Err(err) if err.fault_kind() == Some(FaultKind::InvalidCredentials) => {
                error!(
                    application = %self.application_name,
                    error = %err,
                    "Application credentials rejected, check IDENTITY_APP_CREDENTIAL"
                );
                Err(err.into())
            }
            Err(err) => {
                warn!(
                    application = %self.application_name,
                    fault_code = err.remote_fault().map(|f| f.code.as_str()),
                    error = %err,
                    "Application authentication failed"
                );
                Err(err.into())
            }
        }
    }

    /// Current token, acquiring one if none is cached.
    pub async fn token(&self) -> Result<ApplicationToken, AuthError> {
        let seen = self.generation.load(Ordering::SeqCst);
        {
            let cache = self.cache.read().await;
            if let Some(entry) = &cache.entry {
                return Ok(entry.token.clone());
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(entry) = &cache.entry {
            return Ok(entry.token.clone());
        }
        if let Some(err) = cache.failure_since(seen) {
            return Err(err);
        }
        self.acquire_into(&mut cache).await
    }

    /// Replace `rejected` with a fresh token.
    ///
    /// If another caller already replaced it, the cached replacement is
    /// returned without contacting the server; if another caller's attempt
    /// failed meanwhile, its error is returned. A failed refresh clears the
    /// cache so the rejected token is not handed out again.
    pub async fn refresh(&self, rejected: &ApplicationToken) -> Result<ApplicationToken, AuthError> {
        let seen = self.generation.load(Ordering::SeqCst);
        let mut cache = self.cache.write().await;
        match &cache.entry {
            Some(entry) if &entry.token != rejected => return Ok(entry.token.clone()),
            Some(_) => {}
            None => {
                if let Some(err) = cache.failure_since(seen) {
                    return Err(err);
                }
            }
        }

        info!(application = %self.application_name, "Refreshing rejected application token");
        self.acquire_into(&mut cache).await
    }

    /// One acquisition attempt under the write lock; records its outcome.
    async fn acquire_into(&self, cache: &mut TokenCache) -> Result<ApplicationToken, AuthError> {
        let result = self.acquire().await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        match result {
            Ok(token) => {
                cache.entry = Some(CacheEntry {
                    token: token.clone(),
                    acquired_at: Instant::now(),
                });
                cache.last_failure = None;
                Ok(token)
            }
            Err(err) => {
                cache.entry = None;
                cache.last_failure = Some((generation, err.clone()));
                Err(err)
            }
        }
    }

    /// Drop the cached token; the next [`token`](Self::token) call re-authenticates.
    pub async fn invalidate(&self) {
        self.cache.write().await.entry = None;
    }

    /// Check if a token is currently cached.
    pub async fn is_cached(&self) -> bool {
        self.cache.read().await.entry.is_some()
    }

    /// Age of the cached token, if any.
    pub async fn token_age(&self) -> Option<Duration> {
        self.cache
            .read()
            .await
            .entry
            .as_ref()
            .map(|entry| entry.acquired_at.elapsed())
    }
}
