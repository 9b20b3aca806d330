//! Per-audience token cache.
//!
//! The reconciler asks for a token for every remote call. Without a cache
//! that is two token requests per cycle; with it, AAD is only contacted
//! once a token is within [`DEFAULT_EXPIRY_SKEW_SECS`] of expiring.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use vaultsync_core::{Audience, RemoteError, Token, TokenProvider};

/// Tokens this close to expiry are refreshed rather than reused.
pub const DEFAULT_EXPIRY_SKEW_SECS: i64 = 60;

pub struct CachingTokenProvider {
    inner: Arc<dyn TokenProvider>,
    skew: ChronoDuration,
    tokens: Mutex<HashMap<Audience, Token>>,
}

impl CachingTokenProvider {
    pub fn new(inner: Arc<dyn TokenProvider>) -> Self {
        Self::with_skew(inner, ChronoDuration::seconds(DEFAULT_EXPIRY_SKEW_SECS))
    }

    pub fn with_skew(inner: Arc<dyn TokenProvider>, skew: ChronoDuration) -> Self {
        Self {
            inner,
            skew,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Drop every cached token.
    pub async fn clear(&self) {
        self.tokens.lock().await.clear();
    }
}

#[async_trait]
impl TokenProvider for CachingTokenProvider {
    async fn acquire(&self, audience: Audience) -> Result<Token, RemoteError> {
        // Held across the refresh so concurrent callers wait for one request.
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.get(&audience) {
            if !token.expires_within(Utc::now(), self.skew) {
                tracing::trace!(%audience, "token cache hit");
                return Ok(token.clone());
            }
        }

        let token = self.inner.acquire(audience).await?;
        tracing::debug!(%audience, expires_at = %token.expires_at, "token refreshed");
        tokens.insert(audience, token.clone());
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        lifetime: ChronoDuration,
        fail: bool,
    }

    impl CountingProvider {
        fn new(lifetime: ChronoDuration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                lifetime,
                fail: false,
            })
        }
    }

    #[async_trait]
    impl TokenProvider for CountingProvider {
        async fn acquire(&self, audience: Audience) -> Result<Token, RemoteError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RemoteError::Transient {
                    status: Some(503),
                    message: "aad down".to_string(),
                });
            }
            Ok(Token {
                value: format!("token-{n}"),
                audience,
                expires_at: Utc::now() + self.lifetime,
            })
        }
    }

    #[tokio::test]
    async fn fresh_token_is_reused_per_audience() {
        let inner = CountingProvider::new(ChronoDuration::hours(1));
        let cache = CachingTokenProvider::new(inner.clone());

        let a = cache.acquire(Audience::Management).await.unwrap();
        let b = cache.acquire(Audience::Management).await.unwrap();
        let c = cache.acquire(Audience::Data).await.unwrap();

        assert_eq!(a.value, b.value);
        assert_ne!(a.value, c.value);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn token_inside_skew_is_refreshed() {
        let inner = CountingProvider::new(ChronoDuration::seconds(30));
        let cache = CachingTokenProvider::new(inner.clone());

        cache.acquire(Audience::Data).await.unwrap();
        cache.acquire(Audience::Data).await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clear_forces_refresh() {
        let inner = CountingProvider::new(ChronoDuration::hours(1));
        let cache = CachingTokenProvider::new(inner.clone());

        cache.acquire(Audience::Data).await.unwrap();
        cache.clear().await;
        cache.acquire(Audience::Data).await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let inner = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            lifetime: ChronoDuration::hours(1),
            fail: true,
        });
        let cache = CachingTokenProvider::new(inner.clone());

        assert!(cache.acquire(Audience::Data).await.is_err());
        assert!(cache.acquire(Audience::Data).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
