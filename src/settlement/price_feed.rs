//! Time-bounded memoization of reference prices.
//!
//! The cache belongs to the price-feed boundary, not to the matcher or the
//! coordinator. Entries live for a short TTL so the reference price stays
//! "fair at execution" while bursts of settlements share one upstream call.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::settlement::collaborators::{BookTicker, CollaboratorError, PriceOracle};

/// Wraps a [`PriceOracle`] with a per-symbol TTL cache.
pub struct CachedPriceOracle<O> {
    inner: O,
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, BookTicker)>>,
}

impl<O: PriceOracle> CachedPriceOracle<O> {
    pub fn new(inner: O, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }
}

#[async_trait]
impl<O: PriceOracle> PriceOracle for CachedPriceOracle<O> {
    async fn book_ticker(&self, symbol: &str) -> Result<BookTicker, CollaboratorError> {
        {
            let entries = self.entries.lock().await;
            if let Some((at, ticker)) = entries.get(symbol) {
                if at.elapsed() < self.ttl {
                    debug!(symbol, "reference price served from cache");
                    return Ok(*ticker);
                }
            }
        }

        // Errors are never cached
        let ticker = self.inner.book_ticker(symbol).await?;
        self.entries
            .lock()
            .await
            .insert(symbol.to_string(), (Instant::now(), ticker));
        Ok(ticker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PriceOracle for Counting {
        async fn book_ticker(&self, symbol: &str) -> Result<BookTicker, CollaboratorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if symbol == "DOWN" {
                return Err(CollaboratorError::Unreachable("feed offline".into()));
            }
            let p = Decimal::from(100 + n as i64);
            Ok(BookTicker::new(p, p))
        }
    }

    fn counting() -> Counting {
        Counting {
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_cache_hit_within_ttl() {
        let oracle = CachedPriceOracle::new(counting(), Duration::from_secs(60));
        let a = oracle.book_ticker("ZUSDT").await.unwrap();
        let b = oracle.book_ticker("ZUSDT").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(oracle.inner().calls.load(Ordering::SeqCst), 1);

        // Separate symbols, separate entries
        oracle.book_ticker("YUSDT").await.unwrap();
        assert_eq!(oracle.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refetch_after_ttl() {
        let oracle = CachedPriceOracle::new(counting(), Duration::ZERO);
        let a = oracle.book_ticker("ZUSDT").await.unwrap();
        let b = oracle.book_ticker("ZUSDT").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(oracle.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_not_cached() {
        let oracle = CachedPriceOracle::new(counting(), Duration::from_secs(60));
        assert!(oracle.book_ticker("DOWN").await.is_err());
        assert!(oracle.book_ticker("DOWN").await.is_err());
        assert_eq!(oracle.inner().calls.load(Ordering::SeqCst), 2);
    }
}
