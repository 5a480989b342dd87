//! FIFO matcher.
//!
//! ## Algorithm
//!
//! 1. Load OPEN rows for the same asset owned by someone else, oldest first
//! 2. Decrypt them; drop rows that fail authentication
//! 3. Keep the opposite side
//! 4. Take the first (oldest) one. Price never reorders the queue.
//!
//! [`Matcher::find_match`] is a pure read. [`Matcher::claim_match`] walks the
//! same queue but also claims both legs under one ticket, so an order ends up
//! in at most one match. That holds for two submissions racing for the same
//! counterparty and for two submissions that match each other.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::crypto::{self, CryptoError, FieldCipher};
use crate::repository::{stale_cutoff, OrderRepository, PairClaim, RepoError};
use crate::types::{MatchCandidate, Order};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Pick the earliest eligible counterparty from a FIFO-ordered slice.
///
/// `candidates` must already be sorted oldest first.
///
/// # Example
///
/// ```
/// use dark_settlement::engine::select_counterparty;
/// use dark_settlement::types::{Order, Side};
///
/// let resting = Order::new("0xa", Side::Sell, "Z", "USDT", "1".parse().unwrap(), "100".parse().unwrap());
/// let incoming = Order::new("0xb", Side::Buy, "Z", "USDT", "1".parse().unwrap(), "100".parse().unwrap());
///
/// let m = select_counterparty(&incoming, &[resting.clone()]).unwrap();
/// assert_eq!(m.matched_order_id, resting.id);
/// ```
pub fn select_counterparty(incoming: &Order, candidates: &[Order]) -> Option<MatchCandidate> {
    candidates
        .iter()
        .filter(|c| c.id != incoming.id && c.is_open())
        .find_map(|c| MatchCandidate::between(incoming, c))
}

/// Matcher over the repository
pub struct Matcher {
    repo: Arc<dyn OrderRepository>,
    cipher: Arc<FieldCipher>,
}

impl Matcher {
    pub fn new(repo: Arc<dyn OrderRepository>, cipher: Arc<FieldCipher>) -> Self {
        Self { repo, cipher }
    }

    /// Decrypted, opposite-side OPEN orders for `incoming`, oldest first.
    pub async fn eligible_counterparties(&self, incoming: &Order) -> Result<Vec<Order>, MatchError> {
        let rows = self
            .repo
            .list_open_counterparties(&incoming.asset, &incoming.owner)
            .await?;

        let want = incoming.side.opposite();
        let mut eligible = Vec::with_capacity(rows.len());
        for row in rows {
            if row.id == incoming.id {
                continue;
            }
            let order = match crypto::open_verified(&self.cipher, &row) {
                Ok(order) => order,
                Err(CryptoError::MissingSecret) => return Err(CryptoError::MissingSecret.into()),
                Err(e) => {
                    warn!(order_id = %row.id, error = %e, "skipping unverifiable counterparty");
                    continue;
                }
            };
            if order.side == want {
                eligible.push(order);
            }
        }
        Ok(eligible)
    }

    /// Find the FIFO counterparty for `incoming` without reserving it.
    pub async fn find_match(&self, incoming: &Order) -> Result<Option<MatchCandidate>, MatchError> {
        let eligible = self.eligible_counterparties(incoming).await?;
        Ok(select_counterparty(incoming, &eligible))
    }

    /// Find and claim the FIFO counterparty for `incoming`.
    ///
    /// Walks the queue oldest first. A candidate held by another match is
    /// skipped. If `incoming` itself is held, `None` is returned: the other
    /// match owns it.
    pub async fn claim_match(
        &self,
        incoming: &Order,
        claim_ttl: Duration,
    ) -> Result<Option<MatchCandidate>, MatchError> {
        let eligible = self.eligible_counterparties(incoming).await?;
        let stale_before = stale_cutoff(claim_ttl);

        for resting in &eligible {
            let Some(candidate) = MatchCandidate::between(incoming, resting) else {
                continue;
            };

            let ticket = Uuid::new_v4();
            match self
                .repo
                .claim_pair(incoming.id, resting.id, ticket, stale_before)
                .await?
            {
                PairClaim::Claimed => return Ok(Some(candidate)),
                PairClaim::Refused { id, outcome } if id == incoming.id => {
                    debug!(
                        order_id = %incoming.id,
                        outcome = ?outcome,
                        "incoming order taken by a concurrent match"
                    );
                    return Ok(None);
                }
                PairClaim::Refused { outcome, .. } => {
                    debug!(
                        order_id = %incoming.id,
                        candidate = %resting.id,
                        outcome = ?outcome,
                        "counterparty unavailable, trying next"
                    );
                }
            }
        }
        Ok(None)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{seal, OrderTerms};
    use crate::repository::{
        ClaimOutcome, ClaimTicket, MemoryOrderRepository, NewOrderRow, OrderFilter, OrderRow,
        RowUpdate, UpdateOutcome,
    };
    use crate::types::{OrderId, OrderStatus, Side};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    struct Fixture {
        repo: Arc<MemoryOrderRepository>,
        cipher: Arc<FieldCipher>,
        matcher: Matcher,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(MemoryOrderRepository::new());
        let cipher = Arc::new(FieldCipher::new(Some("matcher-test".to_string())));
        let matcher = Matcher::new(repo.clone(), cipher.clone());
        Fixture { repo, cipher, matcher }
    }

    impl Fixture {
        async fn place(&self, owner: &str, side: Side, size: &str, price: &str) -> Order {
            let size = d(size);
            let price = d(price);
            let terms = OrderTerms {
                side,
                size,
                price,
                order_value: size * price,
                filled: Decimal::ZERO,
            };
            let row = self
                .repo
                .insert(NewOrderRow {
                    owner: owner.into(),
                    asset: "Z".to_string(),
                    quote_asset: "USDT".to_string(),
                    sealed: seal(&self.cipher, &terms).unwrap(),
                })
                .await
                .unwrap();
            crypto::open_verified(&self.cipher, &row).unwrap()
        }
    }

    #[test]
    fn test_select_fifo_ignores_price() {
        let incoming = Order::new("0xb", Side::Buy, "Z", "USDT", d("1"), d("100"));
        let older = Order::new("0xa", Side::Sell, "Z", "USDT", d("1"), d("105"));
        let better = Order::new("0xc", Side::Sell, "Z", "USDT", d("1"), d("90"));

        let m = select_counterparty(&incoming, &[older.clone(), better]).unwrap();
        assert_eq!(m.matched_order_id, older.id);
    }

    #[test]
    fn test_select_skips_self_and_closed() {
        let incoming = Order::new("0xb", Side::Buy, "Z", "USDT", d("1"), d("100"));
        let own = Order::new("0xB", Side::Sell, "Z", "USDT", d("1"), d("100"));
        let mut cancelled = Order::new("0xa", Side::Sell, "Z", "USDT", d("1"), d("100"));
        cancelled.status = OrderStatus::Cancelled;

        assert!(select_counterparty(&incoming, &[own, cancelled]).is_none());
        assert!(select_counterparty(&incoming, &[]).is_none());
    }

    #[tokio::test]
    async fn test_find_match_filters_side_after_decrypt() {
        let f = fixture();
        f.place("0xa", Side::Buy, "1", "100").await;
        let sell = f.place("0xc", Side::Sell, "2", "98").await;
        let incoming = f.place("0xb", Side::Buy, "1", "102").await;

        let m = f.matcher.find_match(&incoming).await.unwrap().unwrap();
        assert_eq!(m.matched_order_id, sell.id);
        assert_eq!(m.buyer.as_str(), "0xb");
        assert_eq!(m.seller.as_str(), "0xc");
        assert_eq!(m.clearing_price, d("100"));
        assert_eq!(m.size, d("1"));
    }

    #[tokio::test]
    async fn test_find_match_none_when_only_own_orders() {
        let f = fixture();
        f.place("0xa", Side::Sell, "1", "100").await;
        let incoming = f.place("0xA", Side::Buy, "1", "100").await;

        assert!(f.matcher.find_match(&incoming).await.unwrap().is_none());
    }

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_claim_match_skips_claimed_candidate() {
        let f = fixture();
        let first = f.place("0xa", Side::Sell, "1", "100").await;
        let second = f.place("0xc", Side::Sell, "1", "100").await;
        let incoming = f.place("0xb", Side::Buy, "1", "100").await;

        // Someone else holds the oldest sell
        f.repo
            .try_claim(first.id, Uuid::new_v4(), Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        let m = f.matcher.claim_match(&incoming, TTL).await.unwrap().unwrap();
        assert_eq!(m.matched_order_id, second.id);

        let mine = f.repo.get_by_id(incoming.id).await.unwrap().unwrap().claim.unwrap();
        let theirs = f.repo.get_by_id(second.id).await.unwrap().unwrap().claim.unwrap();
        assert_eq!(mine.by, second.id);
        assert!(mine.pairs_with(incoming.id, &theirs, second.id));
    }

    #[tokio::test]
    async fn test_claim_match_backs_off_when_incoming_taken() {
        let f = fixture();
        let sell = f.place("0xa", Side::Sell, "1", "100").await;
        let incoming = f.place("0xb", Side::Buy, "1", "100").await;
        f.repo
            .try_claim(incoming.id, Uuid::new_v4(), Uuid::new_v4(), Utc::now())
            .await
            .unwrap();

        let m = f.matcher.claim_match(&incoming, TTL).await.unwrap();
        assert!(m.is_none());

        // Nothing is left held on the candidate
        let stored = f.repo.get_by_id(sell.id).await.unwrap().unwrap();
        assert!(stored.claim.is_none());
    }

    #[tokio::test]
    async fn test_orders_matching_each_other_pair_once() {
        let f = fixture();
        let buy = f.place("0xa", Side::Buy, "1", "100").await;
        let sell = f.place("0xb", Side::Sell, "1", "100").await;

        // Both are resting when each runs its own match
        let first = f.matcher.claim_match(&buy, TTL).await.unwrap();
        let second = f.matcher.claim_match(&sell, TTL).await.unwrap();
        assert_eq!(first.unwrap().matched_order_id, sell.id);
        assert!(second.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutual_match_has_one_winner() {
        for _ in 0..100 {
            let f = fixture();
            let buy = f.place("0xa", Side::Buy, "1", "100").await;
            let sell = f.place("0xb", Side::Sell, "1", "100").await;
            let matcher = Arc::new(f.matcher);

            let (m1, m2) = (matcher.clone(), matcher.clone());
            let (b, s) = (buy.clone(), sell.clone());
            let one = tokio::spawn(async move { m1.claim_match(&b, TTL).await.unwrap() });
            let two = tokio::spawn(async move { m2.claim_match(&s, TTL).await.unwrap() });
            let (one, two) = (one.await.unwrap(), two.await.unwrap());

            let winners = usize::from(one.is_some()) + usize::from(two.is_some());
            assert!(winners <= 1, "both orders reported a match");
        }
    }

    /// Delegates to memory storage, but claims on `fail_on` error out.
    struct FailingClaims {
        inner: MemoryOrderRepository,
        fail_on: std::sync::Mutex<Option<OrderId>>,
    }

    #[async_trait::async_trait]
    impl OrderRepository for FailingClaims {
        async fn insert(&self, row: NewOrderRow) -> Result<OrderRow, RepoError> {
            self.inner.insert(row).await
        }
        async fn get_by_id(&self, id: OrderId) -> Result<Option<OrderRow>, RepoError> {
            self.inner.get_by_id(id).await
        }
        async fn list(&self, filter: &OrderFilter) -> Result<Vec<OrderRow>, RepoError> {
            self.inner.list(filter).await
        }
        async fn update_status(
            &self,
            id: OrderId,
            expected: OrderStatus,
            update: RowUpdate,
        ) -> Result<UpdateOutcome, RepoError> {
            self.inner.update_status(id, expected, update).await
        }
        async fn try_claim(
            &self,
            id: OrderId,
            by: OrderId,
            ticket: ClaimTicket,
            stale_before: chrono::DateTime<Utc>,
        ) -> Result<ClaimOutcome, RepoError> {
            let fail = *self.fail_on.lock().unwrap() == Some(id);
            if fail {
                return Err(RepoError::Unavailable("claim write failed".to_string()));
            }
            self.inner.try_claim(id, by, ticket, stale_before).await
        }
        async fn release_claim(&self, id: OrderId, ticket: ClaimTicket) -> Result<bool, RepoError> {
            self.inner.release_claim(id, ticket).await
        }
        async fn begin_settlement(&self, id: OrderId, ticket: ClaimTicket) -> Result<ClaimOutcome, RepoError> {
            self.inner.begin_settlement(id, ticket).await
        }
        async fn end_settlement(&self, id: OrderId, ticket: ClaimTicket) -> Result<bool, RepoError> {
            self.inner.end_settlement(id, ticket).await
        }
    }

    #[tokio::test]
    async fn test_claim_error_releases_first_leg() {
        let repo = Arc::new(FailingClaims {
            inner: MemoryOrderRepository::new(),
            fail_on: std::sync::Mutex::new(None),
        });
        let cipher = Arc::new(FieldCipher::new(Some("matcher-test".to_string())));
        let matcher = Matcher::new(repo.clone(), cipher.clone());

        let mut placed = Vec::new();
        for (owner, side) in [("0xa", Side::Sell), ("0xb", Side::Buy)] {
            let terms = OrderTerms {
                side,
                size: d("1"),
                price: d("100"),
                order_value: d("100"),
                filled: Decimal::ZERO,
            };
            let row = repo
                .insert(NewOrderRow {
                    owner: owner.into(),
                    asset: "Z".to_string(),
                    quote_asset: "USDT".to_string(),
                    sealed: seal(&cipher, &terms).unwrap(),
                })
                .await
                .unwrap();
            placed.push(crypto::open_verified(&cipher, &row).unwrap());
        }
        let (sell, buy) = (&placed[0], &placed[1]);
        let (lower, higher) = (sell.id.min(buy.id), sell.id.max(buy.id));

        // The first leg is claimed, the second write fails
        *repo.fail_on.lock().unwrap() = Some(higher);
        let err = matcher.claim_match(buy, TTL).await.unwrap_err();
        assert!(matches!(err, MatchError::Repo(_)));
        assert!(repo.get_by_id(lower).await.unwrap().unwrap().claim.is_none());

        // Both orders are immediately matchable again
        *repo.fail_on.lock().unwrap() = None;
        let m = matcher.claim_match(buy, TTL).await.unwrap().unwrap();
        assert_eq!(m.matched_order_id, sell.id);
    }

    #[tokio::test]
    async fn test_missing_secret_is_error() {
        let f = fixture();
        f.place("0xa", Side::Sell, "1", "100").await;
        let incoming = Order::new("0xb", Side::Buy, "Z", "USDT", d("1"), d("100"));

        let blind = Matcher::new(f.repo.clone(), Arc::new(FieldCipher::new(None)));
        assert_eq!(
            blind.find_match(&incoming).await.unwrap_err(),
            MatchError::Crypto(CryptoError::MissingSecret)
        );
    }
}
