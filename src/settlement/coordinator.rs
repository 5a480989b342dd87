//! Settlement coordinator.
//!
//! ## Stages
//!
//! ```text
//! Matched -> Proving -> Proven -> SettlingOnChain -> Confirmed
//!    \          \          \            \
//!     +----------+----------+------------+--> Failed
//! ```
//!
//! No order status changes before the on-chain leg confirms, so a failure at
//! any stage up to `SettlingOnChain` leaves both orders OPEN. There is nothing
//! to roll back in storage beyond the claims.
//!
//! Before `Proving`, both legs' claims are flipped to settling under the
//! match's ticket. Only one caller can do that for a pair, so a match reaches
//! the price feed, the prover and the chain at most once at a time. While
//! settling, cancels and external confirms on either leg are refused.
//!
//! `Confirmed` writes both orders concurrently, each conditioned on still
//! being OPEN. The on-chain transfer is irreversible at that point, so if only
//! one write lands the inconsistency is reported, never undone.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::crypto::{self, CryptoError, FieldCipher};
use crate::repository::{
    stale_cutoff, ClaimOutcome, ClaimTicket, OrderRepository, OrderRow, PairClaim, RepoError,
    RowUpdate, UpdateOutcome,
};
use crate::settlement::collaborators::{
    CollaboratorError, PriceOracle, ProofGenerator, SettleRequest, SettlementContract, TxStatus,
};
use crate::types::{MatchCandidate, Order, OrderId, OrderStatus, ProofParams, SettlementReceipt};

/// Stage of one settlement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementStage {
    Matched,
    Proving,
    Proven,
    SettlingOnChain,
    Confirmed,
    Failed,
}

impl fmt::Display for SettlementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SettlementStage::Matched => "matched",
            SettlementStage::Proving => "proving",
            SettlementStage::Proven => "proven",
            SettlementStage::SettlingOnChain => "settling_on_chain",
            SettlementStage::Confirmed => "confirmed",
            SettlementStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SettlementError {
    #[error("{stage}: timed out after {after:?}")]
    Timeout {
        stage: SettlementStage,
        after: Duration,
    },

    #[error("{stage}: collaborator unreachable: {reason}")]
    Unreachable {
        stage: SettlementStage,
        reason: String,
    },

    #[error("{stage}: rejected: {reason}")]
    Rejected {
        stage: SettlementStage,
        reason: String,
    },

    #[error("no usable reference price for {symbol}")]
    NoReferencePrice { symbol: String },

    #[error("proof reported invalid")]
    InvalidProof,

    #[error("transaction {reference} reverted")]
    Reverted { reference: String },

    #[error("trade amount overflow")]
    Overflow,

    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("orders {0} and {1} do not form a valid pair")]
    PairMismatch(OrderId, OrderId),

    #[error("order {id} is already {status}")]
    AlreadyResolved { id: OrderId, status: OrderStatus },

    #[error("order {0} is reserved by another match or settlement")]
    Reserved(OrderId),

    #[error("partial settlement {reference}: {committed} filled, {conflicted} not")]
    Partial {
        committed: OrderId,
        conflicted: OrderId,
        reference: String,
    },

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl SettlementError {
    /// Stage the pipeline stopped at
    pub fn stage(&self) -> SettlementStage {
        match self {
            SettlementError::Timeout { stage, .. }
            | SettlementError::Unreachable { stage, .. }
            | SettlementError::Rejected { stage, .. } => *stage,
            SettlementError::NoReferencePrice { .. } => SettlementStage::Proving,
            SettlementError::InvalidProof => SettlementStage::Proven,
            SettlementError::Reverted { .. } => SettlementStage::SettlingOnChain,
            SettlementError::Partial { .. } => SettlementStage::Confirmed,
            _ => SettlementStage::Matched,
        }
    }

    /// Whether both orders are guaranteed to still be OPEN
    pub fn orders_untouched(&self) -> bool {
        !matches!(
            self,
            SettlementError::Partial { .. } | SettlementError::AlreadyResolved { .. }
        )
    }

    fn from_collaborator(stage: SettlementStage, err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Unreachable(reason) => SettlementError::Unreachable { stage, reason },
            CollaboratorError::Rejected(reason) => SettlementError::Rejected { stage, reason },
        }
    }
}

/// Tolerance and timeouts for the external steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementPolicy {
    pub tolerance_bps: u32,
    pub price_timeout: Duration,
    pub proof_timeout: Duration,
    pub confirm_timeout: Duration,
    /// Age after which an idle match claim may be taken over
    pub claim_ttl: Duration,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            tolerance_bps: 100,
            price_timeout: Duration::from_secs(5),
            proof_timeout: Duration::from_secs(60),
            confirm_timeout: Duration::from_secs(120),
            claim_ttl: Duration::from_secs(300),
        }
    }
}

/// Both orders after a confirmed settlement
#[derive(Debug, Clone)]
pub struct SettledPair {
    pub first: Order,
    pub second: Order,
}

/// Outcome of a full pipeline run
#[derive(Debug, Clone)]
pub struct Settlement {
    pub receipt: SettlementReceipt,
    pub orders: SettledPair,
}

/// Drives a match through proof, on-chain settlement and confirmation.
pub struct SettlementCoordinator {
    repo: Arc<dyn OrderRepository>,
    cipher: Arc<FieldCipher>,
    oracle: Arc<dyn PriceOracle>,
    prover: Arc<dyn ProofGenerator>,
    contract: Arc<dyn SettlementContract>,
    policy: SettlementPolicy,
}

impl SettlementCoordinator {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        cipher: Arc<FieldCipher>,
        oracle: Arc<dyn PriceOracle>,
        prover: Arc<dyn ProofGenerator>,
        contract: Arc<dyn SettlementContract>,
        policy: SettlementPolicy,
    ) -> Self {
        Self {
            repo,
            cipher,
            oracle,
            prover,
            contract,
            policy,
        }
    }

    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }

    /// Run the whole pipeline: prove, settle on chain, confirm both orders.
    ///
    /// Both legs are reserved first. A failure at any stage drops both
    /// claims so the orders can match again.
    pub async fn settle(&self, candidate: &MatchCandidate) -> Result<Settlement, SettlementError> {
        let span = info_span!(
            "settlement",
            buy = %candidate.buy_order_id,
            sell = %candidate.sell_order_id,
            asset = %candidate.asset,
        );
        async {
            let ticket = self.reserve(candidate).await?;
            let result = self.run(candidate, ticket).await;
            if result.is_err() {
                self.release(candidate, ticket).await;
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, candidate: &MatchCandidate, ticket: ClaimTicket) -> Result<Settlement, SettlementError> {
        let receipt = self.execute(candidate).await?;
        let orders = self
            .commit(
                candidate.incoming_order_id,
                candidate.matched_order_id,
                &receipt.reference,
                receipt.filled,
                Some(ticket),
            )
            .await?;
        Ok(Settlement { receipt, orders })
    }

    /// Take the settlement token on both legs, lower id first.
    ///
    /// Reuses the pair's match ticket when both legs hold it, otherwise claims
    /// the pair afresh. Fails without any external call if another match or
    /// settlement holds either leg.
    async fn reserve(&self, candidate: &MatchCandidate) -> Result<ClaimTicket, SettlementError> {
        let (first, second) = ordered(candidate.buy_order_id, candidate.sell_order_id);
        let row_first = self.ensure_open(first).await?;
        let row_second = self.ensure_open(second).await?;

        let ticket = match (row_first.claim, row_second.claim) {
            (Some(a), Some(b)) if a.pairs_with(first, &b, second) => a.ticket,
            _ => {
                let ticket = Uuid::new_v4();
                let stale_before = stale_cutoff(self.policy.claim_ttl);
                match self.repo.claim_pair(first, second, ticket, stale_before).await? {
                    PairClaim::Claimed => ticket,
                    PairClaim::Refused { id, outcome } => return Err(refused(id, outcome)),
                }
            }
        };

        match self.repo.begin_settlement(first, ticket).await? {
            ClaimOutcome::Claimed(_) => {}
            outcome => return Err(refused(first, outcome)),
        }
        let outcome = match self.repo.begin_settlement(second, ticket).await {
            Ok(ClaimOutcome::Claimed(_)) => {
                debug!(%ticket, "both legs reserved for settlement");
                return Ok(ticket);
            }
            Ok(outcome) => refused(second, outcome),
            Err(e) => e.into(),
        };
        if let Err(e) = self.repo.end_settlement(first, ticket).await {
            warn!(order_id = %first, error = %e, "could not drop settlement claim");
        }
        Err(outcome)
    }

    /// Drop both claims after a failed run. Terminal legs have none left.
    async fn release(&self, candidate: &MatchCandidate, ticket: ClaimTicket) {
        for id in [candidate.buy_order_id, candidate.sell_order_id] {
            if let Err(e) = self.repo.end_settlement(id, ticket).await {
                warn!(order_id = %id, error = %e, "could not drop settlement claim");
            }
        }
    }

    /// Run `Matched` through `SettlingOnChain`. Writes nothing to storage.
    pub async fn execute(&self, candidate: &MatchCandidate) -> Result<SettlementReceipt, SettlementError> {
        let result = self.execute_stages(candidate).await;
        if let Err(e) = &result {
            warn!(
                stage = %SettlementStage::Failed,
                failed_at = %e.stage(),
                error = %e,
                "settlement failed, orders remain open"
            );
        }
        result
    }

    async fn execute_stages(&self, candidate: &MatchCandidate) -> Result<SettlementReceipt, SettlementError> {
        info!(stage = %SettlementStage::Matched, size = %candidate.size, "settling match");
        self.ensure_open(candidate.buy_order_id).await?;
        self.ensure_open(candidate.sell_order_id).await?;

        // Proving: the reference price is fetched now, not at order entry
        info!(stage = %SettlementStage::Proving, "fetching reference price");
        let symbol = candidate.symbol();
        let ticker = bounded(
            SettlementStage::Proving,
            self.policy.price_timeout,
            self.oracle.book_ticker(&symbol),
        )
        .await?;
        let reference_price = ticker
            .midpoint()
            .ok_or_else(|| SettlementError::NoReferencePrice { symbol: symbol.clone() })?;

        let intended = ProofParams {
            amount_base: candidate.size,
            amount_quote: candidate.amount_quote().ok_or(SettlementError::Overflow)?,
            reference_price,
            tolerance_bps: self.policy.tolerance_bps,
        };
        let proof = bounded(
            SettlementStage::Proving,
            self.policy.proof_timeout,
            self.prover.prove(&intended),
        )
        .await?;

        // Proven
        if !proof.valid {
            return Err(SettlementError::InvalidProof);
        }
        let proof_digest = SettlementReceipt::compute_digest(&proof.bytes);
        info!(
            stage = %SettlementStage::Proven,
            proof = %hex::encode(proof_digest),
            "proof generated"
        );
        if proof.public.amounts_differ(&intended) {
            warn!("attested amounts differ from intended; using attested amounts on chain");
        }

        // SettlingOnChain: the echoed parameters are the only ones the proof covers
        let request = SettleRequest {
            proof: proof.bytes,
            public: proof.public.clone(),
            buyer: candidate.buyer.clone(),
            seller: candidate.seller.clone(),
        };
        let reference = self.submit_and_confirm(&request).await?;
        info!(stage = %SettlementStage::SettlingOnChain, tx = %reference, "transaction confirmed");

        Ok(SettlementReceipt {
            buy_order_id: candidate.buy_order_id,
            sell_order_id: candidate.sell_order_id,
            reference,
            proof_digest,
            attested: proof.public,
            intended,
            filled: candidate.size,
            settled_at: Utc::now(),
        })
    }

    /// Submit and wait for finality. One deadline covers both calls.
    async fn submit_and_confirm(&self, request: &SettleRequest) -> Result<String, SettlementError> {
        let stage = SettlementStage::SettlingOnChain;
        let after = self.policy.confirm_timeout;
        let deadline = Instant::now() + after;

        let tx = match tokio::time::timeout_at(deadline, self.contract.submit(request)).await {
            Ok(result) => result.map_err(|e| SettlementError::from_collaborator(stage, e))?,
            Err(_) => return Err(SettlementError::Timeout { stage, after }),
        };
        info!(stage = %stage, tx = %tx, "settlement transaction submitted");

        let status =
            match tokio::time::timeout_at(deadline, self.contract.wait_for_confirmation(&tx)).await {
                Ok(result) => result.map_err(|e| SettlementError::from_collaborator(stage, e))?,
                Err(_) => return Err(SettlementError::Timeout { stage, after }),
            };
        match status {
            TxStatus::Confirmed => Ok(tx),
            TxStatus::Reverted => Err(SettlementError::Reverted { reference: tx }),
        }
    }

    async fn ensure_open(&self, id: OrderId) -> Result<OrderRow, SettlementError> {
        let row = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or(SettlementError::NotFound(id))?;
        if row.status != OrderStatus::Open {
            return Err(SettlementError::AlreadyResolved {
                id,
                status: row.status,
            });
        }
        Ok(row)
    }

    /// `Confirmed`: move both orders OPEN -> FILLED concurrently.
    ///
    /// # Errors
    ///
    /// * [`SettlementError::AlreadyResolved`] - neither write applied
    /// * [`SettlementError::Partial`] - exactly one write applied; needs
    ///   reconciliation
    /// * [`SettlementError::Reserved`] - a settlement is driving one of the
    ///   orders
    pub async fn confirm(
        &self,
        order_id: OrderId,
        matched_order_id: OrderId,
        reference: &str,
        filled: Decimal,
    ) -> Result<SettledPair, SettlementError> {
        self.commit(order_id, matched_order_id, reference, filled, None)
            .await
    }

    async fn commit(
        &self,
        order_id: OrderId,
        matched_order_id: OrderId,
        reference: &str,
        filled: Decimal,
        ticket: Option<ClaimTicket>,
    ) -> Result<SettledPair, SettlementError> {
        if order_id == matched_order_id {
            return Err(SettlementError::PairMismatch(order_id, matched_order_id));
        }
        self.verify_pair(order_id, matched_order_id, filled, ticket).await?;

        // Fresh nonce per order
        let first_update = RowUpdate::fill(
            crypto::seal_quantity(&self.cipher, filled)?,
            reference.to_string(),
        )
        .under(ticket);
        let second_update = RowUpdate::fill(
            crypto::seal_quantity(&self.cipher, filled)?,
            reference.to_string(),
        )
        .under(ticket);

        let (first, second) = tokio::join!(
            self.repo.update_status(order_id, OrderStatus::Open, first_update),
            self.repo.update_status(matched_order_id, OrderStatus::Open, second_update),
        );

        match (first, second) {
            (Ok(UpdateOutcome::Applied(a)), Ok(UpdateOutcome::Applied(b))) => {
                info!(stage = %SettlementStage::Confirmed, tx = %reference, "both orders filled");
                Ok(SettledPair {
                    first: crypto::open(&self.cipher, &a)?.order,
                    second: crypto::open(&self.cipher, &b)?.order,
                })
            }
            (Ok(UpdateOutcome::Applied(_)), other) => {
                Err(self.partial(order_id, matched_order_id, reference, other))
            }
            (other, Ok(UpdateOutcome::Applied(_))) => {
                Err(self.partial(matched_order_id, order_id, reference, other))
            }
            (Err(e), _) | (_, Err(e)) => Err(e.into()),
            (Ok(a), Ok(_)) => {
                let (id, status) = match a {
                    UpdateOutcome::Conflict { current } => (order_id, current),
                    UpdateOutcome::Settling => return Err(SettlementError::Reserved(order_id)),
                    _ => return Err(SettlementError::NotFound(order_id)),
                };
                info!(order_id = %id, %status, "settlement already resolved by another writer");
                Err(SettlementError::AlreadyResolved { id, status })
            }
        }
    }

    fn partial(
        &self,
        committed: OrderId,
        conflicted: OrderId,
        reference: &str,
        outcome: Result<UpdateOutcome, RepoError>,
    ) -> SettlementError {
        error!(
            stage = %SettlementStage::Confirmed,
            %committed,
            %conflicted,
            tx = %reference,
            outcome = ?outcome,
            "partial settlement, manual reconciliation required"
        );
        SettlementError::Partial {
            committed,
            conflicted,
            reference: reference.to_string(),
        }
    }

    /// The two ids must form a matchable pair and `filled` must fit both.
    /// Without a ticket, neither order may be in a settlement.
    async fn verify_pair(
        &self,
        a: OrderId,
        b: OrderId,
        filled: Decimal,
        ticket: Option<ClaimTicket>,
    ) -> Result<(), SettlementError> {
        let row_a = self.repo.get_by_id(a).await?.ok_or(SettlementError::NotFound(a))?;
        let row_b = self.repo.get_by_id(b).await?.ok_or(SettlementError::NotFound(b))?;
        for row in [&row_a, &row_b] {
            let held_elsewhere = row
                .claim
                .map_or(false, |c| c.settling && Some(c.ticket) != ticket);
            if held_elsewhere {
                return Err(SettlementError::Reserved(row.id));
            }
        }
        let order_a = crypto::open_verified(&self.cipher, &row_a)?;
        let order_b = crypto::open_verified(&self.cipher, &row_b)?;

        let pair_ok = order_a.side != order_b.side
            && order_a.owner != order_b.owner
            && order_a.asset == order_b.asset
            && order_a.quote_asset == order_b.quote_asset;
        let size_ok = filled > Decimal::ZERO && filled <= order_a.size.min(order_b.size);
        if pair_ok && size_ok {
            Ok(())
        } else {
            Err(SettlementError::PairMismatch(a, b))
        }
    }
}

fn ordered(a: OrderId, b: OrderId) -> (OrderId, OrderId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Map a refused claim on `id` to the error the caller sees.
fn refused(id: OrderId, outcome: ClaimOutcome) -> SettlementError {
    match outcome {
        ClaimOutcome::NotOpen { current } => SettlementError::AlreadyResolved { id, status: current },
        ClaimOutcome::Missing => SettlementError::NotFound(id),
        ClaimOutcome::Claimed(_)
        | ClaimOutcome::Taken { .. }
        | ClaimOutcome::Settling
        | ClaimOutcome::NotHeld => SettlementError::Reserved(id),
    }
}

/// Await a collaborator call under a deadline. A timeout counts as a failure
/// at `stage`.
async fn bounded<T, F>(stage: SettlementStage, after: Duration, fut: F) -> Result<T, SettlementError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(SettlementError::from_collaborator(stage, e)),
        Err(_) => Err(SettlementError::Timeout { stage, after }),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{seal, OrderTerms};
    use crate::repository::{MemoryOrderRepository, NewOrderRow};
    use crate::settlement::simulated::{EchoProver, LedgerContract, StaticPriceOracle};
    use crate::types::Side;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    struct Fixture {
        repo: Arc<MemoryOrderRepository>,
        cipher: Arc<FieldCipher>,
        ledger: Arc<LedgerContract>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                repo: Arc::new(MemoryOrderRepository::new()),
                cipher: Arc::new(FieldCipher::new(Some("coordinator-test".to_string()))),
                ledger: Arc::new(LedgerContract::new()),
            }
        }

        fn coordinator(&self, oracle: StaticPriceOracle, prover: EchoProver) -> SettlementCoordinator {
            let policy = SettlementPolicy {
                tolerance_bps: 100,
                price_timeout: Duration::from_millis(200),
                proof_timeout: Duration::from_millis(200),
                confirm_timeout: Duration::from_millis(200),
                claim_ttl: Duration::from_secs(300),
            };
            SettlementCoordinator::new(
                self.repo.clone(),
                self.cipher.clone(),
                Arc::new(oracle),
                Arc::new(prover),
                self.ledger.clone(),
                policy,
            )
        }

        async fn place(&self, owner: &str, side: Side, size: &str, price: &str) -> Order {
            let (size, price) = (d(size), d(price));
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

        async fn pair(&self) -> MatchCandidate {
            let sell = self.place("0xs", Side::Sell, "2", "99").await;
            let buy = self.place("0xb", Side::Buy, "1", "101").await;
            MatchCandidate::between(&buy, &sell).unwrap()
        }

        async fn status(&self, id: OrderId) -> OrderStatus {
            self.repo.get_by_id(id).await.unwrap().unwrap().status
        }
    }

    fn fair_oracle() -> StaticPriceOracle {
        StaticPriceOracle::new().with_ticker("ZUSDT", d("99.5"), d("100.5"))
    }

    #[tokio::test]
    async fn test_happy_path_fills_both() {
        let f = Fixture::new();
        let m = f.pair().await;
        let c = f.coordinator(fair_oracle(), EchoProver::new());

        let settlement = c.settle(&m).await.unwrap();
        assert_eq!(settlement.receipt.filled, d("1"));
        assert_eq!(settlement.receipt.intended.reference_price, d("100"));
        assert!(!settlement.receipt.amounts_diverged());
        assert_eq!(settlement.orders.first.status, OrderStatus::Filled);
        assert_eq!(settlement.orders.first.filled, d("1"));
        assert_eq!(
            settlement.orders.second.settlement_reference.as_deref(),
            Some(settlement.receipt.reference.as_str())
        );
        assert_eq!(f.ledger.submissions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_proof_leaves_orders_open() {
        let f = Fixture::new();
        let m = f.pair().await;
        // Reference far away from the clearing price
        let oracle = StaticPriceOracle::new().with_ticker("ZUSDT", d("150"), d("150"));
        let c = f.coordinator(oracle, EchoProver::new());

        let err = c.settle(&m).await.unwrap_err();
        assert_eq!(err, SettlementError::InvalidProof);
        assert!(err.orders_untouched());
        assert_eq!(f.status(m.buy_order_id).await, OrderStatus::Open);
        assert_eq!(f.status(m.sell_order_id).await, OrderStatus::Open);
        assert!(f.ledger.submissions().await.is_empty());

        // Reservation dropped on failure
        for id in [m.buy_order_id, m.sell_order_id] {
            assert!(f.repo.get_by_id(id).await.unwrap().unwrap().claim.is_none());
        }
    }

    #[tokio::test]
    async fn test_proof_timeout() {
        let f = Fixture::new();
        let m = f.pair().await;
        let c = f.coordinator(fair_oracle(), EchoProver::new().with_delay(Duration::from_secs(5)));

        let err = c.settle(&m).await.unwrap_err();
        assert!(matches!(
            err,
            SettlementError::Timeout {
                stage: SettlementStage::Proving,
                ..
            }
        ));
        assert_eq!(f.status(m.buy_order_id).await, OrderStatus::Open);
    }

    #[tokio::test]
    async fn test_price_feed_unreachable() {
        let f = Fixture::new();
        let m = f.pair().await;
        let oracle = fair_oracle();
        oracle.set_offline(true);
        let c = f.coordinator(oracle, EchoProver::new());

        assert!(matches!(
            c.settle(&m).await.unwrap_err(),
            SettlementError::Unreachable {
                stage: SettlementStage::Proving,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_revert_leaves_orders_open() {
        let f = Fixture::new();
        let m = f.pair().await;
        f.ledger.set_reverting(true);
        let c = f.coordinator(fair_oracle(), EchoProver::new());

        let err = c.settle(&m).await.unwrap_err();
        assert!(matches!(err, SettlementError::Reverted { .. }));
        assert_eq!(err.stage(), SettlementStage::SettlingOnChain);
        assert_eq!(f.status(m.buy_order_id).await, OrderStatus::Open);
        assert_eq!(f.status(m.sell_order_id).await, OrderStatus::Open);
    }

    #[tokio::test]
    async fn test_attested_amounts_go_on_chain() {
        let f = Fixture::new();
        let m = f.pair().await;
        let attested = ProofParams {
            amount_base: d("0.999"),
            amount_quote: d("99.9"),
            reference_price: d("100"),
            tolerance_bps: 100,
        };
        let c = f.coordinator(fair_oracle(), EchoProver::new().attesting(attested.clone()));

        let receipt = c.execute(&m).await.unwrap();
        assert!(receipt.amounts_diverged());
        assert_eq!(receipt.attested, attested);

        let (_, request) = f.ledger.submissions().await.pop().unwrap();
        assert_eq!(request.public, attested);
    }

    #[tokio::test]
    async fn test_execute_rejects_resolved_order() {
        let f = Fixture::new();
        let m = f.pair().await;
        f.repo
            .update_status(m.sell_order_id, OrderStatus::Open, RowUpdate::cancel())
            .await
            .unwrap();
        let c = f.coordinator(fair_oracle(), EchoProver::new());

        assert_eq!(
            c.execute(&m).await.unwrap_err(),
            SettlementError::AlreadyResolved {
                id: m.sell_order_id,
                status: OrderStatus::Cancelled
            }
        );
    }

    #[tokio::test]
    async fn test_confirm_is_first_writer_wins() {
        let f = Fixture::new();
        let m = f.pair().await;
        let c = f.coordinator(fair_oracle(), EchoProver::new());

        c.confirm(m.buy_order_id, m.sell_order_id, "0xaa", d("1"))
            .await
            .unwrap();
        let err = c
            .confirm(m.buy_order_id, m.sell_order_id, "0xbb", d("1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::AlreadyResolved { .. }));

        let row = f.repo.get_by_id(m.buy_order_id).await.unwrap().unwrap();
        assert_eq!(row.settlement_reference.as_deref(), Some("0xaa"));
    }

    #[tokio::test]
    async fn test_confirm_detects_partial() {
        let f = Fixture::new();
        let m = f.pair().await;
        // The sell leg was cancelled underneath the settlement
        f.repo
            .update_status(m.sell_order_id, OrderStatus::Open, RowUpdate::cancel())
            .await
            .unwrap();
        let c = f.coordinator(fair_oracle(), EchoProver::new());

        let err = c
            .confirm(m.buy_order_id, m.sell_order_id, "0xcc", d("1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SettlementError::Partial {
                committed: m.buy_order_id,
                conflicted: m.sell_order_id,
                reference: "0xcc".to_string(),
            }
        );
        assert!(!err.orders_untouched());
        assert_eq!(f.status(m.buy_order_id).await, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_concurrent_settle_reaches_chain_once() {
        for _ in 0..20 {
            let f = Fixture::new();
            let m = f.pair().await;
            let prover = EchoProver::new().with_delay(Duration::from_millis(30));
            let c = f.coordinator(fair_oracle(), prover);

            let (one, two) = tokio::join!(c.settle(&m), c.settle(&m));
            let (won, lost) = match (one, two) {
                (Ok(s), Err(e)) | (Err(e), Ok(s)) => (s, e),
                (one, two) => panic!("expected exactly one winner: {:?} / {:?}", one, two),
            };
            assert!(matches!(
                lost,
                SettlementError::Reserved(_) | SettlementError::AlreadyResolved { .. }
            ));
            assert_eq!(f.ledger.submissions().await.len(), 1);
            assert_eq!(f.status(m.buy_order_id).await, OrderStatus::Filled);
            assert_eq!(
                f.repo
                    .get_by_id(m.sell_order_id)
                    .await
                    .unwrap()
                    .unwrap()
                    .settlement_reference,
                Some(won.receipt.reference)
            );
        }
    }

    #[tokio::test]
    async fn test_settle_refuses_order_held_by_another_match() {
        let f = Fixture::new();
        let m = f.pair().await;
        f.repo
            .try_claim(m.sell_order_id, Uuid::new_v4(), Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        let c = f.coordinator(fair_oracle(), EchoProver::new());

        assert_eq!(
            c.settle(&m).await.unwrap_err(),
            SettlementError::Reserved(m.sell_order_id)
        );
        assert!(f.ledger.submissions().await.is_empty());
        // The other match keeps its claim
        let held = f.repo.get_by_id(m.sell_order_id).await.unwrap().unwrap();
        assert!(held.claim.is_some());
    }

    #[tokio::test]
    async fn test_writes_refused_while_settling() {
        let f = Fixture::new();
        let m = f.pair().await;
        let prover = EchoProver::new().with_delay(Duration::from_millis(80));
        let c = f.coordinator(fair_oracle(), prover);

        let interfere = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let cancel = f
                .repo
                .update_status(m.sell_order_id, OrderStatus::Open, RowUpdate::cancel())
                .await
                .unwrap();
            let confirm = c
                .confirm(m.buy_order_id, m.sell_order_id, "0xdd", d("1"))
                .await;
            (cancel, confirm)
        };
        let (settled, (cancel, confirm)) = tokio::join!(c.settle(&m), interfere);

        assert_eq!(cancel, UpdateOutcome::Settling);
        assert!(matches!(confirm, Err(SettlementError::Reserved(_))));
        let settled = settled.unwrap();
        assert_eq!(f.status(m.sell_order_id).await, OrderStatus::Filled);
        let row = f.repo.get_by_id(m.buy_order_id).await.unwrap().unwrap();
        assert_eq!(row.settlement_reference, Some(settled.receipt.reference));
    }

    #[tokio::test]
    async fn test_confirm_rejects_bad_pair() {
        let f = Fixture::new();
        let a = f.place("0xa", Side::Buy, "1", "100").await;
        let b = f.place("0xb", Side::Buy, "1", "100").await;
        let c = f.coordinator(fair_oracle(), EchoProver::new());

        assert_eq!(
            c.confirm(a.id, b.id, "0x01", d("1")).await.unwrap_err(),
            SettlementError::PairMismatch(a.id, b.id)
        );
        assert_eq!(
            c.confirm(a.id, a.id, "0x01", d("1")).await.unwrap_err(),
            SettlementError::PairMismatch(a.id, a.id)
        );
    }
}
