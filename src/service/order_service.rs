//! Order service: the entry point for every client operation.
//!
//! Each call is independent. The service holds no order state of its own;
//! everything shared lives in the repository rows.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::crypto::{self, CryptoError, FieldCipher, OrderTerms};
use crate::engine::Matcher;
use crate::error::{Result, ServiceError};
use crate::repository::{NewOrderRow, OrderRepository, OrderRow, RowUpdate, UpdateOutcome};
use crate::service::api::{
    MatchDetails, OrderView, QueryOrdersRequest, Request, Response, SettledResponse,
    SubmitOrderRequest, SubmitOrderResponse,
};
use crate::settlement::{
    PriceOracle, ProofGenerator, SettledPair, Settlement, SettlementContract, SettlementCoordinator,
};
use crate::types::{MatchCandidate, Order, OrderId, OrderStatus, Owner};

/// Dark pool order service
pub struct OrderService {
    repo: Arc<dyn OrderRepository>,
    cipher: Arc<FieldCipher>,
    matcher: Matcher,
    coordinator: SettlementCoordinator,
    claim_ttl: Duration,
    default_quote: String,
}

impl OrderService {
    /// Wire the service from its collaborators.
    ///
    /// The key is derived from `config.relayer_secret` on first use. Without a
    /// secret the service still starts; every operation that touches
    /// confidential fields fails with [`CryptoError::MissingSecret`].
    pub fn new(
        config: &Config,
        repo: Arc<dyn OrderRepository>,
        oracle: Arc<dyn PriceOracle>,
        prover: Arc<dyn ProofGenerator>,
        contract: Arc<dyn SettlementContract>,
    ) -> Self {
        let cipher = Arc::new(FieldCipher::new(config.relayer_secret.clone()));
        if !cipher.is_configured() {
            warn!("RELAYER_SECRET not set, confidential operations will fail");
        }
        let matcher = Matcher::new(repo.clone(), cipher.clone());
        let coordinator = SettlementCoordinator::new(
            repo.clone(),
            cipher.clone(),
            oracle,
            prover,
            contract,
            config.policy(),
        );

        Self {
            repo,
            cipher,
            matcher,
            coordinator,
            claim_ttl: config.claim_ttl(),
            default_quote: config.default_quote.clone(),
        }
    }

    // ========================================================================
    // Submit
    // ========================================================================

    /// Validate, encrypt, persist OPEN, then look for a counterparty.
    ///
    /// A match found here is claimed but not settled; run it through
    /// [`OrderService::settle`] (or confirm it externally) to fill both orders.
    #[instrument(level = "info", skip_all, fields(asset = %request.asset))]
    pub async fn submit(&self, request: &SubmitOrderRequest) -> Result<SubmitOrderResponse> {
        let new = request.validate(&self.default_quote)?;
        let terms = OrderTerms {
            side: new.side,
            size: new.size,
            price: new.price,
            order_value: new.order_value,
            filled: Decimal::ZERO,
        };
        let sealed = crypto::seal(&self.cipher, &terms)?;

        let row = self
            .repo
            .insert(NewOrderRow {
                owner: new.owner,
                asset: new.asset,
                quote_asset: new.quote_asset,
                sealed,
            })
            .await?;
        let order = crypto::open_verified(&self.cipher, &row)?;
        info!(order_id = %order.id, "order accepted");

        // The order is already resting; a matching failure must not turn
        // into a failed submission.
        let candidate = match self.matcher.claim_match(&order, self.claim_ttl).await {
            Ok(candidate) => candidate,
            Err(e) => {
                error!(order_id = %order.id, error = %e, "matching failed, order rests open");
                None
            }
        };

        match candidate {
            Some(m) => {
                info!(
                    order_id = %order.id,
                    matched_order_id = %m.matched_order_id,
                    "match found"
                );
                Ok(SubmitOrderResponse {
                    order,
                    matched: true,
                    match_details: Some(MatchDetails::from(&m)),
                })
            }
            None => Ok(SubmitOrderResponse {
                order,
                matched: false,
                match_details: None,
            }),
        }
    }

    // ========================================================================
    // Settlement
    // ========================================================================

    /// Run the proof-gated pipeline for a match and fill both orders.
    ///
    /// Only one settlement per pair runs at a time; a concurrent call fails
    /// with [`ServiceError::Reserved`] before touching any collaborator. Any
    /// failure releases the match claims so both orders can match again.
    pub async fn settle(&self, candidate: &MatchCandidate) -> Result<Settlement> {
        Ok(self.coordinator.settle(candidate).await?)
    }

    /// [`OrderService::settle`] for two stored orders.
    ///
    /// The trade terms are rebuilt from the stored projections, never taken
    /// from the caller.
    pub async fn settle_pair(&self, order_id: OrderId, matched_order_id: OrderId) -> Result<Settlement> {
        let incoming = self.load_verified(order_id).await?;
        let resting = self.load_verified(matched_order_id).await?;
        for order in [&incoming, &resting] {
            if !order.is_open() {
                return Err(ServiceError::NotEligible {
                    id: order.id,
                    status: order.status,
                });
            }
        }
        let candidate = MatchCandidate::between(&incoming, &resting).ok_or_else(|| {
            ServiceError::validation(format!(
                "orders {} and {} do not form a valid pair",
                order_id, matched_order_id
            ))
        })?;
        self.settle(&candidate).await
    }

    /// Record an externally completed settlement: both orders OPEN -> FILLED.
    #[instrument(level = "info", skip(self, reference, filled))]
    pub async fn confirm_settlement(
        &self,
        order_id: OrderId,
        matched_order_id: OrderId,
        reference: &str,
        filled: Decimal,
    ) -> Result<SettledPair> {
        let pair = self
            .coordinator
            .confirm(order_id, matched_order_id, reference, filled)
            .await?;
        Ok(pair)
    }

    /// Compensating step after a failed settlement.
    ///
    /// Status never changed, so this only releases the claims the two orders
    /// hold on each other. Succeeds for any two existing orders. Claims of an
    /// in-flight settlement are left to that settlement.
    pub async fn unmatch(&self, order_id: OrderId, matched_order_id: OrderId) -> Result<()> {
        let mut rows = Vec::with_capacity(2);
        for id in [order_id, matched_order_id] {
            rows.push(self.repo.get_by_id(id).await?.ok_or(ServiceError::NotFound(id))?);
        }

        for (row, other) in [(&rows[0], rows[1].id), (&rows[1], rows[0].id)] {
            let Some(claim) = row.claim.filter(|c| c.by == other) else {
                continue;
            };
            // Refused for settling claims, atomically
            if !self.repo.release_claim(row.id, claim.ticket).await? {
                info!(order_id = %row.id, "claim not released, settling or already gone");
            }
        }
        info!(%order_id, %matched_order_id, "orders unmatched");
        Ok(())
    }

    // ========================================================================
    // Cancel / query
    // ========================================================================

    /// OPEN -> CANCELLED. Anything else is rejected without a write, as is
    /// an order that a settlement is driving.
    #[instrument(level = "info", skip(self))]
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order> {
        let row = self
            .repo
            .get_by_id(order_id)
            .await?
            .ok_or(ServiceError::NotFound(order_id))?;
        if row.status != OrderStatus::Open {
            return Err(ServiceError::NotEligible {
                id: order_id,
                status: row.status,
            });
        }

        match self
            .repo
            .update_status(order_id, OrderStatus::Open, RowUpdate::cancel())
            .await?
        {
            UpdateOutcome::Applied(row) => {
                info!("order cancelled");
                Ok(crypto::open(&self.cipher, &row)?.order)
            }
            UpdateOutcome::Conflict { current } => Err(ServiceError::NotEligible {
                id: order_id,
                status: current,
            }),
            UpdateOutcome::Settling => {
                info!("cancel refused, settlement in flight");
                Err(ServiceError::Reserved(order_id))
            }
            UpdateOutcome::Missing => Err(ServiceError::NotFound(order_id)),
        }
    }

    /// List orders. Full projections only when the requester asks for their
    /// own orders; redacted views otherwise.
    pub async fn get_orders(&self, query: &QueryOrdersRequest) -> Result<Vec<OrderView>> {
        let rows = self.repo.list(&query.filter()?).await?;
        if !query.sees_full() {
            return Ok(rows.iter().map(|r| OrderView::Redacted(r.to_public())).collect());
        }

        let mut views = Vec::with_capacity(rows.len());
        for row in &rows {
            match self.decrypt_for_owner(row) {
                Ok(order) => views.push(OrderView::Full(order)),
                Err(CryptoError::MissingSecret) => return Err(CryptoError::MissingSecret.into()),
                Err(e) => {
                    warn!(order_id = %row.id, error = %e, "unreadable row, returning redacted");
                    views.push(OrderView::Redacted(row.to_public()));
                }
            }
        }
        Ok(views)
    }

    /// One order, full for its owner and redacted for anyone else.
    pub async fn get_order(&self, order_id: OrderId, requester: &Owner) -> Result<OrderView> {
        let row = self
            .repo
            .get_by_id(order_id)
            .await?
            .ok_or(ServiceError::NotFound(order_id))?;
        if requester.is_empty() || &row.owner != requester {
            return Ok(OrderView::Redacted(row.to_public()));
        }
        Ok(OrderView::Full(self.decrypt_for_owner(&row)?))
    }

    /// Owners may see legacy plaintext fields; matching never does.
    fn decrypt_for_owner(&self, row: &OrderRow) -> std::result::Result<Order, CryptoError> {
        crypto::open(&self.cipher, row).map(|opened| opened.order)
    }

    async fn load_verified(&self, id: OrderId) -> Result<Order> {
        let row = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or(ServiceError::NotFound(id))?;
        Ok(crypto::open_verified(&self.cipher, &row)?)
    }

    // ========================================================================
    // Request dispatch
    // ========================================================================

    /// Dispatch a wire request.
    pub async fn handle(&self, request: Request) -> Result<Response> {
        match request {
            Request::Submit(req) => Ok(Response::Submitted(self.submit(&req).await?)),
            Request::Confirm(req) => {
                let filled = req.validate()?;
                let pair = self
                    .confirm_settlement(req.order_id, req.matched_order_id, &req.reference, filled)
                    .await?;
                Ok(Response::Settled(SettledResponse {
                    reference: req.reference,
                    order: pair.first.to_public(),
                    matched_order: pair.second.to_public(),
                    proof_digest: None,
                    amounts_diverged: false,
                }))
            }
            Request::Settle(req) => {
                let settlement = self.settle_pair(req.order_id, req.matched_order_id).await?;
                Ok(Response::Settled(SettledResponse {
                    proof_digest: Some(settlement.receipt.proof_digest_hex()),
                    amounts_diverged: settlement.receipt.amounts_diverged(),
                    reference: settlement.receipt.reference,
                    order: settlement.orders.first.to_public(),
                    matched_order: settlement.orders.second.to_public(),
                }))
            }
            Request::Cancel(req) => Ok(Response::Cancelled(self.cancel(req.order_id).await?.to_public())),
            Request::Query(req) => Ok(Response::Orders(self.get_orders(&req).await?)),
            Request::Get(req) => {
                let requester = Owner::new(&req.requester);
                Ok(Response::Order(self.get_order(req.order_id, &requester).await?))
            }
            Request::Unmatch(req) => {
                self.unmatch(req.order_id, req.matched_order_id).await?;
                Ok(Response::Unmatched {
                    order_id: req.order_id,
                    matched_order_id: req.matched_order_id,
                })
            }
        }
    }
}
