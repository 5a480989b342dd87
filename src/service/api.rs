//! Request/response schema.
//!
//! Requests arrive as tagged JSON (`{"op": "submit", ...}`) and are validated
//! here, before any side effect. Quantities travel as decimal strings so no
//! precision is lost on the wire.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::repository::OrderFilter;
use crate::types::price::{self, BASE_UNIT_DECIMALS};
use crate::types::{MatchCandidate, Order, OrderId, OrderStatus, Owner, PublicOrder, Side};

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Submit(SubmitOrderRequest),
    Confirm(ConfirmSettlementRequest),
    Settle(SettleMatchRequest),
    Cancel(CancelOrderRequest),
    Query(QueryOrdersRequest),
    Get(GetOrderRequest),
    Unmatch(UnmatchRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOrderRequest {
    pub owner: String,
    pub side: String,
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_asset: Option<String>,
    pub size: String,
    pub price: String,
}

/// A submission that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub owner: Owner,
    pub side: Side,
    pub asset: String,
    pub quote_asset: String,
    pub size: Decimal,
    pub price: Decimal,
    pub order_value: Decimal,
}

impl SubmitOrderRequest {
    /// Validate and normalize. `default_quote` fills a missing quote asset.
    pub fn validate(&self, default_quote: &str) -> Result<NewOrder, ServiceError> {
        let owner = Owner::new(&self.owner);
        if owner.is_empty() {
            return Err(ServiceError::validation("owner is required"));
        }
        let side: Side = self
            .side
            .parse()
            .map_err(|_| ServiceError::validation(format!("invalid side {:?}", self.side)))?;

        let asset = normalize_asset(&self.asset)
            .ok_or_else(|| ServiceError::validation("asset is required"))?;
        let quote_asset = match &self.quote_asset {
            Some(q) => normalize_asset(q)
                .ok_or_else(|| ServiceError::validation("quote_asset is empty"))?,
            None => normalize_asset(default_quote)
                .ok_or_else(|| ServiceError::validation("no quote_asset and no default"))?,
        };
        if asset == quote_asset {
            return Err(ServiceError::validation("asset and quote_asset must differ"));
        }

        let size = positive_quantity("size", &self.size)?;
        let price = positive_quantity("price", &self.price)?;
        let order_value = price::checked_value(size, price)
            .ok_or_else(|| ServiceError::validation("size x price overflows"))?;

        Ok(NewOrder {
            owner,
            side,
            asset,
            quote_asset,
            size,
            price,
            order_value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmSettlementRequest {
    pub order_id: OrderId,
    pub matched_order_id: OrderId,
    /// On-chain transaction id
    pub reference: String,
    pub filled_size: String,
}

impl ConfirmSettlementRequest {
    pub fn validate(&self) -> Result<Decimal, ServiceError> {
        if self.order_id == self.matched_order_id {
            return Err(ServiceError::validation("an order cannot settle against itself"));
        }
        if self.reference.trim().is_empty() {
            return Err(ServiceError::validation("reference is required"));
        }
        positive_quantity("filled_size", &self.filled_size)
    }
}

/// Run the proof-gated pipeline for two stored orders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleMatchRequest {
    pub order_id: OrderId,
    pub matched_order_id: OrderId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub order_id: OrderId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOrdersRequest {
    /// Who is asking; decides between full and redacted views
    pub requester: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub asset: Option<String>,
}

impl QueryOrdersRequest {
    /// Storage filter for this query. An asset filter that is not a valid
    /// asset symbol is rejected rather than ignored.
    pub fn filter(&self) -> Result<OrderFilter, ServiceError> {
        let mut filter = OrderFilter::default();
        if let Some(owner) = &self.owner {
            filter = filter.owner(Owner::new(owner));
        }
        if let Some(status) = self.status {
            filter = filter.status(status);
        }
        if let Some(raw) = &self.asset {
            let asset = normalize_asset(raw)
                .ok_or_else(|| ServiceError::validation(format!("invalid asset filter {:?}", raw)))?;
            filter = filter.asset(asset);
        }
        Ok(filter)
    }

    /// Full projections only when the requester asks for their own orders
    pub fn sees_full(&self) -> bool {
        let requester = Owner::new(&self.requester);
        !requester.is_empty()
            && self
                .owner
                .as_ref()
                .map_or(false, |o| Owner::new(o) == requester)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOrderRequest {
    pub order_id: OrderId,
    pub requester: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchRequest {
    pub order_id: OrderId,
    pub matched_order_id: OrderId,
}

fn normalize_asset(raw: &str) -> Option<String> {
    let asset = raw.trim().to_uppercase();
    if asset.is_empty() || !asset.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(asset)
}

fn positive_quantity(name: &str, raw: &str) -> Result<Decimal, ServiceError> {
    let value = price::parse_positive(raw)
        .ok_or_else(|| ServiceError::validation(format!("{} must be a positive decimal", name)))?;
    // Anything finer than a base unit would be lost on chain
    if value.scale() > BASE_UNIT_DECIMALS {
        return Err(ServiceError::validation(format!(
            "{} has more than {} decimal places",
            name, BASE_UNIT_DECIMALS
        )));
    }
    Ok(value)
}

// ============================================================================
// Responses
// ============================================================================

/// Trade terms as shown to a matched submitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDetails {
    pub matched_order_id: OrderId,
    pub buyer: Owner,
    pub seller: Owner,
    pub match_price: Decimal,
    pub match_size: Decimal,
    pub asset: String,
    pub quote_asset: String,
}

impl From<&MatchCandidate> for MatchDetails {
    fn from(m: &MatchCandidate) -> Self {
        Self {
            matched_order_id: m.matched_order_id,
            buyer: m.buyer.clone(),
            seller: m.seller.clone(),
            match_price: m.clearing_price,
            match_size: m.size,
            asset: m.asset.clone(),
            quote_asset: m.quote_asset.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOrderResponse {
    /// The submitted order, decrypted for its owner
    pub order: Order,
    pub matched: bool,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_details: Option<MatchDetails>,
}

/// Full projection for the owner, redacted for everyone else
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderView {
    Full(Order),
    Redacted(PublicOrder),
}

impl OrderView {
    pub fn for_requester(order: Order, requester: &Owner) -> Self {
        if !requester.is_empty() && &order.owner == requester {
            OrderView::Full(order)
        } else {
            OrderView::Redacted(order.to_public())
        }
    }

    pub fn id(&self) -> OrderId {
        match self {
            OrderView::Full(o) => o.id,
            OrderView::Redacted(o) => o.id,
        }
    }

    pub fn status(&self) -> OrderStatus {
        match self {
            OrderView::Full(o) => o.status,
            OrderView::Redacted(o) => o.status,
        }
    }

    pub fn is_redacted(&self) -> bool {
        matches!(self, OrderView::Redacted(_))
    }
}

/// Both legs after the Confirmed transition. No requester is known, so
/// neither side's terms are shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledResponse {
    pub reference: String,
    pub order: PublicOrder,
    pub matched_order: PublicOrder,
    /// Hex SHA-256 of the proof, for pipeline runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_digest: Option<String>,
    #[serde(default)]
    pub amounts_diverged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Response {
    Submitted(SubmitOrderResponse),
    Settled(SettledResponse),
    Cancelled(PublicOrder),
    Orders(Vec<OrderView>),
    Order(OrderView),
    Unmatched {
        order_id: OrderId,
        matched_order_id: OrderId,
    },
}
