//! Match candidate: a proposed trade between an incoming order and a resting
//! one.
//!
//! A candidate is the `Matched` stage of settlement. It exists in memory only;
//! neither order's persisted status changes until the on-chain leg confirms.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::order::{Order, OrderId, Owner, Side};
use crate::types::price;

/// A proposed match between two orders.
///
/// ## Terminology
///
/// - **Incoming**: The order whose submission triggered the match
/// - **Resting**: The older order that was already in the book
///
/// ## Price & Size
///
/// The clearing price is the mean of both stated prices. The size is the
/// smaller of the two open sizes; any excess on the larger order is not
/// re-queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// Order that triggered the match
    pub incoming_order_id: OrderId,

    /// Resting order selected from the book
    pub matched_order_id: OrderId,

    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer: Owner,
    pub seller: Owner,

    pub asset: String,
    pub quote_asset: String,

    /// Mean of both stated prices
    pub clearing_price: Decimal,

    /// Base-asset quantity to settle
    pub size: Decimal,
}

impl MatchCandidate {
    /// Build a candidate from an incoming and a resting order.
    ///
    /// # Returns
    ///
    /// `None` if the pair is not matchable: same side, same owner, different
    /// pair, nothing left open, or arithmetic overflow.
    pub fn between(incoming: &Order, resting: &Order) -> Option<Self> {
        if incoming.side == resting.side
            || incoming.owner == resting.owner
            || incoming.asset != resting.asset
            || incoming.quote_asset != resting.quote_asset
        {
            return None;
        }

        let size = incoming.open_size().min(resting.open_size());
        if size.is_zero() {
            return None;
        }
        let clearing_price = price::clearing_price(incoming.price, resting.price)?;

        let (buy, sell) = match incoming.side {
            Side::Buy => (incoming, resting),
            Side::Sell => (resting, incoming),
        };

        Some(Self {
            incoming_order_id: incoming.id,
            matched_order_id: resting.id,
            buy_order_id: buy.id,
            sell_order_id: sell.id,
            buyer: buy.owner.clone(),
            seller: sell.owner.clone(),
            asset: incoming.asset.clone(),
            quote_asset: incoming.quote_asset.clone(),
            clearing_price,
            size,
        })
    }

    /// Quote-asset amount at the clearing price
    pub fn amount_quote(&self) -> Option<Decimal> {
        price::checked_value(self.size, self.clearing_price)
    }

    /// Reference-feed symbol for the pair, e.g. `ETHUSDT`
    pub fn symbol(&self) -> String {
        format!("{}{}", self.asset, self.quote_asset).to_uppercase()
    }

    /// Whether `id` is one of the two legs
    pub fn involves(&self, id: OrderId) -> bool {
        self.buy_order_id == id || self.sell_order_id == id
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
