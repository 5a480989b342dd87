//! Order types for the dark pool.
//!
//! ## Projections
//!
//! An [`Order`] is the *decrypted* in-memory projection of a persisted row.
//! It exists only for the duration of one request. The persisted form lives
//! in [`crate::repository::OrderRow`], where the confidential fields are
//! ciphertext.
//!
//! ## Confidential Fields
//!
//! `side`, `size`, `price`, `order_value` and `filled` are confidential. Only
//! the owner and the matching logic ever see them in clear; everyone else gets
//! a [`PublicOrder`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique order identifier, assigned at creation.
pub type OrderId = Uuid;

// ============================================================================
// Side enum
// ============================================================================

/// Order side: Buy or Sell
///
/// Serialized as `"BUY"` / `"SELL"`, which is also the plaintext that gets
/// encrypted at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid) - wants to purchase the asset
    Buy,
    /// Sell order (ask) - wants to sell the asset
    Sell,
}

impl Side {
    /// Wire/plaintext form
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// Returns the opposite side
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ();

    /// Case-insensitive, so legacy rows written as `"buy"` still parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            _ => Err(()),
        }
    }
}

// ============================================================================
// OrderStatus enum
// ============================================================================

/// Persisted lifecycle status.
///
/// Transitions are monotonic: `Open -> Filled` or `Open -> Cancelled`.
/// Nothing leaves a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the order can still change status
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Open)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Open, OrderStatus::Filled) | (OrderStatus::Open, OrderStatus::Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Owner
// ============================================================================

/// Identity of the submitter, normalized to lower case.
///
/// Wallet addresses arrive in mixed (checksummed) case. Two spellings of the
/// same address must compare equal, otherwise self-trade prevention breaks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Owner(String);

impl Owner {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Owner(raw.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Owner {
    fn from(s: String) -> Self {
        Owner::new(s)
    }
}

impl From<&str> for Owner {
    fn from(s: &str) -> Self {
        Owner::new(s)
    }
}

impl From<Owner> for String {
    fn from(o: Owner) -> Self {
        o.0
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Order struct
// ============================================================================

/// Decrypted order projection.
///
/// ## Example
///
/// ```
/// use dark_settlement::types::{Order, Side, OrderStatus};
///
/// let order = Order::new("0xAbC", Side::Buy, "ETH", "USDT", "1.5".parse().unwrap(), "2000".parse().unwrap());
/// assert_eq!(order.owner.as_str(), "0xabc");
/// assert_eq!(order.order_value, "3000".parse().unwrap());
/// assert_eq!(order.status, OrderStatus::Open);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: Owner,
    pub side: Side,
    pub asset: String,
    pub quote_asset: String,
    pub size: Decimal,
    /// Informational only; settlement is checked against a live reference
    pub price: Decimal,
    pub order_value: Decimal,
    pub filled: Decimal,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a new OPEN order with a fresh id.
    ///
    /// `order_value` saturates to `Decimal::MAX` on overflow; callers that
    /// accept user input validate with [`crate::types::price::checked_value`]
    /// first.
    pub fn new(
        owner: impl Into<Owner>,
        side: Side,
        asset: impl Into<String>,
        quote_asset: impl Into<String>,
        size: Decimal,
        price: Decimal,
    ) -> Self {
        let now = Utc::now();
        let order_value = size.checked_mul(price).unwrap_or(Decimal::MAX).normalize();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            side,
            asset: asset.into(),
            quote_asset: quote_asset.into(),
            size,
            price,
            order_value,
            filled: Decimal::ZERO,
            status: OrderStatus::Open,
            settlement_reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Quantity still open for matching.
    ///
    /// Fills are all-or-nothing today, so this is either `size` or zero, but
    /// deriving it from `filled` keeps carry-over possible later.
    pub fn open_size(&self) -> Decimal {
        (self.size - self.filled).max(Decimal::ZERO)
    }

    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }

    /// Redacted view for non-owners
    pub fn to_public(&self) -> PublicOrder {
        PublicOrder {
            id: self.id,
            status: self.status,
            asset: self.asset.clone(),
            quote_asset: self.quote_asset.clone(),
            settlement_reference: self.settlement_reference.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Non-confidential fields only. The owner is withheld too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicOrder {
    pub id: OrderId,
    pub status: OrderStatus,
    pub asset: String,
    pub quote_asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Unit Tests
// ============================================================================
