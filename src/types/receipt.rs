//! Settlement receipt and the public parameters a proof attests to.
//!
//! The receipt is the outcome of a successful proof + on-chain leg. It records
//! which parameters were actually attested (the collaborator's echo), which
//! ones were intended locally, and a SHA-256 digest of the proof so the
//! settlement can be audited without storing the proof itself.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::order::OrderId;
use crate::types::price;

/// Public inputs of a trade-validity proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofParams {
    /// Base-asset amount
    pub amount_base: Decimal,
    /// Quote-asset amount
    pub amount_quote: Decimal,
    /// Reference price (midpoint) at proof time
    pub reference_price: Decimal,
    /// Allowed deviation of the implied price from the reference
    pub tolerance_bps: u32,
}

impl ProofParams {
    /// Price implied by the two amounts
    pub fn implied_price(&self) -> Option<Decimal> {
        if self.amount_base.is_zero() {
            return None;
        }
        self.amount_quote.checked_div(self.amount_base)
    }

    /// Amounts scaled to 18-decimal integer base units
    pub fn base_units(&self) -> Option<(u128, u128)> {
        Some((
            price::to_base_units(self.amount_base)?,
            price::to_base_units(self.amount_quote)?,
        ))
    }

    /// Whether the amounts differ from `other`. Price and tolerance are
    /// ignored since only the amounts move funds.
    pub fn amounts_differ(&self, other: &ProofParams) -> bool {
        self.amount_base != other.amount_base || self.amount_quote != other.amount_quote
    }
}

/// Result of a confirmed proof + on-chain leg.
///
/// ## Example
///
/// ```
/// use dark_settlement::types::SettlementReceipt;
///
/// let digest = SettlementReceipt::compute_digest(b"proof bytes");
/// assert_eq!(digest.len(), 32);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,

    /// On-chain transaction id
    pub reference: String,

    /// SHA-256 of the proof bytes
    pub proof_digest: [u8; 32],

    /// Parameters the proof attests to (used on-chain)
    pub attested: ProofParams,

    /// Parameters computed locally from the match
    pub intended: ProofParams,

    /// Quantity recorded as `filled` on both orders
    pub filled: Decimal,

    pub settled_at: DateTime<Utc>,
}

impl SettlementReceipt {
    /// Compute SHA-256 hash of the given data
    pub fn compute_digest(data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let result = hasher.finalize();

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    }

    /// Get the proof digest as a hex string
    pub fn proof_digest_hex(&self) -> String {
        hex::encode(self.proof_digest)
    }

    /// Whether the collaborator attested different amounts than intended.
    ///
    /// The attested ones were used on-chain; a divergence needs review.
    pub fn amounts_diverged(&self) -> bool {
        self.attested.amounts_differ(&self.intended)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
