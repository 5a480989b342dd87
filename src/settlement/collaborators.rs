//! Contracts for the external collaborators of the settlement pipeline.
//!
//! - [`PriceOracle`]: live bid/ask for a symbol
//! - [`ProofGenerator`]: attests that trade parameters are fair
//! - [`SettlementContract`]: moves funds given a valid proof
//!
//! Every call may fail either because the collaborator could not be reached
//! or because it explicitly refused. The two are kept apart so users get an
//! accurate message; both halt the pipeline.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::price;
use crate::types::{Owner, ProofParams};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Transport failure, no answer
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The collaborator answered and said no
    #[error("rejected: {0}")]
    Rejected(String),
}

// ============================================================================
// Price oracle
// ============================================================================

/// Best bid/ask for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookTicker {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl BookTicker {
    pub fn new(bid: Decimal, ask: Decimal) -> Self {
        Self { bid, ask }
    }

    /// Reference price: midpoint of bid and ask.
    ///
    /// `None` for an empty or crossed-to-zero book.
    pub fn midpoint(&self) -> Option<Decimal> {
        if self.bid.is_sign_negative() || self.ask.is_sign_negative() {
            return None;
        }
        price::midpoint(self.bid, self.ask).filter(|m| !m.is_zero())
    }
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn book_ticker(&self, symbol: &str) -> Result<BookTicker, CollaboratorError>;
}

// ============================================================================
// Proof generator
// ============================================================================

/// Output of the proof collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Self-reported validity; `false` is a hard stop
    pub valid: bool,
    /// Public parameters as attested by the proof
    pub public: ProofParams,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ProofGenerator: Send + Sync {
    async fn prove(&self, request: &ProofParams) -> Result<Proof, CollaboratorError>;
}

// ============================================================================
// Settlement contract
// ============================================================================

/// On-chain settlement call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleRequest {
    pub proof: Vec<u8>,
    /// Echoed public parameters from the proof
    pub public: ProofParams,
    pub buyer: Owner,
    pub seller: Owner,
}

/// Final state of a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Confirmed,
    Reverted,
}

#[async_trait]
pub trait SettlementContract: Send + Sync {
    /// Broadcast the settlement transaction; returns its id once accepted.
    async fn submit(&self, request: &SettleRequest) -> Result<String, CollaboratorError>;

    /// Wait until the transaction is irreversible (or reverted).
    async fn wait_for_confirmation(&self, tx_id: &str) -> Result<TxStatus, CollaboratorError>;
}
