//! Proof-gated settlement.
//!
//! A match only becomes a fill after three external steps succeed in order:
//! a fresh reference price, a valid trade proof, and a confirmed on-chain
//! transaction. See [`coordinator`] for the stage machine.

pub mod collaborators;
pub mod coordinator;
pub mod price_feed;
pub mod simulated;

pub use collaborators::{
    BookTicker, CollaboratorError, PriceOracle, Proof, ProofGenerator, SettleRequest,
    SettlementContract, TxStatus,
};
pub use coordinator::{
    SettledPair, Settlement, SettlementCoordinator, SettlementError, SettlementPolicy,
    SettlementStage,
};
pub use price_feed::CachedPriceOracle;
pub use simulated::{EchoProver, LedgerContract, StaticPriceOracle};
