//! # Dark Settlement
//!
//! Private order book with proof-gated settlement.
//!
//! ## Architecture
//!
//! - **Types**: Order projection, match candidate, settlement receipt
//! - **Crypto**: AES-256-GCM sealing of the confidential order fields
//! - **Repository**: Storage contract with conditional writes
//! - **Engine**: FIFO matcher over decrypted projections
//! - **Settlement**: Reference price, proof and on-chain confirmation
//! - **Service**: Submit, confirm, cancel, query, unmatch
//!
//! ## Design Principles
//!
//! 1. **Confidential at rest**: side, size, price, value and fill never hit
//!    storage in plaintext
//! 2. **No Floating Point**: All quantities are `rust_decimal::Decimal`
//! 3. **Optimistic concurrency**: Status compare-and-swap is the only lock
//! 4. **Nothing fills without a proof**: A match becomes a fill only after a
//!    valid proof and a confirmed transaction

// ============================================================================
// Module declarations
// ============================================================================

/// Core data types: Order, MatchCandidate, SettlementReceipt
pub mod types;

/// Field encryption and legacy plaintext fallback
pub mod crypto;

/// Order storage contract and in-memory backend
pub mod repository;

/// Matching engine: FIFO counterparty selection
pub mod engine;

/// Settlement pipeline and its external collaborators
pub mod settlement;

/// Client operations and wire schema
pub mod service;

pub mod config;
pub mod error;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use config::Config;
pub use error::{ErrorKind, ServiceError};
pub use service::{OrderService, Request, Response};
pub use types::{MatchCandidate, Order, OrderId, OrderStatus, Owner, Side, SettlementReceipt};
