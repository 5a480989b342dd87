//! Core data types for the dark pool
//!
//! All quantities use `rust_decimal::Decimal`; nothing touches floating point.
//!
//! ## Types
//!
//! - [`Order`]: Decrypted order projection
//! - [`Side`]: Buy or Sell
//! - [`OrderStatus`]: Open, Filled, Cancelled
//! - [`PublicOrder`]: Redacted view for non-owners
//! - [`MatchCandidate`]: A proposed trade between two orders
//! - [`SettlementReceipt`]: Outcome of a confirmed proof + on-chain leg

mod order;
mod trade;
mod receipt;
pub mod price;

// Re-export all types at module level
pub use order::{Order, OrderId, OrderStatus, Owner, PublicOrder, Side};
pub use trade::MatchCandidate;
pub use receipt::{ProofParams, SettlementReceipt};
