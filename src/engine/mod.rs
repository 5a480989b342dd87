//! Matching engine module.
//!
//! ## Matching Rules
//!
//! - **Same asset pair, opposite side, different owner**
//! - **Strict FIFO**: the oldest eligible order wins, regardless of price
//! - **Clearing price**: mean of both stated prices
//! - **Clearing size**: the smaller size; the excess is not re-queued
//!
//! Side is confidential, so every comparison happens on decrypted projections.

pub mod matcher;

pub use matcher::{select_counterparty, MatchError, Matcher};
