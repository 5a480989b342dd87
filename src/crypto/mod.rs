//! Confidentiality layer.
//!
//! Stateless transforms between the decrypted [`crate::types::Order`]
//! projection and the persisted [`crate::repository::OrderRow`]. See
//! [`cipher`] for the envelope format and key handling, and [`fields`] for the
//! per-field fallback rules.

pub mod cipher;
pub mod fields;

pub use cipher::{CryptoError, FieldCipher};
pub use fields::{open, open_verified, seal, seal_quantity, Opened, OrderTerms, SealedFields, SensitiveField};
