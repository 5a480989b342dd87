//! Encryption of the confidential order field set.
//!
//! Only `side`, `size`, `price`, `order_value` and `filled` are sealed. The
//! rest of the row stays in clear so storage can index it.
//!
//! Opening is per field. A field that fails authentication, or is not an
//! envelope at all, is read as legacy plaintext and reported as unverified.
//! Callers on the matching and settlement path must reject unverified
//! projections via [`Opened::into_verified`].

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::cipher::{CryptoError, FieldCipher};
use crate::repository::OrderRow;
use crate::types::price;
use crate::types::{Order, Side};

/// A confidential order field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensitiveField {
    Side,
    Size,
    Price,
    OrderValue,
    Filled,
}

impl SensitiveField {
    pub fn as_str(self) -> &'static str {
        match self {
            SensitiveField::Side => "side",
            SensitiveField::Size => "size",
            SensitiveField::Price => "price",
            SensitiveField::OrderValue => "order_value",
            SensitiveField::Filled => "filled",
        }
    }
}

impl fmt::Display for SensitiveField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plaintext confidential terms of an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerms {
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub order_value: Decimal,
    pub filled: Decimal,
}

impl From<&Order> for OrderTerms {
    fn from(o: &Order) -> Self {
        Self {
            side: o.side,
            size: o.size,
            price: o.price,
            order_value: o.order_value,
            filled: o.filled,
        }
    }
}

/// Confidential terms as persisted: one envelope per field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedFields {
    pub side: String,
    pub size: String,
    pub price: String,
    pub order_value: String,
    pub filled: String,
}

impl SealedFields {
    fn get(&self, field: SensitiveField) -> &str {
        match field {
            SensitiveField::Side => &self.side,
            SensitiveField::Size => &self.size,
            SensitiveField::Price => &self.price,
            SensitiveField::OrderValue => &self.order_value,
            SensitiveField::Filled => &self.filled,
        }
    }
}

/// Encrypt the confidential terms.
pub fn seal(cipher: &FieldCipher, terms: &OrderTerms) -> Result<SealedFields, CryptoError> {
    Ok(SealedFields {
        side: cipher.encrypt(terms.side.as_str())?,
        size: cipher.encrypt(&terms.size.to_string())?,
        price: cipher.encrypt(&terms.price.to_string())?,
        order_value: cipher.encrypt(&terms.order_value.to_string())?,
        filled: cipher.encrypt(&terms.filled.to_string())?,
    })
}

/// Encrypt a single quantity, e.g. a new `filled` value.
pub fn seal_quantity(cipher: &FieldCipher, value: Decimal) -> Result<String, CryptoError> {
    cipher.encrypt(&value.to_string())
}

/// A decrypted projection plus the fields that could not be authenticated.
#[derive(Debug, Clone)]
pub struct Opened {
    pub order: Order,
    pub unverified: Vec<SensitiveField>,
}

impl Opened {
    pub fn is_verified(&self) -> bool {
        self.unverified.is_empty()
    }

    /// The projection, only if every field authenticated.
    pub fn into_verified(self) -> Result<Order, CryptoError> {
        match self.unverified.first() {
            None => Ok(self.order),
            Some(field) => Err(CryptoError::CorruptField {
                field: field.as_str(),
            }),
        }
    }
}

/// Decrypt a persisted row into an [`Order`] projection.
///
/// # Errors
///
/// * [`CryptoError::MissingSecret`] - if no key is configured
/// * [`CryptoError::CorruptField`] - if a field is neither a valid envelope
///   nor parseable as plaintext
pub fn open(cipher: &FieldCipher, row: &OrderRow) -> Result<Opened, CryptoError> {
    let mut unverified = Vec::new();
    let mut read = |field: SensitiveField| -> Result<String, CryptoError> {
        let raw = row.sealed.get(field);
        match cipher.decrypt(raw) {
            Ok(plain) => Ok(plain),
            Err(CryptoError::MissingSecret) => Err(CryptoError::MissingSecret),
            Err(e) => {
                warn!(
                    order_id = %row.id,
                    field = %field,
                    error = %e,
                    "field failed authentication, reading as legacy plaintext"
                );
                unverified.push(field);
                Ok(raw.to_string())
            }
        }
    };

    let side = read(SensitiveField::Side)?;
    let size = read(SensitiveField::Size)?;
    let price_raw = read(SensitiveField::Price)?;
    let order_value = read(SensitiveField::OrderValue)?;
    let filled = read(SensitiveField::Filled)?;

    let corrupt = |field: SensitiveField| CryptoError::CorruptField {
        field: field.as_str(),
    };
    let terms = OrderTerms {
        side: side.parse().map_err(|_| corrupt(SensitiveField::Side))?,
        size: price::parse_non_negative(&size).ok_or_else(|| corrupt(SensitiveField::Size))?,
        price: price::parse_non_negative(&price_raw)
            .ok_or_else(|| corrupt(SensitiveField::Price))?,
        order_value: price::parse_non_negative(&order_value)
            .ok_or_else(|| corrupt(SensitiveField::OrderValue))?,
        filled: price::parse_non_negative(&filled)
            .ok_or_else(|| corrupt(SensitiveField::Filled))?,
    };

    Ok(Opened {
        order: project(row, terms),
        unverified,
    })
}

/// Decrypt and require every field to authenticate.
pub fn open_verified(cipher: &FieldCipher, row: &OrderRow) -> Result<Order, CryptoError> {
    open(cipher, row)?.into_verified()
}

fn project(row: &OrderRow, terms: OrderTerms) -> Order {
    Order {
        id: row.id,
        owner: row.owner.clone(),
        side: terms.side,
        asset: row.asset.clone(),
        quote_asset: row.quote_asset.clone(),
        size: terms.size,
        price: terms.price,
        order_value: terms.order_value,
        filled: terms.filled,
        status: row.status,
        settlement_reference: row.settlement_reference.clone(),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
