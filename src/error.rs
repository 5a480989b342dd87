//! Service-level errors.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::engine::MatchError;
use crate::repository::RepoError;
use crate::settlement::SettlementError;
use crate::types::{OrderId, OrderStatus};

/// Coarse classification of a [`ServiceError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input, rejected before any side effect
    Validation,
    NotFound,
    /// The order exists but is not in a state that allows the operation
    NotEligible,
    /// Another writer resolved or reserved the order first
    Conflict,
    /// A price, proof or chain collaborator failed; orders stay OPEN
    Collaborator,
    /// One leg of a settlement committed and the other did not
    PartialSettlement,
    Internal,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("order {id} is {status} and cannot be changed")]
    NotEligible { id: OrderId, status: OrderStatus },

    #[error("order {id} already resolved ({status})")]
    Conflict { id: OrderId, status: OrderStatus },

    #[error("order {0} is reserved by an in-flight match or settlement")]
    Reserved(OrderId),

    #[error("settlement failed: {0}")]
    Settlement(SettlementError),

    #[error("partial settlement {reference}: {committed} filled, {conflicted} not; reconciliation required")]
    PartialSettlement {
        committed: OrderId,
        conflicted: OrderId,
        reference: String,
    },

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::NotEligible { .. } => ErrorKind::NotEligible,
            ServiceError::Conflict { .. } | ServiceError::Reserved(_) => ErrorKind::Conflict,
            ServiceError::Settlement(_) => ErrorKind::Collaborator,
            ServiceError::PartialSettlement { .. } => ErrorKind::PartialSettlement,
            ServiceError::Repo(_) | ServiceError::Crypto(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        ServiceError::Validation(msg.into())
    }
}

impl From<MatchError> for ServiceError {
    fn from(e: MatchError) -> Self {
        match e {
            MatchError::Repo(e) => ServiceError::Repo(e),
            MatchError::Crypto(e) => ServiceError::Crypto(e),
        }
    }
}

impl From<SettlementError> for ServiceError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::NotFound(id) => ServiceError::NotFound(id),
            SettlementError::AlreadyResolved { id, status } => ServiceError::Conflict { id, status },
            SettlementError::Reserved(id) => ServiceError::Reserved(id),
            SettlementError::PairMismatch(a, b) => {
                ServiceError::Validation(format!("orders {} and {} do not form a valid pair", a, b))
            }
            SettlementError::Partial {
                committed,
                conflicted,
                reference,
            } => ServiceError::PartialSettlement {
                committed,
                conflicted,
                reference,
            },
            SettlementError::Repo(e) => ServiceError::Repo(e),
            SettlementError::Crypto(e) => ServiceError::Crypto(e),
            other => ServiceError::Settlement(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
