//! Order repository adapter.
//!
//! A thin contract over the storage collaborator. Rows hold confidential
//! fields as ciphertext ([`SealedFields`]); everything else is in clear so it
//! can be filtered and ordered.
//!
//! ## Concurrency
//!
//! There is no lock service. The only synchronization primitives are
//! conditional writes:
//!
//! - [`OrderRepository::update_status`]: compare-and-swap on `status`
//! - [`OrderRepository::try_claim`]: compare-and-swap on the match claim,
//!   guarded by `status == Open`
//! - [`OrderRepository::begin_settlement`]: marks a held claim as settling
//!
//! Each must be evaluated atomically against the row's state at write time.
//!
//! ## Claims
//!
//! A match attempt draws a fresh [`ClaimTicket`] and claims both legs under
//! it, lower id first ([`OrderRepository::claim_pair`]). A row holds at most
//! one live ticket, so an order is part of at most one match at a time.
//!
//! Settlement then flips both claims to settling. A settling claim never
//! expires, cannot be released by [`OrderRepository::release_claim`], and
//! blocks every status update that does not carry its ticket.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::crypto::SealedFields;
use crate::types::{OrderId, OrderStatus, Owner, PublicOrder};

pub use memory::MemoryOrderRepository;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepoError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Identifies one match attempt. Both legs of a match carry the same ticket.
pub type ClaimTicket = Uuid;

/// Marker that an order has been selected for a match.
///
/// Claims are not a status: the order stays OPEN and visible as such.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    /// The counterparty order this row is reserved for
    pub by: OrderId,
    pub ticket: ClaimTicket,
    pub at: DateTime<Utc>,
    /// A settlement is driving this claim
    pub settling: bool,
}

impl Claim {
    /// Whether the claim was taken before `cutoff` and may be overridden.
    /// Settling claims never go stale.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        !self.settling && self.at < cutoff
    }

    /// Whether `self` (on `id`) and `other` (on `other_id`) reserve the two
    /// orders for each other under one ticket.
    pub fn pairs_with(&self, id: OrderId, other: &Claim, other_id: OrderId) -> bool {
        self.ticket == other.ticket && self.by == other_id && other.by == id
    }
}

/// Claims taken before this instant are stale under `ttl`.
pub fn stale_cutoff(ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Persisted order row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRow {
    pub id: OrderId,
    pub owner: Owner,
    pub asset: String,
    pub quote_asset: String,
    pub sealed: SealedFields,
    pub status: OrderStatus,
    pub settlement_reference: Option<String>,
    pub claim: Option<Claim>,
    /// Insertion sequence; breaks `created_at` ties
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    /// Redacted view; needs no key since only clear columns are read.
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

/// Row to insert. The repository assigns id, status and timestamps.
#[derive(Debug, Clone)]
pub struct NewOrderRow {
    pub owner: Owner,
    pub asset: String,
    pub quote_asset: String,
    pub sealed: SealedFields,
}

/// Fields written by a status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdate {
    pub status: OrderStatus,
    /// New sealed `filled`, if it changes
    pub filled: Option<String>,
    /// Settlement reference; may only be set once
    pub settlement_reference: Option<String>,
    /// Ticket of the settlement making this write. Required while the row
    /// is settling.
    pub ticket: Option<ClaimTicket>,
}

impl RowUpdate {
    pub fn cancel() -> Self {
        Self {
            status: OrderStatus::Cancelled,
            filled: None,
            settlement_reference: None,
            ticket: None,
        }
    }

    pub fn fill(sealed_filled: String, reference: String) -> Self {
        Self {
            status: OrderStatus::Filled,
            filled: Some(sealed_filled),
            settlement_reference: Some(reference),
            ticket: None,
        }
    }

    /// Make the write on behalf of the settlement holding `ticket`
    pub fn under(mut self, ticket: Option<ClaimTicket>) -> Self {
        self.ticket = ticket;
        self
    }
}

/// Outcome of a conditional status update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Precondition held; the row after the write
    Applied(OrderRow),
    /// Another writer got there first
    Conflict { current: OrderStatus },
    /// A settlement holds the row and the update does not carry its ticket
    Settling,
    Missing,
}

/// Outcome of a claim attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(OrderRow),
    /// A live claim under another ticket exists
    Taken { by: OrderId },
    /// A settlement already drives the claim
    Settling,
    /// The caller's ticket is not on the row
    NotHeld,
    NotOpen { current: OrderStatus },
    Missing,
}

/// Outcome of [`OrderRepository::claim_pair`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairClaim {
    Claimed,
    /// `id` refused the claim; nothing is left held
    Refused { id: OrderId, outcome: ClaimOutcome },
}

/// Equality filters for [`OrderRepository::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub asset: Option<String>,
    pub owner: Option<Owner>,
    pub exclude_owner: Option<Owner>,
}

impl OrderFilter {
    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = Some(asset.into());
        self
    }

    pub fn owner(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn exclude_owner(mut self, owner: Owner) -> Self {
        self.exclude_owner = Some(owner);
        self
    }

    pub fn matches(&self, row: &OrderRow) -> bool {
        self.status.map_or(true, |s| row.status == s)
            && self.asset.as_ref().map_or(true, |a| &row.asset == a)
            && self.owner.as_ref().map_or(true, |o| &row.owner == o)
            && self.exclude_owner.as_ref().map_or(true, |o| &row.owner != o)
    }
}

/// Storage contract for order rows.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persist a new OPEN row and return it with its id.
    async fn insert(&self, row: NewOrderRow) -> Result<OrderRow, RepoError>;

    async fn get_by_id(&self, id: OrderId) -> Result<Option<OrderRow>, RepoError>;

    /// Rows matching `filter`, ordered by `created_at` then insertion order.
    async fn list(&self, filter: &OrderFilter) -> Result<Vec<OrderRow>, RepoError>;

    /// Apply `update` only if the row's status is still `expected`.
    async fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        update: RowUpdate,
    ) -> Result<UpdateOutcome, RepoError>;

    /// Reserve an OPEN row for counterparty `by` under `ticket`.
    ///
    /// Succeeds if the row is unclaimed, already holds `ticket`, or its claim
    /// is older than `stale_before`. Fails with [`ClaimOutcome::Settling`]
    /// once a settlement drives the claim.
    async fn try_claim(
        &self,
        id: OrderId,
        by: OrderId,
        ticket: ClaimTicket,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome, RepoError>;

    /// Drop a claim held under `ticket` that is not settling. Returns whether
    /// one was dropped.
    async fn release_claim(&self, id: OrderId, ticket: ClaimTicket) -> Result<bool, RepoError>;

    /// Mark the claim held under `ticket` as settling. Fails if the ticket is
    /// not on the row or is already settling.
    async fn begin_settlement(&self, id: OrderId, ticket: ClaimTicket) -> Result<ClaimOutcome, RepoError>;

    /// Drop the claim held under `ticket`, settling or not.
    async fn end_settlement(&self, id: OrderId, ticket: ClaimTicket) -> Result<bool, RepoError>;

    /// Claim `a` and `b` for each other under one ticket, lower id first.
    ///
    /// Racing attempts on the same pair contend on the same first row, so at
    /// most one of them can hold both legs.
    async fn claim_pair(
        &self,
        a: OrderId,
        b: OrderId,
        ticket: ClaimTicket,
        stale_before: DateTime<Utc>,
    ) -> Result<PairClaim, RepoError> {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };

        match self.try_claim(first, second, ticket, stale_before).await? {
            ClaimOutcome::Claimed(_) => {}
            outcome => return Ok(PairClaim::Refused { id: first, outcome }),
        }

        let outcome = match self.try_claim(second, first, ticket, stale_before).await {
            Ok(ClaimOutcome::Claimed(_)) => return Ok(PairClaim::Claimed),
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(release) = self.release_claim(first, ticket).await {
                    warn!(order_id = %first, error = %release, "could not release claim");
                }
                return Err(e);
            }
        };
        self.release_claim(first, ticket).await?;
        Ok(PairClaim::Refused { id: second, outcome })
    }

    /// OPEN rows for `asset` not owned by `exclude_owner`, oldest first.
    ///
    /// Side is encrypted and cannot be filtered here; the matcher filters it
    /// after decryption.
    async fn list_open_counterparties(
        &self,
        asset: &str,
        exclude_owner: &Owner,
    ) -> Result<Vec<OrderRow>, RepoError> {
        let filter = OrderFilter::default()
            .status(OrderStatus::Open)
            .asset(asset)
            .exclude_owner(exclude_owner.clone());
        self.list(&filter).await
    }
}
