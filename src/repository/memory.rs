//! In-memory order repository.
//!
//! ## Memory Model
//!
//! - **Slab**: Row storage with O(1) insert and lookup by key
//! - **HashMap**: Order id to slab key mapping
//!
//! Rows are never removed (terminal orders stay queryable), so slab keys are
//! stable for the lifetime of the repository.
//!
//! All writes, including the conditional ones, happen under one write lock,
//! which makes each compare-and-swap atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use slab::Slab;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repository::{
    Claim, ClaimOutcome, ClaimTicket, NewOrderRow, OrderFilter, OrderRepository, OrderRow,
    RepoError, RowUpdate, UpdateOutcome,
};
use crate::types::{OrderId, OrderStatus};

#[derive(Debug, Default)]
struct Table {
    rows: Slab<OrderRow>,
    index: HashMap<OrderId, usize>,
    next_seq: u64,
}

impl Table {
    fn get_mut(&mut self, id: OrderId) -> Option<&mut OrderRow> {
        let key = *self.index.get(&id)?;
        self.rows.get_mut(key)
    }
}

/// Repository backed by a slab behind a `tokio::sync::RwLock`.
#[derive(Debug, Default)]
pub struct MemoryOrderRepository {
    table: RwLock<Table>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: RwLock::new(Table {
                rows: Slab::with_capacity(capacity),
                index: HashMap::with_capacity(capacity),
                next_seq: 0,
            }),
        }
    }

    /// Number of stored rows
    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Insert a fully formed row, e.g. one written by an earlier deployment.
    pub async fn import(&self, mut row: OrderRow) -> OrderRow {
        let mut table = self.table.write().await;
        table.next_seq += 1;
        row.seq = table.next_seq;
        let key = table.rows.insert(row.clone());
        table.index.insert(row.id, key);
        row
    }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn insert(&self, row: NewOrderRow) -> Result<OrderRow, RepoError> {
        let now = Utc::now();
        let mut table = self.table.write().await;
        table.next_seq += 1;

        let stored = OrderRow {
            id: Uuid::new_v4(),
            owner: row.owner,
            asset: row.asset,
            quote_asset: row.quote_asset,
            sealed: row.sealed,
            status: OrderStatus::Open,
            settlement_reference: None,
            claim: None,
            seq: table.next_seq,
            created_at: now,
            updated_at: now,
        };
        let key = table.rows.insert(stored.clone());
        table.index.insert(stored.id, key);
        Ok(stored)
    }

    async fn get_by_id(&self, id: OrderId) -> Result<Option<OrderRow>, RepoError> {
        let table = self.table.read().await;
        Ok(table
            .index
            .get(&id)
            .and_then(|&key| table.rows.get(key))
            .cloned())
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<OrderRow>, RepoError> {
        let table = self.table.read().await;
        let mut rows: Vec<OrderRow> = table
            .rows
            .iter()
            .map(|(_, row)| row)
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        Ok(rows)
    }

    async fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        update: RowUpdate,
    ) -> Result<UpdateOutcome, RepoError> {
        let mut table = self.table.write().await;
        let Some(row) = table.get_mut(id) else {
            return Ok(UpdateOutcome::Missing);
        };

        if let Some(claim) = row.claim {
            if claim.settling && update.ticket != Some(claim.ticket) {
                return Ok(UpdateOutcome::Settling);
            }
        }
        if row.status != expected
            || !row.status.can_transition_to(update.status)
            || (row.settlement_reference.is_some() && update.settlement_reference.is_some())
        {
            return Ok(UpdateOutcome::Conflict {
                current: row.status,
            });
        }

        row.status = update.status;
        if let Some(filled) = update.filled {
            row.sealed.filled = filled;
        }
        if update.settlement_reference.is_some() {
            row.settlement_reference = update.settlement_reference;
        }
        if row.status.is_terminal() {
            row.claim = None;
        }
        row.updated_at = Utc::now();
        Ok(UpdateOutcome::Applied(row.clone()))
    }

    async fn try_claim(
        &self,
        id: OrderId,
        by: OrderId,
        ticket: ClaimTicket,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome, RepoError> {
        let mut table = self.table.write().await;
        let Some(row) = table.get_mut(id) else {
            return Ok(ClaimOutcome::Missing);
        };

        if row.status != OrderStatus::Open {
            return Ok(ClaimOutcome::NotOpen {
                current: row.status,
            });
        }
        if let Some(claim) = row.claim {
            if claim.settling {
                return Ok(ClaimOutcome::Settling);
            }
            if claim.ticket != ticket && !claim.is_stale(stale_before) {
                return Ok(ClaimOutcome::Taken { by: claim.by });
            }
        }

        let now = Utc::now();
        row.claim = Some(Claim {
            by,
            ticket,
            at: now,
            settling: false,
        });
        row.updated_at = now;
        Ok(ClaimOutcome::Claimed(row.clone()))
    }

    async fn release_claim(&self, id: OrderId, ticket: ClaimTicket) -> Result<bool, RepoError> {
        let mut table = self.table.write().await;
        let Some(row) = table.get_mut(id) else {
            return Ok(false);
        };
        match row.claim {
            Some(claim) if claim.ticket == ticket && !claim.settling => {
                row.claim = None;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn begin_settlement(&self, id: OrderId, ticket: ClaimTicket) -> Result<ClaimOutcome, RepoError> {
        let mut table = self.table.write().await;
        let Some(row) = table.get_mut(id) else {
            return Ok(ClaimOutcome::Missing);
        };

        if row.status != OrderStatus::Open {
            return Ok(ClaimOutcome::NotOpen {
                current: row.status,
            });
        }
        match row.claim.as_mut() {
            Some(claim) if claim.ticket == ticket => {
                if claim.settling {
                    return Ok(ClaimOutcome::Settling);
                }
                claim.settling = true;
            }
            Some(claim) if claim.settling => return Ok(ClaimOutcome::Settling),
            Some(claim) => return Ok(ClaimOutcome::Taken { by: claim.by }),
            None => return Ok(ClaimOutcome::NotHeld),
        }
        row.updated_at = Utc::now();
        Ok(ClaimOutcome::Claimed(row.clone()))
    }

    async fn end_settlement(&self, id: OrderId, ticket: ClaimTicket) -> Result<bool, RepoError> {
        let mut table = self.table.write().await;
        let Some(row) = table.get_mut(id) else {
            return Ok(false);
        };
        match row.claim {
            Some(claim) if claim.ticket == ticket => {
                row.claim = None;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
