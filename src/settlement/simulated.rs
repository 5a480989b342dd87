//! In-process stand-ins for the settlement collaborators.
//!
//! Used by the demo binary and the integration tests. Each one can be told to
//! stall or fail so the pipeline's failure paths can be driven
//! deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};

use crate::settlement::collaborators::{
    BookTicker, CollaboratorError, PriceOracle, Proof, ProofGenerator, SettleRequest,
    SettlementContract, TxStatus,
};
use crate::types::price;
use crate::types::ProofParams;

// ============================================================================
// Price oracle
// ============================================================================

/// Fixed book tickers keyed by symbol
#[derive(Debug, Default)]
pub struct StaticPriceOracle {
    tickers: RwLock<HashMap<String, BookTicker>>,
    delay: Duration,
    offline: AtomicBool,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticker(mut self, symbol: &str, bid: Decimal, ask: Decimal) -> Self {
        self.tickers
            .get_mut()
            .insert(symbol.to_uppercase(), BookTicker::new(bid, ask));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn set(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.tickers
            .write()
            .await
            .insert(symbol.to_uppercase(), BookTicker::new(bid, ask));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn book_ticker(&self, symbol: &str) -> Result<BookTicker, CollaboratorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unreachable("price feed offline".to_string()));
        }
        self.tickers
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| CollaboratorError::Rejected(format!("unknown symbol {}", symbol)))
    }
}

// ============================================================================
// Proof generator
// ============================================================================

/// What the simulated proof commits to
#[derive(Serialize)]
struct Transcript {
    amount_base_units: String,
    amount_quote_units: String,
    reference_price: Decimal,
    tolerance_bps: u32,
}

/// Checks the price-tolerance rule in the clear and echoes the parameters.
///
/// `attesting` makes it echo different parameters than requested, the way a
/// misbehaving or rounding prover might.
#[derive(Debug, Default)]
pub struct EchoProver {
    delay: Duration,
    attest: Option<ProofParams>,
}

impl EchoProver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn attesting(mut self, params: ProofParams) -> Self {
        self.attest = Some(params);
        self
    }
}

#[async_trait]
impl ProofGenerator for EchoProver {
    async fn prove(&self, request: &ProofParams) -> Result<Proof, CollaboratorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let public = self.attest.clone().unwrap_or_else(|| request.clone());
        let (base, quote) = public
            .base_units()
            .ok_or_else(|| CollaboratorError::Rejected("amounts out of range".to_string()))?;

        let valid = public.implied_price().map_or(false, |implied| {
            price::within_tolerance(implied, public.reference_price, public.tolerance_bps)
        });

        let transcript = Transcript {
            amount_base_units: base.to_string(),
            amount_quote_units: quote.to_string(),
            reference_price: public.reference_price,
            tolerance_bps: public.tolerance_bps,
        };
        let bytes = serde_json::to_vec(&transcript)
            .map_err(|e| CollaboratorError::Rejected(e.to_string()))?;

        Ok(Proof {
            valid,
            public,
            bytes,
        })
    }
}

// ============================================================================
// Settlement contract
// ============================================================================

/// Records every submitted settlement in memory.
#[derive(Debug, Default)]
pub struct LedgerContract {
    submitted: Mutex<Vec<(String, SettleRequest)>>,
    nonce: AtomicU64,
    revert: AtomicBool,
    delay: Duration,
}

impl LedgerContract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before confirmation is reported
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make every following transaction revert
    pub fn set_reverting(&self, revert: bool) {
        self.revert.store(revert, Ordering::SeqCst);
    }

    pub async fn submissions(&self) -> Vec<(String, SettleRequest)> {
        self.submitted.lock().await.clone()
    }
}

#[async_trait]
impl SettlementContract for LedgerContract {
    async fn submit(&self, request: &SettleRequest) -> Result<String, CollaboratorError> {
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(&request.proof);
        hasher.update(request.buyer.as_str().as_bytes());
        hasher.update(request.seller.as_str().as_bytes());
        hasher.update(nonce.to_be_bytes());
        let tx = format!("0x{}", hex::encode(hasher.finalize()));

        self.submitted.lock().await.push((tx.clone(), request.clone()));
        Ok(tx)
    }

    async fn wait_for_confirmation(&self, tx_id: &str) -> Result<TxStatus, CollaboratorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let known = self.submitted.lock().await.iter().any(|(tx, _)| tx == tx_id);
        if !known {
            return Err(CollaboratorError::Rejected(format!("unknown transaction {}", tx_id)));
        }
        if self.revert.load(Ordering::SeqCst) {
            Ok(TxStatus::Reverted)
        } else {
            Ok(TxStatus::Confirmed)
        }
    }
}
