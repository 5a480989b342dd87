//! Runtime configuration.
//!
//! Read from the environment with [`Config::from_env`]; every value except the
//! relayer secret has a default. The struct also deserializes from any serde
//! format with the same defaults.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::settlement::SettlementPolicy;

/// Service configuration
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Secret the field-encryption key is derived from
    #[serde(default)]
    pub relayer_secret: Option<String>,

    /// Allowed deviation from the reference price, in basis points
    #[serde(default = "default_tolerance_bps")]
    pub tolerance_bps: u32,

    #[serde(default = "default_price_timeout_ms")]
    pub price_timeout_ms: u64,

    #[serde(default = "default_proof_timeout_ms")]
    pub proof_timeout_ms: u64,

    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,

    /// Reference price memo lifetime
    #[serde(default = "default_price_cache_ttl_ms")]
    pub price_cache_ttl_ms: u64,

    /// Age after which a match claim can be taken over
    #[serde(default = "default_claim_ttl_ms")]
    pub claim_ttl_ms: u64,

    /// Quote asset used when a submission leaves it out
    #[serde(default = "default_quote")]
    pub default_quote: String,
}

fn default_tolerance_bps() -> u32 {
    100
}

fn default_price_timeout_ms() -> u64 {
    5_000
}

fn default_proof_timeout_ms() -> u64 {
    60_000
}

fn default_confirm_timeout_ms() -> u64 {
    120_000
}

fn default_price_cache_ttl_ms() -> u64 {
    2_000
}

fn default_claim_ttl_ms() -> u64 {
    300_000
}

fn default_quote() -> String {
    "USDT".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relayer_secret: None,
            tolerance_bps: default_tolerance_bps(),
            price_timeout_ms: default_price_timeout_ms(),
            proof_timeout_ms: default_proof_timeout_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            price_cache_ttl_ms: default_price_cache_ttl_ms(),
            claim_ttl_ms: default_claim_ttl_ms(),
            default_quote: default_quote(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("relayer_secret", &self.relayer_secret.as_ref().map(|_| "<redacted>"))
            .field("tolerance_bps", &self.tolerance_bps)
            .field("price_timeout_ms", &self.price_timeout_ms)
            .field("proof_timeout_ms", &self.proof_timeout_ms)
            .field("confirm_timeout_ms", &self.confirm_timeout_ms)
            .field("price_cache_ttl_ms", &self.price_cache_ttl_ms)
            .field("claim_ttl_ms", &self.claim_ttl_ms)
            .field("default_quote", &self.default_quote)
            .finish()
    }
}

impl Config {
    /// Load from process environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `RELAYER_SECRET` | unset |
    /// | `DARKPOOL_TOLERANCE_BPS` | 100 |
    /// | `DARKPOOL_PRICE_TIMEOUT_MS` | 5000 |
    /// | `DARKPOOL_PROOF_TIMEOUT_MS` | 60000 |
    /// | `DARKPOOL_CONFIRM_TIMEOUT_MS` | 120000 |
    /// | `DARKPOOL_PRICE_CACHE_TTL_MS` | 2000 |
    /// | `DARKPOOL_CLAIM_TTL_MS` | 300000 |
    /// | `DARKPOOL_DEFAULT_QUOTE` | USDT |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        Self {
            relayer_secret: lookup("RELAYER_SECRET").filter(|s| !s.is_empty()),
            tolerance_bps: lookup("DARKPOOL_TOLERANCE_BPS")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(defaults.tolerance_bps),
            price_timeout_ms: number("DARKPOOL_PRICE_TIMEOUT_MS", defaults.price_timeout_ms),
            proof_timeout_ms: number("DARKPOOL_PROOF_TIMEOUT_MS", defaults.proof_timeout_ms),
            confirm_timeout_ms: number("DARKPOOL_CONFIRM_TIMEOUT_MS", defaults.confirm_timeout_ms),
            price_cache_ttl_ms: number("DARKPOOL_PRICE_CACHE_TTL_MS", defaults.price_cache_ttl_ms),
            claim_ttl_ms: number("DARKPOOL_CLAIM_TTL_MS", defaults.claim_ttl_ms),
            default_quote: lookup("DARKPOOL_DEFAULT_QUOTE")
                .map(|q| q.trim().to_uppercase())
                .filter(|q| !q.is_empty())
                .unwrap_or(defaults.default_quote),
        }
    }

    pub fn policy(&self) -> SettlementPolicy {
        SettlementPolicy {
            tolerance_bps: self.tolerance_bps,
            price_timeout: Duration::from_millis(self.price_timeout_ms),
            proof_timeout: Duration::from_millis(self.proof_timeout_ms),
            confirm_timeout: Duration::from_millis(self.confirm_timeout_ms),
            claim_ttl: self.claim_ttl(),
        }
    }

    pub fn price_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.price_cache_ttl_ms)
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::from_millis(self.claim_ttl_ms)
    }
}
