//! Dark Settlement - Binary Entry Point
//!
//! Runs one buyer/seller round trip against the in-process collaborators:
//! submit, match, prove, settle on the simulated ledger, and query.

use std::sync::Arc;

use dark_settlement::repository::MemoryOrderRepository;
use dark_settlement::service::api::{QueryOrdersRequest, SubmitOrderRequest};
use dark_settlement::settlement::{CachedPriceOracle, EchoProver, LedgerContract, StaticPriceOracle};
use dark_settlement::{Config, OrderService};
use rust_decimal::Decimal;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("===========================================");
    println!("  Dark Settlement - demo round trip");
    println!("===========================================");
    println!();

    let mut config = Config::from_env();
    if config.relayer_secret.is_none() {
        warn!("RELAYER_SECRET not set, using an ephemeral demo secret");
        config.relayer_secret = Some(format!("demo-{}", uuid::Uuid::new_v4()));
    }

    let oracle = StaticPriceOracle::new().with_ticker("ZUSDT", Decimal::new(9995, 2), Decimal::new(10005, 2));
    let service = OrderService::new(
        &config,
        Arc::new(MemoryOrderRepository::new()),
        Arc::new(CachedPriceOracle::new(oracle, config.price_cache_ttl())),
        Arc::new(EchoProver::new()),
        Arc::new(LedgerContract::new()),
    );

    let submit = |owner: &str, side: &str| SubmitOrderRequest {
        owner: owner.to_string(),
        side: side.to_string(),
        asset: "Z".to_string(),
        quote_asset: None,
        size: "1.0".to_string(),
        price: "100".to_string(),
    };

    println!("X submits BUY 1.0 Z @ 100...");
    let x = service.submit(&submit("0xX", "BUY")).await?;
    println!("  order {} matched={}", x.order.id, x.matched);

    println!("Y submits SELL 1.0 Z @ 100...");
    let y = service.submit(&submit("0xY", "SELL")).await?;
    println!("  order {} matched={}", y.order.id, y.matched);

    if let Some(m) = &y.match_details {
        println!(
            "  match: {} {} @ {} against {}",
            m.match_size, m.asset, m.match_price, m.matched_order_id
        );

        println!();
        println!("Settling...");
        let settlement = service.settle_pair(y.order.id, m.matched_order_id).await?;
        println!("  tx:    {}", settlement.receipt.reference);
        println!("  proof: {}", settlement.receipt.proof_digest_hex());
        println!("  filled {} on both orders", settlement.receipt.filled);
    }

    println!();
    let query = QueryOrdersRequest {
        requester: "0xX".to_string(),
        owner: Some("0xX".to_string()),
        status: None,
        asset: None,
    };
    for view in service.get_orders(&query).await? {
        println!("X sees {}", serde_json::to_string(&view)?);
    }

    Ok(())
}
