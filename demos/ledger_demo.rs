//! End-to-end walkthrough: create a hedge, move the price, settle it, then
//! show the audit chain surviving a restart.
//!
//! Run with `cargo run --example ledger_demo`.

use chrono::{Duration, Utc};
use hedge_ledger::hedge::{HedgeDraft, HedgeType, TimeStamp};
use hedge_ledger::service::HedgeService;
use hedge_ledger::utils::new_uuid_to_bech32;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("ledger_demo.db"))?);

    let admin = new_uuid_to_bech32("admin_")?;
    let farmer = new_uuid_to_bech32("farmer_")?;

    let service = HedgeService::open(db.clone(), admin.clone(), 2)?;
    let events = service.subscribe();

    service.update_price("Soybean", 4800, &admin)?;

    let maturity = TimeStamp::from(Utc::now() + Duration::milliseconds(100));
    let hedge = service.create_contract(
        HedgeDraft::new()
            .set_farmer(farmer.clone())
            .set_commodity("Soybean")
            .set_quantity(1000)
            .set_strike_price(5000)
            .set_reference_price(4800)
            .set_maturity(maturity)
            .set_type(HedgeType::Call)
            .set_location("Maharashtra"),
        &admin,
    )?;
    println!("created contract {} for {}", hedge.id, hedge.farmer_id);

    println!(
        "unrealized gain/loss at 5200: {}",
        service.calculate_current_gain_loss(hedge.id, 5200)?
    );

    std::thread::sleep(std::time::Duration::from_millis(120));
    let settled = service.settle_contract(hedge.id, 5200, &admin)?;
    println!(
        "settled with gain/loss {}",
        settled.gain_loss.unwrap_or_default()
    );

    for event in events.try_iter() {
        println!("event: {event:?}");
    }

    println!("ledger: {:?}", service.verify_ledger());
    println!("chain info: {:?}", service.chain_info());

    // reopen over the same database, history and chain survive
    drop(service);
    let reopened = HedgeService::open(db, admin.clone(), 2)?;
    println!(
        "after restart: contract {:?}, ledger {:?}",
        reopened.get_contract(hedge.id)?.status,
        reopened.verify_ledger()
    );

    Ok(())
}
