//! End-to-end lifecycle scenarios against a sled-backed service.

use anyhow::Context;
use chrono::{Duration, Utc};
use hedge_ledger::{
    error::HedgeError,
    hedge::{HedgeDraft, HedgeStatus, HedgeType, TimeStamp},
    ledger::ChainStatus,
    service::{HedgeEvent, HedgeService},
    utils,
};
use sled::open;
use std::sync::Arc;

use tempfile::tempdir; // Use for test db cleanup.

fn soybean_draft(farmer: &str, maturity: TimeStamp<Utc>) -> HedgeDraft {
    HedgeDraft::new()
        .set_farmer(farmer)
        .set_commodity("Soybean")
        .set_quantity(1000)
        .set_strike_price(5000)
        .set_reference_price(4800)
        .set_maturity(maturity)
        .set_type(HedgeType::Call)
        .set_location("Maharashtra")
}

fn near_maturity(ms: i64) -> TimeStamp<Utc> {
    TimeStamp::from(Utc::now() + Duration::milliseconds(ms))
}

fn far_maturity() -> TimeStamp<Utc> {
    TimeStamp::from(Utc::now() + Duration::days(90))
}

#[test]
fn create_and_settle_full_lifecycle() -> anyhow::Result<()> {
    // Sled uses file-based locking to prevent concurrent access, so each test
    // gets its own database on temp for simplified cleanup.
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("full_lifecycle.db"))?);

    let admin = utils::new_uuid_to_bech32("admin_")?;
    let farmer = utils::new_uuid_to_bech32("farmer_")?;

    let service = HedgeService::open(db, admin.clone(), 2)?;
    let events = service.subscribe();

    service
        .update_price("Soybean", 4800, &admin)
        .context("price update failed: ")?;

    let hedge = service
        .create_contract(soybean_draft(&farmer, near_maturity(40)), &admin)
        .context("contract creation failed: ")?;

    assert_eq!(hedge.id, 0);
    assert_eq!(hedge.status, HedgeStatus::Active);
    assert_eq!(hedge.gain_loss, None);

    // unrealized display never touches the stored contract
    assert_eq!(service.calculate_current_gain_loss(hedge.id, 5200)?, 200_000);
    assert_eq!(service.get_contract(hedge.id)?.gain_loss, None);

    std::thread::sleep(std::time::Duration::from_millis(60));
    assert!(service.is_contract_matured(hedge.id)?);

    let settled = service
        .settle_contract(hedge.id, 5200, &admin)
        .context("settlement failed: ")?;

    assert_eq!(settled.status, HedgeStatus::Settled);
    assert_eq!(settled.gain_loss, Some(200_000));
    assert_eq!(settled.reference_price, 5200);

    // genesis + price update + create + settle
    assert_eq!(service.export_chain().len(), 4);
    assert_eq!(service.verify_ledger(), ChainStatus::Valid);

    let seen: Vec<HedgeEvent> = events.try_iter().collect();
    assert_eq!(seen.len(), 3);
    assert!(matches!(seen[0], HedgeEvent::PriceUpdated { price: 4800, .. }));
    assert!(matches!(seen[1], HedgeEvent::ContractCreated { id: 0, .. }));
    assert!(matches!(
        seen[2],
        HedgeEvent::ContractSettled {
            id: 0,
            gain_loss: 200_000,
            ..
        }
    ));

    Ok(())
}

#[test]
fn settlement_is_final() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("settlement_is_final.db"))?);

    let admin = utils::new_uuid_to_bech32("admin_")?;
    let farmer = utils::new_uuid_to_bech32("farmer_")?;
    let service = HedgeService::open(db, admin.clone(), 1)?;

    let hedge = service.create_contract(soybean_draft(&farmer, near_maturity(30)), &admin)?;
    std::thread::sleep(std::time::Duration::from_millis(50));

    service.settle_contract(hedge.id, 5200, &admin)?;

    // second settle fails and never recomputes the recorded gain/loss
    let second = service.settle_contract(hedge.id, 9999, &admin);
    assert!(matches!(
        second,
        Err(HedgeError::InvalidState {
            id: 0,
            status: HedgeStatus::Settled
        })
    ));
    assert_eq!(service.get_contract(hedge.id)?.gain_loss, Some(200_000));
    assert_eq!(service.get_contract(hedge.id)?.reference_price, 5200);

    Ok(())
}

#[test]
fn settle_before_maturity_is_rejected() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("not_matured.db"))?);

    let admin = utils::new_uuid_to_bech32("admin_")?;
    let farmer = utils::new_uuid_to_bech32("farmer_")?;
    let service = HedgeService::open(db, admin.clone(), 1)?;

    let hedge = service.create_contract(soybean_draft(&farmer, far_maturity()), &admin)?;

    assert!(!service.is_contract_matured(hedge.id)?);
    let res = service.settle_contract(hedge.id, 5200, &admin);
    assert!(matches!(res, Err(HedgeError::NotMatured { id: 0, .. })));

    let unchanged = service.get_contract(hedge.id)?;
    assert_eq!(unchanged.status, HedgeStatus::Active);
    assert_eq!(unchanged.gain_loss, None);

    Ok(())
}

#[test]
fn cancelled_contracts_are_terminal() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("cancel_terminal.db"))?);

    let admin = utils::new_uuid_to_bech32("admin_")?;
    let farmer = utils::new_uuid_to_bech32("farmer_")?;
    let service = HedgeService::open(db, admin.clone(), 1)?;

    let hedge = service.create_contract(soybean_draft(&farmer, near_maturity(30)), &admin)?;
    let cancelled = service.cancel_contract(hedge.id, &admin)?;
    assert_eq!(cancelled.status, HedgeStatus::Cancelled);

    assert!(matches!(
        service.cancel_contract(hedge.id, &admin),
        Err(HedgeError::InvalidState { .. })
    ));

    std::thread::sleep(std::time::Duration::from_millis(50));
    assert!(matches!(
        service.settle_contract(hedge.id, 5200, &admin),
        Err(HedgeError::InvalidState { .. })
    ));

    Ok(())
}

#[test]
fn mutations_are_admin_only_and_reads_are_scoped() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("authorization.db"))?);

    let admin = utils::new_uuid_to_bech32("admin_")?;
    let farmer = utils::new_uuid_to_bech32("farmer_")?;
    let other = utils::new_uuid_to_bech32("farmer_")?;
    let service = HedgeService::open(db, admin.clone(), 1)?;

    // the farmer may not mutate, not even their own contract
    assert!(matches!(
        service.create_contract(soybean_draft(&farmer, far_maturity()), &farmer),
        Err(HedgeError::Authorization(_))
    ));
    assert!(matches!(
        service.update_price("Soybean", 5000, &farmer),
        Err(HedgeError::Authorization(_))
    ));

    let hedge = service.create_contract(soybean_draft(&farmer, far_maturity()), &admin)?;
    assert!(matches!(
        service.cancel_contract(hedge.id, &farmer),
        Err(HedgeError::Authorization(_))
    ));

    // farmer-scoped listings: own identity or administrator only
    assert_eq!(service.get_farmer_contracts(&farmer, &farmer)?, vec![0]);
    assert_eq!(service.get_farmer_contracts(&farmer, &admin)?, vec![0]);
    assert!(matches!(
        service.get_farmer_contracts(&farmer, &other),
        Err(HedgeError::Authorization(_))
    ));

    // plain contract reads are open
    assert_eq!(service.get_contract(hedge.id)?.id, 0);

    Ok(())
}

#[test]
fn farmer_index_orders_interleaved_creates() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("farmer_index.db"))?);

    let admin = utils::new_uuid_to_bech32("admin_")?;
    let alice = utils::new_uuid_to_bech32("farmer_")?;
    let bob = utils::new_uuid_to_bech32("farmer_")?;
    let service = HedgeService::open(db, admin.clone(), 1)?;

    for farmer in [&alice, &bob, &alice, &alice, &bob] {
        service.create_contract(soybean_draft(farmer, far_maturity()), &admin)?;
    }

    assert_eq!(service.get_farmer_contracts(&alice, &admin)?, vec![0, 2, 3]);
    assert_eq!(service.get_farmer_contracts(&bob, &admin)?, vec![1, 4]);

    let summary = service.farmer_summary(&alice, &admin)?;
    assert_eq!(summary.total, 3);
    assert_eq!(summary.active, 3);
    assert_eq!(summary.realized_gain_loss, 0);

    Ok(())
}

#[test]
fn state_survives_a_restart() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("restart.db"))?);

    let admin = utils::new_uuid_to_bech32("admin_")?;
    let farmer = utils::new_uuid_to_bech32("farmer_")?;

    {
        let service = HedgeService::open(db.clone(), admin.clone(), 1)?;
        service.update_price("Soybean", 4800, &admin)?;
        service.create_contract(soybean_draft(&farmer, far_maturity()), &admin)?;
    }

    let reopened = HedgeService::open(db, admin.clone(), 1)?;

    assert_eq!(reopened.get_contract(0)?.status, HedgeStatus::Active);
    assert_eq!(reopened.get_price("Soybean")?.price, 4800);
    assert_eq!(reopened.get_farmer_contracts(&farmer, &admin)?, vec![0]);
    assert_eq!(reopened.verify_ledger(), ChainStatus::Valid);

    // the sequencer continues past restored ids
    let next = reopened.create_contract(soybean_draft(&farmer, far_maturity()), &admin)?;
    assert_eq!(next.id, 1);

    Ok(())
}

#[test]
fn tampered_storage_halts_the_ledger_on_reopen() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("tampered.db"))?);

    let admin = utils::new_uuid_to_bech32("admin_")?;
    let farmer = utils::new_uuid_to_bech32("farmer_")?;

    {
        let service = HedgeService::open(db.clone(), admin.clone(), 1)?;
        service.create_contract(soybean_draft(&farmer, far_maturity()), &admin)?;
        service.create_contract(soybean_draft(&farmer, far_maturity()), &admin)?;
    }

    // rewrite block 1's stored transactions without recomputing any hash
    let key = [b"block/".as_slice(), 1u64.to_be_bytes().as_slice()].concat();
    let stored = db.get(&key)?.expect("block 1 should exist");
    let mut block: hedge_ledger::ledger::Block = minicbor::decode(&stored)?;
    block.transactions[0].actor = "mallory".into();
    db.insert(&key, minicbor::to_vec(&block)?)?;

    let reopened = HedgeService::open(db, admin.clone(), 1)?;

    assert!(matches!(
        reopened.verify_ledger(),
        ChainStatus::Invalid { at: 1, .. }
    ));

    // halted: every further mutation surfaces the integrity failure
    let res = reopened.create_contract(soybean_draft(&farmer, far_maturity()), &admin);
    assert!(matches!(res, Err(HedgeError::ChainIntegrity { at: 1, .. })));

    Ok(())
}

#[test]
fn concurrent_settles_yield_exactly_one_success() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("concurrent_settle.db"))?);

    let admin = utils::new_uuid_to_bech32("admin_")?;
    let farmer = utils::new_uuid_to_bech32("farmer_")?;
    let service = Arc::new(HedgeService::open(db, admin.clone(), 1)?);

    let hedge = service.create_contract(soybean_draft(&farmer, near_maturity(30)), &admin)?;
    std::thread::sleep(std::time::Duration::from_millis(50));

    let mut handles = Vec::new();
    for price in [5200u64, 4600] {
        let service = Arc::clone(&service);
        let admin = admin.clone();
        handles.push(std::thread::spawn(move || {
            service.settle_contract(hedge.id, price, &admin)
        }));
    }

    let outcomes: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("settle thread panicked"))
        .collect();

    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(HedgeError::InvalidState { .. }))));

    // the winner's gain/loss stands, uncorrupted by the loser
    let recorded = service.get_contract(hedge.id)?;
    let expected = match recorded.reference_price {
        5200 => 200_000,
        4600 => -400_000,
        other => panic!("unexpected settlement price {other}"),
    };
    assert_eq!(recorded.gain_loss, Some(expected));
    assert_eq!(service.verify_ledger(), ChainStatus::Valid);

    Ok(())
}

#[test]
fn event_order_matches_ledger_order_under_concurrency() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("event_order.db"))?);

    let admin = utils::new_uuid_to_bech32("admin_")?;
    let service = Arc::new(HedgeService::open(db, admin.clone(), 1)?);
    let events = service.subscribe();

    let mut handles = Vec::new();
    for commodity in ["Soybean", "Wheat", "Cotton", "Maize", "Rice", "Jute"] {
        let service = Arc::clone(&service);
        let admin = admin.clone();
        handles.push(std::thread::spawn(move || {
            service.update_price(commodity, 4800, &admin)
        }));
    }
    for handle in handles {
        handle.join().expect("price thread panicked")?;
    }

    // whatever interleaving won, subscribers saw it in ledger order
    let event_order: Vec<String> = events
        .try_iter()
        .map(|event| match event {
            HedgeEvent::PriceUpdated { commodity, .. } => commodity,
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    let ledger_order: Vec<String> = service
        .export_chain()
        .iter()
        .skip(1) // genesis
        .flat_map(|block| &block.transactions)
        .map(|tx| match &tx.payload {
            hedge_ledger::ledger::TxPayload::Price(record) => record.commodity.clone(),
            other => panic!("unexpected payload {other:?}"),
        })
        .collect();

    assert_eq!(event_order.len(), 6);
    assert_eq!(event_order, ledger_order);

    Ok(())
}

#[test]
fn concurrent_creates_assign_unique_sequential_ids() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("concurrent_create.db"))?);

    let admin = utils::new_uuid_to_bech32("admin_")?;
    let service = Arc::new(HedgeService::open(db, admin.clone(), 1)?);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        let admin = admin.clone();
        handles.push(std::thread::spawn(move || {
            let farmer = utils::new_uuid_to_bech32("farmer_").unwrap();
            service
                .create_contract(soybean_draft(&farmer, far_maturity()), &admin)
                .map(|h| h.id)
        }));
    }

    let mut ids: Vec<u64> = handles
        .into_iter()
        .map(|h| h.join().expect("create thread panicked").unwrap())
        .collect();
    ids.sort_unstable();

    assert_eq!(ids, (0..8).collect::<Vec<u64>>());
    assert_eq!(service.verify_ledger(), ChainStatus::Valid);

    Ok(())
}
