//! Service layer API for the hedge registry, oracle and audit ledger
//!
//! All mutations funnel through one write lock: access check, state change,
//! ledger append and sled write-through happen under it, so per-contract
//! transitions are mutually exclusive, id assignment is collision-free and
//! blocks are produced in a single total order. Reads share the read lock and
//! observe consistent snapshots.
use super::access::{AccessController, Operation};
use super::error::HedgeError;
use super::hedge::{Hedge, HedgeDraft, HedgeStatus, PriceRecord, TimeStamp};
use super::ledger::{Block, ChainStatus, LedgerChain, Transaction, TxKind, TxPayload};
use super::oracle::PriceOracle;
use super::registry::ContractRegistry;
use super::settlement;
use chrono::Utc;
use sled::Batch;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

const HEDGE_PREFIX: &[u8] = b"hedge/";
const PRICE_PREFIX: &[u8] = b"price/";
const BLOCK_PREFIX: &[u8] = b"block/";

// big-endian ids keep sled's key order equal to creation order
fn hedge_key(id: u64) -> Vec<u8> {
    [HEDGE_PREFIX, id.to_be_bytes().as_slice()].concat()
}

fn block_key(index: u64) -> Vec<u8> {
    [BLOCK_PREFIX, index.to_be_bytes().as_slice()].concat()
}

fn price_key(commodity: &str) -> Vec<u8> {
    [PRICE_PREFIX, commodity.as_bytes()].concat()
}

fn to_cbor<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, HedgeError> {
    minicbor::to_vec(value).map_err(|e| HedgeError::Codec(e.to_string()))
}

fn from_cbor<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T, HedgeError> {
    minicbor::decode(bytes).map_err(|e| HedgeError::Codec(e.to_string()))
}

/// Events emitted towards external subscribers (e.g. a notification
/// collaborator). Each corresponds 1:1 to a transaction on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HedgeEvent {
    ContractCreated {
        id: u64,
        farmer_id: String,
        commodity: String,
        strike_price: u64,
        maturity_time: TimeStamp<Utc>,
    },
    ContractSettled {
        id: u64,
        farmer_id: String,
        gain_loss: i64,
        settled_at: TimeStamp<Utc>,
    },
    ContractCancelled {
        id: u64,
        farmer_id: String,
        at: TimeStamp<Utc>,
    },
    PriceUpdated {
        commodity: String,
        price: u64,
        at: TimeStamp<Utc>,
    },
}

/// Summary view of the chain, mirrors what an explorer would show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    pub length: u64,
    pub difficulty: usize,
    pub valid: bool,
    pub latest_hash: String,
}

/// Per-farmer aggregate of contract counts and realized gain/loss.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FarmerSummary {
    pub total: u64,
    pub active: u64,
    pub settled: u64,
    pub cancelled: u64,
    pub realized_gain_loss: i64,
}

struct CoreState {
    registry: ContractRegistry,
    oracle: PriceOracle,
    chain: LedgerChain,
}

pub struct HedgeService {
    instance: Arc<sled::Db>,
    access: AccessController,
    state: RwLock<CoreState>,
    subscribers: Mutex<Vec<Sender<HedgeEvent>>>,
}

impl HedgeService {
    /// Open the service over a sled database, rebuilding registry, oracle and
    /// chain from storage. A fresh database gets a mined genesis block. A
    /// stored chain that fails verification comes up halted, so tampering
    /// while the service was down surfaces before any new block is accepted.
    pub fn open(
        instance: Arc<sled::Db>,
        admin_id: impl Into<String>,
        difficulty: usize,
    ) -> Result<Self, HedgeError> {
        let mut registry = ContractRegistry::new();
        for entry in instance.scan_prefix(HEDGE_PREFIX) {
            let (_, value) = entry?;
            registry.commit_create(from_cbor::<Hedge>(&value)?);
        }

        let mut oracle = PriceOracle::new();
        for entry in instance.scan_prefix(PRICE_PREFIX) {
            let (_, value) = entry?;
            oracle.update(from_cbor::<PriceRecord>(&value)?);
        }

        let mut blocks = Vec::new();
        for entry in instance.scan_prefix(BLOCK_PREFIX) {
            let (_, value) = entry?;
            blocks.push(from_cbor::<Block>(&value)?);
        }

        let chain = if blocks.is_empty() {
            let chain = LedgerChain::new(difficulty)?;
            if let Some(genesis) = chain.latest() {
                instance.insert(block_key(genesis.index), to_cbor(genesis)?)?;
            }
            info!("created genesis block");
            chain
        } else {
            let mut chain = LedgerChain::from_blocks(blocks, difficulty);
            if let ChainStatus::Invalid { at, reason } = chain.verify() {
                warn!(at, %reason, "stored ledger failed verification, halting appends");
                chain.halt(at, reason);
            }
            chain
        };

        Ok(Self {
            instance,
            access: AccessController::new(admin_id),
            state: RwLock::new(CoreState {
                registry,
                oracle,
                chain,
            }),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to the event stream. Disconnected receivers are dropped on
    /// the next emission.
    pub fn subscribe(&self) -> Receiver<HedgeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn emit(&self, event: HedgeEvent) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    // Mine the block over the staged snapshot and write hedge + block in one
    // atomic sled batch, committing to the in-memory chain only after the
    // batch lands. Called under the write lock; the caller commits its own
    // registry/oracle change after this succeeds, so a failed encode or
    // store write leaves no half-applied mutation behind.
    fn record_hedge_tx(
        &self,
        state: &mut CoreState,
        kind: TxKind,
        hedge: &Hedge,
        timestamp: TimeStamp<Utc>,
        actor: &str,
    ) -> Result<(), HedgeError> {
        let tx = Transaction::new(
            kind,
            TxPayload::Hedge(hedge.clone()),
            timestamp,
            actor.to_string(),
        );
        let block = state.chain.prepare(vec![tx])?;

        let mut batch = Batch::default();
        batch.insert(hedge_key(hedge.id), to_cbor(hedge)?);
        batch.insert(block_key(block.index), to_cbor(&block)?);
        self.instance.apply_batch(batch)?;
        state.chain.commit(block);
        Ok(())
    }

    /// Record a new hedge contract. Administrator only.
    pub fn create_contract(&self, draft: HedgeDraft, actor: &str) -> Result<Hedge, HedgeError> {
        self.access.require(actor, Operation::CreateContract)?;

        let now = TimeStamp::new();
        let mut state = self.write_state();
        state.chain.ensure_appendable()?;

        let hedge = state.registry.prepare_create(draft, now.clone())?;
        self.record_hedge_tx(&mut state, TxKind::Create, &hedge, now, actor)?;
        state.registry.commit_create(hedge.clone());

        info!(id = hedge.id, farmer = %hedge.farmer_id, "hedge contract created");
        // emitted under the write lock so subscriber order matches tx order
        self.emit(HedgeEvent::ContractCreated {
            id: hedge.id,
            farmer_id: hedge.farmer_id.clone(),
            commodity: hedge.commodity.clone(),
            strike_price: hedge.strike_price,
            maturity_time: hedge.maturity_time.clone(),
        });
        Ok(hedge)
    }

    /// Settle a matured, still-active contract at the given reference price.
    /// This is the only path that ever writes gain/loss. Administrator only.
    pub fn settle_contract(
        &self,
        id: u64,
        reference_price: u64,
        actor: &str,
    ) -> Result<Hedge, HedgeError> {
        self.access.require(actor, Operation::SettleContract)?;

        let now = TimeStamp::new();
        let mut state = self.write_state();
        state.chain.ensure_appendable()?;

        let hedge = state.registry.prepare_settle(id, reference_price, &now)?;
        self.record_hedge_tx(&mut state, TxKind::Settle, &hedge, now.clone(), actor)?;
        state.registry.commit_update(hedge.clone());

        info!(id, gain_loss = ?hedge.gain_loss, "hedge contract settled");
        self.emit(HedgeEvent::ContractSettled {
            id: hedge.id,
            farmer_id: hedge.farmer_id.clone(),
            gain_loss: hedge.gain_loss.unwrap_or(0),
            settled_at: now,
        });
        Ok(hedge)
    }

    /// Cancel a still-active contract. Administrator only.
    pub fn cancel_contract(&self, id: u64, actor: &str) -> Result<Hedge, HedgeError> {
        self.access.require(actor, Operation::CancelContract)?;

        let now = TimeStamp::new();
        let mut state = self.write_state();
        state.chain.ensure_appendable()?;

        let hedge = state.registry.prepare_cancel(id)?;
        self.record_hedge_tx(&mut state, TxKind::Cancel, &hedge, now.clone(), actor)?;
        state.registry.commit_update(hedge.clone());

        info!(id, "hedge contract cancelled");
        self.emit(HedgeEvent::ContractCancelled {
            id: hedge.id,
            farmer_id: hedge.farmer_id.clone(),
            at: now,
        });
        Ok(hedge)
    }

    /// Overwrite the latest price for a commodity. Administrator only.
    pub fn update_price(
        &self,
        commodity: &str,
        price: u64,
        actor: &str,
    ) -> Result<PriceRecord, HedgeError> {
        self.access.require(actor, Operation::UpdatePrice)?;
        if commodity.is_empty() {
            return Err(HedgeError::Validation(
                "commodity must be a non-empty label".into(),
            ));
        }
        if price == 0 {
            return Err(HedgeError::Validation("price must be positive".into()));
        }

        let now = TimeStamp::new();
        let record = PriceRecord {
            commodity: commodity.to_string(),
            price,
            updated_at: now.clone(),
        };

        let mut state = self.write_state();
        state.chain.ensure_appendable()?;

        let tx = Transaction::new(
            TxKind::PriceUpdate,
            TxPayload::Price(record.clone()),
            now.clone(),
            actor.to_string(),
        );
        let block = state.chain.prepare(vec![tx])?;

        let mut batch = Batch::default();
        batch.insert(price_key(commodity), to_cbor(&record)?);
        batch.insert(block_key(block.index), to_cbor(&block)?);
        self.instance.apply_batch(batch)?;
        state.chain.commit(block);
        state.oracle.update(record.clone());

        info!(commodity, price, "commodity price updated");
        self.emit(HedgeEvent::PriceUpdated {
            commodity: record.commodity.clone(),
            price,
            at: now,
        });
        Ok(record)
    }

    pub fn get_contract(&self, id: u64) -> Result<Hedge, HedgeError> {
        Ok(self.read_state().registry.get(id)?.clone())
    }

    /// Contract ids of one farmer, creation order. Farmer-scoped: the actor
    /// must be that farmer or the administrator.
    pub fn get_farmer_contracts(
        &self,
        farmer_id: &str,
        actor: &str,
    ) -> Result<Vec<u64>, HedgeError> {
        self.access
            .require(actor, Operation::ReadFarmerContracts { farmer_id })?;
        Ok(self.read_state().registry.farmer_contracts(farmer_id).to_vec())
    }

    pub fn get_price(&self, commodity: &str) -> Result<PriceRecord, HedgeError> {
        Ok(self.read_state().oracle.get(commodity)?.clone())
    }

    /// Unrealized gain/loss at the given reference price. Pure display
    /// computation, never touches the stored contract.
    pub fn calculate_current_gain_loss(
        &self,
        id: u64,
        reference_price: u64,
    ) -> Result<i64, HedgeError> {
        let state = self.read_state();
        let hedge = state.registry.get(id)?;
        settlement::gain_loss(
            hedge.hedge_type,
            hedge.quantity,
            hedge.strike_price,
            reference_price,
        )
    }

    pub fn is_contract_matured(&self, id: u64) -> Result<bool, HedgeError> {
        let state = self.read_state();
        let hedge = state.registry.get(id)?;
        Ok(settlement::is_matured(&hedge.maturity_time, &TimeStamp::new()))
    }

    /// Walk the full chain. An invalid result halts the ledger, every later
    /// append fails with ChainIntegrity until an operator remediates.
    pub fn verify_ledger(&self) -> ChainStatus {
        let status = self.read_state().chain.verify();
        if let ChainStatus::Invalid { at, reason } = &status {
            warn!(at, %reason, "ledger verification failed, halting appends");
            self.write_state().chain.halt(*at, reason.clone());
        }
        status
    }

    pub fn chain_info(&self) -> ChainInfo {
        let state = self.read_state();
        ChainInfo {
            length: state.chain.len() as u64,
            difficulty: state.chain.difficulty(),
            valid: state.chain.verify() == ChainStatus::Valid,
            latest_hash: state
                .chain
                .latest()
                .map(|b| b.hash.clone())
                .unwrap_or_default(),
        }
    }

    /// Ordered snapshot of every block, for external inspection.
    pub fn export_chain(&self) -> Vec<Block> {
        self.read_state().chain.blocks().to_vec()
    }

    /// Single block lookup by its sealed hash.
    pub fn get_block_by_hash(&self, hash: &str) -> Result<Block, HedgeError> {
        self.read_state()
            .chain
            .blocks()
            .iter()
            .find(|block| block.hash == hash)
            .cloned()
            .ok_or_else(|| HedgeError::NotFound("block", hash.to_string()))
    }

    /// Every block carrying a transaction on one farmer's contracts, in
    /// chain order. Like the rest of the ledger surface this is open, the
    /// same facts are derivable from [`export_chain`](Self::export_chain).
    pub fn get_farmer_blocks(&self, farmer_id: &str) -> Vec<Block> {
        self.read_state()
            .chain
            .blocks()
            .iter()
            .filter(|block| {
                block.transactions.iter().any(|tx| match &tx.payload {
                    TxPayload::Hedge(hedge) => hedge.farmer_id == farmer_id,
                    TxPayload::Price(_) => false,
                })
            })
            .cloned()
            .collect()
    }

    /// Aggregate of a farmer's contracts. Farmer-scoped like
    /// [`get_farmer_contracts`](Self::get_farmer_contracts).
    pub fn farmer_summary(
        &self,
        farmer_id: &str,
        actor: &str,
    ) -> Result<FarmerSummary, HedgeError> {
        self.access
            .require(actor, Operation::ReadFarmerContracts { farmer_id })?;

        let state = self.read_state();
        let mut summary = FarmerSummary::default();
        for id in state.registry.farmer_contracts(farmer_id) {
            let hedge = state.registry.get(*id)?;
            summary.total += 1;
            match hedge.status {
                HedgeStatus::Active => summary.active += 1,
                HedgeStatus::Settled => {
                    summary.settled += 1;
                    let realized = hedge.gain_loss.unwrap_or(0);
                    summary.realized_gain_loss = summary
                        .realized_gain_loss
                        .checked_add(realized)
                        .ok_or_else(|| {
                            HedgeError::Arithmetic(
                                "realized gain/loss total does not fit a signed 64-bit value"
                                    .into(),
                            )
                        })?;
                }
                HedgeStatus::Cancelled => summary.cancelled += 1,
            }
        }
        Ok(summary)
    }
}
