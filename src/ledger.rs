//! Append-only hash-chained audit ledger
//!
//! Every accepted mutation becomes a [`Transaction`], sealed into a [`Block`]
//! whose hash covers (index, previous_hash, transactions, nonce). The chain
//! is single-writer, the proof-of-work search is a bounded-effort anti-tamper
//! tactic, not a defence against adversarial computation.
use super::error::HedgeError;
use super::hedge::{Hedge, PriceRecord, TimeStamp};
use chrono::Utc;
use tracing::info;

/// previous_hash of the genesis block, a fixed well-known constant.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    #[n(0)]
    Create,
    #[n(1)]
    Settle,
    #[n(2)]
    Cancel,
    #[n(3)]
    PriceUpdate,
}

/// Snapshot of the mutated entity at the moment the mutation was accepted.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum TxPayload {
    #[n(0)]
    Hedge(#[n(0)] Hedge),
    #[n(1)]
    Price(#[n(0)] PriceRecord),
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    #[n(0)]
    pub kind: TxKind,
    #[n(1)]
    pub payload: TxPayload,
    #[n(2)]
    pub timestamp: TimeStamp<Utc>,
    #[n(3)]
    pub actor: String,
}

impl Transaction {
    pub fn new(
        kind: TxKind,
        payload: TxPayload,
        timestamp: TimeStamp<Utc>,
        actor: String,
    ) -> Self {
        Self {
            kind,
            payload,
            timestamp,
            actor,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Block {
    #[n(0)]
    pub index: u64,
    #[n(1)]
    pub previous_hash: String,
    #[n(2)]
    pub transactions: Vec<Transaction>,
    #[n(3)]
    pub nonce: u64,
    #[n(4)]
    pub hash: String,
}

// The hashed view of a block. Encoded to CBOR and digested with sha256,
// the stored hash field itself is never part of the input.
struct SealInput<'a> {
    index: u64,
    previous_hash: &'a str,
    transactions: &'a [Transaction],
    nonce: u64,
}

impl<C> minicbor::Encode<C> for SealInput<'_> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.array(4)?;
        e.u64(self.index)?;
        e.str(self.previous_hash)?;
        self.transactions.encode(e, ctx)?;
        e.u64(self.nonce)?.ok()
    }
}

fn seal_digest(
    index: u64,
    previous_hash: &str,
    transactions: &[Transaction],
    nonce: u64,
) -> Result<String, HedgeError> {
    let input = SealInput {
        index,
        previous_hash,
        transactions,
        nonce,
    };
    let cbor = minicbor::to_vec(&input).map_err(|e| HedgeError::Codec(e.to_string()))?;

    Ok(sha256::digest(&cbor))
}

/// Outcome of a full-chain verification walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Valid,
    Invalid { at: u64, reason: String },
}

pub struct LedgerChain {
    blocks: Vec<Block>,
    difficulty: usize,
    // set when verification found a divergence, blocks all further appends
    halted: Option<(u64, String)>,
}

impl LedgerChain {
    /// Create a fresh chain and mine its genesis block.
    pub fn new(difficulty: usize) -> Result<Self, HedgeError> {
        let mut chain = Self {
            blocks: Vec::new(),
            difficulty,
            halted: None,
        };
        let genesis = chain.mine(Vec::new())?;
        chain.commit(genesis);
        Ok(chain)
    }

    /// Rebuild a chain from stored blocks, e.g. after a restart. The caller
    /// is expected to run [`verify`](Self::verify) before trusting it.
    pub fn from_blocks(blocks: Vec<Block>, difficulty: usize) -> Self {
        Self {
            blocks,
            difficulty,
            halted: None,
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn latest(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Fails with the recorded integrity error while the chain is halted.
    pub fn ensure_appendable(&self) -> Result<(), HedgeError> {
        match &self.halted {
            Some((at, reason)) => Err(HedgeError::ChainIntegrity {
                at: *at,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Seal the given transactions into the next block. Rejected while the
    /// chain is halted, and a post-genesis block must carry at least one
    /// transaction.
    pub fn append(&mut self, transactions: Vec<Transaction>) -> Result<&Block, HedgeError> {
        let block = self.prepare(transactions)?;
        Ok(self.commit(block))
    }

    /// Mine a candidate block over the current tail without extending the
    /// chain. Callers with a durability boundary persist the block first and
    /// hand it back to [`commit`](Self::commit), so a failed write never
    /// leaves the in-memory chain ahead of storage.
    pub fn prepare(&self, transactions: Vec<Transaction>) -> Result<Block, HedgeError> {
        self.ensure_appendable()?;
        if transactions.is_empty() {
            return Err(HedgeError::Validation(
                "a block must carry at least one transaction".into(),
            ));
        }
        self.mine(transactions)
    }

    /// Admit a block prepared against the current tail.
    pub fn commit(&mut self, block: Block) -> &Block {
        info!(index = block.index, nonce = block.nonce, hash = %block.hash, "sealed ledger block");
        self.blocks.push(block);
        &self.blocks[self.blocks.len() - 1]
    }

    // Single mining path for genesis and regular blocks.
    fn mine(&self, transactions: Vec<Transaction>) -> Result<Block, HedgeError> {
        let (index, previous_hash) = match self.blocks.last() {
            Some(tail) => (tail.index + 1, tail.hash.clone()),
            None => (0, GENESIS_PREVIOUS_HASH.to_string()),
        };

        let target = "0".repeat(self.difficulty);
        let mut nonce = 0u64;
        let hash = loop {
            let digest = seal_digest(index, &previous_hash, &transactions, nonce)?;
            if digest.starts_with(&target) {
                break digest;
            }
            nonce += 1;
        };

        Ok(Block {
            index,
            previous_hash,
            transactions,
            nonce,
            hash,
        })
    }

    /// Recompute every block hash and check the previous_hash linkage,
    /// reporting the first point of divergence. Read-only, callers that want
    /// the halt side effect use [`halt`](Self::halt) on an Invalid result.
    pub fn verify(&self) -> ChainStatus {
        let mut previous: Option<&Block> = None;
        for (i, block) in self.blocks.iter().enumerate() {
            if block.index != i as u64 {
                return ChainStatus::Invalid {
                    at: i as u64,
                    reason: format!("block index {} out of sequence, expected {i}", block.index),
                };
            }
            match seal_digest(
                block.index,
                &block.previous_hash,
                &block.transactions,
                block.nonce,
            ) {
                Ok(digest) if digest == block.hash => {}
                Ok(_) => {
                    return ChainStatus::Invalid {
                        at: block.index,
                        reason: "stored hash does not match recomputed digest".into(),
                    };
                }
                Err(e) => {
                    return ChainStatus::Invalid {
                        at: block.index,
                        reason: format!("block could not be re-encoded for hashing: {e}"),
                    };
                }
            }
            match previous {
                Some(prev) if block.previous_hash != prev.hash => {
                    return ChainStatus::Invalid {
                        at: block.index,
                        reason: "previous_hash does not match predecessor".into(),
                    };
                }
                None if block.previous_hash != GENESIS_PREVIOUS_HASH => {
                    return ChainStatus::Invalid {
                        at: 0,
                        reason: "genesis previous_hash is not the well-known constant".into(),
                    };
                }
                _ => {}
            }
            previous = Some(block);
        }
        ChainStatus::Valid
    }

    /// Refuse further appends until an operator remediates the chain.
    pub fn halt(&mut self, at: u64, reason: String) {
        self.halted = Some((at, reason));
    }

    /// Operator remediation hook, lifts the append block after the stored
    /// chain has been repaired externally.
    pub fn clear_halt(&mut self) {
        self.halted = None;
    }
}
