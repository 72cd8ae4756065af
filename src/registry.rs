//! Canonical store of hedge contracts
//!
//! The registry is the sole owner of hedge records and the farmer back-index.
//! Records are never deleted, settlement and cancellation are state
//! transitions that preserve full history. The id sequencer lives here too,
//! advanced only under the service's write lock.
use super::error::HedgeError;
use super::hedge::{Hedge, HedgeDraft, HedgeStatus, TimeStamp};
use super::settlement;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct ContractRegistry {
    hedges: BTreeMap<u64, Hedge>,
    // back-reference only, ids are looked up against the primary store
    farmer_index: HashMap<String, Vec<u64>>,
    next_id: u64,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the draft against the next sequential id without admitting
    /// it. The store and the sequencer stay untouched until
    /// [`commit_create`](Self::commit_create), so a failed downstream append
    /// never leaves an orphaned record or a burnt id.
    pub fn prepare_create(
        &self,
        draft: HedgeDraft,
        start_time: TimeStamp<Utc>,
    ) -> Result<Hedge, HedgeError> {
        draft.finalise(self.next_id, start_time)
    }

    /// Admit a finalised hedge and keep the sequencer ahead of its id. Also
    /// the restore path when rebuilding from storage.
    pub fn commit_create(&mut self, hedge: Hedge) {
        self.next_id = self.next_id.max(hedge.id + 1);
        self.index(hedge);
    }

    /// prepare + commit in one step, for callers without a durability
    /// boundary between the two.
    pub fn create(
        &mut self,
        draft: HedgeDraft,
        start_time: TimeStamp<Utc>,
    ) -> Result<Hedge, HedgeError> {
        let hedge = self.prepare_create(draft, start_time)?;
        self.commit_create(hedge.clone());
        Ok(hedge)
    }

    fn index(&mut self, hedge: Hedge) {
        self.farmer_index
            .entry(hedge.farmer_id.clone())
            .or_default()
            .push(hedge.id);
        self.hedges.insert(hedge.id, hedge);
    }

    pub fn get(&self, id: u64) -> Result<&Hedge, HedgeError> {
        self.hedges
            .get(&id)
            .ok_or_else(|| HedgeError::NotFound("contract", id.to_string()))
    }

    /// Ids belonging to the farmer, in creation order.
    pub fn farmer_contracts(&self, farmer_id: &str) -> &[u64] {
        self.farmer_index
            .get(farmer_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hedge> {
        self.hedges.values()
    }

    /// `Active --settle(matured)--> Settled` as a staged snapshot. The
    /// stored record is untouched until
    /// [`commit_update`](Self::commit_update). Fixes gain/loss exactly once,
    /// a staged settle of a Settled contract fails instead of recomputing.
    pub fn prepare_settle(
        &self,
        id: u64,
        reference_price: u64,
        now: &TimeStamp<Utc>,
    ) -> Result<Hedge, HedgeError> {
        let hedge = self
            .hedges
            .get(&id)
            .ok_or_else(|| HedgeError::NotFound("contract", id.to_string()))?;
        if hedge.status != HedgeStatus::Active {
            return Err(HedgeError::InvalidState {
                id,
                status: hedge.status,
            });
        }
        if !settlement::is_matured(&hedge.maturity_time, now) {
            return Err(HedgeError::NotMatured {
                id,
                maturity: hedge.maturity_time.to_datetime_utc(),
            });
        }

        let gain_loss = settlement::gain_loss(
            hedge.hedge_type,
            hedge.quantity,
            hedge.strike_price,
            reference_price,
        )?;

        let mut settled = hedge.clone();
        settled.reference_price = reference_price;
        settled.gain_loss = Some(gain_loss);
        settled.status = HedgeStatus::Settled;
        Ok(settled)
    }

    /// `Active --cancel--> Cancelled` as a staged snapshot. Terminal states
    /// reject the transition.
    pub fn prepare_cancel(&self, id: u64) -> Result<Hedge, HedgeError> {
        let hedge = self
            .hedges
            .get(&id)
            .ok_or_else(|| HedgeError::NotFound("contract", id.to_string()))?;
        if hedge.status != HedgeStatus::Active {
            return Err(HedgeError::InvalidState {
                id,
                status: hedge.status,
            });
        }

        let mut cancelled = hedge.clone();
        cancelled.status = HedgeStatus::Cancelled;
        Ok(cancelled)
    }

    /// Overwrite the stored record with a committed transition snapshot.
    pub fn commit_update(&mut self, hedge: Hedge) {
        self.hedges.insert(hedge.id, hedge);
    }

    /// prepare_settle + commit in one step.
    pub fn settle(
        &mut self,
        id: u64,
        reference_price: u64,
        now: &TimeStamp<Utc>,
    ) -> Result<Hedge, HedgeError> {
        let settled = self.prepare_settle(id, reference_price, now)?;
        self.commit_update(settled.clone());
        Ok(settled)
    }

    /// prepare_cancel + commit in one step.
    pub fn cancel(&mut self, id: u64) -> Result<Hedge, HedgeError> {
        let cancelled = self.prepare_cancel(id)?;
        self.commit_update(cancelled.clone());
        Ok(cancelled)
    }
}
