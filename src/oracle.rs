//! Latest known price per commodity
//!
//! The oracle keeps only the current value. It deliberately does not check
//! price plausibility or ordering, that is a policy concern of the external
//! forecasting collaborator. History is reconstructable from the ledger's
//! PriceUpdate transactions.
use super::error::HedgeError;
use super::hedge::PriceRecord;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PriceOracle {
    prices: HashMap<String, PriceRecord>,
}

impl PriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stored record for the commodity.
    pub fn update(&mut self, record: PriceRecord) {
        self.prices.insert(record.commodity.clone(), record);
    }

    pub fn get(&self, commodity: &str) -> Result<&PriceRecord, HedgeError> {
        self.prices
            .get(commodity)
            .ok_or_else(|| HedgeError::NotFound("commodity price", commodity.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceRecord> {
        self.prices.values()
    }
}
