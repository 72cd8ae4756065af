use crate::access::DenyReason;
use crate::hedge::HedgeStatus;
use chrono::{DateTime, Utc};

#[derive(thiserror::Error, Debug)]
pub enum HedgeError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("authorization denied: {0}")]
    Authorization(DenyReason),
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),
    #[error("contract {id} is {status:?}, operation requires an Active contract")]
    InvalidState { id: u64, status: HedgeStatus },
    #[error("contract {id} has not matured, maturity is {maturity}")]
    NotMatured { id: u64, maturity: DateTime<Utc> },
    #[error("gain/loss arithmetic overflow: {0}")]
    Arithmetic(String),
    #[error("chain integrity failure at block {at}: {reason}")]
    ChainIntegrity { at: u64, reason: String },
    #[error("storage error: {0}")]
    Store(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(String),
}

impl HedgeError {
    /// True when the error represents a precondition the caller can fix and
    /// retry with corrected input. ChainIntegrity is the exception, it needs
    /// operator remediation before the ledger accepts writes again.
    pub fn is_caller_error(&self) -> bool {
        !matches!(
            self,
            HedgeError::ChainIntegrity { .. } | HedgeError::Store(_) | HedgeError::Codec(_)
        )
    }
}
