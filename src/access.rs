//! Capability checks gating every mutating entry point
//!
//! The source-of-truth smart contract used owner-only modifiers on each
//! mutating function. Here that generalises to one pure predicate that the
//! service calls at the top of every mutation, before any state change or
//! ledger append.
use super::error::HedgeError;

/// Operations a caller can request. Reads are open except farmer-scoped
/// listings, mutations belong to the single administrator identity (the
/// platform, not the farmer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation<'a> {
    CreateContract,
    SettleContract,
    CancelContract,
    UpdatePrice,
    ReadContract,
    ReadFarmerContracts { farmer_id: &'a str },
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    #[error("operation is restricted to the administrator")]
    AdminOnly,
    #[error("farmer-scoped read does not match the requesting identity")]
    FarmerScopeMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenyReason),
}

pub struct AccessController {
    admin_id: String,
}

impl AccessController {
    pub fn new(admin_id: impl Into<String>) -> Self {
        Self {
            admin_id: admin_id.into(),
        }
    }

    /// Pure predicate, no side effects.
    pub fn authorize(&self, actor: &str, operation: Operation<'_>) -> Decision {
        match operation {
            Operation::CreateContract
            | Operation::SettleContract
            | Operation::CancelContract
            | Operation::UpdatePrice => {
                if actor == self.admin_id {
                    Decision::Allowed
                } else {
                    Decision::Denied(DenyReason::AdminOnly)
                }
            }
            Operation::ReadContract => Decision::Allowed,
            Operation::ReadFarmerContracts { farmer_id } => {
                if actor == self.admin_id || actor == farmer_id {
                    Decision::Allowed
                } else {
                    Decision::Denied(DenyReason::FarmerScopeMismatch)
                }
            }
        }
    }

    /// authorize, folded into the error taxonomy for use with `?`.
    pub fn require(&self, actor: &str, operation: Operation<'_>) -> Result<(), HedgeError> {
        match self.authorize(actor, operation) {
            Decision::Allowed => Ok(()),
            Decision::Denied(reason) => Err(HedgeError::Authorization(reason)),
        }
    }
}
