//! Pure settlement arithmetic
//!
//! These functions never mutate a hedge. They are safe to call at any time,
//! including before maturity for unrealized gain/loss display. The state
//! transitions that use them live in the registry.
use super::error::HedgeError;
use super::hedge::{HedgeType, TimeStamp};
use chrono::Utc;

/// `diff = reference - strike`; Call pays `diff * quantity`, Put pays the
/// negation. Computed in i128 and narrowed at the end, overflow of the i64
/// result fails loudly instead of wrapping.
pub fn gain_loss(
    hedge_type: HedgeType,
    quantity: u64,
    strike_price: u64,
    reference_price: u64,
) -> Result<i64, HedgeError> {
    let diff = reference_price as i128 - strike_price as i128;
    let signed = match hedge_type {
        HedgeType::Call => diff,
        HedgeType::Put => -diff,
    };
    let total = signed.checked_mul(quantity as i128).ok_or_else(|| {
        HedgeError::Arithmetic(format!(
            "gain/loss {signed} * {quantity} exceeds i128 range"
        ))
    })?;

    i64::try_from(total).map_err(|_| {
        HedgeError::Arithmetic(format!("gain/loss {total} does not fit a signed 64-bit value"))
    })
}

pub fn is_matured(maturity: &TimeStamp<Utc>, now: &TimeStamp<Utc>) -> bool {
    now >= maturity
}
