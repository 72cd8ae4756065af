//! Identity helpers
//!
//! Actor and farmer identities are opaque strings owned by the external
//! identity collaborator. For demos and tests we mint them as bech32-encoded
//! uuid7 values, the prefix telling identities apart at a glance.

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique identity then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}
