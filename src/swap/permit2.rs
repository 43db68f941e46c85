/*
 * Permit2 signature embedding for swap call data
 */

use ethers::types::{Address, Bytes, U256};
use serde_json::Value;

pub const PERMIT2_ADDRESS: &str = "0x000000000022D473030F116dDEE9F6B43aC78BA3";

/// `domain.verifyingContract` of an EIP-712 payload.
#[must_use]
pub fn verifying_contract(eip712: &Value) -> Option<Address> {
    eip712
        .get("domain")?
        .get("verifyingContract")?
        .as_str()?
        .parse()
        .ok()
}

#[must_use]
pub fn targets_permit2(eip712: &Value) -> bool {
    match PERMIT2_ADDRESS.parse::<Address>() {
        Ok(canonical) => verifying_contract(eip712) == Some(canonical),
        Err(_) => false,
    }
}

/// Appends `signature` to `data` behind a 32-byte big-endian length word.
#[must_use]
pub fn append_signature(data: &Bytes, signature: &[u8]) -> Bytes {
    let mut length = [0u8; 32];
    U256::from(signature.len()).to_big_endian(&mut length);

    let mut out = Vec::with_capacity(data.len() + 32 + signature.len());
    out.extend_from_slice(data);
    out.extend_from_slice(&length);
    out.extend_from_slice(signature);
    Bytes::from(out)
}
