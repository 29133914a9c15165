//! Claim ID derivation.
//!
//! A claim's ID is fixed by the outpoint that created it:
//!
//! ```text
//! reverse(ripemd160(sha256(reverse(txid_bytes) || vout_be32)))
//! ```
//!
//! Both reversals are part of the chain's own encoding, so they must be kept
//! exactly as written for the result to match what the chain reports.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a transaction id in bytes.
const TXID_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimIdError {
    #[error("outpoint '{0}' is not in txid:vout form")]
    MissingSeparator(String),

    #[error("invalid txid hex '{txid}': {reason}")]
    InvalidTxid { txid: String, reason: String },

    #[error("txid '{txid}' is {len} bytes, expected 32")]
    TxidLength { txid: String, len: usize },

    #[error("invalid vout '{0}'")]
    InvalidVout(String),
}

/// Compute the claim ID for an outpoint string (`txid:vout`).
///
/// Returns the 20-byte claim ID as a lowercase hex string without prefix.
///
/// # Example
/// ```ignore
/// let claim_id = outpoint_to_claim_id(
///     "2a69d3d2b2fc7a71e24e0c4d0b1b1d3b2bb4f9b2c1b7f1d5e8a1c3b6d4e2f1a0:0",
/// )?;
/// assert_eq!(claim_id, "55467bcf8202c2aaf71670e207450c2a35237bdd");
/// ```
pub fn outpoint_to_claim_id(outpoint: &str) -> Result<String, ClaimIdError> {
    let (txid, vout) = outpoint
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| ClaimIdError::MissingSeparator(outpoint.to_string()))?;

    let vout: u32 = vout
        .parse()
        .map_err(|_| ClaimIdError::InvalidVout(vout.to_string()))?;

    let mut txid_bytes = hex::decode(txid).map_err(|e| ClaimIdError::InvalidTxid {
        txid: txid.to_string(),
        reason: e.to_string(),
    })?;

    if txid_bytes.len() != TXID_LEN {
        return Err(ClaimIdError::TxidLength {
            txid: txid.to_string(),
            len: txid_bytes.len(),
        });
    }

    Ok(claim_id_from_parts(&mut txid_bytes, vout))
}

/// Hash an already decoded txid (display order) and vout into a claim ID.
fn claim_id_from_parts(txid_bytes: &mut [u8], vout: u32) -> String {
    txid_bytes.reverse();

    let mut preimage = Vec::with_capacity(txid_bytes.len() + 4);
    preimage.extend_from_slice(txid_bytes);
    preimage.extend_from_slice(&vout.to_be_bytes());

    let sha = Sha256::digest(&preimage);
    let mut claim_id = Ripemd160::digest(sha);
    claim_id.reverse();

    hex::encode(claim_id)
}
