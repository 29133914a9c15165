mod checkpoint;
mod claim;

pub use checkpoint::SyncState;
pub use claim::{decode_claim_value, BidState, ClaimRow, RawClaimRow, ValueDecodeError};
