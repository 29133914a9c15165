//! Utility functions for the Lighthouse sync engine.
//!
//! - [`claim_id`] - Outpoint to claim ID derivation
//! - [`endpoint`] - API URLs under a configured base
//! - [`timestamp`] - Checkpoint timestamp format and serde adapters

mod claim_id;
mod endpoint;
pub mod timestamp;

// ============================================
// Re-exports
// ============================================

pub use claim_id::{outpoint_to_claim_id, ClaimIdError};

pub use endpoint::endpoint_url;

pub use timestamp::{format_sql, min_sync_time, now_seconds, parse_sync_time};
