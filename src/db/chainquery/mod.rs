mod client;

pub use client::{claim_rows, claims_since_query, ChainqueryClient};
