//! Search index write path.
//!
//! Operations flow through a bounded channel into a [`BulkIngestor`] task,
//! which batches them into `_bulk` requests against Elasticsearch. Producers
//! hold an [`IndexWriter`] and never wait on the network.

use async_trait::async_trait;
use thiserror::Error;

pub mod elastic;
#[cfg(test)]
pub mod memory;
pub mod ops;
pub mod writer;

pub use elastic::ElasticClient;
pub use ops::{IndexOperation, WriterMessage};
pub use writer::{BulkIngestor, IndexWriter, WriterStats};

/// Result of one operation inside a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOutcome {
    Applied,
    Failed(String),
}

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("bulk request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bulk request returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected bulk response: {0}")]
    Response(String),

    #[error("failed to encode bulk body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Write surface of the search engine.
///
/// Writes are keyed by document id and last-write-wins, so the order in which
/// separate `bulk` calls land does not matter for correctness.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Submit `ops` as one request. On success there is exactly one outcome per
    /// operation, in the same order.
    async fn bulk(&self, ops: &[IndexOperation]) -> Result<Vec<BulkOutcome>, BulkError>;
}
