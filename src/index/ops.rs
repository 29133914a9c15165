use serde_json::Value;
use tokio::sync::oneshot;

/// A single change to the search index, keyed by claim id.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOperation {
    /// Create or replace the document.
    Upsert { id: String, document: Value },
    /// Remove the document. Deleting a missing id is a no-op.
    Delete { id: String },
}

impl IndexOperation {
    pub fn id(&self) -> &str {
        match self {
            IndexOperation::Upsert { id, .. } | IndexOperation::Delete { id } => id,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, IndexOperation::Delete { .. })
    }

    /// Name of the `_bulk` action for this operation.
    pub fn action(&self) -> &'static str {
        match self {
            IndexOperation::Upsert { .. } => "index",
            IndexOperation::Delete { .. } => "delete",
        }
    }
}

pub enum WriterMessage {
    /// Buffer an operation for the next bulk request
    Operation(IndexOperation),
    /// Submit everything buffered so far, then acknowledge
    Flush(oneshot::Sender<()>),
    /// Flush and stop
    Shutdown,
}
