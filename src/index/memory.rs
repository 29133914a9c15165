use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde_json::Value;

use crate::index::{BulkError, BulkOutcome, IndexOperation, SearchIndex};

#[derive(Default)]
struct MemoryState {
    docs: HashMap<String, Value>,
    log: Vec<IndexOperation>,
    requests: usize,
    failing_ids: HashMap<String, usize>,
    failing_requests: usize,
}

/// In-memory search index for tests.
#[derive(Clone, Default)]
pub struct MemoryIndex {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` operations for `id`.
    pub fn fail_id(&self, id: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failing_ids
            .insert(id.to_string(), times);
    }

    /// Reject the next `n` bulk requests outright.
    pub fn fail_requests(&self, n: usize) {
        self.state.lock().unwrap().failing_requests = n;
    }

    pub fn insert(&self, id: &str, document: Value) {
        self.state
            .lock()
            .unwrap()
            .docs
            .insert(id.to_string(), document);
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().docs.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().unwrap().docs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().docs.len()
    }

    pub fn requests(&self) -> usize {
        self.state.lock().unwrap().requests
    }

    /// Every applied operation, in submission order.
    pub fn log(&self) -> Vec<IndexOperation> {
        self.state.lock().unwrap().log.clone()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn bulk(&self, ops: &[IndexOperation]) -> Result<Vec<BulkOutcome>, BulkError> {
        let mut state = self.state.lock().unwrap();
        state.requests += 1;

        if state.failing_requests > 0 {
            state.failing_requests -= 1;
            return Err(BulkError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }

        let mut outcomes = Vec::with_capacity(ops.len());
        for op in ops {
            if let Some(remaining) = state.failing_ids.get_mut(op.id()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    outcomes.push(BulkOutcome::Failed("HTTP 500: injected".into()));
                    continue;
                }
            }

            match op {
                IndexOperation::Upsert { id, document } => {
                    state.docs.insert(id.clone(), document.clone());
                },
                IndexOperation::Delete { id } => {
                    state.docs.remove(id);
                },
            }
            state.log.push(op.clone());
            outcomes.push(BulkOutcome::Applied);
        }

        Ok(outcomes)
    }
}
