use log::debug;
use serde_json::{json, Map, Value};

use crate::{db::models::ClaimRow, index::IndexOperation};

/// Completion weight for claim names.
pub const SUGGEST_NAME_WEIGHT: u32 = 30;
/// Completion weight for words of a stream description.
pub const SUGGEST_DESC_WEIGHT: u32 = 10;

/// Result of routing a single claim row.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    /// Cursor candidate; reported even when no operation is produced
    pub id: u64,
    pub operation: Option<IndexOperation>,
}

/// Decide what a claim row means for the search index.
///
/// Spent and expired claims become deletes. Rows with no decodable value
/// produce nothing. Everything else is indexed under its claim id.
pub fn transform(row: ClaimRow) -> Transformed {
    let id = row.id;

    if row.claim_id.is_empty() {
        debug!("Claim row {} has no claim id, skipping", id);
        return Transformed {
            id,
            operation: None,
        };
    }

    if row.value.is_none() {
        debug!("Claim {} ({}) has no value, skipping", row.claim_id, id);
        return Transformed {
            id,
            operation: None,
        };
    }

    let operation = if row.bid_state.is_removed() {
        IndexOperation::Delete {
            id: row.claim_id,
        }
    } else {
        let claim_id = row.claim_id.clone();
        IndexOperation::Upsert {
            id: claim_id,
            document: build_document(row),
        }
    };

    Transformed {
        id,
        operation: Some(operation),
    }
}

/// Search document for a live claim: the row fields plus completion inputs.
pub fn build_document(row: ClaimRow) -> Value {
    let suggest_desc = row.value.as_ref().and_then(description_words);

    let mut doc = Map::new();
    doc.insert("id".into(), json!(row.id));
    doc.insert("name".into(), json!(row.name));
    doc.insert("channel".into(), json!(row.channel));
    doc.insert("channel_id".into(), json!(row.channel_id));
    doc.insert("bid_state".into(), json!(row.bid_state.as_str()));
    doc.insert("effective_amount".into(), json!(row.effective_amount));
    doc.insert("certificate_amount".into(), json!(row.certificate_amount));
    doc.insert("claimId".into(), json!(row.claim_id));

    if !row.name.is_empty() && row.value.is_some() {
        doc.insert(
            "suggest_name".into(),
            json!({ "input": row.name, "weight": SUGGEST_NAME_WEIGHT }),
        );
    }
    if let Some(words) = suggest_desc {
        doc.insert(
            "suggest_desc".into(),
            json!({ "input": words, "weight": SUGGEST_DESC_WEIGHT }),
        );
    }

    doc.insert("value".into(), row.value.unwrap_or(Value::Null));
    Value::Object(doc)
}

/// Words of `stream.metadata.description` for stream claims.
fn description_words(value: &Value) -> Option<Vec<String>> {
    if value.get("claimType").and_then(Value::as_str) != Some("streamType") {
        return None;
    }
    let description = value
        .pointer("/stream/metadata/description")
        .and_then(Value::as_str)?;

    let words: Vec<String> = description.split_whitespace().map(str::to_string).collect();
    (!words.is_empty()).then_some(words)
}
