use std::{collections::HashMap, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::{
    config::ElasticSettings,
    index::{BulkError, BulkOutcome, IndexOperation, SearchIndex},
    utils::endpoint_url,
};

/// Elasticsearch client for the claims index.
///
/// Only the `_bulk` endpoint is used. Upserts go out as `index` actions,
/// deletes as `delete` actions.
#[derive(Clone)]
pub struct ElasticClient {
    http: reqwest::Client,
    bulk_url: Url,
    health_url: Url,
    index: String,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

impl ElasticClient {
    pub fn new(settings: &ElasticSettings) -> anyhow::Result<Self> {
        let bulk_url = endpoint_url(&settings.url, "_bulk")
            .with_context(|| format!("Invalid Elasticsearch URL: {}", settings.url))?;
        let health_url = endpoint_url(&settings.url, "_cluster/health")
            .with_context(|| format!("Invalid Elasticsearch URL: {}", settings.url))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build Elasticsearch HTTP client")?;

        info!(
            "Elasticsearch bulk endpoint {} (index '{}')",
            bulk_url, settings.index
        );

        Ok(Self {
            http,
            bulk_url,
            health_url,
            index: settings.index.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.user {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    /// Health check - verify the cluster answers
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let response = self
            .authorize(self.http.get(self.health_url.clone()))
            .send()
            .await
            .context("Elasticsearch health check failed")?;
        anyhow::ensure!(
            response.status().is_success(),
            "Elasticsearch health check returned HTTP {}",
            response.status()
        );
        Ok(())
    }
}

/// Build the newline-delimited `_bulk` request body.
pub fn bulk_body(index: &str, ops: &[IndexOperation]) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for op in ops {
        let mut header = serde_json::Map::new();
        header.insert(
            op.action().to_string(),
            json!({ "_index": index, "_id": op.id() }),
        );
        body.push_str(&serde_json::to_string(&header)?);
        body.push('\n');
        if let IndexOperation::Upsert { document, .. } = op {
            body.push_str(&serde_json::to_string(document)?);
            body.push('\n');
        }
    }
    Ok(body)
}

/// Map a `_bulk` response onto the submitted operations.
fn bulk_outcomes(
    ops: &[IndexOperation],
    response: BulkResponse,
) -> Result<Vec<BulkOutcome>, BulkError> {
    if response.items.len() != ops.len() {
        return Err(BulkError::Response(format!(
            "{} items for {} operations",
            response.items.len(),
            ops.len()
        )));
    }

    let outcomes = ops
        .iter()
        .zip(response.items)
        .map(|(op, item)| {
            let Some(result) = item.get(op.action()) else {
                return BulkOutcome::Failed(format!("no '{}' result for {}", op.action(), op.id()));
            };

            if let Some(id) = result.id.as_deref() {
                if id != op.id() {
                    return BulkOutcome::Failed(format!("result for {} answered {}", op.id(), id));
                }
            }

            match result.status {
                200..=299 => BulkOutcome::Applied,
                // Deleting something that was never indexed
                404 if op.is_delete() && result.error.is_none() => BulkOutcome::Applied,
                status => BulkOutcome::Failed(error_reason(status, result.error.as_ref())),
            }
        })
        .collect();

    Ok(outcomes)
}

fn error_reason(status: u16, error: Option<&Value>) -> String {
    let reason = error.and_then(|e| {
        e.get("reason")
            .or_else(|| e.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(e.to_string()))
    });
    match reason {
        Some(reason) => format!("HTTP {status}: {reason}"),
        None => format!("HTTP {status}"),
    }
}

#[async_trait]
impl SearchIndex for ElasticClient {
    async fn bulk(&self, ops: &[IndexOperation]) -> Result<Vec<BulkOutcome>, BulkError> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let body = bulk_body(&self.index, ops)?;
        let response = self
            .authorize(self.http.post(self.bulk_url.clone()))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BulkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: BulkResponse = response.json().await?;
        if parsed.errors {
            debug!("[BULK] Response reports item-level errors");
        }
        bulk_outcomes(ops, parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops() -> Vec<IndexOperation> {
        vec![
            IndexOperation::Upsert {
                id: "aaa".into(),
                document: json!({"name": "one"}),
            },
            IndexOperation::Delete {
                id: "bbb".into(),
            },
        ]
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let body = bulk_body("claims", &ops()).unwrap();
        let lines: Vec<Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], json!({"index": {"_index": "claims", "_id": "aaa"}}));
        assert_eq!(lines[1], json!({"name": "one"}));
        assert_eq!(lines[2], json!({"delete": {"_index": "claims", "_id": "bbb"}}));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_missing_delete_is_applied() {
        let response: BulkResponse = serde_json::from_value(json!({
            "errors": false,
            "items": [
                {"index": {"_id": "aaa", "status": 201, "result": "created"}},
                {"delete": {"_id": "bbb", "status": 404, "result": "not_found"}}
            ]
        }))
        .unwrap();

        let outcomes = bulk_outcomes(&ops(), response).unwrap();
        assert_eq!(outcomes, vec![BulkOutcome::Applied, BulkOutcome::Applied]);
    }

    #[test]
    fn test_item_errors_are_reported_per_operation() {
        let response: BulkResponse = serde_json::from_value(json!({
            "errors": true,
            "items": [
                {"index": {"_id": "aaa", "status": 400, "error": {
                    "type": "mapper_parsing_exception",
                    "reason": "failed to parse field [value]"
                }}},
                {"delete": {"_id": "bbb", "status": 200, "result": "deleted"}}
            ]
        }))
        .unwrap();

        let outcomes = bulk_outcomes(&ops(), response).unwrap();
        assert_eq!(
            outcomes[0],
            BulkOutcome::Failed("HTTP 400: failed to parse field [value]".into())
        );
        assert_eq!(outcomes[1], BulkOutcome::Applied);
    }

    #[test]
    fn test_urls_keep_base_path() {
        let client = ElasticClient::new(&ElasticSettings {
            url: "https://search.example.com/es".into(),
            ..ElasticSettings::default()
        })
        .unwrap();
        assert_eq!(client.bulk_url.as_str(), "https://search.example.com/es/_bulk");
        assert_eq!(
            client.health_url.as_str(),
            "https://search.example.com/es/_cluster/health"
        );
    }

    #[test]
    fn test_item_count_mismatch_is_an_error() {
        let response: BulkResponse =
            serde_json::from_value(json!({"errors": false, "items": []})).unwrap();
        assert!(matches!(
            bulk_outcomes(&ops(), response),
            Err(BulkError::Response(_))
        ));
    }
}
