use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use url::Url;

use crate::{
    config::ChainquerySettings,
    db::{models::ClaimRow, ClaimSource},
    utils::{endpoint_url, format_sql},
};

/// Response envelope of the chainquery SQL API.
#[derive(Debug, Deserialize)]
struct ChainqueryResponse<T> {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    data: Option<Vec<T>>,
}

/// Client for the chainquery HTTP SQL API.
///
/// Every statement goes out as a `GET {url}/api/sql?query=...` request.
#[derive(Clone)]
pub struct ChainqueryClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl ChainqueryClient {
    pub fn new(settings: &ChainquerySettings) -> anyhow::Result<Self> {
        let endpoint = endpoint_url(&settings.url, "api/sql")
            .with_context(|| format!("Invalid chainquery URL: {}", settings.url))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build chainquery HTTP client")?;

        Ok(Self {
            http,
            endpoint,
        })
    }

    /// Run a raw SQL statement and deserialize the `data` rows.
    pub async fn query<T: DeserializeOwned>(&self, sql: &str) -> anyhow::Result<Vec<T>> {
        let response = self
            .http
            .get(self.endpoint.clone())
            .query(&[("query", sql)])
            .send()
            .await
            .context("Chainquery request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chainquery returned HTTP {}: {}", status, body);
        }

        let envelope: ChainqueryResponse<T> = response
            .json()
            .await
            .context("Failed to decode chainquery response")?;

        envelope_rows(envelope)
    }
}

fn envelope_rows<T>(envelope: ChainqueryResponse<T>) -> anyhow::Result<Vec<T>> {
    if !envelope.success {
        anyhow::bail!(
            "Chainquery query failed: {}",
            envelope.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(envelope.data.unwrap_or_default())
}

/// Decode the `data` rows of a claims query one by one, so a malformed row
/// never takes the rest of the batch with it.
pub fn claim_rows(data: Vec<Value>) -> Vec<ClaimRow> {
    data.into_iter().filter_map(ClaimRow::from_json).collect()
}

/// SQL for one page of claims modified since `since`, after `last_id`.
///
/// Only integers and a timestamp we format ourselves are interpolated.
pub fn claims_since_query(since: &DateTime<Utc>, last_id: u64, limit: usize) -> String {
    format!(
        "SELECT c.id, c.name, p.name AS channel, p.claim_id AS channel_id, \
         c.bid_state, c.effective_amount, \
         COALESCE(p.effective_amount, 1) AS certificate_amount, \
         c.claim_id AS claimId, c.value_as_json AS value \
         FROM claim c LEFT JOIN claim p ON p.claim_id = c.publisher_id \
         WHERE c.id > {} AND c.modified_at >= '{}' \
         ORDER BY c.id LIMIT {}",
        last_id,
        format_sql(since),
        limit
    )
}

#[async_trait]
impl ClaimSource for ChainqueryClient {
    async fn fetch_claims(
        &self,
        since: DateTime<Utc>,
        last_id: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<ClaimRow>> {
        let sql = claims_since_query(&since, last_id, limit);
        debug!("[FETCH] {}", sql);

        let rows: Vec<Value> = self
            .query(&sql)
            .await
            .with_context(|| format!("Failed to fetch claims after id {}", last_id))?;

        Ok(claim_rows(rows))
    }

    fn name(&self) -> &'static str {
        "chainquery"
    }
}
