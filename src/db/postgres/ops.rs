use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, warn};
use serde_json::Value;
use tokio_postgres::Row;

use crate::db::models::{BidState, ClaimRow, RawClaimRow};
use crate::db::postgres::PostgresClient;
use crate::db::ClaimSource;

const CLAIMS_SINCE_QUERY: &str = r#"
    SELECT
        c.id::bigint AS id, c.name, p.name AS channel, p.claim_id AS channel_id,
        c.bid_state::text AS bid_state, c.effective_amount::bigint AS effective_amount,
        COALESCE(p.effective_amount, 1)::bigint AS certificate_amount,
        c.claim_id, c.value_as_json::text AS value_as_json
    FROM claim c
    LEFT JOIN claim p ON p.claim_id = c.publisher_id
    WHERE c.id > $1::bigint AND c.modified_at >= $2::timestamptz
    ORDER BY c.id
    LIMIT $3
"#;

/// Negative amounts never occur on chain; clamp instead of wrapping.
fn amount(row: &Row, column: &str) -> Result<u64, tokio_postgres::Error> {
    Ok(row.try_get::<_, Option<i64>>(column)?.unwrap_or(0).max(0) as u64)
}

fn raw_claim_from_row(row: &Row) -> Result<RawClaimRow, tokio_postgres::Error> {
    let bid_state: Option<String> = row.try_get("bid_state")?;
    let claim_id: Option<String> = row.try_get("claim_id")?;
    let value: Option<String> = row.try_get("value_as_json")?;

    Ok(RawClaimRow {
        id: row.try_get::<_, i64>("id")?.max(0) as u64,
        name: row.try_get("name")?,
        channel: row.try_get("channel")?,
        channel_id: row.try_get("channel_id")?,
        bid_state: bid_state.map(BidState::from).unwrap_or_default(),
        effective_amount: amount(row, "effective_amount")?,
        certificate_amount: amount(row, "certificate_amount")?,
        claim_id: claim_id.unwrap_or_default(),
        value: value.map(Value::String),
    })
}

/// Map a row, keeping an unreadable one as a valueless claim so it still
/// advances the cursor. Rows without a readable id are dropped.
fn claim_from_row(row: &Row) -> Option<ClaimRow> {
    match raw_claim_from_row(row) {
        Ok(raw) => Some(raw.decode()),
        Err(e) => {
            let Ok(id) = row.try_get::<_, i64>("id") else {
                warn!("[FETCH] Dropping claim row without a readable id: {}", e);
                return None;
            };
            warn!("[FETCH] Claim row {} does not match the claim schema: {}", id, e);
            Some(ClaimRow {
                id: id.max(0) as u64,
                name: String::new(),
                channel: None,
                channel_id: None,
                bid_state: BidState::default(),
                effective_amount: 0,
                certificate_amount: 0,
                claim_id: row
                    .try_get::<_, Option<String>>("claim_id")
                    .ok()
                    .flatten()
                    .unwrap_or_default(),
                value: None,
            })
        },
    }
}

impl PostgresClient {
    // ==================== CLAIMS ====================

    /// Get one page of claims modified at or after `since`, after `last_id`.
    pub async fn get_claims_since(
        &self,
        since: DateTime<Utc>,
        last_id: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<ClaimRow>> {
        let client = self.pool.get().await?;

        let last_id = i64::try_from(last_id).context("Claim cursor out of range")?;
        let limit = i64::try_from(limit).context("Batch size out of range")?;

        let rows = tokio::time::timeout(
            self.query_timeout,
            client.query(CLAIMS_SINCE_QUERY, &[&last_id, &since, &limit]),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Claim query timed out after {:?}", self.query_timeout))?
        .map_err(|e| {
            error!("Failed to fetch claims after id {}: {:?}", last_id, e);
            e
        })?;

        Ok(rows.iter().filter_map(claim_from_row).collect())
    }
}

#[async_trait]
impl ClaimSource for PostgresClient {
    async fn fetch_claims(
        &self,
        since: DateTime<Utc>,
        last_id: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<ClaimRow>> {
        self.get_claims_since(since, last_id, limit).await
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
