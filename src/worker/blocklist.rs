use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::BlocklistSettings,
    index::{IndexOperation, IndexWriter},
    utils::outpoint_to_claim_id,
};

/// Source of outpoints (`txid:vout`) that must not be searchable.
#[async_trait]
pub trait BlocklistSource: Send + Sync {
    async fn blocked_outpoints(&self) -> anyhow::Result<Vec<String>>;
}

/// Client for the `file/list_blocked` endpoint.
pub struct BlocklistClient {
    http: reqwest::Client,
    url: Url,
}

#[derive(Debug, Deserialize)]
struct BlockedResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<BlockedData>,
}

#[derive(Debug, Deserialize)]
struct BlockedData {
    #[serde(default)]
    outpoints: Vec<String>,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub deleted: usize,
    pub skipped: usize,
}

impl BlocklistClient {
    pub fn new(settings: &BlocklistSettings) -> anyhow::Result<Self> {
        let url = Url::parse(&settings.url)
            .with_context(|| format!("Invalid blocklist URL: {}", settings.url))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build blocklist HTTP client")?;

        Ok(Self {
            http,
            url,
        })
    }
}

fn parse_blocked(response: BlockedResponse) -> anyhow::Result<Vec<String>> {
    if !response.success {
        anyhow::bail!(
            "Blocklist request unsuccessful: {}",
            response.error.as_deref().unwrap_or("no error message")
        );
    }
    Ok(response.data.map(|d| d.outpoints).unwrap_or_default())
}

#[async_trait]
impl BlocklistSource for BlocklistClient {
    async fn blocked_outpoints(&self) -> anyhow::Result<Vec<String>> {
        let response = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .context("Failed to fetch blocklist")?;

        let status = response.status();
        anyhow::ensure!(status.is_success(), "Blocklist returned HTTP {}", status);

        let body: BlockedResponse = response
            .json()
            .await
            .context("Failed to decode blocklist response")?;
        parse_blocked(body)
    }
}

/// Enqueue a delete for every blocked claim.
///
/// Outpoints that do not derive to a claim id are logged and skipped. A
/// failure to fetch the list fails the whole run.
pub async fn reconcile(
    source: &dyn BlocklistSource,
    writer: &IndexWriter,
) -> anyhow::Result<ReconcileReport> {
    let outpoints = source.blocked_outpoints().await?;
    let mut report = ReconcileReport::default();

    for outpoint in &outpoints {
        match outpoint_to_claim_id(outpoint) {
            Ok(claim_id) => {
                writer
                    .enqueue(IndexOperation::Delete {
                        id: claim_id,
                    })
                    .await?;
                report.deleted += 1;
            },
            Err(e) => {
                warn!("[BLOCKLIST] Skipping outpoint '{}': {}", outpoint, e);
                report.skipped += 1;
            },
        }
    }

    info!(
        "[BLOCKLIST] {} outpoints: {} deletes queued, {} skipped",
        outpoints.len(),
        report.deleted,
        report.skipped
    );

    Ok(report)
}
