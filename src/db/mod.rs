use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;

use crate::config::SourceSettings;

pub mod chainquery;
pub mod models;
pub mod postgres;

pub use chainquery::ChainqueryClient;
pub use models::{BidState, ClaimRow, RawClaimRow, SyncState};
pub use postgres::PostgresClient;

/// Read side of the relational claim index.
///
/// Implementations return claims with `id > last_id` and
/// `modified_at >= since`, ordered by id ascending, at most `limit` rows.
/// A row whose metadata cannot be decoded comes back with `value: None`
/// instead of failing the batch. Transport errors are returned as-is; the
/// sync loop owns retrying.
#[async_trait]
pub trait ClaimSource: Send + Sync {
    async fn fetch_claims(
        &self,
        since: DateTime<Utc>,
        last_id: u64,
        limit: usize,
    ) -> anyhow::Result<Vec<ClaimRow>>;

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

/// Build the configured claim source.
pub async fn connect_source(settings: &SourceSettings) -> anyhow::Result<Arc<dyn ClaimSource>> {
    let source: Arc<dyn ClaimSource> = match settings {
        SourceSettings::Chainquery(cq) => Arc::new(ChainqueryClient::new(cq)?),
        SourceSettings::Postgres(pg) => Arc::new(PostgresClient::new(pg.clone()).await?),
    };

    info!("Claim source: {}", source.name());
    Ok(source)
}
