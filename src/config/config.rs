use config::{Config, ConfigError, File};
use serde::Deserialize;

/// Chainquery HTTP SQL API configuration.
///
/// The API accepts raw SQL on `GET {url}/api/sql?query=...` and answers with
/// a `{success, error, data}` envelope.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainquerySettings {
    #[serde(default = "default_chainquery_url")]
    pub url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_chainquery_url() -> String {
    "https://chainquery.lbry.com".to_string()
}

/// PostgreSQL replica of the chainquery claim table.
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub query_timeout_secs: u64,
}

fn default_pool_size() -> usize {
    4
}

/// Where claim rows are read from.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSettings {
    Chainquery(ChainquerySettings),
    Postgres(PostgresSettings),
}

impl Default for SourceSettings {
    fn default() -> Self {
        SourceSettings::Chainquery(ChainquerySettings {
            url: default_chainquery_url(),
            timeout_secs: default_request_timeout_secs(),
        })
    }
}

/// Elasticsearch connection used by the bulk ingestor.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticSettings {
    #[serde(default = "default_elastic_url")]
    pub url: String,
    #[serde(default = "default_elastic_index")]
    pub index: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ElasticSettings {
    fn default() -> Self {
        Self {
            url: default_elastic_url(),
            index: default_elastic_index(),
            user: None,
            password: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_elastic_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_elastic_index() -> String {
    "claims".to_string()
}

/// Remote moderation list of blocked outpoints.
#[derive(Debug, Deserialize, Clone)]
pub struct BlocklistSettings {
    #[serde(default = "default_blocklist_url")]
    pub url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BlocklistSettings {
    fn default() -> Self {
        Self {
            url: default_blocklist_url(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_blocklist_url() -> String {
    "https://api.lbry.com/file/list_blocked".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Sync loop pacing and checkpoint location.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound on rows processed in a single pass before yielding.
    #[serde(default = "default_max_claims_per_cycle")]
    pub max_claims_per_cycle: usize,
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            batch_size: default_batch_size(),
            max_claims_per_cycle: default_max_claims_per_cycle(),
            interval_secs: default_sync_interval_secs(),
        }
    }
}

fn default_state_file() -> String {
    "syncState.json".to_string()
}

fn default_batch_size() -> usize {
    5_000
}

fn default_max_claims_per_cycle() -> usize {
    100_000
}

fn default_sync_interval_secs() -> u64 {
    600
}

/// Index writer buffering and delivery policy.
///
/// `max_retries = 0` keeps best-effort delivery: a failed operation is logged
/// and dropped. Anything above zero resubmits failed operations that many
/// times before giving up.
#[derive(Debug, Deserialize, Clone)]
pub struct WriterSettings {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_batch_ops")]
    pub max_batch_ops: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            max_batch_ops: default_max_batch_ops(),
            flush_interval_ms: default_flush_interval_ms(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_channel_capacity() -> usize {
    10_000
}

fn default_max_batch_ops() -> usize {
    500
}

fn default_flush_interval_ms() -> u64 {
    1_000
}

fn default_retry_backoff_ms() -> u64 {
    500
}

/// Status API server.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1:50005".to_string()
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup. Every section has defaults, so an
/// empty file runs against local Elasticsearch and the public chainquery API.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub elastic: ElasticSettings,
    #[serde(default)]
    pub blocklist: BlocklistSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub writer: WriterSettings,
    #[serde(default)]
    pub api: ApiSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}
