pub mod api;
pub mod config;
pub mod db;
pub mod index;
pub mod utils;
pub mod worker;

pub use config::Settings;
pub use db::{connect_source, ClaimSource};
pub use index::{ElasticClient, IndexWriter, SearchIndex};
pub use worker::{BlocklistClient, FileCheckpointStore, StatusHandle, SyncWorker};
