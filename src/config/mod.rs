#[allow(clippy::module_inception)]
mod config;

pub use self::config::{
    ApiSettings, BlocklistSettings, ChainquerySettings, ElasticSettings, PostgresSettings,
    Settings, SourceSettings, SyncSettings, WriterSettings,
};
