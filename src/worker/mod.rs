pub mod blocklist;
pub mod checkpoint;
pub mod status;
pub mod transformer;
pub mod worker;

pub use blocklist::{BlocklistClient, BlocklistSource, ReconcileReport};
pub use checkpoint::{CheckpointStore, FileCheckpointStore};
pub use status::{PassReport, StatusHandle, SyncPhase, SyncStatus};
pub use transformer::{transform, Transformed};
pub use worker::SyncWorker;
