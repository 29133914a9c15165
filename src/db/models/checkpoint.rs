use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{min_sync_time, timestamp};

/// Claim sync progress checkpoint.
///
/// Persisted between passes so a restart resumes where the last pass left
/// off. `last_id` only means something while a pass is in progress; it is
/// reset to 0 once the pass reaches the end of the modified claims, and only
/// then does `last_sync_time` move forward to `start_sync_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(
        rename = "LastSyncTime",
        default = "min_sync_time",
        with = "timestamp::sql_datetime"
    )]
    pub last_sync_time: DateTime<Utc>,
    #[serde(rename = "LastID", default)]
    pub last_id: u64,
    #[serde(
        rename = "StartSyncTime",
        default,
        with = "timestamp::sql_datetime_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_sync_time: Option<DateTime<Utc>>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            last_sync_time: min_sync_time(),
            last_id: 0,
            start_sync_time: None,
        }
    }
}

impl SyncState {
    /// True when no pass is in progress.
    pub fn is_fresh_pass(&self) -> bool {
        self.last_id == 0
    }

    /// Record a pass that stopped at the per-cycle cap.
    pub fn suspend_at(&mut self, last_id: u64) {
        self.last_id = self.last_id.max(last_id);
    }

    /// Record a pass that reached the end of the modified claims.
    pub fn complete(&mut self) {
        if let Some(start) = self.start_sync_time {
            self.last_sync_time = start;
        }
        self.last_id = 0;
    }
}
