use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::{db::models::SyncState, utils::timestamp};

/// Where the sync loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Starting,
    GettingClaimsToUpdate,
    AddingClaimsToElastic,
    RemovingBlockedClaims,
    UpToDate,
    /// The last pass stopped at the per-cycle cap
    CatchingUp,
    Failed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Starting => "starting",
            SyncPhase::GettingClaimsToUpdate => "gettingClaimsToUpdate",
            SyncPhase::AddingClaimsToElastic => "addingClaimsToElastic",
            SyncPhase::RemovingBlockedClaims => "removingBlockedClaims",
            SyncPhase::UpToDate => "upToDate",
            SyncPhase::CatchingUp => "catchingUp",
            SyncPhase::Failed => "failed",
        }
    }
}

/// Summary of the last successful pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub claims_processed: usize,
    pub upserts: usize,
    pub deletes: usize,
    pub skipped: usize,
    pub blocked_deleted: usize,
    pub blocked_skipped: usize,
    /// False when the pass stopped at the per-cycle cap
    pub complete: bool,
}

/// Checkpoint as shown on the status surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointView {
    pub last_sync_time: String,
    pub last_id: u64,
    pub start_sync_time: Option<String>,
}

impl From<&SyncState> for CheckpointView {
    fn from(state: &SyncState) -> Self {
        Self {
            last_sync_time: timestamp::format_sql(&state.last_sync_time),
            last_id: state.last_id,
            start_sync_time: state.start_sync_time.as_ref().map(timestamp::format_sql),
        }
    }
}

/// Snapshot of the sync loop for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub info: String,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub checkpoint: Option<CheckpointView>,
    pub last_pass: Option<PassReport>,
    pub updated_at: DateTime<Utc>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Starting,
            info: SyncPhase::Starting.as_str().to_string(),
            last_error: None,
            last_error_at: None,
            checkpoint: None,
            last_pass: None,
            updated_at: Utc::now(),
        }
    }
}

/// Shared, cloneable access to the current [`SyncStatus`].
///
/// The sync loop is the only writer. Readers get a snapshot.
#[derive(Clone)]
pub struct StatusHandle {
    sender: watch::Sender<SyncStatus>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(SyncStatus::default());
        Self {
            sender,
        }
    }

    pub fn snapshot(&self) -> SyncStatus {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.sender.subscribe()
    }

    pub fn set_phase(&self, phase: SyncPhase) {
        self.update(|status| {
            status.phase = phase;
            status.info = phase.as_str().to_string();
        });
    }

    pub fn set_checkpoint(&self, state: &SyncState) {
        let view = CheckpointView::from(state);
        self.update(|status| status.checkpoint = Some(view));
    }

    /// Record a successful pass. Clears any previous error.
    pub fn pass_succeeded(&self, report: PassReport) {
        let phase = if report.complete {
            SyncPhase::UpToDate
        } else {
            SyncPhase::CatchingUp
        };
        self.update(|status| {
            status.phase = phase;
            status.info = phase.as_str().to_string();
            status.last_error = None;
            status.last_error_at = None;
            status.last_pass = Some(report);
        });
    }

    pub fn pass_failed(&self, error: String) {
        self.update(|status| {
            status.phase = SyncPhase::Failed;
            status.info = SyncPhase::Failed.as_str().to_string();
            status.last_error = Some(error);
            status.last_error_at = Some(Utc::now());
        });
    }

    fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
        self.sender.send_modify(|status| {
            f(status);
            status.updated_at = Utc::now();
        });
    }
}
