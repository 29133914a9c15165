use std::{sync::Arc, time::Duration};

use anyhow::Context;
use log::{error, info};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::{
    config::SyncSettings,
    db::ClaimSource,
    index::IndexWriter,
    utils::{format_sql, now_seconds},
    worker::{
        blocklist::{self, BlocklistSource},
        checkpoint::CheckpointStore,
        status::{PassReport, StatusHandle, SyncPhase},
        transformer,
    },
};

/// Periodic claim sync.
///
/// Each pass pulls claims modified since the last completed pass, in id
/// order and in batches, and routes them to the index writer. The blocklist
/// is reconciled at the end of every pass. Progress is checkpointed so a
/// pass interrupted at the per-cycle cap (or by a restart) resumes from the
/// last claim id it handled.
pub struct SyncWorker {
    source: Arc<dyn ClaimSource>,
    blocklist: Arc<dyn BlocklistSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    writer: IndexWriter,
    status: StatusHandle,
    batch_size: usize,
    max_claims_per_cycle: usize,
    interval: Duration,
}

impl SyncWorker {
    pub fn new(
        source: Arc<dyn ClaimSource>,
        blocklist: Arc<dyn BlocklistSource>,
        checkpoints: Arc<dyn CheckpointStore>,
        writer: IndexWriter,
        status: StatusHandle,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            source,
            blocklist,
            checkpoints,
            writer,
            status,
            batch_size: settings.batch_size.max(1),
            max_claims_per_cycle: settings.max_claims_per_cycle.max(1),
            interval: Duration::from_secs(settings.interval_secs),
        }
    }

    /// Run passes until cancelled. Pass errors, panics included, are logged
    /// and recorded on the status surface, then retried after the regular
    /// interval.
    pub async fn run(self: Arc<Self>, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        info!(
            "[SYNC] Starting claim sync from {} (batch {}, cap {}, interval {:?})",
            self.source.name(),
            self.batch_size,
            self.max_claims_per_cycle,
            self.interval
        );

        loop {
            if cancellation_token.is_cancelled() {
                break;
            }

            let pass = tokio::spawn({
                let worker = self.clone();
                async move { worker.run_pass().await }
            });
            let result = match pass.await {
                Ok(result) => result,
                Err(e) => Err(pass_aborted(e)),
            };

            if let Err(e) = result {
                error!("[SYNC] Pass failed: {:#}", e);
                self.status.pass_failed(format!("{:#}", e));
            }

            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("[SYNC] Claim sync received cancellation signal");
        Ok(())
    }

    /// Run a single pass. Nothing is persisted unless every step succeeds.
    pub async fn run_pass(&self) -> anyhow::Result<PassReport> {
        let mut state = self
            .checkpoints
            .load()
            .await
            .context("Failed to load sync checkpoint")?;

        if state.is_fresh_pass() {
            state.start_sync_time = Some(now_seconds());
        } else if state.start_sync_time.is_none() {
            // Resuming without a recorded start; never move past unseen changes
            state.start_sync_time = Some(state.last_sync_time);
        }
        self.status.set_checkpoint(&state);

        let since = state.last_sync_time;
        let mut cursor = state.last_id;
        let mut report = PassReport::default();

        info!(
            "[SYNC] Pass started: claims modified since {} after id {}",
            format_sql(&since),
            cursor
        );

        let complete = loop {
            self.status.set_phase(SyncPhase::GettingClaimsToUpdate);
            let rows = self
                .source
                .fetch_claims(since, cursor, self.batch_size)
                .await
                .with_context(|| format!("Failed to fetch claims after id {}", cursor))?;
            let fetched = rows.len();

            self.status.set_phase(SyncPhase::AddingClaimsToElastic);
            for row in rows {
                let out = transformer::transform(row);
                cursor = cursor.max(out.id);

                match out.operation {
                    Some(op) => {
                        if op.is_delete() {
                            report.deletes += 1;
                        } else {
                            report.upserts += 1;
                        }
                        self.writer.enqueue(op).await?;
                    },
                    None => report.skipped += 1,
                }
            }
            report.claims_processed += fetched;

            info!(
                "[SYNC] Batch of {} claims queued, cursor at {} ({} this pass)",
                fetched, cursor, report.claims_processed
            );

            if fetched < self.batch_size {
                break true;
            }
            if report.claims_processed >= self.max_claims_per_cycle {
                break false;
            }
        };

        self.status.set_phase(SyncPhase::RemovingBlockedClaims);
        let blocked = blocklist::reconcile(self.blocklist.as_ref(), &self.writer)
            .await
            .context("Failed to reconcile blocklist")?;
        report.blocked_deleted = blocked.deleted;
        report.blocked_skipped = blocked.skipped;

        // Everything queued must have been attempted before the checkpoint moves
        self.writer
            .flush()
            .await
            .context("Failed to flush index writer")?;

        if complete {
            state.complete();
        } else {
            state.suspend_at(cursor);
        }

        self.checkpoints
            .save(&state)
            .await
            .context("Failed to save sync checkpoint")?;

        report.complete = complete;
        self.status.set_checkpoint(&state);
        self.status.pass_succeeded(report.clone());

        if complete {
            info!(
                "[SYNC] Pass complete: {} claims ({} upserts, {} deletes, {} skipped), {} blocked; synced up to {}",
                report.claims_processed,
                report.upserts,
                report.deletes,
                report.skipped,
                report.blocked_deleted,
                format_sql(&state.last_sync_time)
            );
        } else {
            info!(
                "[SYNC] Pass reached cap of {} claims, resuming after id {}",
                self.max_claims_per_cycle, state.last_id
            );
        }

        Ok(report)
    }
}

/// Describe a pass task that did not return normally.
fn pass_aborted(e: JoinError) -> anyhow::Error {
    if !e.is_panic() {
        return anyhow::anyhow!("Sync pass was cancelled: {}", e);
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    anyhow::anyhow!("Sync pass panicked: {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::WriterSettings,
        db::models::{BidState, ClaimRow, SyncState},
        index::{memory::MemoryIndex, BulkIngestor},
        utils::min_sync_time,
        worker::{blocklist::tests::StaticBlocklist, checkpoint::MemoryCheckpointStore},
    };
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    /// Claim table held in memory, filtered like the real query.
    #[derive(Default)]
    struct MemorySource {
        rows: Mutex<Vec<(DateTime<Utc>, ClaimRow)>>,
        calls: Mutex<Vec<(DateTime<Utc>, u64)>>,
        fail: Mutex<bool>,
        panics: Mutex<usize>,
    }

    impl MemorySource {
        fn push(&self, modified_at: DateTime<Utc>, row: ClaimRow) {
            self.rows.lock().unwrap().push((modified_at, row));
        }

        fn calls(&self) -> Vec<(DateTime<Utc>, u64)> {
            self.calls.lock().unwrap().clone()
        }

        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        /// Panic inside the next `n` fetches.
        fn panic_times(&self, n: usize) {
            *self.panics.lock().unwrap() = n;
        }
    }

    #[async_trait]
    impl ClaimSource for MemorySource {
        async fn fetch_claims(
            &self,
            since: DateTime<Utc>,
            last_id: u64,
            limit: usize,
        ) -> anyhow::Result<Vec<ClaimRow>> {
            self.calls.lock().unwrap().push((since, last_id));
            if *self.fail.lock().unwrap() {
                anyhow::bail!("connection reset");
            }
            {
                let mut panics = self.panics.lock().unwrap();
                if *panics > 0 {
                    *panics -= 1;
                    drop(panics);
                    panic!("unexpected NULL in column claim_id");
                }
            }

            let mut rows: Vec<ClaimRow> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|(modified_at, row)| row.id > last_id && *modified_at >= since)
                .map(|(_, row)| row.clone())
                .collect();
            rows.sort_by_key(|row| row.id);
            rows.truncate(limit);
            Ok(rows)
        }

        fn name(&self) -> &'static str {
            "memory"
        }
    }

    fn claim(id: u64, bid_state: BidState) -> ClaimRow {
        ClaimRow {
            id,
            name: format!("claim-{id}"),
            channel: None,
            channel_id: None,
            bid_state,
            effective_amount: id * 10,
            certificate_amount: 1,
            claim_id: format!("{id:040x}"),
            value: Some(json!({ "claimType": "streamType" })),
        }
    }

    fn modified() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    struct Harness {
        source: Arc<MemorySource>,
        index: Arc<MemoryIndex>,
        checkpoints: Arc<MemoryCheckpointStore>,
        status: StatusHandle,
        worker: Arc<SyncWorker>,
        writer: IndexWriter,
        ingestor: JoinHandle<anyhow::Result<()>>,
    }

    impl Harness {
        fn new(batch_size: usize, cap: usize, blocked: &[&str]) -> Self {
            Self::build(batch_size, cap, StaticBlocklist::new(blocked), 3600)
        }

        fn with_blocklist(batch_size: usize, cap: usize, blocklist: StaticBlocklist) -> Self {
            Self::build(batch_size, cap, blocklist, 3600)
        }

        fn build(
            batch_size: usize,
            cap: usize,
            blocklist: StaticBlocklist,
            interval_secs: u64,
        ) -> Self {
            let source = Arc::new(MemorySource::default());
            let index = Arc::new(MemoryIndex::new());
            let checkpoints = Arc::new(MemoryCheckpointStore::new());
            let status = StatusHandle::new();

            let (writer, ingestor): (IndexWriter, BulkIngestor) =
                IndexWriter::new(index.clone(), &WriterSettings::default());
            let ingestor = tokio::spawn(ingestor.run());

            let settings = SyncSettings {
                batch_size,
                max_claims_per_cycle: cap,
                interval_secs,
                ..SyncSettings::default()
            };
            let worker = Arc::new(SyncWorker::new(
                source.clone(),
                Arc::new(blocklist),
                checkpoints.clone(),
                writer.clone(),
                status.clone(),
                &settings,
            ));

            Self {
                source,
                index,
                checkpoints,
                status,
                worker,
                writer,
                ingestor,
            }
        }

        async fn stop(self) {
            self.writer.shutdown().await;
            self.ingestor.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_single_short_batch_completes_pass() {
        let h = Harness::new(5000, 100_000, &[]);
        for id in 1..=1200 {
            let state = if id % 400 == 0 {
                BidState::Spent
            } else {
                BidState::Controlling
            };
            h.source.push(modified(), claim(id, state));
        }
        // Spent claims indexed earlier must disappear
        for id in [400u64, 800, 1200] {
            h.index.insert(&format!("{id:040x}"), json!({}));
        }

        let report = h.worker.run_pass().await.unwrap();

        assert!(report.complete);
        assert_eq!(report.claims_processed, 1200);
        assert_eq!(report.deletes, 3);
        assert_eq!(report.upserts, 1197);
        assert_eq!(h.index.len(), 1197);
        assert_eq!(h.writer.stats().delivered, 1200);

        let saved = h.checkpoints.saved().unwrap();
        assert_eq!(saved.last_id, 0);
        assert_eq!(Some(saved.last_sync_time), saved.start_sync_time);
        assert!(saved.last_sync_time > min_sync_time());
        assert_eq!(h.status.snapshot().phase, SyncPhase::UpToDate);

        h.stop().await;
    }

    #[tokio::test]
    async fn test_cap_suspends_pass_at_cursor() {
        let h = Harness::new(5000, 10_000, &[]);
        for id in 1..=15_000 {
            h.source.push(modified(), claim(id, BidState::Active));
        }

        let report = h.worker.run_pass().await.unwrap();

        assert!(!report.complete);
        assert_eq!(report.claims_processed, 10_000);
        assert_eq!(h.source.calls().len(), 2);

        let saved = h.checkpoints.saved().unwrap();
        assert_eq!(saved.last_id, 10_000);
        assert_eq!(saved.last_sync_time, min_sync_time());
        assert_eq!(h.status.snapshot().phase, SyncPhase::CatchingUp);

        // The next pass picks up after the cursor with the original start time
        let start = saved.start_sync_time;
        let report = h.worker.run_pass().await.unwrap();
        assert!(report.complete);
        assert_eq!(report.claims_processed, 5000);
        assert_eq!(h.source.calls()[2], (min_sync_time(), 10_000));

        let saved = h.checkpoints.saved().unwrap();
        assert_eq!(saved.last_id, 0);
        assert_eq!(Some(saved.last_sync_time), start);
        assert_eq!(h.index.len(), 15_000);

        h.stop().await;
    }

    #[tokio::test]
    async fn test_rows_without_value_are_skipped() {
        let h = Harness::new(5000, 100_000, &[]);
        for id in 1..=5000 {
            let mut row = claim(id, BidState::Active);
            if id == 2500 {
                row.value = None;
            }
            h.source.push(modified(), row);
        }

        let report = h.worker.run_pass().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.upserts, 4999);
        assert_eq!(h.index.len(), 4999);
        assert!(!h.index.contains(&format!("{:040x}", 2500)));
        // A full batch needs one more (empty) fetch to finish the pass
        assert!(report.complete);
        assert_eq!(h.source.calls().len(), 2);
        assert_eq!(h.source.calls()[1].1, 5000);

        h.stop().await;
    }

    #[tokio::test]
    async fn test_failed_pass_keeps_checkpoint() {
        let h = Harness::new(10, 100, &[]);
        let before = SyncState {
            last_sync_time: modified(),
            last_id: 0,
            start_sync_time: None,
        };
        h.checkpoints.save(&before).await.unwrap();
        h.source.set_failing(true);

        assert!(h.worker.run_pass().await.is_err());
        assert_eq!(h.checkpoints.saved(), Some(before));

        h.stop().await;
    }

    #[tokio::test]
    async fn test_blocklist_failure_fails_pass() {
        let h = Harness::with_blocklist(10, 100, StaticBlocklist::unreachable());
        h.source.push(modified(), claim(1, BidState::Active));

        let err = h.worker.run_pass().await.unwrap_err();
        assert!(format!("{err:#}").contains("blocklist"));
        assert!(h.checkpoints.saved().is_none());

        h.stop().await;
    }

    #[tokio::test]
    async fn test_blocklist_runs_without_changes() {
        let blocked = "2a69d3d2b2fc7a71e24e0c4d0b1b1d3b2bb4f9b2c1b7f1d5e8a1c3b6d4e2f1a0:0";
        let h = Harness::new(10, 100, &[blocked]);
        h.index.insert("55467bcf8202c2aaf71670e207450c2a35237bdd", json!({}));

        let report = h.worker.run_pass().await.unwrap();

        assert_eq!(report.claims_processed, 0);
        assert_eq!(report.blocked_deleted, 1);
        assert_eq!(h.index.len(), 0);

        h.stop().await;
    }

    #[tokio::test]
    async fn test_replaying_a_pass_is_idempotent() {
        let h = Harness::new(7, 1000, &[]);
        for id in 1..=20 {
            let state = if id % 5 == 0 {
                BidState::Expired
            } else {
                BidState::Accepted
            };
            h.source.push(modified(), claim(id, state));
        }

        h.worker.run_pass().await.unwrap();
        let first: Vec<_> = (1..=20u64)
            .map(|id| h.index.get(&format!("{id:040x}")))
            .collect();

        // Force the same claims through again
        h.checkpoints.save(&SyncState::default()).await.unwrap();
        h.worker.run_pass().await.unwrap();
        let second: Vec<_> = (1..=20u64)
            .map(|id| h.index.get(&format!("{id:040x}")))
            .collect();

        assert_eq!(first, second);
        assert_eq!(h.index.len(), 16);

        h.stop().await;
    }

    #[tokio::test]
    async fn test_cursor_never_moves_backwards() {
        let h = Harness::new(3, 1000, &[]);
        for id in [4u64, 9, 2, 15, 11, 7, 30] {
            h.source.push(modified(), claim(id, BidState::Active));
        }

        h.worker.run_pass().await.unwrap();

        let cursors: Vec<u64> = h.source.calls().iter().map(|(_, id)| *id).collect();
        assert_eq!(cursors, vec![0, 7, 15]);
        assert!(cursors.windows(2).all(|w| w[0] <= w[1]));

        h.stop().await;
    }

    #[tokio::test]
    async fn test_resume_without_start_time_uses_last_sync_time() {
        let h = Harness::new(10, 1000, &[]);
        h.checkpoints
            .save(&SyncState {
                last_sync_time: modified(),
                last_id: 5,
                start_sync_time: None,
            })
            .await
            .unwrap();
        for id in 1..=8 {
            h.source.push(modified(), claim(id, BidState::Active));
        }

        let report = h.worker.run_pass().await.unwrap();

        assert_eq!(report.claims_processed, 3);
        let saved = h.checkpoints.saved().unwrap();
        assert_eq!(saved.last_id, 0);
        assert_eq!(saved.last_sync_time, modified());

        h.stop().await;
    }

    #[tokio::test]
    async fn test_only_claims_modified_since_last_sync_are_fetched() {
        let h = Harness::new(10, 1000, &[]);
        let old = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
        h.source.push(old, claim(1, BidState::Active));
        h.source.push(modified(), claim(2, BidState::Active));
        h.checkpoints
            .save(&SyncState {
                last_sync_time: modified(),
                ..SyncState::default()
            })
            .await
            .unwrap();

        let report = h.worker.run_pass().await.unwrap();

        assert_eq!(report.claims_processed, 1);
        assert!(h.index.contains(&format!("{:040x}", 2)));
        assert!(!h.index.contains(&format!("{:040x}", 1)));

        h.stop().await;
    }

    #[tokio::test]
    async fn test_run_records_errors_and_stops_on_cancel() {
        let h = Harness::new(10, 100, &[]);
        h.source.set_failing(true);

        let token = CancellationToken::new();
        let mut status = h.status.subscribe();
        let worker = h.worker.clone();
        let task = {
            let worker = worker.clone();
            let token = token.clone();
            tokio::spawn(async move { worker.run(token).await })
        };

        status
            .wait_for(|s| s.phase == SyncPhase::Failed)
            .await
            .unwrap();
        let snapshot = h.status.snapshot();
        assert!(snapshot
            .last_error
            .as_deref()
            .unwrap()
            .contains("connection reset"));

        token.cancel();
        task.await.unwrap().unwrap();

        h.writer.shutdown().await;
        h.ingestor.await.unwrap().unwrap();
        assert!(h.checkpoints.saved().is_none());
    }

    #[tokio::test]
    async fn test_panicking_pass_is_recorded_as_failure() {
        let h = Harness::new(10, 100, &[]);
        h.source.panic_times(1);

        let token = CancellationToken::new();
        let mut status = h.status.subscribe();
        let task = tokio::spawn(h.worker.clone().run(token.clone()));

        status
            .wait_for(|s| s.phase == SyncPhase::Failed)
            .await
            .unwrap();
        let error = h.status.snapshot().last_error.unwrap();
        assert!(error.contains("panicked"));
        assert!(error.contains("claim_id"));

        token.cancel();
        task.await.unwrap().unwrap();
        assert!(h.checkpoints.saved().is_none());

        h.stop().await;
    }

    #[tokio::test]
    async fn test_loop_keeps_running_after_a_panic() {
        let h = Harness::build(10, 100, StaticBlocklist::new(&[]), 0);
        h.source.push(modified(), claim(1, BidState::Active));
        h.source.panic_times(1);

        let token = CancellationToken::new();
        let mut status = h.status.subscribe();
        let task = tokio::spawn(h.worker.clone().run(token.clone()));

        status
            .wait_for(|s| s.last_pass.is_some())
            .await
            .unwrap();
        token.cancel();
        task.await.unwrap().unwrap();

        assert!(h.source.calls().len() >= 2);
        assert!(h.index.contains(&format!("{:040x}", 1)));
        assert_eq!(h.checkpoints.saved().unwrap().last_id, 0);

        h.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_source_rows_still_advance_the_cursor() {
        let h = Harness::new(4, 100, &[]);
        let rows = crate::db::chainquery::claim_rows(vec![
            json!({"id": 1, "name": "good", "bid_state": "Active", "claimId": "c1",
                   "value": r#"{"Claim":{"claimType":"streamType"}}"#}),
            json!({"id": 2, "name": "not json", "bid_state": "Active", "claimId": "c2",
                   "value": "{oops"}),
            json!({"id": 3, "name": "no claim", "bid_state": "Active", "claimId": "c3",
                   "value": r#"{"Other":1}"#}),
            json!({"id": "4", "name": "bad schema", "bid_state": "Active", "claimId": "c4",
                   "effective_amount": "lots", "value": r#"{"Claim":{}}"#}),
            json!({"id": 5, "name": "good", "bid_state": "Controlling", "claimId": "c5",
                   "value": r#"{"Claim":{}}"#}),
        ]);
        assert_eq!(rows.len(), 5);
        for row in rows {
            h.source.push(modified(), row);
        }

        let report = h.worker.run_pass().await.unwrap();

        assert!(report.complete);
        assert_eq!(report.claims_processed, 5);
        assert_eq!(report.upserts, 2);
        assert_eq!(report.skipped, 3);
        // Full first batch of four, then the cursor moves past the bad rows
        assert_eq!(h.source.calls()[1].1, 4);
        assert!(h.index.contains("c1"));
        assert!(h.index.contains("c5"));
        assert_eq!(h.index.len(), 2);

        h.stop().await;
    }
}
