use crate::app::ports::SnapshotSource;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::metrics::ReconcileMetrics;
use crate::pipeline::change_detector::{ChangeDetector, ChangeStatus};
use crate::pipeline::extractor::{ArchiveExtractor, ExtractStats};
use crate::pipeline::fetcher::{ArchiveFetcher, RetryPolicy};
use crate::pipeline::ledger::SyncLedger;
use crate::pipeline::normalizer::normalize;
use crate::pipeline::upserter::{BatchUpserter, RunStats, UpsertSettings};
use crate::storage::CatalogStore;
use crate::types::Fingerprint;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The upstream snapshot matches the stored marker; nothing was written.
    Unchanged,
    /// The archive held neither cards nor sets; nothing was written.
    Empty,
    Completed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Unchanged => "unchanged",
            RunOutcome::Empty => "empty",
            RunOutcome::Completed => "completed",
        }
    }
}

/// Structured result of one synchronization pass.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub fingerprint: Option<Fingerprint>,
    pub stats: RunStats,
    pub extract: ExtractStats,
    pub ledger_committed: bool,
    pub duration_ms: u64,
}

impl RunSummary {
    fn new(run_id: Uuid, outcome: RunOutcome) -> Self {
        Self {
            run_id,
            outcome,
            fingerprint: None,
            stats: RunStats::default(),
            extract: ExtractStats::default(),
            ledger_committed: false,
            duration_ms: 0,
        }
    }

    fn log(&self) {
        info!(
            outcome = self.outcome.as_str(),
            fingerprint = self.fingerprint.as_ref().map(Fingerprint::as_str).unwrap_or("-"),
            ledger_committed = self.ledger_committed,
            "Sync finished in {:.1}s: sets {} created / {} updated / {} failed, cards {} created / {} updated / {} failed, {} batches, skipped {} entries and {} records",
            self.duration_ms as f64 / 1000.0,
            self.stats.sets.created,
            self.stats.sets.updated,
            self.stats.sets.failed,
            self.stats.cards.created,
            self.stats.cards.updated,
            self.stats.cards.failed,
            self.stats.batches,
            self.extract.skipped_entries,
            self.extract.skipped_records
        );
    }
}

/// Wires the stages together: detect, fetch, extract, normalize, reconcile, commit.
pub struct SyncPipeline {
    config: SyncConfig,
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn CatalogStore>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, source: Arc<dyn SnapshotSource>, store: Arc<dyn CatalogStore>) -> Self {
        Self { config, source, store }
    }

    /// Run one synchronization pass.
    ///
    /// `force` bypasses both fingerprint comparisons so the snapshot is reconciled even
    /// when it matches the stored marker. Fatal errors are returned after being logged;
    /// recovered failures only show up in the summary counters.
    pub async fn run(&self, force: bool) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id);
        let started = Instant::now();

        let result = self.execute(run_id, force).instrument(span.clone()).await;
        let elapsed = started.elapsed();

        let _entered = span.enter();
        match result {
            Ok(mut summary) => {
                summary.duration_ms = elapsed.as_millis() as u64;
                ReconcileMetrics::record_run(summary.outcome.as_str(), elapsed);
                summary.log();
                Ok(summary)
            }
            Err(e) => {
                ReconcileMetrics::record_run("failed", elapsed);
                if let SyncError::ErrorBudgetExceeded { stats, .. } = &e {
                    error!(
                        "Sync aborted after {:.1}s: {} created, {} updated, {} failed; sync marker left untouched",
                        elapsed.as_secs_f64(),
                        stats.created(),
                        stats.updated(),
                        stats.errors()
                    );
                } else {
                    error!("Sync failed after {:.1}s: {}", elapsed.as_secs_f64(), e);
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, run_id: Uuid, force: bool) -> Result<RunSummary> {
        let upstream = &self.config.upstream;
        let detector = ChangeDetector::new(
            self.source.clone(),
            self.store.clone(),
            upstream.archive_url.clone(),
            self.config.sync.marker_key.clone(),
            RetryPolicy::new(upstream.retry_delays(), upstream.probe_timeout()),
        );

        let probed = if force {
            info!("Forced run; skipping change detection");
            None
        } else {
            info!("Checking for changes in upstream catalog...");
            match detector.check_for_changes().await? {
                ChangeStatus::Unchanged { fingerprint } => {
                    let mut summary = RunSummary::new(run_id, RunOutcome::Unchanged);
                    summary.fingerprint = Some(fingerprint);
                    return Ok(summary);
                }
                ChangeStatus::Changed { probed } => probed,
            }
        };

        let fetcher = ArchiveFetcher::new(
            self.source.clone(),
            upstream.archive_url.clone(),
            RetryPolicy::new(upstream.retry_delays(), upstream.download_timeout()),
        );
        let download = fetcher.fetch().await?;
        let fingerprint = Fingerprint::from_validators(&download.validators)
            .unwrap_or_else(|| Fingerprint::of_payload(&download.bytes));

        // The download may have been served by a different snapshot than the probe
        if !force && probed.as_ref() != Some(&fingerprint) && detector.is_current(&fingerprint).await {
            info!("Downloaded snapshot matches last sync ({}); skipping", fingerprint);
            let mut summary = RunSummary::new(run_id, RunOutcome::Unchanged);
            summary.fingerprint = Some(fingerprint);
            return Ok(summary);
        }

        let extracted = ArchiveExtractor::new(upstream.language.as_str()).extract(&download.bytes)?;
        drop(download);

        let mut summary = RunSummary::new(run_id, RunOutcome::Completed);
        summary.fingerprint = Some(fingerprint.clone());
        summary.extract = extracted.stats;

        if extracted.cards.is_empty() && extracted.sets.is_empty() {
            warn!("Archive contained no cards and no sets; leaving sync marker untouched");
            summary.outcome = RunOutcome::Empty;
            return Ok(summary);
        }

        let normalized = normalize(extracted.cards, extracted.sets, Utc::now());
        let upserter = BatchUpserter::new(
            self.store.clone(),
            UpsertSettings {
                batch_size: self.config.sync.batch_size,
                batch_delay: self.config.sync.batch_delay(),
                max_errors: self.config.sync.max_errors,
            },
        );
        summary.stats = upserter.reconcile(&normalized.sets, &normalized.cards).await?;

        let ledger = SyncLedger::new(self.store.clone(), self.config.sync.marker_key.clone());
        summary.ledger_committed = ledger.commit(&fingerprint).await;
        Ok(summary)
    }
}
