//! Sync run metrics
//!
//! Counters and histograms per pipeline stage, recorded through the `metrics` facade.
//! A scheduled run is short-lived, so the Prometheus recorder is installed without an
//! HTTP listener and the rendered registry is pushed to a Pushgateway at the end.

use crate::pipeline::extractor::ExtractStats;
use crate::storage::{BatchReport, UpsertOutcome};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{debug, info, warn};

const JOB_NAME: &str = "card_sync";

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global Prometheus recorder. Idempotent.
///
/// Returns `None` when another recorder is already installed; metrics calls then go to
/// that recorder (or nowhere) and nothing is pushed.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    match HANDLE.get_or_try_init(|| PrometheusBuilder::new().install_recorder()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus recorder not installed: {}", e);
            None
        }
    }
}

/// Render the current registry, if the recorder is ours.
pub fn render() -> Option<String> {
    HANDLE.get().map(|handle| handle.render())
}

/// Push the rendered registry to `{pushgateway_url}/metrics/job/card_sync/instance/{instance}`.
///
/// Failures are logged and otherwise ignored; metrics never fail a run.
pub async fn push_to_gateway(pushgateway_url: &str, instance: &str) {
    let Some(body) = render() else {
        debug!("pushgateway: no recorder installed, skipping push");
        return;
    };
    let push_url = format!(
        "{}/metrics/job/{}/instance/{}",
        pushgateway_url.trim_end_matches('/'),
        JOB_NAME,
        instance
    );

    info!("pushgateway: pushing {} bytes to {}", body.len(), push_url);
    let result = reqwest::Client::new()
        .post(&push_url)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .send()
        .await;
    match result {
        Ok(response) if response.status().is_success() => {
            info!("pushgateway: pushed metrics for instance={}", instance)
        }
        Ok(response) => warn!("pushgateway: push returned status {}", response.status()),
        Err(e) => warn!("pushgateway: push failed: {}", e),
    }
}

/// Metrics for the probe and download requests.
pub struct FetchMetrics;

impl FetchMetrics {
    pub fn record_attempt() {
        metrics::counter!("card_sync_fetch_attempts_total").increment(1);
    }

    /// A request that failed after its final attempt.
    pub fn record_failure() {
        metrics::counter!("card_sync_fetch_failures_total").increment(1);
    }

    pub fn record_download(bytes: usize, elapsed: Duration) {
        metrics::histogram!("card_sync_download_bytes").record(bytes as f64);
        metrics::histogram!("card_sync_download_duration_seconds").record(elapsed.as_secs_f64());
    }
}

/// Metrics for archive extraction.
pub struct ExtractMetrics;

impl ExtractMetrics {
    pub fn record(stats: &ExtractStats, cards: usize, sets: usize) {
        metrics::counter!("card_sync_extract_card_files_total").increment(stats.card_files as u64);
        metrics::counter!("card_sync_extract_skipped_entries_total").increment(stats.skipped_entries as u64);
        metrics::counter!("card_sync_extract_skipped_records_total").increment(stats.skipped_records as u64);
        metrics::gauge!("card_sync_extracted_cards").set(cards as f64);
        metrics::gauge!("card_sync_extracted_sets").set(sets as f64);
    }
}

/// Metrics for reconciliation and the run as a whole.
pub struct ReconcileMetrics;

impl ReconcileMetrics {
    pub fn record_set(outcome: UpsertOutcome) {
        metrics::counter!("card_sync_sets_total", "outcome" => outcome_label(outcome)).increment(1);
    }

    pub fn record_set_failure() {
        metrics::counter!("card_sync_sets_total", "outcome" => "failed").increment(1);
    }

    pub fn record_card_batch(report: &BatchReport) {
        metrics::counter!("card_sync_batches_total").increment(1);
        metrics::counter!("card_sync_cards_total", "outcome" => "created").increment(report.created as u64);
        metrics::counter!("card_sync_cards_total", "outcome" => "updated").increment(report.updated as u64);
        metrics::counter!("card_sync_cards_total", "outcome" => "failed").increment(report.failures.len() as u64);
        if report.rolled_back {
            metrics::counter!("card_sync_batches_rolled_back_total").increment(1);
        }
    }

    /// A batch whose unit of work failed as a whole.
    pub fn record_batch_failure(size: usize) {
        metrics::counter!("card_sync_batches_total").increment(1);
        metrics::counter!("card_sync_batches_failed_total").increment(1);
        metrics::counter!("card_sync_cards_total", "outcome" => "failed").increment(size as u64);
    }

    pub fn record_run(outcome: &'static str, elapsed: Duration) {
        metrics::counter!("card_sync_runs_total", "outcome" => outcome).increment(1);
        metrics::histogram!("card_sync_run_duration_seconds").record(elapsed.as_secs_f64());
    }

    pub fn record_marker_commit(committed: bool) {
        let result = if committed { "committed" } else { "failed" };
        metrics::counter!("card_sync_marker_commits_total", "result" => result).increment(1);
    }
}

fn outcome_label(outcome: UpsertOutcome) -> &'static str {
    match outcome {
        UpsertOutcome::Created => "created",
        UpsertOutcome::Updated => "updated",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        FetchMetrics::record_attempt();
        ReconcileMetrics::record_set(UpsertOutcome::Created);
        ReconcileMetrics::record_card_batch(&BatchReport::default());
    }

    #[test]
    fn test_recorder_renders_recorded_counters() {
        if init_metrics().is_none() {
            return;
        }
        ReconcileMetrics::record_run("completed", Duration::from_millis(5));
        let rendered = render().unwrap_or_default();
        assert!(rendered.contains("card_sync_runs_total"));
    }
}
