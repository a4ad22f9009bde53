use crate::error::{Result, SyncError};
use crate::metrics::ReconcileMetrics;
use crate::storage::{CatalogStore, UpsertOutcome};
use crate::types::{CardRecord, SetRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl StageStats {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }
}

/// Counters threaded through set and card reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub sets: StageStats,
    pub cards: StageStats,
    /// Card batch operations attempted.
    pub batches: usize,
}

impl RunStats {
    pub fn created(&self) -> usize {
        self.sets.created + self.cards.created
    }

    pub fn updated(&self) -> usize {
        self.sets.updated + self.cards.updated
    }

    pub fn errors(&self) -> usize {
        self.sets.failed + self.cards.failed
    }
}

/// Cumulative recovered-failure counter for one run.
///
/// `max` failures are tolerated; the next one exhausts the budget.
#[derive(Debug, Clone, Copy)]
pub struct ErrorBudget {
    max: usize,
    spent: usize,
}

impl ErrorBudget {
    pub fn new(max: usize) -> Self {
        Self { max, spent: 0 }
    }

    /// Failures that can still be absorbed.
    pub fn remaining(&self) -> usize {
        self.max.saturating_sub(self.spent)
    }

    pub fn charge(&mut self, failures: usize) {
        self.spent += failures;
    }

    pub fn is_exhausted(&self) -> bool {
        self.spent > self.max
    }

    pub fn spent(&self) -> usize {
        self.spent
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

#[derive(Debug, Clone)]
pub struct UpsertSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub max_errors: usize,
}

/// Reconciles normalized records into the store: sets one at a time, then cards in batches.
pub struct BatchUpserter {
    store: Arc<dyn CatalogStore>,
    settings: UpsertSettings,
}

impl BatchUpserter {
    pub fn new(store: Arc<dyn CatalogStore>, settings: UpsertSettings) -> Self {
        Self { store, settings }
    }

    /// Upsert every set, then every card. Aborts with `ErrorBudgetExceeded` as soon as the
    /// run has more recovered failures than the budget allows.
    pub async fn reconcile(&self, sets: &[SetRecord], cards: &[CardRecord]) -> Result<RunStats> {
        let mut stats = RunStats::default();
        let mut budget = ErrorBudget::new(self.settings.max_errors);

        info!("Processing {} sets...", sets.len());
        self.reconcile_sets(sets, &mut stats, &mut budget).await?;
        info!(
            "Sets: {} created, {} updated, {} failed",
            stats.sets.created, stats.sets.updated, stats.sets.failed
        );

        info!("Processing {} cards in batches of {}...", cards.len(), self.settings.batch_size);
        self.reconcile_cards(cards, &mut stats, &mut budget).await?;
        info!(
            "Cards: {} created, {} updated, {} failed in {} batches",
            stats.cards.created, stats.cards.updated, stats.cards.failed, stats.batches
        );

        Ok(stats)
    }

    async fn reconcile_sets(&self, sets: &[SetRecord], stats: &mut RunStats, budget: &mut ErrorBudget) -> Result<()> {
        for set in sets {
            match self.store.upsert_set(set).await {
                Ok(outcome) => {
                    stats.sets.record(outcome);
                    ReconcileMetrics::record_set(outcome);
                }
                Err(e) => {
                    error!("Error processing set {}: {}", set.id, e);
                    stats.sets.failed += 1;
                    ReconcileMetrics::record_set_failure();
                    budget.charge(1);
                    check_budget(budget, stats)?;
                }
            }
        }
        Ok(())
    }

    async fn reconcile_cards(&self, cards: &[CardRecord], stats: &mut RunStats, budget: &mut ErrorBudget) -> Result<()> {
        for (index, batch) in cards.chunks(self.settings.batch_size).enumerate() {
            if index > 0 && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
            let batch_no = index + 1;
            stats.batches += 1;

            match self.store.apply_card_batch(batch, budget.remaining()).await {
                Ok(report) => {
                    for failure in &report.failures {
                        warn!("Error processing card {}: {}", failure.id, failure.reason);
                    }
                    stats.cards.failed += report.failures.len();
                    budget.charge(report.failures.len());
                    ReconcileMetrics::record_card_batch(&report);

                    if report.rolled_back {
                        error!("Batch {} rolled back after {} failures", batch_no, report.failures.len());
                        check_budget(budget, stats)?;
                        // A rollback only happens past the allowance
                        return Err(budget_exceeded(budget, stats));
                    }
                    stats.cards.created += report.created;
                    stats.cards.updated += report.updated;
                    info!(
                        "Batch {}: {} created, {} updated, {} failed",
                        batch_no,
                        report.created,
                        report.updated,
                        report.failures.len()
                    );
                }
                Err(e) => {
                    // The batch unit itself failed; none of its records were written
                    error!("Error processing batch {}: {}", batch_no, e);
                    stats.cards.failed += batch.len();
                    budget.charge(batch.len());
                    ReconcileMetrics::record_batch_failure(batch.len());
                }
            }
            check_budget(budget, stats)?;
        }
        Ok(())
    }
}

fn check_budget(budget: &ErrorBudget, stats: &RunStats) -> Result<()> {
    if budget.is_exhausted() {
        return Err(budget_exceeded(budget, stats));
    }
    Ok(())
}

fn budget_exceeded(budget: &ErrorBudget, stats: &RunStats) -> SyncError {
    error!("Error budget exceeded: {} failures (max {}); aborting run", budget.spent(), budget.max());
    SyncError::ErrorBudgetExceeded { errors: budget.spent(), max: budget.max(), stats: stats.clone() }
}
