pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::{CardRecord, SetRecord, SyncMarker};
use async_trait::async_trait;

/// Storage trait for the catalog tables this pipeline populates.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    // Sync marker operations
    async fn load_marker(&self, key: &str) -> Result<Option<SyncMarker>>;
    async fn save_marker(&self, marker: &SyncMarker) -> Result<()>;

    // Set operations
    async fn upsert_set(&self, set: &SetRecord) -> Result<UpsertOutcome>;

    /// Apply one batch of cards as a single atomic unit.
    ///
    /// Each card is attempted on its own; a failed card is reported and skipped while
    /// the rest of the batch still commits. When more than `failure_allowance` cards
    /// fail, the whole batch is rolled back and processing of it stops at that card.
    async fn apply_card_batch(&self, cards: &[CardRecord], failure_allowance: usize) -> Result<BatchReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub created: usize,
    pub updated: usize,
    pub failures: Vec<RecordFailure>,
    /// Set when the failure allowance was exceeded; nothing from the batch was kept.
    pub rolled_back: bool,
}

impl BatchReport {
    pub(crate) fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }

    pub(crate) fn roll_back(&mut self) {
        self.created = 0;
        self.updated = 0;
        self.rolled_back = true;
    }
}
