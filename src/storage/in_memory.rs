use super::{BatchReport, CatalogStore, RecordFailure, UpsertOutcome};
use crate::error::{Result, SyncError};
use crate::types::{CardRecord, SetRecord, SyncMarker};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct Tables {
    sets: HashMap<String, SetRecord>,
    cards: HashMap<String, CardRecord>,
    markers: HashMap<String, SyncMarker>,
    writes: usize,
    batches: usize,
}

/// In-memory catalog store for dry runs and testing.
///
/// Ids registered through `reject_ids` fail on write, which lets callers exercise
/// the recovered-failure paths without a real database.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    rejected_ids: HashSet<String>,
    reject_marker_reads: bool,
    reject_marker_writes: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rejected_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn reject_marker_reads(mut self) -> Self {
        self.reject_marker_reads = true;
        self
    }

    pub fn reject_marker_writes(mut self) -> Self {
        self.reject_marker_writes = true;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| SyncError::store("in-memory tables lock poisoned"))
    }

    fn check_accepted(&self, id: &str) -> Result<()> {
        if self.rejected_ids.contains(id) {
            return Err(SyncError::store(format!("write rejected for {id}")));
        }
        Ok(())
    }

    /// Number of row mutations applied so far (committed batches only).
    pub fn write_count(&self) -> usize {
        self.lock().map(|t| t.writes).unwrap_or_default()
    }

    /// Number of `apply_card_batch` calls.
    pub fn batch_count(&self) -> usize {
        self.lock().map(|t| t.batches).unwrap_or_default()
    }

    pub fn set(&self, id: &str) -> Option<SetRecord> {
        self.lock().ok().and_then(|t| t.sets.get(id).cloned())
    }

    pub fn card(&self, id: &str) -> Option<CardRecord> {
        self.lock().ok().and_then(|t| t.cards.get(id).cloned())
    }

    pub fn set_count(&self) -> usize {
        self.lock().map(|t| t.sets.len()).unwrap_or_default()
    }

    pub fn card_count(&self) -> usize {
        self.lock().map(|t| t.cards.len()).unwrap_or_default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn load_marker(&self, key: &str) -> Result<Option<SyncMarker>> {
        if self.reject_marker_reads {
            return Err(SyncError::store("marker read rejected"));
        }
        Ok(self.lock()?.markers.get(key).cloned())
    }

    async fn save_marker(&self, marker: &SyncMarker) -> Result<()> {
        if self.reject_marker_writes {
            return Err(SyncError::store("marker write rejected"));
        }
        let mut tables = self.lock()?;
        tables.markers.insert(marker.key.clone(), marker.clone());
        tables.writes += 1;
        Ok(())
    }

    async fn upsert_set(&self, set: &SetRecord) -> Result<UpsertOutcome> {
        self.check_accepted(&set.id)?;
        let mut tables = self.lock()?;
        let outcome = match tables.sets.insert(set.id.clone(), set.clone()) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        };
        tables.writes += 1;
        debug!("Upserted set {} ({:?})", set.id, outcome);
        Ok(outcome)
    }

    async fn apply_card_batch(&self, cards: &[CardRecord], failure_allowance: usize) -> Result<BatchReport> {
        let mut tables = self.lock()?;
        tables.batches += 1;

        // Stage the batch so a rollback leaves the committed tables untouched
        let mut staged: HashMap<String, CardRecord> = HashMap::new();
        let mut report = BatchReport::default();
        for card in cards {
            if let Err(e) = self.check_accepted(&card.id) {
                report.failures.push(RecordFailure { id: card.id.clone(), reason: e.to_string() });
                if report.failures.len() > failure_allowance {
                    report.roll_back();
                    return Ok(report);
                }
                continue;
            }
            let existed = staged.contains_key(&card.id) || tables.cards.contains_key(&card.id);
            staged.insert(card.id.clone(), card.clone());
            report.record(if existed { UpsertOutcome::Updated } else { UpsertOutcome::Created });
        }

        tables.writes += report.created + report.updated;
        tables.cards.extend(staged);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn card(id: &str) -> CardRecord {
        CardRecord {
            id: id.to_string(),
            name: format!("Card {id}"),
            set_id: "base1".to_string(),
            card_number: "1".to_string(),
            card_number_sort_key: Some(1),
            image_url: None,
            raw_payload: "{}".to_string(),
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_batch_commits_successful_cards() {
        let store = InMemoryStore::new().reject_ids(["base1-2"]);
        let report = store
            .apply_card_batch(&[card("base1-1"), card("base1-2"), card("base1-3")], 5)
            .await
            .unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.rolled_back);
        assert_eq!(store.card_count(), 2);
        assert!(store.card("base1-2").is_none());
    }

    #[tokio::test]
    async fn test_batch_rolls_back_past_allowance() {
        let store = InMemoryStore::new().reject_ids(["base1-1", "base1-3"]);
        let report = store
            .apply_card_batch(&[card("base1-1"), card("base1-2"), card("base1-3"), card("base1-4")], 1)
            .await
            .unwrap();

        assert!(report.rolled_back);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.created, 0);
        assert_eq!(store.card_count(), 0);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_second_apply_updates() {
        let store = InMemoryStore::new();
        store.apply_card_batch(&[card("base1-1")], 0).await.unwrap();
        let report = store.apply_card_batch(&[card("base1-1")], 0).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 0);
        assert_eq!(store.batch_count(), 2);
    }
}
