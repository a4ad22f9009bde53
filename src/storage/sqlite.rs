use super::{BatchReport, CatalogStore, RecordFailure, UpsertOutcome};
use crate::error::{Result, SyncError};
use crate::types::{CardRecord, Fingerprint, SetRecord, SyncMarker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const UPSERT_SET_SQL: &str = "
    INSERT INTO sets (id, name, series, printed_total, total, ptcgo_code, release_date,
                      updated_at, symbol_url, logo_url, legalities_payload)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT(id) DO UPDATE SET
        name = excluded.name,
        series = excluded.series,
        printed_total = excluded.printed_total,
        total = excluded.total,
        ptcgo_code = excluded.ptcgo_code,
        release_date = excluded.release_date,
        updated_at = excluded.updated_at,
        symbol_url = excluded.symbol_url,
        logo_url = excluded.logo_url,
        legalities_payload = excluded.legalities_payload";

// created_at is only written on first insert
const UPSERT_CARD_SQL: &str = "
    INSERT INTO cards (id, name, set_id, card_number, card_number_sort_key, image_url,
                       raw_payload, created_at, synced_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
    ON CONFLICT(id) DO UPDATE SET
        name = excluded.name,
        set_id = excluded.set_id,
        card_number = excluded.card_number,
        card_number_sort_key = excluded.card_number_sort_key,
        image_url = excluded.image_url,
        raw_payload = excluded.raw_payload,
        synced_at = excluded.synced_at";

const CARD_COLUMNS: &str =
    "id, name, set_id, card_number, card_number_sort_key, image_url, raw_payload, synced_at";

/// SQLite-backed catalog store.
///
/// The connection is shared by every stage of a run; the pipeline is sequential so a
/// mutex is enough.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!("Opened catalog database at {}", path.display());
        Self::bootstrap(conn)
    }

    /// Open the database only if the file is already there. Read-only commands use this so
    /// they never create an empty catalog.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Ok(None);
        }
        Self::open(path).map(Some)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("../../migrations/001_create_catalog_tables.sql"))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::store("database connection lock poisoned"))
    }

    pub fn count_sets(&self) -> Result<i64> {
        Ok(self.conn()?.query_row("SELECT COUNT(*) FROM sets", [], |row| row.get(0))?)
    }

    pub fn count_cards(&self) -> Result<i64> {
        Ok(self.conn()?.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))?)
    }

    pub fn get_set(&self, id: &str) -> Result<Option<SetRecord>> {
        let conn = self.conn()?;
        let set = conn
            .query_row(
                "SELECT id, name, series, printed_total, total, ptcgo_code, release_date,
                        updated_at, symbol_url, logo_url, legalities_payload
                 FROM sets WHERE id = ?1",
                params![id],
                set_from_row,
            )
            .optional()?;
        Ok(set)
    }

    pub fn get_card(&self, id: &str) -> Result<Option<CardRecord>> {
        let conn = self.conn()?;
        let card = conn
            .query_row(
                &format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = ?1"),
                params![id],
                card_from_row,
            )
            .optional()?;
        Ok(card)
    }

    /// Cards of one set in collector order: numeric cards by number, then the rest.
    pub fn cards_in_set(&self, set_id: &str) -> Result<Vec<CardRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CARD_COLUMNS} FROM cards WHERE set_id = ?1
             ORDER BY card_number_sort_key IS NULL, card_number_sort_key, card_number"
        ))?;
        let cards = stmt
            .query_map(params![set_id], card_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cards)
    }

    fn apply_card_batch_blocking(&self, cards: &[CardRecord], failure_allowance: usize) -> Result<BatchReport> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction()?;
        let mut report = BatchReport::default();

        for card in cards {
            // One savepoint per card so a failed card does not poison the batch
            let sp = tx.savepoint()?;
            match upsert_card(&sp, card) {
                Ok(outcome) => {
                    sp.commit()?;
                    report.record(outcome);
                }
                Err(e) => {
                    drop(sp);
                    debug!("Card {} rolled back to savepoint: {}", card.id, e);
                    report.failures.push(RecordFailure { id: card.id.clone(), reason: e.to_string() });
                    if report.failures.len() > failure_allowance {
                        tx.rollback()?;
                        report.roll_back();
                        return Ok(report);
                    }
                }
            }
        }

        tx.commit()?;
        Ok(report)
    }
}

fn upsert_card(conn: &Connection, card: &CardRecord) -> rusqlite::Result<UpsertOutcome> {
    let existed: bool = conn
        .prepare_cached("SELECT EXISTS(SELECT 1 FROM cards WHERE id = ?1)")?
        .query_row(params![card.id], |row| row.get(0))?;
    conn.prepare_cached(UPSERT_CARD_SQL)?.execute(params![
        card.id,
        card.name,
        card.set_id,
        card.card_number,
        card.card_number_sort_key,
        card.image_url,
        card.raw_payload,
        card.synced_at,
    ])?;
    Ok(if existed { UpsertOutcome::Updated } else { UpsertOutcome::Created })
}

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<CardRecord> {
    Ok(CardRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        set_id: row.get(2)?,
        card_number: row.get(3)?,
        card_number_sort_key: row.get(4)?,
        image_url: row.get(5)?,
        raw_payload: row.get(6)?,
        synced_at: row.get(7)?,
    })
}

fn set_from_row(row: &Row<'_>) -> rusqlite::Result<SetRecord> {
    Ok(SetRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        series: row.get(2)?,
        printed_total: row.get(3)?,
        total: row.get(4)?,
        ptcgo_code: row.get(5)?,
        release_date: row.get(6)?,
        updated_at: row.get(7)?,
        symbol_url: row.get(8)?,
        logo_url: row.get(9)?,
        legalities_payload: row.get(10)?,
    })
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn load_marker(&self, key: &str) -> Result<Option<SyncMarker>> {
        let conn = self.conn()?;
        let row: Option<(String, DateTime<Utc>)> = conn
            .query_row(
                "SELECT fingerprint, synced_at FROM sync_marker WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(fingerprint, synced_at)| SyncMarker {
            key: key.to_string(),
            fingerprint: Fingerprint::new(fingerprint),
            synced_at,
        }))
    }

    async fn save_marker(&self, marker: &SyncMarker) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO sync_marker (key, fingerprint, synced_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET fingerprint = excluded.fingerprint, synced_at = excluded.synced_at",
            params![marker.key, marker.fingerprint.as_str(), marker.synced_at],
        )?;
        Ok(())
    }

    async fn upsert_set(&self, set: &SetRecord) -> Result<UpsertOutcome> {
        let conn = self.conn()?;
        let existed: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sets WHERE id = ?1)",
            params![set.id],
            |row| row.get(0),
        )?;
        conn.prepare_cached(UPSERT_SET_SQL)?.execute(params![
            set.id,
            set.name,
            set.series,
            set.printed_total,
            set.total,
            set.ptcgo_code,
            set.release_date,
            set.updated_at,
            set.symbol_url,
            set.logo_url,
            set.legalities_payload,
        ])?;
        Ok(if existed { UpsertOutcome::Updated } else { UpsertOutcome::Created })
    }

    async fn apply_card_batch(&self, cards: &[CardRecord], failure_allowance: usize) -> Result<BatchReport> {
        self.apply_card_batch_blocking(cards, failure_allowance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str, number: &str) -> CardRecord {
        CardRecord {
            id: id.to_string(),
            name: format!("Card {id}"),
            set_id: id.split('-').next().unwrap().to_string(),
            card_number: number.to_string(),
            card_number_sort_key: number.parse().ok(),
            image_url: Some(format!("https://images.example/{id}.png")),
            raw_payload: format!("{{\"id\":\"{id}\"}}"),
            synced_at: Utc::now(),
        }
    }

    fn set(id: &str, release_date: &str) -> SetRecord {
        SetRecord {
            id: id.to_string(),
            name: "Base".to_string(),
            series: "Base".to_string(),
            printed_total: 102,
            total: 102,
            ptcgo_code: Some("BS".to_string()),
            release_date: release_date.to_string(),
            updated_at: "2020/08/14 09:35:00".to_string(),
            symbol_url: "https://images.example/base1/symbol.png".to_string(),
            logo_url: "https://images.example/base1/logo.png".to_string(),
            legalities_payload: "{\"unlimited\":\"Legal\"}".to_string(),
        }
    }

    fn reject_card(store: &SqliteStore, id: &str) {
        store
            .conn()
            .unwrap()
            .execute_batch(&format!(
                "CREATE TRIGGER reject_{0} BEFORE INSERT ON cards WHEN NEW.id = '{1}'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                id.replace('-', "_"),
                id
            ))
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_upsert_reports_create_then_update() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.upsert_set(&set("base1", "1999/01/09")).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(store.upsert_set(&set("base1", "1999/01/10")).await.unwrap(), UpsertOutcome::Updated);

        assert_eq!(store.count_sets().unwrap(), 1);
        assert_eq!(store.get_set("base1").unwrap().unwrap().release_date, "1999/01/10");
    }

    #[tokio::test]
    async fn test_failed_card_only_rolls_back_its_savepoint() {
        let store = SqliteStore::open_in_memory().unwrap();
        reject_card(&store, "base1-2");

        let batch = vec![card("base1-1", "1"), card("base1-2", "2"), card("base1-3", "3")];
        let report = store.apply_card_batch(&batch, 10).await.unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "base1-2");
        assert!(!report.rolled_back);
        assert_eq!(store.count_cards().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_batch_rolls_back_when_allowance_exceeded() {
        let store = SqliteStore::open_in_memory().unwrap();
        reject_card(&store, "base1-2");
        reject_card(&store, "base1-3");

        let batch = vec![card("base1-1", "1"), card("base1-2", "2"), card("base1-3", "3"), card("base1-4", "4")];
        let report = store.apply_card_batch(&batch, 1).await.unwrap();

        assert!(report.rolled_back);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(store.count_cards().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_keeps_single_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.apply_card_batch(&[card("base1-1", "1")], 0).await.unwrap();

        let mut renamed = card("base1-1", "1");
        renamed.name = "Alakazam".to_string();
        let report = store.apply_card_batch(&[renamed], 0).await.unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(store.count_cards().unwrap(), 1);
        assert_eq!(store.get_card("base1-1").unwrap().unwrap().name, "Alakazam");
    }

    #[tokio::test]
    async fn test_cards_in_set_sorted_by_number() {
        let store = SqliteStore::open_in_memory().unwrap();
        let batch = vec![
            card("swsh1-10", "10"),
            card("swsh1-SWSH001", "SWSH001"),
            card("swsh1-2", "2"),
        ];
        store.apply_card_batch(&batch, 0).await.unwrap();

        let ids: Vec<String> = store.cards_in_set("swsh1").unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["swsh1-2", "swsh1-10", "swsh1-SWSH001"]);
    }

    #[tokio::test]
    async fn test_marker_is_replaced() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load_marker("catalog").await.unwrap().is_none());

        for fp in ["etag=a|last-modified=", "etag=b|last-modified="] {
            store
                .save_marker(&SyncMarker {
                    key: "catalog".to_string(),
                    fingerprint: Fingerprint::new(fp),
                    synced_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let marker = store.load_marker("catalog").await.unwrap().unwrap();
        assert_eq!(marker.fingerprint.as_str(), "etag=b|last-modified=");
        let rows: i64 = store
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM sync_marker", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_open_existing_does_not_create_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.db");

        assert!(SqliteStore::open_existing(&path).unwrap().is_none());
        assert!(!path.exists());
        assert!(!dir.path().join("nested").exists());

        SqliteStore::open(&path).unwrap();
        let store = SqliteStore::open_existing(&path).unwrap().unwrap();
        assert_eq!(store.count_sets().unwrap(), 0);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.db");
        let store = SqliteStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.count_cards().unwrap(), 0);
    }
}
