//! Archive extraction.
//!
//! The snapshot is a zip of the upstream data repository. Two entry groups matter:
//! `cards/<lang>/<set>.json` (an array of card objects per set) and `sets/<lang>.json`
//! (the array of all sets). The archive usually wraps everything in one top-level
//! directory, which is ignored.

use crate::constants::{CARDS_DIR, JSON_EXTENSION, MAX_ENTRY_BYTES, SETS_DIR};
use crate::error::Result;
use crate::metrics::ExtractMetrics;
use crate::types::{RawCard, RawSet};
use serde_json::Value;
use std::io::{Cursor, Read};
use tracing::{debug, info, warn};
use zip::ZipArchive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Card file of one set; carries the set name from the entry path.
    Cards(String),
    Sets,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub card_files: usize,
    pub set_files: usize,
    pub skipped_entries: usize,
    pub skipped_records: usize,
}

#[derive(Debug, Default)]
pub struct Extracted {
    pub cards: Vec<RawCard>,
    pub sets: Vec<RawSet>,
    pub stats: ExtractStats,
}

pub struct ArchiveExtractor {
    language: String,
}

impl ArchiveExtractor {
    pub fn new(language: impl Into<String>) -> Self {
        Self { language: language.into() }
    }

    /// Classify an entry path, ignoring at most one leading archive root directory.
    pub fn classify(&self, path: &str) -> Option<EntryKind> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let sets_file = format!("{}{}", self.language, JSON_EXTENSION);
        match parts.as_slice() {
            [.., dir, lang, file] if *dir == CARDS_DIR && *lang == self.language && parts.len() <= 4 => file
                .strip_suffix(JSON_EXTENSION)
                .filter(|name| !name.is_empty())
                .map(|name| EntryKind::Cards(name.to_string())),
            [.., dir, file] if *dir == SETS_DIR && *file == sets_file && parts.len() <= 3 => Some(EntryKind::Sets),
            _ => None,
        }
    }

    /// Walk the archive one entry at a time.
    ///
    /// Only one entry's text is held at a time; it is parsed, appended, then released.
    /// An archive that cannot be opened is an error, a bad entry is logged and skipped.
    pub fn extract(&self, bytes: &[u8]) -> Result<Extracted> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        info!("Processing archive with {} entries", archive.len());
        let mut extracted = Extracted::default();

        for index in 0..archive.len() {
            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable archive entry #{}: {}", index, e);
                    extracted.stats.skipped_entries += 1;
                    continue;
                }
            };
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let Some(kind) = self.classify(&name) else {
                continue;
            };

            // The declared size comes from the entry header and is not trusted
            let mut content = String::new();
            if let Err(e) = entry.by_ref().take(MAX_ENTRY_BYTES + 1).read_to_string(&mut content) {
                warn!("Skipping entry {}: could not decode: {}", name, e);
                extracted.stats.skipped_entries += 1;
                continue;
            }
            if content.len() as u64 > MAX_ENTRY_BYTES {
                warn!("Skipping entry {}: larger than {} bytes", name, MAX_ENTRY_BYTES);
                extracted.stats.skipped_entries += 1;
                continue;
            }
            let records: Vec<Value> = match serde_json::from_str(&content) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Skipping entry {}: invalid format: {}", name, e);
                    extracted.stats.skipped_entries += 1;
                    continue;
                }
            };
            drop(content);

            match kind {
                EntryKind::Cards(set_name) => {
                    let added = self.append_cards(&mut extracted, records, &set_name);
                    extracted.stats.card_files += 1;
                    debug!("Added {} cards from {}", added, set_name);
                    if extracted.stats.card_files % 10 == 0 {
                        info!(
                            "Processed {} card files, {} cards so far",
                            extracted.stats.card_files,
                            extracted.cards.len()
                        );
                    }
                }
                EntryKind::Sets => {
                    let added = self.append_sets(&mut extracted, records);
                    extracted.stats.set_files += 1;
                    info!("Added {} sets", added);
                }
            }
        }

        ExtractMetrics::record(&extracted.stats, extracted.cards.len(), extracted.sets.len());
        info!(
            "Processed {} card files ({} cards) and {} sets files ({} sets); skipped {} entries, {} records",
            extracted.stats.card_files,
            extracted.cards.len(),
            extracted.stats.set_files,
            extracted.sets.len(),
            extracted.stats.skipped_entries,
            extracted.stats.skipped_records
        );
        Ok(extracted)
    }

    fn append_cards(&self, extracted: &mut Extracted, records: Vec<Value>, set_name: &str) -> usize {
        let before = extracted.cards.len();
        for record in records {
            match RawCard::from_value(record) {
                Ok(card) => extracted.cards.push(card),
                Err(e) => {
                    warn!("Skipping malformed card in {}: {}", set_name, e);
                    extracted.stats.skipped_records += 1;
                }
            }
        }
        extracted.cards.len() - before
    }

    fn append_sets(&self, extracted: &mut Extracted, records: Vec<Value>) -> usize {
        let before = extracted.sets.len();
        for record in records {
            match serde_json::from_value::<RawSet>(record) {
                Ok(set) => extracted.sets.push(set),
                Err(e) => {
                    warn!("Skipping malformed set: {}", e);
                    extracted.stats.skipped_records += 1;
                }
            }
        }
        extracted.sets.len() - before
    }
}
