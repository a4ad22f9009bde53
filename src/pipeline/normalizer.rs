use crate::types::{CardRecord, RawCard, RawSet, SetRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Default)]
pub struct Normalized {
    pub cards: Vec<CardRecord>,
    pub sets: Vec<SetRecord>,
}

/// Derive storage-ready records from raw archive entries. Never fails.
pub fn normalize(raw_cards: Vec<RawCard>, raw_sets: Vec<RawSet>, synced_at: DateTime<Utc>) -> Normalized {
    Normalized {
        cards: raw_cards.into_iter().map(|card| normalize_card(card, synced_at)).collect(),
        sets: raw_sets.into_iter().map(normalize_set).collect(),
    }
}

pub fn normalize_card(raw: RawCard, synced_at: DateTime<Utc>) -> CardRecord {
    let set_id = raw.set_id.unwrap_or_else(|| set_id_from_card_id(&raw.id).to_string());
    CardRecord {
        card_number_sort_key: card_number_sort_key(&raw.number),
        raw_payload: raw.payload.to_string(),
        id: raw.id,
        name: raw.name,
        set_id,
        card_number: raw.number,
        image_url: raw.image_url,
        synced_at,
    }
}

pub fn normalize_set(raw: RawSet) -> SetRecord {
    let legalities_payload = match raw.legalities {
        Value::Null => "{}".to_string(),
        legalities => legalities.to_string(),
    };
    SetRecord {
        id: raw.id,
        name: raw.name,
        series: raw.series,
        printed_total: raw.printed_total,
        total: raw.total,
        ptcgo_code: raw.ptcgo_code.filter(|code| !code.is_empty()),
        release_date: raw.release_date,
        updated_at: raw.updated_at,
        symbol_url: raw.images.symbol,
        logo_url: raw.images.logo,
        legalities_payload,
    }
}

/// Card ids are `<setId>-<number>`; the set id is everything before the first `-`.
pub fn set_id_from_card_id(card_id: &str) -> &str {
    card_id.split_once('-').map_or(card_id, |(set_id, _)| set_id)
}

/// Integer value of an all-digit card number. Anything else has no sort key.
pub fn card_number_sort_key(number: &str) -> Option<i64> {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse().ok()
}
