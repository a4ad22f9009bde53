use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Card entry exactly as found in a per-set archive file.
///
/// The typed fields are the ones the pipeline derives storage columns from;
/// `payload` is the complete upstream object and is what ends up in `raw_payload`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCard {
    pub id: String,
    pub name: String,
    pub number: String,
    pub set_id: Option<String>,
    pub image_url: Option<String>,
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
struct RawCardFields {
    id: String,
    name: String,
    #[serde(default)]
    number: Option<String>,
    #[serde(default)]
    set: Option<SetReference>,
    #[serde(default)]
    images: Option<CardImages>,
}

#[derive(Debug, Deserialize)]
struct SetReference {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardImages {
    small: Option<String>,
}

impl RawCard {
    /// Reads the modeled fields out of an upstream card object, keeping the object itself.
    pub fn from_value(payload: Value) -> serde_json::Result<Self> {
        let fields = RawCardFields::deserialize(&payload)?;
        Ok(Self {
            id: fields.id,
            name: fields.name,
            number: fields.number.unwrap_or_default(),
            set_id: fields.set.and_then(|s| s.id).filter(|id| !id.is_empty()),
            image_url: fields.images.and_then(|i| i.small),
            payload,
        })
    }
}

/// Set entry as found in the sets catalog file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub series: String,
    #[serde(default)]
    pub printed_total: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub legalities: Value,
    #[serde(default)]
    pub ptcgo_code: Option<String>,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub images: SetImages,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetImages {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub logo: String,
}

/// Storage-ready card row.
#[derive(Debug, Clone, PartialEq)]
pub struct CardRecord {
    pub id: String,
    pub name: String,
    pub set_id: String,
    pub card_number: String,
    /// Present only when `card_number` is made of ASCII digits.
    pub card_number_sort_key: Option<i64>,
    pub image_url: Option<String>,
    pub raw_payload: String,
    pub synced_at: DateTime<Utc>,
}

/// Storage-ready set row.
#[derive(Debug, Clone, PartialEq)]
pub struct SetRecord {
    pub id: String,
    pub name: String,
    pub series: String,
    pub printed_total: i64,
    pub total: i64,
    pub ptcgo_code: Option<String>,
    pub release_date: String,
    pub updated_at: String,
    pub symbol_url: String,
    pub logo_url: String,
    pub legalities_payload: String,
}

/// The last successfully completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMarker {
    pub key: String,
    pub fingerprint: Fingerprint,
    pub synced_at: DateTime<Utc>,
}

/// Cache-validation headers of the upstream snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Opaque identity of an upstream snapshot version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fingerprint built from the validators, or `None` when the server sent neither.
    pub fn from_validators(validators: &Validators) -> Option<Self> {
        if validators.is_empty() {
            return None;
        }
        Some(Self(format!(
            "etag={}|last-modified={}",
            validators.etag.as_deref().unwrap_or(""),
            validators.last_modified.as_deref().unwrap_or("")
        )))
    }

    /// Content digest, used when the upstream response carries no validators.
    pub fn of_payload(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
