use crate::metrics::ReconcileMetrics;
use crate::storage::CatalogStore;
use crate::types::{Fingerprint, SyncMarker};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Records which snapshot the catalog was last synchronized from.
pub struct SyncLedger {
    store: Arc<dyn CatalogStore>,
    marker_key: String,
}

impl SyncLedger {
    pub fn new(store: Arc<dyn CatalogStore>, marker_key: impl Into<String>) -> Self {
        Self { store, marker_key: marker_key.into() }
    }

    /// Upsert the marker for `fingerprint`, stamped now.
    ///
    /// Returns whether the marker was written. A failed write is logged and not
    /// propagated: the catalog data is already committed, and the next run simply
    /// processes the same snapshot again.
    pub async fn commit(&self, fingerprint: &Fingerprint) -> bool {
        let marker = SyncMarker { key: self.marker_key.clone(), fingerprint: fingerprint.clone(), synced_at: Utc::now() };
        let committed = match self.store.save_marker(&marker).await {
            Ok(()) => {
                info!(marker = %self.marker_key, fingerprint = %fingerprint, "Updated sync marker");
                true
            }
            Err(e) => {
                warn!("Error updating sync marker {}: {}", self.marker_key, e);
                false
            }
        };
        ReconcileMetrics::record_marker_commit(committed);
        committed
    }
}
