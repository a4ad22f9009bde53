use crate::app::ports::SnapshotSource;
use crate::error::Result;
use crate::pipeline::fetcher::{with_retries, RetryPolicy};
use crate::storage::CatalogStore;
use crate::types::{Fingerprint, SyncMarker};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeStatus {
    /// The snapshot must be processed. `probed` is `None` when the upstream sent no validators.
    Changed { probed: Option<Fingerprint> },
    Unchanged { fingerprint: Fingerprint },
}

/// Compares the upstream snapshot's validators against the stored sync marker.
pub struct ChangeDetector {
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn CatalogStore>,
    url: String,
    marker_key: String,
    policy: RetryPolicy,
}

impl ChangeDetector {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        store: Arc<dyn CatalogStore>,
        url: impl Into<String>,
        marker_key: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self { source, store, url: url.into(), marker_key: marker_key.into(), policy }
    }

    /// Probe the upstream metadata and decide whether a full run is needed.
    ///
    /// Network failures propagate; nothing has been written at this point.
    pub async fn check_for_changes(&self) -> Result<ChangeStatus> {
        let validators = with_retries(&self.policy, "probe upstream snapshot", || self.source.probe(&self.url)).await?;
        let Some(current) = Fingerprint::from_validators(&validators) else {
            info!("Upstream sent no cache validators; processing snapshot");
            return Ok(ChangeStatus::Changed { probed: None });
        };

        if self.is_current(&current).await {
            info!("No changes detected since last sync ({})", current);
            Ok(ChangeStatus::Unchanged { fingerprint: current })
        } else {
            Ok(ChangeStatus::Changed { probed: Some(current) })
        }
    }

    /// Whether `fingerprint` equals the stored marker. A missing or unreadable marker is
    /// never current.
    pub async fn is_current(&self, fingerprint: &Fingerprint) -> bool {
        match self.last_marker().await {
            Some(marker) if &marker.fingerprint == fingerprint => true,
            Some(marker) => {
                info!(
                    previous = %marker.fingerprint,
                    current = %fingerprint,
                    last_synced_at = %marker.synced_at,
                    "Data has changed since last sync"
                );
                false
            }
            None => false,
        }
    }

    async fn last_marker(&self) -> Option<SyncMarker> {
        match self.store.load_marker(&self.marker_key).await {
            Ok(Some(marker)) => Some(marker),
            Ok(None) => {
                info!("No previous sync record found; processing all data");
                None
            }
            Err(e) => {
                warn!("Could not read sync marker ({}); processing all data", e);
                None
            }
        }
    }
}
