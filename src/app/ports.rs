use crate::error::Result;
use crate::types::Validators;
use async_trait::async_trait;

/// Where the catalog snapshot comes from.
///
/// Implementations surface non-success HTTP statuses as `SyncError::UpstreamStatus`
/// so the retry policy can tell transient failures from fatal ones.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Read only the cache-validation headers of the snapshot.
    async fn probe(&self, url: &str) -> Result<Validators>;

    /// Download the whole snapshot.
    async fn download(&self, url: &str) -> Result<SnapshotDownload>;
}

#[derive(Clone, Debug)]
pub struct SnapshotDownload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub validators: Validators,
}
