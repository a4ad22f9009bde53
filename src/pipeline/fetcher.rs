use crate::app::ports::{SnapshotDownload, SnapshotSource};
use crate::error::{Result, SyncError};
use crate::metrics::FetchMetrics;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Retry schedule for upstream requests.
///
/// One initial attempt plus one retry per entry in `delays`, each retry waiting the
/// corresponding delay. Every attempt is bounded by `attempt_timeout`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub delays: Vec<Duration>,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>, attempt_timeout: Duration) -> Self {
        Self { delays, attempt_timeout }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }
}

/// Run `op` under `policy`, retrying transient failures only.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        FetchMetrics::record_attempt();
        let result = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(policy.attempt_timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts() => {
                let delay = policy.delays[attempt - 1];
                warn!(
                    "Attempt {} failed to {}: {}. Retrying in {}s...",
                    attempt,
                    what,
                    e,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                FetchMetrics::record_failure();
                return Err(SyncError::Fetch { what: what.to_string(), attempts: attempt, source: Box::new(e) });
            }
        }
    }
}

/// Downloads the whole snapshot archive.
pub struct ArchiveFetcher {
    source: Arc<dyn SnapshotSource>,
    url: String,
    policy: RetryPolicy,
}

impl ArchiveFetcher {
    pub fn new(source: Arc<dyn SnapshotSource>, url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self { source, url: url.into(), policy }
    }

    /// Fetch the archive. Exhausting the retries is fatal for the run.
    pub async fn fetch(&self) -> Result<SnapshotDownload> {
        info!("Downloading catalog snapshot from {}", self.url);
        let started = Instant::now();
        let download = with_retries(&self.policy, "download catalog snapshot", || self.source.download(&self.url)).await?;
        let elapsed = started.elapsed();
        FetchMetrics::record_download(download.bytes.len(), elapsed);

        info!(
            etag = download.validators.etag.as_deref().unwrap_or("-"),
            last_modified = download.validators.last_modified.as_deref().unwrap_or("-"),
            content_type = %download.content_type,
            "Downloaded snapshot: {:.1}MB in {:.1}s",
            download.bytes.len() as f64 / (1024.0 * 1024.0),
            elapsed.as_secs_f64()
        );
        Ok(download)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Validators;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted download outcomes in order.
    struct ScriptedSource {
        outcomes: Mutex<VecDeque<Result<SnapshotDownload>>>,
        calls: Mutex<usize>,
        stall: Option<Duration>,
    }

    impl ScriptedSource {
        fn new(outcomes: Vec<Result<SnapshotDownload>>) -> Self {
            Self { outcomes: Mutex::new(outcomes.into()), calls: Mutex::new(0), stall: None }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn probe(&self, _url: &str) -> Result<Validators> {
            Ok(Validators::default())
        }

        async fn download(&self, url: &str) -> Result<SnapshotDownload> {
            *self.calls.lock().unwrap() += 1;
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            let next = self.outcomes.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(SyncError::UpstreamStatus { status: 503, url: url.to_string() }))
        }
    }

    fn ok_download() -> Result<SnapshotDownload> {
        Ok(SnapshotDownload {
            bytes: b"PK".to_vec(),
            content_type: "application/zip".to_string(),
            validators: Validators { etag: Some("\"v1\"".to_string()), last_modified: None },
        })
    }

    fn unavailable() -> Result<SnapshotDownload> {
        Err(SyncError::UpstreamStatus { status: 503, url: "https://snapshots.example/catalog.zip".to_string() })
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(vec![Duration::ZERO; 3], Duration::from_secs(5))
    }

    fn fetcher(source: Arc<ScriptedSource>, policy: RetryPolicy) -> ArchiveFetcher {
        ArchiveFetcher::new(source, "https://snapshots.example/catalog.zip", policy)
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let source = Arc::new(ScriptedSource::new(vec![unavailable(), unavailable(), ok_download()]));
        let download = fetcher(source.clone(), fast_policy()).fetch().await.unwrap();
        assert_eq!(download.bytes, b"PK");
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_three_retries() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let err = fetcher(source.clone(), fast_policy()).fetch().await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch { attempts: 4, .. }));
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let not_found = Err(SyncError::UpstreamStatus { status: 404, url: "https://snapshots.example/catalog.zip".to_string() });
        let source = Arc::new(ScriptedSource::new(vec![not_found, ok_download()]));
        let err = fetcher(source.clone(), fast_policy()).fetch().await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch { attempts: 1, .. }));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_stalled_attempt_times_out_and_retries() {
        let mut scripted = ScriptedSource::new(vec![ok_download(), ok_download()]);
        scripted.stall = Some(Duration::from_millis(200));
        let source = Arc::new(scripted);
        let policy = RetryPolicy::new(vec![Duration::ZERO], Duration::from_millis(20));

        let err = fetcher(source.clone(), policy).fetch().await.unwrap_err();
        match err {
            SyncError::Fetch { attempts, source: cause, .. } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*cause, SyncError::Timeout(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn test_policy_attempt_count() {
        assert_eq!(fast_policy().max_attempts(), 4);
        assert_eq!(RetryPolicy::new(vec![], Duration::from_secs(1)).max_attempts(), 1);
    }
}
