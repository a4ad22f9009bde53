use crate::app::ports::{SnapshotDownload, SnapshotSource};
use crate::error::{Result, SyncError};
use crate::types::Validators;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use std::time::Duration;
use tracing::debug;

/// `SnapshotSource` over plain HTTP.
pub struct ReqwestSnapshotSource {
    client: reqwest::Client,
    probe_timeout: Duration,
    download_timeout: Duration,
}

impl ReqwestSnapshotSource {
    pub fn new(user_agent: &str, probe_timeout: Duration, download_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(Self { client, probe_timeout, download_timeout })
    }

    fn check_status(url: &str, resp: &reqwest::Response) -> Result<()> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SyncError::UpstreamStatus { status: status.as_u16(), url: url.to_string() })
        }
    }
}

fn validators_from(headers: &HeaderMap) -> Validators {
    let header = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string());
    Validators { etag: header(ETAG), last_modified: header(LAST_MODIFIED) }
}

#[async_trait]
impl SnapshotSource for ReqwestSnapshotSource {
    async fn probe(&self, url: &str) -> Result<Validators> {
        let resp = self.client.head(url).timeout(self.probe_timeout).send().await?;
        Self::check_status(url, &resp)?;
        let validators = validators_from(resp.headers());
        debug!(?validators, "Probed upstream snapshot");
        Ok(validators)
    }

    async fn download(&self, url: &str) -> Result<SnapshotDownload> {
        let resp = self.client.get(url).timeout(self.download_timeout).send().await?;
        Self::check_status(url, &resp)?;
        let headers = resp.headers().clone();
        let bytes = resp.bytes().await?.to_vec();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        Ok(SnapshotDownload { bytes, content_type, validators: validators_from(&headers) })
    }
}
