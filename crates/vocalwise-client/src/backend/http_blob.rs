//! Blob container reachable over plain HTTP `PUT`, authorised with a
//! shared-access query string.  The returned URL never carries the token.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::{BackendError, BlobRef, BlobStore};

#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
    container_url: String,
    sas_token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(
        container_url: impl Into<String>,
        sas_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            container_url: container_url.into().trim_end_matches('/').to_string(),
            sas_token: sas_token
                .map(|t| t.trim_start_matches('?').to_string())
                .filter(|t| !t.is_empty()),
        })
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.container_url, key.trim_start_matches('/'))
    }

    fn signed_url(&self, key: &str) -> String {
        match &self.sas_token {
            Some(token) => format!("{}?{}", self.public_url(key), token),
            None => self.public_url(key),
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, key: &str, bytes: Bytes) -> Result<BlobRef, BackendError> {
        let size = bytes.len();
        let resp = self
            .client
            .put(self.signed_url(key))
            .header("x-ms-blob-type", "BlockBlob")
            .body(bytes)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Unavailable(format!("upload failed: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(key, %status, body = %body, "blob upload rejected");
            return Err(match status.as_u16() {
                401 | 403 => BackendError::PermissionDenied,
                _ => BackendError::Unavailable(format!("blob store answered {status}")),
            });
        }

        debug!(key, size, "uploaded blob");
        Ok(BlobRef {
            key: key.to_string(),
            size,
        })
    }

    async fn download_url(&self, blob: &BlobRef) -> Result<String, BackendError> {
        Ok(self.public_url(&blob.key))
    }
}
