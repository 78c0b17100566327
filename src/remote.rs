//! Remote file store access via the API gateway's `/storage` endpoints.
//!
//! The gateway fronts the actual document store (a shared drive) and exposes
//! a flat listing tagged with category plus per-file content download. The
//! sync engine consumes both through the [`FileLister`] and [`FileFetcher`]
//! seams so that tests can substitute in-memory fakes.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::error::{KbError, Result};
use crate::models::{FileContent, RemoteFile};

/// Lists every file currently present in the remote store.
#[async_trait]
pub trait FileLister: Send + Sync {
    async fn list_files(&self) -> Result<Vec<RemoteFile>>;
}

/// Downloads a single file's bytes by id.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn download(&self, file_id: &str) -> Result<FileContent>;
}

/// HTTP client for the storage gateway.
pub struct GatewayClient {
    list_client: reqwest::Client,
    download_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let api_key = match &config.api_key_env {
            Some(env) => Some(
                std::env::var(env)
                    .map_err(|_| KbError::Config(format!("{} not set", env)))?,
            ),
            None => None,
        };

        let list_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.list_timeout_secs))
            .build()?;
        // Downloads get a longer budget than listings.
        let download_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()?;

        Ok(Self {
            list_client,
            download_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn with_key(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("X-API-Key", key),
            None => req,
        }
    }
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    files: Vec<RemoteFile>,
}

#[async_trait]
impl FileLister for GatewayClient {
    async fn list_files(&self) -> Result<Vec<RemoteFile>> {
        let url = format!("{}/storage/files", self.base_url);
        let resp = self
            .with_key(self.list_client.get(&url))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(KbError::Transport(format!(
                "{} returned {}: {}",
                url, status, text
            )));
        }

        let parsed: ListResponse = resp
            .json()
            .await
            .map_err(|e| KbError::Data(format!("invalid file listing: {}", e)))?;
        Ok(parsed.files)
    }
}

#[async_trait]
impl FileFetcher for GatewayClient {
    async fn download(&self, file_id: &str) -> Result<FileContent> {
        let url = format!("{}/storage/files/{}/content", self.base_url, file_id);
        let resp = self
            .with_key(self.download_client.get(&url))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(KbError::Transport(format!(
                "{} returned {}: {}",
                url, status, text
            )));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .split(';')
            .next()
            .unwrap_or("application/octet-stream")
            .trim()
            .to_string();

        let filename = resp
            .headers()
            .get("x-file-name")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(file_id)
            .to_string();

        let bytes = resp.bytes().await?.to_vec();

        Ok(FileContent {
            bytes,
            content_type,
            filename,
        })
    }
}
