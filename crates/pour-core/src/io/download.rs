//! Archive download.
//!
//! Fetches the whole source archive into memory, reporting progress as the
//! body streams in. Verification is a separate step run by the installer on
//! the returned bytes, so nothing touches the filesystem before the digest
//! has been checked.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::Reporter;
use pour_schema::PackageName;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with HTTP {status}")]
    Status { status: u16 },

    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unsupported URL scheme in '{0}'")]
    UnsupportedScheme(String),
}

/// Request for a fetch operation
#[derive(Clone, Copy)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub pkg_name: &'a PackageName,
    pub reporter: &'a dyn Reporter,
}

/// Retrieves archive bytes for a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, req: FetchRequest<'_>) -> Result<Bytes, FetchError>;
}

/// Fetcher for `http(s)://`, `file://` and plain filesystem paths.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a fetcher with its own client.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder().user_agent(crate::USER_AGENT).build()?;
        Ok(Self { client })
    }

    /// Reuse an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_http(&self, req: FetchRequest<'_>) -> Result<Bytes, FetchError> {
        let response = self.client.get(req.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let total_size = response.content_length();
        req.reporter.downloading(req.pkg_name, 0, total_size);

        let mut buffer = BytesMut::with_capacity(total_size.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
            req.reporter
                .downloading(req.pkg_name, buffer.len() as u64, total_size);
        }

        debug!(url = req.url, bytes = buffer.len(), "download complete");
        Ok(buffer.freeze())
    }

    async fn fetch_local(&self, path: PathBuf, req: FetchRequest<'_>) -> Result<Bytes, FetchError> {
        let data = tokio::fs::read(&path)
            .await
            .map_err(|source| FetchError::Io { path, source })?;
        let len = data.len() as u64;
        req.reporter.downloading(req.pkg_name, len, Some(len));
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, req: FetchRequest<'_>) -> Result<Bytes, FetchError> {
        match local_path(req.url) {
            Some(Ok(path)) => self.fetch_local(path, req).await,
            Some(Err(e)) => Err(e),
            None => self.fetch_http(req).await,
        }
    }
}

/// `Some` for URLs that name a local file, `None` for http(s).
fn local_path(url: &str) -> Option<Result<PathBuf, FetchError>> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(Ok(PathBuf::from(path)));
    }
    match url.split_once("://") {
        Some(("http" | "https", _)) => None,
        Some(_) => Some(Err(FetchError::UnsupportedScheme(url.to_string()))),
        None => Some(Ok(PathBuf::from(url))),
    }
}
