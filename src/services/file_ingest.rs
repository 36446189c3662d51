//! File ingest: fetch bytes from a URL or local path into content storage

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::services::repository::FileSource;

/// A file copied into storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Decoded last path segment of the source
    pub original_filename: String,
    /// Path inside the files directory, named by content hash
    pub stored_path: PathBuf,
    pub size: u64,
}

/// Downloads or copies source files into `<storage>/files`
pub struct FileIngester {
    files_dir: PathBuf,
    client: reqwest::Client,
}

impl FileIngester {
    pub fn new(storage_dir: &Path, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("csv-import-worker/0.1")
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            files_dir: storage_dir.join("files"),
            client,
        })
    }

    /// Fetch `source` and store it. The error string is meant for the import log.
    pub async fn ingest(&self, source: &FileSource) -> Result<StoredFile, String> {
        let bytes = match source {
            FileSource::RemoteUrl(url) => self.download(url).await?,
            FileSource::LocalPath(path) => tokio::fs::read(path)
                .await
                .map_err(|e| format!("cannot read {}: {}", path, e))?,
        };
        if bytes.is_empty() {
            return Err("file is empty".to_string());
        }

        let original_filename = original_filename(source.as_str());
        let digest = hex::encode(Sha256::digest(&bytes));
        let stored_name = match extension(&original_filename) {
            Some(ext) => format!("{}.{}", digest, ext),
            None => digest,
        };

        tokio::fs::create_dir_all(&self.files_dir)
            .await
            .map_err(|e| format!("cannot create {}: {}", self.files_dir.display(), e))?;
        let stored_path = self.files_dir.join(stored_name);
        if !stored_path.exists() {
            tokio::fs::write(&stored_path, &bytes)
                .await
                .map_err(|e| format!("cannot write {}: {}", stored_path.display(), e))?;
        }

        Ok(StoredFile {
            original_filename,
            stored_path,
            size: bytes.len() as u64,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("server responded {}", response.status()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| format!("failed to read body: {}", e))?;
        Ok(body.to_vec())
    }
}

/// Last path segment with query/fragment removed and percent-escapes decoded
pub fn original_filename(source: &str) -> String {
    let trimmed = source
        .split(['?', '#'])
        .next()
        .unwrap_or(source)
        .trim_end_matches('/');
    let segment = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

fn extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_lowercase())
}
