//! Download of output artifacts to a local directory.
//!
//! Artifact URLs are time-limited, so downloads should happen soon after
//! the session completes. Each artifact is streamed chunk by chunk into
//! `<dir>/<kind>.<ext>` (see [`artifact_file_name`]). When two artifacts of
//! one batch map to the same name the later ones get a `-2`, `-3`, ...
//! suffix. A file left incomplete by a failed download is removed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use stemsplit_core::media::artifact_file_name;
use stemsplit_core::session::OutputArtifact;
use tokio::io::AsyncWriteExt;

use crate::config::ClientConfig;
use crate::http::{build_client, ensure_success, StatusFailure};

/// Errors from downloading an artifact.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("Download of '{kind}' failed: {source}")]
    Request {
        kind: String,
        #[source]
        source: reqwest::Error,
    },

    /// Storage returned a non-2xx status (often an expired link).
    #[error("Download of '{kind}' rejected ({status}): {body}")]
    Status {
        kind: String,
        status: u16,
        body: String,
    },

    /// Writing the local file failed.
    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fetches artifacts over HTTP.
pub struct ArtifactDownloader {
    client: reqwest::Client,
}

impl ArtifactDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build a downloader honouring the configured request timeout.
    pub fn from_config(config: &ClientConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_client(config.request_timeout)?))
    }

    /// Download every artifact into `dir`, creating it if needed.
    ///
    /// Returns the written paths in artifact order. Stops at the first
    /// failure.
    pub async fn download_all(
        &self,
        artifacts: &[OutputArtifact],
        dir: &Path,
    ) -> Result<Vec<PathBuf>, DownloadError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| DownloadError::Io {
                path: dir.to_path_buf(),
                source,
            })?;

        let mut taken = HashSet::with_capacity(artifacts.len());
        let mut written = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let name = unique_file_name(artifact_file_name(artifact), &taken);
            let path = dir.join(&name);
            taken.insert(name);
            written.push(self.download_to(artifact, path).await?);
        }
        Ok(written)
    }

    /// Download one artifact into `dir`.
    pub async fn download(
        &self,
        artifact: &OutputArtifact,
        dir: &Path,
    ) -> Result<PathBuf, DownloadError> {
        self.download_to(artifact, dir.join(artifact_file_name(artifact)))
            .await
    }

    async fn download_to(
        &self,
        artifact: &OutputArtifact,
        path: PathBuf,
    ) -> Result<PathBuf, DownloadError> {
        let request_err = |source| DownloadError::Request {
            kind: artifact.kind.clone(),
            source,
        };

        let response = self
            .client
            .get(&artifact.locator)
            .send()
            .await
            .map_err(request_err)?;
        let response = ensure_success(response)
            .await
            .map_err(|StatusFailure { status, body }| DownloadError::Status {
                kind: artifact.kind.clone(),
                status,
                body,
            })?;

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|source| DownloadError::Io {
                path: path.clone(),
                source,
            })?;

        let size_bytes = match stream_into(&mut file, response, artifact, &path).await {
            Ok(size_bytes) => size_bytes,
            Err(e) => {
                drop(file);
                if let Err(remove) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %remove, "Failed to remove partial download");
                }
                return Err(e);
            }
        };

        tracing::info!(
            kind = %artifact.kind,
            path = %path.display(),
            size_bytes,
            "Artifact downloaded",
        );
        Ok(path)
    }
}

async fn stream_into(
    file: &mut tokio::fs::File,
    mut response: reqwest::Response,
    artifact: &OutputArtifact,
    path: &Path,
) -> Result<usize, DownloadError> {
    let io_err = |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut size_bytes = 0usize;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|source| DownloadError::Request {
            kind: artifact.kind.clone(),
            source,
        })?
    {
        size_bytes += chunk.len();
        file.write_all(&chunk).await.map_err(io_err)?;
    }
    file.flush().await.map_err(io_err)?;
    Ok(size_bytes)
}

/// `name`, or `name` with the first free `-N` suffix before its extension.
fn unique_file_name(name: String, taken: &HashSet<String>) -> String {
    if !taken.contains(&name) {
        return name;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (name.as_str(), None),
    };
    let mut n = 2;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
