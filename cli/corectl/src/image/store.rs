//! Base image store.
//!
//! File layout in the shared image directory for channel `stable`,
//! version `current` and artifact `flatcar_production_qemu_image.img.bz2`:
//!
//! ```text
//! flatcar_production_qemu_image-stable-current.img            raw image (ready)
//! flatcar_production_qemu_image-stable-current.img.meta.json  provenance
//! flatcar_production_qemu_image-stable-current.img.bz2        download (transient)
//! flatcar_production_qemu_image-stable-current.img.bz2.sig    signature (transient)
//! ```
//!
//! Writes go to `.part` files and are renamed into place, so the raw image
//! only ever appears complete and verified.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::decompress::Compression;
use super::verify::SignatureVerifier;
use crate::config::ClusterConfig;
use crate::error::ClusterError;

/// Identity of a base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImage {
    pub channel: String,
    pub version: String,
}

/// Signature state of a downloaded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Verified,
    Failed,
}

/// What the image directory currently holds for a base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageState {
    /// Nothing usable.
    Missing,
    /// A compressed download exists but has not been verified and unpacked.
    Downloaded,
    /// The verified, decompressed raw image.
    Ready(PathBuf),
}

/// Provenance written next to a ready raw image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMeta {
    pub channel: String,
    pub version: String,
    pub artifact_url: String,
    pub artifact_sha256: String,
    pub verification: VerificationStatus,
    pub created_at: String,
}

/// Downloads, verifies and unpacks the shared base image.
pub struct ImageStore {
    image_dir: PathBuf,
    release_url: String,
    artifact: String,
    compression: Compression,
    client: reqwest::Client,
    verifier: Arc<dyn SignatureVerifier>,
}

impl ImageStore {
    /// Create a store over the configured image directory.
    pub fn new(
        config: &ClusterConfig,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Result<Self, ClusterError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("corectl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClusterError::Acquisition {
                url: config.release_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            image_dir: config.image_dir.clone(),
            release_url: config.release_url.clone(),
            artifact: config.artifact.clone(),
            compression: Compression::from_artifact(&config.artifact),
            client,
            verifier,
        })
    }

    /// Path of the raw image for `image`, whether or not it exists.
    pub fn raw_path(&self, image: &BaseImage) -> PathBuf {
        let stem = self
            .artifact
            .split('.')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("base");
        self.image_dir
            .join(format!("{stem}-{}-{}.img", image.channel, image.version))
    }

    fn download_path(&self, image: &BaseImage) -> PathBuf {
        append_suffix(&self.raw_path(image), self.compression.download_suffix())
    }

    fn artifact_url(&self, image: &BaseImage) -> String {
        let base = self
            .release_url
            .replace("{channel}", &image.channel)
            .replace("{version}", &image.version);
        format!("{}/{}", base.trim_end_matches('/'), self.artifact)
    }

    /// Inspect the image directory.
    pub fn state(&self, image: &BaseImage) -> ImageState {
        let raw = self.raw_path(image);
        if raw.is_file() {
            ImageState::Ready(raw)
        } else if self.download_path(image).is_file() {
            ImageState::Downloaded
        } else {
            ImageState::Missing
        }
    }

    /// Make the raw base image for (`channel`, `version`) available.
    ///
    /// Idempotent: an existing raw image is returned without any network
    /// access. A failed signature check removes the download and never
    /// decompresses it.
    pub async fn ensure_ready(
        &self,
        channel: &str,
        version: &str,
    ) -> Result<PathBuf, ClusterError> {
        let image = BaseImage {
            channel: channel.to_string(),
            version: version.to_string(),
        };

        if let ImageState::Ready(raw) = self.state(&image) {
            info!(path = %raw.display(), "Base image already present");
            return Ok(raw);
        }

        tokio::fs::create_dir_all(&self.image_dir)
            .await
            .map_err(|e| ClusterError::storage(&self.image_dir, e))?;

        let raw = self.raw_path(&image);
        let artifact = self.download_path(&image);
        let signature = append_suffix(&artifact, ".sig");
        let artifact_url = self.artifact_url(&image);
        let signature_url = format!("{artifact_url}.sig");

        info!(
            channel = %channel,
            version = %version,
            url = %artifact_url,
            "Downloading base image"
        );
        let artifact_sha256 = self
            .download(&artifact_url, &artifact)
            .await?
            .ok_or_else(|| ClusterError::Acquisition {
                url: artifact_url.clone(),
                reason: "not found".to_string(),
            })?;

        // An unpublished signature is a verification failure, not a network one.
        if self.download(&signature_url, &signature).await?.is_none() {
            remove_quietly(&artifact).await;
            return Err(ClusterError::Verification {
                artifact: artifact.clone(),
                reason: format!("no signature published at {signature_url}"),
            });
        }

        debug!(
            artifact = %artifact.display(),
            sha256 = %artifact_sha256,
            status = ?VerificationStatus::Unverified,
            "Base image downloaded"
        );
        if let Err(e) = self.verifier.verify(&artifact, &signature).await {
            warn!(
                artifact = %artifact.display(),
                status = ?VerificationStatus::Failed,
                "Discarding unverified base image"
            );
            remove_quietly(&artifact).await;
            remove_quietly(&signature).await;
            return Err(e);
        }

        let partial = append_suffix(&raw, ".part");
        if let Err(e) = self.compression.decompress(&artifact, &partial).await {
            remove_quietly(&partial).await;
            return Err(e);
        }
        tokio::fs::rename(&partial, &raw)
            .await
            .map_err(|e| ClusterError::storage(&raw, e))?;

        let meta = ImageMeta {
            channel: image.channel.clone(),
            version: image.version.clone(),
            artifact_url,
            artifact_sha256,
            verification: VerificationStatus::Verified,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        write_meta(&raw, &meta).await?;

        remove_quietly(&artifact).await;
        remove_quietly(&signature).await;

        info!(path = %raw.display(), "Base image ready");
        Ok(raw)
    }

    /// Stream `url` into `dest`, returning the SHA-256 of the bytes, or
    /// `None` if the server has no such file.
    async fn download(&self, url: &str, dest: &Path) -> Result<Option<String>, ClusterError> {
        let acquisition = |reason: String| ClusterError::Acquisition {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| acquisition(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let mut response = response
            .error_for_status()
            .map_err(|e| acquisition(e.to_string()))?;

        let partial = append_suffix(dest, ".part");
        let result = async {
            let mut file = tokio::fs::File::create(&partial)
                .await
                .map_err(|e| ClusterError::storage(&partial, e))?;
            let mut hasher = Sha256::new();
            let mut bytes = 0u64;

            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| acquisition(e.to_string()))?
            {
                hasher.update(&chunk);
                bytes += chunk.len() as u64;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| ClusterError::storage(&partial, e))?;
            }
            file.flush()
                .await
                .map_err(|e| ClusterError::storage(&partial, e))?;

            debug!(url = %url, bytes = bytes, "Download complete");
            Ok::<_, ClusterError>(hex::encode(hasher.finalize()))
        }
        .await;

        match result {
            Ok(digest) => {
                tokio::fs::rename(&partial, dest)
                    .await
                    .map_err(|e| ClusterError::storage(dest, e))?;
                Ok(Some(digest))
            }
            Err(e) => {
                remove_quietly(&partial).await;
                Err(e)
            }
        }
    }
}

async fn write_meta(raw: &Path, meta: &ImageMeta) -> Result<(), ClusterError> {
    let path = append_suffix(raw, ".meta.json");
    let contents =
        serde_json::to_string_pretty(meta).map_err(|e| ClusterError::storage(&path, e))?;
    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| ClusterError::storage(&path, e))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
