//! Detached signature verification.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ClusterError;

/// Verifies a detached signature over an artifact.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, artifact: &Path, signature: &Path) -> Result<(), ClusterError>;
}

/// GnuPG against the invoking user's default keyring.
#[derive(Debug, Clone)]
pub struct GpgVerifier {
    gpg: PathBuf,
}

impl GpgVerifier {
    pub fn new(gpg: impl Into<PathBuf>) -> Self {
        Self { gpg: gpg.into() }
    }
}

#[async_trait]
impl SignatureVerifier for GpgVerifier {
    async fn verify(&self, artifact: &Path, signature: &Path) -> Result<(), ClusterError> {
        let failed = |reason: String| ClusterError::Verification {
            artifact: artifact.to_path_buf(),
            reason,
        };

        if !signature.is_file() {
            return Err(failed(format!("signature {} is missing", signature.display())));
        }

        debug!(
            gpg = %self.gpg.display(),
            artifact = %artifact.display(),
            "Verifying detached signature"
        );

        let output = Command::new(&self.gpg)
            .args(["--batch", "--verify"])
            .arg(signature)
            .arg(artifact)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| failed(format!("failed to run {}: {e}", self.gpg.display())))?;

        if !output.status.success() {
            return Err(failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        info!(artifact = %artifact.display(), "Signature verified");
        Ok(())
    }
}
