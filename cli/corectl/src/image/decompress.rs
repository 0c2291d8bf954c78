//! Artifact decompression.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::process::Stdio;

use flate2::read::GzDecoder;
use tokio::process::Command;
use tracing::debug;

use crate::error::ClusterError;

/// Compression of a release artifact, chosen by its file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// `.bz2`, decompressed by the external `bunzip2`.
    Bzip2,
    /// `.gz`, decompressed in-process.
    Gzip,
    /// Anything else is copied as-is.
    None,
}

impl Compression {
    pub fn from_artifact(name: &str) -> Self {
        if name.ends_with(".bz2") {
            Compression::Bzip2
        } else if name.ends_with(".gz") {
            Compression::Gzip
        } else {
            Compression::None
        }
    }

    /// Suffix of the downloaded file next to the raw image.
    pub fn download_suffix(&self) -> &'static str {
        match self {
            Compression::Bzip2 => ".bz2",
            Compression::Gzip => ".gz",
            Compression::None => ".download",
        }
    }

    /// Decompress `src` into `dst`, leaving `src` in place.
    pub async fn decompress(&self, src: &Path, dst: &Path) -> Result<(), ClusterError> {
        debug!(
            compression = ?self,
            src = %src.display(),
            dst = %dst.display(),
            "Decompressing"
        );

        match self {
            Compression::Bzip2 => bunzip2(src, dst).await,
            Compression::Gzip => {
                let (src_owned, dst_owned) = (src.to_path_buf(), dst.to_path_buf());
                tokio::task::spawn_blocking(move || gunzip(&src_owned, &dst_owned))
                    .await
                    .map_err(|e| ClusterError::storage(dst, e))?
                    .map_err(|e| ClusterError::storage(dst, e))
            }
            Compression::None => tokio::fs::copy(src, dst)
                .await
                .map(|_| ())
                .map_err(|e| ClusterError::storage(dst, e)),
        }
    }
}

async fn bunzip2(src: &Path, dst: &Path) -> Result<(), ClusterError> {
    let out = File::create(dst).map_err(|e| ClusterError::storage(dst, e))?;

    let output = Command::new("bunzip2")
        .args(["--keep", "--stdout"])
        .arg(src)
        .stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .output()
        .await
        .map_err(|e| ClusterError::storage(dst, format!("failed to run bunzip2: {e}")))?;

    if !output.status.success() {
        return Err(ClusterError::storage(
            dst,
            format!(
                "bunzip2 failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(())
}

fn gunzip(src: &Path, dst: &Path) -> io::Result<()> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(src)?));
    let mut out = File::create(dst)?;
    io::copy(&mut decoder, &mut out)?;
    out.sync_all()
}
