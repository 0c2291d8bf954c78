//! Per-node copy-on-write disks.
//!
//! Each node boots from a qcow2 overlay whose backing file is the shared raw
//! base image. The overlay has no size of its own; it inherits the backing
//! image's size. An existing overlay is never touched, which also means a
//! damaged one is not repaired.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ClusterError;
use crate::registry::NodeName;

/// Allocates a copy-on-write image over a backing file.
#[async_trait]
pub trait OverlayAllocator: Send + Sync {
    async fn create_overlay(&self, backing: &Path, target: &Path) -> Result<(), ClusterError>;
}

/// `qemu-img create -f qcow2 -F raw -b <backing> <target>`.
#[derive(Debug, Clone)]
pub struct QemuImg {
    binary: PathBuf,
}

impl QemuImg {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("qemu-img"),
        }
    }
}

impl Default for QemuImg {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OverlayAllocator for QemuImg {
    async fn create_overlay(&self, backing: &Path, target: &Path) -> Result<(), ClusterError> {
        let output = Command::new(&self.binary)
            .args(["create", "-f", "qcow2", "-F", "raw", "-b"])
            .arg(backing)
            .arg(target)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                ClusterError::storage(
                    target,
                    format!("failed to run {}: {e}", self.binary.display()),
                )
            })?;

        if !output.status.success() {
            return Err(ClusterError::storage(
                target,
                format!(
                    "qemu-img create failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(())
    }
}

/// Derives node disks from the base image.
pub struct DiskProvisioner {
    image_dir: PathBuf,
    allocator: Arc<dyn OverlayAllocator>,
}

impl DiskProvisioner {
    pub fn new(image_dir: impl Into<PathBuf>, allocator: Arc<dyn OverlayAllocator>) -> Self {
        Self {
            image_dir: image_dir.into(),
            allocator,
        }
    }

    /// Path of a node's disk.
    pub fn disk_path(&self, node: &NodeName) -> PathBuf {
        self.image_dir.join(node.disk_volume())
    }

    /// Ensure `node` has a disk layered on `base`, creating it if absent.
    pub async fn ensure_derived_disk(
        &self,
        node: &NodeName,
        base: &Path,
    ) -> Result<PathBuf, ClusterError> {
        if !base.is_file() {
            return Err(ClusterError::BackingImageMissing(base.to_path_buf()));
        }

        let disk = self.disk_path(node);
        if disk.exists() {
            debug!(node = %node, disk = %disk.display(), "Node disk already exists");
            return Ok(disk);
        }

        info!(
            node = %node,
            disk = %disk.display(),
            backing = %base.display(),
            "Creating node disk"
        );
        self.allocator.create_overlay(base, &disk).await?;
        Ok(disk)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Writes the backing path into the target, counting calls.
    #[derive(Default)]
    struct RecordingAllocator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OverlayAllocator for RecordingAllocator {
        async fn create_overlay(&self, backing: &Path, target: &Path) -> Result<(), ClusterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(target, format!("qcow2 backing={}", backing.display()))
                .map_err(|e| ClusterError::storage(target, e))
        }
    }

    fn node(name: &str) -> NodeName {
        name.parse().unwrap()
    }

    #[tokio::test]
    async fn test_creates_overlay_once() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.img");
        std::fs::write(&base, b"raw").unwrap();

        let allocator = Arc::new(RecordingAllocator::default());
        let provisioner = DiskProvisioner::new(dir.path(), allocator.clone());

        let first = provisioner
            .ensure_derived_disk(&node("core1"), &base)
            .await
            .unwrap();
        let contents = std::fs::read(&first).unwrap();

        let second = provisioner
            .ensure_derived_disk(&node("core1"), &base)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("core1.qcow2"));
        assert_eq!(std::fs::read(&second).unwrap(), contents);
        assert_eq!(allocator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_backing_image() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner =
            DiskProvisioner::new(dir.path(), Arc::new(RecordingAllocator::default()));

        let err = provisioner
            .ensure_derived_disk(&node("core1"), &dir.path().join("base.img"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::BackingImageMissing(_)));
        assert!(!dir.path().join("core1.qcow2").exists());
    }
}
