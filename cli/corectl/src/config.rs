//! Cluster configuration.
//!
//! Everything except the signature tool and the operator working directory
//! is compiled in. The value is built once at the entry point and passed
//! down; nothing reads it from ambient state afterwards.

use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;

use crate::registry::{NodeName, NodeRegistry};

/// Environment variable overriding the signature verification tool.
pub const GPG_ENV: &str = "GPG";

/// Environment variable overriding the operator working directory.
pub const WORK_DIR_ENV: &str = "CORECLUSTER_WORK_DIR";

/// Nodes of the cluster, in processing order.
pub const DEFAULT_NODES: [&str; 3] = ["core1", "core2", "core3"];

/// Cluster configuration.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Release channel (stable, beta, alpha).
    pub channel: String,

    /// Release version, or `current`.
    pub version: String,

    /// Release URL template; `{channel}` and `{version}` are substituted.
    pub release_url: String,

    /// Compressed image artifact name under the release URL.
    pub artifact: String,

    /// Shared, root-owned image directory backing the storage pool.
    pub image_dir: PathBuf,

    /// Storage pool over `image_dir`.
    pub pool: String,

    /// libvirt connection URI.
    pub connect_uri: String,

    /// libvirt network for node interfaces.
    pub network: String,

    /// Memory per node in MiB.
    pub memory_mib: u32,

    /// vCPUs per node.
    pub vcpus: u32,

    /// Signature verification tool.
    pub gpg: PathBuf,

    /// Node registry.
    pub registry: NodeRegistry,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            channel: "stable".to_string(),
            version: "current".to_string(),
            release_url: "https://{channel}.release.flatcar-linux.net/amd64-usr/{version}"
                .to_string(),
            artifact: "flatcar_production_qemu_image.img.bz2".to_string(),
            image_dir: PathBuf::from("/var/lib/libvirt/images"),
            pool: "default".to_string(),
            connect_uri: "qemu:///system".to_string(),
            network: "default".to_string(),
            memory_mib: 1024,
            vcpus: 1,
            gpg: PathBuf::from("gpg"),
            registry: default_registry(),
        }
    }
}

impl ClusterConfig {
    /// Compiled-in configuration with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(gpg) = std::env::var_os(GPG_ENV).filter(|v| !v.is_empty()) {
            config.gpg = PathBuf::from(gpg);
        }
        config
    }

    /// Path of a node's copy-on-write disk.
    pub fn disk_path(&self, node: &NodeName) -> PathBuf {
        self.image_dir.join(node.disk_volume())
    }

    /// Path of a node's configuration inside the shared image directory.
    pub fn config_path(&self, node: &NodeName) -> PathBuf {
        self.image_dir.join(node.config_volume())
    }
}

fn default_registry() -> NodeRegistry {
    NodeRegistry::from_static(&DEFAULT_NODES)
}

/// Per-operator directory for synthesized configurations.
pub fn work_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(WORK_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    ProjectDirs::from("net", "corecluster", "corecluster")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .context("Could not determine the working directory")
}
