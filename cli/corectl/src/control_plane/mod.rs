//! Virtualization control plane interface.
//!
//! The control plane (libvirt) is the source of truth for domain state.
//! Nothing here caches it: callers ask, then issue one command at a time.
//!
//! ## Components
//!
//! - `definition`: rewriting of the generated domain XML
//! - `virsh`: production adapter over `virsh` and `virt-install`
//! - `fake`: in-memory control plane for tests

mod definition;
mod fake;
mod virsh;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::ClusterError;

pub use definition::{customize_definition, FW_CFG_CONFIG_KEY, QEMU_NAMESPACE};
pub use fake::{ControlCall, FakeControlPlane};
pub use virsh::Virsh;

/// Domain state as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainState {
    /// No such domain.
    Undefined,
    /// Defined and not running.
    Stopped,
    Running,
    /// Paused, crashed, shutting down and so on.
    Other(String),
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainState::Undefined => f.write_str("undefined"),
            DomainState::Stopped => f.write_str("shut off"),
            DomainState::Running => f.write_str("running"),
            DomainState::Other(state) => f.write_str(state),
        }
    }
}

/// Inputs for generating a node's default domain definition.
#[derive(Debug, Clone)]
pub struct DomainSpec {
    pub name: String,
    pub disk: PathBuf,
    pub memory_mib: u32,
    pub vcpus: u32,
    pub network: String,
}

/// Narrow capability interface over the virtualization control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn domain_state(&self, domain: &str) -> Result<DomainState, ClusterError>;

    /// The control plane's default definition for `spec`, unmodified.
    async fn default_definition(&self, spec: &DomainSpec) -> Result<String, ClusterError>;

    async fn define_domain(&self, domain: &str, definition: &str) -> Result<(), ClusterError>;

    async fn start_domain(&self, domain: &str) -> Result<(), ClusterError>;

    async fn reboot_domain(&self, domain: &str) -> Result<(), ClusterError>;

    /// Ask the guest to shut down.
    async fn stop_domain(&self, domain: &str) -> Result<(), ClusterError>;

    /// Power the domain off immediately.
    async fn destroy_domain(&self, domain: &str) -> Result<(), ClusterError>;

    async fn undefine_domain(&self, domain: &str) -> Result<(), ClusterError>;

    async fn refresh_pool(&self, pool: &str) -> Result<(), ClusterError>;

    async fn delete_volume(&self, pool: &str, volume: &str) -> Result<(), ClusterError>;
}
