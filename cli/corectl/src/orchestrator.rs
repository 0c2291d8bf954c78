//! Node lifecycle orchestration.
//!
//! Maps the operator verbs onto control plane commands for every node in
//! the registry, strictly one command at a time and in registry order.
//!
//! ```text
//!  ABSENT ──create──▶ RUNNING ◀──start/reboot── STOPPED
//!                        │  ──shutdown/poweroff──▶  │
//!                        └─────────destroy──────────┴──▶ ABSENT
//! ```
//!
//! Failure policy differs per verb:
//! - `create` stops at the first failing node; later nodes are not touched.
//! - `start`, `reboot`, `shutdown` and `poweroff` try every node and report
//!   each outcome.
//! - `destroy` runs in phases: every stop, then every undefine, then one
//!   pool refresh, then every volume deletion. Failures are reported and
//!   the remaining work still runs, except that a node that could not be
//!   stopped keeps its domain and volumes.
//!
//! Concurrent invocations against the same host are not guarded against.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::control_plane::{customize_definition, ControlPlane, DomainSpec, DomainState};
use crate::disk::DiskProvisioner;
use crate::error::ClusterError;
use crate::image::ImageStore;
use crate::registry::NodeName;
use crate::report::VerbReport;
use crate::userdata::ConfigProvider;

/// Per-node power verbs that map to a single control plane command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Reboot,
    Shutdown,
    Poweroff,
}

impl PowerAction {
    pub fn verb(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Reboot => "reboot",
            PowerAction::Shutdown => "shutdown",
            PowerAction::Poweroff => "poweroff",
        }
    }
}

/// Drives every registry node through its lifecycle.
pub struct Orchestrator {
    config: ClusterConfig,
    control_plane: Arc<dyn ControlPlane>,
    images: ImageStore,
    disks: DiskProvisioner,
    configs: Arc<dyn ConfigProvider>,
}

impl Orchestrator {
    pub fn new(
        config: ClusterConfig,
        control_plane: Arc<dyn ControlPlane>,
        images: ImageStore,
        disks: DiskProvisioner,
        configs: Arc<dyn ConfigProvider>,
    ) -> Self {
        Self {
            config,
            control_plane,
            images,
            disks,
            configs,
        }
    }

    /// Download, verify and unpack the base image.
    pub async fn init(&self) -> Result<PathBuf, ClusterError> {
        self.images
            .ensure_ready(&self.config.channel, &self.config.version)
            .await
    }

    /// Provision and boot every node.
    ///
    /// Re-running against fully provisioned nodes is a no-op: existing
    /// disks are kept, existing domains are never redefined, and running
    /// domains are left alone. So are domains libvirt reports in any other
    /// state (paused, shutting down).
    pub async fn create(&self) -> Result<VerbReport, ClusterError> {
        let base = self.init().await?;
        let mut report = VerbReport::new("create");

        for node in &self.config.registry {
            if let Err(e) = self.create_node(node, &base).await {
                warn!(node = %node, error = %e, "Create failed, skipping remaining nodes");
                return Err(e);
            }
            report.succeeded(node.as_str(), "running");
        }
        Ok(report)
    }

    async fn create_node(&self, node: &NodeName, base: &Path) -> Result<(), ClusterError> {
        let disk = self.disks.ensure_derived_disk(node, base).await?;

        let operator_config = self.configs.first_boot_config(node).await?;
        let config_path = self.config.config_path(node);
        tokio::fs::copy(&operator_config, &config_path)
            .await
            .map_err(|e| ClusterError::storage(&config_path, e))?;
        debug!(node = %node, path = %config_path.display(), "Installed first-boot configuration");

        let domain = node.domain();
        let state = self.control_plane.domain_state(domain).await?;
        if let DomainState::Other(other) = &state {
            warn!(
                node = %node,
                state = %other,
                "Domain is neither running nor shut off, leaving it alone"
            );
            return Ok(());
        }
        if state == DomainState::Undefined {
            let spec = DomainSpec {
                name: domain.to_string(),
                disk,
                memory_mib: self.config.memory_mib,
                vcpus: self.config.vcpus,
                network: self.config.network.clone(),
            };
            let generated = self.control_plane.default_definition(&spec).await?;
            let definition = customize_definition(&generated, &config_path)?;
            self.control_plane.define_domain(domain, &definition).await?;
        } else {
            info!(node = %node, state = %state, "Domain already defined, keeping definition");
        }

        if state == DomainState::Running {
            info!(node = %node, "Domain already running");
        } else {
            self.control_plane.start_domain(domain).await?;
            info!(node = %node, "Domain started");
        }
        Ok(())
    }

    /// Issue one power command per node, independently.
    pub async fn power(&self, action: PowerAction) -> VerbReport {
        let mut report = VerbReport::new(action.verb());

        for node in &self.config.registry {
            let domain = node.domain();
            let result = match action {
                PowerAction::Start => self.control_plane.start_domain(domain).await,
                PowerAction::Reboot => self.control_plane.reboot_domain(domain).await,
                PowerAction::Shutdown => self.control_plane.stop_domain(domain).await,
                PowerAction::Poweroff => self.control_plane.destroy_domain(domain).await,
            };
            report.record(node.as_str(), action.verb(), result);
        }

        info!(
            verb = action.verb(),
            failures = report.failures().count(),
            "Power command issued to all nodes"
        );
        report
    }

    /// Tear down every node: domains, then storage.
    ///
    /// A node whose force-stop failed, or whose state could not be read,
    /// keeps its domain and volumes: its disk may still be in use.
    pub async fn destroy(&self) -> VerbReport {
        let mut report = VerbReport::new("destroy");
        let mut defined = Vec::new();
        let mut held = Vec::new();

        // Phase 1: force-stop everything that runs.
        for node in &self.config.registry {
            let domain = node.domain();
            match self.control_plane.domain_state(domain).await {
                Ok(DomainState::Undefined) => {
                    debug!(node = %node, "No domain to destroy");
                }
                Ok(DomainState::Stopped) => defined.push(node),
                Ok(_) => match self.control_plane.destroy_domain(domain).await {
                    Ok(()) => {
                        report.succeeded(node.as_str(), "stop");
                        defined.push(node);
                    }
                    Err(e) => {
                        report.failed(node.as_str(), "stop", e);
                        held.push(node);
                    }
                },
                Err(e) => {
                    report.failed(node.as_str(), "stop", e);
                    held.push(node);
                }
            }
        }

        // Phase 2: undefine, only after every stop was issued.
        for node in defined {
            let result = self.control_plane.undefine_domain(node.domain()).await;
            report.record(node.as_str(), "undefine", result);
        }

        // Phase 3: let the pool notice the volumes, then delete them.
        let result = self.control_plane.refresh_pool(&self.config.pool).await;
        report.record(&self.config.pool, "pool-refresh", result);

        for node in &self.config.registry {
            if held.contains(&node) {
                warn!(node = %node, "Domain may still be running, keeping its volumes");
                continue;
            }
            for (volume, path) in [
                (node.disk_volume(), self.config.disk_path(node)),
                (node.config_volume(), self.config.config_path(node)),
            ] {
                if !path.exists() {
                    continue;
                }
                let result = self
                    .control_plane
                    .delete_volume(&self.config.pool, &volume)
                    .await;
                report.record(node.as_str(), "vol-delete", result);
            }
        }

        info!(failures = report.failures().count(), "Destroy finished");
        report
    }
}
