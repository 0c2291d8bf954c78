//! libvirt adapter over the `virsh` and `virt-install` command-line tools.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ControlPlane, DomainSpec, DomainState};
use crate::error::ClusterError;

/// Production control plane.
#[derive(Debug, Clone)]
pub struct Virsh {
    connect_uri: String,
}

impl Virsh {
    pub fn new(connect_uri: impl Into<String>) -> Self {
        Self {
            connect_uri: connect_uri.into(),
        }
    }

    fn virsh(&self) -> Command {
        let mut cmd = Command::new("virsh");
        cmd.args(["--connect", &self.connect_uri]);
        cmd
    }

    /// Run `virsh <args>`, returning stdout on success.
    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<String, ClusterError> {
        let command = format!("virsh {}", args.join(" "));
        debug!(command = %command, "Running control plane command");

        let mut cmd = self.virsh();
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| ClusterError::control_plane(&command, e.to_string()))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| ClusterError::control_plane(&command, e.to_string()))?;
            // Closing stdin lets virsh see end of input.
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ClusterError::control_plane(&command, e.to_string()))?;

        if !output.status.success() {
            return Err(ClusterError::control_plane(
                &command,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Map `virsh domstate` output to a [`DomainState`].
fn parse_domstate(output: &str) -> DomainState {
    match output.lines().next().map(str::trim).unwrap_or("") {
        "running" => DomainState::Running,
        "shut off" => DomainState::Stopped,
        other => DomainState::Other(other.to_string()),
    }
}

/// `virsh` reports an unknown domain with one of these messages.
fn is_missing_domain(stderr: &str) -> bool {
    stderr.contains("failed to get domain") || stderr.contains("Domain not found")
}

#[async_trait]
impl ControlPlane for Virsh {
    async fn domain_state(&self, domain: &str) -> Result<DomainState, ClusterError> {
        match self.run(&["domstate", domain], None).await {
            Ok(output) => Ok(parse_domstate(&output)),
            Err(ClusterError::ControlPlane { message, .. }) if is_missing_domain(&message) => {
                Ok(DomainState::Undefined)
            }
            Err(e) => Err(e),
        }
    }

    async fn default_definition(&self, spec: &DomainSpec) -> Result<String, ClusterError> {
        let memory = spec.memory_mib.to_string();
        let vcpus = spec.vcpus.to_string();
        let disk = format!(
            "path={},format=qcow2,bus=virtio",
            spec.disk.display().to_string().replace(',', ",,")
        );
        let network = format!("network={},model=virtio", spec.network);

        let mut cmd = Command::new("virt-install");
        cmd.args(["--connect", &self.connect_uri])
            .args(["--name", &spec.name])
            .args(["--memory", &memory])
            .args(["--vcpus", &vcpus])
            .args(["--virt-type", "kvm"])
            .args(["--os-variant", "generic"])
            .args(["--disk", &disk])
            .args(["--network", &network])
            .args(["--graphics", "none"])
            .args(["--import", "--noautoconsole", "--print-xml"])
            .stdin(Stdio::null());

        let output = cmd
            .output()
            .await
            .map_err(|e| ClusterError::control_plane("virt-install --print-xml", e.to_string()))?;
        if !output.status.success() {
            return Err(ClusterError::control_plane(
                "virt-install --print-xml",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn define_domain(&self, domain: &str, definition: &str) -> Result<(), ClusterError> {
        self.run(&["define", "/dev/stdin"], Some(definition)).await?;
        info!(domain = %domain, "Domain defined");
        Ok(())
    }

    async fn start_domain(&self, domain: &str) -> Result<(), ClusterError> {
        self.run(&["start", domain], None).await.map(|_| ())
    }

    async fn reboot_domain(&self, domain: &str) -> Result<(), ClusterError> {
        self.run(&["reboot", domain], None).await.map(|_| ())
    }

    async fn stop_domain(&self, domain: &str) -> Result<(), ClusterError> {
        self.run(&["shutdown", domain], None).await.map(|_| ())
    }

    async fn destroy_domain(&self, domain: &str) -> Result<(), ClusterError> {
        self.run(&["destroy", domain], None).await.map(|_| ())
    }

    async fn undefine_domain(&self, domain: &str) -> Result<(), ClusterError> {
        self.run(&["undefine", domain], None).await.map(|_| ())
    }

    async fn refresh_pool(&self, pool: &str) -> Result<(), ClusterError> {
        self.run(&["pool-refresh", pool], None).await.map(|_| ())
    }

    async fn delete_volume(&self, pool: &str, volume: &str) -> Result<(), ClusterError> {
        self.run(&["vol-delete", "--pool", pool, volume], None)
            .await
            .map(|_| ())
    }
}
