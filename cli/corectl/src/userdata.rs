//! First-boot configuration providers.
//!
//! Key discovery has to see the operator's session, so it never runs as
//! root. When `create` runs elevated it asks a provider for each node's
//! configuration file; the production provider re-runs this binary as the
//! user who invoked `sudo`.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use corecluster_ignition::{DiscoveryError, Synthesizer};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::WORK_DIR_ENV;
use crate::error::{ClusterError, DISCOVERY_EXIT_CODE};
use crate::privilege::Privilege;
use crate::registry::NodeName;

/// Produces a node's persisted first-boot configuration.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Synthesize and write `node`'s configuration, returning its path.
    async fn first_boot_config(&self, node: &NodeName) -> Result<PathBuf, ClusterError>;
}

/// Synthesizes in the current process. Only valid when unprivileged.
pub struct LocalUserdata {
    synthesizer: Synthesizer,
    work_dir: PathBuf,
}

impl LocalUserdata {
    pub fn new(synthesizer: Synthesizer, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            synthesizer,
            work_dir: work_dir.into(),
        }
    }
}

#[async_trait]
impl ConfigProvider for LocalUserdata {
    async fn first_boot_config(&self, node: &NodeName) -> Result<PathBuf, ClusterError> {
        Ok(self
            .synthesizer
            .synthesize_to(node.as_str(), &self.work_dir)
            .await?)
    }
}

/// Runs `sudo -u $SUDO_USER corectl userdata <node>`.
#[derive(Debug, Clone)]
pub struct SudoUserdata {
    exe: PathBuf,
    user: String,
}

impl SudoUserdata {
    pub fn new(exe: impl Into<PathBuf>, user: impl Into<String>) -> Self {
        Self {
            exe: exe.into(),
            user: user.into(),
        }
    }

    /// Provider for the user named by `SUDO_USER`.
    pub fn from_env() -> Result<Self, ClusterError> {
        let no_user = || ClusterError::Privilege {
            verb: "userdata".to_string(),
            required: Privilege::Unprivileged,
        };

        let user = std::env::var("SUDO_USER")
            .ok()
            .filter(|u| !u.is_empty() && u != "root")
            .ok_or_else(no_user)?;
        let exe = std::env::current_exe().map_err(|e| ClusterError::storage("/proc/self/exe", e))?;
        Ok(Self::new(exe, user))
    }

    /// Classify a failed `sudo ... userdata` run.
    ///
    /// Only the child's own discovery exit status is a discovery failure;
    /// anything else (unknown user, sudo policy, a crash) is reported with
    /// the child's stderr.
    fn child_failure(&self, node: &NodeName, code: Option<i32>, stderr: &str) -> ClusterError {
        if code == Some(DISCOVERY_EXIT_CODE) {
            return DiscoveryError::Delegated {
                user: self.user.clone(),
                message: stderr.to_string(),
            }
            .into();
        }

        let status = code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"));
        ClusterError::storage(
            &self.exe,
            format!(
                "`userdata {node}` as {} exited with {status}: {stderr}",
                self.user
            ),
        )
    }
}

#[async_trait]
impl ConfigProvider for SudoUserdata {
    async fn first_boot_config(&self, node: &NodeName) -> Result<PathBuf, ClusterError> {
        debug!(node = %node, user = %self.user, "Synthesizing configuration as operator");

        let output = Command::new("sudo")
            .arg(format!("--preserve-env=SSH_AUTH_SOCK,{WORK_DIR_ENV},RUST_LOG"))
            .args(["-H", "-u", &self.user, "--"])
            .arg(&self.exe)
            .args(["userdata", node.as_str()])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ClusterError::storage(&self.exe, format!("failed to run sudo: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.child_failure(node, output.status.code(), stderr.trim()));
        }

        let path = parse_written_path(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ClusterError::storage(&self.exe, format!("userdata for {node} printed no path"))
        })?;
        info!(node = %node, path = %path.display(), "Operator configuration ready");
        Ok(path)
    }
}

/// The last non-empty stdout line of `corectl userdata`.
fn parse_written_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .map(PathBuf::from)
}
