//! Error taxonomy and operator-facing display.

use std::path::PathBuf;

use colored::Colorize;
use corecluster_ignition::DiscoveryError;
use thiserror::Error;

use crate::privilege::Privilege;

/// Errors raised while provisioning or operating the cluster.
///
/// None of these are retried. Whether one aborts the remaining nodes
/// depends on the verb (see [`crate::orchestrator`]).
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The process runs with the wrong privilege for the requested verb.
    #[error("`{verb}` must run {}", .required.describe())]
    Privilege { verb: String, required: Privilege },

    /// Downloading the base image or its signature failed.
    #[error("failed to download {url}: {reason}")]
    Acquisition { url: String, reason: String },

    /// The base image signature is missing or does not verify.
    #[error("signature verification failed for {artifact}: {reason}")]
    Verification { artifact: PathBuf, reason: String },

    /// A filesystem operation failed.
    #[error("storage error at {path}: {reason}")]
    Storage { path: PathBuf, reason: String },

    /// A node disk was requested before the base image is ready.
    #[error("backing image {0} does not exist; run `corectl init` first")]
    BackingImageMissing(PathBuf),

    /// Credential discovery failed.
    #[error("credential discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// A virtualization control plane command failed.
    #[error("control plane command `{command}` failed: {message}")]
    ControlPlane { command: String, message: String },
}

impl ClusterError {
    pub(crate) fn storage(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Storage {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn control_plane(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ControlPlane {
            command: command.into(),
            message: message.into(),
        }
    }
}

/// Exit status of `corectl` when credential discovery failed.
pub const DISCOVERY_EXIT_CODE: i32 = 3;

/// Process exit status for a fatal error.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ClusterError>() {
        Some(ClusterError::Discovery(_)) => DISCOVERY_EXIT_CODE,
        _ => 1,
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(cluster_err) = err.downcast_ref::<ClusterError>() {
        match cluster_err {
            ClusterError::Privilege {
                required: Privilege::Elevated,
                ..
            } => {
                eprintln!("\n{}", "Hint: re-run with sudo.".yellow());
            }
            ClusterError::Privilege {
                required: Privilege::Unprivileged,
                ..
            } => {
                eprintln!(
                    "\n{}",
                    "Hint: run as your own user; the SSH agent is not visible to root.".yellow()
                );
            }
            ClusterError::Verification { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: import the image signing key into root's GnuPG keyring.".yellow()
                );
            }
            ClusterError::Acquisition { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: check your network connection and the release channel.".yellow()
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_error_display() {
        let err = ClusterError::Privilege {
            verb: "create".to_string(),
            required: Privilege::Elevated,
        };
        assert_eq!(err.to_string(), "`create` must run as root");

        let err = ClusterError::Privilege {
            verb: "userdata".to_string(),
            required: Privilege::Unprivileged,
        };
        assert_eq!(err.to_string(), "`userdata` must run as a non-root user");
    }

    #[test]
    fn test_discovery_error_converts() {
        let err: ClusterError = DiscoveryError::NoHomeDir.into();
        assert!(matches!(err, ClusterError::Discovery(_)));
    }

    #[test]
    fn test_exit_codes() {
        let discovery = anyhow::Error::from(ClusterError::from(DiscoveryError::NoHomeDir));
        assert_eq!(exit_code(&discovery), DISCOVERY_EXIT_CODE);

        let storage = anyhow::Error::from(ClusterError::storage("/images", "read-only"));
        assert_eq!(exit_code(&storage), 1);

        assert_eq!(exit_code(&anyhow::anyhow!("unknown node 'core9'")), 1);
    }
}
