//! SSH public key discovery.
//!
//! Keys come from two sources, in this order:
//! 1. The running SSH agent, if `SSH_AUTH_SOCK` names one.
//! 2. Every `~/.ssh/id_*.pub` file, sorted by file name.
//!
//! An agent that is configured but cannot be reached is an error. An agent
//! that is simply not configured, or that holds no identities, is not.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Environment variable naming the agent socket.
const AGENT_SOCKET_ENV: &str = "SSH_AUTH_SOCK";

/// `ssh-add -L` exit status when the agent is reachable but empty.
const SSH_ADD_NO_IDENTITIES: i32 = 1;

/// Errors from credential discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("credential agent at {socket} is unreachable: {reason}")]
    AgentUnreachable { socket: String, reason: String },

    #[error("failed to read public key {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not determine the home directory")]
    NoHomeDir,

    /// Discovery ran in a child process on behalf of `user` and failed there.
    #[error("discovery as {user} failed: {message}")]
    Delegated { user: String, message: String },

    #[error("failed to encode configuration: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A source of public keys held by a running agent.
#[async_trait]
pub trait CredentialAgent: Send + Sync {
    /// List public keys, one per line.
    ///
    /// Returns `Ok(None)` when no agent is configured.
    async fn list_public_keys(&self) -> Result<Option<Vec<String>>, DiscoveryError>;
}

/// The OpenSSH agent, queried through `ssh-add -L`.
#[derive(Debug, Clone)]
pub struct SshAgent {
    socket: Option<PathBuf>,
    ssh_add: PathBuf,
}

impl SshAgent {
    /// Agent at an explicit socket (or none).
    pub fn new(socket: Option<PathBuf>) -> Self {
        Self {
            socket,
            ssh_add: PathBuf::from("ssh-add"),
        }
    }

    /// Agent named by `SSH_AUTH_SOCK`.
    pub fn from_env() -> Self {
        let socket = std::env::var_os(AGENT_SOCKET_ENV)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        Self::new(socket)
    }

    /// Use a different `ssh-add` binary.
    pub fn with_ssh_add(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_add = path.into();
        self
    }
}

#[async_trait]
impl CredentialAgent for SshAgent {
    async fn list_public_keys(&self) -> Result<Option<Vec<String>>, DiscoveryError> {
        let Some(socket) = &self.socket else {
            debug!("No SSH agent configured");
            return Ok(None);
        };

        let unreachable = |reason: String| DiscoveryError::AgentUnreachable {
            socket: socket.display().to_string(),
            reason,
        };

        if !socket.exists() {
            return Err(unreachable("socket does not exist".to_string()));
        }

        let output = Command::new(&self.ssh_add)
            .arg("-L")
            .env(AGENT_SOCKET_ENV, socket)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| unreachable(format!("failed to run {}: {e}", self.ssh_add.display())))?;

        match output.status.code() {
            Some(0) => {
                let keys = non_empty_lines(&String::from_utf8_lossy(&output.stdout));
                debug!(count = keys.len(), "Listed keys from SSH agent");
                Ok(Some(keys))
            }
            Some(SSH_ADD_NO_IDENTITIES) => {
                debug!("SSH agent holds no identities");
                Ok(Some(Vec::new()))
            }
            _ => Err(unreachable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
        }
    }
}

/// List `id_*.pub` files in `ssh_dir`, sorted by name.
///
/// A missing directory yields an empty list.
pub fn default_key_files(ssh_dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !ssh_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(ssh_dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("id_") && n.ends_with(".pub") && n.len() > "id_.pub".len())
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Collects public keys from an agent and the default key files.
pub struct CredentialDiscovery {
    agent: Box<dyn CredentialAgent>,
    ssh_dir: PathBuf,
}

impl CredentialDiscovery {
    /// Create a discovery over an explicit agent and key directory.
    pub fn new(agent: Box<dyn CredentialAgent>, ssh_dir: impl Into<PathBuf>) -> Self {
        Self {
            agent,
            ssh_dir: ssh_dir.into(),
        }
    }

    /// Discovery for the current user: `SSH_AUTH_SOCK` and `~/.ssh`.
    pub fn for_current_user() -> Result<Self, DiscoveryError> {
        let home = directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .ok_or(DiscoveryError::NoHomeDir)?;
        Ok(Self::new(Box::new(SshAgent::from_env()), home.join(".ssh")))
    }

    /// Discover keys, agent keys first, without duplicates.
    pub async fn discover(&self) -> Result<Vec<String>, DiscoveryError> {
        let mut keys = Vec::new();

        if let Some(agent_keys) = self.agent.list_public_keys().await? {
            extend_distinct(&mut keys, agent_keys);
        }

        for path in default_key_files(&self.ssh_dir)? {
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => contents,
                // Raced with removal between listing and reading.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "Public key disappeared, skipping");
                    continue;
                }
                Err(source) => return Err(DiscoveryError::ReadKey { path, source }),
            };
            extend_distinct(&mut keys, non_empty_lines(&contents));
        }

        info!(count = keys.len(), "Discovered public keys");
        Ok(keys)
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn extend_distinct(keys: &mut Vec<String>, more: Vec<String>) {
    for key in more {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticAgent(Option<Vec<&'static str>>);

    #[async_trait]
    impl CredentialAgent for StaticAgent {
        async fn list_public_keys(&self) -> Result<Option<Vec<String>>, DiscoveryError> {
            Ok(self
                .0
                .as_ref()
                .map(|keys| keys.iter().map(|k| k.to_string()).collect()))
        }
    }

    struct DeadAgent;

    #[async_trait]
    impl CredentialAgent for DeadAgent {
        async fn list_public_keys(&self) -> Result<Option<Vec<String>>, DiscoveryError> {
            Err(DiscoveryError::AgentUnreachable {
                socket: "/tmp/agent.sock".to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    #[test]
    fn test_default_key_files_pattern() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["id_rsa.pub", "id_ed25519.pub", "id_rsa", "known_hosts", "other.pub"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        let files = default_key_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, ["id_ed25519.pub", "id_rsa.pub"]);
    }

    #[test]
    fn test_default_key_files_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let files = default_key_files(&dir.path().join("absent")).unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_discover_agent_then_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("id_ed25519.pub"), "keyB\n").unwrap();
        std::fs::write(dir.path().join("id_rsa.pub"), "keyA\n\n").unwrap();

        let discovery =
            CredentialDiscovery::new(Box::new(StaticAgent(Some(vec!["keyC", "keyA"]))), dir.path());
        let keys = discovery.discover().await.unwrap();
        assert_eq!(keys, ["keyC", "keyA", "keyB"]);
    }

    #[tokio::test]
    async fn test_discover_nothing_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = CredentialDiscovery::new(Box::new(StaticAgent(None)), dir.path());
        assert!(discovery.discover().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discover_unreachable_agent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = CredentialDiscovery::new(Box::new(DeadAgent), dir.path());
        let err = discovery.discover().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::AgentUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_ssh_agent_unset_is_absent() {
        let agent = SshAgent::new(None);
        assert!(agent.list_public_keys().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ssh_agent_missing_socket_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let agent = SshAgent::new(Some(dir.path().join("agent.sock")));
        let err = agent.list_public_keys().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::AgentUnreachable { .. }));
    }

    /// Write an executable `ssh-add` stand-in and point an agent at it.
    fn stub_agent(dir: &Path, body: &str) -> SshAgent {
        use std::os::unix::fs::PermissionsExt;

        let socket = dir.join("agent.sock");
        std::fs::write(&socket, "").unwrap();

        let ssh_add = dir.join("ssh-add");
        let script = format!(
            concat!(
                "#!/bin/sh\n",
                "[ \"$1\" = \"-L\" ] || exit 9\n",
                "[ -n \"$SSH_AUTH_SOCK\" ] || exit 9\n",
                "{}\n",
            ),
            body
        );
        std::fs::write(&ssh_add, script).unwrap();
        std::fs::set_permissions(&ssh_add, std::fs::Permissions::from_mode(0o755)).unwrap();

        SshAgent::new(Some(socket)).with_ssh_add(ssh_add)
    }

    #[tokio::test]
    async fn test_ssh_agent_lists_keys() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(
            dir.path(),
            "printf 'ssh-ed25519 AAAAkeyA a@host\\n\\nssh-rsa AAAAkeyB b@host\\n'",
        );

        let keys = agent.list_public_keys().await.unwrap().unwrap();
        assert_eq!(keys, ["ssh-ed25519 AAAAkeyA a@host", "ssh-rsa AAAAkeyB b@host"]);
    }

    #[tokio::test]
    async fn test_ssh_agent_without_identities_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(dir.path(), "echo 'The agent has no identities.'\nexit 1");

        let keys = agent.list_public_keys().await.unwrap();
        assert_eq!(keys, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_ssh_agent_refusing_connection_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let agent = stub_agent(
            dir.path(),
            "echo 'Error connecting to agent: Connection refused' >&2\nexit 2",
        );

        match agent.list_public_keys().await.unwrap_err() {
            DiscoveryError::AgentUnreachable { reason, .. } => {
                assert!(reason.contains("Connection refused"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
