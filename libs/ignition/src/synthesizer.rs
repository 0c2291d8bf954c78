//! Per-node document synthesis and persistence.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::discovery::{CredentialDiscovery, DiscoveryError};
use crate::document::FirstBootConfig;

/// File name of a node's configuration, both in the operator's working
/// directory and in the shared image directory.
pub fn config_file_name(node: &str) -> String {
    format!("{node}.ign")
}

/// Builds first-boot configuration documents from discovered keys.
pub struct Synthesizer {
    discovery: CredentialDiscovery,
}

impl Synthesizer {
    pub fn new(discovery: CredentialDiscovery) -> Self {
        Self { discovery }
    }

    /// Build the document for `node`.
    ///
    /// Every node currently receives the same keys; the name only scopes
    /// logging and the output file.
    pub async fn synthesize(&self, node: &str) -> Result<FirstBootConfig, DiscoveryError> {
        let keys = self.discovery.discover().await?;
        info!(node = %node, keys = keys.len(), "Synthesized first-boot configuration");
        Ok(FirstBootConfig::with_authorized_keys(keys))
    }

    /// Build the document for `node` and write it into `dir`.
    pub async fn synthesize_to(&self, node: &str, dir: &Path) -> Result<PathBuf, DiscoveryError> {
        let config = self.synthesize(node).await?;
        persist(&config, node, dir).await
    }
}

/// Write `config` to `{dir}/{node}.ign`, replacing any previous file.
async fn persist(
    config: &FirstBootConfig,
    node: &str,
    dir: &Path,
) -> Result<PathBuf, DiscoveryError> {
    tokio::fs::create_dir_all(dir).await?;

    let path = dir.join(config_file_name(node));
    let tmp = path.with_extension("ign.tmp");
    tokio::fs::write(&tmp, config.to_json()?).await?;
    tokio::fs::rename(&tmp, &path).await?;

    info!(node = %node, path = %path.display(), "Wrote first-boot configuration");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::discovery::CredentialAgent;

    struct NoAgent;

    #[async_trait]
    impl CredentialAgent for NoAgent {
        async fn list_public_keys(&self) -> Result<Option<Vec<String>>, DiscoveryError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_synthesize_to_writes_document() {
        let ssh = tempfile::tempdir().unwrap();
        std::fs::write(ssh.path().join("id_ed25519.pub"), "keyA\n").unwrap();
        std::fs::write(ssh.path().join("id_rsa.pub"), "keyB\n").unwrap();
        let out = tempfile::tempdir().unwrap();

        let synthesizer =
            Synthesizer::new(CredentialDiscovery::new(Box::new(NoAgent), ssh.path()));
        let path = synthesizer.synthesize_to("core1", out.path()).await.unwrap();

        assert_eq!(path, out.path().join("core1.ign"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"{"ignition":{"version":"2.0.0"},"passwd":{"users":[{"name":"core","sshAuthorizedKeys":["keyA","keyB"]}]}}"#
        );
    }

    #[tokio::test]
    async fn test_synthesize_without_keys() {
        let ssh = tempfile::tempdir().unwrap();
        let synthesizer =
            Synthesizer::new(CredentialDiscovery::new(Box::new(NoAgent), ssh.path()));

        let config = synthesizer.synthesize("core2").await.unwrap();
        assert!(config.authorized_keys().is_empty());
    }

    #[test]
    fn test_config_file_name() {
        assert_eq!(config_file_name("core3"), "core3.ign");
    }
}
