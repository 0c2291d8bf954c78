//! CLI verbs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use corecluster_ignition::{CredentialDiscovery, Synthesizer};
use tracing::info;

use crate::config::{self, ClusterConfig};
use crate::control_plane::Virsh;
use crate::disk::{DiskProvisioner, QemuImg};
use crate::error::ClusterError;
use crate::image::{GpgVerifier, ImageStore};
use crate::orchestrator::{Orchestrator, PowerAction};
use crate::privilege::{ExecutionContext, Privilege};
use crate::registry::NodeName;
use crate::report::VerbReport;
use crate::userdata::{ConfigProvider, LocalUserdata, SudoUserdata};

/// corectl - run a small cluster of libvirt VMs from a verified base image.
#[derive(Debug, Parser)]
#[command(name = "corectl")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub verb: Verb,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Verb {
    /// Download, verify and unpack the base image (root).
    Init,

    /// Write first-boot configuration for one or all nodes (non-root).
    Userdata {
        /// Node name; every node when omitted.
        node: Option<String>,
    },

    /// Create node disks and domains, then boot them (root).
    Create,

    /// Start every node (root).
    Start,

    /// Reboot every node (root).
    Reboot,

    /// Gracefully shut down every node (root).
    Shutdown,

    /// Force off every node (root).
    Poweroff,

    /// Remove every node's domain and volumes (root).
    Destroy,
}

impl Verb {
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Init => "init",
            Verb::Userdata { .. } => "userdata",
            Verb::Create => "create",
            Verb::Start => "start",
            Verb::Reboot => "reboot",
            Verb::Shutdown => "shutdown",
            Verb::Poweroff => "poweroff",
            Verb::Destroy => "destroy",
        }
    }

    /// Privilege the verb must run with.
    pub fn required_privilege(&self) -> Privilege {
        match self {
            Verb::Userdata { .. } => Privilege::Unprivileged,
            _ => Privilege::Elevated,
        }
    }
}

impl Cli {
    /// Run the verb.
    ///
    /// Returns the per-node report for verbs that produce one. The
    /// privilege check happens before anything else is touched.
    pub async fn run(self, ctx: &dyn ExecutionContext) -> Result<Option<VerbReport>> {
        ctx.require(self.verb.name(), self.verb.required_privilege())?;

        let config = ClusterConfig::from_env();
        info!(verb = self.verb.name(), "Running verb");

        match self.verb {
            Verb::Userdata { node } => {
                userdata(&config, node.as_deref()).await?;
                Ok(None)
            }
            Verb::Init => {
                let raw = orchestrator(config, None)?.init().await?;
                println!("{}", raw.display());
                Ok(None)
            }
            Verb::Create => {
                let configs: Arc<dyn ConfigProvider> = Arc::new(SudoUserdata::from_env()?);
                let report = orchestrator(config, Some(configs))?.create().await?;
                Ok(Some(report))
            }
            Verb::Start => power(config, PowerAction::Start).await,
            Verb::Reboot => power(config, PowerAction::Reboot).await,
            Verb::Shutdown => power(config, PowerAction::Shutdown).await,
            Verb::Poweroff => power(config, PowerAction::Poweroff).await,
            Verb::Destroy => Ok(Some(orchestrator(config, None)?.destroy().await)),
        }
    }
}

async fn power(config: ClusterConfig, action: PowerAction) -> Result<Option<VerbReport>> {
    Ok(Some(orchestrator(config, None)?.power(action).await))
}

/// Wire the production collaborators.
///
/// Verbs other than `create` never ask for first-boot configuration, so
/// they get a provider that refuses.
fn orchestrator(
    config: ClusterConfig,
    configs: Option<Arc<dyn ConfigProvider>>,
) -> Result<Orchestrator> {
    let verifier = Arc::new(GpgVerifier::new(config.gpg.clone()));
    let images = ImageStore::new(&config, verifier)?;
    let disks = DiskProvisioner::new(config.image_dir.clone(), Arc::new(QemuImg::new()));
    let control_plane = Arc::new(Virsh::new(config.connect_uri.clone()));
    let configs = configs.unwrap_or_else(|| Arc::new(NoUserdata));

    Ok(Orchestrator::new(
        config,
        control_plane,
        images,
        disks,
        configs,
    ))
}

struct NoUserdata;

#[async_trait]
impl ConfigProvider for NoUserdata {
    async fn first_boot_config(
        &self,
        _node: &NodeName,
    ) -> std::result::Result<PathBuf, ClusterError> {
        Err(ClusterError::Privilege {
            verb: "userdata".to_string(),
            required: Privilege::Unprivileged,
        })
    }
}

/// Synthesize and persist configurations, printing each written path.
async fn userdata(config: &ClusterConfig, node: Option<&str>) -> Result<()> {
    let nodes: Vec<&NodeName> = match node {
        Some(name) => match config.registry.get(name) {
            Some(node) => vec![node],
            None => bail!("unknown node '{name}'"),
        },
        None => config.registry.iter().collect(),
    };

    let discovery = CredentialDiscovery::for_current_user().map_err(ClusterError::from)?;
    let provider = LocalUserdata::new(Synthesizer::new(discovery), config::work_dir()?);
    for node in nodes {
        let path = provider.first_boot_config(node).await?;
        println!("{}", path.display());
    }
    Ok(())
}
