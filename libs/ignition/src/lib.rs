//! First-boot configuration for cluster nodes.
//!
//! Nodes boot a Flatcar/CoreOS-style image whose first-boot agent reads an
//! Ignition document from the firmware config device. This crate builds that
//! document from the public SSH keys the operator has at hand.
//!
//! # Format
//!
//! ```text
//! {"ignition":{"version":"2.0.0"},
//!  "passwd":{"users":[{"name":"core","sshAuthorizedKeys":["ssh-ed25519 ..."]}]}}
//! ```
//!
//! Key discovery must run as the invoking (non-root) user: the SSH agent
//! socket and `~/.ssh` belong to that user's session.
//!
//! ## Modules
//!
//! - `document`: the serialized document model
//! - `discovery`: SSH agent and default key file enumeration
//! - `synthesizer`: builds and persists per-node documents

mod discovery;
mod document;
mod synthesizer;

pub use discovery::{
    default_key_files, CredentialAgent, CredentialDiscovery, DiscoveryError, SshAgent,
};
pub use document::{
    FirstBootConfig, IgnitionSection, Passwd, User, DEFAULT_ACCOUNT, IGNITION_VERSION,
};
pub use synthesizer::{config_file_name, Synthesizer};
